use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use karst_core::events::{channel, EventReceiver, EventSender};
use karst_shared::chunk::ChunkData;
use karst_shared::coords::ChunkPos;
use karst_shared::protocol::{
    to_client, to_server, AuthMechanism, ClientDynamicInfo, PointedThing, APP_NAME,
    CLIENT_VERSION_STRING, PROTOCOL_VERSION,
};
use karst_shared::wire::{Packet, PacketWriter};

use crate::chat::{truncate_message, ChatRateLimiter};
use crate::config::ClientConfig;
use crate::dispatcher::{HandlerTable, PacketCounter};
use crate::events::{ChatLine, ClientEvent, InteractAction};
use crate::handlers::handler_table;
use crate::media::MediaTracker;
use crate::mesh::{resolve_worker_count, MeshUpdateManager};
use crate::net::{Channel, Transport};
use crate::player::LocalPlayer;
use crate::session::{Session, SessionState};
use crate::store::ChunkStore;
use crate::unload::{ack_batches, BlockUnloadEnforcer};
use crate::world::ClientWorld;

const COUNTER_REPORT_PERIOD: f32 = 30.0;
const RTT_REFRESH_PERIOD: f32 = 1.0;

/// A sound the server asked us to play. Audio output is an external
/// concern; the session keeps the authoritative registry so whatever
/// backend attaches sees consistent state.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSound {
    pub name: String,
    pub gain: f32,
    pub loops: bool,
}

/// The session: owns every component and drives them from a single
/// cooperative `step` per frame. Only the mesh update manager runs
/// threads of its own.
pub struct Client<T: Transport> {
    config: ClientConfig,
    net: T,
    pub(crate) session: Session,
    pub(crate) world: ClientWorld,
    pub(crate) mesh: MeshUpdateManager,
    pub(crate) player: LocalPlayer,
    pub(crate) media: MediaTracker,
    pub(crate) events: EventSender<ClientEvent>,
    events_rx: EventReceiver<ClientEvent>,
    pub(crate) chat_lines: VecDeque<ChatLine>,
    chat_limiter: ChatRateLimiter,
    previous_chat_sent: Option<String>,
    handlers: HandlerTable<T>,
    packet_counter: PacketCounter,
    counter_timer: f32,
    unload: BlockUnloadEnforcer,
    store: Option<ChunkStore>,
    store_timer: f32,
    pub(crate) position_send_interval: f32,
    position_send_timer: f32,
    avg_rtt: f32,
    rtt_timer: f32,
    pub(crate) map_seed: u64,
    pub(crate) time_of_day: f32,
    pub(crate) time_speed: f32,
    pub(crate) node_defs_received: bool,
    pub(crate) item_defs_received: bool,
    content_complete: bool,
    media_token_counter: u32,
    active_sounds: FxHashMap<i32, ActiveSound>,
    stopped: bool,
}

impl<T: Transport> Client<T> {
    pub fn new(config: ClientConfig, net: T) -> io::Result<Self> {
        let store = match &config.cache_dir {
            Some(dir) => Some(ChunkStore::open(dir)?),
            None => None,
        };

        let world = ClientWorld::new();
        let mesh = MeshUpdateManager::new(world.map(), resolve_worker_count(config.mesh_workers));

        let wanted_range =
            (config.view_range as f32 / ClientWorld::chunk_size()).ceil() as i64;
        let player = LocalPlayer::new(
            config.player_name.clone(),
            config.fov,
            wanted_range.clamp(1, 255) as u8,
        );

        let (events, events_rx) = channel();

        Ok(Self {
            session: Session::new(config.handshake_retry_interval),
            world,
            mesh,
            player,
            media: MediaTracker::new(),
            events,
            events_rx,
            chat_lines: VecDeque::new(),
            chat_limiter: ChatRateLimiter::new(config.chat_limit_per_10s),
            previous_chat_sent: None,
            handlers: handler_table(),
            packet_counter: PacketCounter::default(),
            counter_timer: COUNTER_REPORT_PERIOD,
            unload: BlockUnloadEnforcer::new(),
            store,
            store_timer: config.cache_save_interval,
            position_send_interval: config.position_send_interval,
            position_send_timer: config.position_send_interval,
            avg_rtt: 0.0,
            rtt_timer: RTT_REFRESH_PERIOD,
            map_seed: 0,
            time_of_day: 0.0,
            time_speed: 0.0,
            node_defs_received: false,
            item_defs_received: false,
            content_complete: false,
            media_token_counter: 0,
            active_sounds: FxHashMap::default(),
            stopped: false,
            config,
            net,
        })
    }

    /// Handle for input handling, UI, or script shims to queue work for
    /// the frame loop.
    pub fn event_sender(&self) -> EventSender<ClientEvent> {
        self.events.clone()
    }

    /// Chat output for the UI; one line per call, oldest first.
    pub fn pop_chat_line(&mut self) -> Option<ChatLine> {
        self.chat_lines.pop_front()
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopped
    }

    pub fn access_denied_reason(&self) -> Option<&str> {
        self.session.access_denied_reason()
    }

    /// One-line session summary for the host loop's periodic log.
    pub fn status_line(&self) -> String {
        format!(
            "state={:?} proto={} auth={:?} chunks={} meshed={} pending_rebuilds={} \
             media_outstanding={} sounds={} rtt={:.0}ms time={:.2}(x{:.1})",
            self.session.state(),
            self.session.protocol_version(),
            self.session.auth_mechanism(),
            self.world.chunk_count(),
            self.world.geometry_count(),
            self.mesh.pending_len(),
            self.media.outstanding_count(),
            self.active_sounds.len(),
            f64::from(self.avg_rtt) * 1000.0,
            self.time_of_day,
            self.time_speed,
        )
    }

    pub(crate) fn has_credentials(&self) -> bool {
        !self.config.password.is_empty()
    }

    pub(crate) fn next_media_token(&mut self) -> u32 {
        self.media_token_counter += 1;
        self.media_token_counter
    }

    /// One cooperative frame. Order: transport pump and receive batch,
    /// handshake gate, housekeeping (unload, position, diagnostics),
    /// event drain, mesh result drain, cache flush.
    pub fn step(&mut self, dt: f32) {
        if self.stopped {
            return;
        }

        self.net.update(Duration::from_secs_f32(dt));
        for packet in self.net.receive() {
            self.dispatch(packet);
        }

        if self.session.is_shutdown() {
            self.shutdown();
            return;
        }

        if !self.net.is_connected() {
            warn!("Connection to server lost, shutting down session");
            self.shutdown();
            return;
        }

        self.counter_timer -= dt;
        if self.counter_timer <= 0.0 {
            self.counter_timer = COUNTER_REPORT_PERIOD;
            self.packet_counter.report(COUNTER_REPORT_PERIOD);
            self.packet_counter.clear();
        }

        // Until the server acknowledges the handshake nothing else may
        // run; the first packet can be lost silently, so keep resending.
        if self.session.awaiting_handshake_reply() {
            if self.session.tick_handshake_retry(dt) {
                self.send_init();
            }
            return;
        }

        self.world.advance_clock(dt);

        if self.unload.tick(dt) {
            self.enforce_chunk_limit();
        }

        self.step_position_send(dt);
        self.update_rtt(dt);
        self.drain_events();
        self.drain_mesh_results();
        self.step_cache_flush(dt);
    }

    /// Session teardown: stop and drain the rebuild pool, flush the local
    /// cache, drop the connection. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.session.shutdown();

        info!("Shutting down session");
        self.mesh.shutdown();
        self.flush_cache();
        self.net.disconnect();
    }

    fn dispatch(&mut self, packet: Packet) {
        self.packet_counter.add(packet.opcode);

        let Some(handler) = self.handlers.get(&packet.opcode).copied() else {
            warn!(
                "unknown opcode 0x{:04X}, packet discarded",
                packet.opcode
            );
            return;
        };

        let mut reader = packet.reader();
        if let Err(err) = handler(self, &mut reader) {
            let name = to_client::name(packet.opcode).unwrap_or("?");
            warn!("malformed {name} packet discarded: {err}");
        }
    }

    fn enforce_chunk_limit(&mut self) {
        let cap = self.unload.resolve_cap(
            self.config.chunk_limit,
            self.config.view_range,
            ClientWorld::chunk_size(),
        );
        let evicted = self.world.evict_unused(self.config.unload_timeout, cap);
        if evicted.is_empty() {
            return;
        }

        debug!("evicted {} unused chunk(s)", evicted.len());
        for batch in ack_batches(&evicted) {
            let packet = build_block_ack(to_server::DELETED_BLOCKS, batch);
            self.net.send(Channel::Reliable, &packet);
        }
    }

    fn drain_mesh_results(&mut self) {
        let mut acked = Vec::new();
        while let Some(result) = self.mesh.next_result() {
            if result.ack_to_server {
                acked.push(result.pos);
            }
            self.world.store_geometry(result.pos, result.geometry);
            // Dropping the result here releases its chunk references.
        }

        for batch in ack_batches(&acked) {
            let packet = build_block_ack(to_server::GOT_BLOCKS, batch);
            self.net.send(Channel::Reliable, &packet);
        }
    }

    fn drain_events(&mut self) {
        let events: Vec<ClientEvent> = self.events_rx.drain().collect();
        for event in events {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::SendChatMessage { message } => self.send_chat_message(&message),
            ClientEvent::ChangePassword {
                old_password,
                new_password,
            } => self.send_change_password(&old_password, &new_password),
            ClientEvent::Interact { action, pointed } => self.send_interact(action, &pointed),
            ClientEvent::InventoryAction { serialized } => self.send_inventory_action(&serialized),
            ClientEvent::SetHudParam {
                hud_id,
                name,
                value,
            } => self.player.set_hud_param(hud_id, name, value),
            ClientEvent::PlaySound {
                id,
                name,
                gain,
                loops,
            } => {
                self.active_sounds.insert(id, ActiveSound { name, gain, loops });
            }
            ClientEvent::StopSound { id } => {
                self.active_sounds.remove(&id);
            }
            ClientEvent::FadeSound {
                id,
                step,
                target_gain,
            } => {
                debug!("fading sound {id} to {target_gain} at {step}/s");
                if target_gain > 0.0 {
                    if let Some(sound) = self.active_sounds.get_mut(&id) {
                        sound.gain = target_gain;
                    }
                } else {
                    self.active_sounds.remove(&id);
                }
            }
            ClientEvent::HaveMedia { tokens } => self.send_have_media(&tokens),
            ClientEvent::UpdateClientInfo { info } => self.send_client_info(&info),
            ClientEvent::Screenshot => {
                info!("screenshot requested; no renderer attached");
                self.chat_lines
                    .push_back(ChatLine::system("Screenshot requested"));
            }
            ClientEvent::Disconnect => self.shutdown(),
        }
    }

    fn step_position_send(&mut self, dt: f32) {
        self.position_send_timer -= dt;
        if self.position_send_timer > 0.0 {
            return;
        }
        self.position_send_timer = self.position_send_interval;

        if !self.player.position_changed() {
            return;
        }

        let mut w = PacketWriter::new(to_server::PLAYER_POSITION);
        self.player.write_control(&mut w);
        self.net.send(Channel::Unreliable, &w.finish());
        self.player.mark_position_sent();
    }

    /// Refreshes the RTT diagnostic once per second; it reads zero while
    /// media is still downloading (gate documented in DESIGN.md).
    fn update_rtt(&mut self, dt: f32) {
        self.rtt_timer -= dt;
        if self.rtt_timer > 0.0 {
            return;
        }
        self.rtt_timer = RTT_REFRESH_PERIOD;

        let media_busy = !self.media.is_finished() || self.media.is_downloading();
        self.avg_rtt = if media_busy { 0.0 } else { self.net.rtt() };
    }

    fn step_cache_flush(&mut self, dt: f32) {
        if self.store.is_none() {
            return;
        }
        self.store_timer -= dt;
        if self.store_timer <= 0.0 {
            self.store_timer = self.config.cache_save_interval;
            self.flush_cache();
        }
    }

    fn flush_cache(&mut self) {
        if self.store.is_none() {
            return;
        }
        let dirty = self.world.take_dirty();
        if dirty.is_empty() {
            return;
        }

        let entries: Vec<(ChunkPos, Arc<ChunkData>)> = dirty
            .iter()
            .filter_map(|pos| self.world.peek_chunk(*pos).map(|chunk| (*pos, chunk)))
            .collect();
        let store = self.store.as_ref().expect("presence checked above");
        let written = store.save_many(entries.iter().map(|(pos, chunk)| (*pos, chunk.as_ref())));
        debug!("cached {written} chunk(s)");
    }

    // --- outbound packet builders ---

    fn send_init(&mut self) {
        let mut w = PacketWriter::new(to_server::INIT);
        w.write_u16(PROTOCOL_VERSION);
        w.write_string(self.player.name());
        w.write_string(CLIENT_VERSION_STRING);
        w.write_string(APP_NAME);
        // No client-side mods in this build, so the optional checksum
        // field is absent.
        self.net.send(Channel::Reliable, &w.finish());
        self.session.advance(SessionState::Init);
    }

    pub(crate) fn send_auth_start(&mut self, mechanism: AuthMechanism) {
        let mut w = PacketWriter::new(to_server::AUTH_START);
        w.write_u8(mechanism.as_u8());
        self.net.send(Channel::Reliable, &w.finish());
    }

    pub(crate) fn send_request_media(&mut self, names: &[String]) {
        let mut w = PacketWriter::new(to_server::REQUEST_MEDIA);
        w.write_u16(names.len() as u16);
        for name in names {
            w.write_string(name);
        }
        self.net.send(Channel::Reliable, &w.finish());
    }

    fn send_client_ready(&mut self) {
        let mut w = PacketWriter::new(to_server::CLIENT_READY);
        w.write_u8(version_component(env!("CARGO_PKG_VERSION_MAJOR")));
        w.write_u8(version_component(env!("CARGO_PKG_VERSION_MINOR")));
        w.write_u8(version_component(env!("CARGO_PKG_VERSION_PATCH")));
        w.write_string(CLIENT_VERSION_STRING);
        self.net.send(Channel::Reliable, &w.finish());
    }

    fn send_chat_message(&mut self, message: &str) {
        // Arrow-key resends of the exact previous line are dropped without
        // ceremony.
        if self.previous_chat_sent.as_deref() == Some(message) {
            debug!("suppressing repeated chat message");
            return;
        }

        let (text, truncated) =
            truncate_message(message, usize::from(self.config.chat_max_len));
        if truncated {
            self.chat_lines
                .push_back(ChatLine::system("Chat message too long, cutting."));
        }

        if !self.chat_limiter.try_admit(self.world.clock()) {
            self.chat_lines
                .push_back(ChatLine::system("Too many messages sent, ignoring."));
            return;
        }

        let mut w = PacketWriter::new(to_server::CHAT_MESSAGE);
        w.write_string(&text);
        self.net.send(Channel::Reliable, &w.finish());
        self.previous_chat_sent = Some(message.to_owned());
    }

    fn send_change_password(&mut self, old_password: &str, new_password: &str) {
        let mut w = PacketWriter::new(to_server::CHANGE_PASSWORD);
        w.write_string(old_password);
        w.write_string(new_password);
        self.net.send(Channel::Reliable, &w.finish());
    }

    fn send_interact(&mut self, action: InteractAction, pointed: &PointedThing) {
        let mut w = PacketWriter::new(to_server::INTERACT);
        w.write_u8(action.as_u8());
        pointed.write(&mut w);
        self.net.send(Channel::Reliable, &w.finish());
    }

    fn send_inventory_action(&mut self, serialized: &str) {
        let mut w = PacketWriter::new(to_server::INVENTORY_ACTION);
        w.write_string(serialized);
        self.net.send(Channel::Reliable, &w.finish());
    }

    fn send_have_media(&mut self, tokens: &[u32]) {
        let mut w = PacketWriter::new(to_server::HAVE_MEDIA);
        w.write_u16(tokens.len() as u16);
        for token in tokens {
            w.write_u32(*token);
        }
        self.net.send(Channel::Reliable, &w.finish());
    }

    fn send_client_info(&mut self, info: &ClientDynamicInfo) {
        let mut w = PacketWriter::new(to_server::CLIENT_INFO);
        info.write(&mut w);
        self.net.send(Channel::Reliable, &w.finish());
    }

    /// Gameplay systems initialize exactly once, only after media and both
    /// definition sets are in.
    pub(crate) fn maybe_complete_content(&mut self) {
        if self.content_complete
            || self.session.state() < SessionState::AuthAccepted
            || !self.media.is_finished()
            || !self.node_defs_received
            || !self.item_defs_received
        {
            return;
        }

        self.content_complete = true;
        self.send_client_ready();
        self.session.advance(SessionState::Ready);
        info!("Content received; session ready (map seed {})", self.map_seed);
    }
}

/// GotBlocks / DeletedBlocks share one layout: u8 count then positions.
/// Callers batch to 255 beforehand; the count field is one byte.
fn build_block_ack(opcode: u16, batch: &[ChunkPos]) -> Packet {
    assert!(batch.len() <= 255, "block ack batch exceeds the u8 count");
    let mut w = PacketWriter::new(opcode);
    w.write_u8(batch.len() as u8);
    for pos in batch {
        w.write_v3s16(*pos);
    }
    w.finish()
}

fn version_component(raw: &str) -> u8 {
    raw.parse().unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::time::Duration;

    use karst_shared::wire::Packet;

    use crate::net::{Channel, Transport};

    /// Loopback transport: tests inject inbound packets and inspect what
    /// the client sent, with no sockets involved.
    pub(crate) struct MemoryTransport {
        pub sent: Vec<(Channel, Packet)>,
        pub inbound: VecDeque<Packet>,
        pub connected: bool,
        pub rtt: f32,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            Self {
                sent: Vec::new(),
                inbound: VecDeque::new(),
                connected: true,
                rtt: 0.05,
            }
        }
    }

    impl Transport for MemoryTransport {
        fn update(&mut self, _dt: Duration) {}

        fn send(&mut self, channel: Channel, packet: &Packet) {
            self.sent.push((channel, packet.clone()));
        }

        fn receive(&mut self) -> Vec<Packet> {
            self.inbound.drain(..).collect()
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn rtt(&self) -> f32 {
            self.rtt
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use glam::Vec3;

    use karst_shared::chunk::{BlockId, ChunkData};
    use karst_shared::coords::ChunkPos;
    use karst_shared::protocol::{to_client, to_server};
    use karst_shared::wire::{Packet, PacketWriter};

    use super::testing::MemoryTransport;
    use super::Client;
    use crate::config::ClientConfig;
    use crate::events::{ChatLineKind, ClientEvent};
    use crate::session::SessionState;

    fn test_config() -> ClientConfig {
        ClientConfig {
            mesh_workers: 1,
            ..ClientConfig::default()
        }
    }

    fn test_client(config: ClientConfig) -> Client<MemoryTransport> {
        Client::new(config, MemoryTransport::new()).expect("client without cache dir")
    }

    fn sent_count(client: &Client<MemoryTransport>, opcode: u16) -> usize {
        client
            .net
            .sent
            .iter()
            .filter(|(_, pkt)| pkt.opcode == opcode)
            .count()
    }

    fn inject(client: &mut Client<MemoryTransport>, packet: Packet) {
        client.net.inbound.push_back(packet);
    }

    fn hello_packet() -> Packet {
        let mut w = PacketWriter::new(to_client::HELLO);
        w.write_u16(44);
        w.write_u32(0b010); // SRP only
        w.finish()
    }

    fn auth_accept_packet() -> Packet {
        let mut w = PacketWriter::new(to_client::AUTH_ACCEPT);
        w.write_v3f(Vec3::new(0.0, 20.0, 0.0));
        w.write_u64(1234);
        w.write_f32(0.25);
        w.finish()
    }

    fn empty_announce_packet() -> Packet {
        let mut w = PacketWriter::new(to_client::ANNOUNCE_MEDIA);
        w.write_u16(0);
        w.write_string("");
        w.finish()
    }

    fn definitions_packet(opcode: u16) -> Packet {
        let mut w = PacketWriter::new(opcode);
        w.write_bytes(&[0u8; 4]);
        w.finish()
    }

    /// Drives the client to the Ready state over the loopback transport.
    fn connect(client: &mut Client<MemoryTransport>) {
        client.step(0.016); // sends Init
        inject(client, hello_packet());
        client.step(0.016);
        inject(client, auth_accept_packet());
        inject(client, empty_announce_packet());
        inject(client, definitions_packet(to_client::NODE_DEFINITIONS));
        inject(client, definitions_packet(to_client::ITEM_DEFINITIONS));
        client.step(0.016);
        assert_eq!(client.session.state(), SessionState::Ready);
    }

    #[test]
    fn handshake_retransmits_until_a_server_packet_arrives() {
        let mut client = test_client(test_config());

        client.step(0.016);
        assert_eq!(sent_count(&client, to_server::INIT), 1);
        assert_eq!(client.session.state(), SessionState::Init);

        // Under the 1.5 s retry period: no retransmit yet.
        for _ in 0..14 {
            client.step(0.1);
        }
        assert_eq!(sent_count(&client, to_server::INIT), 1);

        // Crossing the period: exactly one more.
        client.step(0.2);
        assert_eq!(sent_count(&client, to_server::INIT), 2);

        // Hello arrives: retry disarms the same frame, auth starts.
        inject(&mut client, hello_packet());
        client.step(0.016);
        assert_eq!(client.session.state(), SessionState::AuthInProgress);
        assert_eq!(sent_count(&client, to_server::AUTH_START), 1);

        for _ in 0..40 {
            client.step(0.1);
        }
        assert_eq!(sent_count(&client, to_server::INIT), 2, "no Init after hello");
    }

    #[test]
    fn auth_accept_alone_also_disarms_the_handshake_retry() {
        let mut client = test_client(test_config());
        client.step(0.016);
        assert_eq!(sent_count(&client, to_server::INIT), 1);

        // A server may accept straight away without a separate hello.
        inject(&mut client, auth_accept_packet());
        client.step(0.016);
        assert_eq!(client.session.state(), SessionState::AuthAccepted);

        for _ in 0..40 {
            client.step(0.1);
        }
        assert_eq!(sent_count(&client, to_server::INIT), 1);
    }

    #[test]
    fn content_completion_enters_ready_exactly_once() {
        let mut client = test_client(test_config());
        connect(&mut client);

        assert_eq!(sent_count(&client, to_server::CLIENT_READY), 1);

        // Nothing re-fires the transition.
        inject(&mut client, definitions_packet(to_client::NODE_DEFINITIONS));
        client.step(0.016);
        assert_eq!(sent_count(&client, to_server::CLIENT_READY), 1);
        assert_eq!(client.session.state(), SessionState::Ready);
    }

    #[test]
    fn block_data_becomes_geometry_and_one_ack() {
        let mut client = test_client(test_config());
        connect(&mut client);

        let pos = ChunkPos::new(1, 2, 3);
        let chunk = ChunkData::new_filled(BlockId(5));
        let mut w = PacketWriter::new(to_client::BLOCK_DATA);
        w.write_v3s16(pos);
        w.write_bytes(&bincode::serialize(&chunk).unwrap());
        inject(&mut client, w.finish());

        let deadline = Instant::now() + Duration::from_secs(5);
        while sent_count(&client, to_server::GOT_BLOCKS) == 0 {
            assert!(Instant::now() < deadline, "no ack within deadline");
            client.step(0.016);
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(sent_count(&client, to_server::GOT_BLOCKS), 1);
        let (_, ack) = client
            .net
            .sent
            .iter()
            .find(|(_, pkt)| pkt.opcode == to_server::GOT_BLOCKS)
            .unwrap();
        let mut r = ack.reader();
        assert_eq!(r.read_u8().unwrap(), 1);
        assert_eq!(r.read_v3s16().unwrap(), pos);

        assert!(client.world.geometry_for(pos).is_some());
    }

    #[test]
    fn eviction_acks_split_into_255_sized_packets() {
        let mut config = test_config();
        config.unload_timeout = 0.0;
        config.chunk_limit = 0;
        let mut client = test_client(config);
        connect(&mut client);

        for i in 0..300 {
            client
                .world
                .set_chunk(ChunkPos::new(i % 20, i / 20, 0), ChunkData::new_empty());
        }

        // One enforcement period; timeout 0 expires everything.
        client.step(5.3);

        let batches: Vec<u8> = client
            .net
            .sent
            .iter()
            .filter(|(_, pkt)| pkt.opcode == to_server::DELETED_BLOCKS)
            .map(|(_, pkt)| pkt.reader().read_u8().unwrap())
            .collect();
        assert_eq!(batches.len(), 2); // ceil(300 / 255)
        assert_eq!(batches[0], 255);
        assert_eq!(batches[1], 45);
        assert_eq!(client.world.chunk_count(), 0);
    }

    #[test]
    fn chat_limit_denies_the_ninth_send_with_a_notice() {
        let mut client = test_client(test_config());
        connect(&mut client);

        // Eight sends spaced just past the 1.25 s floor, all inside the
        // first 10-second epoch.
        for i in 0..8 {
            client.events.send(ClientEvent::SendChatMessage {
                message: format!("msg {i}"),
            });
            client.step(0.016);
            if i < 7 {
                client.step(1.25);
            }
        }
        assert_eq!(sent_count(&client, to_server::CHAT_MESSAGE), 8);

        client.events.send(ClientEvent::SendChatMessage {
            message: "one too many".to_owned(),
        });
        client.step(0.016);
        assert_eq!(sent_count(&client, to_server::CHAT_MESSAGE), 8);

        let notices: Vec<String> = std::iter::from_fn(|| client.pop_chat_line())
            .filter(|line| line.kind == ChatLineKind::System)
            .map(|line| line.text)
            .collect();
        assert!(notices.iter().any(|text| text.contains("Too many messages")));
    }

    #[test]
    fn overlong_chat_is_truncated_with_a_notice() {
        let mut config = test_config();
        config.chat_max_len = 10;
        let mut client = test_client(config);
        connect(&mut client);

        client.step(2.0); // past the spacing floor
        client.events.send(ClientEvent::SendChatMessage {
            message: "a".repeat(50),
        });
        client.step(0.016);

        let (_, pkt) = client
            .net
            .sent
            .iter()
            .find(|(_, pkt)| pkt.opcode == to_server::CHAT_MESSAGE)
            .expect("truncated message still sent");
        assert_eq!(pkt.reader().read_string().unwrap().len(), 10);

        let notices: Vec<String> = std::iter::from_fn(|| client.pop_chat_line())
            .map(|line| line.text)
            .collect();
        assert!(notices.iter().any(|text| text.contains("too long")));
    }

    #[test]
    fn events_drain_in_fifo_order_with_single_consumption() {
        let mut client = test_client(test_config());
        connect(&mut client);

        client.events.send(ClientEvent::PlaySound {
            id: 1,
            name: "drip".to_owned(),
            gain: 1.0,
            loops: false,
        });
        client.events.send(ClientEvent::StopSound { id: 1 });
        client.step(0.016);
        assert!(client.active_sounds.get(&1).is_none(), "stop after play wins");

        client.events.send(ClientEvent::StopSound { id: 2 });
        client.events.send(ClientEvent::PlaySound {
            id: 2,
            name: "wind".to_owned(),
            gain: 0.5,
            loops: true,
        });
        client.step(0.016);
        assert!(client.active_sounds.get(&2).is_some(), "play after stop wins");
    }

    #[test]
    fn unknown_opcode_does_not_abort_the_receive_batch() {
        let mut client = test_client(test_config());
        connect(&mut client);

        inject(&mut client, PacketWriter::new(0x7777).finish());
        let mut w = PacketWriter::new(to_client::CHAT_MESSAGE);
        w.write_u8(1);
        w.write_string("carol");
        w.write_string("hi");
        inject(&mut client, w.finish());

        client.step(0.016);

        let line = client.pop_chat_line().expect("chat handled after unknown opcode");
        assert_eq!(
            line.kind,
            ChatLineKind::Remote {
                sender: "carol".to_owned()
            }
        );
        assert!(!client.is_shutdown());
    }

    #[test]
    fn access_denied_shuts_the_session_down() {
        let mut client = test_client(test_config());
        connect(&mut client);

        let mut w = PacketWriter::new(to_client::ACCESS_DENIED);
        w.write_string("banned");
        inject(&mut client, w.finish());
        client.step(0.016);

        assert!(client.is_shutdown());
        assert!(!client.mesh.is_running());
        assert!(!client.net.connected);
    }

    #[test]
    fn transport_disconnect_is_session_fatal() {
        let mut client = test_client(test_config());
        connect(&mut client);

        client.net.connected = false;
        client.step(0.016);
        assert!(client.is_shutdown());
        assert!(!client.mesh.is_running());
    }

    #[test]
    fn rtt_stays_pinned_to_zero_while_media_downloads() {
        let mut client = test_client(test_config());

        client.step(0.016);
        inject(&mut client, hello_packet());
        client.step(0.016);
        inject(&mut client, auth_accept_packet());
        client.step(0.016);

        // Media never announced: the download phase is still pending and
        // the diagnostic reads zero.
        client.step(1.5);
        assert_eq!(client.avg_rtt, 0.0);

        inject(&mut client, empty_announce_packet());
        inject(&mut client, definitions_packet(to_client::NODE_DEFINITIONS));
        inject(&mut client, definitions_packet(to_client::ITEM_DEFINITIONS));
        client.step(0.016);
        client.step(1.5);
        assert!(client.avg_rtt > 0.0);
    }

    #[test]
    fn position_is_sent_on_the_interval_only_when_changed() {
        let mut client = test_client(test_config());
        connect(&mut client);

        // Spawn position from auth-accept counts as unsent movement.
        client.step(0.3);
        assert_eq!(sent_count(&client, to_server::PLAYER_POSITION), 1);

        // No movement: intervals pass silently.
        for _ in 0..8 {
            client.step(0.3);
        }
        assert_eq!(sent_count(&client, to_server::PLAYER_POSITION), 1);

        client.player.set_position(Vec3::new(5.0, 20.0, 5.0));
        client.step(0.3);
        assert_eq!(sent_count(&client, to_server::PLAYER_POSITION), 2);
    }
}
