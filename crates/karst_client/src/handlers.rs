use glam::IVec3;
use tracing::{debug, info, warn};

use karst_shared::chunk::{BlockId, ChunkData};
use karst_shared::protocol::{to_client, AuthMechanism};
use karst_shared::wire::{PacketReader, WireError};

use crate::client::Client;
use crate::dispatcher::HandlerTable;
use crate::events::{ChatLine, ClientEvent};
use crate::net::Transport;
use crate::session::SessionState;

/// The static opcode → handler table, built once at client construction.
/// Adding an opcode means adding a constant and one entry here.
pub fn handler_table<T: Transport>() -> HandlerTable<T> {
    let mut table: HandlerTable<T> = HandlerTable::default();
    table.insert(to_client::HELLO, handle_hello);
    table.insert(to_client::AUTH_ACCEPT, handle_auth_accept);
    table.insert(to_client::ACCESS_DENIED, handle_access_denied);
    table.insert(to_client::BLOCK_DATA, handle_block_data);
    table.insert(to_client::ADD_NODE, handle_add_node);
    table.insert(to_client::REMOVE_NODE, handle_remove_node);
    table.insert(to_client::TIME_OF_DAY, handle_time_of_day);
    table.insert(to_client::CHAT_MESSAGE, handle_chat_message);
    table.insert(to_client::MOVE_PLAYER, handle_move_player);
    table.insert(to_client::MEDIA, handle_media);
    table.insert(to_client::NODE_DEFINITIONS, handle_node_definitions);
    table.insert(to_client::ANNOUNCE_MEDIA, handle_announce_media);
    table.insert(to_client::ITEM_DEFINITIONS, handle_item_definitions);
    table.insert(to_client::PLAY_SOUND, handle_play_sound);
    table.insert(to_client::STOP_SOUND, handle_stop_sound);
    table.insert(to_client::FADE_SOUND, handle_fade_sound);
    table.insert(to_client::HUD_SET_PARAM, handle_hud_set_param);
    table
}

/// Gameplay packets are only valid once authentication completed; a
/// violation means the session was never initialized correctly, and
/// continuing would corrupt state silently.
fn assert_gameplay_state<T: Transport>(client: &Client<T>, what: &str) {
    assert!(
        client.session.state() >= SessionState::AuthAccepted,
        "{what} packet received before authentication completed"
    );
}

fn handle_hello<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let protocol_version = r.read_u16()?;
    let allowed_mechanisms = r.read_u32()?;

    if client.session.state() >= SessionState::AuthInProgress {
        warn!("duplicate hello, ignoring");
        return Ok(());
    }

    let mechanism = AuthMechanism::choose(allowed_mechanisms, client.has_credentials());
    info!(
        "Server hello: protocol {protocol_version}, auth mechanism {mechanism:?}"
    );
    client.session.record_negotiation(protocol_version, mechanism);
    client.session.advance(SessionState::AuthInProgress);
    client.send_auth_start(mechanism);
    Ok(())
}

fn handle_auth_accept<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let spawn_position = r.read_v3f()?;
    let map_seed = r.read_u64()?;
    let send_interval = r.read_f32()?;

    if client.session.state() >= SessionState::AuthAccepted {
        warn!("duplicate auth accept, ignoring");
        return Ok(());
    }

    client.session.advance(SessionState::AuthAccepted);
    client.player.set_position(spawn_position);
    client.map_seed = map_seed;
    if send_interval > 0.0 {
        client.position_send_interval = send_interval;
    }
    info!("Authentication accepted, spawn at {spawn_position}");
    Ok(())
}

fn handle_access_denied<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let reason = r.read_string()?;
    warn!("Access denied by server: {reason}");
    client
        .chat_lines
        .push_back(ChatLine::system(format!("Access denied: {reason}")));
    client.session.deny_access(reason);
    Ok(())
}

fn handle_block_data<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    assert_gameplay_state(client, "block data");
    let pos = r.read_v3s16()?;
    let blob = r.read_bytes()?;

    let chunk: ChunkData = match bincode::deserialize(&blob) {
        Ok(chunk) => chunk,
        Err(err) => {
            warn!("undecodable chunk payload for {pos}: {err}");
            return Ok(());
        }
    };

    debug!("block data for {pos} ({} bytes)", blob.len());
    client.world.set_chunk(pos, chunk);
    // The acknowledgement rides on the rebuild result so the server only
    // hears about chunks that actually became geometry.
    client.mesh.add_with_neighbors(pos, true, false);
    Ok(())
}

fn handle_add_node<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    assert_gameplay_state(client, "add node");
    let p = r.read_v3s16()?;
    let block = BlockId(r.read_u16()?);

    let world_pos = IVec3::new(p.x, p.y, p.z);
    match client.world.set_block(world_pos, block) {
        Some(chunk_pos) => client.mesh.add_with_neighbors(chunk_pos, false, true),
        None => debug!("add node {world_pos} targets an unloaded chunk"),
    }
    Ok(())
}

fn handle_remove_node<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    assert_gameplay_state(client, "remove node");
    let p = r.read_v3s16()?;

    let world_pos = IVec3::new(p.x, p.y, p.z);
    match client.world.set_block(world_pos, BlockId::AIR) {
        Some(chunk_pos) => client.mesh.add_with_neighbors(chunk_pos, false, true),
        None => debug!("remove node {world_pos} targets an unloaded chunk"),
    }
    Ok(())
}

fn handle_time_of_day<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let time = r.read_u16()?;
    let speed = r.read_f32()?;
    client.time_of_day = f32::from(time % 24_000) / 24_000.0;
    client.time_speed = speed;
    Ok(())
}

fn handle_chat_message<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let kind = r.read_u8()?;
    let sender = r.read_string()?;
    let message = r.read_string()?;

    let line = if kind == 0 || sender.is_empty() {
        ChatLine::system(message)
    } else {
        ChatLine::remote(sender, message)
    };
    client.chat_lines.push_back(line);
    Ok(())
}

fn handle_move_player<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    assert_gameplay_state(client, "move player");
    let position = r.read_v3f()?;
    let pitch = r.read_f32()?;
    let yaw = r.read_f32()?;

    client.player.set_position(position);
    client.player.set_look(pitch, yaw);
    info!("Server moved player to {position}");
    Ok(())
}

fn handle_announce_media<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let count = r.read_u16()?;
    let mut files = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name = r.read_string()?;
        let digest = r.read_string()?;
        files.push((name, digest));
    }
    // Remote media servers are advertised here; this client always pulls
    // over the session connection.
    let _remote_servers = r.read_string()?;

    let wanted = client.media.announce(files);
    if wanted.is_empty() {
        client.maybe_complete_content();
    } else {
        client.send_request_media(&wanted);
    }
    Ok(())
}

fn handle_media<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let file_count = r.read_u32()?;
    for _ in 0..file_count {
        let name = r.read_string()?;
        let data = r.read_bytes()?;
        debug!("media '{name}' received ({} bytes)", data.len());

        let token = client.next_media_token();
        client.media.receive(&name, token);
    }

    let tokens = client.media.take_received_tokens();
    if !tokens.is_empty() {
        client.events.send(ClientEvent::HaveMedia { tokens });
    }
    client.maybe_complete_content();
    Ok(())
}

fn handle_node_definitions<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let blob = r.read_bytes()?;
    debug!("node definitions received ({} bytes)", blob.len());
    client.node_defs_received = true;
    client.maybe_complete_content();
    Ok(())
}

fn handle_item_definitions<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let blob = r.read_bytes()?;
    debug!("item definitions received ({} bytes)", blob.len());
    client.item_defs_received = true;
    client.maybe_complete_content();
    Ok(())
}

fn handle_play_sound<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let id = r.read_s32()?;
    let name = r.read_string()?;
    let gain = r.read_f32()?;
    let loops = r.read_bool()?;
    client.events.send(ClientEvent::PlaySound {
        id,
        name,
        gain,
        loops,
    });
    Ok(())
}

fn handle_stop_sound<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let id = r.read_s32()?;
    client.events.send(ClientEvent::StopSound { id });
    Ok(())
}

fn handle_fade_sound<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let id = r.read_s32()?;
    let step = r.read_f32()?;
    let target_gain = r.read_f32()?;
    client.events.send(ClientEvent::FadeSound {
        id,
        step,
        target_gain,
    });
    Ok(())
}

fn handle_hud_set_param<T: Transport>(
    client: &mut Client<T>,
    r: &mut PacketReader,
) -> Result<(), WireError> {
    let hud_id = r.read_u32()?;
    let name = r.read_string()?;
    let value = r.read_string()?;
    client.events.send(ClientEvent::SetHudParam {
        hud_id,
        name,
        value,
    });
    Ok(())
}
