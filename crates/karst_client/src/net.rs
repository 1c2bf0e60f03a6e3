use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use renet::{ChannelConfig, ConnectionConfig, RenetClient, SendType};
use tracing::warn;

use karst_shared::wire::Packet;

pub const RELIABLE_ORDERED_CHANNEL: u8 = 0;
pub const UNRELIABLE_CHANNEL: u8 = 1;

/// Which delivery guarantee an outbound packet rides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Reliable,
    Unreliable,
}

impl Channel {
    fn id(self) -> u8 {
        match self {
            Channel::Reliable => RELIABLE_ORDERED_CHANNEL,
            Channel::Unreliable => UNRELIABLE_CHANNEL,
        }
    }
}

/// The transport seam. The session core never blocks on it: `update`
/// pumps I/O once per frame, `send` only enqueues, `receive` hands back
/// whatever has arrived.
pub trait Transport {
    fn update(&mut self, dt: Duration);
    fn send(&mut self, channel: Channel, packet: &Packet);
    /// Drains every decoded inbound packet across all channels, in
    /// per-channel arrival order. Undecodable frames are dropped with a
    /// warning inside the implementation.
    fn receive(&mut self) -> Vec<Packet>;
    fn is_connected(&self) -> bool;
    fn disconnect(&mut self);
    /// Smoothed round-trip estimate in seconds, zero when unknown.
    fn rtt(&self) -> f32;
}

/// Production transport: renet reliability over a nonblocking UDP socket.
pub struct ClientNet {
    client: RenetClient,
    socket: UdpSocket,
    server_addr: SocketAddr,
    connected: bool,
}

impl ClientNet {
    pub fn new(server_addr: SocketAddr) -> Self {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .unwrap_or_else(|err| panic!("failed to bind UDP client socket on 0.0.0.0:0: {err}"));
        socket
            .set_nonblocking(true)
            .unwrap_or_else(|err| panic!("failed to enable nonblocking UDP client socket: {err}"));

        Self {
            client: RenetClient::new(Self::connection_config()),
            socket,
            server_addr,
            connected: false,
        }
    }

    pub fn connect(&mut self) {
        self.client.set_connected();
        self.connected = true;
        tracing::info!("Connecting to server at {}", self.server_addr);
    }

    fn connection_config() -> ConnectionConfig {
        const CHANNEL_MEMORY_BYTES: usize = 32 * 1024 * 1024;
        let channels = vec![
            ChannelConfig {
                channel_id: RELIABLE_ORDERED_CHANNEL,
                max_memory_usage_bytes: CHANNEL_MEMORY_BYTES,
                send_type: SendType::ReliableOrdered {
                    resend_time: Duration::from_millis(250),
                },
            },
            ChannelConfig {
                channel_id: UNRELIABLE_CHANNEL,
                max_memory_usage_bytes: CHANNEL_MEMORY_BYTES,
                send_type: SendType::Unreliable,
            },
        ];

        ConnectionConfig {
            available_bytes_per_tick: 200_000,
            server_channels_config: channels.clone(),
            client_channels_config: channels,
        }
    }

    fn receive_channel(&mut self, channel: u8, out: &mut Vec<Packet>) {
        while let Some(data) = self.client.receive_message(channel) {
            match Packet::from_bytes(data) {
                Ok(packet) => out.push(packet),
                Err(err) => warn!("undecodable frame on channel {channel}: {err}"),
            }
        }
    }
}

impl Transport for ClientNet {
    fn update(&mut self, dt: Duration) {
        self.client.update(dt);

        let mut packet_buffer = [0u8; 65_535];
        loop {
            match self.socket.recv_from(&mut packet_buffer) {
                Ok((bytes_received, from_addr)) => {
                    if from_addr == self.server_addr {
                        self.client.process_packet(&packet_buffer[..bytes_received]);
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("UDP receive error from server {}: {err}", self.server_addr);
                    break;
                }
            }
        }

        for frame in self.client.get_packets_to_send() {
            if let Err(err) = self.socket.send_to(&frame, self.server_addr) {
                if err.kind() != ErrorKind::WouldBlock && err.kind() != ErrorKind::Interrupted {
                    warn!("failed sending frame to server {}: {err}", self.server_addr);
                }
            }
        }

        if self.connected && self.client.is_disconnected() {
            warn!(
                "Disconnected from server: {:?}",
                self.client.disconnect_reason()
            );
            self.connected = false;
        }
    }

    fn send(&mut self, channel: Channel, packet: &Packet) {
        self.client.send_message(channel.id(), packet.to_bytes());
    }

    fn receive(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        self.receive_channel(RELIABLE_ORDERED_CHANNEL, &mut packets);
        self.receive_channel(UNRELIABLE_CHANNEL, &mut packets);
        packets
    }

    fn is_connected(&self) -> bool {
        self.connected && self.client.is_connected()
    }

    fn disconnect(&mut self) {
        if self.connected {
            for frame in self.client.get_packets_to_send() {
                if let Err(err) = self.socket.send_to(&frame, self.server_addr) {
                    if err.kind() != ErrorKind::WouldBlock && err.kind() != ErrorKind::Interrupted {
                        warn!(
                            "failed sending disconnect frame to {}: {err}",
                            self.server_addr
                        );
                    }
                }
            }
        }

        self.client.disconnect();
        self.connected = false;
    }

    fn rtt(&self) -> f32 {
        self.client.rtt() as f32
    }
}
