mod chat;
mod client;
mod config;
mod dispatcher;
mod events;
mod handlers;
mod media;
mod mesh;
mod mesher;
mod net;
mod player;
mod session;
mod store;
mod unload;
mod world;

use std::env;
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::{IVec3, Vec3};
use tracing::{info, warn};

use karst_core::events::EventSender;
use karst_shared::protocol::{ClientDynamicInfo, PointedThing};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::events::{ChatLineKind, ClientEvent, InteractAction};
use crate::net::ClientNet;

const FRAME: Duration = Duration::from_millis(16);
const STATUS_PERIOD: Duration = Duration::from_secs(30);

fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let mut config_path = PathBuf::from("karst.toml");
    let mut server_override: Option<String> = None;
    let mut name_override: Option<String> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(value) = args.next() else {
                    eprintln!("--config expects a path argument");
                    std::process::exit(2);
                };
                config_path = PathBuf::from(value);
            }
            "--server" => {
                let Some(value) = args.next() else {
                    eprintln!("--server expects an address argument");
                    std::process::exit(2);
                };
                server_override = Some(value);
            }
            "--name" => {
                let Some(value) = args.next() else {
                    eprintln!("--name expects a player name argument");
                    std::process::exit(2);
                };
                name_override = Some(value);
            }
            "--help" | "-h" => {
                println!(
                    "Usage: karst_client [--config <path>] [--server <addr:port>] [--name <player>]"
                );
                return;
            }
            other => {
                eprintln!("unknown argument: {other}");
                std::process::exit(2);
            }
        }
    }

    let mut config = config::load_or_create(&config_path);
    if let Some(server) = server_override {
        config.server_addr = server;
    }
    if let Some(name) = name_override {
        config.player_name = name;
    }

    let server_addr: SocketAddr = match config.server_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            eprintln!("invalid server address '{}': {err}", config.server_addr);
            std::process::exit(2);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        eprintln!("\nShutdown signal received, disconnecting...");
        r.store(false, Ordering::SeqCst);
    })
    .expect("failed to set Ctrl+C handler");

    let console_config = config.clone();

    let mut net = ClientNet::new(server_addr);
    net.connect();

    let mut client = match Client::new(config, net) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("failed to start client: {err}");
            std::process::exit(1);
        }
    };

    spawn_console(client.event_sender(), console_config);

    let mut next_status = Instant::now() + STATUS_PERIOD;
    while running.load(Ordering::SeqCst) && !client.is_shutdown() {
        let frame_start = Instant::now();

        client.step(FRAME.as_secs_f32());

        // No UI attached in this binary; chat goes to the log.
        while let Some(line) = client.pop_chat_line() {
            match line.kind {
                ChatLineKind::Remote { sender } => info!("<{sender}> {}", line.text),
                ChatLineKind::System => info!("*** {}", line.text),
            }
        }

        if frame_start >= next_status {
            next_status = frame_start + STATUS_PERIOD;
            info!("{}", client.status_line());
        }

        if let Some(remaining) = FRAME.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    if let Some(reason) = client.access_denied_reason() {
        warn!("Session ended by server: {reason}");
    }
    client.shutdown();
    info!("Client exited");
}

/// Minimal line console so a headless client can still chat and poke at
/// the world. Every line becomes an event for the frame loop; plain text
/// is chat, slash commands map onto the other actions.
fn spawn_console(events: EventSender<ClientEvent>, config: ClientConfig) {
    std::thread::Builder::new()
        .name("console".to_owned())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Some(event) = parse_console_line(trimmed, &config) {
                    events.send(event);
                }
            }
        })
        .expect("failed to spawn console thread");
}

fn parse_console_line(line: &str, config: &ClientConfig) -> Option<ClientEvent> {
    if !line.starts_with('/') {
        return Some(ClientEvent::SendChatMessage {
            message: line.to_owned(),
        });
    }

    let mut parts = line.split_whitespace();
    let command = parts.next()?;
    match command {
        "/quit" => Some(ClientEvent::Disconnect),
        "/screenshot" => Some(ClientEvent::Screenshot),
        "/password" => {
            let old_password = parts.next()?.to_owned();
            let new_password = parts.next()?.to_owned();
            Some(ClientEvent::ChangePassword {
                old_password,
                new_password,
            })
        }
        "/inv" => {
            let rest = line.strip_prefix("/inv")?.trim();
            (!rest.is_empty()).then(|| ClientEvent::InventoryAction {
                serialized: rest.to_owned(),
            })
        }
        "/info" => Some(ClientEvent::UpdateClientInfo {
            info: ClientDynamicInfo {
                client_version: 1,
                node_highlighting_mode: 0,
                min_viewing_range: config.view_range.clamp(0, i32::from(u16::MAX)) as u16,
                fov: config.fov,
                sound_enabled: config.sound_enabled,
                music_enabled: config.music_enabled,
                new_style_water: true,
                new_style_lava: true,
                scaling_factors: [100; 7],
            },
        }),
        "/dig" | "/digdone" | "/stopdig" | "/place" | "/use" => {
            let pos = parse_node_pos(&mut parts)?;
            let action = match command {
                "/dig" => InteractAction::StartDigging,
                "/digdone" => InteractAction::DiggingCompleted,
                "/stopdig" => InteractAction::StopDigging,
                "/place" => InteractAction::Place,
                _ => InteractAction::Use,
            };
            Some(ClientEvent::Interact {
                action,
                pointed: PointedThing::Node {
                    version: 1,
                    pos,
                    face: 1,
                    intersect: Vec3::new(0.5, 1.0, 0.5),
                    controls: false,
                    wield_item: 0,
                },
            })
        }
        "/poke" => {
            let object_id = parts.next()?.parse().ok()?;
            Some(ClientEvent::Interact {
                action: InteractAction::Activate,
                pointed: PointedThing::Object {
                    version: 1,
                    object_id,
                    intersect: Vec3::ZERO,
                    controls: false,
                    wield_item: 0,
                },
            })
        }
        other => {
            warn!("unknown console command: {other}");
            None
        }
    }
}

fn parse_node_pos<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Option<IVec3> {
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    Some(IVec3::new(x, y, z))
}

#[cfg(test)]
mod tests {
    use glam::IVec3;

    use karst_shared::protocol::PointedThing;

    use super::parse_console_line;
    use crate::config::ClientConfig;
    use crate::events::{ClientEvent, InteractAction};

    #[test]
    fn plain_text_becomes_chat() {
        let config = ClientConfig::default();
        assert_eq!(
            parse_console_line("hello there", &config),
            Some(ClientEvent::SendChatMessage {
                message: "hello there".to_owned()
            })
        );
    }

    #[test]
    fn slash_commands_map_to_actions() {
        let config = ClientConfig::default();

        assert_eq!(parse_console_line("/quit", &config), Some(ClientEvent::Disconnect));
        assert_eq!(parse_console_line("/bogus", &config), None);
        assert_eq!(parse_console_line("/dig 1 2", &config), None);

        match parse_console_line("/dig 1 2 3", &config) {
            Some(ClientEvent::Interact {
                action: InteractAction::StartDigging,
                pointed: PointedThing::Node { pos, .. },
            }) => assert_eq!(pos, IVec3::new(1, 2, 3)),
            other => panic!("unexpected parse: {other:?}"),
        }
    }
}
