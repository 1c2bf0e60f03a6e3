use bitflags::bitflags;
use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::wire::{PacketReader, PacketWriter, WireError};

pub const PROTOCOL_VERSION: u16 = 4;
pub const APP_NAME: &str = "karst";
pub const CLIENT_VERSION_STRING: &str = concat!("karst-", env!("CARGO_PKG_VERSION"));

/// Server → client opcodes.
pub mod to_client {
    pub const HELLO: u16 = 0x02;
    pub const AUTH_ACCEPT: u16 = 0x03;
    pub const ACCESS_DENIED: u16 = 0x0A;
    pub const BLOCK_DATA: u16 = 0x20;
    pub const ADD_NODE: u16 = 0x21;
    pub const REMOVE_NODE: u16 = 0x22;
    pub const TIME_OF_DAY: u16 = 0x29;
    pub const CHAT_MESSAGE: u16 = 0x2F;
    pub const MOVE_PLAYER: u16 = 0x34;
    pub const MEDIA: u16 = 0x38;
    pub const NODE_DEFINITIONS: u16 = 0x3A;
    pub const ANNOUNCE_MEDIA: u16 = 0x3C;
    pub const ITEM_DEFINITIONS: u16 = 0x3D;
    pub const PLAY_SOUND: u16 = 0x3F;
    pub const STOP_SOUND: u16 = 0x40;
    pub const FADE_SOUND: u16 = 0x41;
    pub const HUD_SET_PARAM: u16 = 0x4B;

    pub fn name(opcode: u16) -> Option<&'static str> {
        Some(match opcode {
            HELLO => "Hello",
            AUTH_ACCEPT => "AuthAccept",
            ACCESS_DENIED => "AccessDenied",
            BLOCK_DATA => "BlockData",
            ADD_NODE => "AddNode",
            REMOVE_NODE => "RemoveNode",
            TIME_OF_DAY => "TimeOfDay",
            CHAT_MESSAGE => "ChatMessage",
            MOVE_PLAYER => "MovePlayer",
            MEDIA => "Media",
            NODE_DEFINITIONS => "NodeDefinitions",
            ANNOUNCE_MEDIA => "AnnounceMedia",
            ITEM_DEFINITIONS => "ItemDefinitions",
            PLAY_SOUND => "PlaySound",
            STOP_SOUND => "StopSound",
            FADE_SOUND => "FadeSound",
            HUD_SET_PARAM => "HudSetParam",
            _ => return None,
        })
    }
}

/// Client → server opcodes.
pub mod to_server {
    pub const INIT: u16 = 0x02;
    pub const AUTH_START: u16 = 0x10;
    pub const REQUEST_MEDIA: u16 = 0x14;
    pub const CLIENT_READY: u16 = 0x15;
    pub const PLAYER_POSITION: u16 = 0x23;
    pub const GOT_BLOCKS: u16 = 0x24;
    pub const DELETED_BLOCKS: u16 = 0x25;
    pub const INVENTORY_ACTION: u16 = 0x31;
    pub const CHAT_MESSAGE: u16 = 0x32;
    pub const CHANGE_PASSWORD: u16 = 0x36;
    pub const INTERACT: u16 = 0x39;
    pub const HAVE_MEDIA: u16 = 0x42;
    pub const CLIENT_INFO: u16 = 0x44;
}

/// Authentication mechanisms, in the u8 encoding AuthStart carries.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AuthMechanism {
    #[default]
    None = 0,
    LegacyPassword = 1,
    Srp = 2,
    FirstSrp = 3,
}

impl AuthMechanism {
    const BIT_LEGACY: u32 = 1 << 0;
    const BIT_SRP: u32 = 1 << 1;
    const BIT_FIRST_SRP: u32 = 1 << 2;

    /// Picks the strongest mechanism out of the server's advertised set.
    /// A client without stored credentials registers via FirstSrp when the
    /// server permits it.
    pub fn choose(allowed: u32, has_credentials: bool) -> AuthMechanism {
        if !has_credentials && allowed & Self::BIT_FIRST_SRP != 0 {
            AuthMechanism::FirstSrp
        } else if allowed & Self::BIT_SRP != 0 {
            AuthMechanism::Srp
        } else if allowed & Self::BIT_LEGACY != 0 {
            AuthMechanism::LegacyPassword
        } else {
            AuthMechanism::None
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

bitflags! {
    /// Pressed-control bitset carried by PlayerPosition packets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ControlFlags: u32 {
        const FORWARD  = 1 << 0;
        const BACKWARD = 1 << 1;
        const LEFT     = 1 << 2;
        const RIGHT    = 1 << 3;
        const JUMP     = 1 << 4;
        const AUX1     = 1 << 5;
        const SNEAK    = 1 << 6;
        const DIG      = 1 << 7;
        const PLACE    = 1 << 8;
        const ZOOM     = 1 << 9;
    }
}

/// What an interaction ray hit. Wire layout per the Interact message.
#[derive(Debug, Clone, PartialEq)]
pub enum PointedThing {
    Nothing,
    Node {
        version: u32,
        pos: IVec3,
        face: u8,
        intersect: Vec3,
        controls: bool,
        wield_item: i16,
    },
    Object {
        version: u32,
        object_id: u16,
        intersect: Vec3,
        controls: bool,
        wield_item: i16,
    },
}

impl PointedThing {
    pub fn write(&self, w: &mut PacketWriter) {
        match self {
            PointedThing::Nothing => w.write_u8(0),
            PointedThing::Node {
                version,
                pos,
                face,
                intersect,
                controls,
                wield_item,
            } => {
                w.write_u8(1);
                w.write_u32(*version);
                w.write_s16(pos.x as i16);
                w.write_s16(pos.y as i16);
                w.write_s16(pos.z as i16);
                w.write_u8(*face);
                w.write_v3f(*intersect);
                w.write_bool(*controls);
                w.write_s16(*wield_item);
            }
            PointedThing::Object {
                version,
                object_id,
                intersect,
                controls,
                wield_item,
            } => {
                w.write_u8(2);
                w.write_u32(*version);
                w.write_u16(*object_id);
                w.write_v3f(*intersect);
                w.write_bool(*controls);
                w.write_s16(*wield_item);
            }
        }
    }

    pub fn read(r: &mut PacketReader) -> Result<Self, WireError> {
        Ok(match r.read_u8()? {
            1 => PointedThing::Node {
                version: r.read_u32()?,
                pos: IVec3::new(
                    i32::from(r.read_s16()?),
                    i32::from(r.read_s16()?),
                    i32::from(r.read_s16()?),
                ),
                face: r.read_u8()?,
                intersect: r.read_v3f()?,
                controls: r.read_bool()?,
                wield_item: r.read_s16()?,
            },
            2 => PointedThing::Object {
                version: r.read_u32()?,
                object_id: r.read_u16()?,
                intersect: r.read_v3f()?,
                controls: r.read_bool()?,
                wield_item: r.read_s16()?,
            },
            _ => PointedThing::Nothing,
        })
    }
}

/// Static client capabilities and preferences reported via ClientInfo.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientDynamicInfo {
    pub client_version: u8,
    pub node_highlighting_mode: u16,
    pub min_viewing_range: u16,
    pub fov: f32,
    pub sound_enabled: bool,
    pub music_enabled: bool,
    pub new_style_water: bool,
    pub new_style_lava: bool,
    pub scaling_factors: [u16; 7],
}

impl ClientDynamicInfo {
    pub fn write(&self, w: &mut PacketWriter) {
        w.write_u8(self.client_version);
        w.write_u16(self.node_highlighting_mode);
        w.write_u16(self.min_viewing_range);
        w.write_f32(self.fov);
        w.write_bool(self.sound_enabled);
        w.write_bool(self.music_enabled);
        w.write_bool(self.new_style_water);
        w.write_bool(self.new_style_lava);
        for factor in self.scaling_factors {
            w.write_u16(factor);
        }
    }
}
