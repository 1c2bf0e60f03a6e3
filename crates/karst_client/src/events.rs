use karst_shared::protocol::{ClientDynamicInfo, PointedThing};

/// Everything the frame loop may be asked to do on behalf of input
/// handling, packet handlers, or script shims. One closed set, one owned
/// payload per variant, one consumer: the per-frame drain matches
/// exhaustively and each event is handled exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    SendChatMessage {
        message: String,
    },
    ChangePassword {
        old_password: String,
        new_password: String,
    },
    Interact {
        action: InteractAction,
        pointed: PointedThing,
    },
    InventoryAction {
        serialized: String,
    },
    SetHudParam {
        hud_id: u32,
        name: String,
        value: String,
    },
    PlaySound {
        id: i32,
        name: String,
        gain: f32,
        loops: bool,
    },
    StopSound {
        id: i32,
    },
    FadeSound {
        id: i32,
        step: f32,
        target_gain: f32,
    },
    HaveMedia {
        tokens: Vec<u32>,
    },
    UpdateClientInfo {
        info: ClientDynamicInfo,
    },
    Screenshot,
    Disconnect,
}

/// Interaction verbs carried by the Interact packet's action byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InteractAction {
    StartDigging = 0,
    StopDigging = 1,
    DiggingCompleted = 2,
    Place = 3,
    Use = 4,
    Activate = 5,
}

impl InteractAction {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One line for the chat display. Produced by packet handlers and by
/// local notices (rate-limit denials, truncation warnings); consumed by
/// UI code through `Client::pop_chat_line`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub kind: ChatLineKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLineKind {
    /// Locally generated notice, never sent anywhere.
    System,
    /// Relayed from another player or the server.
    Remote { sender: String },
}

impl ChatLine {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            kind: ChatLineKind::System,
            text: text.into(),
        }
    }

    pub fn remote(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: ChatLineKind::Remote {
                sender: sender.into(),
            },
            text: text.into(),
        }
    }
}
