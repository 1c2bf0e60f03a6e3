use karst_shared::protocol::AuthMechanism;
use tracing::info;

/// Connection lifecycle. Ordering matters: transitions only move forward.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Constructed, nothing sent yet.
    Created,
    /// Initial handshake packet sent at least once, no server reply seen.
    Init,
    /// Server hello received, authentication underway.
    AuthInProgress,
    /// Authentication confirmed; content (media, definitions) incoming.
    AuthAccepted,
    /// Content complete; gameplay traffic flows.
    Ready,
}

pub struct Session {
    state: SessionState,
    protocol_version: u16,
    auth_mechanism: AuthMechanism,
    shutdown: bool,
    access_denied_reason: Option<String>,
    retry_interval: f32,
    retry_timer: f32,
}

impl Session {
    pub fn new(retry_interval: f32) -> Self {
        Self {
            state: SessionState::Created,
            protocol_version: 0,
            auth_mechanism: AuthMechanism::None,
            shutdown: false,
            access_denied_reason: None,
            retry_interval,
            // Zero so the very first frame sends the handshake.
            retry_timer: 0.0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    pub fn auth_mechanism(&self) -> AuthMechanism {
        self.auth_mechanism
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn access_denied_reason(&self) -> Option<&str> {
        self.access_denied_reason.as_deref()
    }

    /// Moves the session forward. Moving backwards is a protocol-handling
    /// bug, not a server input error, and aborts.
    pub fn advance(&mut self, to: SessionState) {
        assert!(
            to >= self.state,
            "session state went backwards: {:?} -> {to:?}",
            self.state
        );
        if to != self.state {
            info!("Session state {:?} -> {to:?}", self.state);
            self.state = to;
        }
    }

    pub fn record_negotiation(&mut self, protocol_version: u16, mechanism: AuthMechanism) {
        self.protocol_version = protocol_version;
        self.auth_mechanism = mechanism;
    }

    /// Irreversible. Transport disconnect, access denial, and explicit stop
    /// all end here.
    pub fn shutdown(&mut self) {
        self.shutdown = true;
    }

    pub fn deny_access(&mut self, reason: String) {
        self.access_denied_reason = Some(reason);
        self.shutdown = true;
    }

    /// Clears negotiated fields for a reconnect. Only legal before the
    /// handshake has made any progress.
    pub fn reset_for_reconnect(&mut self) {
        assert_eq!(
            self.state,
            SessionState::Created,
            "reconnect is only legal before the handshake begins"
        );
        self.protocol_version = 0;
        self.auth_mechanism = AuthMechanism::None;
        self.shutdown = false;
        self.access_denied_reason = None;
        self.retry_timer = 0.0;
    }

    /// Whether the handshake packet still needs periodic retransmission:
    /// the first packet can be lost before any acknowledgement exists, and
    /// no other signal would ever tell us.
    pub fn awaiting_handshake_reply(&self) -> bool {
        self.state <= SessionState::Init && !self.shutdown
    }

    /// Counts the retransmit timer down. Returns true when the handshake
    /// packet should be (re)sent this frame. Call only while
    /// `awaiting_handshake_reply()`; any server packet that advances the
    /// state stops the caller from ticking, which disarms the timer.
    pub fn tick_handshake_retry(&mut self, dt: f32) -> bool {
        self.retry_timer -= dt;
        if self.retry_timer <= 0.0 {
            self.retry_timer = self.retry_interval;
            true
        } else {
            false
        }
    }
}
