use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Resolved configuration snapshot. Built once at startup and handed to
/// components by value; nothing reads settings after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Empty means no stored credentials; the handshake then registers.
    #[serde(default)]
    pub password: String,
    /// Viewing range in world units; feeds the unload cap estimate.
    #[serde(default = "default_view_range")]
    pub view_range: i32,
    /// Soft cap on cached chunks. Negative disables the cap entirely.
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: i32,
    /// Seconds a chunk may go untouched before the enforcer may evict it.
    #[serde(default = "default_unload_timeout")]
    pub unload_timeout: f32,
    /// Chat messages admitted per 10-second window. 0 disables the limiter.
    #[serde(default = "default_chat_limit_per_10s")]
    pub chat_limit_per_10s: f32,
    /// Maximum chat message length in characters before truncation.
    #[serde(default = "default_chat_max_len")]
    pub chat_max_len: u16,
    /// Seconds between handshake retransmissions while unacknowledged.
    #[serde(default = "default_handshake_retry_interval")]
    pub handshake_retry_interval: f32,
    /// Geometry worker thread count. 0 picks one from available cores.
    #[serde(default)]
    pub mesh_workers: usize,
    #[serde(default = "default_position_send_interval")]
    pub position_send_interval: f32,
    /// Directory for the on-disk chunk cache; absent disables caching.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_cache_save_interval")]
    pub cache_save_interval: f32,
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default = "default_true")]
    pub sound_enabled: bool,
    #[serde(default = "default_true")]
    pub music_enabled: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            player_name: default_player_name(),
            password: String::new(),
            view_range: default_view_range(),
            chunk_limit: default_chunk_limit(),
            unload_timeout: default_unload_timeout(),
            chat_limit_per_10s: default_chat_limit_per_10s(),
            chat_max_len: default_chat_max_len(),
            handshake_retry_interval: default_handshake_retry_interval(),
            mesh_workers: 0,
            position_send_interval: default_position_send_interval(),
            cache_dir: None,
            cache_save_interval: default_cache_save_interval(),
            fov: default_fov(),
            sound_enabled: true,
            music_enabled: true,
        }
    }
}

impl ClientConfig {
    fn sanitize(mut self) -> Self {
        self.view_range = self.view_range.clamp(20, 4000);
        self.unload_timeout = self.unload_timeout.max(0.0);
        self.chat_limit_per_10s = self.chat_limit_per_10s.max(0.0);
        self.chat_max_len = self.chat_max_len.max(10);
        self.handshake_retry_interval = self.handshake_retry_interval.clamp(0.1, 10.0);
        self.mesh_workers = self.mesh_workers.min(32);
        self.position_send_interval = self.position_send_interval.clamp(0.05, 5.0);
        self.cache_save_interval = self.cache_save_interval.clamp(1.0, 600.0);
        self.fov = self.fov.clamp(45.0, 160.0);
        self
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let parsed = toml::from_str::<Self>(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to deserialize config: {e}"),
            )
        })?;
        Ok(parsed.sanitize())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let config = self.clone().sanitize();
        let serialized = toml::to_string_pretty(&config).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize config: {e}"),
            )
        })?;
        fs::write(path, serialized)
    }
}

fn default_server_addr() -> String {
    "127.0.0.1:30565".to_owned()
}

fn default_player_name() -> String {
    "Player".to_owned()
}

fn default_view_range() -> i32 {
    160
}

fn default_chunk_limit() -> i32 {
    7500
}

fn default_unload_timeout() -> f32 {
    600.0
}

fn default_chat_limit_per_10s() -> f32 {
    8.0
}

fn default_chat_max_len() -> u16 {
    500
}

fn default_handshake_retry_interval() -> f32 {
    1.5
}

fn default_position_send_interval() -> f32 {
    0.25
}

fn default_cache_save_interval() -> f32 {
    30.0
}

fn default_fov() -> f32 {
    72.0
}

fn default_true() -> bool {
    true
}

pub fn load_or_create(path: &Path) -> ClientConfig {
    match ClientConfig::load(path) {
        Ok(config) => config,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let config = ClientConfig::default();
            if let Err(save_err) = config.save(path) {
                warn!(
                    "Failed to create default config at {}: {save_err}",
                    path.display()
                );
            }
            config
        }
        Err(err) => {
            warn!("Failed to load config from {}: {err}", path.display());
            ClientConfig::default()
        }
    }
}
