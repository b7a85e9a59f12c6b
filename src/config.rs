//! Configuration and persisted preferences

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::Error;
use crate::protocol::MediaMode;

/// Endpoint and intent of one session.
///
/// Constructed by the caller and handed to the connection manager; a
/// reconnect reuses the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: MediaMode,
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Use `wss://`
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: MediaMode::Audio,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            secure: false,
        }
    }
}

impl SessionConfig {
    /// WebSocket URL of the remote peer
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}:{}{}", scheme, self.host, self.port, path)
    }
}

/// Connection timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Local capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Chunk cadence in milliseconds
    pub chunk_interval_ms: u64,
    /// Prefix every chunk with the mode byte
    pub prefix_mode_byte: bool,
    /// Requested sample rate; device default when unset
    pub sample_rate: Option<u32>,
    /// Requested channel count; device default when unset
    pub channels: Option<u16>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: CAPTURE_CHUNK_MS,
            prefix_mode_byte: true,
            sample_rate: None,
            channels: None,
        }
    }
}

impl CaptureConfig {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }
}

/// Playback settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Fixed render block for the fallback backend, in frames
    pub fallback_block_frames: u32,
    /// Try the worklet backend first when the host supports it
    pub prefer_worklet: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            fallback_block_frames: NOMINAL_CHUNK_SIZE as u32,
            prefer_worklet: true,
        }
    }
}

impl PlaybackConfig {
    pub fn max_buffer_size(&self) -> usize {
        max_buffer_size(self.channels)
    }

    pub fn buffer_threshold(&self) -> usize {
        buffer_threshold(self.channels)
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub connection: ConnectionConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }
}

/// User preferences persisted between runs: mode, host and port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub mode: MediaMode,
    pub host: String,
    pub port: u16,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            mode: MediaMode::Audio,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Preferences {
    /// Default location of the preferences file
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "duplex-audio-link")
            .map(|dirs| dirs.config_dir().join("preferences.toml"))
    }

    /// Read preferences; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, Error> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Overlay the preferences onto a session config
    pub fn apply_to(&self, session: &mut SessionConfig) {
        session.mode = self.mode;
        session.host = self.host.clone();
        session.port = self.port;
    }

    /// Capture the persisted fields of a session config
    pub fn from_session(session: &SessionConfig) -> Self {
        Self {
            mode: session.mode,
            host: session.host.clone(),
            port: session.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url() {
        let mut session = SessionConfig::default();
        assert_eq!(session.url(), "ws://localhost:8080/websocket");

        session.secure = true;
        session.host = "media.example".into();
        session.port = 443;
        session.path = "audio-stream".into();
        assert_eq!(session.url(), "wss://media.example:443/audio-stream");
    }

    #[test]
    fn test_buffer_limits() {
        let playback = PlaybackConfig::default();
        assert_eq!(playback.max_buffer_size(), 10 * 4096 * 2);
        assert_eq!(playback.buffer_threshold(), 3 * 4096 * 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [session]
            host = "10.0.0.5"

            [capture]
            prefix_mode_byte = false
            "#,
        )
        .unwrap();

        assert_eq!(config.session.host, "10.0.0.5");
        assert_eq!(config.session.port, DEFAULT_PORT);
        assert!(!config.capture.prefix_mode_byte);
        assert_eq!(config.connection.reconnect_delay(), RECONNECT_DELAY);
    }

    #[test]
    fn test_preferences_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("preferences.toml");

        assert_eq!(Preferences::load(&path).unwrap(), Preferences::default());

        let prefs = Preferences {
            mode: MediaMode::Video,
            host: "studio.local".into(),
            port: 9000,
        };
        prefs.save(&path).unwrap();
        assert_eq!(Preferences::load(&path).unwrap(), prefs);

        let mut session = SessionConfig::default();
        prefs.apply_to(&mut session);
        assert_eq!(session.mode, MediaMode::Video);
        assert_eq!(session.port, 9000);
        assert_eq!(Preferences::from_session(&session), prefs);
    }
}
