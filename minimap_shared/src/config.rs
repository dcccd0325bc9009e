//! Configuration system.
//!
//! Loads broadcaster configuration from JSON strings/files. Every field has
//! a default so a config file only needs to name what it changes.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    coords::DEFAULT_HALF_EXTENT,
    error::{MinimapError, MinimapResult},
    style::{StyleOverride, Stylesheet},
};

/// Root broadcaster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Lobby host, e.g. `websocket.matissetec.dev` or `127.0.0.1:9000`.
    pub host: String,
    /// Use `https`/`wss` when true, `http`/`ws` otherwise.
    pub secure: bool,
    /// Channel id, when known up front.
    pub channel_id: Option<u64>,
    /// Simulation tick rate of the demo loop.
    pub tick_hz: u32,
    pub keepalive_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    /// HTTP timeout of the session allocation call.
    pub allocation_timeout_ms: u64,
    /// Bound on the socket open (TCP connect plus websocket upgrade).
    pub connect_timeout_ms: u64,
    pub position_interval_ms: u64,
    pub style_interval_ms: u64,
    /// Scene object whose extent defines the minimap bounds.
    pub reference_plane: String,
    pub plane_half_extent: f32,
    /// Categories picked from when a viewer asks for an unknown one.
    pub fallback_kinds: Vec<String>,
    /// Per-kind style overrides.
    pub styles: BTreeMap<String, StyleOverride>,
    /// Extra global rules (e.g. more `@keyframes`) sent with every stylesheet.
    pub global_css: Stylesheet,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            host: "websocket.matissetec.dev".to_string(),
            secure: true,
            channel_id: None,
            tick_hz: 60,
            keepalive_interval_ms: 30_000,
            reconnect_delay_ms: 2_000,
            max_reconnect_attempts: 5,
            allocation_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            position_interval_ms: 100,
            style_interval_ms: 1_000,
            reference_plane: "Ground".to_string(),
            plane_half_extent: DEFAULT_HALF_EXTENT,
            fallback_kinds: vec!["Cube".to_string(), "Sphere".to_string()],
            styles: BTreeMap::new(),
            global_css: Stylesheet::new(),
        }
    }
}

impl BroadcastConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> MinimapResult<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> MinimapResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let cfg = Self::from_json_str(&text)?;
        debug!(path = %path.display(), host = %cfg.host, "Loaded broadcast config");
        Ok(cfg)
    }

    pub fn validate(&self) -> MinimapResult<()> {
        let zero_interval = [
            ("keepalive_interval_ms", self.keepalive_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("position_interval_ms", self.position_interval_ms),
            ("style_interval_ms", self.style_interval_ms),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);
        if let Some((name, _)) = zero_interval {
            return Err(MinimapError::Config(format!("{name} must be non-zero")));
        }
        if self.tick_hz == 0 {
            return Err(MinimapError::Config("tick_hz must be non-zero".into()));
        }
        if self.fallback_kinds.is_empty() {
            return Err(MinimapError::Config("fallback_kinds must not be empty".into()));
        }
        if !(self.plane_half_extent > 0.0) {
            return Err(MinimapError::Config("plane_half_extent must be positive".into()));
        }
        if self.host.trim().is_empty() {
            return Err(MinimapError::Config("host must not be empty".into()));
        }
        Ok(())
    }

    /// `POST` target that issues a session key.
    pub fn allocation_url(&self, channel: u64) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}/lobby/new?user={channel}", self.host)
    }

    /// Socket URI for a freshly issued key. The key is opaque, so it is
    /// percent-encoded into the query.
    pub fn socket_url(&self, channel: u64, key: &str) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{scheme}://{}/lobby/connect/streamer?user={channel}&key={}",
            self.host,
            urlencoding::encode(key.trim())
        )
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn allocation_timeout(&self) -> Duration {
        Duration::from_millis(self.allocation_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms)
    }

    pub fn style_interval(&self) -> Duration {
        Duration::from_millis(self.style_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = BroadcastConfig::from_json_str(r#"{"host":"127.0.0.1:9000","secure":false}"#).unwrap();
        assert_eq!(cfg.host, "127.0.0.1:9000");
        assert_eq!(cfg.max_reconnect_attempts, 5);
        assert_eq!(cfg.keepalive_interval(), Duration::from_secs(30));
        assert_eq!(cfg.position_interval(), Duration::from_millis(100));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
        assert!(cfg.global_css.is_empty());
    }

    #[test]
    fn urls_follow_lobby_layout() {
        let cfg = BroadcastConfig::default();
        assert_eq!(
            cfg.allocation_url(1234),
            "https://websocket.matissetec.dev/lobby/new?user=1234"
        );
        assert_eq!(
            cfg.socket_url(1234, "abc\n"),
            "wss://websocket.matissetec.dev/lobby/connect/streamer?user=1234&key=abc"
        );

        let local = BroadcastConfig {
            host: "127.0.0.1:9000".into(),
            secure: false,
            ..Default::default()
        };
        assert!(local.socket_url(1, "k").starts_with("ws://127.0.0.1:9000/"));
    }

    #[test]
    fn session_key_is_percent_encoded() {
        let cfg = BroadcastConfig::default();
        assert_eq!(
            cfg.socket_url(7, " a&b #c=d "),
            "wss://websocket.matissetec.dev/lobby/connect/streamer?user=7&key=a%26b%20%23c%3Dd"
        );
    }

    #[test]
    fn validation_rejects_nonsense() {
        assert!(BroadcastConfig::from_json_str(r#"{"position_interval_ms":0}"#).is_err());
        assert!(BroadcastConfig::from_json_str(r#"{"fallback_kinds":[]}"#).is_err());
        assert!(BroadcastConfig::from_json_str(r#"{"plane_half_extent":-1.0}"#).is_err());
        assert!(BroadcastConfig::from_json_str(r#"{"tick_hz":0}"#).is_err());
        assert!(BroadcastConfig::from_json_str(r#"{"connect_timeout_ms":0}"#).is_err());
        assert!(BroadcastConfig::from_json_str("{").is_err());
    }

    #[test]
    fn style_overrides_load_from_json() {
        let cfg = BroadcastConfig::from_json_str(
            r##"{"styles":{"Boss":{"color":"#FF0000","css":"animation: shimmer 2s infinite"}}}"##,
        )
        .unwrap();
        let boss = &cfg.styles["Boss"];
        assert_eq!(boss.color.unwrap().to_u8(), [255, 0, 0]);
    }
}
