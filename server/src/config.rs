//! Configuration for the voicelink server.
//!
//! Defaults live in module constants; [`Settings`] is read from a TOML file and
//! then patched from the environment.

use std::env;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Default port the proxy listens on for node links.
pub const DEFAULT_PROXY_PORT: u16 = 9101;

/// Buffer size for reading frames off a socket.
pub const PACKET_BUFFER_SIZE: usize = 4096;

/// Upper bound for unparsed bytes buffered per link.
pub const MAX_FRAME_BUFFER: usize = 65536;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Grace period before a freshly provisioned account is initialized.
pub const DEFAULT_FRESH_ACCOUNT_DELAY: Duration = Duration::from_secs(3);

pub const DEFAULT_HANDSHAKE_RETRY_DELAY: Duration = Duration::from_secs(20);

/// Applied to the handshake retry delay after the voice link went down.
pub const RESTART_BACKOFF_MULTIPLIER: u32 = 20;

/// `-1` lets the client pick its own falloff.
pub const DEFAULT_BLOCK_RADIUS: i32 = -1;

pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// How often voice ranges are re-read from the host.
pub const DEFAULT_PROXIMITY_INTERVAL: Duration = Duration::from_secs(1);

/// How often the account snapshot is re-fetched after initialization.
pub const DEFAULT_ACCOUNT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

pub const DEFAULT_API_BASE_URL: &str = "https://api.voicelink.example.net/v1";

/// Which part of a deployment this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns its clients and talks to the authorities itself.
    #[default]
    Standalone,
    /// Front process: owns the client sockets and relays for nodes.
    Proxy,
    /// Backend process behind a proxy.
    Node,
}

impl Role {
    fn parse(value: &str) -> Result<Self, ServerError> {
        match value.to_ascii_lowercase().as_str() {
            "standalone" => Ok(Self::Standalone),
            "proxy" => Ok(Self::Proxy),
            "node" => Ok(Self::Node),
            other => Err(ServerError::Config(format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    pub api_base_url: String,
    pub key: String,
    pub is_new_account: bool,
    pub sync_interval_secs: u64,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            key: String::new(),
            is_new_account: false,
            sync_interval_secs: DEFAULT_ACCOUNT_SYNC_INTERVAL.as_secs(),
        }
    }
}

impl AccountSettings {
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

/// Voice timings, all in seconds on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub heartbeat_interval_secs: u64,
    pub fresh_account_delay_secs: u64,
    pub handshake_retry_delay_secs: u64,
    pub restart_backoff_multiplier: u32,
    pub login_timeout_secs: u64,
    pub block_radius: i32,
    pub proximity_interval_secs: u64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
            fresh_account_delay_secs: DEFAULT_FRESH_ACCOUNT_DELAY.as_secs(),
            handshake_retry_delay_secs: DEFAULT_HANDSHAKE_RETRY_DELAY.as_secs(),
            restart_backoff_multiplier: RESTART_BACKOFF_MULTIPLIER,
            login_timeout_secs: DEFAULT_LOGIN_TIMEOUT.as_secs(),
            block_radius: DEFAULT_BLOCK_RADIUS,
            proximity_interval_secs: DEFAULT_PROXIMITY_INTERVAL.as_secs(),
        }
    }
}

impl VoiceSettings {
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    #[must_use]
    pub fn fresh_account_delay(&self) -> Duration {
        Duration::from_secs(self.fresh_account_delay_secs)
    }

    #[must_use]
    pub fn handshake_retry_delay(&self) -> Duration {
        Duration::from_secs(self.handshake_retry_delay_secs)
    }

    /// Delay before a new handshake after the voice session died underneath us.
    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        self.handshake_retry_delay() * self.restart_backoff_multiplier
    }

    #[must_use]
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    #[must_use]
    pub fn proximity_interval(&self) -> Duration {
        Duration::from_secs(self.proximity_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub role: Role,
    /// Name this process announces to the proxy when running as a node.
    pub node_id: String,
    pub proxy_port: u16,
    /// Where nodes dial the proxy.
    pub proxy_address: String,
    pub account: AccountSettings,
    pub voice: VoiceSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            role: Role::default(),
            node_id: "node-1".to_string(),
            proxy_port: DEFAULT_PROXY_PORT,
            proxy_address: format!("127.0.0.1:{}", DEFAULT_PROXY_PORT),
            account: AccountSettings::default(),
            voice: VoiceSettings::default(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults when the file is missing,
    /// then applies `VOICELINK_*` environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed, or an
    /// override holds an invalid value.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let mut settings = match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => Self::from_toml(&contents)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        settings.apply_overrides(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects periods that would never tick.
    ///
    /// # Errors
    /// Returns [`ServerError::Config`] naming the first zero interval.
    pub fn validate(&self) -> Result<(), ServerError> {
        let periods = [
            ("voice.heartbeat_interval_secs", self.voice.heartbeat_interval_secs),
            ("voice.handshake_retry_delay_secs", self.voice.handshake_retry_delay_secs),
            ("voice.restart_backoff_multiplier", u64::from(self.voice.restart_backoff_multiplier)),
            ("voice.login_timeout_secs", self.voice.login_timeout_secs),
            ("voice.proximity_interval_secs", self.voice.proximity_interval_secs),
            ("account.sync_interval_secs", self.account.sync_interval_secs),
        ];
        match periods.iter().find(|(_, value)| *value == 0) {
            Some((key, _)) => Err(ServerError::Config(format!("{} must be greater than zero", key))),
            None => Ok(()),
        }
    }

    /// # Errors
    /// Returns [`ServerError::Toml`] for malformed documents.
    pub fn from_toml(contents: &str) -> Result<Self, ServerError> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies overrides looked up through `lookup`.
    ///
    /// # Errors
    /// Returns [`ServerError::Config`] for unparsable values.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(role) = lookup("VOICELINK_ROLE") {
            self.role = Role::parse(&role)?;
        }
        if let Some(port) = lookup("VOICELINK_PROXY_PORT") {
            self.proxy_port = port
                .parse()
                .map_err(|_| ServerError::Config(format!("invalid proxy port '{}'", port)))?;
        }
        if let Some(address) = lookup("VOICELINK_PROXY_ADDRESS") {
            self.proxy_address = address;
        }
        if let Some(node_id) = lookup("VOICELINK_NODE_ID") {
            self.node_id = node_id;
        }
        Ok(())
    }
}
