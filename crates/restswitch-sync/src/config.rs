//! # Agent Configuration
//!
//! Configuration management for the shadow agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Command line flags (highest priority, applied by the agent binary) │
//! │     --url, --thing-name                                                │
//! │                                                                         │
//! │  2. Environment Variables                                              │
//! │     RESTSWITCH_SHADOW_URL=wss://...                                    │
//! │     RESTSWITCH_THING_NAME=ak1w3b7g4                                    │
//! │                                                                         │
//! │  3. TOML Config File                                                   │
//! │     ~/.config/restswitch/agent.toml (Linux)                            │
//! │                                                                         │
//! │  4. Default Values (lowest priority)                                   │
//! │     Thing name read from the factory partition                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! thing_name_file = "/dev/mtd2"
//! thing_name_offset = 1024
//! thing_name_len = 9
//!
//! [shadow]
//! url = "wss://gateway.example.com/shadow"
//! topic_prefix = "a140808/"
//! poll_timeout_ms = 200
//!
//! [engine]
//! echo_capacity = 512
//!
//! [hardware]
//! output_register = 1
//! pulse_duration_ms = 250
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use restswitch_core::{DeltaDecoder, PulseDecoder, RegisterId};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Identity of this gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Shadow thing name. When unset it is read from `thing_name_file`.
    #[serde(default)]
    pub thing_name: Option<String>,

    /// Factory partition holding the thing name.
    #[serde(default = "default_thing_name_file")]
    pub thing_name_file: PathBuf,

    /// Byte offset of the thing name inside `thing_name_file`.
    #[serde(default = "default_thing_name_offset")]
    pub thing_name_offset: u64,

    /// Length of the thing name in bytes.
    #[serde(default = "default_thing_name_len")]
    pub thing_name_len: usize,
}

fn default_thing_name_file() -> PathBuf {
    PathBuf::from("/dev/mtd2")
}

fn default_thing_name_offset() -> u64 {
    0x400
}

fn default_thing_name_len() -> usize {
    9
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            thing_name: None,
            thing_name_file: default_thing_name_file(),
            thing_name_offset: default_thing_name_offset(),
            thing_name_len: default_thing_name_len(),
        }
    }
}

// =============================================================================
// Shadow Settings
// =============================================================================

/// Shadow gateway connection and polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowSettings {
    /// WebSocket URL of the shadow gateway.
    #[serde(default)]
    pub url: Option<String>,

    /// Pulse commands arrive on `topic_prefix + thing_name`.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Bounded wait of each poll (milliseconds).
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,

    /// Time to wait for an update acknowledgement (seconds).
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Initial backoff duration (milliseconds) for reconnection.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds) for reconnection.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Maximum reconnection attempts before giving up.
    /// Set to 0 for infinite retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_topic_prefix() -> String {
    "a140808/".to_string()
}
fn default_poll_timeout() -> u64 {
    200
}
fn default_ack_timeout() -> u64 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    0 // Infinite
}

impl Default for ShadowSettings {
    fn default() -> Self {
        ShadowSettings {
            url: None,
            topic_prefix: default_topic_prefix(),
            poll_timeout_ms: default_poll_timeout(),
            ack_timeout_secs: default_ack_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_retries: default_max_retries(),
        }
    }
}

// =============================================================================
// Engine Settings
// =============================================================================

/// Buffer and token budgets of the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Size of the pending echo buffer, terminator included.
    #[serde(default = "default_echo_capacity")]
    pub echo_capacity: usize,

    #[serde(default = "default_delta_tokens")]
    pub delta_token_capacity: usize,

    #[serde(default = "default_pulse_tokens")]
    pub pulse_token_capacity: usize,
}

fn default_echo_capacity() -> usize {
    512
}
fn default_delta_tokens() -> usize {
    DeltaDecoder::DEFAULT_TOKEN_CAPACITY
}
fn default_pulse_tokens() -> usize {
    PulseDecoder::DEFAULT_TOKEN_CAPACITY
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            echo_capacity: default_echo_capacity(),
            delta_token_capacity: default_delta_tokens(),
            pulse_token_capacity: default_pulse_tokens(),
        }
    }
}

// =============================================================================
// Hardware Settings
// =============================================================================

/// Register addressing and pulse timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSettings {
    #[serde(default = "default_output_register")]
    pub output_register: RegisterId,

    #[serde(default = "default_pulse_duration")]
    pub pulse_duration_ms: u64,
}

fn default_output_register() -> RegisterId {
    RegisterId::OUTPUT_1
}
fn default_pulse_duration() -> u64 {
    250
}

impl Default for HardwareSettings {
    fn default() -> Self {
        HardwareSettings {
            output_register: default_output_register(),
            pulse_duration_ms: default_pulse_duration(),
        }
    }
}

// =============================================================================
// Main Agent Configuration
// =============================================================================

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub shadow: ShadowSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub hardware: HardwareSettings,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (agent.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if let Some(ref name) = self.device.thing_name {
            if name.trim().is_empty() {
                return Err(SyncError::MissingThingName);
            }
        }

        if let Some(ref url) = self.shadow.url {
            let parsed = url::Url::parse(url)?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(SyncError::InvalidUrl(format!(
                    "Shadow URL must start with ws:// or wss://, got: {}",
                    url
                )));
            }
        }

        if self.shadow.poll_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "poll_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.engine.echo_capacity == 0 || self.engine.delta_token_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "engine capacities must be greater than 0".into(),
            ));
        }

        // The container plus at least one pulse key.
        if self.engine.pulse_token_capacity < 2 {
            return Err(SyncError::InvalidConfig(
                "pulse_token_capacity must be at least 2".into(),
            ));
        }

        if self.device.thing_name.is_none() && self.device.thing_name_len == 0 {
            return Err(SyncError::InvalidConfig(
                "thing_name_len must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(name) = var("RESTSWITCH_THING_NAME") {
            debug!(thing_name = %name, "Overriding thing name from environment");
            self.device.thing_name = Some(name);
        }

        if let Some(url) = var("RESTSWITCH_SHADOW_URL") {
            debug!(url = %url, "Overriding shadow URL from environment");
            self.shadow.url = Some(url);
        }

        if let Some(prefix) = var("RESTSWITCH_TOPIC_PREFIX") {
            self.shadow.topic_prefix = prefix;
        }

        if let Some(timeout) = var("RESTSWITCH_POLL_TIMEOUT_MS") {
            match timeout.parse::<u64>() {
                Ok(ms) => self.shadow.poll_timeout_ms = ms,
                Err(_) => warn!(value = %timeout, "Ignoring invalid poll timeout in environment"),
            }
        }

        if let Some(register) = var("RESTSWITCH_OUTPUT_REGISTER") {
            match register.parse::<u8>() {
                Ok(id) => {
                    debug!(register = id, "Overriding output register from environment");
                    self.hardware.output_register = RegisterId(id);
                }
                Err(_) => warn!(value = %register, "Ignoring invalid output register in environment"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "restswitch")
            .map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the shadow URL if configured.
    pub fn shadow_url(&self) -> Option<&str> {
        self.shadow.url.as_deref()
    }

    /// Topic that carries pulse commands for `thing_name`.
    pub fn pulse_topic(&self, thing_name: &str) -> String {
        format!("{}{}", self.shadow.topic_prefix, thing_name)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.shadow.poll_timeout_ms)
    }

    pub fn pulse_duration(&self) -> Duration {
        Duration::from_millis(self.hardware.pulse_duration_ms)
    }
}
