//! Configuration types for corral

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CorralError, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorralConfig {
    /// Worker process supervision
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Tool execution gateway
    #[serde(default)]
    pub gateway: GatewaySettings,

    /// Script handler sandbox
    #[serde(default)]
    pub script: ScriptSettings,

    /// Logging
    #[serde(default)]
    pub log: LogSettings,

    /// Fleet manifest file (YAML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
}

/// Supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Worker executable
    pub worker_binary: PathBuf,

    /// Root data directory; workers run in `{data_dir}/workers/{id}`
    pub data_dir: PathBuf,

    /// Wipe a worker's data directory before every start
    pub clean_start: bool,

    /// First port handed to agent workers
    pub agent_port_base: u16,

    /// First port handed to subprocess MCP servers
    pub mcp_port_base: u16,

    /// Health probe attempts per start
    pub health_attempts: u32,

    /// Delay between health probe attempts
    #[serde(with = "humantime_serde")]
    pub health_delay: Duration,

    /// Timeout of a single health request
    #[serde(with = "humantime_serde")]
    pub health_request_timeout: Duration,

    /// Timeout of the graceful `/shutdown` call
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Wait after a graceful shutdown before probing the port
    #[serde(with = "humantime_serde")]
    pub port_recheck_delay: Duration,

    /// Wait after force-killing a port owner before re-probing
    #[serde(with = "humantime_serde")]
    pub reclaim_settle_delay: Duration,

    /// Timeout of config and skill pushes
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            worker_binary: PathBuf::from("./bin/corral-worker"),
            data_dir: PathBuf::from("./data"),
            clean_start: false,
            agent_port_base: 4100,
            mcp_port_base: 5100,
            health_attempts: 30,
            health_delay: Duration::from_millis(200),
            health_request_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
            port_recheck_delay: Duration::from_millis(500),
            reclaim_settle_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Listen address of the gateway HTTP server
    pub listen: String,

    /// Base URL workers use to reach the gateway
    pub public_url: String,

    /// Caller-side timeout of `http` handler calls
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,

    /// Fail on unrecognized template expressions instead of echoing them
    pub strict_templates: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4000".to_string(),
            public_url: "http://127.0.0.1:4000".to_string(),
            http_timeout: Duration::from_secs(30),
            strict_templates: false,
        }
    }
}

/// Script sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Interpreter used to run `javascript` tools
    pub runtime: PathBuf,

    /// Extra interpreter flags
    pub runtime_args: Vec<String>,

    /// Caller-side timeout
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// The script process is killed after this long, even in the background
    #[serde(with = "humantime_serde")]
    pub hard_limit: Duration,

    /// Reject sources containing denylisted tokens before running them
    pub enforce_denylist: bool,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            runtime: PathBuf::from("node"),
            runtime_args: vec!["--disallow-code-generation-from-strings".to_string()],
            call_timeout: Duration::from_secs(30),
            hard_limit: Duration::from_secs(120),
            enforce_denylist: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl CorralConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `corral.toml` in the working directory
    /// 3. File named by `CORRAL_CONFIG_PATH`
    /// 4. `CORRAL_` environment overrides (`CORRAL_GATEWAY__LISTEN=...`)
    ///
    /// # Errors
    ///
    /// Returns an error if a file is invalid or the result fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(CorralConfig::default()))
            .merge(Toml::file("corral.toml"));

        if let Ok(path) = std::env::var("CORRAL_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: CorralConfig = figment
            .merge(Env::prefixed("CORRAL_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| {
                CorralError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, on top of defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: CorralConfig = Figment::from(Serialized::defaults(CorralConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                CorralError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        let sup = &self.supervisor;
        if sup.agent_port_base == 0 || sup.mcp_port_base == 0 {
            return Err(CorralError::Configuration(
                "port bases must be non-zero".to_string(),
            ));
        }
        if sup.agent_port_base == sup.mcp_port_base {
            return Err(CorralError::Configuration(format!(
                "agent and mcp port ranges both start at {}",
                sup.agent_port_base
            )));
        }
        if sup.health_attempts == 0 {
            return Err(CorralError::Configuration(
                "supervisor.health_attempts must be at least 1".to_string(),
            ));
        }
        if self.script.hard_limit < self.script.call_timeout {
            return Err(CorralError::Configuration(
                "script.hard_limit must not be shorter than script.call_timeout".to_string(),
            ));
        }
        Ok(())
    }
}
