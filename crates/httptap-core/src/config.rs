//! Configuration system for httptap
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation of the capture mode

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::tracer::{ProgramVariant, TargetProcess};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete httptap configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// General settings
    pub general: GeneralSettings,

    /// Tracer settings
    pub tracer: TracerSettings,

    /// Export settings
    pub export: ExportSettings,
}

/// General settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Tracer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerSettings {
    /// Observe every process instead of a single target. Enables process
    /// name resolution and exit tracking, disables pid filtering.
    pub system_wide: bool,

    /// Load the debug build of the kernel-side program
    pub bpf_debug: bool,

    /// Target process (required unless system-wide)
    pub pid: Option<u32>,

    /// Directory holding the compiled kernel-side objects
    pub object_dir: String,

    /// Capacity of the outbound record channel
    pub channel_size: usize,
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self {
            system_wide: false,
            bpf_debug: false,
            pid: None,
            object_dir: "/usr/lib/httptap".to_string(),
            channel_size: 1024,
        }
    }
}

impl TracerSettings {
    pub fn variant(&self) -> ProgramVariant {
        ProgramVariant::from_debug_flag(self.bpf_debug)
    }

    /// Target process in single-target mode
    pub fn target(&self) -> Option<TargetProcess> {
        if self.system_wide {
            return None;
        }
        self.pid.map(|pid| TargetProcess { pid })
    }

    /// Full path of the object file for the configured variant
    pub fn object_path(&self) -> PathBuf {
        Path::new(&self.object_dir).join(self.variant().object_name())
    }
}

/// Export settings container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// JSONL output
    pub jsonl: JsonlSettings,
}

/// JSONL export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonlSettings {
    /// Output file path, stdout when unset
    pub path: Option<String>,

    /// Append to existing file
    pub append: bool,

    /// Flush after each record
    pub flush_each: bool,
}

impl Default for JsonlSettings {
    fn default() -> Self {
        Self {
            path: None,
            append: true,
            flush_each: true,
        }
    }
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. HTTPTAP_CONFIG environment variable
    /// 3. ~/.config/httptap/config.toml
    /// 4. /etc/httptap/config.toml
    /// 5. Default values
    ///
    /// Environment overrides are applied on top. Validation is left to the
    /// caller, after CLI flags have been merged in.
    pub fn load(&self) -> ConfigResult<TapConfig> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                TapConfig::default()
            }
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    /// Find the config file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("HTTPTAP_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("HTTPTAP_CONFIG path does not exist: {}", env_path);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let path = config_dir.join("httptap").join("config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        let path = PathBuf::from("/etc/httptap/config.toml");
        if path.exists() {
            return Some(path);
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<TapConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: TapConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Render a configuration as TOML
    pub fn to_toml(config: &TapConfig) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(config)?)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply environment variable overrides, reading variables through `lookup`
fn apply_env_overrides(config: &mut TapConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("HTTPTAP_LOG_LEVEL") {
        config.general.log_level = val;
    }

    if let Some(val) = lookup("HTTPTAP_SYSTEM_WIDE") {
        config.tracer.system_wide = val.parse().unwrap_or(config.tracer.system_wide);
    }
    if let Some(val) = lookup("HTTPTAP_BPF_DEBUG") {
        config.tracer.bpf_debug = val.parse().unwrap_or(config.tracer.bpf_debug);
    }
    if let Some(val) = lookup("HTTPTAP_PID") {
        match val.parse() {
            Ok(pid) => config.tracer.pid = Some(pid),
            Err(_) => warn!("Ignoring invalid HTTPTAP_PID: {}", val),
        }
    }
    if let Some(val) = lookup("HTTPTAP_OBJECT_DIR") {
        config.tracer.object_dir = val;
    }

    if let Some(val) = lookup("HTTPTAP_JSONL_PATH") {
        config.export.jsonl.path = Some(val);
    }
}

/// Validate configuration
pub fn validate(config: &TapConfig) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.general.log_level.to_lowercase().as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "Invalid log level: {}. Must be one of: {:?}",
            config.general.log_level, valid_levels
        )));
    }

    match (config.tracer.system_wide, config.tracer.pid) {
        (true, Some(pid)) => {
            return Err(ConfigError::ValidationError(format!(
                "pid {} cannot be combined with system-wide mode",
                pid
            )));
        }
        (false, None) => {
            return Err(ConfigError::ValidationError(
                "a target pid is required unless system-wide mode is enabled".to_string(),
            ));
        }
        _ => {}
    }

    if config.tracer.channel_size == 0 {
        return Err(ConfigError::ValidationError(
            "channel_size cannot be 0".to_string(),
        ));
    }

    Ok(())
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn system_wide() -> TapConfig {
        let mut config = TapConfig::default();
        config.tracer.system_wide = true;
        config
    }

    #[test]
    fn test_default_config() {
        let config = TapConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert!(!config.tracer.system_wide);
        assert!(!config.tracer.bpf_debug);
        assert_eq!(config.tracer.channel_size, 1024);
        assert!(config.export.jsonl.path.is_none());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [general]
            log_level = "debug"
        "#;
        let config: TapConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.tracer, TracerSettings::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [general]
            log_level = "trace"

            [tracer]
            system_wide = true
            bpf_debug = true
            object_dir = "/opt/httptap"
            channel_size = 64

            [export.jsonl]
            path = "/tmp/http.jsonl"
            append = false
        "#;

        let config: TapConfig = toml::from_str(toml_str).unwrap();
        assert!(config.tracer.system_wide);
        assert_eq!(config.tracer.variant(), ProgramVariant::Debug);
        assert_eq!(
            config.tracer.object_path(),
            PathBuf::from("/opt/httptap/http_sock_debug.bpf.o")
        );
        assert_eq!(config.tracer.channel_size, 64);
        assert_eq!(config.export.jsonl.path.as_deref(), Some("/tmp/http.jsonl"));
        assert!(!config.export.jsonl.append);
        assert!(config.export.jsonl.flush_each);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tracer]\npid = 42\n").unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.tracer.pid, Some(42));
        assert_eq!(config.tracer.target(), Some(TargetProcess { pid: 42 }));
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("HTTPTAP_LOG_LEVEL", "warn"),
            ("HTTPTAP_SYSTEM_WIDE", "true"),
            ("HTTPTAP_BPF_DEBUG", "not-a-bool"),
            ("HTTPTAP_JSONL_PATH", "/tmp/out.jsonl"),
        ]
        .into_iter()
        .collect();

        let mut config = TapConfig::default();
        apply_env_overrides(&mut config, |key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.general.log_level, "warn");
        assert!(config.tracer.system_wide);
        assert!(!config.tracer.bpf_debug);
        assert_eq!(config.export.jsonl.path.as_deref(), Some("/tmp/out.jsonl"));
    }

    #[test]
    fn test_invalid_pid_override_is_ignored() {
        let mut config = TapConfig::default();
        apply_env_overrides(&mut config, |key| {
            (key == "HTTPTAP_PID").then(|| "abc".to_string())
        });
        assert_eq!(config.tracer.pid, None);
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = system_wide();
        config.general.log_level = "loud".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validation_capture_mode() {
        assert!(validate(&system_wide()).is_ok());

        let single_without_pid = TapConfig::default();
        assert!(validate(&single_without_pid).is_err());

        let mut both = system_wide();
        both.tracer.pid = Some(1);
        assert!(validate(&both).is_err());
        assert_eq!(both.tracer.target(), None);
    }

    #[test]
    fn test_validation_channel_size() {
        let mut config = system_wide();
        config.tracer.channel_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_serialize_config() {
        let config = system_wide();
        let toml_str = ConfigLoader::to_toml(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("system_wide = true"));

        let parsed: TapConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
