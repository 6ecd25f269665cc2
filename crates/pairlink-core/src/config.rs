//! Configuration system for Pairlink.

use std::collections::HashMap;
use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Main configuration struct for Pairlink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,
    /// Session persistence settings
    pub session: SessionConfig,
    /// Pairing code rendering settings
    pub pairing: PairingConfig,
    /// Messaging capability settings
    pub messaging: MessagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Also serve the historical route names (/qr-status, /enviar, ...)
    pub legacy_routes: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            legacy_routes: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Location of the persisted session record
    pub path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: Config::data_dir().join("session.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Write each new pairing code as a PNG file
    pub write_image: bool,
    /// Where the PNG is written when `write_image` is set
    pub image_path: PathBuf,
    /// Draw each new pairing code on the terminal
    pub terminal: bool,
    /// Minimum edge length of rendered images, in pixels
    pub image_size: u32,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            write_image: true,
            image_path: PathBuf::from("qr.png"),
            terminal: true,
            image_size: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Capability implementation: bridge, loopback
    pub capability: String,
    /// Appended to bare phone numbers to form a destination
    pub address_suffix: String,
    /// Helper process settings for the bridge capability
    pub bridge: BridgeConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            capability: "bridge".to_string(),
            address_suffix: "@c.us".to_string(),
            bridge: BridgeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Command to spawn
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Extra environment for the helper process
    pub env: HashMap<String, String>,
    /// Working directory for the helper process
    pub working_dir: Option<PathBuf>,
    /// Seconds to wait for a reply to a single request
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: "node".to_string(),
            args: vec!["bridge.js".to_string()],
            env: HashMap::new(),
            working_dir: None,
            request_timeout_secs: 60,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Field path (e.g., "server.port")
    pub field: String,
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

/// Capability kinds understood by the CLI.
pub const CAPABILITY_KINDS: [&str; 2] = ["bridge", "loopback"];

impl Config {
    /// Project-local configuration file.
    pub const PROJECT_FILE: &'static str = "pairlink.toml";

    /// Build the layered figment without extracting it.
    ///
    /// Precedence, lowest first: defaults, user config, project config,
    /// `PAIRLINK_*` variables, then the bare `PORT`/`IP` variables that
    /// hosting platforms set.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file(Self::PROJECT_FILE))
            .merge(Env::prefixed("PAIRLINK_").split("__"))
            .merge(
                Env::raw()
                    .only(&["PORT", "IP"])
                    .map(|key| match key.as_str() {
                        "port" | "PORT" => "server.port".into(),
                        _ => "server.host".into(),
                    }),
            )
    }

    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Extract and validate a prepared figment.
    pub fn from_figment(figment: Figment) -> Result<Self, Error> {
        let config: Config = figment.extract().map_err(|e| Error::Config(e.to_string()))?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.server.host.trim().is_empty() {
            result.add_error("server.host", "host cannot be empty");
        }

        if self.server.port == 0 {
            result.add_error("server.port", "port must be greater than 0");
        }

        if self.session.path.as_os_str().is_empty() {
            result.add_error("session.path", "session path cannot be empty");
        } else if self.session.path.is_dir() {
            result.add_error("session.path", "session path points to a directory");
        }

        if self.pairing.image_size == 0 {
            result.add_error("pairing.image_size", "image_size must be greater than 0");
        }

        if self.pairing.image_size > 4096 {
            result.add_warning("pairing.image_size", "image_size is very large (> 4096 px)");
        }

        if self.pairing.write_image && self.pairing.image_path.as_os_str().is_empty() {
            result.add_error("pairing.image_path", "image_path cannot be empty when write_image is set");
        }

        if !self.pairing.terminal && !self.pairing.write_image {
            result.add_warning(
                "pairing",
                "pairing codes are neither drawn on the terminal nor written to a file; only /pairing-image will show them",
            );
        }

        if !CAPABILITY_KINDS.contains(&self.messaging.capability.as_str()) {
            result.add_error(
                "messaging.capability",
                format!(
                    "Invalid capability '{}'. Valid values: {:?}",
                    self.messaging.capability, CAPABILITY_KINDS
                ),
            );
        }

        if self.messaging.capability == "bridge" && self.messaging.bridge.command.trim().is_empty() {
            result.add_error("messaging.bridge.command", "bridge command cannot be empty");
        }

        if self.messaging.bridge.request_timeout_secs == 0 {
            result.add_error(
                "messaging.bridge.request_timeout_secs",
                "request_timeout_secs must be greater than 0",
            );
        }

        if self.messaging.capability == "loopback" {
            result.add_warning(
                "messaging.capability",
                "loopback capability does not deliver messages anywhere",
            );
        }

        result
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("pairlink"))
            .unwrap_or_else(|| PathBuf::from("~/.config/pairlink"))
    }

    /// Get the data directory (for the session record).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join("pairlink"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/pairlink"))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
