//! Configuration management
//!
//! One `Config` struct is constructed at startup, validated, and passed into
//! each component constructor; no component reads ambient global state. Every
//! key has a documented default so an empty TOML file (or no file at all)
//! yields a working daemon, except for the small required set enforced by
//! [`Config::validate`].

use crate::error::ConfigError;
use crate::records::DEFAULT_FINGERPRINT_FIELDS;
use crate::report::{DEFAULT_BODY_TEMPLATE, DEFAULT_SUBJECT_TEMPLATE};
use serde::Deserialize;
use std::path::Path;
use std::process::Command;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of this server, used in report subjects and pager mail
    pub server_name: String,
    pub listener: ListenerConfig,
    pub fingerprint: FingerprintConfig,
    pub markers: MarkerConfig,
    pub cycle: CycleConfig,
    pub report: ReportConfig,
    pub pager: PagerConfig,
    pub transport: TransportConfig,
}

/// UDP listener settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Address/port to listen for records on
    pub bind: String,
    /// Maximum size of a single incoming datagram
    pub max_datagram_bytes: usize,
}

/// Deduplication fingerprint settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Ordered field names that define a unique message
    pub fields: Vec<String>,
    /// Which field of an incoming record holds the source of a message
    pub source_field: String,
}

/// Monitoring-marker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Unambiguous strings whose presence in a message or detail field marks
    /// an intentional monitoring error rather than a real one. Used to verify
    /// that systems are correctly sending records to this daemon; matching
    /// messages are excluded from the paging rate and routed to the
    /// monitoring recipient.
    pub monitoring: Vec<String>,
}

/// Flush cycle and paging-threshold settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// How often to flush the buffer and send digest mail, in seconds
    pub flush_seconds: u64,
    /// Number of flush cycles the paging window spans
    pub pager_window_size: usize,
    /// If the window accumulates this many errors, a page is sent
    pub pager_limit: u64,
}

/// Digest report settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Template for the digest subject line
    pub subject_template: String,
    /// Template for the digest body
    pub body_template: String,
    /// Primary recipient for error digests, and the fallback recipient when
    /// routing produces an empty set
    pub report_to: String,
    /// Address digests are sent from
    pub report_from: String,
    /// Optional Reply-To address for digests
    pub reply_to: Option<String>,
    /// Recipient for digests of intentional monitoring errors
    pub monitoring_report_to: Option<String>,
}

/// Pager settings for rate-threshold alerts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PagerConfig {
    /// Recipient for pages; pages are dropped (with an error log) if empty
    pub pager_to: String,
    /// Address pages are sent from
    pub pager_from: String,
    /// Optional Reply-To address for pages
    pub pager_reply_to: Option<String>,
}

/// Outbound mail transport selection
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Pipe mail to a sendmail-compatible command
    Sendmail {
        #[serde(default = "default_sendmail_command")]
        command: String,
    },
    /// Record mail in memory instead of delivering it (tests, dry runs)
    Mock,
}

fn default_sendmail_command() -> String {
    "/usr/sbin/sendmail".to_string()
}

fn default_server_name() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    // Fall back to the hostname command, then a fixed name.
    Command::new("hostname")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            listener: ListenerConfig::default(),
            fingerprint: FingerprintConfig::default(),
            markers: MarkerConfig::default(),
            cycle: CycleConfig::default(),
            report: ReportConfig::default(),
            pager: PagerConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:1549".to_string(),
            max_datagram_bytes: 65536,
        }
    }
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            fields: DEFAULT_FINGERPRINT_FIELDS
                .iter()
                .map(|field| field.to_string())
                .collect(),
            source_field: "source".to_string(),
        }
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            monitoring: vec![
                "5f64c8ec-225f-4b7a-9c1f-3d6b0f50c061".to_string(),
                "9e2d4a7b-6c31-4f4e-8e79-2b8a50d0b90f".to_string(),
            ],
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            flush_seconds: 60,
            pager_window_size: 5,
            pager_limit: 100,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            subject_template: DEFAULT_SUBJECT_TEMPLATE.to_string(),
            body_template: DEFAULT_BODY_TEMPLATE.to_string(),
            report_to: "root@localhost".to_string(),
            report_from: "floodgate@localhost".to_string(),
            reply_to: None,
            monitoring_report_to: None,
        }
    }
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            pager_to: String::new(),
            pager_from: "floodgate@localhost".to_string(),
            pager_reply_to: None,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Sendmail {
            command: default_sendmail_command(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read and
    /// `ConfigError::TomlError` if it cannot be parsed. Unlike missing
    /// individual keys, a config file that was explicitly requested but is
    /// unreadable or invalid is fatal.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadError(format!("{}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate required settings.
    ///
    /// The process refuses to start when any of these are unusable; the
    /// diagnostic names the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fingerprint.fields.is_empty() {
            return Err(ConfigError::ValidationError(
                "fingerprint.fields must list at least one field".to_string(),
            ));
        }
        if self.fingerprint.fields.iter().any(|field| field.is_empty()) {
            return Err(ConfigError::ValidationError(
                "fingerprint.fields must not contain empty names".to_string(),
            ));
        }
        if self.fingerprint.source_field.is_empty() {
            return Err(ConfigError::ValidationError(
                "fingerprint.source_field must not be empty".to_string(),
            ));
        }
        if self.report.subject_template.is_empty() {
            return Err(ConfigError::ValidationError(
                "report.subject_template must not be empty".to_string(),
            ));
        }
        if self.report.body_template.is_empty() {
            return Err(ConfigError::ValidationError(
                "report.body_template must not be empty".to_string(),
            ));
        }
        if self.cycle.flush_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "cycle.flush_seconds must be at least 1".to_string(),
            ));
        }
        if self.cycle.pager_window_size == 0 {
            return Err(ConfigError::ValidationError(
                "cycle.pager_window_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
