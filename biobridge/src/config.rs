//! Configuration for the host bridge and the miniapp runtime.
//!
//! Settings live in a JSON file, by default `~/.biobridge/config.json`.

use crate::error::{ConfigError, ConfigResult};
use crate::method::Method;
use crate::port::ANY_ORIGIN;
use crate::protocol::ProtocolTag;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What the bridge does with a second prompt of a kind that is already open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    /// Wait for the open prompt to settle, first come first served.
    #[default]
    Queue,
    /// Reject immediately with a busy error.
    RejectBusy,
}

impl std::str::FromStr for ConfirmationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "queue" => Ok(Self::Queue),
            "reject_busy" => Ok(Self::RejectBusy),
            other => Err(ConfigError::invalid(format!(
                "unknown confirmation policy '{other}'"
            ))),
        }
    }
}

/// Host side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Origin the host posts from. The attached port must live there.
    pub host_origin: String,
    /// Miniapp origins accepted. Empty accepts the attached port's peer only.
    pub allowed_origins: Vec<String>,
    /// Protocol tags served. Empty serves every protocol.
    pub protocols: Vec<ProtocolTag>,
    /// Overlapping prompt policy.
    pub confirmation_policy: ConfirmationPolicy,
    /// Catalogue methods answered with unsupported-method.
    pub disabled_methods: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host_origin: "https://wallet.local".to_string(),
            allowed_origins: Vec::new(),
            protocols: ProtocolTag::ALL.to_vec(),
            confirmation_policy: ConfirmationPolicy::Queue,
            disabled_methods: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Whether a method has been switched off.
    #[must_use]
    pub fn is_disabled(&self, method: Method) -> bool {
        self.disabled_methods.iter().any(|m| m == method.as_str())
    }
}

/// Miniapp side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Origin the miniapp is served from.
    pub miniapp_origin: String,
    /// The only origin facades accept frames from.
    pub host_origin: String,
    /// Origin declared on outbound frames.
    pub target_origin: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            miniapp_origin: "https://miniapp.local".to_string(),
            host_origin: "https://wallet.local".to_string(),
            target_origin: ANY_ORIGIN.to_string(),
        }
    }
}

/// Complete settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Host bridge settings.
    pub bridge: BridgeConfig,
    /// Miniapp runtime settings.
    pub runtime: RuntimeConfig,
}

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// Works, but probably not what was meant.
    Warning,
    /// The bridge cannot run like this.
    Error,
}

/// A problem found by [`BridgeSettings::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Severity.
    pub level: IssueLevel,
    /// Dotted path of the offending field.
    pub field: String,
    /// Description.
    pub message: String,
}

impl ConfigIssue {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.level {
            IssueLevel::Warning => "warning",
            IssueLevel::Error => "error",
        };
        write!(f, "[{level}] {}: {}", self.field, self.message)
    }
}

fn is_origin(value: &str) -> bool {
    value
        .split_once("://")
        .is_some_and(|(scheme, rest)| !scheme.is_empty() && !rest.is_empty() && !rest.contains('/'))
}

impl BridgeSettings {
    /// Check the settings for mistakes.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if !is_origin(&self.bridge.host_origin) {
            issues.push(ConfigIssue::error(
                "bridge.host_origin",
                format!("'{}' is not an origin", self.bridge.host_origin),
            ));
        }
        for origin in &self.bridge.allowed_origins {
            if origin == ANY_ORIGIN {
                issues.push(ConfigIssue::error(
                    "bridge.allowed_origins",
                    "'*' would accept frames from any context",
                ));
            } else if !is_origin(origin) {
                issues.push(ConfigIssue::error(
                    "bridge.allowed_origins",
                    format!("'{origin}' is not an origin"),
                ));
            }
        }
        for name in &self.bridge.disabled_methods {
            if name.parse::<Method>().is_err() {
                issues.push(ConfigIssue::warning(
                    "bridge.disabled_methods",
                    format!("'{name}' is not a catalogue method"),
                ));
            }
        }

        if !is_origin(&self.runtime.miniapp_origin) {
            issues.push(ConfigIssue::error(
                "runtime.miniapp_origin",
                format!("'{}' is not an origin", self.runtime.miniapp_origin),
            ));
        }
        if !is_origin(&self.runtime.host_origin) {
            issues.push(ConfigIssue::error(
                "runtime.host_origin",
                format!("'{}' is not an origin", self.runtime.host_origin),
            ));
        }
        if self.runtime.target_origin == ANY_ORIGIN {
            issues.push(ConfigIssue::warning(
                "runtime.target_origin",
                "frames are addressed to any origin",
            ));
        } else if !is_origin(&self.runtime.target_origin) {
            issues.push(ConfigIssue::error(
                "runtime.target_origin",
                format!("'{}' is not an origin", self.runtime.target_origin),
            ));
        }
        if self.runtime.host_origin != self.bridge.host_origin {
            issues.push(ConfigIssue::warning(
                "runtime.host_origin",
                "differs from bridge.host_origin; facades will drop host frames",
            ));
        }

        issues
    }

    /// Whether validation found no errors.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate()
            .iter()
            .all(|i| i.level != IssueLevel::Error)
    }
}

/// Default settings file location.
#[must_use]
pub fn config_path() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".biobridge")
        .join("config.json")
}

/// Load settings from a file.
pub async fn load_config(path: &Path) -> ConfigResult<BridgeSettings> {
    debug!(path = %path.display(), "loading config");
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Write settings to a file, creating parent directories.
pub async fn save_config(path: &Path, settings: &BridgeSettings) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Write default settings unless a file exists and `force` is false.
///
/// Returns whether a file was written.
pub async fn init_config(path: &Path, force: bool) -> ConfigResult<bool> {
    if !force && tokio::fs::try_exists(path).await? {
        debug!(path = %path.display(), "config exists, leaving it alone");
        return Ok(false);
    }
    save_config(path, &BridgeSettings::default()).await?;
    info!(path = %path.display(), "wrote default config");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("biobridge-{}", crate::util::generate_id("test")))
            .join(name)
    }

    #[test]
    fn test_defaults_validate() {
        let settings = BridgeSettings::default();
        let issues = settings.validate();
        assert!(settings.is_valid());
        // Only the wildcard target origin is flagged.
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, IssueLevel::Warning);
    }

    #[test]
    fn test_validate_flags_mistakes() {
        let mut settings = BridgeSettings::default();
        settings.bridge.allowed_origins = vec!["*".into(), "not an origin".into()];
        settings.bridge.disabled_methods = vec!["bio_fly".into()];

        let issues = settings.validate();
        let errors = issues.iter().filter(|i| i.level == IssueLevel::Error).count();
        assert_eq!(errors, 2);
        assert!(issues.iter().any(|i| i.field == "bridge.disabled_methods"));
        assert!(!settings.is_valid());
    }

    #[test]
    fn test_empty_protocols_is_valid() {
        let mut settings = BridgeSettings::default();
        settings.bridge.protocols.clear();
        assert!(settings.is_valid());
        assert!(!settings.validate().iter().any(|i| i.field == "bridge.protocols"));
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&ConfirmationPolicy::RejectBusy).unwrap();
        assert_eq!(json, "\"reject_busy\"");
        assert_eq!(
            "reject-busy".parse::<ConfirmationPolicy>().unwrap(),
            ConfirmationPolicy::RejectBusy
        );
        assert!("later".parse::<ConfirmationPolicy>().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: BridgeSettings =
            serde_json::from_str(r#"{"bridge":{"confirmation_policy":"reject_busy"}}"#).unwrap();
        assert_eq!(settings.bridge.confirmation_policy, ConfirmationPolicy::RejectBusy);
        assert_eq!(settings.bridge.protocols, ProtocolTag::ALL.to_vec());
        assert_eq!(settings.runtime, RuntimeConfig::default());
    }

    #[test]
    fn test_disabled_methods() {
        let config = BridgeConfig {
            disabled_methods: vec!["bio_pickWallet".into()],
            ..BridgeConfig::default()
        };
        assert!(config.is_disabled(Method::PickWallet));
        assert!(!config.is_disabled(Method::ChainId));
    }

    #[tokio::test]
    async fn test_init_save_load() {
        let path = temp_path("config.json");
        assert!(init_config(&path, false).await.unwrap());
        assert!(!init_config(&path, false).await.unwrap());

        let mut settings = load_config(&path).await.unwrap();
        assert_eq!(settings, BridgeSettings::default());

        settings.bridge.allowed_origins.push("https://app.example".into());
        save_config(&path, &settings).await.unwrap();
        assert_eq!(load_config(&path).await.unwrap(), settings);

        assert!(init_config(&path, true).await.unwrap());
        assert_eq!(load_config(&path).await.unwrap(), BridgeSettings::default());

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }

    #[tokio::test]
    async fn test_load_missing_is_io_error() {
        let err = load_config(&temp_path("absent.json")).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
