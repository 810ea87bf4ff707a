//! Configuration for the closed-loop engine.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CLCTL_NOTIFICATION_CHANNEL, CLCTL_RESPONSE_CHANNEL,
//!    CLCTL_TIMEOUT_SECONDS, CLCTL_GUARD_DISABLED)
//! 2. Config file (.clctl/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .clctl/config.yaml
//! - Falls back to the user config directory (e.g. ~/.config/clctl/config.yaml)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::OperationResult;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".clctl";
const CONFIG_FILE: &str = "config.yaml";

/// Event classes that carry control-loop events
pub const CONTROL_LOOP_EVENT_CLASSES: &[&str] = &["ControlLoopEvent", "VirtualControlLoopEvent"];

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub decoders: Vec<DecoderConfig>,
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_controller_name")]
    pub name: String,
    #[serde(default = "default_notification_channel")]
    pub notification_channel: String,
    #[serde(default = "default_response_channel")]
    pub response_channel: String,
    /// Used when a policy does not set its own timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default)]
    pub guard_disabled: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: default_controller_name(),
            notification_channel: default_notification_channel(),
            response_channel: default_response_channel(),
            timeout_seconds: default_timeout_seconds(),
            max_steps: default_max_steps(),
            guard_disabled: false,
        }
    }
}

/// Inbound topic and the event classes decoded from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub topic: String,
    #[serde(default)]
    pub events: Vec<String>,
}

impl DecoderConfig {
    /// True if this topic carries control-loop events
    pub fn carries_control_loop_events(&self) -> bool {
        self.events
            .iter()
            .any(|e| CONTROL_LOOP_EVENT_CLASSES.contains(&e.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorKind {
    Http,
    Simulated,
}

/// One configured operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub actor: String,
    pub operation: String,
    #[serde(default = "default_operator_kind")]
    pub kind: OperatorKind,
    /// Endpoint for `http` operators
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub property_names: Vec<String>,
    /// Scripted result for `simulated` operators
    #[serde(default = "default_operator_result")]
    pub result: OperationResult,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub delay_ms: u64,
}

/// Engine tunables shared by the controller and its managers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub notification_channel: String,
    pub response_channel: String,
    pub default_timeout_seconds: u64,
    pub max_steps: usize,
    pub guard_disabled: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&ControllerConfig::default())
    }
}

impl From<&ControllerConfig> for EngineSettings {
    fn from(cfg: &ControllerConfig) -> Self {
        Self {
            notification_channel: cfg.notification_channel.clone(),
            response_channel: cfg.response_channel.clone(),
            default_timeout_seconds: cfg.timeout_seconds,
            max_steps: cfg.max_steps,
            guard_disabled: cfg.guard_disabled,
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub controller_name: String,
    pub settings: EngineSettings,
    pub decoders: Vec<DecoderConfig>,
    pub operators: Vec<OperatorConfig>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_controller_name() -> String {
    "usecases".to_string()
}

fn default_notification_channel() -> String {
    "POLICY-CL-MGT".to_string()
}

fn default_response_channel() -> String {
    "DCAE_CL_RSP".to_string()
}

fn default_timeout_seconds() -> u64 {
    3600
}

fn default_max_steps() -> usize {
    30
}

fn default_operator_kind() -> OperatorKind {
    OperatorKind::Simulated
}

fn default_operator_result() -> OperationResult {
    OperationResult::Success
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join("clctl").join(CONFIG_FILE))
        .filter(|path| path.exists())
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn env_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y")
}

/// Apply environment overrides on top of file settings
fn apply_env_overrides(settings: &mut EngineSettings) -> Result<()> {
    if let Ok(channel) = std::env::var("CLCTL_NOTIFICATION_CHANNEL") {
        settings.notification_channel = channel;
    }

    if let Ok(channel) = std::env::var("CLCTL_RESPONSE_CHANNEL") {
        settings.response_channel = channel;
    }

    if let Ok(timeout) = std::env::var("CLCTL_TIMEOUT_SECONDS") {
        settings.default_timeout_seconds = timeout
            .trim()
            .parse()
            .with_context(|| format!("Invalid CLCTL_TIMEOUT_SECONDS: {}", timeout))?;
    }

    if let Ok(flag) = std::env::var("CLCTL_GUARD_DISABLED") {
        settings.guard_disabled = env_flag(&flag);
    }

    Ok(())
}

fn resolve(config_file: Option<PathBuf>) -> Result<ResolvedConfig> {
    let file = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    let (controller, decoders, operators) = match file {
        Some(cfg) => (cfg.controller, cfg.decoders, cfg.operators),
        None => (ControllerConfig::default(), Vec::new(), Vec::new()),
    };

    let mut settings = EngineSettings::from(&controller);
    apply_env_overrides(&mut settings)?;

    Ok(ResolvedConfig {
        controller_name: controller.name,
        settings,
        decoders,
        operators,
        config_file,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    resolve(find_config_file())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Load configuration from an explicit file, bypassing discovery
pub fn load_from(path: &Path) -> Result<ResolvedConfig> {
    resolve(Some(path.to_path_buf()))
}
