use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::cluster::ALL_NAMESPACES;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub monitors: MonitorsConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
    /// Tags added to every alert.
    #[serde(default)]
    pub global_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,

    #[error("invalid namespace '{0}' (must be a DNS-1123 label)")]
    InvalidNamespace(String),

    #[error("no namespaces to watch")]
    NoNamespaces,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_saphyr::from_str(&expanded)?)
    }

    /// Apply `KUBE_BEACON_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(std::env::vars());
    }

    /// Apply `KUBE_BEACON_*` overrides from the given variables.
    ///
    /// Unknown variables are ignored. Empty values leave the file value alone.
    pub fn apply_env_from<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            if value.is_empty() {
                continue;
            }

            if let Some(tag) = key.strip_prefix(ENV_GLOBAL_TAG_PREFIX) {
                if !tag.is_empty() {
                    self.global_tags.insert(tag.to_string(), value.to_string());
                }
                continue;
            }

            match key {
                ENV_WATCH_NAMESPACES => {
                    self.watch.namespaces = value.split(',').map(str::to_string).collect();
                }
                ENV_WATCH_HISTORICAL => self.watch.historical = is_truthy(value),
                ENV_WATCH_PODS => self.watch.pods = is_truthy(value),
                ENV_MONITORS_ENABLED => self.monitors.enabled = is_truthy(value),
                ENV_INTEGRATION_GKE_ENABLED => self.integrations.gke.enabled = is_truthy(value),
                ENV_BACKEND_URL => self.backend.url = Some(value.to_string()),
                ENV_BACKEND_TOKEN => self.backend.token = Some(value.to_string()),
                _ => {}
            }
        }
    }

    /// Resolve `watch.namespaces` into a validated scope.
    pub fn watch_scope(&self) -> Result<WatchScope, ConfigError> {
        WatchScope::parse(&self.watch.namespaces)
    }
}

// ============================================================================
// Environment Overrides
// ============================================================================

pub const ENV_WATCH_NAMESPACES: &str = "KUBE_BEACON_WATCH_NAMESPACES";
pub const ENV_WATCH_HISTORICAL: &str = "KUBE_BEACON_WATCH_HISTORICAL";
pub const ENV_WATCH_PODS: &str = "KUBE_BEACON_WATCH_PODS";
pub const ENV_MONITORS_ENABLED: &str = "KUBE_BEACON_MONITORS_ENABLED";
pub const ENV_INTEGRATION_GKE_ENABLED: &str = "KUBE_BEACON_INTEGRATION_GKE_ENABLED";
pub const ENV_BACKEND_URL: &str = "KUBE_BEACON_BACKEND_URL";
pub const ENV_BACKEND_TOKEN: &str = "KUBE_BEACON_BACKEND_TOKEN";
pub const ENV_GLOBAL_TAG_PREFIX: &str = "KUBE_BEACON_GLOBAL_TAG_";

/// Namespace list entry meaning "every namespace".
pub const ALL_NAMESPACES_TOKEN: &str = "__all__";

/// Default config file name.
pub const DEFAULT_CONFIG_PATH: &str = "kube-beacon.yaml";

/// `1`, `true`, `yes` and `on` (any case) are truthy; everything else is not.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ============================================================================
// WatchScope
// ============================================================================

/// Namespaces covered by the event watchers and the CronJob/Job informers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchScope {
    All,
    Namespaces(Vec<String>),
}

impl WatchScope {
    /// Parse namespace entries.
    ///
    /// Entries are trimmed and blanks skipped. `__all__` anywhere selects all
    /// namespaces. Duplicates are dropped, keeping first occurrence order.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        let mut namespaces: Vec<String> = Vec::new();

        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if entry == ALL_NAMESPACES_TOKEN {
                return Ok(WatchScope::All);
            }
            if !is_dns1123_label(entry) {
                return Err(ConfigError::InvalidNamespace(entry.to_string()));
            }
            if !namespaces.iter().any(|ns| ns == entry) {
                namespaces.push(entry.to_string());
            }
        }

        if namespaces.is_empty() {
            return Err(ConfigError::NoNamespaces);
        }
        Ok(WatchScope::Namespaces(namespaces))
    }

    /// Namespaces to start one watcher for each. The whole-cluster scope is a
    /// single [`ALL_NAMESPACES`] entry.
    pub fn namespaces(&self) -> Vec<String> {
        match self {
            WatchScope::All => vec![ALL_NAMESPACES.to_string()],
            WatchScope::Namespaces(namespaces) => namespaces.clone(),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, WatchScope::All)
    }
}

impl std::fmt::Display for WatchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchScope::All => f.write_str("all namespaces"),
            WatchScope::Namespaces(namespaces) => f.write_str(&namespaces.join(", ")),
        }
    }
}

fn is_dns1123_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    let valid_char = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-';
    bytes.iter().all(valid_char)
        && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_namespaces() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_watch_timeout() -> u32 {
    290
}

fn default_breadcrumb_limit() -> usize {
    20
}

fn default_buffer_capacity() -> usize {
    1000
}

fn default_buffer_max_age() -> i64 {
    60
}

fn default_max_runtime() -> i64 {
    5
}

fn default_checkin_margin() -> i64 {
    3
}

fn default_sync_timeout() -> u64 {
    60
}

fn default_backend_timeout() -> u64 {
    10
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Serde default for bool fields that should be `true` (serde's default is `false`).
fn default_true() -> bool {
    true
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// - `${VAR}` is required and errors if not set
/// - `${VAR:-default}` falls back to `default`
/// - `$$` is a literal `$`
///
/// Nested expansion is not supported.
///
/// ```yaml
/// backend:
///   url: ${MONITORING_URL}
///   token: ${MONITORING_TOKEN:-}
/// ```
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                result.push_str(&parse_var_reference(&mut chars)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Parse `VAR}` or `VAR:-default}` after a `${`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;

    loop {
        let Some(c) = chars.next() else {
            return Err(ConfigError::UnclosedVarReference);
        };
        if c == '}' {
            break;
        }
        if let Some(default) = default_value.as_mut() {
            default.push(c);
        } else if c == ':' && chars.peek() == Some(&'-') {
            chars.next();
            default_value = Some(String::new());
        } else {
            var_name.push(c);
        }
    }

    match std::env::var(&var_name) {
        Ok(value) => Ok(value),
        Err(_) => default_value.ok_or(ConfigError::MissingEnvVar(var_name)),
    }
}

// ============================================================================
// WatchConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WatchConfig {
    /// Namespaces to watch; `["__all__"]` watches the whole cluster.
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,
    /// Replay events the API server still retains instead of starting from now.
    #[serde(default)]
    pub historical: bool,
    /// Also watch Pods and report containers that exit with a non-zero code.
    #[serde(default = "default_true")]
    pub pods: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_watch_timeout")]
    pub timeout_seconds: u32,
    #[serde(default = "default_breadcrumb_limit")]
    pub breadcrumb_limit: usize,
    #[serde(default)]
    pub buffer: BufferConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            namespaces: default_namespaces(),
            historical: false,
            pods: true,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            timeout_seconds: default_watch_timeout(),
            breadcrumb_limit: default_breadcrumb_limit(),
            buffer: BufferConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,
    #[serde(default = "default_buffer_max_age")]
    pub max_age_minutes: i64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
            max_age_minutes: default_buffer_max_age(),
        }
    }
}

// ============================================================================
// MonitorsConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct MonitorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_runtime")]
    pub max_runtime_minutes: i64,
    #[serde(default = "default_checkin_margin")]
    pub checkin_margin_minutes: i64,
    /// Deadline for the initial CronJob/Job list. Exceeding it is fatal.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_seconds: u64,
}

impl Default for MonitorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_runtime_minutes: default_max_runtime(),
            checkin_margin_minutes: default_checkin_margin(),
            sync_timeout_seconds: default_sync_timeout(),
        }
    }
}

// ============================================================================
// BackendConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the monitoring backend. Unset means alerts and check-ins
    /// are only logged.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_backend_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout_seconds: default_backend_timeout(),
        }
    }
}

// ============================================================================
// IntegrationsConfig
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(default)]
    pub gke: GkeConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct GkeConfig {
    #[serde(default)]
    pub enabled: bool,
}

// ============================================================================
// HealthConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
