//! Configuration: TOML file with serde defaults for every section
//!
//! ```toml
//! [agent]
//! model = "gemini-2.0-flash"
//!
//! [dispatch]
//! call_timeout_secs = 30
//!
//! [[backends]]
//! name = "math"
//! transport = "sse"
//! url = "http://localhost:8002/sse"
//! ```

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::catalog::Endpoint;
use crate::tools::currency::DEFAULT_FRANKFURTER_URL;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that can perform math operations and currency conversions. \
Use the provided tools to help users with calculations and currency exchange rates. \
If a user asks about anything unrelated to math or currency conversion, \
politely explain that you can only help with these specific topics.";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub a2a: A2aConfig,
    #[serde(default)]
    pub currency: CurrencyConfig,
}

/// ReAct agent and model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Literal key or `${ENV_VAR}` reference
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_max_steps() -> usize {
    8
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            max_steps: default_max_steps(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl AgentConfig {
    /// Resolve the model API key from config, then the environment
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(raw) = &self.api_key {
            let key = expand_env(raw)?;
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("{} environment variable not set", API_KEY_ENV))
    }
}

/// Timeouts and readiness retry for the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Deadline for the transport handshake of a single connect attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_call_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    60
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Bounded exponential backoff for back ends that are not ready yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Give up once this much time has passed; 0 disables retrying
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,
}

fn default_initial_interval() -> u64 {
    200
}
fn default_max_interval() -> u64 {
    5_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_elapsed() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            multiplier: default_multiplier(),
            max_elapsed_ms: default_max_elapsed(),
        }
    }
}

impl RetryConfig {
    /// No retrying at all
    pub fn disabled() -> Self {
        Self {
            max_elapsed_ms: 0,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_elapsed_ms > 0
    }
}

/// Transport used to reach a back end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

/// One tool back end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    pub transport: TransportKind,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl BackendConfig {
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
            url: None,
        }
    }

    pub fn sse(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Sse,
            command: None,
            args: vec![],
            env: BTreeMap::new(),
            url: Some(url.to_string()),
        }
    }

    /// Validated endpoint for this back end
    pub fn endpoint(&self) -> Result<Endpoint> {
        match self.transport {
            TransportKind::Stdio => {
                let command = self
                    .command
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| {
                        anyhow!("Backend '{}' uses stdio but has no command", self.name)
                    })?;
                Ok(Endpoint::LocalProcess {
                    command: command.to_string(),
                    args: self.args.clone(),
                    env: self
                        .env
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                })
            }
            TransportKind::Sse => {
                let raw = self
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow!("Backend '{}' uses sse but has no url", self.name))?;
                let url = url::Url::parse(raw).with_context(|| {
                    format!("Backend '{}' has an invalid url '{}'", self.name, raw)
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    bail!(
                        "Backend '{}' url must be http(s), got '{}'",
                        self.name,
                        url.scheme()
                    );
                }
                Ok(Endpoint::StreamingNetwork {
                    url: raw.to_string(),
                })
            }
        }
    }
}

/// A2A server and known peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aConfig {
    #[serde(default = "default_a2a_host")]
    pub host: String,
    #[serde(default = "default_a2a_port")]
    pub port: u16,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

fn default_a2a_host() -> String {
    "localhost".to_string()
}
fn default_a2a_port() -> u16 {
    10003
}

impl Default for A2aConfig {
    fn default() -> Self {
        Self {
            host: default_a2a_host(),
            port: default_a2a_port(),
            peers: vec![],
        }
    }
}

/// A peer A2A agent exposed as a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub url: String,
    /// Tool name; defaults to `<name>_tool`
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl PeerConfig {
    pub fn tool_name(&self) -> String {
        self.tool_name
            .clone()
            .unwrap_or_else(|| format!("{}_tool", self.name))
    }
}

/// Currency toolset settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyConfig {
    #[serde(default = "default_currency_api")]
    pub api_url: String,
}

fn default_currency_api() -> String {
    DEFAULT_FRANKFURTER_URL.to_string()
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            api_url: default_currency_api(),
        }
    }
}

impl SwitchboardConfig {
    /// Default config location: `~/.switchboard/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".switchboard").join("config.toml"))
    }

    /// Load from an explicit path, else the default path if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => p,
                None => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!(
            "Loaded config from {} ({} backends)",
            path.display(),
            config.backends.len()
        );
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                bail!("Backend names cannot be empty");
            }
            if !seen.insert(backend.name.as_str()) {
                bail!("Duplicate backend name '{}'", backend.name);
            }
            backend.endpoint()?;
        }
        if self.agent.max_steps == 0 {
            bail!("agent.max_steps must be at least 1");
        }
        if self.dispatch.call_timeout_secs == 0 {
            bail!("dispatch.call_timeout_secs must be at least 1");
        }
        if self.dispatch.connect_timeout_secs == 0 {
            bail!("dispatch.connect_timeout_secs must be at least 1");
        }
        if self.dispatch.retry.multiplier < 1.0 {
            bail!("dispatch.retry.multiplier must be >= 1.0");
        }
        Ok(())
    }
}

/// Expand a whole-value `${VAR}` reference
fn expand_env(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if let Some(var) = trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        return std::env::var(var)
            .with_context(|| format!("Environment variable {} referenced in config is not set", var));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SwitchboardConfig::parse("").unwrap();
        assert_eq!(config.agent.model, "gemini-2.0-flash");
        assert_eq!(config.dispatch.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.a2a.port, 10003);
        assert!(config.backends.is_empty());
        assert!(config.dispatch.retry.is_enabled());
        assert!(config.agent.system_prompt.contains("currency"));
    }

    #[test]
    fn test_parse_backends() {
        let config = SwitchboardConfig::parse(
            r#"
            [dispatch]
            call_timeout_secs = 5

            [dispatch.retry]
            max_elapsed_ms = 0

            [[backends]]
            name = "math"
            transport = "stdio"
            command = "switchboard"
            args = ["serve-mcp", "math"]
            env = { RUST_LOG = "warn" }

            [[backends]]
            name = "currency"
            transport = "sse"
            url = "http://localhost:8001/sse"

            [[a2a.peers]]
            name = "math"
            url = "http://localhost:10001"
            "#,
        )
        .unwrap();

        assert_eq!(config.backends.len(), 2);
        assert!(!config.dispatch.retry.is_enabled());
        assert_eq!(
            config.backends[0].endpoint().unwrap(),
            Endpoint::LocalProcess {
                command: "switchboard".to_string(),
                args: vec!["serve-mcp".to_string(), "math".to_string()],
                env: vec![("RUST_LOG".to_string(), "warn".to_string())],
            }
        );
        assert_eq!(config.backends[1].transport, TransportKind::Sse);
        assert_eq!(config.a2a.peers[0].tool_name(), "math_tool");
    }

    #[test]
    fn test_duplicate_backend_rejected() {
        let err = SwitchboardConfig::parse(
            r#"
            [[backends]]
            name = "math"
            transport = "sse"
            url = "http://localhost:8002/sse"

            [[backends]]
            name = "math"
            transport = "sse"
            url = "http://localhost:8003/sse"
            "#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Duplicate backend name"));
    }

    #[test]
    fn test_backend_missing_fields() {
        let backend = BackendConfig {
            command: None,
            ..BackendConfig::stdio("math", "x", &[])
        };
        assert!(backend.endpoint().is_err());

        let backend = BackendConfig {
            url: Some("localhost:8001".to_string()),
            ..BackendConfig::sse("currency", "http://x")
        };
        assert!(backend.endpoint().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent]\nmax_steps = 3").unwrap();
        let config = SwitchboardConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.agent.max_steps, 3);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = SwitchboardConfig::load(Some(Path::new("/nonexistent/switchboard.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_steps_rejected() {
        assert!(SwitchboardConfig::parse("[agent]\nmax_steps = 0").is_err());
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let err = SwitchboardConfig::parse("[dispatch]\nconnect_timeout_secs = 0").unwrap_err();
        assert!(format!("{:#}", err).contains("connect_timeout_secs"));
        assert!(SwitchboardConfig::parse("[dispatch]\nconnect_timeout_secs = 1").is_ok());
    }

    #[test]
    fn test_sse_url_must_parse_as_http() {
        for bad in ["ftp://x/sse", "not a url", "http//missing-colon"] {
            let backend = BackendConfig::sse("currency", bad);
            assert!(backend.endpoint().is_err(), "{} accepted", bad);
        }
        let backend = BackendConfig::sse("currency", "https://rates.example.com:8443/sse");
        assert_eq!(
            backend.endpoint().unwrap(),
            Endpoint::StreamingNetwork {
                url: "https://rates.example.com:8443/sse".to_string()
            }
        );
    }

    #[test]
    fn test_literal_api_key() {
        let agent = AgentConfig {
            api_key: Some("literal-key".to_string()),
            ..AgentConfig::default()
        };
        assert_eq!(agent.resolve_api_key().unwrap(), "literal-key");
    }

    #[test]
    fn test_expand_env_missing_var() {
        assert!(expand_env("${SWITCHBOARD_TEST_UNSET_VAR_1234}").is_err());
        assert_eq!(expand_env("plain").unwrap(), "plain");
    }
}
