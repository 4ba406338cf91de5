//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.switchyard/config.json`); environment
//! variables override individual provider and gateway settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::llm::TransportConfig;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Which backend to talk to and how.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// HTTP client timeouts.
    #[serde(default)]
    pub transport: TransportSettings,

    /// Tool-calling behavior.
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Gateway bind, port, and auth settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 15151).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Auth settings. When absent, defaults to no auth for loopback bind.
    #[serde(default)]
    pub auth: GatewayAuthConfig,

    /// Most sessions kept in memory; the oldest is dropped beyond this (default 256).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

/// Gateway auth: token or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    #[serde(default)]
    pub mode: GatewayAuthMode,

    /// Bearer token. Overridden by SWITCHYARD_GATEWAY_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require `Authorization: Bearer <token>`.
    Token,
}

fn default_gateway_port() -> u16 {
    15151
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_max_sessions() -> usize {
    256
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider key, e.g. "ollama", "openai", "lmstudio" (default "ollama").
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    /// Overrides the provider's default endpoint. Required for generic-openai.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Model id as the provider names it (e.g. "llama3.2:latest", "gpt-4o-mini").
    pub model: Option<String>,
    /// Model for embeddings; falls back to `model`.
    pub embedding_model: Option<String>,
    /// Comma-separated provider keys for which native tool calling is always used.
    pub native_tool_calling: Option<String>,
    /// Force the explicit (empty) reasoning field on assistant messages on or off.
    pub reasoning_content: Option<bool>,
    /// Per-1k-token prices. Absent means every completion costs zero.
    pub pricing: Option<PricingConfig>,
}

fn default_provider_kind() -> String {
    "ollama".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: None,
            api_key: None,
            model: None,
            embedding_model: None,
            native_tool_calling: None,
            reasoning_content: None,
            pricing: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingConfig {
    #[serde(default)]
    pub prompt_per_1k: f64,
    #[serde(default)]
    pub completion_per_1k: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSettings {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// How many times a malformed native tool call is sent back to the model (default 1).
    #[serde(default = "default_max_malformed_retries")]
    pub max_malformed_retries: u32,
    /// Seconds after which an emulated call may repeat. Absent: blocked until a
    /// turn ends without a tool call.
    pub dedup_cooldown_secs: Option<u64>,
    pub temperature: Option<f32>,
}

fn default_max_malformed_retries() -> u32 {
    1
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_malformed_retries: default_max_malformed_retries(),
            dedup_cooldown_secs: None,
            temperature: None,
        }
    }
}

/// Non-blank value of an environment variable, trimmed.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn config_value(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the gateway token: env SWITCHYARD_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    env_value("SWITCHYARD_GATEWAY_TOKEN").or_else(|| config_value(&config.gateway.auth.token))
}

/// Provider key: env SWITCHYARD_PROVIDER overrides config.
pub fn resolve_provider_kind(config: &Config) -> String {
    env_value("SWITCHYARD_PROVIDER").unwrap_or_else(|| config.provider.kind.trim().to_string())
}

/// Base URL: env SWITCHYARD_BASE_URL overrides config.
pub fn resolve_base_url(config: &Config) -> Option<String> {
    env_value("SWITCHYARD_BASE_URL").or_else(|| config_value(&config.provider.base_url))
}

/// Model: env SWITCHYARD_MODEL overrides config.
pub fn resolve_model(config: &Config) -> Option<String> {
    env_value("SWITCHYARD_MODEL").or_else(|| config_value(&config.provider.model))
}

/// API key: SWITCHYARD_API_KEY, then the provider's own variable (e.g.
/// OPENAI_API_KEY), then config.
pub fn resolve_api_key(config: &Config, provider_env: Option<&str>) -> Option<String> {
    env_value("SWITCHYARD_API_KEY")
        .or_else(|| provider_env.and_then(env_value))
        .or_else(|| config_value(&config.provider.api_key))
}

/// Native tool-calling allow-list: env SWITCHYARD_NATIVE_TOOL_CALLING overrides config.
pub fn resolve_native_tool_calling(config: &Config) -> String {
    env_value("SWITCHYARD_NATIVE_TOOL_CALLING")
        .or_else(|| config_value(&config.provider.native_tool_calling))
        .unwrap_or_default()
}

/// Transport timeouts; env SWITCHYARD_REQUEST_TIMEOUT_MS overrides the request timeout.
pub fn resolve_transport(config: &Config) -> TransportConfig {
    let request_ms = env_value("SWITCHYARD_REQUEST_TIMEOUT_MS")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(config.transport.request_timeout_ms);
    TransportConfig {
        request_timeout: Duration::from_millis(request_ms),
        connect_timeout: Duration::from_millis(config.transport.connect_timeout_ms),
    }
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SWITCHYARD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".switchyard").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, SWITCHYARD_CONFIG_PATH, or the default. Missing
/// file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 15151);
        assert_eq!(g.bind, "127.0.0.1");
        assert_eq!(g.max_sessions, 256);
    }

    #[test]
    fn empty_object_gives_defaults() {
        let c: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(c.provider.kind, "ollama");
        assert_eq!(c.transport.request_timeout_ms, 120_000);
        assert_eq!(c.transport.connect_timeout_ms, 10_000);
        assert_eq!(c.agent.max_malformed_retries, 1);
        assert!(c.agent.dedup_cooldown_secs.is_none());
    }

    #[test]
    fn parses_camel_case_provider_section() {
        let c: Config = serde_json::from_str(
            r#"{
                "provider": {
                    "kind": "lmstudio",
                    "baseUrl": "http://10.0.0.2:1234/v1",
                    "model": "qwen2.5-7b-instruct",
                    "nativeToolCalling": "lmstudio,openai",
                    "pricing": {"promptPer1k": 0.5, "completionPer1k": 1.5}
                },
                "agent": {"maxMalformedRetries": 0, "dedupCooldownSecs": 30}
            }"#,
        )
        .unwrap();
        assert_eq!(c.provider.kind, "lmstudio");
        assert_eq!(c.provider.base_url.as_deref(), Some("http://10.0.0.2:1234/v1"));
        assert_eq!(c.provider.pricing.unwrap().completion_per_1k, 1.5);
        assert_eq!(c.agent.max_malformed_retries, 0);
        assert_eq!(c.agent.dedup_cooldown_secs, Some(30));
    }

    #[test]
    fn blank_config_values_are_ignored() {
        let mut c = Config::default();
        c.provider.api_key = Some("   ".into());
        assert_eq!(config_value(&c.provider.api_key), None);
        c.gateway.auth.token = Some(" secret ".into());
        assert_eq!(config_value(&c.gateway.auth.token).as_deref(), Some("secret"));
    }

    #[test]
    fn loopback_detection() {
        assert!(is_loopback_bind("127.0.0.1"));
        assert!(is_loopback_bind(" localhost "));
        assert!(!is_loopback_bind("0.0.0.0"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir().join(format!(
            "switchyard-missing-{}.json",
            uuid::Uuid::new_v4()
        ));
        let (c, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(c.gateway.port, 15151);
    }
}
