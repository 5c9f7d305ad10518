//! Gateway configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. TOML file named by `GATEWAY_CONFIG` (default `gateway.toml`, optional)
//! 3. `GATEWAY__SECTION__KEY` environment variables
//! 4. Flat legacy variables (`PORT`, `REDIS_URL`, `RATE_LIMIT_*`)

use config::{Config, ConfigBuilder, Environment, File};
use mcp_admission_core::{AuthConfig, RateLimitConfig};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "gateway.toml";
const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid value {value:?} for {name}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Take the client IP from the first `X-Forwarded-For` hop.
    pub trust_forwarded_for: bool,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            trust_forwarded_for: false,
            body_limit_bytes: DEFAULT_BODY_LIMIT,
        }
    }
}

impl GatewayConfig {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&file, |name| std::env::var(name).ok())
    }

    /// Load with an explicit file path and legacy variable lookup.
    pub fn load_from(
        file: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("rate_limit.exempt_paths"),
            );

        let config = apply_legacy_env(builder, env)?
            .build()?
            .try_deserialize::<GatewayConfig>()?;
        Ok(config)
    }
}

type Builder = ConfigBuilder<config::builder::DefaultState>;

fn apply_legacy_env(
    builder: Builder,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Builder, ConfigError> {
    let number = |name: &'static str| -> Result<Option<i64>, ConfigError> {
        env(name)
            .map(|value| {
                value
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .filter(|n| *n >= 0)
                    .ok_or(ConfigError::InvalidEnv { name, value })
            })
            .transpose()
    };
    // Anything other than "false" enables a layer.
    let flag = |name: &'static str| env(name).map(|value| value.trim() != "false");

    let port = number("PORT")?.map(|port| format!("0.0.0.0:{port}"));
    let exempt_paths = env("RATE_LIMIT_EXEMPT_PATHS").map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    let builder = builder
        .set_override_option("server.listen", port)?
        .set_override_option("rate_limit.global_rps", number("RATE_LIMIT_GLOBAL_RPS")?)?
        .set_override_option("rate_limit.tenant_rps", number("RATE_LIMIT_TENANT_RPS")?)?
        .set_override_option("rate_limit.global_enabled", flag("RATE_LIMIT_GLOBAL_ENABLED"))?
        .set_override_option("rate_limit.tenant_enabled", flag("RATE_LIMIT_TENANT_ENABLED"))?
        .set_override_option(
            "rate_limit.endpoint_limits_enabled",
            flag("RATE_LIMIT_ENDPOINT_ENABLED"),
        )?
        .set_override_option("rate_limit.exempt_paths", exempt_paths)?
        .set_override_option("rate_limit.redis_url", env("REDIS_URL").filter(|u| !u.is_empty()))?
        .set_override_option("rate_limit.key_prefix", env("RATE_LIMIT_KEY_PREFIX"))?;
    Ok(builder)
}
