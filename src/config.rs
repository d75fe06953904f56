// =============================================================================
// Configuration — feeds, gateway, cron, and HFT sections
// =============================================================================
//
// Loaded from a JSON file on disk with the same atomic tmp+rename discipline
// `RuntimeConfig` uses, plus `${ENV}` substitution applied to every feed
// credential field at load time. Every section carries `#[serde(default)]`
// so an older or partial config file still deserializes cleanly.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::hft::HftEngineConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    3001
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_rate_limit_per_min() -> u32 {
    100
}

/// One venue's feed configuration. `enabled` gates whether the Feed Manager
/// constructs and registers an adapter for it; credential fields are
/// venue-specific and carried as a flat string map so new venues don't
/// require a schema change here.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten, default)]
    pub credentials: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CorsMode {
    #[default]
    Disabled,
    AllowList,
    Wildcard,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    #[serde(default)]
    pub mode: CorsMode,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default = "default_rate_limit_per_min")]
    pub rate_limit_per_min: u32,
    #[serde(default)]
    pub force_https: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            cors: CorsConfig::default(),
            rate_limit_per_min: default_rate_limit_per_min(),
            force_https: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CronConfig {
    /// Overrides the bootstrap `alertScan` interval (default 30_000ms).
    #[serde(default)]
    pub alert_scan_interval_ms: Option<i64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Top-level configuration the core consumes. See spec section 6.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub feeds: HashMap<String, FeedConfig>,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub hft: HftEngineConfig,
}

impl Config {
    /// Load from `path`, applying `${ENV}` substitution to every feed
    /// credential value. Missing env vars leave the literal `${NAME}` token
    /// in place rather than erroring, matching the source's permissive
    /// substitution behavior.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;

        let mut config: Self =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path_ref.display().to_string(),
                source,
            })?;

        config.substitute_env();

        info!(
            path = %path_ref.display(),
            venues = ?config.feeds.keys().collect::<Vec<_>>(),
            "config loaded"
        );
        Ok(config)
    }

    /// Persist the current configuration using an atomic write (temp file +
    /// rename), the same pattern `RuntimeConfig::save` uses.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn substitute_env(&mut self) {
        for feed in self.feeds.values_mut() {
            for value in feed.credentials.values_mut() {
                *value = substitute_env_str(value);
            }
        }
    }

    pub fn feed_enabled(&self, venue: &str) -> bool {
        self.feeds.get(venue).map(|f| f.enabled).unwrap_or(false)
    }

    /// Read a credential for `venue` either from the config file (after
    /// `${ENV}` substitution) or, failing that, directly from the
    /// environment — the two sources spec section 6 allows.
    pub fn credential(&self, venue: &str, key: &str) -> Option<String> {
        if let Some(value) = self
            .feeds
            .get(venue)
            .and_then(|f| f.credentials.get(key))
            .filter(|v| !v.is_empty())
        {
            return Some(value.clone());
        }
        let env_key = format!("{}_{}", venue.to_uppercase(), key.to_uppercase());
        std::env::var(env_key).ok()
    }
}

/// Replace every `${VAR}` occurrence in `value` with the environment
/// variable's value. Unknown variables are left untouched and a warning is
/// logged so a misconfigured deployment is visible in the logs rather than
/// silently trading with an empty credential.
fn substitute_env_str(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            result.push_str(rest);
            return result;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + end];
        match std::env::var(var_name) {
            Ok(val) => result.push_str(&val),
            Err(_) => {
                warn!(var = %var_name, "config references unset environment variable");
                result.push_str(&rest[start..start + end + 1]);
            }
        }
        rest = &rest[start + end + 1..];
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_env_replaces_known_var() {
        std::env::set_var("CLODDS_TEST_VAR", "secret123");
        assert_eq!(substitute_env_str("${CLODDS_TEST_VAR}"), "secret123");
        assert_eq!(
            substitute_env_str("prefix-${CLODDS_TEST_VAR}-suffix"),
            "prefix-secret123-suffix"
        );
    }

    #[test]
    fn substitute_env_leaves_unknown_var_untouched() {
        assert_eq!(
            substitute_env_str("${CLODDS_DEFINITELY_UNSET_VAR}"),
            "${CLODDS_DEFINITELY_UNSET_VAR}"
        );
    }

    #[test]
    fn default_config_has_default_gateway_port() {
        let cfg = Config::default();
        assert_eq!(cfg.gateway.port, 3001);
        assert!(!cfg.feed_enabled("polymarket"));
    }
}
