//! Server configuration, resolved once at startup and injected.

use std::env;
use std::path::PathBuf;

use proctor_signald::RuleConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub inference_url: String,
    pub inference_timeout_ms: u64,
    pub rule: RuleConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            db_path: PathBuf::from("proctor.db"),
            inference_url: "http://localhost:8001".to_string(),
            inference_timeout_ms: 2_500,
            rule: RuleConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // Rule thresholds come from a config file when one is named,
        // otherwise from individual env overrides.
        let rule = match env::var("PROCTOR_RULE_CONFIG") {
            Ok(path) => RuleConfig::from_file(&PathBuf::from(&path)).unwrap_or_else(|e| {
                tracing::warn!("ignoring rule config file {path}: {e}");
                RuleConfig::from_env()
            }),
            Err(_) => RuleConfig::from_env(),
        };

        Self {
            port: env::var("PROCTOR_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            db_path: env::var("PROCTOR_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            inference_url: env::var("PROCTOR_INFERENCE_URL").unwrap_or(defaults.inference_url),
            inference_timeout_ms: env::var("PROCTOR_INFERENCE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.inference_timeout_ms),
            rule,
        }
    }
}
