use std::{fs, path::Path};

use serde::Deserialize;
use setup_core::DEFAULT_SAMPLE_AMOUNT;

pub const CONFIG_FILE: &str = "meter-setup.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub server_url: String,
    pub secret: Option<String>,
    pub sample_amount: u32,
    pub fetch_history: bool,
    pub log_level: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8099".into(),
            secret: None,
            sample_amount: DEFAULT_SAMPLE_AMOUNT,
            fetch_history: false,
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    server_url: Option<String>,
    secret: Option<String>,
    sample_amount: Option<u32>,
    fetch_history: Option<bool>,
    log_level: Option<String>,
}

/// Returns the merged config and, when the file exists but does not parse,
/// a diagnostic for the caller to log once tracing is installed.
pub fn load_config(path: Option<&Path>) -> (CliConfig, Option<String>) {
    load_config_with(path.unwrap_or(Path::new(CONFIG_FILE)), |key| {
        std::env::var(key).ok()
    })
}

/// Defaults, then the TOML file if it parses, then environment variables.
fn load_config_with<F>(path: &Path, env: F) -> (CliConfig, Option<String>)
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = CliConfig::default();
    let mut diagnostic = None;

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileConfig>(&raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.server_url {
                    config.server_url = v;
                }
                if let Some(v) = file_cfg.secret {
                    config.secret = Some(v);
                }
                if let Some(v) = file_cfg.sample_amount {
                    config.sample_amount = v;
                }
                if let Some(v) = file_cfg.fetch_history {
                    config.fetch_history = v;
                }
                if let Some(v) = file_cfg.log_level {
                    config.log_level = v;
                }
            }
            Err(err) => {
                diagnostic = Some(format!("ignoring malformed {}: {err}", path.display()));
            }
        }
    }

    if let Some(v) = env("METER_SERVER_URL") {
        config.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        config.server_url = v;
    }

    if let Some(v) = env("METER_SECRET") {
        config.secret = Some(v);
    }
    if let Some(v) = env("APP__SECRET") {
        config.secret = Some(v);
    }

    if let Some(v) = env("APP__SAMPLE_AMOUNT") {
        if let Ok(parsed) = v.parse::<u32>() {
            config.sample_amount = parsed;
        }
    }

    if let Some(v) = env("APP__FETCH_HISTORY") {
        config.fetch_history = matches!(v.trim(), "1" | "true" | "yes");
    }

    if let Some(v) = env("APP__LOG_LEVEL") {
        config.log_level = v;
    }

    (config, diagnostic)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
