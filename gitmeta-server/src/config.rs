//! Layered TOML configuration.
//!
//! `app.toml` is loaded first, then `<env>.app.toml` deep-merged over it,
//! so an environment file only needs to spell the keys it overrides.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, bail};
use clap::ValueEnum;
use gitmeta_core::ManagerConfig;
use serde::Deserialize;
use toml::Value;
use toml::map::Entry;

pub const BASE_CONFIG_FILE: &str = "app.toml";
pub const DEFAULT_HTTP_PORT: u16 = 9500;
pub const DEFAULT_APP_NAME: &str = "gitmeta";

/// Deployment environment, selected via `APP_ENV` or `--env`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum AppEnv {
    #[default]
    Dev,
    Test,
    Prod,
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppEnv::Dev => "dev",
            AppEnv::Test => "test",
            AppEnv::Prod => "prod",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    pub manager: ManagerConfig,
    #[serde(default)]
    pub plugins: HashMap<String, PluginToggle>,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            http_port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginToggle {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Names of plugins with `enabled = true`.
    pub fn enabled_plugins(&self) -> std::collections::HashSet<String> {
        self.plugins
            .iter()
            .filter(|(_, toggle)| toggle.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Load and merge the configuration for `env` from `config_dir`.
pub fn load(config_dir: &Path, env: AppEnv) -> anyhow::Result<AppConfig> {
    let mut merged = toml::Table::new();
    let mut found = false;

    let candidates = [BASE_CONFIG_FILE.to_string(), format!("{env}.{BASE_CONFIG_FILE}")];
    for name in &candidates {
        let path = config_dir.join(name);
        if !path.is_file() {
            continue;
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let table: toml::Table = text
            .parse()
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        merge_tables(&mut merged, table);
        found = true;
    }

    if !found {
        bail!(
            "no config files found in {} (expected {} or {})",
            config_dir.display(),
            candidates[0],
            candidates[1]
        );
    }

    let config: AppConfig = Value::Table(merged)
        .try_into()
        .context("invalid configuration")?;
    Ok(config)
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match base.entry(key) {
            Entry::Occupied(mut slot) => match (slot.get_mut(), value) {
                (Value::Table(existing), Value::Table(incoming)) => {
                    merge_tables(existing, incoming);
                }
                (slot_value, value) => *slot_value = value,
            },
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }
    }
}
