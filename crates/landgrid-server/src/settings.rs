//! Server configuration, read from a TOML file and `LANDGRID_*` variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use landgrid_core::engine::EngineSettings;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                  String,
  #[serde(default = "default_port")]
  pub port:                  u16,
  #[serde(default = "default_store_path")]
  pub store_path:            PathBuf,
  /// Resolution of the production grids and the derived aggregate.
  #[serde(default = "default_resolution")]
  pub resolution:            u8,
  /// Percent per year applied to projected table values.
  #[serde(default = "default_growth_rate")]
  pub growth_rate:           f64,
  /// Seconds between scheduled aggregate refreshes; 0 disables them.
  #[serde(default)]
  pub refresh_interval_secs: u64,
}

fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8640 }
fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/landgrid/landgrid.db") }
fn default_resolution() -> u8 { EngineSettings::default().resolution }
fn default_growth_rate() -> f64 { EngineSettings::default().growth_rate }

impl ServerConfig {
  /// Layer the optional file at `path` under the environment.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix("LANDGRID"))
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  pub fn engine_settings(&self) -> EngineSettings {
    EngineSettings { resolution: self.resolution, growth_rate: self.growth_rate }
  }

  pub fn refresh_interval(&self) -> Option<Duration> {
    (self.refresh_interval_secs > 0)
      .then(|| Duration::from_secs(self.refresh_interval_secs))
  }

  /// `store_path` with a leading `~` expanded to the user's home directory.
  pub fn resolved_store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
