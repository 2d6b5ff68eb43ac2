use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{DEFAULT_CAPACITY_BYTES, DEFAULT_SWEEP_INTERVAL};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub firestore: FirestoreConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreConfig {
  pub project_id: String,
  /// Database id, "(default)" unless the project uses named databases
  #[serde(default = "default_database")]
  pub database: String,
  /// API origin; point at the emulator for local runs
  #[serde(default = "default_base_url")]
  pub base_url: String,
}

fn default_database() -> String {
  "(default)".to_string()
}

fn default_base_url() -> String {
  "https://firestore.googleapis.com".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Disable to send every read to Firestore
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  /// Cache database path (defaults to a per-project file in the data directory)
  pub path: Option<PathBuf>,
  #[serde(default = "default_capacity")]
  pub capacity_bytes: usize,
  #[serde(default = "default_sweep_interval")]
  pub sweep_interval_secs: u64,
}

fn default_enabled() -> bool {
  true
}

fn default_capacity() -> usize {
  DEFAULT_CAPACITY_BYTES
}

fn default_sweep_interval() -> u64 {
  DEFAULT_SWEEP_INTERVAL.as_secs()
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: default_enabled(),
      path: None,
      capacity_bytes: default_capacity(),
      sweep_interval_secs: default_sweep_interval(),
    }
  }
}

impl CacheConfig {
  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fmcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fmcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/fmcache/config.yaml\n\
                 with at least `firestore: {{ project_id: <your project> }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fmcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fmcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate YAML configuration.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;

    if config.firestore.project_id.trim().is_empty() {
      return Err(eyre!("firestore.project_id must not be empty"));
    }
    if config.cache.sweep_interval_secs == 0 {
      return Err(eyre!("cache.sweep_interval_secs must be greater than zero"));
    }

    Ok(config)
  }

  /// Get the Firestore access token from environment variables.
  ///
  /// Checks FMCACHE_TOKEN first, then FIRESTORE_TOKEN as fallback. Without a
  /// token requests go out unauthenticated, which the emulator accepts.
  pub fn get_token() -> Option<String> {
    std::env::var("FMCACHE_TOKEN")
      .or_else(|_| std::env::var("FIRESTORE_TOKEN"))
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}
