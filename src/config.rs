//! Service configuration: optional TOML file plus environment overrides.
//!
//! TOML schema (every key optional):
//!
//! ```toml
//! [server]
//! port = 3000
//! static_dir = "./static"
//! session_idle_secs = 3600   # 0 keeps idle drafts forever
//!
//! [backend]
//! base_url = "http://localhost:8000/api"
//! api_key = "..."
//! timeout_secs = 60
//! ```

use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default, PartialEq)]
pub struct ServiceConfig {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub backend: BackendConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
  pub port: u16,
  pub static_dir: String,
  pub session_idle_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self { port: 3000, static_dir: "./static".into(), session_idle_secs: 3600 }
  }
}

impl ServerConfig {
  /// How long an untouched draft is kept; `None` disables the sweep.
  pub fn session_idle(&self) -> Option<Duration> {
    (self.session_idle_secs > 0).then(|| Duration::from_secs(self.session_idle_secs))
  }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
  pub base_url: String,
  pub api_key: Option<String>,
  pub timeout_secs: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000/api".into(),
      api_key: None,
      // Generation calls run user code on the backend; keep this generous.
      timeout_secs: 60,
    }
  }
}

impl ServiceConfig {
  /// Load from QFORGE_CONFIG_PATH (if set and valid), then apply PORT,
  /// BACKEND_BASE_URL and BACKEND_API_KEY overrides.
  pub fn from_env() -> Self {
    let mut cfg = load_file_from_env().unwrap_or_default();
    cfg.apply_overrides(|k| std::env::var(k).ok());
    cfg
  }

  fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
    if let Some(port) = var("PORT").and_then(|p| p.parse::<u16>().ok()) {
      self.server.port = port;
    }
    if let Some(url) = var("BACKEND_BASE_URL").filter(|u| !u.is_empty()) {
      self.backend.base_url = url;
    }
    if let Some(key) = var("BACKEND_API_KEY") {
      self.backend.api_key = Some(key);
    }
  }
}

/// On any parsing/IO error, returns None and the defaults apply.
fn load_file_from_env() -> Option<ServiceConfig> {
  let path = std::env::var("QFORGE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<ServiceConfig>(&s) {
      Ok(cfg) => {
        info!(target: "qforge_backend", %path, "Loaded service config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "qforge_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "qforge_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
