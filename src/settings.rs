//! Settings (spec §3 "Settings", §6 "Configuration inputs"). Read-only to
//! the core; the daemon binary layers compiled-in defaults, an optional
//! `config.toml` in the data directory, then CLI flags, in that order.

use std::path::{Path, PathBuf};

use serde::Deserialize;

fn default_inactivity_lock_seconds() -> u64 {
  900
}

fn default_clipboard_clear_seconds() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  #[serde(default = "default_inactivity_lock_seconds")]
  pub inactivity_lock_seconds: u64,
  #[serde(default = "default_clipboard_clear_seconds")]
  pub clipboard_clear_seconds: u64,
  #[serde(skip)]
  pub data_directory: PathBuf,
}

impl Default for Settings {
  fn default() -> Self {
    Settings {
      inactivity_lock_seconds: default_inactivity_lock_seconds(),
      clipboard_clear_seconds: default_clipboard_clear_seconds(),
      data_directory: PathBuf::new(),
    }
  }
}

impl Settings {
  /// Loads `config.toml` from `data_directory` if present, falling back
  /// to defaults for anything missing or for a wholly absent file.
  pub fn load(data_directory: PathBuf) -> Self {
    let config_path = data_directory.join("config.toml");
    let mut settings = read_config_file(&config_path).unwrap_or_default();
    settings.data_directory = data_directory;
    settings
  }

  pub fn stash_path(&self) -> PathBuf {
    self.data_directory.join("stash.json")
  }

  pub fn socket_path(&self) -> PathBuf {
    self.data_directory.join("daemon.sock")
  }

  pub fn pid_path(&self) -> PathBuf {
    self.data_directory.join("daemon.pid")
  }
}

fn read_config_file(path: &Path) -> Option<Settings> {
  let raw = std::fs::read_to_string(path).ok()?;
  match toml::from_str(&raw) {
    Ok(settings) => Some(settings),
    Err(e) => {
      tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config.toml, using defaults");
      None
    }
  }
}
