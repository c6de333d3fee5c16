//! stashd - entry point.
//!
//! Lays settings, starts the socket server, and installs SIGTERM/SIGINT
//! handling so the daemon tears itself down cleanly (wipes the session,
//! removes its socket and pid file) instead of leaving stale state
//! behind for the next launch.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use stashd::clipboard::ArboardClipboard;
use stashd::daemon::Daemon;
use stashd::server::{self, PidLock};
use stashd::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "stashd", about = "Local encrypted secret stash daemon")]
struct Cli {
  /// Directory holding stash.json, daemon.sock, daemon.pid and config.toml.
  #[arg(long)]
  data_dir: Option<PathBuf>,

  #[arg(long)]
  inactivity_lock_seconds: Option<u64>,

  #[arg(long)]
  clipboard_clear_seconds: Option<u64>,
}

fn default_data_dir() -> PathBuf {
  std::env::var_os("STASHD_DATA_DIR")
    .map(PathBuf::from)
    .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".stashd")))
    .unwrap_or_else(|| PathBuf::from("."))
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();
  let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

  if let Err(e) = std::fs::create_dir_all(&data_dir) {
    tracing::error!(error = %e, dir = %data_dir.display(), "failed to create data directory");
    std::process::exit(1);
  }

  let mut settings = Settings::load(data_dir);
  if let Some(v) = cli.inactivity_lock_seconds {
    settings.inactivity_lock_seconds = v;
  }
  if let Some(v) = cli.clipboard_clear_seconds {
    settings.clipboard_clear_seconds = v;
  }

  let pid_lock = match PidLock::acquire(&settings.pid_path()) {
    Ok(lock) => lock,
    Err(e) => {
      tracing::error!(error = %e, "failed to acquire daemon.pid lock; another instance may be running");
      std::process::exit(1);
    }
  };

  let listener = match server::bind(&settings.socket_path()) {
    Ok(l) => l,
    Err(e) => {
      tracing::error!(error = %e, "failed to bind socket");
      std::process::exit(1);
    }
  };

  let daemon = Daemon::new(settings, Arc::new(ArboardClipboard));

  let signal_daemon = daemon.clone();
  let mut signals = Signals::new([SIGTERM, SIGINT]).expect("registering signal handlers");
  std::thread::spawn(move || {
    for signal in signals.forever() {
      tracing::info!(signal, "received shutdown signal");
      signal_daemon.stop();
      break;
    }
  });

  tracing::info!("stashd listening");
  server::serve(daemon.clone(), listener);
  daemon.shutdown_timers();
  drop(pid_lock);
  tracing::info!("stashd stopped");
}
