//! Socket server (C5): a Unix domain socket, one OS thread per connection,
//! one request/response per connection (spec §4.5, §9).
//!
//! Stale-socket recovery follows spec §9's suggested approach: a
//! `daemon.pid` file holds an exclusive advisory lock for as long as the
//! daemon owning it is alive. Startup tries to take that lock; failure
//! means another instance is running and we refuse to start. Success
//! means any leftover `daemon.sock` from a crashed previous run is safe
//! to unlink and rebind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::daemon::Daemon;
use crate::error::WireError;
use crate::handlers;
use crate::protocol::{Request, Response};

const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PidLock {
  path: PathBuf,
  file: File,
}

impl PidLock {
  /// Takes an exclusive, non-blocking lock on `path`, writing the
  /// current pid once acquired. Fails if another live process holds it.
  pub fn acquire(path: &Path) -> io::Result<PidLock> {
    let file = OpenOptions::new().create(true).write(true).read(true).open(path)?;
    flock_exclusive_nonblocking(&file)?;
    file.set_len(0)?;
    let mut f = &file;
    write!(f, "{}", std::process::id())?;
    f.sync_all()?;
    Ok(PidLock {
      path: path.to_path_buf(),
      file,
    })
  }
}

impl Drop for PidLock {
  fn drop(&mut self) {
    let _ = fs::remove_file(&self.path);
  }
}

fn flock_exclusive_nonblocking(file: &File) -> io::Result<()> {
  use std::os::unix::io::AsRawFd;
  // SAFETY: `file` outlives the call and its fd is valid.
  let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
  if rc != 0 {
    return Err(io::Error::new(
      io::ErrorKind::WouldBlock,
      "another stashd instance already holds daemon.pid",
    ));
  }
  Ok(())
}

/// Binds the listener at `socket_path`, unlinking a stale socket file
/// first (we only get here after winning the pid lock, so any leftover
/// socket belongs to a dead process).
pub fn bind(socket_path: &Path) -> io::Result<UnixListener> {
  if socket_path.exists() {
    fs::remove_file(socket_path)?;
  }
  let listener = UnixListener::bind(socket_path)?;
  fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600))?;
  Ok(listener)
}

/// Runs the accept loop on the calling thread until the daemon is told
/// to stop. Each connection gets its own thread and handles exactly one
/// request before closing (spec §4.5).
pub fn serve(daemon: Arc<Daemon>, listener: UnixListener) {
  let stopper = daemon.clone();
  let listener_path = listener.local_addr().ok().and_then(|a| a.as_pathname().map(Path::to_path_buf));
  thread::spawn(move || {
    stopper.wait_for_stop();
    // Dial our own socket once to unblock `accept()`.
    if let Some(path) = &listener_path {
      let _ = UnixStream::connect(path);
    }
  });

  for conn in listener.incoming() {
    if daemon.is_stopped() {
      break;
    }
    match conn {
      Ok(stream) => {
        let daemon = daemon.clone();
        thread::spawn(move || handle_connection(&daemon, stream));
      }
      Err(e) => {
        tracing::warn!(error = %e, "accept failed");
      }
    }
  }
}

fn handle_connection(daemon: &Daemon, stream: UnixStream) {
  let _ = stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT));
  let mut reader = BufReader::new(&stream);
  let mut line = String::new();

  let n = match reader.read_line(&mut line) {
    Ok(n) => n,
    Err(e) => {
      tracing::debug!(error = %e, "connection read failed");
      return;
    }
  };
  if n == 0 {
    // EOF with no data: the self-dial wakeup used to unblock accept().
    return;
  }

  let response = match serde_json::from_str::<Request>(&line) {
    Ok(req) => handlers::dispatch(daemon, req),
    Err(_) => Response::failure(WireError::BadRequest),
  };

  let mut writer = &stream;
  let _ = writer.write_all(response.to_line().as_bytes());
}
