//! Daemon core: owns the session mutex and the two deadline timers, and
//! implements the state transitions behind each verb in spec §4.6.
//!
//! Concurrency discipline (spec §5): anything that calls `scrypt::scrypt`
//! (`unlock`, `init`, `change_password`) runs its key derivation with
//! the session mutex *not* held, then takes the mutex only to apply the
//! resulting transition. Because another request can run in between,
//! every apply step re-validates against whatever the session now holds
//! rather than assuming nothing changed.

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::clipboard::{fingerprint, ClipboardBackend};
use crate::crypto::KdfParams;
use crate::error::WireError;
use crate::secrets::{is_valid_key, SecretMap};
use crate::session::{ClipboardPending, Session, Unlocked};
use crate::settings::Settings;
use crate::store;
use crate::timers::Timer;

pub struct Daemon {
  pub settings: Settings,
  stash_path: PathBuf,
  session: Mutex<Session>,
  inactivity_timer: Timer<()>,
  clipboard_timer: Timer<[u8; 32]>,
  clipboard: Arc<dyn ClipboardBackend>,
  stop: Mutex<bool>,
  stop_cv: Condvar,
}

impl Daemon {
  pub fn new(settings: Settings, clipboard: Arc<dyn ClipboardBackend>) -> Arc<Daemon> {
    let stash_path = settings.stash_path();
    Arc::new_cyclic(|weak: &Weak<Daemon>| {
      let weak_inactivity = weak.clone();
      let inactivity_timer = Timer::spawn(move |(), handle| {
        if let Some(daemon) = weak_inactivity.upgrade() {
          daemon.on_inactivity_fire(handle);
        }
      });
      let weak_clipboard = weak.clone();
      let clipboard_timer = Timer::spawn(move |fp, _handle| {
        if let Some(daemon) = weak_clipboard.upgrade() {
          daemon.on_clipboard_fire(fp);
        }
      });
      Daemon {
        settings,
        stash_path,
        session: Mutex::new(Session::default()),
        inactivity_timer,
        clipboard_timer,
        clipboard,
        stop: Mutex::new(false),
        stop_cv: Condvar::new(),
      }
    })
  }

  fn inactivity_timeout(&self) -> Duration {
    Duration::from_secs(self.settings.inactivity_lock_seconds)
  }

  fn clipboard_timeout(&self) -> Duration {
    Duration::from_secs(self.settings.clipboard_clear_seconds)
  }

  /// Re-arms the inactivity timer and bumps `last_activity` to `now`.
  /// Called by every handler that touches an unlocked session (spec
  /// §4.6: "every successful request while unlocked... resets the
  /// inactivity deadline").
  fn touch(&self, session: &mut Session, now: Instant) {
    session.touch(now);
    self.inactivity_timer.arm(now + self.inactivity_timeout(), ());
  }

  fn on_inactivity_fire(&self, handle: &Timer<()>) {
    let mut session = self.session.lock().unwrap();
    let last_activity = match session.last_activity() {
      Some(t) => t,
      None => return, // already locked: no-op
    };
    let timeout = self.inactivity_timeout();
    if last_activity.elapsed() >= timeout {
      session.lock();
      drop(session);
      self.clipboard_timer.cancel();
      tracing::info!("auto-locked after inactivity timeout");
    } else {
      let deadline = last_activity + timeout;
      drop(session);
      handle.arm(deadline, ());
    }
  }

  fn on_clipboard_fire(&self, fp: [u8; 32]) {
    let mut session = self.session.lock().unwrap();
    if let Some(unlocked) = session.unlocked_mut() {
      if let Some(pending) = &unlocked.clipboard_pending {
        if pending.fingerprint == fp {
          unlocked.clipboard_pending = None;
        }
      }
    }
    drop(session);
    self.clipboard.clear_if_fingerprint_matches(fp);
  }

  /// Creates a brand new stash. Out of the wire protocol proper (spec
  /// §1: first-run provisioning is assumed to have already happened),
  /// but implemented here so the daemon is independently usable and
  /// testable end to end.
  pub fn init_stash(&self, password: &str) -> Result<(), WireError> {
    if self.stash_path.exists() {
      return Err(WireError::Internal);
    }
    let kdf_params = KdfParams::default();
    let (key, salt) = store::init(&self.stash_path, password, &kdf_params).map_err(WireError::from)?;
    let mut session = self.session.lock().unwrap();
    let now = Instant::now();
    session.enter_unlocked(
      Unlocked {
        key,
        salt,
        kdf_params,
        secrets: SecretMap::new(),
        clipboard_pending: None,
      },
      now,
    );
    self.touch(&mut session, now);
    Ok(())
  }

  pub fn health(&self) -> serde_json::Value {
    let session = self.session.lock().unwrap();
    serde_json::json!({ "unlocked": session.is_unlocked(), "pid": std::process::id() })
  }

  /// spec §4.6 `unlock`. Derivation happens before the mutex is ever
  /// taken; the mutex is only held to read or apply the resulting
  /// state.
  pub fn unlock(&self, password: &str) -> Result<(), WireError> {
    let decrypted = store::load_with_password(&self.stash_path, password);

    match decrypted {
      Ok((secrets, salt, kdf_params, key)) => {
        let mut session = self.session.lock().unwrap();
        let now = Instant::now();
        if !session.is_unlocked() {
          self.clipboard_timer.cancel();
          session.enter_unlocked(
            Unlocked {
              key,
              salt,
              kdf_params,
              secrets,
              clipboard_pending: None,
            },
            now,
          );
        }
        // Already unlocked and the password still verifies:
        // idempotent success, current in-memory state (which may
        // have since diverged from the on-disk snapshot we just
        // decrypted) is left untouched.
        self.touch(&mut session, now);
        Ok(())
      }
      Err(e) => Err(WireError::from(e)),
    }
  }

  pub fn lock(&self) -> Result<(), WireError> {
    let mut session = self.session.lock().unwrap();
    session.lock();
    drop(session);
    self.inactivity_timer.cancel();
    self.clipboard_timer.cancel();
    Ok(())
  }

  pub fn list(&self) -> Result<Vec<String>, WireError> {
    let mut session = self.session.lock().unwrap();
    let now = Instant::now();
    let keys = session
      .unlocked()
      .ok_or(WireError::Locked)?
      .secrets
      .keys()
      .cloned()
      .collect();
    self.touch(&mut session, now);
    Ok(keys)
  }

  pub fn get(&self, key: &str) -> Result<String, WireError> {
    let mut session = self.session.lock().unwrap();
    let now = Instant::now();
    let unlocked = session.unlocked().ok_or(WireError::Locked)?;
    let value = unlocked.secrets.get(key).cloned().ok_or(WireError::NoSuchKey)?;
    self.touch(&mut session, now);
    Ok(value)
  }

  pub fn add(&self, key: &str, value: &str) -> Result<(), WireError> {
    if !is_valid_key(key) {
      return Err(WireError::InvalidKey);
    }
    let mut session = self.session.lock().unwrap();
    let now = Instant::now();
    {
      let unlocked = session.unlocked_mut().ok_or(WireError::Locked)?;
      unlocked.secrets.insert(key.to_string(), value.to_string());
      store::persist_with_key(&self.stash_path, &unlocked.secrets, &unlocked.key, &unlocked.kdf_params, &unlocked.salt)
        .map_err(WireError::from)?;
    }
    self.touch(&mut session, now);
    Ok(())
  }

  pub fn delete(&self, key: &str) -> Result<(), WireError> {
    let mut session = self.session.lock().unwrap();
    let now = Instant::now();
    {
      let unlocked = session.unlocked_mut().ok_or(WireError::Locked)?;
      if unlocked.secrets.remove(key).is_none() {
        return Err(WireError::NoSuchKey);
      }
      store::persist_with_key(&self.stash_path, &unlocked.secrets, &unlocked.key, &unlocked.kdf_params, &unlocked.salt)
        .map_err(WireError::from)?;
    }
    self.touch(&mut session, now);
    Ok(())
  }

  /// spec §4.6 `change_password`. Precondition is "any": the old
  /// password is verified, and the secret map obtained, by decrypting
  /// the file directly rather than reading the live session, so this
  /// works whether or not the daemon happens to be unlocked right now.
  /// The new key/salt are derived and the file re-persisted entirely
  /// before the session mutex is ever taken; the mutex is acquired only
  /// to adopt the new key/salt into the live session, if one exists.
  pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), WireError> {
    let (secrets, _, _, _) = store::load_with_password(&self.stash_path, old_password).map_err(WireError::from)?;

    let kdf_params = KdfParams::default();
    let (new_key, new_salt) =
      store::persist(&self.stash_path, &secrets, new_password, &kdf_params).map_err(WireError::from)?;

    let mut session = self.session.lock().unwrap();
    let now = Instant::now();
    if let Some(unlocked) = session.unlocked_mut() {
      unlocked.key = new_key;
      unlocked.salt = new_salt;
      unlocked.kdf_params = kdf_params;
      self.touch(&mut session, now);
    }
    Ok(())
  }

  pub fn schedule_clipboard_clear(&self, value: &str) -> Result<(), WireError> {
    let mut session = self.session.lock().unwrap();
    let now = Instant::now();
    let fp = fingerprint(value);
    let deadline = now + self.clipboard_timeout();
    {
      let unlocked = session.unlocked_mut().ok_or(WireError::Locked)?;
      unlocked.clipboard_pending = Some(ClipboardPending {
        fingerprint: fp,
        deadline,
      });
    }
    self.clipboard_timer.arm(deadline, fp);
    self.touch(&mut session, now);
    Ok(())
  }

  pub fn stop(&self) {
    self.inactivity_timer.cancel();
    self.clipboard_timer.cancel();
    *self.stop.lock().unwrap() = true;
    self.stop_cv.notify_all();
  }

  pub fn is_stopped(&self) -> bool {
    *self.stop.lock().unwrap()
  }

  pub fn wait_for_stop(&self) {
    let mut stopped = self.stop.lock().unwrap();
    while !*stopped {
      stopped = self.stop_cv.wait(stopped).unwrap();
    }
  }

  pub fn shutdown_timers(&self) {
    self.inactivity_timer.shutdown();
    self.clipboard_timer.shutdown();
  }

  pub fn stash_exists(&self) -> bool {
    self.stash_path.exists()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clipboard::test_support::FakeClipboard;

  fn daemon_in(dir: &std::path::Path) -> Arc<Daemon> {
    let mut settings = Settings::default();
    settings.data_directory = dir.to_path_buf();
    settings.inactivity_lock_seconds = 1;
    settings.clipboard_clear_seconds = 1;
    Daemon::new(settings, Arc::new(FakeClipboard::default()))
  }

  #[test]
  fn init_then_unlock_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    d.lock().unwrap();
    assert!(!d.health()["unlocked"].as_bool().unwrap());
    d.unlock("hunter2").unwrap();
    assert!(d.health()["unlocked"].as_bool().unwrap());
    d.shutdown_timers();
  }

  #[test]
  fn operations_while_locked_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    d.lock().unwrap();
    assert!(matches!(d.list(), Err(WireError::Locked)));
    assert!(matches!(d.get("x"), Err(WireError::Locked)));
    assert!(matches!(d.add("x", "y"), Err(WireError::Locked)));
    d.shutdown_timers();
  }

  #[test]
  fn add_then_get_then_delete() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    d.add("work/api-key", "abc123").unwrap();
    assert_eq!(d.get("work/api-key").unwrap(), "abc123");
    assert_eq!(d.list().unwrap(), vec!["work/api-key".to_string()]);
    d.delete("work/api-key").unwrap();
    assert!(matches!(d.get("work/api-key"), Err(WireError::NoSuchKey)));
    d.shutdown_timers();
  }

  #[test]
  fn unlock_wrong_password_does_not_unlock() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    d.lock().unwrap();
    assert!(matches!(d.unlock("wrong"), Err(WireError::WrongPassword)));
    assert!(!d.health()["unlocked"].as_bool().unwrap());
    d.shutdown_timers();
  }

  #[test]
  fn change_password_then_old_password_fails() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    d.add("k", "v").unwrap();
    d.change_password("hunter2", "hunter3").unwrap();
    d.lock().unwrap();
    assert!(matches!(d.unlock("hunter2"), Err(WireError::WrongPassword)));
    d.unlock("hunter3").unwrap();
    assert_eq!(d.get("k").unwrap(), "v");
    d.shutdown_timers();
  }

  #[test]
  fn change_password_works_while_locked() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    d.add("k", "v").unwrap();
    d.lock().unwrap();

    d.change_password("hunter2", "hunter3").unwrap();
    assert!(matches!(d.unlock("hunter2"), Err(WireError::WrongPassword)));
    d.unlock("hunter3").unwrap();
    assert_eq!(d.get("k").unwrap(), "v");
    d.shutdown_timers();
  }

  #[test]
  fn change_password_wrong_old_password_while_locked() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    d.lock().unwrap();
    assert!(matches!(
      d.change_password("wrong", "hunter3"),
      Err(WireError::WrongPassword)
    ));
    d.shutdown_timers();
  }

  #[test]
  fn auto_locks_after_inactivity_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    std::thread::sleep(Duration::from_millis(1300));
    assert!(!d.health()["unlocked"].as_bool().unwrap());
    d.shutdown_timers();
  }

  #[test]
  fn activity_postpones_auto_lock() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    std::thread::sleep(Duration::from_millis(700));
    d.list().unwrap(); // resets the deadline
    std::thread::sleep(Duration::from_millis(700));
    assert!(d.health()["unlocked"].as_bool().unwrap());
    std::thread::sleep(Duration::from_millis(700));
    assert!(!d.health()["unlocked"].as_bool().unwrap());
    d.shutdown_timers();
  }

  #[test]
  fn clipboard_clears_after_deadline_if_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    d.clipboard.set_text("s3cr3t").unwrap();
    d.schedule_clipboard_clear("s3cr3t").unwrap();
    std::thread::sleep(Duration::from_millis(1300));
    assert_eq!(d.clipboard.get_text().unwrap(), "");
    d.shutdown_timers();
  }

  #[test]
  fn clipboard_clear_skips_if_value_changed() {
    let dir = tempfile::tempdir().unwrap();
    let d = daemon_in(dir.path());
    d.init_stash("hunter2").unwrap();
    d.clipboard.set_text("s3cr3t").unwrap();
    d.schedule_clipboard_clear("s3cr3t").unwrap();
    d.clipboard.set_text("something-else").unwrap();
    std::thread::sleep(Duration::from_millis(1300));
    assert_eq!(d.clipboard.get_text().unwrap(), "something-else");
    d.shutdown_timers();
  }
}
