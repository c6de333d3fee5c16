//! Session state (C3): the locked/unlocked state machine held exclusively
//! behind the daemon's single mutex (spec §4.3).

use std::time::Instant;

use zeroize::Zeroizing;

use crate::crypto::{KdfParams, KEY_LEN, SALT_LEN};
use crate::secrets::SecretMap;

/// Everything that exists only while the stash is unlocked. Dropping this
/// zeroizes the key (via `Zeroizing`) and the secret values (via
/// `SecretMap`'s `String` values being overwritten is not automatic, so
/// `Unlocked::wipe` is called explicitly before the struct is dropped).
pub struct Unlocked {
  pub key: Zeroizing<[u8; KEY_LEN]>,
  pub salt: [u8; SALT_LEN],
  pub kdf_params: KdfParams,
  pub secrets: SecretMap,
  pub clipboard_pending: Option<ClipboardPending>,
}

impl Unlocked {
  /// Best-effort overwrite of secret values before the map is dropped.
  /// `String` has no `Zeroize` impl in this crate's dependency set, so
  /// we do it by hand: fill each value's backing bytes with zero before
  /// truncating, mirroring what the teacher's `Entry::zeroize` does for
  /// its password field.
  fn wipe(&mut self) {
    for value in self.secrets.values_mut() {
      // SAFETY: we immediately clear/truncate the string afterwards,
      // so the (briefly) invalid UTF-8 content is never read as str.
      unsafe {
        for byte in value.as_bytes_mut() {
          *byte = 0;
        }
      }
      value.clear();
    }
    self.secrets.clear();
  }
}

impl Drop for Unlocked {
  fn drop(&mut self) {
    self.wipe();
  }
}

/// A clipboard-clear timer armed by `schedule_clipboard_clear`, keyed by
/// a fingerprint rather than the value itself (spec §4.6).
#[derive(Clone)]
pub struct ClipboardPending {
  pub fingerprint: [u8; 32],
  pub deadline: Instant,
}

/// The session: locked or unlocked, plus the bookkeeping the timers need.
pub enum Session {
  Locked,
  Unlocked {
    state: Unlocked,
    last_activity: Instant,
  },
}

impl Default for Session {
  fn default() -> Self {
    Session::Locked
  }
}

impl Session {
  pub fn is_unlocked(&self) -> bool {
    matches!(self, Session::Unlocked { .. })
  }

  /// Transitions into UNLOCKED. Any caller-held pending clipboard timer
  /// is the caller's job to cancel (spec §4.3: stale from a previous
  /// session); done by `Daemon::unlock` alongside this call.
  pub fn enter_unlocked(&mut self, state: Unlocked, now: Instant) {
    *self = Session::Unlocked {
      state,
      last_activity: now,
    };
  }

  /// Transitions into LOCKED, dropping (and so zeroizing) any unlocked
  /// state.
  pub fn lock(&mut self) {
    *self = Session::Locked;
  }

  pub fn touch(&mut self, now: Instant) {
    if let Session::Unlocked { last_activity, .. } = self {
      *last_activity = now;
    }
  }

  pub fn unlocked(&self) -> Option<&Unlocked> {
    match self {
      Session::Unlocked { state, .. } => Some(state),
      Session::Locked => None,
    }
  }

  pub fn unlocked_mut(&mut self) -> Option<&mut Unlocked> {
    match self {
      Session::Unlocked { state, .. } => Some(state),
      Session::Locked => None,
    }
  }

  pub fn last_activity(&self) -> Option<Instant> {
    match self {
      Session::Unlocked { last_activity, .. } => Some(*last_activity),
      Session::Locked => None,
    }
  }
}
