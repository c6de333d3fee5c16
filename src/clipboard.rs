//! Clipboard backend (C7). Spec §1 treats the OS clipboard as an opaque
//! external collaborator ("set text" / "clear if equals X"); this module
//! defines that boundary as a trait so the daemon's compare-and-clear
//! logic (spec §4.4, §4.6) is testable without a real display server, and
//! provides the real implementation over `arboard` (the crate the teacher
//! uses for `copy_secret`).

use sha2::{Digest, Sha256};

pub trait ClipboardBackend: Send + Sync {
  fn set_text(&self, value: &str) -> Result<(), String>;
  fn get_text(&self) -> Result<String, String>;

  /// Clears the clipboard only if its current contents still equal
  /// `expected` (spec §4.4: "this prevents wiping data the user has
  /// since copied from elsewhere").
  fn clear_if_equals(&self, expected: &str) {
    match self.get_text() {
      Ok(current) if current == expected => {
        let _ = self.set_text("");
      }
      _ => {}
    }
  }

  /// Same compare-and-clear, but against a retained fingerprint rather
  /// than the plaintext value - the form the daemon actually uses,
  /// since it never retains the copied value itself (spec §4.6).
  fn clear_if_fingerprint_matches(&self, expected: [u8; 32]) {
    match self.get_text() {
      Ok(current) if fingerprint(&current) == expected => {
        let _ = self.set_text("");
      }
      _ => {}
    }
  }
}

/// One-way fingerprint of a clipboard value. The daemon retains only
/// this, never the value itself (spec §4.6).
pub fn fingerprint(value: &str) -> [u8; 32] {
  let mut hasher = Sha256::new();
  hasher.update(value.as_bytes());
  hasher.finalize().into()
}

pub struct ArboardClipboard;

impl ClipboardBackend for ArboardClipboard {
  fn set_text(&self, value: &str) -> Result<(), String> {
    let mut clipboard = arboard::Clipboard::new().map_err(|e| format!("clipboard init failed: {e}"))?;
    clipboard
      .set_text(value.to_string())
      .map_err(|e| format!("clipboard set failed: {e}"))
  }

  fn get_text(&self) -> Result<String, String> {
    let mut clipboard = arboard::Clipboard::new().map_err(|e| format!("clipboard init failed: {e}"))?;
    clipboard.get_text().map_err(|e| format!("clipboard get failed: {e}"))
  }
}

#[cfg(test)]
pub mod test_support {
  use super::ClipboardBackend;
  use std::sync::Mutex;

  /// In-memory clipboard used by tests that need deterministic,
  /// display-server-free compare-and-clear behaviour (property 7).
  #[derive(Default)]
  pub struct FakeClipboard {
    contents: Mutex<String>,
  }

  impl FakeClipboard {
    pub fn new(initial: &str) -> Self {
      Self {
        contents: Mutex::new(initial.to_string()),
      }
    }
  }

  impl ClipboardBackend for FakeClipboard {
    fn set_text(&self, value: &str) -> Result<(), String> {
      *self.contents.lock().unwrap() = value.to_string();
      Ok(())
    }

    fn get_text(&self) -> Result<String, String> {
      Ok(self.contents.lock().unwrap().clone())
    }
  }
}
