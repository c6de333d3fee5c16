//! Error types.
//!
//! Internal errors (`CryptoError`, `StoreError`) carry detail useful for
//! logs. `WireError` is the stable §7 tag set that actually crosses the
//! socket; handlers map everything else down to `WireError::Internal` so
//! implementation detail (and anything sensitive) never reaches a client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
  #[error("kdf parameters out of range: {0}")]
  KdfParam(String),
  #[error("insufficient memory for key derivation")]
  Resource,
  #[error("authentication failed")]
  Auth,
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("stash file not found")]
  NoStash,
  #[error("stash file is corrupt: {0}")]
  Corrupt(String),
  #[error(transparent)]
  Crypto(#[from] CryptoError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// The stable wire tag set from spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
  Locked,
  WrongPassword,
  NoStash,
  CorruptStash,
  NoSuchKey,
  InvalidKey,
  BadRequest,
  Internal,
}

impl WireError {
  pub fn tag(self) -> &'static str {
    match self {
      WireError::Locked => "Locked",
      WireError::WrongPassword => "WrongPassword",
      WireError::NoStash => "NoStash",
      WireError::CorruptStash => "CorruptStash",
      WireError::NoSuchKey => "NoSuchKey",
      WireError::InvalidKey => "InvalidKey",
      WireError::BadRequest => "BadRequest",
      WireError::Internal => "Internal",
    }
  }

  pub fn message(self) -> &'static str {
    match self {
      WireError::Locked => "the stash is locked",
      WireError::WrongPassword => "wrong password",
      WireError::NoStash => "no stash has been initialized",
      WireError::CorruptStash => "stash file is malformed or has an unsupported version",
      WireError::NoSuchKey => "no secret with that key",
      WireError::InvalidKey => "key fails validity rules",
      WireError::BadRequest => "malformed request",
      WireError::Internal => "internal error",
    }
  }
}

impl From<StoreError> for WireError {
  fn from(e: StoreError) -> Self {
    match e {
      StoreError::NoStash => WireError::NoStash,
      StoreError::Corrupt(_) => WireError::CorruptStash,
      StoreError::Crypto(CryptoError::Auth) => WireError::WrongPassword,
      StoreError::Crypto(_) | StoreError::Io(_) => WireError::Internal,
    }
  }
}
