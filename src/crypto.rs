//! Crypto envelope (C1): password-to-key derivation and AEAD encryption of
//! a single blob.
//!
//! KDF is scrypt; cipher is AES-256-GCM with a 12-byte nonce and the
//! 16-byte tag appended to the ciphertext. See spec §4.1: "wrong
//! password" and "tampered ciphertext" are deliberately indistinguishable;
//! both map to [`CryptoError::Auth`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

/// scrypt cost parameters, persisted verbatim alongside the salt so a
/// future change in defaults never breaks an existing file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
  pub n: u32,
  pub r: u32,
  pub p: u32,
}

impl Default for KdfParams {
  fn default() -> Self {
    Self {
      n: 1 << 20,
      r: 8,
      p: 1,
    }
  }
}

impl KdfParams {
  fn log_n(&self) -> Result<u8, CryptoError> {
    if self.n < 2 || !self.n.is_power_of_two() {
      return Err(CryptoError::KdfParam(format!("n must be a power of two >= 2, got {}", self.n)));
    }
    Ok(self.n.trailing_zeros() as u8)
  }

  fn scrypt_params(&self) -> Result<scrypt::Params, CryptoError> {
    scrypt::Params::new(self.log_n()?, self.r, self.p, KEY_LEN)
      .map_err(|e| CryptoError::KdfParam(e.to_string()))
  }
}

pub fn random_salt() -> [u8; SALT_LEN] {
  let mut salt = [0u8; SALT_LEN];
  OsRng.fill_bytes(&mut salt);
  salt
}

fn random_nonce() -> [u8; NONCE_LEN] {
  let mut nonce = [0u8; NONCE_LEN];
  OsRng.fill_bytes(&mut nonce);
  nonce
}

/// Derives a 32-byte key from `password` and `salt` using the persisted
/// scrypt parameters. Cost parameters must match the stored record
/// verbatim; callers never substitute their own defaults here.
pub fn derive(password: &str, salt: &[u8; SALT_LEN], params: &KdfParams) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
  let scrypt_params = params.scrypt_params()?;
  let mut key = [0u8; KEY_LEN];
  scrypt::scrypt(password.as_bytes(), salt, &scrypt_params, &mut key)
    .map_err(|_| CryptoError::Resource)?;
  Ok(Zeroizing::new(key))
}

/// AEAD-encrypts `plaintext` under `key` with a fresh random nonce. The
/// 16-byte tag is appended to the returned ciphertext.
pub fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> ([u8; NONCE_LEN], Vec<u8>) {
  let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
  let nonce_bytes = random_nonce();
  let nonce = Nonce::from_slice(&nonce_bytes);
  // Empty associated data; a fresh nonce makes encryption infallible here.
  let ciphertext = cipher
    .encrypt(nonce, plaintext)
    .expect("AES-256-GCM encryption with a fresh nonce cannot fail");
  (nonce_bytes, ciphertext)
}

/// Decrypts `ciphertext_and_tag`. Returns [`CryptoError::Auth`] iff the
/// tag does not verify; the sole authoritative test of "correct
/// password" (spec §3).
pub fn decrypt(
  key: &[u8; KEY_LEN],
  nonce: &[u8; NONCE_LEN],
  ciphertext_and_tag: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
  let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
  let plaintext = cipher
    .decrypt(Nonce::from_slice(nonce), ciphertext_and_tag)
    .map_err(|_| CryptoError::Auth)?;
  Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fast_params() -> KdfParams {
    // Small n keeps unit tests fast; production default stays 2^20.
    KdfParams { n: 1 << 4, r: 8, p: 1 }
  }

  #[test]
  fn round_trip() {
    let salt = random_salt();
    let params = fast_params();
    let key = derive("hunter2", &salt, &params).unwrap();
    let (nonce, ct) = encrypt(&key, b"hello world");
    let pt = decrypt(&key, &nonce, &ct).unwrap();
    assert_eq!(&pt[..], b"hello world");
  }

  #[test]
  fn wrong_password_is_auth_error() {
    let salt = random_salt();
    let params = fast_params();
    let key = derive("hunter2", &salt, &params).unwrap();
    let (nonce, ct) = encrypt(&key, b"hello world");

    let wrong_key = derive("hunter3", &salt, &params).unwrap();
    let err = decrypt(&wrong_key, &nonce, &ct).unwrap_err();
    assert!(matches!(err, CryptoError::Auth));
  }

  #[test]
  fn tampered_ciphertext_is_auth_error() {
    let salt = random_salt();
    let params = fast_params();
    let key = derive("hunter2", &salt, &params).unwrap();
    let (nonce, mut ct) = encrypt(&key, b"hello world");
    ct[0] ^= 0x01;
    let err = decrypt(&key, &nonce, &ct).unwrap_err();
    assert!(matches!(err, CryptoError::Auth));
  }

  #[test]
  fn tampered_nonce_is_auth_error() {
    let salt = random_salt();
    let params = fast_params();
    let key = derive("hunter2", &salt, &params).unwrap();
    let (mut nonce, ct) = encrypt(&key, b"hello world");
    nonce[0] ^= 0x01;
    let err = decrypt(&key, &nonce, &ct).unwrap_err();
    assert!(matches!(err, CryptoError::Auth));
  }

  #[test]
  fn fresh_nonce_and_salt_each_call() {
    let salt_a = random_salt();
    let salt_b = random_salt();
    assert_ne!(salt_a, salt_b);

    let params = fast_params();
    let key = derive("hunter2", &salt_a, &params).unwrap();
    let (nonce_a, ct_a) = encrypt(&key, b"same plaintext");
    let (nonce_b, ct_b) = encrypt(&key, b"same plaintext");
    assert_ne!(nonce_a, nonce_b);
    assert_ne!(ct_a, ct_b);
  }

  #[test]
  fn rejects_non_power_of_two_n() {
    let salt = random_salt();
    let params = KdfParams { n: 3, r: 8, p: 1 };
    let err = derive("hunter2", &salt, &params).unwrap_err();
    assert!(matches!(err, CryptoError::KdfParam(_)));
  }
}
