//! Stash store (C2): owns the encrypted file, its atomic write protocol,
//! and the on-disk record's JSON shape.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{self, KdfParams, KEY_LEN, NONCE_LEN, SALT_LEN};
use crate::error::{CryptoError, StoreError};
use crate::secrets::SecretMap;

const CURRENT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct KdfField {
  algorithm: String,
  salt: String,
  n: u32,
  r: u32,
  p: u32,
}

#[derive(Serialize, Deserialize)]
struct EncryptionField {
  algorithm: String,
  nonce: String,
  ciphertext: String,
}

#[derive(Serialize, Deserialize)]
struct StashRecord {
  version: u32,
  kdf: KdfField,
  encryption: EncryptionField,
}

/// What `load_metadata` returns: everything needed to attempt a password
/// check, with the ciphertext still encrypted.
pub struct StashMetadata {
  pub kdf_params: KdfParams,
  pub salt: [u8; SALT_LEN],
  pub nonce: [u8; NONCE_LEN],
  pub ciphertext: Vec<u8>,
}

fn decode_fixed<const N: usize>(field: &str, b64: &str) -> Result<[u8; N], StoreError> {
  let bytes = BASE64
    .decode(b64)
    .map_err(|e| StoreError::Corrupt(format!("{field}: bad base64: {e}")))?;
  bytes
    .try_into()
    .map_err(|v: Vec<u8>| StoreError::Corrupt(format!("{field}: expected {N} bytes, got {}", v.len())))
}

/// Reads and parses the stash file without decrypting it.
pub fn load_metadata(path: &Path) -> Result<StashMetadata, StoreError> {
  let bytes = match fs::read(path) {
    Ok(b) => b,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NoStash),
    Err(e) => return Err(StoreError::Io(e)),
  };

  let record: StashRecord = serde_json::from_slice(&bytes)
    .map_err(|e| StoreError::Corrupt(format!("invalid JSON: {e}")))?;

  if record.version != CURRENT_VERSION {
    return Err(StoreError::Corrupt(format!(
      "unsupported version {}",
      record.version
    )));
  }
  if record.kdf.algorithm != "scrypt" {
    return Err(StoreError::Corrupt(format!(
      "unsupported kdf algorithm {}",
      record.kdf.algorithm
    )));
  }
  if record.encryption.algorithm != "aes-256-gcm" {
    return Err(StoreError::Corrupt(format!(
      "unsupported encryption algorithm {}",
      record.encryption.algorithm
    )));
  }

  let salt = decode_fixed::<SALT_LEN>("kdf.salt", &record.kdf.salt)?;
  let nonce = decode_fixed::<NONCE_LEN>("encryption.nonce", &record.encryption.nonce)?;
  let ciphertext = BASE64
    .decode(&record.encryption.ciphertext)
    .map_err(|e| StoreError::Corrupt(format!("encryption.ciphertext: bad base64: {e}")))?;

  Ok(StashMetadata {
    kdf_params: KdfParams {
      n: record.kdf.n,
      r: record.kdf.r,
      p: record.kdf.p,
    },
    salt,
    nonce,
    ciphertext,
  })
}

fn tmp_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().unwrap_or_default().to_os_string();
  name.push(".tmp");
  path.with_file_name(name)
}

fn serialize_secrets(secrets: &SecretMap) -> Result<Zeroizing<Vec<u8>>, StoreError> {
  // BTreeMap serializes its keys in sorted order, keeping diffs stable
  // (spec §4.2) with no extra sort step.
  Ok(Zeroizing::new(
    serde_json::to_vec(secrets).map_err(|e| StoreError::Corrupt(format!("serialize: {e}")))?,
  ))
}

fn write_record(path: &Path, record: &StashRecord) -> Result<(), StoreError> {
  let body = serde_json::to_vec_pretty(record)
    .map_err(|e| StoreError::Corrupt(format!("serialize record: {e}")))?;

  let tmp = tmp_path(path);
  {
    let mut f = File::create(&tmp)?;
    use io::Write;
    f.write_all(&body)?;
    f.sync_all()?;
  }
  fs::rename(&tmp, path)?;

  // Best effort: keep the directory entry durable too.
  if let Some(parent) = path.parent() {
    if let Ok(dir) = File::open(parent) {
      let _ = dir.sync_all();
    }
  }
  Ok(())
}

fn encode_record(
  kdf_params: &KdfParams,
  salt: &[u8; SALT_LEN],
  nonce: &[u8; NONCE_LEN],
  ciphertext: &[u8],
) -> StashRecord {
  StashRecord {
    version: CURRENT_VERSION,
    kdf: KdfField {
      algorithm: "scrypt".to_string(),
      salt: BASE64.encode(salt),
      n: kdf_params.n,
      r: kdf_params.r,
      p: kdf_params.p,
    },
    encryption: EncryptionField {
      algorithm: "aes-256-gcm".to_string(),
      nonce: BASE64.encode(nonce),
      ciphertext: BASE64.encode(ciphertext),
    },
  }
}

/// Derives a fresh key with a new salt, encrypts `secrets` with a fresh
/// nonce, and writes the record atomically. Returns the derived key and
/// salt so the caller can adopt them into an unlocked session without a
/// second scrypt call.
pub fn persist(
  path: &Path,
  secrets: &SecretMap,
  password: &str,
  kdf_params: &KdfParams,
) -> Result<(Zeroizing<[u8; KEY_LEN]>, [u8; SALT_LEN]), StoreError> {
  let salt = crypto::random_salt();
  let key = crypto::derive(password, &salt, kdf_params).map_err(StoreError::Crypto)?;
  persist_with_key(path, secrets, &key, kdf_params, &salt)?;
  Ok((key, salt))
}

/// Re-encrypts `secrets` under an already-derived `key` and `salt`,
/// always with a fresh nonce. Used by `add`/`delete` while unlocked to
/// avoid a second scrypt call.
pub fn persist_with_key(
  path: &Path,
  secrets: &SecretMap,
  key: &[u8; KEY_LEN],
  kdf_params: &KdfParams,
  salt: &[u8; SALT_LEN],
) -> Result<(), StoreError> {
  let plaintext = serialize_secrets(secrets)?;
  let (nonce, ciphertext) = crypto::encrypt(key, &plaintext);
  let record = encode_record(kdf_params, salt, &nonce, &ciphertext);
  write_record(path, &record)
}

/// Decrypts the stash at `path` with `password`. On success, returns the
/// parsed secret map together with the salt and key so the caller can
/// adopt them into a session (spec §4.6 `unlock`/`change_password`).
pub fn load_with_password(
  path: &Path,
  password: &str,
) -> Result<(SecretMap, [u8; SALT_LEN], KdfParams, Zeroizing<[u8; KEY_LEN]>), StoreError> {
  let meta = load_metadata(path)?;
  let key = crypto::derive(password, &meta.salt, &meta.kdf_params).map_err(StoreError::Crypto)?;
  let plaintext = crypto::decrypt(&key, &meta.nonce, &meta.ciphertext).map_err(StoreError::Crypto)?;
  let secrets: SecretMap = serde_json::from_slice(&plaintext)
    .map_err(|e| StoreError::Corrupt(format!("secret map: {e}")))?;
  Ok((secrets, meta.salt, meta.kdf_params, key))
}

/// Creates a brand new, empty stash at `path`. Fails if one already
/// exists. Returns the derived key and salt for the caller to enter an
/// unlocked session immediately (first-run `init`, out of core per
/// spec §1, but needed here so the daemon is independently testable).
pub fn init(
  path: &Path,
  password: &str,
  kdf_params: &KdfParams,
) -> Result<(Zeroizing<[u8; KEY_LEN]>, [u8; SALT_LEN]), StoreError> {
  if path.exists() {
    return Err(StoreError::Corrupt("stash already exists".to_string()));
  }
  persist(path, &SecretMap::new(), password, kdf_params)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::crypto::KdfParams as Kdf;

  fn fast_kdf() -> Kdf {
    Kdf { n: 1 << 4, r: 8, p: 1 }
  }

  fn temp_path(name: &str) -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("stashd-test-{name}-{}.json", std::process::id()));
    p
  }

  #[test]
  fn missing_file_is_no_stash() {
    let path = temp_path("missing");
    let _ = fs::remove_file(&path);
    assert!(matches!(load_metadata(&path), Err(StoreError::NoStash)));
  }

  #[test]
  fn round_trip() {
    let path = temp_path("roundtrip");
    let _ = fs::remove_file(&path);
    let kdf = fast_kdf();

    let mut secrets = SecretMap::new();
    secrets.insert("work/api-key".to_string(), "abc".to_string());
    let (key, salt) = persist(&path, &secrets, "hunter2", &kdf).unwrap();

    let (loaded, loaded_salt, _loaded_kdf, loaded_key) = load_with_password(&path, "hunter2").unwrap();
    assert_eq!(loaded.get("work/api-key").map(String::as_str), Some("abc"));
    assert_eq!(loaded_salt, salt);
    assert_eq!(*loaded_key, *key);

    persist_with_key(&path, &secrets, &key, &kdf, &salt).unwrap();
    let _ = fs::remove_file(&path);
  }

  #[test]
  fn wrong_password_fails() {
    let path = temp_path("wrongpw");
    let _ = fs::remove_file(&path);
    let kdf = fast_kdf();
    persist(&path, &SecretMap::new(), "hunter2", &kdf).unwrap();

    let err = load_with_password(&path, "hunter3").unwrap_err();
    assert!(matches!(err, StoreError::Crypto(CryptoError::Auth)));
    let _ = fs::remove_file(&path);
  }

  #[test]
  fn tamper_detection() {
    let path = temp_path("tamper");
    let _ = fs::remove_file(&path);
    let kdf = fast_kdf();
    persist(&path, &SecretMap::new(), "hunter2", &kdf).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    let mut record: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let ct_b64 = record["encryption"]["ciphertext"].as_str().unwrap().to_string();
    let mut ct = BASE64.decode(&ct_b64).unwrap();
    ct[0] ^= 0x01;
    record["encryption"]["ciphertext"] = serde_json::Value::String(BASE64.encode(&ct));
    fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

    let err = load_with_password(&path, "hunter2").unwrap_err();
    assert!(matches!(err, StoreError::Crypto(CryptoError::Auth)));
    let _ = fs::remove_file(&path);
  }

  #[test]
  fn successive_persists_get_fresh_salt_nonce_ciphertext() {
    let path = temp_path("fresh");
    let _ = fs::remove_file(&path);
    let kdf = fast_kdf();
    let mut secrets = SecretMap::new();
    secrets.insert("k".to_string(), "v".to_string());

    persist(&path, &secrets, "hunter2", &kdf).unwrap();
    let raw1 = fs::read_to_string(&path).unwrap();
    persist(&path, &secrets, "hunter2", &kdf).unwrap();
    let raw2 = fs::read_to_string(&path).unwrap();

    let r1: serde_json::Value = serde_json::from_str(&raw1).unwrap();
    let r2: serde_json::Value = serde_json::from_str(&raw2).unwrap();
    assert_ne!(r1["kdf"]["salt"], r2["kdf"]["salt"]);
    assert_ne!(r1["encryption"]["nonce"], r2["encryption"]["nonce"]);
    assert_ne!(r1["encryption"]["ciphertext"], r2["encryption"]["ciphertext"]);
    let _ = fs::remove_file(&path);
  }

  #[test]
  fn no_leftover_tmp_file_after_persist() {
    let path = temp_path("notmp");
    let _ = fs::remove_file(&path);
    let kdf = fast_kdf();
    persist(&path, &SecretMap::new(), "hunter2", &kdf).unwrap();
    assert!(!tmp_path(&path).exists());
    let _ = fs::remove_file(&path);
  }

  #[test]
  fn rejects_unsupported_version() {
    let path = temp_path("badversion");
    let _ = fs::remove_file(&path);
    let kdf = fast_kdf();
    persist(&path, &SecretMap::new(), "hunter2", &kdf).unwrap();

    let raw = fs::read_to_string(&path).unwrap();
    let mut record: serde_json::Value = serde_json::from_str(&raw).unwrap();
    record["version"] = serde_json::Value::from(2);
    fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

    let err = load_metadata(&path).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt(_)));
    let _ = fs::remove_file(&path);
  }
}
