//! stashd - a local, encrypted personal secret stash daemon.
//!
//! A long-lived background process holds a single symmetric key and the
//! decrypted secret map in memory while unlocked, speaks a small
//! line-delimited JSON protocol over a Unix domain socket, and persists
//! an AEAD-encrypted file to disk on every mutation.
//!
//! - [`crypto`] - password-to-key derivation and the AEAD envelope (C1)
//! - [`store`] - the on-disk record format and its atomic write protocol (C2)
//! - [`session`] - the locked/unlocked state machine (C3)
//! - [`timers`] - the inactivity and clipboard deadline timers (C4)
//! - [`server`] - the Unix socket accept loop (C5)
//! - [`handlers`] - the verb table dispatched against each request (C6)
//! - [`clipboard`] - the OS clipboard boundary (C7)
//! - [`daemon`] - ties the above together behind one session mutex
//! - [`protocol`] - the wire request/response shapes
//! - [`settings`] - compiled-in defaults layered with `config.toml`
//! - [`secrets`] - the secret map type and key validity rules
//! - [`error`] - internal error types and the stable wire error tag set
//!
//! # Concurrency
//!
//! One OS thread per client connection, one request/response per
//! connection. All shared state lives behind a single `Mutex<Session>`;
//! the two deadline timers each run their own worker thread and only
//! ever touch that same mutex when they fire.

pub mod clipboard;
pub mod crypto;
pub mod daemon;
pub mod error;
pub mod handlers;
pub mod protocol;
pub mod secrets;
pub mod server;
pub mod session;
pub mod settings;
pub mod store;
pub mod timers;
