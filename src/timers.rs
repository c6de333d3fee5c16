//! Timer set (C4): two independent, resettable one-shot deadline timers.
//!
//! Both are built on the same small primitive, [`Timer`]: a
//! `Mutex<Option<(Instant, T)>>` plus a `Condvar`. Arming replaces the
//! deadline and wakes the worker thread; a worker that wakes always
//! re-reads the current deadline before deciding whether to fire, so a
//! schedule call racing with an about-to-fire timer simply supersedes it
//! (spec §4.4: "a second schedule call cancels and supersedes the
//! first"). The fire callback is handed the timer itself so the
//! inactivity timer can rearm itself to a later deadline without the
//! daemon needing to reach back in (spec §4.4: "otherwise rearms to the
//! new deadline").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

struct Inner<T> {
  slot: Mutex<Option<(Instant, T)>>,
  cv: Condvar,
  shutdown: AtomicBool,
  worker: Mutex<Option<JoinHandle<()>>>,
}

/// A single resettable one-shot timer carrying a payload `T` (e.g. a
/// clipboard fingerprint, or `()` for the inactivity timer).
#[derive(Clone)]
pub struct Timer<T>(Arc<Inner<T>>);

impl<T: Clone + Send + 'static> Timer<T> {
  /// Spawns the worker thread. `on_fire` runs with no lock of this
  /// timer's own held, so it is free to call `arm`/`cancel` on the
  /// handle it is given, and to acquire whatever other locks it needs
  /// (the session mutex, in practice).
  pub fn spawn(mut on_fire: impl FnMut(T, &Timer<T>) + Send + 'static) -> Timer<T> {
    let inner = Arc::new(Inner {
      slot: Mutex::new(None),
      cv: Condvar::new(),
      shutdown: AtomicBool::new(false),
      worker: Mutex::new(None),
    });

    let worker_inner = inner.clone();
    let handle_for_callback = Timer(inner.clone());
    let worker = thread::spawn(move || loop {
      let mut guard = worker_inner.slot.lock().unwrap();
      loop {
        if worker_inner.shutdown.load(Ordering::Relaxed) {
          return;
        }
        match *guard {
          None => {
            guard = worker_inner.cv.wait(guard).unwrap();
          }
          Some((deadline, _)) => {
            let now = Instant::now();
            if now >= deadline {
              break;
            }
            let (g, _timeout) =
              worker_inner.cv.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
          }
        }
      }
      if worker_inner.shutdown.load(Ordering::Relaxed) {
        return;
      }
      let fired = guard.take().map(|(_, payload)| payload);
      drop(guard);
      if let Some(payload) = fired {
        on_fire(payload, &handle_for_callback);
      }
    });

    *inner.worker.lock().unwrap() = Some(worker);
    Timer(inner)
  }

  /// Arms (or re-arms, superseding any prior deadline) the timer.
  pub fn arm(&self, deadline: Instant, payload: T) {
    let mut guard = self.0.slot.lock().unwrap();
    *guard = Some((deadline, payload));
    self.0.cv.notify_one();
  }

  /// Cancels a pending deadline, if any. A no-op if already fired or
  /// never armed.
  pub fn cancel(&self) {
    let mut guard = self.0.slot.lock().unwrap();
    if guard.take().is_some() {
      self.0.cv.notify_one();
    }
  }

  pub fn shutdown(&self) {
    {
      let mut guard = self.0.slot.lock().unwrap();
      self.0.shutdown.store(true, Ordering::Relaxed);
      *guard = None;
      self.0.cv.notify_one();
    }
    if let Some(handle) = self.0.worker.lock().unwrap().take() {
      let _ = handle.join();
    }
  }
}
