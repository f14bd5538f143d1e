//! The flare: a pollable readiness primitive backing the proxy mailbox
//! (spec.md §4.4/§9 "Flare primitive").
//!
//! spec.md calls for "a file-descriptor-backed flare so external event
//! loops can integrate." We implement it with a connected
//! `UnixStream` pair (a classic self-pipe): writing a single byte makes the
//! read end's file descriptor readable, and draining it clears readability.
//! This gives external `poll`/`epoll`-based loops a real, `AsRawFd`-able
//! handle without reaching for a dedicated eventfd crate the teacher
//! workspace doesn't already depend on. Readiness is level-triggered ("the
//! mailbox has at least one response"), matching spec.md §6's literal
//! wording over the design notes' "edge-triggered" paraphrase.
//!
//! Proxy-internal waiters don't touch the fd at all: they wait on a
//! [`tokio::sync::Notify`] that is signaled alongside the fd write, so the
//! async `receive()` path never blocks on synchronous I/O.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A readiness flag with a real, pollable file descriptor on the read side.
pub struct Flare {
    write_end: std::sync::Mutex<UnixStream>,
    read_end: std::sync::Mutex<UnixStream>,
    set: AtomicBool,
    notify: Notify,
}

impl Flare {
    /// # Errors
    /// Propagates `io::Error` if the underlying socket pair cannot be
    /// created (platform resource exhaustion).
    pub fn new() -> io::Result<Arc<Self>> {
        let (a, b) = UnixStream::pair()?;
        a.set_nonblocking(true)?;
        b.set_nonblocking(true)?;
        Ok(Arc::new(Self {
            write_end: std::sync::Mutex::new(a),
            read_end: std::sync::Mutex::new(b),
            set: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    /// Marks the flare readable (idempotent: a second `set()` before the
    /// first is drained does not write a second byte).
    pub fn set(&self) {
        if !self.set.swap(true, Ordering::AcqRel) {
            let mut w = self.write_end.lock().unwrap_or_else(|e| e.into_inner());
            let _ = w.write_all(&[1]);
        }
        self.notify.notify_waiters();
    }

    /// Clears readability. Called once the mailbox has been fully drained.
    pub fn clear(&self) {
        if self.set.swap(false, Ordering::AcqRel) {
            let mut r = self.read_end.lock().unwrap_or_else(|e| e.into_inner());
            let mut buf = [0u8; 64];
            loop {
                match r.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) if n < buf.len() => break,
                    Ok(_) => continue,
                }
            }
        }
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Waits until [`set`](Self::set) is called (or the flare is already
    /// set). Used internally by [`super::proxy::Proxy::receive`]; external
    /// event loops should instead poll [`as_raw_fd`](Self::as_raw_fd).
    pub async fn notified(&self) {
        // Create the `Notified` future before checking the flag: tokio
        // guarantees a `notify_waiters()` landing between this future's
        // creation and its first poll still wakes it, which closes the race
        // a check-then-await ordering would otherwise leave open.
        let notified = self.notify.notified();
        if self.is_set() {
            return;
        }
        notified.await;
    }

    /// The read end's raw file descriptor, for integration with external
    /// `poll`/`epoll`-based event loops (spec.md §6 "Mailbox readiness").
    #[must_use]
    pub fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.read_end
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_raw_fd()
    }
}
