//! Per-session map from request `id` to the task awaiting its response.
//!
//! `id` collisions cannot occur within a session because the session is
//! the sole allocator of outgoing request ids (see [`crate::session`]).
//! Every entry is removed exactly once: by a matching response, by its
//! deadline firing, by the caller cancelling, or by the session closing.

use std::collections::HashMap;
use std::sync::Mutex;

use bridge_protocol::Frame;

use crate::error::CoreError;

type Waiter = tokio::sync::oneshot::Sender<Result<Frame, CoreError>>;

#[derive(Default)]
pub struct PendingTable {
    waiters: Mutex<HashMap<String, Waiter>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a waiter for `id`, returning the receiving half. Panics if
    /// `id` is already pending — that would mean the session's id
    /// allocator produced a duplicate, a construction invariant violation.
    pub fn install(&self, id: String) -> tokio::sync::oneshot::Receiver<Result<Frame, CoreError>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let mut waiters = self.waiters.lock().expect("pending table mutex poisoned");
        if waiters.insert(id.clone(), tx).is_some() {
            panic!("duplicate pending request id {id}: session id allocator is broken");
        }
        rx
    }

    /// Resolves the waiter for `id` with a response frame, if one is still
    /// pending. A response with no matching waiter is dropped by the
    /// caller, logged, not panicked on.
    pub fn resolve(&self, id: &str, frame: Frame) -> bool {
        let waiter = self
            .waiters
            .lock()
            .expect("pending table mutex poisoned")
            .remove(id);
        match waiter {
            Some(tx) => {
                // The receiver may already be gone (caller cancelled); that's
                // a silent no-op, not an error.
                let _ = tx.send(Ok(frame));
                true
            }
            None => false,
        }
    }

    /// Removes the waiter for `id` without resolving it — used by
    /// cancellation. Dropping the sender causes the receiver to observe a
    /// `RecvError`, which the caller translates to a cancellation outcome.
    pub fn cancel(&self, id: &str) {
        self.waiters.lock().expect("pending table mutex poisoned").remove(id);
    }

    /// Fails every still-pending waiter with `err` and clears the table.
    /// Used on deadline expiry for a single id by the broker, and on full
    /// session close for every remaining id.
    pub fn fail_all(&self, err: CoreError) {
        let waiters: Vec<Waiter> = self
            .waiters
            .lock()
            .expect("pending table mutex poisoned")
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        for tx in waiters {
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// Removes and fails a single waiter, used when its deadline fires.
    pub fn fail(&self, id: &str, err: CoreError) {
        let waiter = self.waiters.lock().expect("pending table mutex poisoned").remove(id);
        if let Some(tx) = waiter {
            let _ = tx.send(Err(err));
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().expect("pending table mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
