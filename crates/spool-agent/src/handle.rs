//! A cloneable handle for aborting a session from external code.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

/// A cloneable handle for poking a session from external code.
///
/// All fields are `Arc`-wrapped, so cloning is cheap. Abort is sticky: once
/// aborted, the session it belongs to never runs again.
#[derive(Clone)]
pub struct SessionHandle {
    cancel: CancellationToken,
    abort_reason: Arc<Mutex<Option<String>>>,
    idle_notify: Arc<tokio::sync::Notify>,
    is_running: Arc<AtomicBool>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            abort_reason: Arc::new(Mutex::new(None)),
            idle_notify: Arc::new(tokio::sync::Notify::new()),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort the session.
    pub fn abort(&self) {
        self.abort_with("aborted by user");
    }

    /// Abort with a reason. The first reason recorded wins.
    pub fn abort_with(&self, reason: impl Into<String>) {
        {
            let mut slot = self.abort_reason.lock();
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn abort_reason(&self) -> Option<String> {
        self.abort_reason.lock().clone()
    }

    /// Token cancelled on abort, passed to tools and waits
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.is_running.store(running, Ordering::Release);
        if !running {
            self.idle_notify.notify_waiters();
        }
    }

    /// Wait until the session loop becomes idle (finishes running).
    pub async fn wait_for_idle(&self) {
        let notified = self.idle_notify.notified();
        if !self.is_running.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }

    /// Wait until the session loop becomes idle, with a timeout.
    /// Returns `true` if idle was reached, `false` on timeout.
    pub async fn wait_for_idle_timeout(&self, timeout: std::time::Duration) -> bool {
        if !self.is_running.load(Ordering::Acquire) {
            return true;
        }
        tokio::time::timeout(timeout, self.wait_for_idle())
            .await
            .is_ok()
    }

    /// Whether the session loop is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("aborted", &self.is_aborted())
            .field("running", &self.is_running())
            .finish()
    }
}
