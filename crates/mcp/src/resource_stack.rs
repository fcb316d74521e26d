//! Scoped-resource stack for server instances.
//!
//! Every resource acquired during startup (subprocess handle, reader tasks)
//! pushes a release closure onto the stack as soon as it exists, before the
//! handshake runs. Any terminal exit — success path shutdown, startup
//! failure, timeout cancellation — drains the stack exactly once in LIFO
//! order.

use std::{future::Future, pin::Pin};

type ReleaseFn = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// A LIFO stack of async release closures, drained at most once.
pub struct ResourceStack {
    releases: Vec<ReleaseFn>,
    drained: bool,
}

impl Default for ResourceStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStack {
    pub fn new() -> Self {
        Self {
            releases: Vec::new(),
            drained: false,
        }
    }

    /// Register a release closure. Panics are not caught here; release
    /// closures must not panic.
    pub fn push<F, Fut>(&mut self, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.releases.push(Box::new(move || Box::pin(release())));
    }

    /// Release everything in LIFO order. Idempotent: a second drain is a
    /// no-op.
    pub async fn drain(&mut self) {
        if self.drained {
            return;
        }
        self.drained = true;
        while let Some(release) = self.releases.pop() {
            release().await;
        }
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }
}
