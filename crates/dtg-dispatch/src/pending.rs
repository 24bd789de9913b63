//! Request-collapsing cache for in-flight reads: at most one concurrent
//! handler invocation per resource key, with every waiting caller sharing
//! the same pipeline future.
//!
//! One mutex guards the whole map so lookup and insertion are a single
//! atomic step. Coarse, but fine at modest concurrency; per-key locking is
//! a drop-in replacement if contention ever shows up.

use std::collections::HashMap;
use std::sync::Mutex;

use dtg_twin::{ResourceKey, TimedValue};
use futures::future::{BoxFuture, Shared};

use crate::error::DispatchError;

/// The shared read pipeline future stored per key.
pub type SharedRead = Shared<BoxFuture<'static, Result<TimedValue, DispatchError>>>;

#[derive(Default)]
pub struct PendingReads {
    inner: Mutex<HashMap<ResourceKey, SharedRead>>,
}

impl PendingReads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the in-flight future for `key`, creating and installing it
    /// with `make` if none is pending. The boolean is true when this call
    /// installed a new entry (and `make` was run).
    pub fn join_or_insert<F>(&self, key: &ResourceKey, make: F) -> (SharedRead, bool)
    where
        F: FnOnce() -> SharedRead,
    {
        let mut map = self.inner.lock().expect("pending reads poisoned");
        if let Some(existing) = map.get(key) {
            (existing.clone(), false)
        } else {
            let fresh = make();
            map.insert(key.clone(), fresh.clone());
            (fresh, true)
        }
    }

    /// Unconditionally drop the entry for `key`. Called as soon as the
    /// upstream invocation settles, success or failure, so no failure mode
    /// can permanently block a resource's reads.
    pub fn remove(&self, key: &ResourceKey) {
        self.inner.lock().expect("pending reads poisoned").remove(key);
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.inner
            .lock()
            .expect("pending reads poisoned")
            .contains_key(key)
    }
}
