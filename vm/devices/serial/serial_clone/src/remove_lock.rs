// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Lifecycle guard that counts in-flight requests and lets device removal
//! wait for them to drain.
//!
//! The count starts with one reference owned by the device itself. Every
//! request entry point takes a [`RemoveLockGuard`]; removal marks the lock,
//! gives up the caller's guard and the device's own reference, and then
//! blocks until the count reaches zero. Once removal has been signalled,
//! [`RemoveLock::acquire`] fails with [`DeletePending`].

use parking_lot::Condvar;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// The device is being removed and accepts no new requests.
#[derive(Debug, Error)]
#[error("device removal is pending")]
pub struct DeletePending;

/// A counted lifecycle guard shared by every request entry point of a device.
#[derive(Debug, Clone)]
pub struct RemoveLock {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<LockState>,
    drained: Condvar,
}

#[derive(Debug)]
struct LockState {
    io_count: usize,
    removed: bool,
}

impl RemoveLock {
    /// Creates a new lock holding the device's own reference.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LockState {
                    io_count: 1,
                    removed: false,
                }),
                drained: Condvar::new(),
            }),
        }
    }

    /// Takes a reference for an in-flight request.
    ///
    /// The returned guard may be moved into a completion routine so the
    /// reference is held until a forwarded request finishes.
    pub fn acquire(&self) -> Result<RemoveLockGuard, DeletePending> {
        let mut state = self.inner.state.lock();
        if state.removed {
            return Err(DeletePending);
        }
        state.io_count += 1;
        Ok(RemoveLockGuard {
            inner: self.inner.clone(),
        })
    }

    /// Signals removal, gives up `guard` and the device's own reference, and
    /// blocks until every other outstanding guard has been dropped.
    pub fn release_and_wait(&self, guard: RemoveLockGuard) {
        {
            let mut state = self.inner.state.lock();
            // The device reference can only be given up once.
            if !std::mem::replace(&mut state.removed, true) {
                state.io_count -= 1;
            }
        }
        drop(guard);
        let mut state = self.inner.state.lock();
        while state.io_count != 0 {
            self.inner.drained.wait(&mut state);
        }
    }

    /// Returns true once removal has been signalled.
    pub fn is_removed(&self) -> bool {
        self.inner.state.lock().removed
    }

    /// The number of outstanding references, including the device's own
    /// reference until removal.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().io_count
    }
}

impl Default for RemoveLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A reference taken by [`RemoveLock::acquire`], released on drop.
#[derive(Debug)]
#[must_use]
pub struct RemoveLockGuard {
    inner: Arc<Inner>,
}

impl Drop for RemoveLockGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.io_count -= 1;
        if state.io_count == 0 {
            debug_assert!(state.removed, "io count reached zero without removal");
            self.inner.drained.notify_all();
        }
    }
}
