//! Cancellation handle for provider-side listeners.

use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Handle returned by `observe`/`subscribe` calls.
///
/// `remove` releases the listener once; later calls and the implicit call on
/// drop are no-ops.
pub struct ListenerRegistration {
    release: Mutex<Option<ReleaseFn>>,
}

impl ListenerRegistration {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// Registration with nothing to release.
    pub fn detached() -> Self {
        Self {
            release: Mutex::new(None),
        }
    }

    /// Releases the listener. Returns `true` only for the call that released it.
    pub fn remove(&self) -> bool {
        // Take under the lock, run outside it: release closures may re-enter
        // the provider.
        let release = self.release.lock().take();
        match release {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.lock().is_some()
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.remove();
    }
}

impl Debug for ListenerRegistration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.is_active())
            .finish()
    }
}
