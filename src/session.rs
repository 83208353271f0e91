//! Weak back-reference from a socket to its session.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::reactor::Session;

/// Holds the session behind its own lock, separate from the output lock.
///
/// The guard never leaves this type: callers get an upgraded `Arc` and call
/// into the session after the lock is released.
#[derive(Default)]
pub(crate) struct SessionSlot {
    session: Mutex<Option<Weak<dyn Session>>>,
}

impl SessionSlot {
    /// Point the slot at `session`. Returns `true` if it replaced a live one.
    pub(crate) fn set(&self, session: Weak<dyn Session>) -> bool {
        let previous = self.session.lock().replace(session);
        previous.is_some_and(|weak| weak.strong_count() > 0)
    }

    pub(crate) fn clear(&self) {
        self.session.lock().take();
    }

    /// Upgrade the current session, if one is bound and still alive.
    pub(crate) fn get(&self) -> Option<Arc<dyn Session>> {
        self.session.lock().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.get().is_some()
    }
}
