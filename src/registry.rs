//! Process-wide lookup from the calling OS thread to the [`Thread`] running on it.
//!
//! The entry trampoline of every launched thread registers itself twice: in a
//! thread-local slot, which serves all lookups on the hot path without
//! synchronization, and in a global map keyed by [`NativeId`], which still
//! answers once the thread-local slot is unavailable (e.g. from thread-local
//! destructors running at thread exit).
//!
//! Entries are never removed explicitly. They only hold weak references, dead
//! ones are pruned as new threads register, and a live entry left behind by an
//! exited launch is ignored because its native id no longer matches a
//! running launch.
//!
//! [`Thread`]: crate::Thread

use crate::{
    platform::{NativeId, OsPlatform, Platform},
    thread::{Inner, ThreadRef},
};
use parking_lot::{const_mutex, Mutex};
use std::{
    cell::RefCell,
    collections::BTreeMap,
    sync::{Arc, Weak},
};

static REGISTRY: Mutex<BTreeMap<NativeId, Weak<Inner>>> = const_mutex(BTreeMap::new());

thread_local!(static CURRENT: RefCell<Option<Weak<Inner>>> = RefCell::new(None));

pub(crate) fn register(native_id: NativeId, inner: &Arc<Inner>) {
    let entry = Arc::downgrade(inner);
    let _ = CURRENT.try_with(|current| *current.borrow_mut() = Some(entry.clone()));

    let mut registry = REGISTRY.lock();
    registry.retain(|_, entry| entry.strong_count() > 0);
    registry.insert(native_id, entry);
}

fn lookup(native_id: NativeId) -> Option<Arc<Inner>> {
    REGISTRY
        .lock()
        .get(&native_id)
        .and_then(Weak::upgrade)
        .filter(|inner| inner.is_running() && inner.native_id() == Some(native_id))
}

/// The thread launched by this crate which is calling this function, if any.
///
/// Returns `None` on threads which weren't started through a [`Thread`]
/// such as the main thread.
///
/// [`Thread`]: crate::Thread
pub fn current() -> Option<ThreadRef> {
    let cached = CURRENT
        .try_with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
        .ok()
        .flatten();

    cached
        .or_else(|| lookup(OsPlatform::current_native_id()))
        .map(ThreadRef::from_inner)
}

/// The OS-visible id of the calling thread.
pub fn current_native_id() -> NativeId {
    OsPlatform::current_native_id()
}
