//! Thread-identity keyed context registry.
//!
//! An explicit map from [`ThreadId`] to the context associated with that
//! thread, shared by every component of one scheduler. Each entry is only
//! ever written by the thread it names, so two threads never race on the
//! same key; the registry lock orders writes to different keys and makes
//! [`get_or_create`](ContextRegistry::get_or_create) atomic.
//!
//! Entries persist until explicitly detached. Thread ids are never reused
//! by the runtime, so a dead thread's stale entry can never be observed by
//! a live thread as its own.

use crate::context::Context;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Shared thread-to-context map. Clones observe the same entries.
#[derive(Clone)]
pub(crate) struct ContextRegistry {
    inner: Arc<Mutex<HashMap<ThreadId, Arc<Context>>>>,
}

impl ContextRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The context registered for the calling thread, if any.
    pub(crate) fn current(&self) -> Option<Arc<Context>> {
        self.get(thread::current().id())
    }

    pub(crate) fn get(&self, thread: ThreadId) -> Option<Arc<Context>> {
        self.inner.lock().get(&thread).cloned()
    }

    /// Returns the calling thread's context, creating it with `create` when
    /// absent. The lock is held across the check and the insert, so repeat
    /// calls from one thread always observe the context the first call
    /// created and `create` runs at most once per thread.
    pub(crate) fn get_or_create(&self, create: impl FnOnce() -> Arc<Context>) -> Arc<Context> {
        let mut map = self.inner.lock();
        Arc::clone(map.entry(thread::current().id()).or_insert_with(create))
    }

    /// Registers `context` as the calling thread's context for the duration
    /// of a task, returning whatever was registered before so
    /// [`exit`](Self::exit) can restore it.
    pub(crate) fn enter(&self, context: Arc<Context>) -> Option<Arc<Context>> {
        self.inner.lock().insert(thread::current().id(), context)
    }

    /// Restores the registration that [`enter`](Self::enter) displaced.
    pub(crate) fn exit(&self, previous: Option<Arc<Context>>) {
        let mut map = self.inner.lock();
        match previous {
            Some(context) => {
                map.insert(thread::current().id(), context);
            }
            None => {
                map.remove(&thread::current().id());
            }
        }
    }

    /// Removes the calling thread's entry. The next
    /// [`get_or_create`](Self::get_or_create) from this thread creates a
    /// fresh context.
    pub(crate) fn detach_current(&self) -> Option<Arc<Context>> {
        self.inner.lock().remove(&thread::current().id())
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("entries", &self.len())
            .finish()
    }
}
