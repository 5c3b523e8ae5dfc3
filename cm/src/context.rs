//! Implicit request context
//!
//! Key/value pairs sent along with every request made through the
//! communicator. `Comm.ImplicitContext` selects the sharing mode: `Shared`
//! keeps one map for the whole process, `PerThread` one map per thread.
//! A thread's map is dropped when the thread exits.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use tracing::debug;

use crate::error::{CommunicatorError, Result};

/// Context map
pub type Context = HashMap<String, String>;

/// How the implicit context is shared between threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplicitContextKind {
    Shared,
    PerThread,
}

impl fmt::Display for ImplicitContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImplicitContextKind::Shared => f.write_str("Shared"),
            ImplicitContextKind::PerThread => f.write_str("PerThread"),
        }
    }
}

type ContextMaps = Mutex<HashMap<Option<ThreadId>, Context>>;

/// Per-thread maps this thread has written, removed when the thread exits
struct ThreadSlots {
    id: ThreadId,
    contexts: RefCell<Vec<Weak<ContextMaps>>>,
}

impl Drop for ThreadSlots {
    fn drop(&mut self) {
        for maps in self.contexts.get_mut().drain(..).filter_map(|w| w.upgrade()) {
            maps.lock().unwrap_or_else(PoisonError::into_inner).remove(&Some(self.id));
        }
    }
}

thread_local! {
    static THREAD_SLOTS: ThreadSlots = ThreadSlots {
        id: thread::current().id(),
        contexts: RefCell::new(Vec::new()),
    };
}

/// Implicit context store
#[derive(Debug)]
pub struct ImplicitContext {
    kind: ImplicitContextKind,
    // None holds the shared map
    maps: Arc<ContextMaps>,
}

impl ImplicitContext {
    pub fn new(kind: ImplicitContextKind) -> Self {
        Self {
            kind,
            maps: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build from a `Comm.ImplicitContext` value; `""` and `None` disable it
    pub fn from_property(value: &str) -> Result<Option<Self>> {
        debug!(%value, "ImplicitContext::from_property: called");
        match value {
            "" | "None" => Ok(None),
            "Shared" => Ok(Some(Self::new(ImplicitContextKind::Shared))),
            "PerThread" => Ok(Some(Self::new(ImplicitContextKind::PerThread))),
            other => Err(CommunicatorError::Initialization(format!(
                "invalid value `{}` for Comm.ImplicitContext, expected None, Shared or PerThread",
                other
            ))),
        }
    }

    pub fn kind(&self) -> ImplicitContextKind {
        self.kind
    }

    fn slot(&self) -> Option<ThreadId> {
        match self.kind {
            ImplicitContextKind::Shared => None,
            ImplicitContextKind::PerThread => Some(thread::current().id()),
        }
    }

    /// Arrange for this thread's map to be dropped when the thread exits
    fn track_thread(&self) {
        if self.kind != ImplicitContextKind::PerThread {
            return;
        }
        let _ = THREAD_SLOTS.try_with(|slots| {
            let mut contexts = slots.contexts.borrow_mut();
            contexts.retain(|w| w.strong_count() > 0);
            if !contexts.iter().any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(&self.maps))) {
                contexts.push(Arc::downgrade(&self.maps));
            }
        });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Option<ThreadId>, Context>> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Value for `key`, or an empty string
    pub fn get(&self, key: &str) -> String {
        self.lock()
            .get(&self.slot())
            .and_then(|map| map.get(key))
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().get(&self.slot()).is_some_and(|map| map.contains_key(key))
    }

    /// Set `key`, returning the previous value or an empty string
    pub fn put(&self, key: &str, value: &str) -> String {
        let slot = self.slot();
        self.track_thread();
        self.lock()
            .entry(slot)
            .or_default()
            .insert(key.to_string(), value.to_string())
            .unwrap_or_default()
    }

    /// Remove `key`, returning its value or an empty string
    pub fn remove(&self, key: &str) -> String {
        let slot = self.slot();
        let mut maps = self.lock();
        let Some(map) = maps.get_mut(&slot) else {
            return String::new();
        };
        let removed = map.remove(key).unwrap_or_default();
        if map.is_empty() {
            maps.remove(&slot);
        }
        removed
    }

    /// Copy of the whole context
    pub fn context(&self) -> Context {
        self.lock().get(&self.slot()).cloned().unwrap_or_default()
    }

    /// Replace the whole context
    pub fn set_context(&self, context: Context) {
        let slot = self.slot();
        if context.is_empty() {
            self.lock().remove(&slot);
        } else {
            self.track_thread();
            self.lock().insert(slot, context);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_from_property() {
        assert!(ImplicitContext::from_property("").unwrap().is_none());
        assert!(ImplicitContext::from_property("None").unwrap().is_none());
        let ctx = ImplicitContext::from_property("PerThread").unwrap().unwrap();
        assert_eq!(ctx.kind(), ImplicitContextKind::PerThread);
        assert!(ImplicitContext::from_property("Global").unwrap_err().is_initialization());
    }

    #[test]
    fn test_put_get_remove() {
        let ctx = ImplicitContext::new(ImplicitContextKind::Shared);
        assert_eq!(ctx.put("user", "alice"), "");
        assert_eq!(ctx.put("user", "bob"), "alice");
        assert!(ctx.contains_key("user"));
        assert_eq!(ctx.get("user"), "bob");
        assert_eq!(ctx.remove("user"), "bob");
        assert_eq!(ctx.get("user"), "");
        assert_eq!(ctx.remove("user"), "");
    }

    #[test]
    fn test_shared_visible_across_threads() {
        let ctx = Arc::new(ImplicitContext::new(ImplicitContextKind::Shared));
        ctx.put("k", "v");
        let other = Arc::clone(&ctx);
        let seen = thread::spawn(move || other.get("k")).join().unwrap();
        assert_eq!(seen, "v");
    }

    #[test]
    fn test_per_thread_isolated() {
        let ctx = Arc::new(ImplicitContext::new(ImplicitContextKind::PerThread));
        ctx.put("k", "main");
        let other = Arc::clone(&ctx);
        let seen = thread::spawn(move || {
            let before = other.get("k");
            other.put("k", "worker");
            before
        })
        .join()
        .unwrap();
        assert_eq!(seen, "");
        assert_eq!(ctx.get("k"), "main");
    }

    #[test]
    fn test_set_context() {
        let ctx = ImplicitContext::new(ImplicitContextKind::Shared);
        let mut map = Context::new();
        map.insert("a".to_string(), "1".to_string());
        ctx.set_context(map.clone());
        assert_eq!(ctx.context(), map);
        ctx.set_context(Context::new());
        assert!(ctx.context().is_empty());
    }

    #[test]
    fn test_per_thread_map_dropped_on_thread_exit() {
        let ctx = Arc::new(ImplicitContext::new(ImplicitContextKind::PerThread));
        ctx.put("k", "main");

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                thread::spawn(move || {
                    ctx.put("k", &i.to_string());
                    let mut map = Context::new();
                    map.insert("other".to_string(), "1".to_string());
                    ctx.set_context(map);
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(ctx.lock().len(), 1);
        assert_eq!(ctx.get("k"), "main");
    }
}
