//! Listener and handler registries.
//!
//! [`Listeners`] fans one event out to any number of subscribers.
//! [`Handlers`] binds at most one async handler per [`Method`].

use crate::error::{Error, Result};
use crate::rpc::Method;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Error type listeners may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A subscriber callback.
pub type ListenerFn<A> = Arc<dyn Fn(&A) -> std::result::Result<(), BoxError> + Send + Sync>;

/// An async call handler taking a caller context and positional params.
pub type HandlerFn<C> = Arc<dyn Fn(C, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Handle returned by [`Listeners::add`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Keyed multi-subscriber registry.
pub struct Listeners<K, A> {
    next_id: AtomicU64,
    entries: RwLock<HashMap<K, Vec<(ListenerId, ListenerFn<A>)>>>,
}

impl<K, A> Default for Listeners<K, A>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, A> Listeners<K, A>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to `key`. Listeners run in the order they were added.
    pub fn add<F>(&self, key: K, listener: F) -> ListenerId
    where
        F: Fn(&A) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .entry(key)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Unsubscribe. Returns whether the listener was present.
    pub fn remove(&self, key: &K, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let Some(list) = entries.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            entries.remove(key);
        }
        removed
    }

    /// Run every listener of `key` with `arg`.
    ///
    /// A failing or panicking listener is logged and skipped. Returns how
    /// many listeners completed without error.
    pub fn notify(&self, key: &K, arg: &A) -> usize {
        let listeners: Vec<ListenerFn<A>> = match self.entries.read().get(key) {
            Some(list) => list.iter().map(|(_, f)| Arc::clone(f)).collect(),
            None => return 0,
        };

        let mut ok = 0;
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(arg))) {
                Ok(Ok(())) => ok += 1,
                Ok(Err(e)) => tracing::warn!(key = ?key, error = %e, "Listener failed"),
                Err(_) => tracing::error!(key = ?key, "Listener panicked"),
            }
        }
        ok
    }

    /// Number of listeners registered for `key`.
    pub fn len(&self, key: &K) -> usize {
        self.entries.read().get(key).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Params delivered to a notification listener, with the caller context.
#[derive(Debug, Clone)]
pub struct Inbound<C> {
    pub ctx: C,
    pub params: Vec<Value>,
}

/// Method-keyed handler table; setting a method replaces its handler.
pub struct Handlers<C> {
    entries: RwLock<HashMap<Method, HandlerFn<C>>>,
}

impl<C: Send + 'static> Default for Handlers<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + 'static> Handlers<C> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Bind `handler` to `method`, replacing any previous handler.
    pub fn set<F, Fut>(&self, method: Method, handler: F)
    where
        F: Fn(C, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: HandlerFn<C> = Arc::new(move |ctx, params| handler(ctx, params).boxed());
        self.entries.write().insert(method, handler);
    }

    /// Unbind `method`. Returns whether a handler was present.
    pub fn remove(&self, method: Method) -> bool {
        self.entries.write().remove(&method).is_some()
    }

    pub fn contains(&self, method: Method) -> bool {
        self.entries.read().contains_key(&method)
    }

    /// Start the handler for `method`.
    ///
    /// The handler is looked up now; the returned future resolves to
    /// [`Error::NoHandler`] when nothing is bound.
    pub fn invoke(&self, method: Method, ctx: C, params: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        let handler = self.entries.read().get(&method).cloned();
        match handler {
            Some(handler) => handler(ctx, params),
            None => futures::future::ready(Err(Error::NoHandler(method.name().to_string()))).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn listeners_run_in_order_and_survive_failures() {
        let listeners: Listeners<&'static str, i32> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        listeners.add("k", move |v| {
            s.lock().push(*v);
            Ok(())
        });
        listeners.add("k", |_| Err("nope".into()));
        listeners.add("k", |_| panic!("boom"));
        let s = Arc::clone(&seen);
        listeners.add("k", move |v| {
            s.lock().push(v * 10);
            Ok(())
        });

        assert_eq!(listeners.notify(&"k", &3), 2);
        assert_eq!(*seen.lock(), vec![3, 30]);
        assert_eq!(listeners.notify(&"other", &3), 0);
    }

    #[test]
    fn remove_and_clear() {
        let listeners: Listeners<u8, ()> = Listeners::new();
        let a = listeners.add(1, |_| Ok(()));
        listeners.add(1, |_| Ok(()));
        assert_eq!(listeners.len(&1), 2);

        assert!(listeners.remove(&1, a));
        assert!(!listeners.remove(&1, a));
        assert_eq!(listeners.len(&1), 1);

        listeners.clear();
        assert!(listeners.is_empty());
        assert_eq!(listeners.notify(&1, &()), 0);
    }

    #[tokio::test]
    async fn handlers_replace_and_report_missing() {
        let handlers: Handlers<u32> = Handlers::new();
        handlers.set(Method::Get, |ctx, _| async move { Ok(json!(ctx)) });
        handlers.set(Method::Get, |ctx, params| async move { Ok(json!([ctx, params.len()])) });

        let result = handlers.invoke(Method::Get, 7, vec![json!(1)]).await.unwrap();
        assert_eq!(result, json!([7, 1]));

        let err = handlers.invoke(Method::Select, 7, vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown handler RTSDB_SELECT");

        assert!(handlers.remove(Method::Get));
        assert!(!handlers.contains(Method::Get));
    }
}
