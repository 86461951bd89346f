//! Directory of named, typed calls.
//!
//! The registry is pure bookkeeping plus cascading cancellation on destroy:
//! it never schedules anything. Keys are `(rpc_type, name)`; registering over
//! an existing key replaces it, and destroying a key cancels the call first
//! when a transport handle is live. The registry is mutated by the front-end
//! thread only.

use crate::call::ManagedCall;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct CallRegistry {
    calls: BTreeMap<String, BTreeMap<String, Arc<dyn ManagedCall>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-registers the well-known rpc types so listings show empty
    /// sections for services the operator has not touched yet.
    pub fn with_types(rpc_types: &[&str]) -> Self {
        let mut registry = Self::new();
        for rpc_type in rpc_types {
            registry.calls.entry((*rpc_type).to_string()).or_default();
        }
        registry
    }

    /// Adds a call under its `(rpc_type, name)` key, replacing any existing
    /// entry of the same key.
    pub fn register(&mut self, call: Arc<dyn ManagedCall>) {
        self.calls
            .entry(call.rpc_type().to_string())
            .or_default()
            .insert(call.name().to_string(), call);
    }

    /// # Errors
    ///
    /// [`Error::NotFound`] when no call is registered under the key.
    pub fn get(&self, rpc_type: &str, name: &str) -> Result<Arc<dyn ManagedCall>> {
        self.calls
            .get(rpc_type)
            .and_then(|names| names.get(name))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                rpc_type: rpc_type.to_string(),
                name: name.to_string(),
            })
    }

    /// Typed lookup through the capability surface.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for an absent key, [`Error::Configuration`] when
    /// the registered call is not a `C`.
    pub fn get_as<C: Clone + 'static>(&self, rpc_type: &str, name: &str) -> Result<C> {
        let call = self.get(rpc_type, name)?;
        call.as_any()
            .downcast_ref::<C>()
            .cloned()
            .ok_or_else(|| Error::Configuration {
                reason: format!("rpc {rpc_type}/{name} has a different message type"),
            })
    }

    /// Removes a call, cancelling it first when `cancel` is set and a
    /// transport handle is live. The call is still registered while its
    /// cancellation is issued; the registry is left unchanged on failure.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no call is registered under the key.
    pub fn destroy(&mut self, rpc_type: &str, name: &str, cancel: bool) -> Result<()> {
        let names = self.calls.get_mut(rpc_type).ok_or_else(|| Error::NotFound {
            rpc_type: rpc_type.to_string(),
            name: name.to_string(),
        })?;
        let call = names.get(name).ok_or_else(|| Error::NotFound {
            rpc_type: rpc_type.to_string(),
            name: name.to_string(),
        })?;
        if cancel && call.has_live_handle() {
            call.cancel();
        }
        names.remove(name);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.calls.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ManagedCall>> {
        self.calls.values().flat_map(BTreeMap::values)
    }
}

impl core::fmt::Display for CallRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (rpc_type, names) in &self.calls {
            writeln!(f, "{rpc_type}")?;
            if names.is_empty() {
                writeln!(f, "   No RPCs of this type found")?;
                continue;
            }
            for call in names.values() {
                writeln!(f, "   {}", call.describe())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{Call, CallShape, CallStatus};
    use crate::error::TransportError;
    use crate::transport::{Metadata, StreamPair, Transport};
    use core::time::Duration;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct DeadTransport;

    impl Transport<String, String> for DeadTransport {
        fn call_unary(
            &self,
            _request: String,
            _metadata: Metadata,
            _timeout: Option<Duration>,
        ) -> BoxFuture<'static, core::result::Result<String, TransportError>> {
            async { Err(TransportError::Closed("dead".into())) }.boxed()
        }

        fn open_stream(
            &self,
            _metadata: Metadata,
            _timeout: Option<Duration>,
        ) -> BoxFuture<'static, core::result::Result<StreamPair<String, String>, TransportError>> {
            async { Err(TransportError::Closed("dead".into())) }.boxed()
        }
    }

    fn call(rpc_type: &str, name: &str) -> Arc<dyn ManagedCall> {
        Arc::new(Call::<String, String>::new(
            rpc_type,
            name,
            CallShape::Unary,
            Arc::new(DeadTransport),
            Vec::new(),
        ))
    }

    #[test]
    fn register_get_and_replace() {
        let mut registry = CallRegistry::new();
        registry.register(call("get", "g1"));
        assert!(registry.get("get", "g1").is_ok());

        // Same key replaces, no duplicate entry.
        registry.register(call("get", "g1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let registry = CallRegistry::with_types(&["get"]);
        assert!(matches!(
            registry.get("get", "missing"),
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            registry.get("no-such-type", "x"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn destroy_unknown_leaves_registry_unchanged() {
        let mut registry = CallRegistry::new();
        registry.register(call("get", "g1"));
        assert!(matches!(
            registry.destroy("get", "missing", true),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn destroy_removes_and_allows_recreation() {
        let mut registry = CallRegistry::new();
        registry.register(call("get", "g1"));
        registry.destroy("get", "g1", true).expect("key exists");
        assert!(registry.get("get", "g1").is_err());

        registry.register(call("get", "g1"));
        assert!(registry.get("get", "g1").is_ok());
    }

    /// Stub that always reports a live transport handle and records whether
    /// it was asked to cancel.
    struct LiveStub {
        cancelled: Arc<AtomicBool>,
    }

    impl ManagedCall for LiveStub {
        fn rpc_type(&self) -> &str {
            "subscribe"
        }
        fn name(&self) -> &str {
            "live"
        }
        fn shape(&self) -> CallShape {
            CallShape::Streaming
        }
        fn status(&self) -> CallStatus {
            CallStatus::Running
        }
        fn execute(&self, _timeout: Option<Duration>) -> Result<()> {
            Ok(())
        }
        fn has_live_handle(&self) -> bool {
            true
        }
        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        fn pending_tasks(&self) -> usize {
            0
        }
        fn last_error(&self) -> Option<Error> {
            None
        }
        fn clear(&self) {}
        fn wait(&self, _timeout: Duration) -> BoxFuture<'_, ()> {
            async {}.boxed()
        }
        fn describe(&self) -> String {
            "subscribe/live".to_string()
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn destroy_cancels_live_calls_before_removal() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = CallRegistry::new();
        registry.register(Arc::new(LiveStub {
            cancelled: Arc::clone(&cancelled),
        }));

        registry.destroy("subscribe", "live", true).expect("key exists");
        assert!(cancelled.load(Ordering::SeqCst));
        assert!(registry.get("subscribe", "live").is_err());
    }

    #[test]
    fn destroy_without_cancel_leaves_the_worker_alone() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut registry = CallRegistry::new();
        registry.register(Arc::new(LiveStub {
            cancelled: Arc::clone(&cancelled),
        }));

        registry.destroy("subscribe", "live", false).expect("key exists");
        assert!(!cancelled.load(Ordering::SeqCst));
        assert!(registry.get("subscribe", "live").is_err());
    }

    #[test]
    fn typed_lookup_downcasts() {
        let mut registry = CallRegistry::new();
        registry.register(call("get", "g1"));
        let typed: Call<String, String> = registry.get_as("get", "g1").expect("same type");
        assert_eq!(typed.name(), "g1");
        assert!(registry.get_as::<Call<u32, u32>>("get", "g1").is_err());
    }
}
