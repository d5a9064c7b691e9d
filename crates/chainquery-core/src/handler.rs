//! Event handler trait, processing packs, and the dispatch registry.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::context::PersistenceContext;
use crate::error::IndexerError;
use crate::types::QueryEvent;

/// Trait for user-provided event handlers.
///
/// Delivery is at-least-once: after a crash the last uncommitted block is
/// replayed, so `handle` must be idempotent with respect to the store.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The event type this handler processes (e.g. `"balances.Transfer"`).
    fn event_type(&self) -> &str;

    /// Called for each event of [`event_type`](Self::event_type), in chain order.
    async fn handle(
        &self,
        event: &QueryEvent,
        ctx: &mut PersistenceContext,
    ) -> Result<(), IndexerError>;
}

/// A named set of handlers plus the event types the pack declares it must handle.
#[derive(Clone, Default)]
pub struct ProcessingPack {
    pub name: String,
    handlers: Vec<Arc<dyn EventHandler>>,
    required: Vec<String>,
}

impl ProcessingPack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a handler.
    pub fn on_event(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Declare that the pack must contain a handler for `event_type`.
    pub fn require(mut self, event_type: impl Into<String>) -> Self {
        self.required.push(event_type.into());
        self
    }

    pub fn handlers(&self) -> &[Arc<dyn EventHandler>] {
        &self.handlers
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }
}

impl std::fmt::Debug for ProcessingPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingPack")
            .field("name", &self.name)
            .field(
                "handlers",
                &self.handlers.iter().map(|h| h.event_type()).collect::<Vec<_>>(),
            )
            .field("required", &self.required)
            .finish()
    }
}

/// Event-type → handler map, resolved once from a [`ProcessingPack`].
pub struct HandlerRegistry {
    event_handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Validate `pack` and build the dispatch map.
    ///
    /// Fails with [`IndexerError::MalformedPack`] if two handlers claim the same
    /// event type or a required event type has no handler.
    pub fn from_pack(pack: &ProcessingPack) -> Result<Self, IndexerError> {
        let mut event_handlers = HashMap::new();
        for handler in pack.handlers() {
            let key = handler.event_type().to_string();
            if key.is_empty() {
                return Err(IndexerError::MalformedPack(format!(
                    "pack '{}' has a handler with an empty event type",
                    pack.name
                )));
            }
            if event_handlers.insert(key.clone(), handler.clone()).is_some() {
                return Err(IndexerError::MalformedPack(format!(
                    "pack '{}' registers '{key}' more than once",
                    pack.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for required in pack.required() {
            if !seen.insert(required.as_str()) {
                continue;
            }
            if !event_handlers.contains_key(required) {
                return Err(IndexerError::MalformedPack(format!(
                    "pack '{}' requires a handler for '{required}'",
                    pack.name
                )));
            }
        }

        Ok(Self { event_handlers })
    }

    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.event_handlers.get(event_type)
    }

    pub fn len(&self) -> usize {
        self.event_handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_handlers.is_empty()
    }

    /// Dispatch an event to its handler.
    ///
    /// Returns `Ok(false)` when no handler is registered for the event type;
    /// most on-chain events are irrelevant to a given pack.
    pub async fn dispatch(
        &self,
        event: &QueryEvent,
        ctx: &mut PersistenceContext,
    ) -> Result<bool, IndexerError> {
        match self.event_handlers.get(&event.event_type()) {
            Some(handler) => {
                handler.handle(event, ctx).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(Arc<AtomicU32>, String);

    #[async_trait]
    impl EventHandler for Counter {
        fn event_type(&self) -> &str {
            &self.1
        }

        async fn handle(
            &self,
            _e: &QueryEvent,
            _c: &mut PersistenceContext,
        ) -> Result<(), IndexerError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn counter(count: &Arc<AtomicU32>, event_type: &str) -> Arc<dyn EventHandler> {
        Arc::new(Counter(count.clone(), event_type.into()))
    }

    #[test]
    fn duplicate_handler_rejected() {
        let count = Arc::new(AtomicU32::new(0));
        let pack = ProcessingPack::new("dup")
            .on_event(counter(&count, "balances.Transfer"))
            .on_event(counter(&count, "balances.Transfer"));
        let err = HandlerRegistry::from_pack(&pack).err().unwrap();
        assert!(matches!(err, IndexerError::MalformedPack(_)));
        assert!(err.is_config());
    }

    #[test]
    fn missing_required_handler_rejected() {
        let count = Arc::new(AtomicU32::new(0));
        let pack = ProcessingPack::new("partial")
            .on_event(counter(&count, "balances.Transfer"))
            .require("balances.Transfer")
            .require("staking.Rewarded");
        let err = HandlerRegistry::from_pack(&pack).err().unwrap();
        assert!(err.to_string().contains("staking.Rewarded"));
    }

    #[test]
    fn valid_pack_builds_registry() {
        let count = Arc::new(AtomicU32::new(0));
        let pack = ProcessingPack::new("ok")
            .on_event(counter(&count, "balances.Transfer"))
            .on_event(counter(&count, "balances.Deposit"))
            .require("balances.Transfer");
        let registry = HandlerRegistry::from_pack(&pack).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("balances.Deposit").is_some());
        assert!(registry.get("system.ExtrinsicSuccess").is_none());
    }
}
