//! Namespaced, TTL-aware persistent store

use std::sync::Arc;
use std::time::Duration;

use scout_core::{system_clock, SharedClock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::substrate::Substrate;

/// Key-value store layered over a [`Substrate`]
///
/// Every key is prefixed with `__{namespace}__` so several stores can share a
/// substrate. A key written with a TTL gets a companion `…__ttl__` entry
/// holding its expiry in epoch milliseconds.
///
/// Nothing here ever fails: a missing or unavailable substrate turns every
/// operation into a no-op, and read or write errors are logged and treated
/// as "nothing cached".
pub struct PersistentStore {
    prefix: String,
    substrate: Option<Arc<dyn Substrate>>,
    clock: SharedClock,
}

impl PersistentStore {
    const TTL_SUFFIX: &'static str = "__ttl__";

    /// Create a store for `namespace`, using the system clock
    pub fn new(namespace: &str, substrate: Option<Arc<dyn Substrate>>) -> Self {
        Self::with_clock(namespace, substrate, system_clock())
    }

    /// Create a store reading time from `clock`
    pub fn with_clock(
        namespace: &str,
        substrate: Option<Arc<dyn Substrate>>,
        clock: SharedClock,
    ) -> Self {
        let substrate = substrate.filter(|substrate| {
            let available = substrate.is_available();
            if !available {
                warn!("Storage substrate {:?} is unavailable, persistence disabled", substrate);
            }
            available
        });

        Self {
            prefix: format!("__{}__", namespace),
            substrate,
            clock,
        }
    }

    /// Whether operations reach a substrate
    pub fn is_enabled(&self) -> bool {
        self.substrate.is_some()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Read a value, purging it if its TTL has passed
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let substrate = self.substrate.as_ref()?;

        if self.is_expired(substrate.as_ref(), key).await {
            debug!("Persisted key '{}' expired", key);
            self.remove(key).await;
            return None;
        }

        let raw = match substrate.get_item(&self.prefixed(key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read '{}': {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Discarding unreadable value for '{}': {}", key, e);
                None
            }
        }
    }

    /// Write a value, optionally expiring after `ttl`
    ///
    /// Writing without a TTL clears any TTL left by an earlier write.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let Some(substrate) = self.substrate.as_ref() else {
            return;
        };

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize '{}': {}", key, e);
                return;
            }
        };

        if let Err(e) = substrate.set_item(&self.prefixed(key), &raw).await {
            warn!("Failed to write '{}': {}", key, e);
            return;
        }

        let ttl_key = self.ttl_key(key);
        let result = match ttl.and_then(|ttl| self.expiry_millis(ttl)) {
            Some(expiry) => substrate.set_item(&ttl_key, &expiry.to_string()).await,
            None => substrate.remove_item(&ttl_key).await,
        };
        if let Err(e) = result {
            warn!("Failed to update TTL for '{}': {}", key, e);
        }
    }

    /// Remove a value and its TTL
    pub async fn remove(&self, key: &str) {
        let Some(substrate) = self.substrate.as_ref() else {
            return;
        };

        for item in [self.prefixed(key), self.ttl_key(key)] {
            if let Err(e) = substrate.remove_item(&item).await {
                warn!("Failed to remove '{}': {}", item, e);
            }
        }
    }

    /// Remove every entry in this namespace
    pub async fn clear(&self) {
        let Some(substrate) = self.substrate.as_ref() else {
            return;
        };

        let keys = match substrate.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list keys for {}: {}", self.prefix, e);
                return;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|key| key.starts_with(&self.prefix)) {
            match substrate.remove_item(key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove '{}': {}", key, e),
            }
        }
        debug!("Cleared {} entries under {}", removed, self.prefix);
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn ttl_key(&self, key: &str) -> String {
        format!("{}{}{}", self.prefix, key, Self::TTL_SUFFIX)
    }

    fn expiry_millis(&self, ttl: Duration) -> Option<i64> {
        let ttl = chrono::Duration::from_std(ttl).ok()?;
        self.clock
            .now()
            .checked_add_signed(ttl)
            .map(|expiry| expiry.timestamp_millis())
    }

    async fn is_expired(&self, substrate: &dyn Substrate, key: &str) -> bool {
        match substrate.get_item(&self.ttl_key(key)).await {
            Ok(Some(raw)) => raw
                .trim()
                .parse::<i64>()
                .map(|expiry| self.clock.now().timestamp_millis() > expiry)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, StoreError};
    use crate::substrate::MemorySubstrate;
    use async_trait::async_trait;
    use scout_core::ManualClock;
    use serde_json::{json, Value};

    fn store_with(
        substrate: &Arc<MemorySubstrate>,
        namespace: &str,
        clock: &ManualClock,
    ) -> PersistentStore {
        PersistentStore::with_clock(
            namespace,
            Some(Arc::clone(substrate) as Arc<dyn Substrate>),
            Arc::new(clock.clone()),
        )
    }

    #[derive(Debug)]
    struct BrokenSubstrate {
        available: bool,
    }

    #[async_trait]
    impl Substrate for BrokenSubstrate {
        fn is_available(&self) -> bool {
            self.available
        }

        async fn get_item(&self, _key: &str) -> Result<Option<String>> {
            Err(StoreError::Unavailable("read".into()))
        }

        async fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
            Err(StoreError::Unavailable("quota exceeded".into()))
        }

        async fn remove_item(&self, _key: &str) -> Result<()> {
            Err(StoreError::Unavailable("remove".into()))
        }

        async fn keys(&self) -> Result<Vec<String>> {
            Err(StoreError::Unavailable("keys".into()))
        }
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let substrate = Arc::new(MemorySubstrate::new());
        let store = store_with(&substrate, "ns", &ManualClock::default());

        store.set("data", &json!({ "a": [1, 2] }), None).await;
        assert_eq!(store.get::<Value>("data").await, Some(json!({ "a": [1, 2] })));
        assert_eq!(store.get::<Value>("missing").await, None);

        store.remove("data").await;
        assert_eq!(store.get::<Value>("data").await, None);
        assert!(substrate.is_empty());
    }

    #[tokio::test]
    async fn test_ttl_expiry_purges_entries() {
        let substrate = Arc::new(MemorySubstrate::new());
        let clock = ManualClock::default();
        let store = store_with(&substrate, "ns", &clock);

        store.set("k", &"v", Some(Duration::from_millis(100))).await;
        assert_eq!(substrate.len(), 2);

        clock.advance(chrono::Duration::milliseconds(50));
        assert_eq!(store.get::<String>("k").await.as_deref(), Some("v"));

        clock.advance(chrono::Duration::milliseconds(100));
        assert_eq!(store.get::<String>("k").await, None);
        assert!(substrate.is_empty());
    }

    #[tokio::test]
    async fn test_set_without_ttl_clears_old_ttl() {
        let substrate = Arc::new(MemorySubstrate::new());
        let clock = ManualClock::default();
        let store = store_with(&substrate, "ns", &clock);

        store.set("k", &1, Some(Duration::from_millis(10))).await;
        store.set("k", &2, None).await;
        clock.advance(chrono::Duration::seconds(60));

        assert_eq!(store.get::<i32>("k").await, Some(2));
        assert_eq!(substrate.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_only_touches_own_namespace() {
        let substrate = Arc::new(MemorySubstrate::new());
        let clock = ManualClock::default();
        let first = store_with(&substrate, "first", &clock);
        let second = store_with(&substrate, "second", &clock);

        first.set("a", &1, Some(Duration::from_secs(60))).await;
        first.set("b", &2, None).await;
        second.set("a", &3, None).await;

        first.clear().await;

        assert_eq!(first.get::<i32>("a").await, None);
        assert_eq!(first.get::<i32>("b").await, None);
        assert_eq!(second.get::<i32>("a").await, Some(3));
    }

    #[tokio::test]
    async fn test_unreadable_value_is_absent() {
        let substrate = Arc::new(MemorySubstrate::new());
        let store = store_with(&substrate, "ns", &ManualClock::default());

        substrate.set_item("__ns__k", "{not json").await.unwrap();
        assert_eq!(store.get::<Value>("k").await, None);
    }

    #[tokio::test]
    async fn test_missing_substrate_is_noop() {
        let store = PersistentStore::new("ns", None);
        assert!(!store.is_enabled());

        store.set("k", &1, None).await;
        assert_eq!(store.get::<i32>("k").await, None);
        store.remove("k").await;
        store.clear().await;
    }

    #[tokio::test]
    async fn test_unavailable_substrate_is_disabled() {
        let substrate: Arc<dyn Substrate> = Arc::new(BrokenSubstrate { available: false });
        let store = PersistentStore::new("ns", Some(substrate));
        assert!(!store.is_enabled());
    }

    #[tokio::test]
    async fn test_failing_substrate_errors_are_swallowed() {
        let store = PersistentStore::new("ns", Some(Arc::new(BrokenSubstrate { available: true })));
        assert!(store.is_enabled());

        store.set("k", &1, Some(Duration::from_secs(1))).await;
        assert_eq!(store.get::<i32>("k").await, None);
        store.remove("k").await;
        store.clear().await;
    }
}
