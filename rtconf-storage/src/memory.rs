//! In-memory source-of-truth store with pub/sub.
//!
//! One instance is shared (through `Arc`) by every simulated process, so it
//! plays the role of the central store in tests and in the worker demo. It
//! supports fault injection to exercise the circuit breaker and the
//! subscriber's reconnect loop.

use crate::store::{ConfigStore, Notification, NotificationBus, NotificationStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use rtconf_core::{ConfigKey, ConfigValue, StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// Default per-channel buffer before slow subscribers start lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Shared in-memory key/value store and message bus.
#[derive(Debug)]
pub struct InMemoryConfigStore {
    values: RwLock<HashMap<ConfigKey, ConfigValue>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Notification>>>,
    available: AtomicBool,
    /// Bumped to end every live subscription stream.
    disconnect: watch::Sender<u64>,
    channel_capacity: usize,
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose channels buffer `channel_capacity` messages.
    pub fn with_capacity(channel_capacity: usize) -> Self {
        let (disconnect, _) = watch::channel(0);
        Self {
            values: RwLock::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            disconnect,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Seed a value without going through the write path.
    pub fn insert(&self, key: impl Into<ConfigKey>, value: impl Into<ConfigValue>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Remove a key entirely.
    pub fn remove(&self, key: &ConfigKey) -> Option<ConfigValue> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Read a value directly, bypassing availability checks.
    pub fn peek(&self, key: &ConfigKey) -> Option<ConfigValue> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    ///
    /// Going down also drops every live subscription, the way a broken
    /// connection would.
    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was && !available {
            tracing::debug!("In-memory store marked unavailable");
            self.disconnect_subscribers();
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// End every live subscription stream.
    pub fn disconnect_subscribers(&self) {
        self.disconnect.send_modify(|generation| *generation += 1);
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::connection("store unreachable"))
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Notification> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
            .clone()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn read_value(&self, key: &ConfigKey) -> StoreResult<Option<ConfigValue>> {
        self.check_available()?;
        Ok(self.peek(key))
    }

    async fn write_value(&self, key: &ConfigKey, value: &ConfigValue) -> StoreResult<()> {
        self.check_available()?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), value.clone());
        Ok(())
    }
}

#[async_trait]
impl NotificationBus for InMemoryConfigStore {
    async fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<usize> {
        self.check_available()?;
        let sender = self.sender(channel);
        // No live receivers is not an error, just nobody to notify.
        Ok(sender
            .send(Notification::new(channel, payload.to_vec()))
            .unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<NotificationStream> {
        self.check_available()?;
        let receiver = self.sender(channel).subscribe();
        let mut disconnect = self.disconnect.subscribe();
        let dropped = async move {
            let _ = disconnect.changed().await;
        };

        let stream = BroadcastStream::new(receiver)
            .map(|item| match item {
                Ok(notification) => Ok(notification),
                Err(BroadcastStreamRecvError::Lagged(missed)) => Err(StoreError::protocol(
                    format!("subscriber lagged, {} notifications dropped", missed),
                )),
            })
            .take_until(dropped);

        Ok(stream.boxed())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let store = InMemoryConfigStore::new();
        let key = ConfigKey::from("MAX_RETRIES");
        assert_eq!(store.read_value(&key).await.unwrap(), None);

        store.write_value(&key, &ConfigValue::Int(3)).await.unwrap();
        assert_eq!(store.read_value(&key).await.unwrap(), Some(ConfigValue::Int(3)));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_everything() {
        let store = InMemoryConfigStore::new();
        store.insert("A", 1);
        store.set_available(false);

        let key = ConfigKey::from("A");
        assert!(matches!(
            store.read_value(&key).await,
            Err(StoreError::Connection { .. })
        ));
        assert!(store.write_value(&key, &ConfigValue::Int(2)).await.is_err());
        assert!(store.publish("cfg", b"A").await.is_err());
        assert!(store.subscribe("cfg").await.is_err());
        // The data itself survives the outage.
        assert_eq!(store.peek(&key), Some(ConfigValue::Int(1)));
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let store = InMemoryConfigStore::new();
        let mut first = store.subscribe("cfg").await.unwrap();
        let mut second = store.subscribe("cfg").await.unwrap();
        assert_eq!(store.subscriber_count("cfg"), 2);

        let delivered = store.publish("cfg", b"SITE_NAME").await.unwrap();
        assert_eq!(delivered, 2);

        for stream in [&mut first, &mut second] {
            let n = stream.next().await.unwrap().unwrap();
            assert_eq!(n.key(), Some(ConfigKey::from("SITE_NAME")));
            assert_eq!(n.channel, "cfg");
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_reports_zero() {
        let store = InMemoryConfigStore::new();
        assert_eq!(store.publish("cfg", b"A").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let store = InMemoryConfigStore::new();
        let mut other = store.subscribe("other").await.unwrap();
        store.publish("cfg", b"A").await.unwrap();
        let next = tokio::time::timeout(Duration::from_millis(50), other.next()).await;
        assert!(next.is_err(), "message leaked across channels");
    }

    #[tokio::test]
    async fn test_disconnect_ends_streams() {
        let store = InMemoryConfigStore::new();
        let mut stream = store.subscribe("cfg").await.unwrap();
        store.disconnect_subscribers();
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_outage_ends_streams() {
        let store = InMemoryConfigStore::new();
        let mut stream = store.subscribe("cfg").await.unwrap();
        store.set_available(false);
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_gets_protocol_error() {
        let store = InMemoryConfigStore::with_capacity(1);
        let mut stream = store.subscribe("cfg").await.unwrap();
        store.publish("cfg", b"A").await.unwrap();
        store.publish("cfg", b"B").await.unwrap();
        store.publish("cfg", b"C").await.unwrap();

        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(StoreError::Protocol { .. })));
    }
}
