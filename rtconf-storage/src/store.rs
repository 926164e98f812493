//! Seams to the source-of-truth store.
//!
//! The store is external and networked. The cache depends on exactly two
//! capabilities: reading a key, and a pub/sub channel for invalidation
//! notices. Writing is only used by the write path.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rtconf_core::{ConfigKey, ConfigValue, StoreResult};

/// A message received on a pub/sub channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Decode the payload as a config key.
    ///
    /// Returns `None` for non-UTF-8 or blank payloads.
    pub fn key(&self) -> Option<ConfigKey> {
        let text = std::str::from_utf8(&self.payload).ok()?.trim();
        if text.is_empty() {
            None
        } else {
            Some(ConfigKey::from(text))
        }
    }
}

/// Stream of notifications for one subscription.
///
/// An `Err` item is a transport fault; the end of the stream means the
/// subscription was dropped. Either way the subscriber reconnects.
pub type NotificationStream = BoxStream<'static, StoreResult<Notification>>;

/// Key/value side of the source-of-truth store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the authoritative value of `key`.
    ///
    /// `Ok(None)` means the key is absent, which is not a fault.
    async fn read_value(&self, key: &ConfigKey) -> StoreResult<Option<ConfigValue>>;

    /// Overwrite the authoritative value of `key`.
    async fn write_value(&self, key: &ConfigKey, value: &ConfigValue) -> StoreResult<()>;
}

/// Pub/sub side of the source-of-truth store.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    /// Publish `payload` on `channel`, returning how many subscribers received it.
    async fn publish(&self, channel: &str, payload: &[u8]) -> StoreResult<usize>;

    /// Subscribe to `channel`. Only messages published afterwards are delivered.
    async fn subscribe(&self, channel: &str) -> StoreResult<NotificationStream>;
}
