//! Config Write Path.
//!
//! Runs in whichever process accepted an edit. Two ordered, best-effort
//! effects: append an audit record, then publish the key on the
//! notification channel. A failed audit is logged and does not stop the
//! publish. No local cache is touched here, not even the writer's own: it
//! learns the new value through the same invalidation round-trip as every
//! other process.
//!
//! Every store, bus and sink call is bounded by the socket timeout, so a hung
//! connection degrades the report instead of parking the writer.

use rtconf_core::{
    ChangeLogError, ChangeLogRecord, ConfigKey, ConfigValue, RealtimeSettings, RtconfResult,
    StoreError, StoreResult,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::change_log::ChangeLogSink;
use crate::store::{ConfigStore, NotificationBus};

/// What a change notification actually achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    /// The audit record was appended.
    pub audited: bool,
    /// Subscribers that received the invalidation, `None` if publishing failed.
    pub delivered_to: Option<usize>,
}

impl WriteReport {
    pub fn is_complete(&self) -> bool {
        self.audited && self.delivered_to.is_some()
    }
}

/// Audits and announces configuration changes.
#[derive(Clone)]
pub struct ConfigWriter {
    channel: String,
    timeout: Duration,
    store: Arc<dyn ConfigStore>,
    bus: Arc<dyn NotificationBus>,
    change_log: Arc<dyn ChangeLogSink>,
}

impl std::fmt::Debug for ConfigWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWriter")
            .field("channel", &self.channel)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ConfigWriter {
    pub fn new(
        settings: &RealtimeSettings,
        store: Arc<dyn ConfigStore>,
        bus: Arc<dyn NotificationBus>,
        change_log: Arc<dyn ChangeLogSink>,
    ) -> Self {
        Self {
            channel: settings.channel.clone(),
            timeout: settings.socket_timeout,
            store,
            bus,
            change_log,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn bounded<T>(&self, op: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        tokio::time::timeout(self.timeout, op)
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Timeout {
                    timeout: self.timeout,
                })
            })
    }

    /// Record and announce a change that has already been stored.
    ///
    /// Never fails; the report says which effects took place.
    pub async fn notify_changed(
        &self,
        key: &ConfigKey,
        old_value: Option<ConfigValue>,
        new_value: ConfigValue,
    ) -> WriteReport {
        let record = ChangeLogRecord::new(key.clone(), old_value, new_value);
        let appended = tokio::time::timeout(self.timeout, self.change_log.append(record))
            .await
            .unwrap_or_else(|_| {
                Err(ChangeLogError::Io {
                    reason: format!("append timed out after {:?}", self.timeout),
                })
            });
        let audited = match appended {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to write change log record");
                false
            }
        };

        let published = self
            .bounded(self.bus.publish(&self.channel, key.as_str().as_bytes()))
            .await;
        let delivered_to = match published {
            Ok(receivers) => {
                tracing::info!(
                    key = %key,
                    channel = %self.channel,
                    receivers,
                    "Published config invalidation"
                );
                Some(receivers)
            }
            Err(e) => {
                tracing::error!(
                    key = %key,
                    channel = %self.channel,
                    error = %e,
                    "Failed to publish config invalidation"
                );
                None
            }
        };

        WriteReport {
            audited,
            delivered_to,
        }
    }

    /// Store `new_value` for `key`, then audit and announce it.
    ///
    /// Only a failed store write is an error; nothing is audited or
    /// published in that case.
    pub async fn apply(
        &self,
        key: impl Into<ConfigKey>,
        new_value: impl Into<ConfigValue>,
    ) -> RtconfResult<WriteReport> {
        let key = key.into();
        let new_value = new_value.into();

        let old_value = match self.bounded(self.store.read_value(&key)).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Could not read previous config value");
                None
            }
        };

        self.bounded(self.store.write_value(&key, &new_value)).await?;
        Ok(self.notify_changed(&key, old_value, new_value).await)
    }
}

// ============================================================================
// TESTS
// ============================================================================
