//! Invalidation subscriber background task.
//!
//! Listens on the notification channel and evicts every announced key from
//! the local cache. On subscribe failure, stream error or stream end it
//! backs off and resubscribes, forever. The only exit is the shutdown
//! signal.
//!
//! Messages published while no subscription is live are lost, so every
//! successful subscribe first clears the whole cache. Entries are then
//! re-fetched on demand.

use futures_util::StreamExt;
use rtconf_core::{ConfigKey, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::NotificationBus;

/// Lifecycle of the subscriber task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriberState {
    /// Never started.
    Idle,
    Connecting,
    Subscribed,
    /// Waiting before the next subscribe attempt.
    Backoff,
    Stopped,
}

impl SubscriberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

/// Doubling reconnect delay, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay to wait now; doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// A running subscriber task and its stop signal.
#[derive(Debug)]
pub(crate) struct SubscriberHandle {
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl SubscriberHandle {
    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the task to exit.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Invalidation subscriber panicked");
            }
        }
    }
}

/// Everything the subscriber loop needs.
pub(crate) struct SubscriberTask<F, R> {
    pub bus: Arc<dyn NotificationBus>,
    pub channel: String,
    /// Bound on a single subscribe call.
    pub subscribe_timeout: Duration,
    pub backoff: Backoff,
    pub state: Arc<watch::Sender<SubscriberState>>,
    /// Evict one announced key.
    pub invalidate: F,
    /// Drop every cached entry.
    pub resync: R,
}

impl<F, R> SubscriberTask<F, R>
where
    F: Fn(&ConfigKey) + Send + Sync + 'static,
    R: Fn() + Send + Sync + 'static,
{
    /// Spawn onto `runtime` and return the handle.
    pub(crate) fn spawn(self, runtime: &tokio::runtime::Handle) -> SubscriberHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(self.run(shutdown_rx));
        SubscriberHandle { task, shutdown }
    }

    async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!(channel = %self.channel, "Invalidation subscriber started");

        'reconnect: loop {
            if *shutdown_rx.borrow() {
                break;
            }
            self.state.send_replace(SubscriberState::Connecting);

            let subscribed = tokio::select! {
                _ = shutdown_rx.changed() => break 'reconnect,
                result = tokio::time::timeout(
                    self.subscribe_timeout,
                    self.bus.subscribe(&self.channel),
                ) => result.unwrap_or_else(|_| Err(StoreError::Timeout {
                    timeout: self.subscribe_timeout,
                })),
            };

            match subscribed {
                Ok(mut stream) => {
                    self.backoff.reset();
                    (self.resync)();
                    self.state.send_replace(SubscriberState::Subscribed);
                    tracing::info!(channel = %self.channel, "Subscribed to config updates");

                    loop {
                        tokio::select! {
                            _ = shutdown_rx.changed() => break 'reconnect,
                            item = stream.next() => match item {
                                Some(Ok(notification)) => match notification.key() {
                                    Some(key) => (self.invalidate)(&key),
                                    None => tracing::warn!(
                                        channel = %self.channel,
                                        payload_len = notification.payload.len(),
                                        "Ignoring undecodable invalidation message"
                                    ),
                                },
                                Some(Err(e)) => {
                                    tracing::warn!(
                                        channel = %self.channel,
                                        error = %e,
                                        "Subscription error, reconnecting"
                                    );
                                    break;
                                }
                                None => {
                                    tracing::warn!(
                                        channel = %self.channel,
                                        "Subscription closed, reconnecting"
                                    );
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        channel = %self.channel,
                        error = %e,
                        "Failed to subscribe to config updates"
                    );
                }
            }

            let delay = self.backoff.next_delay();
            self.state.send_replace(SubscriberState::Backoff);
            tracing::debug!(
                channel = %self.channel,
                retry_in_ms = delay.as_millis() as u64,
                "Invalidation subscriber backing off"
            );
            tokio::select! {
                _ = shutdown_rx.changed() => break 'reconnect,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(SubscriberState::Stopped);
        tracing::info!(channel = %self.channel, "Invalidation subscriber stopped");
    }
}
