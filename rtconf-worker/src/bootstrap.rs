//! Per-process bootstrap.
//!
//! Every hosting process (web handler or job worker) builds exactly one
//! [`WorkerRuntime`] at startup. Initialization loads the defaults table
//! and starts the invalidation subscriber, and is safe to repeat.

use rtconf_core::{DefaultsTable, RealtimeSettings, RtconfResult};
use rtconf_storage::{
    ChangeLogSink, ConfigService, ConfigStore, ConfigWriter, InMemoryChangeLog, JsonlChangeLog,
    NotificationBus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Connections to the shared backends.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn ConfigStore>,
    pub bus: Arc<dyn NotificationBus>,
    pub change_log: Arc<dyn ChangeLogSink>,
}

/// Defaults table named by the settings, or an empty one.
///
/// A missing or broken file is logged, not fatal.
pub fn load_defaults(settings: &RealtimeSettings) -> DefaultsTable {
    match &settings.defaults_path {
        Some(path) => DefaultsTable::load_or_empty(path),
        None => {
            tracing::info!("No defaults file configured, starting with an empty defaults table");
            DefaultsTable::empty()
        }
    }
}

/// Change log sink named by the settings: JSON lines on disk if a path is
/// set, otherwise in memory.
pub fn open_change_log(settings: &RealtimeSettings) -> RtconfResult<Arc<dyn ChangeLogSink>> {
    match &settings.change_log_path {
        Some(path) => Ok(Arc::new(JsonlChangeLog::open(path)?)),
        None => Ok(Arc::new(InMemoryChangeLog::new())),
    }
}

struct RuntimeInner {
    worker_id: String,
    pid: u32,
    service: ConfigService,
    writer: ConfigWriter,
    initialized: AtomicBool,
}

/// One hosting process's configuration runtime. Cheap to clone.
#[derive(Clone)]
pub struct WorkerRuntime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("worker_id", &self.inner.worker_id)
            .field("pid", &self.inner.pid)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl WorkerRuntime {
    /// Build the service and writer, then initialize.
    pub fn start(
        worker_id: impl Into<String>,
        settings: RealtimeSettings,
        defaults: DefaultsTable,
        backends: Backends,
    ) -> RtconfResult<Self> {
        let service = ConfigService::builder()
            .settings(settings.clone())
            .store(backends.store.clone())
            .bus(backends.bus.clone())
            .defaults(defaults)
            .build()?;
        let writer = ConfigWriter::new(&settings, backends.store, backends.bus, backends.change_log);

        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                worker_id: worker_id.into(),
                pid: std::process::id(),
                service,
                writer,
                initialized: AtomicBool::new(false),
            }),
        };
        runtime.initialize();
        Ok(runtime)
    }

    /// Start the subscriber if this runtime has not been initialized yet.
    ///
    /// Returns `true` on the first call only. Later calls still restart a
    /// subscriber whose task has ended.
    pub fn initialize(&self) -> bool {
        let inner = &self.inner;
        if inner.initialized.swap(true, Ordering::SeqCst) {
            if inner.service.start_subscriber() {
                tracing::warn!(
                    worker_id = %inner.worker_id,
                    pid = inner.pid,
                    "Subscriber was not running, restarted"
                );
            } else {
                tracing::info!(
                    worker_id = %inner.worker_id,
                    pid = inner.pid,
                    "Already initialized, skipping"
                );
            }
            return false;
        }

        tracing::info!(
            worker_id = %inner.worker_id,
            pid = inner.pid,
            defaults = inner.service.defaults().len(),
            "Loaded config defaults"
        );
        if inner.service.start_subscriber() {
            tracing::info!(
                worker_id = %inner.worker_id,
                pid = inner.pid,
                channel = %inner.service.settings().channel,
                "Started config invalidation subscriber"
            );
        }
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn service(&self) -> &ConfigService {
        &self.inner.service
    }

    pub fn writer(&self) -> &ConfigWriter {
        &self.inner.writer
    }

    /// Stop the subscriber. A later `initialize` starts it again.
    pub async fn shutdown(&self) {
        self.inner.service.stop_subscriber().await;
        self.inner.initialized.store(false, Ordering::SeqCst);
        tracing::info!(worker_id = %self.inner.worker_id, "Worker runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtconf_storage::{InMemoryConfigStore, SubscriberState};
    use std::time::Duration;

    fn backends() -> (Arc<InMemoryConfigStore>, Backends) {
        let store = Arc::new(InMemoryConfigStore::new());
        let backends = Backends {
            store: store.clone(),
            bus: store.clone(),
            change_log: Arc::new(InMemoryChangeLog::new()),
        };
        (store, backends)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (store, backends) = backends();
        let runtime = WorkerRuntime::start(
            "web-1",
            RealtimeSettings::default(),
            DefaultsTable::empty(),
            backends,
        )
        .unwrap();
        assert!(runtime.is_initialized());
        assert!(!runtime.initialize());
        assert!(!runtime.initialize());

        assert!(
            runtime
                .service()
                .wait_for_subscriber(SubscriberState::Subscribed, Duration::from_secs(2))
                .await
        );
        assert_eq!(store.subscriber_count(&runtime.service().settings().channel), 1);

        runtime.shutdown().await;
        assert!(!runtime.is_initialized());
        assert!(runtime.initialize());
        runtime.shutdown().await;
    }

    #[test]
    fn test_load_defaults_without_path_is_empty() {
        let defaults = load_defaults(&RealtimeSettings::default());
        assert!(defaults.is_empty());
    }

    #[test]
    fn test_load_defaults_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("defaults.toml");
        std::fs::write(&path, "[MAX_RETRIES]\ndefault = 3\nhelp = \"retries\"\n").unwrap();

        let settings = RealtimeSettings::default().with_defaults_path(&path);
        let defaults = load_defaults(&settings);
        assert_eq!(defaults.len(), 1);
    }

    #[tokio::test]
    async fn test_open_change_log_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.jsonl");
        let settings = RealtimeSettings::default().with_change_log_path(&path);
        let sink = open_change_log(&settings).unwrap();

        sink.append(rtconf_core::ChangeLogRecord::new(
            "SITE_NAME".into(),
            None,
            "Tracker".into(),
        ))
        .await
        .unwrap();
        assert!(path.exists());
        assert_eq!(sink.list_recent(10).await.unwrap().len(), 1);
    }
}
