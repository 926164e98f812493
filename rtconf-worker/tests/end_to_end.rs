//! Multi-process scenarios: several worker runtimes sharing one store.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rtconf_core::{CircuitState, ConfigValue};
use rtconf_storage::{
    ChangeLogSink, ConfigService, InMemoryChangeLog, SubscriberState, ValueSource,
    LOGS_COUNT_KEY,
};
use rtconf_test_utils::generators::{arb_cache_ops, arb_change_record, CacheOp};
use rtconf_test_utils::{
    fixtures, wait_until, CountingStore, FailingChangeLog, FlakyBus, MutedBus,
};
use rtconf_worker::{Backends, WorkerRuntime};

const WAIT: Duration = Duration::from_secs(5);

struct Worker {
    runtime: WorkerRuntime,
    reads: Arc<CountingStore>,
}

async fn spawn_fleet(
    n: usize,
    store: &Arc<rtconf_test_utils::InMemoryConfigStore>,
    change_log: Arc<dyn ChangeLogSink>,
) -> Vec<Worker> {
    let mut fleet = Vec::new();
    for i in 0..n {
        let reads = Arc::new(CountingStore::new(store.clone()));
        let runtime = WorkerRuntime::start(
            format!("worker-{i}"),
            fixtures::fast_settings(),
            fixtures::sample_defaults(),
            Backends {
                store: reads.clone(),
                bus: store.clone(),
                change_log: change_log.clone(),
            },
        )
        .unwrap();
        assert!(
            runtime
                .service()
                .wait_for_subscriber(SubscriberState::Subscribed, WAIT)
                .await
        );
        fleet.push(Worker { runtime, reads });
    }
    fleet
}

async fn converged(fleet: &[Worker], key: &str, expected: &ConfigValue) -> bool {
    for worker in fleet {
        if worker.runtime.service().get(key).await.value() != Some(expected) {
            return false;
        }
    }
    true
}

async fn shutdown(fleet: &[Worker]) {
    for worker in fleet {
        worker.runtime.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn three_workers_converge_after_change() {
    let store = fixtures::shared_store();
    store.insert("MAX_RETRIES", 3);
    let log = Arc::new(InMemoryChangeLog::new());
    let fleet = spawn_fleet(3, &store, log.clone()).await;

    for worker in &fleet {
        let read = worker.runtime.service().get("MAX_RETRIES").await;
        assert_eq!(read.value(), Some(&ConfigValue::Int(3)));
        assert_eq!(worker.reads.reads(), 1);
    }
    // Cached: no further store traffic.
    for worker in &fleet {
        let read = worker.runtime.service().get("MAX_RETRIES").await;
        assert_eq!(read.source(), ValueSource::Cache);
        assert_eq!(worker.reads.reads(), 1);
    }

    let report = fleet[0].runtime.writer().apply("MAX_RETRIES", 5).await.unwrap();
    let reads_before: Vec<usize> = fleet.iter().map(|w| w.reads.reads()).collect();
    assert!(report.audited);
    assert_eq!(report.delivered_to, Some(3));

    let expected = ConfigValue::Int(5);
    let fleet_ref = &fleet;
    let expected_ref = &expected;
    assert!(
        wait_until(WAIT, move || async move {
            fleet_ref
                .iter()
                .all(|w| !w.runtime.service().cache().contains(&"MAX_RETRIES".into()))
        })
        .await
    );
    assert!(converged(&fleet, "MAX_RETRIES", expected_ref).await);

    for (worker, before) in fleet.iter().zip(reads_before) {
        // Exactly one re-fetch after the invalidation.
        assert_eq!(worker.reads.reads(), before + 1);
        assert_eq!(worker.runtime.service().metrics().invalidations, 1);
    }

    shutdown(&fleet).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn writer_leaves_its_own_cache_to_the_invalidation() {
    let store = fixtures::shared_store();
    store.insert("MAX_RETRIES", 3);
    let bus = Arc::new(MutedBus::new(store.clone()));
    let runtime = WorkerRuntime::start(
        "writer",
        fixtures::fast_settings(),
        fixtures::sample_defaults(),
        Backends {
            store: store.clone(),
            bus: bus.clone(),
            change_log: Arc::new(InMemoryChangeLog::new()),
        },
    )
    .unwrap();
    let service = runtime.service();
    assert!(
        service
            .wait_for_subscriber(SubscriberState::Subscribed, WAIT)
            .await
    );
    assert_eq!(service.get("MAX_RETRIES").await.value(), Some(&ConfigValue::Int(3)));

    let report = runtime.writer().apply("MAX_RETRIES", 5).await.unwrap();
    assert_eq!(report.delivered_to, Some(0));
    assert_eq!(bus.published(), 1);
    assert_eq!(store.peek(&"MAX_RETRIES".into()), Some(ConfigValue::Int(5)));

    // With the announcement swallowed, the old value is still served.
    let read = service.get("MAX_RETRIES").await;
    assert_eq!(read.source(), ValueSource::Cache);
    assert_eq!(read.value(), Some(&ConfigValue::Int(3)));
    assert_eq!(service.metrics().invalidations, 0);

    runtime.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_write_is_neither_audited_nor_announced() {
    let store = fixtures::shared_store();
    store.insert("WELCOME_MESSAGE", "hi");
    let log = Arc::new(InMemoryChangeLog::new());
    let fleet = spawn_fleet(2, &store, log.clone()).await;
    for worker in &fleet {
        worker.runtime.service().get("WELCOME_MESSAGE").await;
    }

    fleet[0].reads.set_failing(true);
    let result = fleet[0].runtime.writer().apply("WELCOME_MESSAGE", "hello").await;
    assert!(result.is_err());
    assert_eq!(fleet[0].reads.writes(), 1);
    assert!(log.is_empty().await);
    assert_eq!(store.peek(&"WELCOME_MESSAGE".into()), Some(ConfigValue::from("hi")));

    tokio::time::sleep(Duration::from_millis(100)).await;
    for worker in &fleet {
        assert_eq!(worker.runtime.service().metrics().invalidations, 0);
        let read = worker.runtime.service().get("WELCOME_MESSAGE").await;
        assert_eq!(read.source(), ValueSource::Cache);
    }

    shutdown(&fleet).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn change_is_audited_once_with_old_and_new_values() {
    let store = fixtures::shared_store();
    store.insert("THEME_COLOR", "#ffffff");
    let log = Arc::new(InMemoryChangeLog::new());
    let fleet = spawn_fleet(2, &store, log.clone()).await;

    fleet[1]
        .runtime
        .writer()
        .apply("THEME_COLOR", "#112233")
        .await
        .unwrap();

    let records = log.all().await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.key.as_str(), "THEME_COLOR");
    assert_eq!(record.old_value, Some(ConfigValue::from("#ffffff")));
    assert_eq!(record.new_value, ConfigValue::from("#112233"));

    let recent = fleet[0]
        .runtime
        .service()
        .recent_changes(log.as_ref(), "LOGS_COUNT")
        .await
        .unwrap();
    assert_eq!(recent, records);

    shutdown(&fleet).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_audit_does_not_block_invalidation() {
    let store = fixtures::shared_store();
    store.insert("SHOW_LOGS", false);
    let fleet = spawn_fleet(2, &store, Arc::new(FailingChangeLog)).await;

    for worker in &fleet {
        worker.runtime.service().get("SHOW_LOGS").await;
    }
    let report = fleet[0].runtime.writer().apply("SHOW_LOGS", true).await.unwrap();
    assert!(!report.audited);
    assert_eq!(report.delivered_to, Some(2));

    let fleet_ref = &fleet;
    assert!(
        wait_until(WAIT, move || async move {
            converged(fleet_ref, "SHOW_LOGS", &ConfigValue::Bool(true)).await
        })
        .await
    );

    shutdown(&fleet).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn outage_falls_back_then_recovers_and_resubscribes() {
    let store = fixtures::shared_store();
    store.insert("ITEMS_PER_PAGE", 25);
    let fleet = spawn_fleet(1, &store, Arc::new(InMemoryChangeLog::new())).await;
    let worker = &fleet[0];
    let service = worker.runtime.service();

    store.set_available(false);
    let read = service.get("ITEMS_PER_PAGE").await;
    assert_eq!(read.source(), ValueSource::PreloadedDefault);
    assert_eq!(read.value(), Some(&ConfigValue::Int(10)));
    assert_eq!(service.circuit().state, CircuitState::Open);

    let reads_during_outage = worker.reads.reads();
    for _ in 0..20 {
        service.get_or("ITEMS_PER_PAGE", 50).await;
    }
    assert_eq!(worker.reads.reads(), reads_during_outage);
    assert!(!service.health().is_healthy());
    assert!(
        service
            .wait_for_subscriber(SubscriberState::Backoff, WAIT)
            .await
    );

    store.set_available(true);
    assert!(
        service
            .wait_for_subscriber(SubscriberState::Subscribed, WAIT)
            .await
    );
    let svc = service;
    assert!(
        wait_until(WAIT, move || async move {
            svc.get("ITEMS_PER_PAGE").await.source() == ValueSource::Store
        })
        .await
    );
    assert_eq!(service.circuit().state, CircuitState::Closed);

    // The resubscribed listener still delivers invalidations.
    store.insert("ITEMS_PER_PAGE", 30);
    fleet[0]
        .runtime
        .writer()
        .notify_changed(&"ITEMS_PER_PAGE".into(), Some(ConfigValue::Int(25)), ConfigValue::Int(30))
        .await;
    assert!(
        wait_until(WAIT, move || async move {
            svc.get("ITEMS_PER_PAGE").await.value() == Some(&ConfigValue::Int(30))
        })
        .await
    );
    assert!(service.health().is_healthy());

    shutdown(&fleet).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscriber_retries_until_bus_accepts() {
    let store = fixtures::shared_store();
    let bus = Arc::new(FlakyBus::new(store.clone(), 3));
    let runtime = WorkerRuntime::start(
        "flaky",
        fixtures::fast_settings(),
        fixtures::sample_defaults(),
        Backends {
            store: store.clone(),
            bus: bus.clone(),
            change_log: Arc::new(InMemoryChangeLog::new()),
        },
    )
    .unwrap();

    assert!(
        runtime
            .service()
            .wait_for_subscriber(SubscriberState::Subscribed, WAIT)
            .await
    );
    assert_eq!(bus.subscribe_attempts(), 4);
    runtime.shutdown().await;
}

fn coherence_service(store: &Arc<rtconf_test_utils::InMemoryConfigStore>) -> ConfigService {
    ConfigService::builder()
        .settings(fixtures::fast_settings())
        .store(store.clone())
        .bus(store.clone())
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every write is followed by an eviction, so no read returns a value
    /// older than the last completed write.
    #[test]
    fn reads_never_stale_after_eviction(ops in arb_cache_ops(40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let store = fixtures::shared_store();
            let service = coherence_service(&store);

            for op in ops {
                match op {
                    CacheOp::Read(key) => {
                        let read = service.get(key.clone()).await;
                        prop_assert_eq!(read.into_value(), store.peek(&key));
                    }
                    CacheOp::Write(key, value) => {
                        store.insert(key.clone(), value);
                        service.invalidate(key);
                    }
                    CacheOp::Invalidate(key) => {
                        service.invalidate(key);
                    }
                }
            }
            Ok(())
        })?;
    }

    /// The change log page is the newest `LOGS_COUNT` records, newest first.
    #[test]
    fn recent_changes_are_newest_first_and_bounded(
        records in proptest::collection::vec(arb_change_record(), 0..30),
        limit in 1i64..15,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            let store = fixtures::shared_store();
            store.insert(LOGS_COUNT_KEY, ConfigValue::Int(limit));
            let service = coherence_service(&store);
            let log = InMemoryChangeLog::new();
            for record in &records {
                log.append(record.clone()).await.unwrap();
            }

            let recent = service.recent_changes(&log, LOGS_COUNT_KEY).await.unwrap();
            prop_assert_eq!(recent.len(), records.len().min(limit as usize));
            for pair in recent.windows(2) {
                prop_assert!(
                    (pair[0].changed_at, pair[0].id) >= (pair[1].changed_at, pair[1].id)
                );
            }
            for record in &recent {
                prop_assert!(records.contains(record));
            }
            Ok(())
        })?;
    }
}
