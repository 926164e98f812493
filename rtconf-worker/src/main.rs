//! rtconf Worker Fleet Simulator
//!
//! Starts several simulated worker processes sharing one in-memory store,
//! has each read `MAX_RETRIES`, applies a change from the first worker and
//! waits until every worker observes the new value.

use std::sync::Arc;
use std::time::Duration;

use rtconf_core::{ConfigValue, RealtimeSettings};
use rtconf_storage::{InMemoryConfigStore, SubscriberState};
use rtconf_worker::activity::MAX_RETRIES_KEY;
use rtconf_worker::{
    init_tracing, load_defaults, open_change_log, ActivityJobSettings, Backends,
    TelemetryConfig, WorkerError, WorkerResult, WorkerRuntime,
};

const DEFAULT_SIM_WORKERS: usize = 3;
const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> WorkerResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let settings = RealtimeSettings::from_env();
    settings.validate()?;
    if !settings.store_url.starts_with("memory://") {
        return Err(WorkerError::UnsupportedStore {
            url: settings.store_url.clone(),
            reason: "the simulator only runs against the in-memory store".to_string(),
        });
    }

    let workers = std::env::var("RTCONF_SIM_WORKERS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_SIM_WORKERS);

    let defaults = load_defaults(&settings);
    let store = Arc::new(InMemoryConfigStore::new());
    let backends = Backends {
        store: store.clone(),
        bus: store.clone(),
        change_log: open_change_log(&settings)?,
    };

    let mut fleet = Vec::with_capacity(workers);
    for i in 0..workers {
        let runtime = WorkerRuntime::start(
            format!("worker-{}", i + 1),
            settings.clone(),
            defaults.clone(),
            backends.clone(),
        )?;
        let subscribed = runtime
            .service()
            .wait_for_subscriber(SubscriberState::Subscribed, settings.retry_interval)
            .await;
        if !subscribed {
            tracing::warn!(
                worker_id = runtime.worker_id(),
                state = runtime.service().subscriber_state().as_str(),
                "Subscriber not connected before reads, invalidations may be missed"
            );
        }
        fleet.push(runtime);
    }
    tracing::info!(workers, "Worker fleet started");

    let mut current = 0;
    for runtime in &fleet {
        let job = ActivityJobSettings::load(runtime.service()).await;
        tracing::info!(
            worker_id = runtime.worker_id(),
            max_retries = job.max_retries,
            "Worker read job settings"
        );
        current = job.max_retries;
    }

    let target = i64::from(current) + 2;
    let report = fleet[0].writer().apply(MAX_RETRIES_KEY, target).await?;
    tracing::info!(
        key = MAX_RETRIES_KEY,
        new_value = target,
        audited = report.audited,
        delivered_to = ?report.delivered_to,
        "Applied config change"
    );

    let started = tokio::time::Instant::now();
    let expected = ConfigValue::Int(target);
    loop {
        let mut converged = 0;
        for runtime in &fleet {
            if runtime.service().get(MAX_RETRIES_KEY).await.value() == Some(&expected) {
                converged += 1;
            }
        }
        if converged == fleet.len() {
            break;
        }
        if started.elapsed() >= CONVERGENCE_TIMEOUT {
            return Err(WorkerError::NotConverged {
                key: MAX_RETRIES_KEY.to_string(),
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tracing::info!(
        key = MAX_RETRIES_KEY,
        workers = fleet.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "All workers converged"
    );

    for runtime in &fleet {
        let metrics = runtime.service().metrics();
        tracing::info!(
            worker_id = runtime.worker_id(),
            hits = metrics.hits,
            store_reads = metrics.store_reads,
            invalidations = metrics.invalidations,
            "Worker cache metrics"
        );
        runtime.shutdown().await;
    }
    Ok(())
}
