//! cgwatch: a host-resident monitor for containerized workloads.
//!
//! The monitor listens to the container runtime's lifecycle events, tracks
//! each live container's declared resource limits, samples actual usage
//! from the cgroup filesystem on a partitioned worker pool, and fans each
//! full batch of samples out to an embedded SQLite store and a POSIX
//! message queue feeding a live dashboard. At shutdown both sample tables
//! are exported as CSV.

use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

pub mod channel;
pub mod config;
pub mod container;
pub mod coordinator;
pub mod error;
pub mod fsutil;
pub mod pool;
pub mod runtime;
pub mod sampler;
pub mod store;

use channel::{MqSummarySink, SummarySink};
use config::Config;
use coordinator::LifecycleCoordinator;
use error::ResultOkLogExt;
use pool::{PoolConfig, WorkerPool};
use runtime::events::{EventFeed, EventQueue};
use runtime::inspect::CommandResolver;
use runtime::{CgroupVersion, Runtime};
use sampler::host::HostSampler;
use store::{MetricsStore, SqliteStore};

static SHUTDOWN: LazyLock<Arc<AtomicBool>> = LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// The process-wide shutdown flag. Signal handlers raise it; every loop in
/// the monitor polls it.
pub fn shutdown_flag() -> Arc<AtomicBool> {
    Arc::clone(&SHUTDOWN)
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Runtime(#[from] runtime::Error),
}

/// Runs the monitor until `shutdown` is raised, then shuts down in order:
/// event feed, worker pool (which flushes), CSV export.
///
/// # Errors
///
/// Returns an error only for configuration-level problems (an unsupported
/// runtime or cgroup version). Everything after startup degrades instead of
/// failing: a broken store goes inert, a dead event feed restarts, a full
/// summary queue drops messages.
pub fn run(config: &Config, shutdown: Arc<AtomicBool>) -> Result<(), RunError> {
    let runtime = Runtime::from_str(&config.runtime)?;
    let cgroup = CgroupVersion::from_str(&config.cgroup)?;
    if config.database != "sqlite" {
        log::warn!(
            "unsupported database backend `{}`, using sqlite",
            config.database
        );
    }

    let host_info = sampler::host::host_info();
    log::info!(
        "host: {} cpus, {} MB total memory",
        host_info.num_cpus,
        host_info.total_memory_mb
    );

    // a stale queue from a previous run would carry the old attributes
    channel::unlink_stale(channel::SUMMARY_QUEUE_NAME);

    let store: Arc<dyn MetricsStore> = Arc::new(SqliteStore::open(&config.db_path));
    store.setup_schema().ok_log();
    // limits rows from a previous run describe containers this run has not
    // observed; the event feed repopulates the table
    store.clear_all().ok_log();

    let summary: Option<Arc<dyn SummarySink>> = if config.ui_enabled {
        match MqSummarySink::new(channel::SUMMARY_QUEUE_NAME) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(err) => {
                log::warn!("summary channel unavailable: {err}");
                None
            }
        }
    } else {
        None
    };

    let pool = Arc::new(WorkerPool::new(
        PoolConfig {
            worker_count: config.thread_count,
            worker_capacity: config.thread_capacity,
            batch_size: config.batch_size,
            sample_interval: Duration::from_millis(config.resource_sampling_interval_ms),
            ui_enabled: config.ui_enabled,
        },
        Arc::clone(&store),
        runtime::select_paths(runtime, cgroup),
        summary,
        Arc::clone(&shutdown),
    ));
    pool.start();

    let refresh = Duration::from_millis(config.container_event_refresh_interval_ms);
    let events = Arc::new(EventQueue::new(runtime::events::EVENT_QUEUE_CAPACITY));
    let mut feed = EventFeed::spawn(runtime, Arc::clone(&events), Arc::clone(&shutdown), refresh);

    let mut coordinator = LifecycleCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&pool),
        Arc::clone(&events),
        Box::new(CommandResolver::new(runtime)),
        HostSampler::default(),
        refresh,
        Arc::clone(&shutdown),
    );
    coordinator.run();

    feed.stop();
    pool.stop();
    store.export_to_dir(&config.file_export_folder_path).ok_log();
    log::info!("shutdown complete");
    Ok(())
}
