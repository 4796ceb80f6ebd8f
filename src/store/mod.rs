//! Durable storage for container limits, container samples, and host
//! samples.
//!
//! The store is an embedded SQLite database behind a single adapter-level
//! lock. All sample writes are append-only; limit rows are upserted and
//! deleted as containers come and go. The [`MetricsStore`] trait is the
//! seam the worker pool and lifecycle coordinator program against, so tests
//! can substitute a recording store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::container::ContainerRecord;
use crate::sampler::{HostSample, Sample};

mod sqlite;

pub use sqlite::SqliteStore;

/// First line of the exported container metrics CSV.
pub const CONTAINER_CSV_HEADER: &str = "container_name,timestamp,cpu_usage,memory_usage,pids\n";
/// First line of the exported host usage CSV.
pub const HOST_CSV_HEADER: &str = "timestamp,cpu_usage_percent,memory_usage_percent\n";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open database `{path}`: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("database query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("failed to write export file `{path}`: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The durable store interface used by the sampling pipeline.
///
/// Implementations serialize all calls internally; handles are shared
/// between the coordinator and every worker.
pub trait MetricsStore: Send + Sync {
    /// Creates the three tables if they do not exist. Idempotent.
    fn setup_schema(&self) -> Result<()>;

    /// Inserts or replaces the limits row for `name`.
    fn upsert_container(&self, name: &str, record: &ContainerRecord) -> Result<()>;

    /// Deletes the limits row for `name`. Deleting an absent row is a no-op.
    fn delete_container(&self, name: &str) -> Result<()>;

    /// Removes every limits row.
    fn clear_all(&self) -> Result<()>;

    /// Looks up the limits row for `name`.
    ///
    /// A miss means the container is not (yet) known; callers must treat it
    /// that way and never substitute a zero-valued record.
    fn get_container(&self, name: &str) -> Option<ContainerRecord>;

    /// Returns a snapshot of the limits table, ordered by name.
    fn list(&self) -> BTreeMap<String, ContainerRecord>;

    /// Appends one batch of samples for `name` in a single transaction.
    fn insert_batch(&self, name: &str, samples: &[Sample]) -> Result<()>;

    /// Appends one host sample.
    fn insert_host_sample(&self, sample: &HostSample) -> Result<()>;

    /// Dumps the two sample tables as CSV files into `dir`.
    fn export_to_dir(&self, dir: &Path) -> Result<()>;
}
