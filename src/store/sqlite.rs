use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use parking_lot::Mutex;
use rusqlite::Connection;

use super::{Error, MetricsStore, Result, CONTAINER_CSV_HEADER, HOST_CSV_HEADER};
use crate::container::{ContainerId, ContainerLimits, ContainerRecord};
use crate::sampler::{HostSample, Sample};

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS containers (
    name TEXT PRIMARY KEY,
    id TEXT,
    cpus REAL,
    memory REAL,
    pids_limit INTEGER
);
CREATE TABLE IF NOT EXISTS container_metrics (
    container_name TEXT,
    timestamp INTEGER,
    cpu_usage REAL,
    memory_usage REAL,
    pids INTEGER
);
CREATE TABLE IF NOT EXISTS host_usage (
    timestamp INTEGER,
    cpu_usage_percent REAL,
    memory_usage_percent REAL
);
";

/// SQLite-backed [`MetricsStore`].
///
/// One mutex serializes every call: mutations, cache reads, and export.
/// When the database cannot be opened the adapter goes inert — reads serve
/// the (empty) cache, writes succeed as no-ops — so a broken storage path
/// degrades the monitor instead of killing it.
pub struct SqliteStore {
    inner: Mutex<Inner>,
}

struct Inner {
    conn: Option<Connection>,
    cache: BTreeMap<String, ContainerRecord>,
}

impl SqliteStore {
    /// Opens (or creates) the database file at `path`.
    ///
    /// An open failure is logged and produces an inert adapter.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let conn = match Connection::open(path) {
            Ok(conn) => Some(conn),
            Err(source) => {
                log::error!(
                    "{}",
                    Error::Open {
                        path: path.to_path_buf(),
                        source,
                    }
                );
                None
            }
        };
        Self {
            inner: Mutex::new(Inner {
                conn,
                cache: BTreeMap::new(),
            }),
        }
    }

    /// Opens an in-memory database, for tests.
    pub fn open_in_memory() -> Self {
        let conn = match Connection::open_in_memory() {
            Ok(conn) => Some(conn),
            Err(err) => {
                log::error!("failed to open in-memory database: {err}");
                None
            }
        };
        Self {
            inner: Mutex::new(Inner {
                conn,
                cache: BTreeMap::new(),
            }),
        }
    }

    /// Whether the adapter has a live connection.
    pub fn is_open(&self) -> bool {
        self.inner.lock().conn.is_some()
    }
}

impl Inner {
    fn load_cache(&mut self) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        self.cache.clear();
        let mut stmt = conn.prepare("SELECT name, id, cpus, memory, pids_limit FROM containers")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        for row in rows {
            let (name, id, cpus, memory, pids_limit) = row?;
            match ContainerId::from_str(&id) {
                Ok(id) => {
                    self.cache.insert(
                        name,
                        ContainerRecord {
                            id,
                            limits: ContainerLimits {
                                cpu_limit_cores: cpus,
                                memory_limit_mb: memory as i64,
                                pid_limit: pids_limit,
                            },
                        },
                    );
                }
                Err(err) => {
                    log::warn!("skipping container row `{name}` with bad id: {err}");
                }
            }
        }
        Ok(())
    }
}

impl MetricsStore for SqliteStore {
    fn setup_schema(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(conn) = &inner.conn {
            conn.execute_batch(SCHEMA)?;
        }
        inner.load_cache()
    }

    fn upsert_container(&self, name: &str, record: &ContainerRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(conn) = &inner.conn {
            conn.execute(
                "INSERT OR REPLACE INTO containers (name, id, cpus, memory, pids_limit) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    name,
                    record.id.as_str(),
                    record.limits.cpu_limit_cores,
                    record.limits.memory_limit_mb as f64,
                    record.limits.pid_limit,
                ],
            )?;
        }
        inner.cache.insert(name.to_owned(), *record);
        Ok(())
    }

    fn delete_container(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(conn) = &inner.conn {
            conn.execute(
                "DELETE FROM containers WHERE name = ?1",
                rusqlite::params![name],
            )?;
        }
        inner.cache.remove(name);
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(conn) = &inner.conn {
            conn.execute("DELETE FROM containers", [])?;
        }
        inner.cache.clear();
        Ok(())
    }

    fn get_container(&self, name: &str) -> Option<ContainerRecord> {
        self.inner.lock().cache.get(name).copied()
    }

    fn list(&self) -> BTreeMap<String, ContainerRecord> {
        self.inner.lock().cache.clone()
    }

    fn insert_batch(&self, name: &str, samples: &[Sample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        let Some(conn) = &mut inner.conn else {
            return Ok(());
        };
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO container_metrics \
                 (container_name, timestamp, cpu_usage, memory_usage, pids) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for sample in samples {
                stmt.execute(rusqlite::params![
                    name,
                    sample.timestamp_ms,
                    sample.cpu_pct,
                    sample.mem_pct,
                    sample.pid_pct,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_host_sample(&self, sample: &HostSample) -> Result<()> {
        let inner = self.inner.lock();
        if let Some(conn) = &inner.conn {
            conn.execute(
                "INSERT INTO host_usage (timestamp, cpu_usage_percent, memory_usage_percent) \
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![sample.timestamp_ms, sample.cpu_pct, sample.mem_pct],
            )?;
        }
        Ok(())
    }

    fn export_to_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|source| Error::Export {
            path: dir.to_path_buf(),
            source,
        })?;

        let inner = self.inner.lock();

        let container_path = dir.join("container_metrics.csv");
        let mut container_csv = String::from(CONTAINER_CSV_HEADER);
        let host_path = dir.join("host_usage.csv");
        let mut host_csv = String::from(HOST_CSV_HEADER);

        if let Some(conn) = &inner.conn {
            let mut stmt = conn.prepare(
                "SELECT container_name, timestamp, cpu_usage, memory_usage, pids \
                 FROM container_metrics",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })?;
            for row in rows {
                let (name, ts, cpu, mem, pids) = row?;
                container_csv.push_str(&format!("{name},{ts},{cpu},{mem},{pids}\n"));
            }

            let mut stmt = conn.prepare(
                "SELECT timestamp, cpu_usage_percent, memory_usage_percent FROM host_usage",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?;
            for row in rows {
                let (ts, cpu, mem) = row?;
                host_csv.push_str(&format!("{ts},{cpu},{mem}\n"));
            }
        }

        write_file(&container_path, &container_csv)?;
        write_file(&host_path, &host_csv)?;
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    let mut file = std::fs::File::create(path).map_err(|source| Error::Export {
        path: path.to_path_buf(),
        source,
    })?;
    file.write_all(contents.as_bytes())
        .map_err(|source| Error::Export {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn record() -> ContainerRecord {
        ContainerRecord {
            id: ContainerId::from_str(ID).unwrap(),
            limits: ContainerLimits {
                cpu_limit_cores: 1.5,
                memory_limit_mb: 512,
                pid_limit: 200,
            },
        }
    }

    fn sample(ts: i64, cpu: f64) -> Sample {
        Sample {
            timestamp_ms: ts,
            cpu_pct: cpu,
            mem_pct: 50.0,
            pid_pct: 25.0,
        }
    }

    fn open_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory();
        store.setup_schema().unwrap();
        store
    }

    #[test]
    fn test_setup_schema_is_idempotent() {
        let store = open_store();
        store.setup_schema().unwrap();
        store.setup_schema().unwrap();
    }

    #[test]
    fn test_upsert_get_delete_roundtrip() {
        let store = open_store();
        assert_eq!(store.get_container("alpha"), None);

        store.upsert_container("alpha", &record()).unwrap();
        assert_eq!(store.get_container("alpha"), Some(record()));

        // last write wins
        let mut updated = record();
        updated.limits.pid_limit = 99;
        store.upsert_container("alpha", &updated).unwrap();
        assert_eq!(store.get_container("alpha").unwrap().limits.pid_limit, 99);

        store.delete_container("alpha").unwrap();
        assert_eq!(store.get_container("alpha"), None);
        // deleting again is a no-op
        store.delete_container("alpha").unwrap();
    }

    #[test]
    fn test_cache_miss_is_none_not_zeroes() {
        let store = open_store();
        assert!(store.get_container("never-seen").is_none());
    }

    #[test]
    fn test_list_is_ordered_snapshot() {
        let store = open_store();
        store.upsert_container("beta", &record()).unwrap();
        store.upsert_container("alpha", &record()).unwrap();
        let names: Vec<_> = store.list().into_keys().collect();
        assert_eq!(names, vec!["alpha".to_owned(), "beta".to_owned()]);
    }

    #[test]
    fn test_clear_all() {
        let store = open_store();
        store.upsert_container("alpha", &record()).unwrap();
        store.clear_all().unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_cache_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.db");
        {
            let store = SqliteStore::open(&path);
            store.setup_schema().unwrap();
            store.upsert_container("alpha", &record()).unwrap();
        }
        let store = SqliteStore::open(&path);
        store.setup_schema().unwrap();
        assert_eq!(store.get_container("alpha"), Some(record()));
    }

    #[test]
    fn test_insert_batch_and_export() {
        let store = open_store();
        store
            .insert_batch("alpha", &[sample(1, 0.0), sample(2, 10.0), sample(3, 10.0)])
            .unwrap();
        store
            .insert_host_sample(&HostSample {
                timestamp_ms: 4,
                cpu_pct: 12.5,
                mem_pct: 42.0,
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        store.export_to_dir(dir.path()).unwrap();

        let containers =
            std::fs::read_to_string(dir.path().join("container_metrics.csv")).unwrap();
        let mut lines = containers.lines();
        assert_eq!(
            lines.next().unwrap(),
            "container_name,timestamp,cpu_usage,memory_usage,pids"
        );
        assert_eq!(lines.next().unwrap(), "alpha,1,0,50,25");
        assert_eq!(lines.next().unwrap(), "alpha,2,10,50,25");
        assert_eq!(lines.next().unwrap(), "alpha,3,10,50,25");

        let host = std::fs::read_to_string(dir.path().join("host_usage.csv")).unwrap();
        let mut lines = host.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,cpu_usage_percent,memory_usage_percent"
        );
        assert_eq!(lines.next().unwrap(), "4,12.5,42");
    }

    #[test]
    fn test_empty_batch_is_a_no_op() {
        let store = open_store();
        store.insert_batch("alpha", &[]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        store.export_to_dir(dir.path()).unwrap();
        let containers =
            std::fs::read_to_string(dir.path().join("container_metrics.csv")).unwrap();
        assert_eq!(containers, CONTAINER_CSV_HEADER);
    }

    #[test]
    fn test_inert_store_writes_are_no_ops() {
        // An unopenable path (directory in the way) produces an inert store.
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path());
        assert!(!store.is_open());

        store.setup_schema().unwrap();
        store.upsert_container("alpha", &record()).unwrap();
        store.insert_batch("alpha", &[sample(1, 0.0)]).unwrap();
        store
            .insert_host_sample(&HostSample {
                timestamp_ms: 1,
                cpu_pct: 0.0,
                mem_pct: 0.0,
            })
            .unwrap();

        // exports still produce header-only files
        let out = tempfile::tempdir().unwrap();
        store.export_to_dir(out.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(out.path().join("host_usage.csv")).unwrap(),
            HOST_CSV_HEADER
        );
    }
}
