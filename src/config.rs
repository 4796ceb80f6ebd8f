//! Configuration loading for the monitor.
//!
//! The config file is a flat `key=value` file; `#` starts a comment line and
//! blank lines are ignored. Every key has a default, so an empty file is a
//! valid configuration. Values that fail to parse fall back to their default
//! rather than aborting startup; only a missing or unreadable file is fatal.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Default location of the configuration file, relative to the binary's
/// working directory inside the deployment tree.
pub const CONFIG_FILE_PATH: &str = "../../config/parameter.conf";

const DEFAULT_RUNTIME: &str = "docker";
const DEFAULT_CGROUP: &str = "v2";
const DEFAULT_DATABASE: &str = "sqlite";
const DEFAULT_DB_PATH: &str = "../../storage/metrics.db";
const DEFAULT_RESOURCE_SAMPLING_INTERVAL_MS: u64 = 500;
const DEFAULT_CONTAINER_EVENT_REFRESH_INTERVAL_MS: u64 = 1000;
const DEFAULT_UI_ENABLED: bool = true;
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_ALERT_WARNING: f64 = 80.0;
const DEFAULT_ALERT_CRITICAL: f64 = 100.0;
const DEFAULT_ALERT_VIOLATION: f64 = 100.0;
const DEFAULT_THREAD_COUNT: usize = 5;
const DEFAULT_THREAD_CAPACITY: usize = 10;
const DEFAULT_FILE_EXPORT_FOLDER_PATH: &str = "../../storage";
const DEFAULT_UI_REFRESH_INTERVAL_MS: u64 = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The full monitor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Container runtime to observe (`docker` or `podman`).
    pub runtime: String,
    /// Cgroup hierarchy version (`v1` or `v2`).
    pub cgroup: String,
    /// Durable store backend name.
    pub database: String,
    /// Path of the SQLite database file.
    pub db_path: PathBuf,
    /// Interval between two sampling passes over one container, in ms.
    pub resource_sampling_interval_ms: u64,
    /// Timeout for one lifecycle-event pop, in ms.
    pub container_event_refresh_interval_ms: u64,
    /// Whether batch summaries are published to the dashboard queue.
    pub ui_enabled: bool,
    /// Number of samples buffered per container before a flush.
    pub batch_size: usize,
    /// Dashboard warning threshold, percent.
    pub alert_warning: f64,
    /// Dashboard critical threshold, percent.
    pub alert_critical: f64,
    /// Dashboard violation threshold, percent.
    pub alert_violation: f64,
    /// Number of sampling workers.
    pub thread_count: usize,
    /// Maximum containers assigned to one worker.
    pub thread_capacity: usize,
    /// Directory receiving the CSV exports at shutdown.
    pub file_export_folder_path: PathBuf,
    /// Dashboard refresh interval, in ms.
    pub ui_refresh_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: DEFAULT_RUNTIME.to_owned(),
            cgroup: DEFAULT_CGROUP.to_owned(),
            database: DEFAULT_DATABASE.to_owned(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            resource_sampling_interval_ms: DEFAULT_RESOURCE_SAMPLING_INTERVAL_MS,
            container_event_refresh_interval_ms: DEFAULT_CONTAINER_EVENT_REFRESH_INTERVAL_MS,
            ui_enabled: DEFAULT_UI_ENABLED,
            batch_size: DEFAULT_BATCH_SIZE,
            alert_warning: DEFAULT_ALERT_WARNING,
            alert_critical: DEFAULT_ALERT_CRITICAL,
            alert_violation: DEFAULT_ALERT_VIOLATION,
            thread_count: DEFAULT_THREAD_COUNT,
            thread_capacity: DEFAULT_THREAD_CAPACITY,
            file_export_folder_path: PathBuf::from(DEFAULT_FILE_EXPORT_FOLDER_PATH),
            ui_refresh_interval_ms: DEFAULT_UI_REFRESH_INTERVAL_MS,
        }
    }
}

impl Config {
    /// Loads the configuration from a `key=value` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Unreadable`] if the file cannot be opened or
    /// read. Malformed lines and unknown keys are skipped; values that fail
    /// to parse keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let reader = crate::fsutil::open_file_reader(path).map_err(|err| ConfigError::Unreadable {
            path: err.path,
            source: err.source,
        })?;

        let mut params = HashMap::new();
        for line in reader.lines() {
            let line = line.map_err(|source| ConfigError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            params.insert(key.trim().to_owned(), value.trim().to_owned());
        }

        Ok(Self::from_params(&params))
    }

    fn from_params(params: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            runtime: get_string(params, "runtime", defaults.runtime),
            cgroup: get_string(params, "cgroup", defaults.cgroup),
            database: get_string(params, "database", defaults.database),
            db_path: get_path(params, "db_path", defaults.db_path),
            resource_sampling_interval_ms: get_parsed(
                params,
                "resource_sampling_interval_ms",
                defaults.resource_sampling_interval_ms,
            ),
            container_event_refresh_interval_ms: get_parsed(
                params,
                "container_event_refresh_interval_ms",
                defaults.container_event_refresh_interval_ms,
            ),
            ui_enabled: get_bool(params, "ui_enabled", defaults.ui_enabled),
            batch_size: get_parsed(params, "batch_size", defaults.batch_size),
            alert_warning: get_parsed(params, "alert_warning", defaults.alert_warning),
            alert_critical: get_parsed(params, "alert_critical", defaults.alert_critical),
            alert_violation: get_parsed(params, "alert_violation", defaults.alert_violation),
            thread_count: get_parsed(params, "thread_count", defaults.thread_count),
            thread_capacity: get_parsed(params, "thread_capacity", defaults.thread_capacity),
            file_export_folder_path: get_path(
                params,
                "file_export_folder_path",
                defaults.file_export_folder_path,
            ),
            ui_refresh_interval_ms: get_parsed(
                params,
                "ui_refresh_interval_ms",
                defaults.ui_refresh_interval_ms,
            ),
        }
    }

    /// Logs the effective configuration at startup.
    pub fn log_summary(&self) {
        log::info!("Container monitor started");
        log::info!("Runtime: {} (cgroup {})", self.runtime, self.cgroup);
        log::info!(
            "Resource sampling interval: {} ms",
            self.resource_sampling_interval_ms
        );
        log::info!(
            "Container event refresh interval: {} ms",
            self.container_event_refresh_interval_ms
        );
        log::info!("DB path: {}", self.db_path.display());
        log::info!("UI enabled: {}", self.ui_enabled);
        log::info!("Batch size: {}", self.batch_size);
        log::info!(
            "Alert thresholds: warning={}, critical={}, violation={}",
            self.alert_warning,
            self.alert_critical,
            self.alert_violation
        );
        log::info!(
            "Workers: {} x capacity {}",
            self.thread_count,
            self.thread_capacity
        );
        log::info!("Export folder: {}", self.file_export_folder_path.display());
    }
}

fn get_string(params: &HashMap<String, String>, key: &str, default: String) -> String {
    params.get(key).cloned().unwrap_or(default)
}

fn get_path(params: &HashMap<String, String>, key: &str, default: PathBuf) -> PathBuf {
    params.get(key).map(PathBuf::from).unwrap_or(default)
}

fn get_parsed<T: std::str::FromStr>(params: &HashMap<String, String>, key: &str, default: T) -> T {
    params
        .get(key)
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn get_bool(params: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match params.get(key).map(String::as_str) {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(contents.as_bytes()).unwrap();
        tmp
    }

    #[test]
    fn test_missing_file_is_fatal() {
        assert!(matches!(
            Config::load("/definitely/does/not/exist.conf"),
            Err(ConfigError::Unreadable { .. })
        ));
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let tmp = write_config("");
        let cfg = Config::load(tmp.path()).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_defaults_match_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.runtime, "docker");
        assert_eq!(cfg.cgroup, "v2");
        assert_eq!(cfg.database, "sqlite");
        assert_eq!(cfg.db_path, PathBuf::from("../../storage/metrics.db"));
        assert_eq!(cfg.resource_sampling_interval_ms, 500);
        assert_eq!(cfg.container_event_refresh_interval_ms, 1000);
        assert!(cfg.ui_enabled);
        assert_eq!(cfg.batch_size, 50);
        assert_eq!(cfg.alert_warning, 80.0);
        assert_eq!(cfg.alert_critical, 100.0);
        assert_eq!(cfg.thread_count, 5);
        assert_eq!(cfg.thread_capacity, 10);
        assert_eq!(cfg.file_export_folder_path, PathBuf::from("../../storage"));
        assert_eq!(cfg.ui_refresh_interval_ms, 2000);
    }

    #[test]
    fn test_parses_overrides_comments_and_blanks() {
        let tmp = write_config(
            "# sampling\n\
             resource_sampling_interval_ms=250\n\
             \n\
             runtime=podman\n\
             ui_enabled=false\n\
             batch_size=3\n\
             alert_warning=75.5\n",
        );
        let cfg = Config::load(tmp.path()).unwrap();
        assert_eq!(cfg.resource_sampling_interval_ms, 250);
        assert_eq!(cfg.runtime, "podman");
        assert!(!cfg.ui_enabled);
        assert_eq!(cfg.batch_size, 3);
        assert_eq!(cfg.alert_warning, 75.5);
        // untouched keys keep their defaults
        assert_eq!(cfg.thread_count, 5);
    }

    #[test]
    fn test_unparseable_value_falls_back_to_default() {
        let tmp = write_config("batch_size=lots\nui_enabled=maybe\n");
        let cfg = Config::load(tmp.path()).unwrap();
        assert_eq!(cfg.batch_size, 50);
        assert!(cfg.ui_enabled);
    }

    #[test]
    fn test_whitespace_around_key_and_value() {
        let tmp = write_config("  thread_count = 8 \n");
        let cfg = Config::load(tmp.path()).unwrap();
        assert_eq!(cfg.thread_count, 8);
    }
}
