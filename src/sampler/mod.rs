//! Per-container resource sampling.
//!
//! A sampling pass turns one snapshot of a container's cgroup pseudo-files
//! into a [`Sample`]: memory and PID usage as a direct ratio against the
//! declared limit, CPU usage as a delta of the monotonically increasing
//! cgroup CPU counter against the previous pass. The raw file reads and the
//! numeric transform are split so the transform stays a pure function:
//! [`read_raw`] performs the blocking I/O (any failed read yields a zero
//! field), [`compute_sample`] does the arithmetic.
//!
//! All percentages are rounded to two decimal places and clamped at zero on
//! the low end. There is no upper clamp: a container may briefly exceed 100%
//! of a soft limit.

use std::io::BufRead;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::container::ContainerLimits;
use crate::runtime::{CpuCounterKind, ResourcePaths};

mod error;
pub mod host;

pub use error::StatParseError;

const BYTES_PER_MB: f64 = (1 << 20) as f64;
const NANOS_PER_SECOND: f64 = 1e9;
const MILLIS_PER_SECOND: f64 = 1e3;

/// One point-in-time observation of a container, as percent of its limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Milliseconds since the UNIX epoch.
    pub timestamp_ms: i64,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub pid_pct: f64,
}

/// One point-in-time observation of the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSample {
    /// Milliseconds since the UNIX epoch.
    pub timestamp_ms: i64,
    pub cpu_pct: f64,
    pub mem_pct: f64,
}

/// Per-container CPU counter state carried between sampling passes.
///
/// Created on the first pass, updated on every subsequent one, discarded
/// when the container is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrevCpu {
    pub last_ts_ms: i64,
    pub last_cpu_counter_ns: u64,
}

/// Raw counter values read from one container's cgroup files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawReading {
    pub cpu_counter_ns: u64,
    pub mem_bytes: u64,
    pub pid_count: u64,
}

/// Current wall time in milliseconds since the UNIX epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Rounds to two decimal places, half away from zero.
pub fn round2(x: f64) -> f64 {
    (x * 100.0 + 0.5).floor() / 100.0
}

/// Reads the three cgroup counters for one container.
///
/// Each field defaults to `0` when its file is missing or unreadable; a
/// container whose cgroup has not appeared yet simply reports 0% until it
/// does.
pub fn read_raw(paths: &ResourcePaths) -> RawReading {
    let cpu_counter_ns = match paths.cpu_counter {
        CpuCounterKind::Nanoseconds => crate::fsutil::read_u64_or_zero(&paths.cpu_path),
        CpuCounterKind::UsecStat => read_usage_usec(&paths.cpu_path) * 1000,
    };

    RawReading {
        cpu_counter_ns,
        mem_bytes: crate::fsutil::read_u64_or_zero(&paths.memory_path),
        pid_count: crate::fsutil::read_u64_or_zero(&paths.pid_path),
    }
}

/// Extracts the `usage_usec` counter from a cgroup v2 `cpu.stat` file.
fn read_usage_usec(path: &std::path::Path) -> u64 {
    let Ok(reader) = crate::fsutil::open_file_reader(path) else {
        return 0;
    };
    for line in reader.lines() {
        let Ok(line) = line else { return 0 };
        if let Some(value) = line.strip_prefix("usage_usec ") {
            return value.trim().parse::<u64>().unwrap_or(0);
        }
    }
    0
}

/// Computes a [`Sample`] from a raw reading.
///
/// Memory and PID percentages are direct ratios against the limit (zero when
/// the limit is unknown). The CPU percentage is the counter delta against
/// `prev`, normalized by elapsed time and the CPU quota; the first pass for
/// a container has no previous state and always reports 0%. The returned
/// [`PrevCpu`] must be stored for the next pass regardless of the outcome.
pub fn compute_sample(
    now_ms: i64,
    raw: &RawReading,
    limits: &ContainerLimits,
    prev: Option<&PrevCpu>,
) -> (Sample, PrevCpu) {
    let mem_pct = if limits.memory_limit_mb > 0 {
        round2(raw.mem_bytes as f64 / (limits.memory_limit_mb as f64 * BYTES_PER_MB) * 100.0)
    } else {
        0.0
    };

    let pid_pct = if limits.pid_limit > 0 {
        round2(raw.pid_count as f64 / limits.pid_limit as f64 * 100.0)
    } else {
        0.0
    };

    let cpu_pct = match prev {
        Some(prev) => {
            let delta_ns = raw.cpu_counter_ns as i128 - prev.last_cpu_counter_ns as i128;
            let delta_ms = now_ms - prev.last_ts_ms;
            if delta_ns > 0 && delta_ms > 0 && limits.cpu_limit_cores > 0.0 {
                round2(
                    (delta_ns as f64 / NANOS_PER_SECOND)
                        / (delta_ms as f64 / MILLIS_PER_SECOND)
                        / limits.cpu_limit_cores
                        * 100.0,
                )
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    let sample = Sample {
        timestamp_ms: now_ms,
        cpu_pct: cpu_pct.max(0.0),
        mem_pct: mem_pct.max(0.0),
        pid_pct: pid_pct.max(0.0),
    };
    let next = PrevCpu {
        last_ts_ms: now_ms,
        last_cpu_counter_ns: raw.cpu_counter_ns,
    };

    (sample, next)
}

/// One full sampling pass for a container: reads the cgroup counters and
/// computes the resulting [`Sample`].
///
/// This is [`read_raw`] composed with [`compute_sample`]; the caller
/// supplies the previous CPU state and stores the returned [`PrevCpu`] for
/// the next pass.
pub fn sample_container(
    paths: &ResourcePaths,
    limits: &ContainerLimits,
    prev: Option<&PrevCpu>,
    now_ms: i64,
) -> (Sample, PrevCpu) {
    let raw = read_raw(paths);
    compute_sample(now_ms, &raw, limits, prev)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ContainerLimits {
        ContainerLimits {
            cpu_limit_cores: 1.0,
            memory_limit_mb: 100,
            pid_limit: 200,
        }
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(10.004), 10.0);
        assert_eq!(round2(10.005), 10.01);
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(99.999), 100.0);
    }

    #[test]
    fn test_first_sample_reports_zero_cpu() {
        let raw = RawReading {
            cpu_counter_ns: 987_654_321,
            mem_bytes: 50 << 20,
            pid_count: 100,
        };
        let (sample, prev) = compute_sample(1_000, &raw, &limits(), None);
        assert_eq!(sample.cpu_pct, 0.0);
        assert_eq!(sample.mem_pct, 50.0);
        assert_eq!(sample.pid_pct, 50.0);
        assert_eq!(prev.last_ts_ms, 1_000);
        assert_eq!(prev.last_cpu_counter_ns, 987_654_321);
    }

    #[test]
    fn test_cpu_delta_against_quota() {
        // 1e8 ns of CPU over 10 ms of wall time at a 1-core quota is 10%.
        let prev = PrevCpu {
            last_ts_ms: 1_000,
            last_cpu_counter_ns: 5_000_000,
        };
        let raw = RawReading {
            cpu_counter_ns: 5_000_000 + 100_000_000,
            mem_bytes: 0,
            pid_count: 0,
        };
        let (sample, next) = compute_sample(1_010, &raw, &limits(), Some(&prev));
        assert_eq!(sample.cpu_pct, 10.0);
        assert_eq!(next.last_ts_ms, 1_010);
        assert_eq!(next.last_cpu_counter_ns, raw.cpu_counter_ns);
    }

    #[test]
    fn test_cpu_delta_scales_with_quota() {
        // The same burn against a 2-core quota is half the percentage.
        let mut l = limits();
        l.cpu_limit_cores = 2.0;
        let prev = PrevCpu {
            last_ts_ms: 0,
            last_cpu_counter_ns: 0,
        };
        let raw = RawReading {
            cpu_counter_ns: 100_000_000,
            mem_bytes: 0,
            pid_count: 0,
        };
        let (sample, _) = compute_sample(10, &raw, &l, Some(&prev));
        assert_eq!(sample.cpu_pct, 5.0);
    }

    #[test]
    fn test_negative_counter_delta_clamps_to_zero() {
        // A counter reset (container restart under the same cgroup path)
        // must not produce a negative percentage.
        let prev = PrevCpu {
            last_ts_ms: 1_000,
            last_cpu_counter_ns: 900_000_000,
        };
        let raw = RawReading {
            cpu_counter_ns: 100,
            mem_bytes: 0,
            pid_count: 0,
        };
        let (sample, next) = compute_sample(1_010, &raw, &limits(), Some(&prev));
        assert_eq!(sample.cpu_pct, 0.0);
        assert_eq!(next.last_cpu_counter_ns, 100);
    }

    #[test]
    fn test_zero_elapsed_time_yields_zero_cpu() {
        let prev = PrevCpu {
            last_ts_ms: 1_000,
            last_cpu_counter_ns: 0,
        };
        let raw = RawReading {
            cpu_counter_ns: 100_000_000,
            mem_bytes: 0,
            pid_count: 0,
        };
        let (sample, _) = compute_sample(1_000, &raw, &limits(), Some(&prev));
        assert_eq!(sample.cpu_pct, 0.0);
    }

    #[test]
    fn test_unknown_limits_report_zero() {
        let raw = RawReading {
            cpu_counter_ns: 1,
            mem_bytes: 1 << 30,
            pid_count: 4_000,
        };
        let (sample, _) = compute_sample(5, &raw, &ContainerLimits::default(), None);
        assert_eq!(sample.cpu_pct, 0.0);
        assert_eq!(sample.mem_pct, 0.0);
        assert_eq!(sample.pid_pct, 0.0);
    }

    #[test]
    fn test_usage_may_exceed_hundred_percent() {
        let raw = RawReading {
            cpu_counter_ns: 0,
            mem_bytes: 150 << 20,
            pid_count: 0,
        };
        let (sample, _) = compute_sample(5, &raw, &limits(), None);
        assert_eq!(sample.mem_pct, 150.0);
    }

    #[test]
    fn test_read_raw_missing_files_yield_zero_fields() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResourcePaths {
            cpu_path: dir.path().join("cpuacct.usage"),
            memory_path: dir.path().join("memory.usage_in_bytes"),
            pid_path: dir.path().join("pids.current"),
            cpu_counter: CpuCounterKind::Nanoseconds,
        };
        assert_eq!(read_raw(&paths), RawReading::default());
    }

    #[test]
    fn test_read_raw_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResourcePaths {
            cpu_path: dir.path().join("cpuacct.usage"),
            memory_path: dir.path().join("memory.usage_in_bytes"),
            pid_path: dir.path().join("pids.current"),
            cpu_counter: CpuCounterKind::Nanoseconds,
        };
        std::fs::write(&paths.cpu_path, "123456789\n").unwrap();
        std::fs::write(&paths.memory_path, "52428800\n").unwrap();
        std::fs::write(&paths.pid_path, "100\n").unwrap();

        let raw = read_raw(&paths);
        assert_eq!(raw.cpu_counter_ns, 123_456_789);
        assert_eq!(raw.mem_bytes, 50 << 20);
        assert_eq!(raw.pid_count, 100);
    }

    #[test]
    fn test_sample_container_composes_read_and_compute() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResourcePaths {
            cpu_path: dir.path().join("cpuacct.usage"),
            memory_path: dir.path().join("memory.usage_in_bytes"),
            pid_path: dir.path().join("pids.current"),
            cpu_counter: CpuCounterKind::Nanoseconds,
        };
        std::fs::write(&paths.cpu_path, "5000000\n").unwrap();
        std::fs::write(&paths.memory_path, format!("{}\n", 50u64 << 20)).unwrap();
        std::fs::write(&paths.pid_path, "100\n").unwrap();

        let (first, prev) = sample_container(&paths, &limits(), None, 1_000);
        assert_eq!(first.cpu_pct, 0.0);
        assert_eq!(first.mem_pct, 50.0);
        assert_eq!(first.pid_pct, 50.0);
        assert_eq!(prev.last_cpu_counter_ns, 5_000_000);

        // counter advances 1e8 ns over 10 ms at a 1-core quota: 10%
        std::fs::write(&paths.cpu_path, "105000000\n").unwrap();
        let (second, next) = sample_container(&paths, &limits(), Some(&prev), 1_010);
        assert_eq!(second.cpu_pct, 10.0);
        assert_eq!(next.last_ts_ms, 1_010);
        assert_eq!(next.last_cpu_counter_ns, 105_000_000);
    }

    #[test]
    fn test_read_raw_v2_usage_usec_is_scaled_to_ns() {
        let dir = tempfile::tempdir().unwrap();
        let cpu_stat = dir.path().join("cpu.stat");
        std::fs::write(
            &cpu_stat,
            "usage_usec 250000\nuser_usec 150000\nsystem_usec 100000\n",
        )
        .unwrap();
        let paths = ResourcePaths {
            cpu_path: cpu_stat,
            memory_path: dir.path().join("memory.current"),
            pid_path: dir.path().join("pids.current"),
            cpu_counter: CpuCounterKind::UsecStat,
        };
        assert_eq!(read_raw(&paths).cpu_counter_ns, 250_000_000);
    }
}
