//! Host-level CPU and memory sampling from procfs.
//!
//! Two parsers feed the host sample: the aggregate `cpu` line of
//! `/proc/stat` (eight jiffy counters) and the `MemTotal`/`MemFree`/
//! `Buffers`/`Cached` lines of `/proc/meminfo`. Host CPU usage is a delta
//! between consecutive readings, so [`HostSampler`] owns the previous
//! totals; exactly one caller (the lifecycle coordinator) holds the sampler
//! and therefore the only meaningful CPU delta stream.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::{round2, StatParseError};
use crate::error::ResultOkLogExt;

const PROC_STAT_PATH: &str = "/proc/stat";
const PROC_MEMINFO_PATH: &str = "/proc/meminfo";

/// The eight aggregate CPU counters from the first line of `/proc/stat`,
/// in jiffies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcStatCpu {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl ProcStatCpu {
    /// Parses the aggregate `cpu` line from a `/proc/stat`-shaped reader.
    ///
    /// # Errors
    ///
    /// Returns [`StatParseError::MissingCpuLine`] if no aggregate line is
    /// present, [`StatParseError::TruncatedCpuLine`] if it carries fewer
    /// than eight counters, and [`StatParseError::InvalidKeyValue`] when a
    /// counter is not numeric.
    pub fn from_reader<R: BufRead>(buf: &mut R) -> Result<Self, StatParseError> {
        let mut line = String::new();
        while buf.read_line(&mut line)? != 0 {
            if line.starts_with("cpu ") {
                return Self::parse_line(&line);
            }
            line.clear();
        }
        Err(StatParseError::MissingCpuLine)
    }

    fn parse_line(line: &str) -> Result<Self, StatParseError> {
        let mut counters = [0u64; 8];
        let mut found = 0;
        for (i, field) in line.split_whitespace().skip(1).take(8).enumerate() {
            counters[i] = field
                .parse::<u64>()
                .map_err(|source| StatParseError::InvalidKeyValue {
                    key: "cpu".to_owned(),
                    value: field.to_owned(),
                    line: 1,
                    source,
                })?;
            found += 1;
        }
        if found < 8 {
            return Err(StatParseError::TruncatedCpuLine { expected: 8, found });
        }

        let [user, nice, system, idle, iowait, irq, softirq, steal] = counters;
        Ok(Self {
            user,
            nice,
            system,
            idle,
            iowait,
            irq,
            softirq,
            steal,
        })
    }

    /// Sum of all eight counters.
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Time spent idle, including I/O wait.
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// The subset of `/proc/meminfo` needed to compute host memory usage,
/// all values in kilobytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeminfoStat {
    pub mem_total: u64,
    pub mem_free: u64,
    pub buffers: u64,
    pub cached: u64,
}

impl MeminfoStat {
    fn set_mem_total(&mut self, v: u64) {
        self.mem_total = v;
    }

    fn set_mem_free(&mut self, v: u64) {
        self.mem_free = v;
    }

    fn set_buffers(&mut self, v: u64) {
        self.buffers = v;
    }

    fn set_cached(&mut self, v: u64) {
        self.cached = v;
    }
}

type Setter = fn(&mut MeminfoStat, u64);

static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Setter> = HashMap::with_capacity(4);

    m.insert("MemTotal", MeminfoStat::set_mem_total);
    m.insert("MemFree", MeminfoStat::set_mem_free);
    m.insert("Buffers", MeminfoStat::set_buffers);
    m.insert("Cached", MeminfoStat::set_cached);

    m
});

impl MeminfoStat {
    /// Parses a `/proc/meminfo`-shaped reader.
    ///
    /// Lines have the form `Key:   <value> kB`; keys outside the handled
    /// set are ignored, and parsing stops early once all four fields were
    /// seen. A key such as `SwapCached` never matches `Cached` because the
    /// lookup is exact after stripping the trailing colon.
    pub fn from_reader<R: BufRead>(buf: &mut R) -> Result<Self, StatParseError> {
        let mut stat = Self::default();
        let mut seen = 0usize;

        let mut line = String::new();
        let mut lineno = 0usize;
        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            let mut parts = line.split_whitespace();
            if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                let key = key.trim_end_matches(':');
                if let Some(setter) = SETTERS.get(key) {
                    let parsed =
                        value
                            .parse::<u64>()
                            .map_err(|source| StatParseError::InvalidKeyValue {
                                key: key.to_owned(),
                                value: value.to_owned(),
                                line: lineno,
                                source,
                            })?;
                    setter(&mut stat, parsed);
                    seen += 1;
                    if seen == SETTERS.len() {
                        break;
                    }
                }
            }
            line.clear();
        }

        Ok(stat)
    }

    /// Used memory in kilobytes: `total - free - buffers - cached`.
    pub fn used(&self) -> u64 {
        self.mem_total
            .saturating_sub(self.mem_free)
            .saturating_sub(self.buffers)
            .saturating_sub(self.cached)
    }
}

/// Static host facts probed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInfo {
    pub num_cpus: usize,
    pub total_memory_mb: u64,
}

/// Probes CPU count and total memory from procfs.
pub fn host_info() -> HostInfo {
    let num_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let total_memory_mb = crate::fsutil::open_file_reader(PROC_MEMINFO_PATH)
        .ok()
        .and_then(|mut r| MeminfoStat::from_reader(&mut r).ok())
        .map(|m| m.mem_total / 1024)
        .unwrap_or(0);

    HostInfo {
        num_cpus,
        total_memory_mb,
    }
}

/// Samples host CPU and memory usage, owning the previous CPU totals the
/// delta computation needs.
#[derive(Debug)]
pub struct HostSampler {
    stat_path: PathBuf,
    meminfo_path: PathBuf,
    prev: Option<(u64, u64)>,
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::with_paths(PROC_STAT_PATH, PROC_MEMINFO_PATH)
    }
}

impl HostSampler {
    /// Creates a sampler reading from custom procfs paths.
    pub fn with_paths(stat_path: impl AsRef<Path>, meminfo_path: impl AsRef<Path>) -> Self {
        Self {
            stat_path: stat_path.as_ref().to_path_buf(),
            meminfo_path: meminfo_path.as_ref().to_path_buf(),
            prev: None,
        }
    }

    /// Returns `(cpu_pct, mem_pct)` for the host.
    ///
    /// The first call reports 0% CPU because there is no previous reading
    /// yet. Read or parse failures report 0 for the affected value and
    /// leave the previous totals untouched.
    pub fn sample(&mut self) -> (f64, f64) {
        (self.cpu_pct(), self.mem_pct())
    }

    fn cpu_pct(&mut self) -> f64 {
        let stat = crate::fsutil::open_file_reader(&self.stat_path)
            .map_err(StatParseError::from_open_error)
            .and_then(|mut r| ProcStatCpu::from_reader(&mut r))
            .ok_log();
        let Some(stat) = stat else { return 0.0 };

        let total = stat.total();
        let idle = stat.idle_total();
        let usage = match self.prev {
            Some((prev_total, prev_idle)) if total > prev_total => {
                let delta_total = (total - prev_total) as f64;
                let delta_idle = idle.saturating_sub(prev_idle) as f64;
                round2((delta_total - delta_idle) / delta_total * 100.0)
            }
            _ => 0.0,
        };
        self.prev = Some((total, idle));
        usage.clamp(0.0, 100.0)
    }

    fn mem_pct(&self) -> f64 {
        let meminfo = crate::fsutil::open_file_reader(&self.meminfo_path)
            .map_err(StatParseError::from_open_error)
            .and_then(|mut r| MeminfoStat::from_reader(&mut r))
            .ok_log();
        let Some(meminfo) = meminfo else { return 0.0 };
        if meminfo.mem_total == 0 {
            return 0.0;
        }
        round2(meminfo.used() as f64 / meminfo.mem_total as f64 * 100.0)
    }
}

impl StatParseError {
    fn from_open_error(err: crate::fsutil::FileOpenError) -> Self {
        Self::Io(err.source)
    }
}
