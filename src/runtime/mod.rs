//! Container-runtime specifics: which runtime is observed, which cgroup
//! hierarchy it mounts, and how a container id maps to the pseudo-files the
//! sampler reads.
//!
//! The mapping is a capability selected once at startup via [`select_paths`];
//! an unknown `(runtime, cgroup)` combination is a hard configuration error
//! rather than a silent fallback, so a misconfigured monitor refuses to admit
//! containers it could never sample.

use std::path::PathBuf;
use std::str::FromStr;

use crate::container::ContainerId;

pub mod event;
pub mod events;
pub mod inspect;
pub mod paths;

pub use paths::select_paths;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported container runtime `{0}` (expected `docker` or `podman`)")]
    UnknownRuntime(String),
    #[error("unsupported cgroup version `{0}` (expected `v1` or `v2`)")]
    UnknownCgroupVersion(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The container runtime whose events and cgroups are observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Docker,
    Podman,
}

impl Runtime {
    /// The CLI command used for the event feed and inspect fallback.
    pub fn command(&self) -> &'static str {
        match self {
            Runtime::Docker => "docker",
            Runtime::Podman => "podman",
        }
    }
}

impl FromStr for Runtime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(Runtime::Docker),
            "podman" => Ok(Runtime::Podman),
            other => Err(Error::UnknownRuntime(other.to_owned())),
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command())
    }
}

/// The cgroup hierarchy version mounted on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

impl FromStr for CgroupVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1" => Ok(CgroupVersion::V1),
            "v2" => Ok(CgroupVersion::V2),
            other => Err(Error::UnknownCgroupVersion(other.to_owned())),
        }
    }
}

impl std::fmt::Display for CgroupVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CgroupVersion::V1 => f.write_str("v1"),
            CgroupVersion::V2 => f.write_str("v2"),
        }
    }
}

/// How the CPU counter file encodes its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuCounterKind {
    /// A single nanosecond counter (`cpuacct.usage`, cgroup v1).
    Nanoseconds,
    /// The `usage_usec` field of a `cpu.stat` file (cgroup v2), scaled to
    /// nanoseconds by the reader.
    UsecStat,
}

/// The absolute pseudo-file paths sampled for one container. Immutable for
/// the container's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePaths {
    pub cpu_path: PathBuf,
    pub memory_path: PathBuf,
    pub pid_path: PathBuf,
    pub cpu_counter: CpuCounterKind,
}

/// Derives [`ResourcePaths`] for a container id.
///
/// Implementations are tagged by `(runtime, cgroup_version)`; tests inject
/// their own factory pointing into a staged directory.
pub trait PathFactory: Send + Sync {
    fn resource_paths(&self, id: &ContainerId) -> ResourcePaths;
}
