//! Cgroup path layouts per runtime and hierarchy version.

use std::path::{Path, PathBuf};

use super::{CgroupVersion, CpuCounterKind, PathFactory, ResourcePaths, Runtime};
use crate::container::ContainerId;

const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Selects the path factory for a `(runtime, cgroup_version)` pair.
///
/// All currently known combinations are supported; unknown runtime or
/// cgroup strings already fail at [`FromStr`](std::str::FromStr) time, so a
/// factory handed out here can always derive paths.
pub fn select_paths(runtime: Runtime, cgroup: CgroupVersion) -> Box<dyn PathFactory> {
    match cgroup {
        CgroupVersion::V1 => Box::new(SplitHierarchyPaths {
            root: PathBuf::from(CGROUP_ROOT),
            runtime,
        }),
        CgroupVersion::V2 => Box::new(UnifiedHierarchyPaths {
            root: PathBuf::from(CGROUP_ROOT),
            runtime,
        }),
    }
}

/// Cgroup v1: one mount per controller, with a runtime-specific scope
/// directory underneath each.
///
/// Docker nests containers under `<controller>/docker/<id>/`, Podman under
/// `<controller>/machine.slice/libpod-<id>.scope/`.
struct SplitHierarchyPaths {
    root: PathBuf,
    runtime: Runtime,
}

impl SplitHierarchyPaths {
    fn controller_dir(&self, controller: &str, id: &ContainerId) -> PathBuf {
        let scope = match self.runtime {
            Runtime::Docker => format!("docker/{id}"),
            Runtime::Podman => format!("machine.slice/libpod-{id}.scope"),
        };
        self.root.join(controller).join(scope)
    }
}

impl PathFactory for SplitHierarchyPaths {
    fn resource_paths(&self, id: &ContainerId) -> ResourcePaths {
        ResourcePaths {
            cpu_path: self.controller_dir("cpu", id).join("cpuacct.usage"),
            memory_path: self
                .controller_dir("memory", id)
                .join("memory.usage_in_bytes"),
            pid_path: self.controller_dir("pids", id).join("pids.current"),
            cpu_counter: CpuCounterKind::Nanoseconds,
        }
    }
}

/// Cgroup v2: a single unified hierarchy with one scope directory per
/// container holding all controller files.
struct UnifiedHierarchyPaths {
    root: PathBuf,
    runtime: Runtime,
}

impl UnifiedHierarchyPaths {
    fn scope_dir(&self, id: &ContainerId) -> PathBuf {
        match self.runtime {
            Runtime::Docker => self.root.join(format!("system.slice/docker-{id}.scope")),
            Runtime::Podman => self.root.join(format!("machine.slice/libpod-{id}.scope")),
        }
    }
}

impl PathFactory for UnifiedHierarchyPaths {
    fn resource_paths(&self, id: &ContainerId) -> ResourcePaths {
        let scope = self.scope_dir(id);
        ResourcePaths {
            cpu_path: scope.join("cpu.stat"),
            memory_path: scope.join("memory.current"),
            pid_path: scope.join("pids.current"),
            cpu_counter: CpuCounterKind::UsecStat,
        }
    }
}

/// A factory rooting all paths in an arbitrary directory, used by tests to
/// stage fake cgroup files.
pub struct RootedPaths {
    root: PathBuf,
    cpu_counter: CpuCounterKind,
}

impl RootedPaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            cpu_counter: CpuCounterKind::Nanoseconds,
        }
    }
}

impl PathFactory for RootedPaths {
    fn resource_paths(&self, id: &ContainerId) -> ResourcePaths {
        let dir = self.root.join(id.as_str());
        ResourcePaths {
            cpu_path: dir.join("cpuacct.usage"),
            memory_path: dir.join("memory.usage_in_bytes"),
            pid_path: dir.join("pids.current"),
            cpu_counter: self.cpu_counter,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn id() -> ContainerId {
        ContainerId::from_str(
            "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
        )
        .unwrap()
    }

    #[test]
    fn test_docker_v1_paths() {
        let factory = select_paths(Runtime::Docker, CgroupVersion::V1);
        let paths = factory.resource_paths(&id());
        assert_eq!(
            paths.cpu_path,
            PathBuf::from(format!("/sys/fs/cgroup/cpu/docker/{}/cpuacct.usage", id()))
        );
        assert_eq!(
            paths.memory_path,
            PathBuf::from(format!(
                "/sys/fs/cgroup/memory/docker/{}/memory.usage_in_bytes",
                id()
            ))
        );
        assert_eq!(
            paths.pid_path,
            PathBuf::from(format!("/sys/fs/cgroup/pids/docker/{}/pids.current", id()))
        );
        assert_eq!(paths.cpu_counter, CpuCounterKind::Nanoseconds);
    }

    #[test]
    fn test_docker_v2_paths() {
        let factory = select_paths(Runtime::Docker, CgroupVersion::V2);
        let paths = factory.resource_paths(&id());
        assert_eq!(
            paths.cpu_path,
            PathBuf::from(format!(
                "/sys/fs/cgroup/system.slice/docker-{}.scope/cpu.stat",
                id()
            ))
        );
        assert_eq!(paths.cpu_counter, CpuCounterKind::UsecStat);
    }

    #[test]
    fn test_podman_v2_paths() {
        let factory = select_paths(Runtime::Podman, CgroupVersion::V2);
        let paths = factory.resource_paths(&id());
        assert_eq!(
            paths.memory_path,
            PathBuf::from(format!(
                "/sys/fs/cgroup/machine.slice/libpod-{}.scope/memory.current",
                id()
            ))
        );
    }

    #[test]
    fn test_podman_v1_paths() {
        let factory = select_paths(Runtime::Podman, CgroupVersion::V1);
        let paths = factory.resource_paths(&id());
        assert_eq!(
            paths.pid_path,
            PathBuf::from(format!(
                "/sys/fs/cgroup/pids/machine.slice/libpod-{}.scope/pids.current",
                id()
            ))
        );
    }

    #[test]
    fn test_unknown_runtime_string_is_rejected() {
        assert!(Runtime::from_str("containerd").is_err());
        assert!(CgroupVersion::from_str("v3").is_err());
    }
}
