//! Inspect fallback for containers whose create event carries no limits.
//!
//! Runs `docker inspect <id>` (or podman) and extracts
//! `HostConfig.{NanoCpus, Memory, PidsLimit}`, converting to cores,
//! megabytes, and a raw count. Every failure is soft: a missing or
//! malformed field simply stays unresolved, and a container with no
//! resolvable limits is still recorded (it will sample as 0%).

use serde::Deserialize;

use super::Runtime;
use crate::container::ContainerId;

const NANOS_PER_CORE: f64 = 1e9;
const BYTES_PER_MB: i64 = 1024 * 1024;

/// Limits recovered from an inspect call; any field may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InspectedLimits {
    pub cpu_limit_cores: Option<f64>,
    pub memory_limit_mb: Option<i64>,
    pub pid_limit: Option<i64>,
}

/// Resolves declared limits for a container id.
///
/// The subprocess implementation is [`CommandResolver`]; tests substitute
/// a canned resolver.
pub trait LimitsResolver: Send + Sync {
    fn resolve(&self, id: &ContainerId) -> Option<InspectedLimits>;
}

/// [`LimitsResolver`] backed by the runtime's `inspect` CLI command.
pub struct CommandResolver {
    runtime: Runtime,
}

impl CommandResolver {
    pub fn new(runtime: Runtime) -> Self {
        Self { runtime }
    }
}

impl LimitsResolver for CommandResolver {
    fn resolve(&self, id: &ContainerId) -> Option<InspectedLimits> {
        let output = std::process::Command::new(self.runtime.command())
            .args(["inspect", id.as_str()])
            .output();
        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                log::warn!(
                    "`{} inspect {}` exited with {}",
                    self.runtime,
                    id,
                    output.status
                );
                return None;
            }
            Err(err) => {
                log::warn!("failed to run `{} inspect {}`: {err}", self.runtime, id);
                return None;
            }
        };

        match parse_inspect_output(&output.stdout) {
            Ok(limits) => Some(limits),
            Err(err) => {
                log::warn!("failed to parse `{} inspect {}` output: {err}", self.runtime, id);
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "HostConfig")]
    host_config: Option<HostConfig>,
}

#[derive(Debug, Deserialize)]
struct HostConfig {
    #[serde(rename = "NanoCpus")]
    nano_cpus: Option<i64>,
    #[serde(rename = "Memory")]
    memory: Option<i64>,
    #[serde(rename = "PidsLimit")]
    pids_limit: Option<i64>,
}

/// Parses the JSON array printed by `inspect` into limits.
///
/// A zero or negative value means "no limit configured" and maps to an
/// unresolved field.
pub fn parse_inspect_output(bytes: &[u8]) -> Result<InspectedLimits, serde_json::Error> {
    let entries: Vec<InspectEntry> = serde_json::from_slice(bytes)?;
    let Some(host_config) = entries.into_iter().next().and_then(|e| e.host_config) else {
        return Ok(InspectedLimits::default());
    };

    Ok(InspectedLimits {
        cpu_limit_cores: host_config
            .nano_cpus
            .filter(|v| *v > 0)
            .map(|v| v as f64 / NANOS_PER_CORE),
        memory_limit_mb: host_config
            .memory
            .filter(|v| *v > 0)
            .map(|v| v / BYTES_PER_MB),
        pid_limit: host_config.pids_limit.filter(|v| *v > 0),
    })
}
