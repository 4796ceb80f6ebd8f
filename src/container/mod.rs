//! Container identity and limit types.
//!
//! This module defines the strong types the monitor uses to refer to
//! containers: a validated, fixed-length runtime identifier and the declared
//! resource limits tracked for each live container. Identifiers are opaque
//! 64-character lowercase hex strings as emitted by Docker and Podman; the
//! format is enforced at construction time so every downstream consumer
//! (cgroup path derivation, inspect subprocesses, the limits table) can rely
//! on it without re-validating.
//!
//! # Examples
//!
//! ```
//! use cgwatch::container::ContainerId;
//! use std::str::FromStr;
//!
//! let id = ContainerId::from_str(
//!     "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
//! )
//! .unwrap();
//! assert_eq!(id.as_str().len(), 64);
//! ```

use std::fmt;
use std::str::FromStr;

mod error;
mod utils;

pub use error::{Error, Result};

/// A validated container identifier of exactly 64 lowercase hex characters.
///
/// Both Docker and Podman report full container ids in this format in their
/// event streams and inspect output. Validation happens once in
/// [`ContainerId::new`]; afterwards [`ContainerId::as_str`] is infallible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId([u8; 64]);

impl ContainerId {
    /// Creates a new `ContainerId` from the given byte array.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerId`] if any byte is not a lowercase
    /// hex digit (`0-9`, `a-f`).
    pub fn new(src: [u8; 64]) -> Result<Self> {
        if !utils::is_lowercase_hex(&src) {
            return Err(Error::InvalidContainerId(
                String::from_utf8_lossy(&src).to_string(),
            ));
        }

        Ok(Self(src))
    }

    /// Returns the container id as a string slice.
    pub fn as_str(&self) -> &str {
        // SAFETY: `new()` checks that all bytes are ASCII hex digits.
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

impl FromStr for ContainerId {
    type Err = Error;

    /// Parses a `ContainerId` from a string slice.
    ///
    /// Returns an error if the input is not exactly 64 characters long or
    /// contains characters outside `0-9a-f`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes: [u8; 64] = s
            .as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidContainerId(s.to_owned()))?;

        ContainerId::new(bytes)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared resource limits for one live container.
///
/// A field value of zero means the limit is unknown (for example when the
/// runtime reported no explicit cap and the inspect fallback failed). The
/// sampler clamps the corresponding percentage to zero in that case.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContainerLimits {
    /// CPU quota in cores, e.g. `1.5` for one and a half cores.
    pub cpu_limit_cores: f64,
    /// Memory cap in megabytes.
    pub memory_limit_mb: i64,
    /// Maximum number of PIDs.
    pub pid_limit: i64,
}

/// One row of the limits table: the runtime id plus the declared limits,
/// keyed externally by the container's human name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub limits: ContainerLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_container_id_valid() {
        let id = ContainerId::from_str(VALID).unwrap();
        assert_eq!(id.as_str(), VALID);
        assert_eq!(id.to_string(), VALID);
    }

    #[test]
    fn test_container_id_rejects_uppercase() {
        let upper = VALID.to_uppercase();
        assert!(matches!(
            ContainerId::from_str(&upper),
            Err(Error::InvalidContainerId(_))
        ));
    }

    #[test]
    fn test_container_id_rejects_wrong_length() {
        assert!(ContainerId::from_str("abc123").is_err());
        assert!(ContainerId::from_str(&VALID[..63]).is_err());
    }

    #[test]
    fn test_container_id_rejects_non_hex() {
        let mut s = VALID.to_owned();
        s.replace_range(0..1, "g");
        assert!(ContainerId::from_str(&s).is_err());
    }
}
