//! Lifecycle-event records from the runtime event stream.
//!
//! The event feed delivers one JSON object per line. Only `Type ==
//! "container"` records with a `create` or `destroy` action are of
//! interest; everything else parses to `None`. Docker and Podman differ
//! slightly in where they put the action (`status` vs `Action`) and the id
//! (top-level `id` vs `Actor.ID`), so both spellings are accepted.

use std::collections::HashMap;
use std::str::FromStr;

use serde::Deserialize;

use crate::container::ContainerId;

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("container event without an action")]
    MissingAction,
    #[error("container event without a name attribute")]
    MissingName,
    #[error("container event without an id")]
    MissingId,
    #[error(transparent)]
    InvalidId(#[from] crate::container::Error),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "Type")]
    kind: Option<String>,
    status: Option<String>,
    #[serde(rename = "Action")]
    action: Option<String>,
    id: Option<String>,
    #[serde(rename = "Actor")]
    actor: Option<RawActor>,
    #[serde(rename = "timeNano")]
    time_nano: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    #[serde(rename = "ID")]
    id: Option<String>,
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}

/// A lifecycle transition the monitor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Destroy,
}

/// A parsed `create`/`destroy` event for one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerEvent {
    pub action: EventAction,
    pub name: String,
    pub id: ContainerId,
    /// Event timestamp in nanoseconds since the UNIX epoch.
    pub time_nano: i64,
    pub attributes: HashMap<String, String>,
}

/// Limits carried directly in the event's actor attributes. Absent fields
/// fall back to the inspect subprocess.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AttributeLimits {
    pub cpu_limit_cores: Option<f64>,
    pub memory_limit_mb: Option<i64>,
    pub pid_limit: Option<i64>,
}

impl AttributeLimits {
    pub fn is_complete(&self) -> bool {
        self.cpu_limit_cores.is_some() && self.memory_limit_mb.is_some() && self.pid_limit.is_some()
    }
}

impl ContainerEvent {
    /// Parses one line of the event stream.
    ///
    /// Returns `Ok(None)` for well-formed records the monitor does not act
    /// on (non-container types, other actions). Malformed records are
    /// errors; the coordinator logs and drops them.
    pub fn parse(line: &str) -> Result<Option<Self>, EventParseError> {
        let raw: RawEvent = serde_json::from_str(line)?;
        if raw.kind.as_deref() != Some("container") {
            return Ok(None);
        }

        let action = raw
            .status
            .or(raw.action)
            .ok_or(EventParseError::MissingAction)?;
        let action = match action.as_str() {
            "create" => EventAction::Create,
            "destroy" => EventAction::Destroy,
            _ => return Ok(None),
        };

        let actor = raw.actor;
        let (actor_id, attributes) = match actor {
            Some(actor) => (actor.id, actor.attributes),
            None => (None, HashMap::new()),
        };
        let name = attributes
            .get("name")
            .cloned()
            .ok_or(EventParseError::MissingName)?;
        let id = raw.id.or(actor_id).ok_or(EventParseError::MissingId)?;
        let id = ContainerId::from_str(&id)?;

        Ok(Some(Self {
            action,
            name,
            id,
            time_nano: raw.time_nano.unwrap_or(0),
            attributes,
        }))
    }

    /// Extracts declared limits from the actor attributes, when present:
    /// `cpus` (cores), `memory` (megabytes, or a byte size with a
    /// `b`/`k`/`m`/`g` suffix), `pids-limit` (count).
    pub fn attribute_limits(&self) -> AttributeLimits {
        AttributeLimits {
            cpu_limit_cores: self
                .attributes
                .get("cpus")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| *v > 0.0),
            memory_limit_mb: self
                .attributes
                .get("memory")
                .and_then(|v| parse_memory_mb(v))
                .filter(|v| *v > 0),
            pid_limit: self
                .attributes
                .get("pids-limit")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0),
        }
    }
}

/// Parses a memory attribute into megabytes.
///
/// A bare number is taken as megabytes; a number with a `b`, `k`, `m` or
/// `g` suffix (case-insensitive) is a byte quantity in the given unit.
pub fn parse_memory_mb(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(mb) = value.parse::<i64>() {
        return Some(mb);
    }

    let suffix = value.chars().last()?;
    let digits = &value[..value.len() - suffix.len_utf8()];
    let quantity = digits.trim().parse::<i64>().ok()?;
    let bytes = match suffix.to_ascii_lowercase() {
        'b' => quantity,
        'k' => quantity * 1024,
        'm' => quantity * 1024 * 1024,
        'g' => quantity * 1024 * 1024 * 1024,
        _ => return None,
    };
    Some(bytes / (1024 * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "f00d456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn create_event_json() -> String {
        format!(
            r#"{{"status":"create","id":"{ID}","from":"nginx","Type":"container","Action":"create","Actor":{{"ID":"{ID}","Attributes":{{"image":"nginx","name":"alpha","cpus":"1.5","memory":"512m","pids-limit":"200"}}}},"scope":"local","time":1700000000,"timeNano":1700000000123456789}}"#
        )
    }

    #[test]
    fn test_parse_create_event() {
        let ev = ContainerEvent::parse(&create_event_json()).unwrap().unwrap();
        assert_eq!(ev.action, EventAction::Create);
        assert_eq!(ev.name, "alpha");
        assert_eq!(ev.id.as_str(), ID);
        assert_eq!(ev.time_nano, 1_700_000_000_123_456_789);
    }

    #[test]
    fn test_parse_destroy_event_with_action_field_only() {
        let line = format!(
            r#"{{"Type":"container","Action":"destroy","Actor":{{"ID":"{ID}","Attributes":{{"name":"alpha"}}}},"timeNano":1}}"#
        );
        let ev = ContainerEvent::parse(&line).unwrap().unwrap();
        assert_eq!(ev.action, EventAction::Destroy);
        assert_eq!(ev.id.as_str(), ID);
    }

    #[test]
    fn test_parse_ignores_non_container_types() {
        let line = r#"{"Type":"network","Action":"connect","Actor":{"ID":"bridge","Attributes":{"name":"bridge"}}}"#;
        assert!(ContainerEvent::parse(line).unwrap().is_none());
    }

    #[test]
    fn test_parse_ignores_other_actions() {
        let line = format!(
            r#"{{"status":"start","Type":"container","id":"{ID}","Actor":{{"ID":"{ID}","Attributes":{{"name":"alpha"}}}}}}"#
        );
        assert!(ContainerEvent::parse(&line).unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            ContainerEvent::parse("not json at all"),
            Err(EventParseError::Json(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_name() {
        let line = format!(
            r#"{{"status":"create","Type":"container","id":"{ID}","Actor":{{"ID":"{ID}","Attributes":{{}}}}}}"#
        );
        assert!(matches!(
            ContainerEvent::parse(&line),
            Err(EventParseError::MissingName)
        ));
    }

    #[test]
    fn test_parse_rejects_invalid_id() {
        let line = r#"{"status":"create","Type":"container","id":"SHORT","Actor":{"Attributes":{"name":"alpha"}}}"#;
        assert!(matches!(
            ContainerEvent::parse(line),
            Err(EventParseError::InvalidId(_))
        ));
    }

    #[test]
    fn test_attribute_limits() {
        let ev = ContainerEvent::parse(&create_event_json()).unwrap().unwrap();
        let limits = ev.attribute_limits();
        assert_eq!(limits.cpu_limit_cores, Some(1.5));
        assert_eq!(limits.memory_limit_mb, Some(512));
        assert_eq!(limits.pid_limit, Some(200));
        assert!(limits.is_complete());
    }

    #[test]
    fn test_attribute_limits_absent() {
        let line = format!(
            r#"{{"status":"create","Type":"container","id":"{ID}","Actor":{{"Attributes":{{"name":"alpha"}}}}}}"#
        );
        let ev = ContainerEvent::parse(&line).unwrap().unwrap();
        assert_eq!(ev.attribute_limits(), AttributeLimits::default());
    }

    #[test]
    fn test_parse_memory_mb() {
        assert_eq!(parse_memory_mb("512"), Some(512));
        assert_eq!(parse_memory_mb("512m"), Some(512));
        assert_eq!(parse_memory_mb("2G"), Some(2048));
        assert_eq!(parse_memory_mb("1048576k"), Some(1024));
        assert_eq!(parse_memory_mb("536870912b"), Some(512));
        assert_eq!(parse_memory_mb("lots"), None);
        assert_eq!(parse_memory_mb(""), None);
    }
}
