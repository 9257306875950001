//! Events published to observers of the supervisor.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Origin of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Produced by the supervisor itself.
    System,
    /// Relayed from the tunnel engine's event feed.
    Engine,
}

/// A single, immutable log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Creation time (Unix epoch milliseconds).
    pub timestamp: i64,
    /// Where the line came from.
    pub source: LogSource,
    /// Log text.
    pub message: String,
}

impl LogEvent {
    /// Create a log line stamped with the current time.
    #[must_use]
    pub fn new(source: LogSource, message: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            source,
            message: message.into(),
        }
    }

    /// Supervisor-originated line.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self::new(LogSource::System, message)
    }

    /// Engine-originated line.
    #[must_use]
    pub fn engine(message: impl Into<String>) -> Self {
        Self::new(LogSource::Engine, message)
    }
}

/// Supervisor state machine phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl Phase {
    /// Whether a `Start` command is accepted in this phase.
    #[must_use]
    pub const fn accepts_start(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Outcome of one local liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProbeResult {
    /// The local listener accepted a connection.
    Reachable,
    /// The connect attempt failed or timed out.
    Unreachable { reason: String },
}

impl ProbeResult {
    #[must_use]
    pub const fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable)
    }
}

/// Everything an observer can receive from the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyEvent {
    /// A log line.
    Log(LogEvent),
    /// The supervisor entered a new phase.
    Phase { phase: Phase },
    /// The liveness status changed.
    Health { probe: ProbeResult },
}

impl ProxyEvent {
    /// Approximate heap footprint, used to bound history.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 16;
        match self {
            Self::Log(log) => log.message.len() + OVERHEAD,
            Self::Phase { .. } => OVERHEAD,
            Self::Health { probe } => match probe {
                ProbeResult::Reachable => OVERHEAD,
                ProbeResult::Unreachable { reason } => reason.len() + OVERHEAD,
            },
        }
    }

    /// The log line carried by this event, if any.
    #[must_use]
    pub const fn as_log(&self) -> Option<&LogEvent> {
        match self {
            Self::Log(log) => Some(log),
            _ => None,
        }
    }

    /// Convert to an SSE event.
    #[cfg(feature = "sse")]
    #[must_use]
    pub fn to_sse_event(&self) -> axum::response::sse::Event {
        let event = axum::response::sse::Event::default();
        match self {
            Self::Log(log) => event.event("log").data(log.message.clone()),
            Self::Phase { phase } => event.event("phase").data(phase.to_string()),
            Self::Health { probe } => event
                .event("health")
                .data(serde_json::to_string(probe).unwrap_or_default()),
        }
    }
}

/// Current time as Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_is_accepted_only_when_idle() {
        assert!(Phase::Stopped.accepts_start());
        assert!(Phase::Error.accepts_start());
        assert!(!Phase::Starting.accepts_start());
        assert!(!Phase::Running.accepts_start());
        assert!(!Phase::Stopping.accepts_start());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_string(&ProxyEvent::Phase {
            phase: Phase::Running,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"phase","phase":"running"}"#);

        let json = serde_json::to_value(ProxyEvent::Log(LogEvent::engine("hi"))).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["source"], "engine");
        assert_eq!(json["message"], "hi");
    }

    #[test]
    fn test_log_constructors_set_source() {
        assert_eq!(LogEvent::system("a").source, LogSource::System);
        assert_eq!(LogEvent::engine("b").source, LogSource::Engine);
        assert!(LogEvent::system("c").timestamp > 0);
    }
}
