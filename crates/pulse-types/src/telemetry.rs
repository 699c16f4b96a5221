//! Telemetry documents observed by the live-metrics pipeline.
//!
//! Documents are produced by instrumentation outside this workspace and are
//! never mutated once handed to the engine. Each kind carries a fixed set of
//! well-known fields plus two open-ended maps: custom dimensions
//! (string → string) and custom metrics (string → f64).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminator for the document kinds the engine understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TelemetryKind {
    Request,
    Dependency,
    Exception,
    Event,
    Trace,
}

impl TelemetryKind {
    /// All kinds, in declaration order.
    pub const ALL: [TelemetryKind; 5] = [
        TelemetryKind::Request,
        TelemetryKind::Dependency,
        TelemetryKind::Exception,
        TelemetryKind::Event,
        TelemetryKind::Trace,
    ];
}

impl std::fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "Request"),
            Self::Dependency => write!(f, "Dependency"),
            Self::Exception => write!(f, "Exception"),
            Self::Event => write!(f, "Event"),
            Self::Trace => write!(f, "Trace"),
        }
    }
}

/// Returned when a string does not name a [`TelemetryKind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown telemetry kind: {0}")]
pub struct ParseTelemetryKindError(pub String);

impl std::str::FromStr for TelemetryKind {
    type Err = ParseTelemetryKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TelemetryKind::ALL
            .into_iter()
            .find(|kind| kind.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseTelemetryKindError(s.to_string()))
    }
}

/// Severity attached to exceptions and traces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeverityLevel {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

impl SeverityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verbose => "Verbose",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Critical => "Critical",
        }
    }
}

/// Ambient context shared by every document kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryContext {
    pub operation_id: Option<String>,
    pub operation_name: Option<String>,
    pub cloud_role_name: Option<String>,
    pub cloud_role_instance: Option<String>,
}

/// An incoming request handled by the instrumented process.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestTelemetry {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub response_code: String,
    pub success: Option<bool>,
    pub duration: Duration,
    pub source: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub context: TelemetryContext,
    pub properties: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
}

/// An outgoing call (HTTP, SQL, queue, ...) made by the instrumented process.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyTelemetry {
    pub id: String,
    pub name: String,
    pub target: Option<String>,
    pub dependency_type: Option<String>,
    pub data: Option<String>,
    pub result_code: String,
    pub success: Option<bool>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub context: TelemetryContext,
    pub properties: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
}

/// A captured exception.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExceptionTelemetry {
    pub message: String,
    pub exception_type: Option<String>,
    pub problem_id: Option<String>,
    pub severity_level: Option<SeverityLevel>,
    pub timestamp: DateTime<Utc>,
    pub context: TelemetryContext,
    pub properties: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
}

/// A custom business event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTelemetry {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub context: TelemetryContext,
    pub properties: HashMap<String, String>,
    pub metrics: HashMap<String, f64>,
}

/// A diagnostic trace message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceTelemetry {
    pub message: String,
    pub severity_level: Option<SeverityLevel>,
    pub timestamp: DateTime<Utc>,
    pub context: TelemetryContext,
    pub properties: HashMap<String, String>,
}

/// A telemetry document of any supported kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TelemetryDocument {
    Request(RequestTelemetry),
    Dependency(DependencyTelemetry),
    Exception(ExceptionTelemetry),
    Event(EventTelemetry),
    Trace(TraceTelemetry),
}

impl TelemetryDocument {
    /// The kind discriminator of this document.
    pub fn kind(&self) -> TelemetryKind {
        match self {
            Self::Request(_) => TelemetryKind::Request,
            Self::Dependency(_) => TelemetryKind::Dependency,
            Self::Exception(_) => TelemetryKind::Exception,
            Self::Event(_) => TelemetryKind::Event,
            Self::Trace(_) => TelemetryKind::Trace,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Request(t) => t.timestamp,
            Self::Dependency(t) => t.timestamp,
            Self::Exception(t) => t.timestamp,
            Self::Event(t) => t.timestamp,
            Self::Trace(t) => t.timestamp,
        }
    }

    pub fn context(&self) -> &TelemetryContext {
        match self {
            Self::Request(t) => &t.context,
            Self::Dependency(t) => &t.context,
            Self::Exception(t) => &t.context,
            Self::Event(t) => &t.context,
            Self::Trace(t) => &t.context,
        }
    }

    /// Custom dimensions (string properties) of this document.
    pub fn properties(&self) -> &HashMap<String, String> {
        match self {
            Self::Request(t) => &t.properties,
            Self::Dependency(t) => &t.properties,
            Self::Exception(t) => &t.properties,
            Self::Event(t) => &t.properties,
            Self::Trace(t) => &t.properties,
        }
    }

    /// Custom metrics of this document. Traces carry none.
    pub fn metrics(&self) -> Option<&HashMap<String, f64>> {
        match self {
            Self::Request(t) => Some(&t.metrics),
            Self::Dependency(t) => Some(&t.metrics),
            Self::Exception(t) => Some(&t.metrics),
            Self::Event(t) => Some(&t.metrics),
            Self::Trace(_) => None,
        }
    }
}

impl From<RequestTelemetry> for TelemetryDocument {
    fn from(t: RequestTelemetry) -> Self {
        Self::Request(t)
    }
}

impl From<DependencyTelemetry> for TelemetryDocument {
    fn from(t: DependencyTelemetry) -> Self {
        Self::Dependency(t)
    }
}

impl From<ExceptionTelemetry> for TelemetryDocument {
    fn from(t: ExceptionTelemetry) -> Self {
        Self::Exception(t)
    }
}

impl From<EventTelemetry> for TelemetryDocument {
    fn from(t: EventTelemetry) -> Self {
        Self::Event(t)
    }
}

impl From<TraceTelemetry> for TelemetryDocument {
    fn from(t: TraceTelemetry) -> Self {
        Self::Trace(t)
    }
}
