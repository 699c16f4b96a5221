//! Collection configuration DTOs.
//!
//! These mirror the document the control plane pushes. They are plain data:
//! validation and compilation into evaluable filters happens in
//! `pulse-filtering` when a configuration is built. Every collection member is
//! optional on the wire and defaults to empty.

use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetryKind;

/// Telemetry type named by a filter group or metric.
///
/// Types the engine cannot evaluate (performance counters, raw metrics, or
/// anything unrecognised) deserialize to [`TelemetryType::Unsupported`] so a
/// single bad item is reported instead of rejecting the whole document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryType {
    Request,
    Dependency,
    Exception,
    Event,
    Trace,
    #[serde(other)]
    Unsupported,
}

impl TelemetryType {
    /// The document kind this type selects, if the engine supports it.
    pub fn kind(&self) -> Option<TelemetryKind> {
        match self {
            Self::Request => Some(TelemetryKind::Request),
            Self::Dependency => Some(TelemetryKind::Dependency),
            Self::Exception => Some(TelemetryKind::Exception),
            Self::Event => Some(TelemetryKind::Event),
            Self::Trace => Some(TelemetryKind::Trace),
            Self::Unsupported => None,
        }
    }
}

impl From<TelemetryKind> for TelemetryType {
    fn from(kind: TelemetryKind) -> Self {
        match kind {
            TelemetryKind::Request => Self::Request,
            TelemetryKind::Dependency => Self::Dependency,
            TelemetryKind::Exception => Self::Exception,
            TelemetryKind::Event => Self::Event,
            TelemetryKind::Trace => Self::Trace,
        }
    }
}

impl std::fmt::Display for TelemetryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            Some(kind) => kind.fmt(f),
            None => write!(f, "Unsupported"),
        }
    }
}

/// Comparison operator of a single filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Contains,
    DoesNotContain,
}

impl Predicate {
    /// Whether this operator orders values (and therefore needs numbers).
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Self::LessThan | Self::GreaterThan | Self::LessThanOrEqual | Self::GreaterThanOrEqual
        )
    }

    /// Whether this operator is a substring test.
    pub fn is_containment(&self) -> bool {
        matches!(self, Self::Contains | Self::DoesNotContain)
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Equal => "Equal",
            Self::NotEqual => "NotEqual",
            Self::LessThan => "LessThan",
            Self::GreaterThan => "GreaterThan",
            Self::LessThanOrEqual => "LessThanOrEqual",
            Self::GreaterThanOrEqual => "GreaterThanOrEqual",
            Self::Contains => "Contains",
            Self::DoesNotContain => "DoesNotContain",
        };
        f.write_str(s)
    }
}

/// Aggregation applied to an operationalized metric over a collection window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationType {
    #[serde(alias = "Avg")]
    Average,
    Sum,
    Min,
    Max,
    Count,
}

impl std::fmt::Display for AggregationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Average => "Average",
            Self::Sum => "Sum",
            Self::Min => "Min",
            Self::Max => "Max",
            Self::Count => "Count",
        };
        f.write_str(s)
    }
}

/// One `(field, operator, comparand)` triple. The comparand is always text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterInfo {
    pub field_name: String,
    pub predicate: Predicate,
    #[serde(default)]
    pub comparand: String,
}

impl FilterInfo {
    pub fn new(
        field_name: impl Into<String>,
        predicate: Predicate,
        comparand: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            predicate,
            comparand: comparand.into(),
        }
    }
}

impl std::fmt::Display for FilterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} '{}'", self.field_name, self.predicate, self.comparand)
    }
}

/// Filters combined with logical AND. An empty set matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FilterConjunctionGroupInfo {
    #[serde(default)]
    pub filters: Vec<FilterInfo>,
}

impl FilterConjunctionGroupInfo {
    pub fn new(filters: Vec<FilterInfo>) -> Self {
        Self { filters }
    }
}

/// A conjunction group bound to a single telemetry type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentFilterConjunctionGroupInfo {
    pub telemetry_type: TelemetryType,
    #[serde(default)]
    pub filters: FilterConjunctionGroupInfo,
}

/// A named live-viewer subscription: OR across its document filter groups.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentStreamInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub document_filter_groups: Vec<DocumentFilterConjunctionGroupInfo>,
}

/// A metric computed from a projected field of matching documents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationalizedMetricInfo {
    pub id: String,
    pub telemetry_type: TelemetryType,
    /// A field name, or `Count()` / `Count` to count matching documents.
    pub projection: String,
    pub aggregation: AggregationType,
    /// OR of AND-groups. Empty means every document of the type is folded.
    #[serde(default)]
    pub filter_groups: Vec<FilterConjunctionGroupInfo>,
}

/// The versioned configuration document pushed by the control plane.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfigurationInfo {
    #[serde(rename = "ETag", default)]
    pub etag: String,
    #[serde(rename = "Metrics", default)]
    pub metrics: Vec<OperationalizedMetricInfo>,
    #[serde(rename = "DocumentStreams", default)]
    pub document_streams: Vec<DocumentStreamInfo>,
}

impl CollectionConfigurationInfo {
    /// An empty configuration carrying only an ETag.
    pub fn empty(etag: impl Into<String>) -> Self {
        Self {
            etag: etag.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration document from its JSON wire form.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
