use std::collections::BTreeMap;

use pulse_types::{Predicate, TelemetryKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::FieldType;

/// A field name that could not be resolved for a telemetry kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("field name is empty")]
    EmptyName,

    #[error("unknown field '{field}' for telemetry type {kind}")]
    UnknownField { field: String, kind: TelemetryKind },

    #[error("field '{0}' names an empty key")]
    EmptyKey(String),
}

/// Failure to compile a single filter at configuration-build time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("predicate {predicate} is not supported for field '{field}' of type {field_type}")]
    UnsupportedPredicate {
        field: String,
        predicate: Predicate,
        field_type: FieldType,
    },
}

/// Failure to evaluate a filter against one document.
///
/// Never fatal: the filter evaluates to `false` and the error becomes a
/// diagnostic string.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("comparand '{0}' is not a number")]
    ComparandNotNumeric(String),

    #[error("comparand '{0}' is not a duration")]
    ComparandNotDuration(String),

    #[error("comparand '{0}' is not a boolean")]
    ComparandNotBoolean(String),

    #[error("comparand '{0}' is not an RFC 3339 timestamp")]
    ComparandNotTimestamp(String),

    #[error("value '{0}' is not a number")]
    ValueNotNumeric(String),

    #[error("field has no value")]
    MissingValue,

    #[error("predicate {0} cannot be applied to this value")]
    UnsupportedPredicate(Predicate),
}

/// Errors from the crate's ambient surfaces (settings files, logging).
#[derive(Debug, Error)]
pub enum PulseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid YAML settings: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported settings format: {0}")]
    UnsupportedFormat(String),

    #[error("logging initialization failed: {0}")]
    Logging(String),
}

/// Convenience type alias for crate results.
pub type PulseResult<T> = Result<T, PulseError>;

/// Category of a configuration-build problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigurationErrorKind {
    DocumentStreamFilterFailure,
    DocumentStreamUnsupportedTelemetryType,
    DocumentStreamDuplicateId,
    MetricFilterFailure,
    MetricProjectionFailure,
    MetricUnsupportedTelemetryType,
    MetricDuplicateId,
}

/// One construction-time problem, reported back to the control plane.
///
/// Building never aborts on these; the offending stream, group or metric is
/// inert while its siblings stay active.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationError {
    pub kind: ConfigurationErrorKind,
    /// Id of the stream or metric the problem belongs to.
    pub item_id: String,
    pub message: String,
    /// Extra context (`ETag`, `DocumentStreamId`, `MetricId`, ...).
    pub data: BTreeMap<String, String>,
}

impl ConfigurationError {
    pub fn new(
        kind: ConfigurationErrorKind,
        item_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            item_id: item_id.into(),
            message: message.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.item_id, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_error_names_field_and_kind() {
        let e = FieldError::UnknownField {
            field: "NonExistentField1".into(),
            kind: TelemetryKind::Request,
        };
        let msg = e.to_string();
        assert!(msg.contains("NonExistentField1"));
        assert!(msg.contains("Request"));
    }

    #[test]
    fn filter_error_is_transparent_over_field_error() {
        let e: FilterError = FieldError::EmptyName.into();
        assert_eq!(e.to_string(), "field name is empty");
    }

    #[test]
    fn configuration_error_carries_context() {
        let e = ConfigurationError::new(
            ConfigurationErrorKind::MetricDuplicateId,
            "m1",
            "duplicate metric id",
        )
        .with_data("ETag", "v1");
        assert_eq!(e.data.get("ETag").map(String::as_str), Some("v1"));
        assert_eq!(e.to_string(), "[m1] duplicate metric id");

        let json = serde_json::to_string(&e).unwrap();
        let restored: ConfigurationError = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, e);
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "settings missing");
        let err: PulseError = io_err.into();
        assert!(err.to_string().contains("settings missing"));
    }
}
