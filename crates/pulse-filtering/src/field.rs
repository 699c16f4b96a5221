//! Field accessors: resolve a field name once, extract it from many documents.
//!
//! Resolution maps `(kind, field name)` to a [`FieldAccessor`] at
//! configuration-build time. Unknown names fail there, as configuration
//! errors, instead of silently per document. Extraction is a plain `match`
//! over the accessor and the document variant.
//!
//! Supported names:
//!
//! - well-known fields of the kind (`Id`, `Name`, `Duration`, `Success`, ...)
//! - `Context.Operation.Id`, `Context.Operation.Name`,
//!   `Context.Cloud.RoleName`, `Context.Cloud.RoleInstance`
//! - `CustomDimensions.<key>` or `CustomDimensions[<key>]` (alias `Properties`)
//! - `CustomDimensions` for the whole property map
//! - `CustomMetrics.<key>` or `CustomMetrics[<key>]`
//! - `*` for any textual field

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulse_types::{TelemetryDocument, TelemetryKind};
use serde::{Deserialize, Serialize};

use crate::error::FieldError;

/// Wildcard field name matching any textual field.
pub const ANY_FIELD: &str = "*";

const DIMENSION_PREFIXES: [&str; 2] = ["CustomDimensions", "Properties"];
const METRIC_PREFIX: &str = "CustomMetrics";

/// Declared type of a resolved field. Decides which predicates apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Free text; string predicates only.
    Text,
    /// Text that may hold a number (result codes, custom dimensions);
    /// string predicates plus numeric ordering after coercion.
    DynamicText,
    Number,
    Duration,
    Boolean,
    Timestamp,
    /// The custom-dimensions map; containment over keys and `key:value`.
    Map,
    /// The `*` wildcard; containment over every textual field.
    Any,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::DynamicText => "dynamic text",
            Self::Number => "number",
            Self::Duration => "duration",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Map => "map",
            Self::Any => "any",
        };
        f.write_str(s)
    }
}

/// A value extracted from a document.
///
/// Absent optional text is extracted as empty text; `Missing` is reserved
/// for absent non-text values (an unset success flag, an absent custom
/// metric).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Number(f64),
    Duration(Duration),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Map(&'a HashMap<String, String>),
    /// Several candidate values, produced by the `*` wildcard.
    Many(Vec<FieldValue<'a>>),
    Missing,
}

/// Well-known fields of the telemetry kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinField {
    Id,
    Name,
    Url,
    ResponseCode,
    Success,
    Duration,
    Source,
    Target,
    DependencyType,
    Data,
    ResultCode,
    Message,
    ExceptionType,
    ProblemId,
    SeverityLevel,
    Timestamp,
    OperationId,
    OperationName,
    CloudRoleName,
    CloudRoleInstance,
}

const CONTEXT_FIELDS: [BuiltinField; 4] = [
    BuiltinField::OperationId,
    BuiltinField::OperationName,
    BuiltinField::CloudRoleName,
    BuiltinField::CloudRoleInstance,
];

const REQUEST_FIELDS: [BuiltinField; 8] = [
    BuiltinField::Id,
    BuiltinField::Name,
    BuiltinField::Url,
    BuiltinField::ResponseCode,
    BuiltinField::Success,
    BuiltinField::Duration,
    BuiltinField::Source,
    BuiltinField::Timestamp,
];

const DEPENDENCY_FIELDS: [BuiltinField; 9] = [
    BuiltinField::Id,
    BuiltinField::Name,
    BuiltinField::Target,
    BuiltinField::DependencyType,
    BuiltinField::Data,
    BuiltinField::ResultCode,
    BuiltinField::Success,
    BuiltinField::Duration,
    BuiltinField::Timestamp,
];

const EXCEPTION_FIELDS: [BuiltinField; 5] = [
    BuiltinField::Message,
    BuiltinField::ExceptionType,
    BuiltinField::ProblemId,
    BuiltinField::SeverityLevel,
    BuiltinField::Timestamp,
];

const EVENT_FIELDS: [BuiltinField; 2] = [BuiltinField::Name, BuiltinField::Timestamp];

const TRACE_FIELDS: [BuiltinField; 3] = [
    BuiltinField::Message,
    BuiltinField::SeverityLevel,
    BuiltinField::Timestamp,
];

impl BuiltinField {
    /// Fields specific to `kind`, excluding the shared context fields.
    pub fn for_kind(kind: TelemetryKind) -> &'static [BuiltinField] {
        match kind {
            TelemetryKind::Request => &REQUEST_FIELDS,
            TelemetryKind::Dependency => &DEPENDENCY_FIELDS,
            TelemetryKind::Exception => &EXCEPTION_FIELDS,
            TelemetryKind::Event => &EVENT_FIELDS,
            TelemetryKind::Trace => &TRACE_FIELDS,
        }
    }

    /// Every field available on `kind`.
    pub fn all_for_kind(kind: TelemetryKind) -> impl Iterator<Item = BuiltinField> {
        Self::for_kind(kind)
            .iter()
            .chain(CONTEXT_FIELDS.iter())
            .copied()
    }

    /// Name used in filter configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Id => "Id",
            Self::Name => "Name",
            Self::Url => "Url",
            Self::ResponseCode => "ResponseCode",
            Self::Success => "Success",
            Self::Duration => "Duration",
            Self::Source => "Source",
            Self::Target => "Target",
            Self::DependencyType => "Type",
            Self::Data => "Data",
            Self::ResultCode => "ResultCode",
            Self::Message => "Message",
            Self::ExceptionType => "ExceptionType",
            Self::ProblemId => "ProblemId",
            Self::SeverityLevel => "SeverityLevel",
            Self::Timestamp => "Timestamp",
            Self::OperationId => "Context.Operation.Id",
            Self::OperationName => "Context.Operation.Name",
            Self::CloudRoleName => "Context.Cloud.RoleName",
            Self::CloudRoleInstance => "Context.Cloud.RoleInstance",
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            Self::ResponseCode | Self::ResultCode => FieldType::DynamicText,
            Self::Success => FieldType::Boolean,
            Self::Duration => FieldType::Duration,
            Self::Timestamp => FieldType::Timestamp,
            _ => FieldType::Text,
        }
    }

    /// Extract this field. A document of another kind yields `Missing`.
    pub fn extract<'a>(&self, document: &'a TelemetryDocument) -> FieldValue<'a> {
        use TelemetryDocument as D;

        match (self, document) {
            (Self::Timestamp, doc) => FieldValue::Timestamp(doc.timestamp()),
            (Self::OperationId, doc) => optional_text(&doc.context().operation_id),
            (Self::OperationName, doc) => optional_text(&doc.context().operation_name),
            (Self::CloudRoleName, doc) => optional_text(&doc.context().cloud_role_name),
            (Self::CloudRoleInstance, doc) => optional_text(&doc.context().cloud_role_instance),

            (Self::Id, D::Request(r)) => FieldValue::Text(&r.id),
            (Self::Name, D::Request(r)) => FieldValue::Text(&r.name),
            (Self::Url, D::Request(r)) => optional_text(&r.url),
            (Self::ResponseCode, D::Request(r)) => FieldValue::Text(&r.response_code),
            (Self::Success, D::Request(r)) => optional_bool(r.success),
            (Self::Duration, D::Request(r)) => FieldValue::Duration(r.duration),
            (Self::Source, D::Request(r)) => optional_text(&r.source),

            (Self::Id, D::Dependency(d)) => FieldValue::Text(&d.id),
            (Self::Name, D::Dependency(d)) => FieldValue::Text(&d.name),
            (Self::Target, D::Dependency(d)) => optional_text(&d.target),
            (Self::DependencyType, D::Dependency(d)) => optional_text(&d.dependency_type),
            (Self::Data, D::Dependency(d)) => optional_text(&d.data),
            (Self::ResultCode, D::Dependency(d)) => FieldValue::Text(&d.result_code),
            (Self::Success, D::Dependency(d)) => optional_bool(d.success),
            (Self::Duration, D::Dependency(d)) => FieldValue::Duration(d.duration),

            (Self::Message, D::Exception(e)) => FieldValue::Text(&e.message),
            (Self::ExceptionType, D::Exception(e)) => optional_text(&e.exception_type),
            (Self::ProblemId, D::Exception(e)) => optional_text(&e.problem_id),
            (Self::SeverityLevel, D::Exception(e)) => {
                FieldValue::Text(e.severity_level.map(|s| s.as_str()).unwrap_or(""))
            }

            (Self::Name, D::Event(e)) => FieldValue::Text(&e.name),

            (Self::Message, D::Trace(t)) => FieldValue::Text(&t.message),
            (Self::SeverityLevel, D::Trace(t)) => {
                FieldValue::Text(t.severity_level.map(|s| s.as_str()).unwrap_or(""))
            }

            _ => FieldValue::Missing,
        }
    }

    fn lookup(kind: TelemetryKind, name: &str) -> Option<BuiltinField> {
        Self::all_for_kind(kind).find(|field| field.name() == name)
    }
}

fn optional_text(value: &Option<String>) -> FieldValue<'_> {
    FieldValue::Text(value.as_deref().unwrap_or(""))
}

fn optional_bool(value: Option<bool>) -> FieldValue<'static> {
    value.map(FieldValue::Bool).unwrap_or(FieldValue::Missing)
}

/// A resolved, reusable field extractor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldAccessor {
    Builtin(BuiltinField),
    CustomDimension(String),
    CustomDimensions,
    CustomMetric(String),
    AnyField,
}

impl FieldAccessor {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Builtin(field) => field.field_type(),
            Self::CustomDimension(_) => FieldType::DynamicText,
            Self::CustomDimensions => FieldType::Map,
            Self::CustomMetric(_) => FieldType::Number,
            Self::AnyField => FieldType::Any,
        }
    }

    pub fn extract<'a>(&self, document: &'a TelemetryDocument) -> FieldValue<'a> {
        match self {
            Self::Builtin(field) => field.extract(document),
            Self::CustomDimension(key) => FieldValue::Text(
                document
                    .properties()
                    .get(key)
                    .map(String::as_str)
                    .unwrap_or(""),
            ),
            Self::CustomDimensions => FieldValue::Map(document.properties()),
            Self::CustomMetric(key) => document
                .metrics()
                .and_then(|metrics| metrics.get(key))
                .map(|v| FieldValue::Number(*v))
                .unwrap_or(FieldValue::Missing),
            Self::AnyField => {
                let mut values: Vec<FieldValue<'a>> = BuiltinField::all_for_kind(document.kind())
                    .filter(|field| {
                        matches!(field.field_type(), FieldType::Text | FieldType::DynamicText)
                    })
                    .map(|field| field.extract(document))
                    .filter(|value| !matches!(value, FieldValue::Text("")))
                    .collect();
                values.push(FieldValue::Map(document.properties()));
                FieldValue::Many(values)
            }
        }
    }
}

/// Resolve `field_name` for documents of `kind`.
pub fn resolve(kind: TelemetryKind, field_name: &str) -> Result<FieldAccessor, FieldError> {
    let name = field_name.trim();
    if name.is_empty() {
        return Err(FieldError::EmptyName);
    }
    if name == ANY_FIELD {
        return Ok(FieldAccessor::AnyField);
    }

    for prefix in DIMENSION_PREFIXES {
        if name == prefix {
            return Ok(FieldAccessor::CustomDimensions);
        }
        if let Some(key) = keyed_access(name, prefix) {
            return non_empty_key(name, key).map(FieldAccessor::CustomDimension);
        }
    }

    if let Some(key) = keyed_access(name, METRIC_PREFIX) {
        if kind == TelemetryKind::Trace {
            return Err(unknown(name, kind));
        }
        return non_empty_key(name, key).map(FieldAccessor::CustomMetric);
    }

    BuiltinField::lookup(kind, name)
        .map(FieldAccessor::Builtin)
        .ok_or_else(|| unknown(name, kind))
}

/// Split `Prefix.key` or `Prefix[key]` (key optionally quoted).
fn keyed_access<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = name.strip_prefix(prefix)?;
    if let Some(key) = rest.strip_prefix('.') {
        return Some(key);
    }
    let key = rest.strip_prefix('[')?.strip_suffix(']')?;
    let key = key.trim();
    Some(
        key.strip_prefix('"')
            .and_then(|k| k.strip_suffix('"'))
            .or_else(|| key.strip_prefix('\'').and_then(|k| k.strip_suffix('\'')))
            .unwrap_or(key),
    )
}

fn non_empty_key(name: &str, key: &str) -> Result<String, FieldError> {
    if key.is_empty() {
        Err(FieldError::EmptyKey(name.to_string()))
    } else {
        Ok(key.to_string())
    }
}

fn unknown(name: &str, kind: TelemetryKind) -> FieldError {
    FieldError::UnknownField {
        field: name.to_string(),
        kind,
    }
}

/// Per-build cache of resolved accessors.
///
/// A configuration typically names the same few fields many times; each
/// distinct `(kind, name)` pair is resolved once and the accessor shared.
/// The resolver lives only for the duration of one build.
#[derive(Debug, Default)]
pub struct FieldResolver {
    cache: HashMap<(TelemetryKind, String), Result<Arc<FieldAccessor>, FieldError>>,
    hits: u64,
}

impl FieldResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(
        &mut self,
        kind: TelemetryKind,
        field_name: &str,
    ) -> Result<Arc<FieldAccessor>, FieldError> {
        let key = (kind, field_name.to_string());
        if let Some(cached) = self.cache.get(&key) {
            self.hits += 1;
            return cached.clone();
        }
        let resolved = resolve(kind, field_name).map(Arc::new);
        self.cache.insert(key, resolved.clone());
        resolved
    }

    /// Number of distinct `(kind, name)` pairs resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_hits(&self) -> u64 {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_types::{
        DependencyTelemetry, EventTelemetry, RequestTelemetry, SeverityLevel, TraceTelemetry,
    };

    fn request() -> TelemetryDocument {
        let mut r = RequestTelemetry {
            id: "req-1".into(),
            name: "GET /home".into(),
            response_code: "200".into(),
            success: Some(true),
            duration: Duration::from_millis(120),
            ..Default::default()
        };
        r.properties.insert("tenant".into(), "contoso".into());
        r.metrics.insert("items".into(), 4.0);
        r.into()
    }

    #[test]
    fn resolves_well_known_fields_per_kind() {
        assert_eq!(
            resolve(TelemetryKind::Request, "Duration").unwrap(),
            FieldAccessor::Builtin(BuiltinField::Duration)
        );
        assert_eq!(
            resolve(TelemetryKind::Dependency, "Type").unwrap(),
            FieldAccessor::Builtin(BuiltinField::DependencyType)
        );
        assert_eq!(
            resolve(TelemetryKind::Event, "Context.Operation.Name").unwrap(),
            FieldAccessor::Builtin(BuiltinField::OperationName)
        );
    }

    #[test]
    fn field_of_another_kind_is_unknown() {
        let err = resolve(TelemetryKind::Event, "Url").unwrap_err();
        assert_eq!(
            err,
            FieldError::UnknownField {
                field: "Url".into(),
                kind: TelemetryKind::Event
            }
        );
        assert!(resolve(TelemetryKind::Trace, "Duration").is_err());
    }

    #[test]
    fn field_names_are_case_sensitive() {
        assert!(resolve(TelemetryKind::Request, "duration").is_err());
    }

    #[test]
    fn resolves_custom_dimension_syntaxes() {
        let expected = FieldAccessor::CustomDimension("tenant".into());
        assert_eq!(resolve(TelemetryKind::Request, "CustomDimensions.tenant").unwrap(), expected);
        assert_eq!(resolve(TelemetryKind::Request, "CustomDimensions[tenant]").unwrap(), expected);
        assert_eq!(resolve(TelemetryKind::Request, "CustomDimensions['tenant']").unwrap(), expected);
        assert_eq!(resolve(TelemetryKind::Request, "Properties.tenant").unwrap(), expected);
        assert_eq!(
            resolve(TelemetryKind::Trace, "CustomDimensions").unwrap(),
            FieldAccessor::CustomDimensions
        );
        assert_eq!(
            resolve(TelemetryKind::Request, "CustomDimensions.").unwrap_err(),
            FieldError::EmptyKey("CustomDimensions.".into())
        );
    }

    #[test]
    fn custom_metrics_are_not_available_on_traces() {
        assert_eq!(
            resolve(TelemetryKind::Event, "CustomMetrics.items").unwrap(),
            FieldAccessor::CustomMetric("items".into())
        );
        assert!(resolve(TelemetryKind::Trace, "CustomMetrics.items").is_err());
    }

    #[test]
    fn empty_name_is_rejected() {
        assert_eq!(resolve(TelemetryKind::Request, "  ").unwrap_err(), FieldError::EmptyName);
    }

    #[test]
    fn extracts_typed_values() {
        let doc = request();
        let get = |name: &str| resolve(TelemetryKind::Request, name).unwrap();

        assert_eq!(get("Id").extract(&doc), FieldValue::Text("req-1"));
        assert_eq!(get("Success").extract(&doc), FieldValue::Bool(true));
        assert_eq!(
            get("Duration").extract(&doc),
            FieldValue::Duration(Duration::from_millis(120))
        );
        assert_eq!(get("CustomDimensions.tenant").extract(&doc), FieldValue::Text("contoso"));
        assert_eq!(get("CustomDimensions.absent").extract(&doc), FieldValue::Text(""));
        assert_eq!(get("CustomMetrics.items").extract(&doc), FieldValue::Number(4.0));
        assert_eq!(get("CustomMetrics.absent").extract(&doc), FieldValue::Missing);
        assert_eq!(get("Url").extract(&doc), FieldValue::Text(""));
    }

    #[test]
    fn unset_success_is_missing() {
        let doc: TelemetryDocument = DependencyTelemetry::default().into();
        let accessor = resolve(TelemetryKind::Dependency, "Success").unwrap();
        assert_eq!(accessor.extract(&doc), FieldValue::Missing);
    }

    #[test]
    fn severity_is_extracted_as_text() {
        let doc: TelemetryDocument = TraceTelemetry {
            message: "disk low".into(),
            severity_level: Some(SeverityLevel::Warning),
            ..Default::default()
        }
        .into();
        let accessor = resolve(TelemetryKind::Trace, "SeverityLevel").unwrap();
        assert_eq!(accessor.extract(&doc), FieldValue::Text("Warning"));
    }

    #[test]
    fn any_field_collects_text_and_dimensions() {
        let doc: TelemetryDocument = EventTelemetry {
            name: "checkout".into(),
            ..Default::default()
        }
        .into();
        match FieldAccessor::AnyField.extract(&doc) {
            FieldValue::Many(values) => {
                assert!(values.contains(&FieldValue::Text("checkout")));
                assert!(matches!(values.last(), Some(FieldValue::Map(_))));
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn resolver_caches_each_pair_once() {
        let mut resolver = FieldResolver::new();
        let a = resolver.resolve(TelemetryKind::Request, "Name").unwrap();
        let b = resolver.resolve(TelemetryKind::Request, "Name").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(resolver.resolve(TelemetryKind::Request, "Bogus").is_err());
        assert!(resolver.resolve(TelemetryKind::Request, "Bogus").is_err());
        resolver.resolve(TelemetryKind::Event, "Name").unwrap();

        assert_eq!(resolver.resolved_count(), 3);
        assert_eq!(resolver.cache_hits(), 2);
    }
}
