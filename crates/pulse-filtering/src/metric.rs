//! Operationalized metrics: filtered, projected, aggregated per window.
//!
//! Folding and draining share one lock per metric. A fold either lands
//! entirely before a drain (and is reported in that window) or entirely after
//! it (and is reported in the next); the drain snapshots and resets in the
//! same critical section.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_types::{AggregationType, OperationalizedMetricInfo, TelemetryDocument, TelemetryKind};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, ConfigurationErrorKind};
use crate::field::{FieldAccessor, FieldResolver, FieldType, FieldValue};
use crate::filter::{FilterConjunctionGroup, MatchResult};

/// Projection names that count documents instead of reading a field.
const COUNT_PROJECTIONS: [&str; 2] = ["Count()", "Count"];

/// What a matching document contributes to the aggregate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    /// Every matching document contributes `1`.
    Count,
    /// The named field's numeric value.
    Field {
        name: String,
        accessor: Arc<FieldAccessor>,
    },
}

impl Projection {
    fn value(&self, document: &TelemetryDocument) -> Result<f64, String> {
        let (name, accessor) = match self {
            Self::Count => return Ok(1.0),
            Self::Field { name, accessor } => (name, accessor),
        };
        match accessor.extract(document) {
            FieldValue::Number(n) => Ok(n),
            FieldValue::Duration(d) => Ok(d.as_secs_f64() * 1000.0),
            FieldValue::Text(text) if !text.trim().is_empty() => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .ok_or_else(|| format!("projection '{}' value '{}' is not a number", name, text)),
            _ => Err(format!("projection '{}' has no value", name)),
        }
    }
}

/// Running statistic for one metric over the current window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccumulatedAggregate {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl AccumulatedAggregate {
    pub fn empty() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: 0.0,
            max: 0.0,
        }
    }

    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }

    /// The reportable value under `aggregation`. An empty window reports `0`.
    pub fn value(&self, aggregation: AggregationType) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        match aggregation {
            AggregationType::Sum => self.sum,
            AggregationType::Count => self.count as f64,
            AggregationType::Average => self.sum / self.count as f64,
            AggregationType::Min => self.min,
            AggregationType::Max => self.max,
        }
    }
}

impl Default for AccumulatedAggregate {
    fn default() -> Self {
        Self::empty()
    }
}

/// One metric's value for one collection window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric_id: String,
    pub aggregation: AggregationType,
    pub value: f64,
    /// Number of documents folded into `value`.
    pub count: u64,
    pub window_end: DateTime<Utc>,
}

/// A compiled [`OperationalizedMetricInfo`] plus its accumulator.
///
/// The accumulator may be shared with the same metric in a later
/// configuration, so a reconfiguration does not cut a window short.
#[derive(Debug)]
pub struct OperationalizedMetric {
    info: OperationalizedMetricInfo,
    id: String,
    kind: TelemetryKind,
    projection: Projection,
    aggregation: AggregationType,
    filter_groups: Vec<FilterConjunctionGroup>,
    accumulator: Arc<Mutex<AccumulatedAggregate>>,
}

impl OperationalizedMetric {
    /// Build a metric on its own. See [`OperationalizedMetric::build`].
    pub fn new(info: &OperationalizedMetricInfo) -> (Option<Self>, Vec<ConfigurationError>) {
        Self::build(info, &mut FieldResolver::new(), "")
    }

    /// Compile `info`.
    ///
    /// An unsupported telemetry type or an unusable projection yields no
    /// metric. Broken filters only disable their own group.
    pub fn build(
        info: &OperationalizedMetricInfo,
        resolver: &mut FieldResolver,
        etag: &str,
    ) -> (Option<Self>, Vec<ConfigurationError>) {
        let error = |kind, message: String| {
            ConfigurationError::new(kind, info.id.clone(), message)
                .with_data("MetricId", info.id.clone())
                .with_data("ETag", etag)
        };

        let Some(kind) = info.telemetry_type.kind() else {
            let message = format!(
                "metric '{}' uses unsupported telemetry type {}",
                info.id, info.telemetry_type
            );
            return (
                None,
                vec![error(ConfigurationErrorKind::MetricUnsupportedTelemetryType, message)],
            );
        };

        let projection = match Self::build_projection(kind, &info.projection, resolver) {
            Ok(projection) => projection,
            Err(reason) => {
                let message = format!(
                    "metric '{}' has an invalid projection '{}': {}",
                    info.id, info.projection, reason
                );
                return (
                    None,
                    vec![error(ConfigurationErrorKind::MetricProjectionFailure, message)],
                );
            }
        };

        let mut errors = Vec::new();
        let mut filter_groups = Vec::with_capacity(info.filter_groups.len());
        for group_info in &info.filter_groups {
            let (group, failures) = FilterConjunctionGroup::build(kind, group_info, resolver);
            errors.extend(failures.into_iter().map(|failure| {
                error(
                    ConfigurationErrorKind::MetricFilterFailure,
                    format!("metric '{}': {}", info.id, failure),
                )
            }));
            filter_groups.push(group);
        }

        let metric = Self {
            info: info.clone(),
            id: info.id.clone(),
            kind,
            projection,
            aggregation: info.aggregation,
            filter_groups,
            accumulator: Arc::new(Mutex::new(AccumulatedAggregate::empty())),
        };
        (Some(metric), errors)
    }

    fn build_projection(
        kind: TelemetryKind,
        projection: &str,
        resolver: &mut FieldResolver,
    ) -> Result<Projection, String> {
        let name = projection.trim();
        if COUNT_PROJECTIONS.iter().any(|p| p.eq_ignore_ascii_case(name)) {
            return Ok(Projection::Count);
        }
        let accessor = resolver.resolve(kind, name).map_err(|e| e.to_string())?;
        match accessor.field_type() {
            FieldType::Number | FieldType::Duration | FieldType::DynamicText => {
                Ok(Projection::Field {
                    name: name.to_string(),
                    accessor,
                })
            }
            other => Err(format!("field of type {} cannot be aggregated", other)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TelemetryKind {
        self.kind
    }

    pub fn aggregation(&self) -> AggregationType {
        self.aggregation
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// OR across filter groups; no groups at all matches every document.
    fn check_filters(&self, document: &TelemetryDocument, errors: &mut Vec<String>) -> bool {
        if self.filter_groups.is_empty() {
            return true;
        }
        let mut matched = false;
        for group in &self.filter_groups {
            if group.check(document, errors) {
                matched = true;
            }
        }
        matched
    }

    /// Fold `document` into the running aggregate if it qualifies.
    ///
    /// `matched` in the result means the document was folded. A projection
    /// that cannot be read is reported and the document skipped.
    pub fn fold(&self, document: &TelemetryDocument) -> MatchResult {
        if document.kind() != self.kind {
            return MatchResult::no_match();
        }
        let mut errors = Vec::new();
        if !self.check_filters(document, &mut errors) {
            return MatchResult {
                matched: false,
                errors,
            };
        }
        match self.projection.value(document) {
            Ok(value) => {
                self.accumulator.lock().add(value);
                MatchResult {
                    matched: true,
                    errors,
                }
            }
            Err(e) => {
                errors.push(e);
                MatchResult {
                    matched: false,
                    errors,
                }
            }
        }
    }

    /// Keep folding into `previous`'s accumulator if both metrics have the
    /// same definition. Returns whether the window was carried over.
    pub(crate) fn continue_from(&mut self, previous: &OperationalizedMetric) -> bool {
        if self.info != previous.info {
            return false;
        }
        self.accumulator = Arc::clone(&previous.accumulator);
        true
    }

    pub(crate) fn shares_accumulator_with(&self, other: &OperationalizedMetric) -> bool {
        Arc::ptr_eq(&self.accumulator, &other.accumulator)
    }

    /// Current window's aggregate, without resetting it.
    pub fn peek(&self) -> AccumulatedAggregate {
        *self.accumulator.lock()
    }

    /// Snapshot the window's value and reset, atomically with respect to
    /// concurrent folds.
    pub fn drain_and_reset(&self, window_end: DateTime<Utc>) -> MetricResult {
        let aggregate = std::mem::take(&mut *self.accumulator.lock());
        MetricResult {
            metric_id: self.id.clone(),
            aggregation: self.aggregation,
            value: aggregate.value(self.aggregation),
            count: aggregate.count,
            window_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_types::{
        DependencyTelemetry, FilterConjunctionGroupInfo, FilterInfo, Predicate, RequestTelemetry,
        TelemetryType,
    };
    use std::time::Duration;

    fn metric_info(
        projection: &str,
        aggregation: AggregationType,
        filter_groups: Vec<FilterConjunctionGroupInfo>,
    ) -> OperationalizedMetricInfo {
        OperationalizedMetricInfo {
            id: "m".into(),
            telemetry_type: TelemetryType::Request,
            projection: projection.into(),
            aggregation,
            filter_groups,
        }
    }

    fn request_ms(ms: u64) -> TelemetryDocument {
        RequestTelemetry {
            name: "GET /".into(),
            duration: Duration::from_millis(ms),
            ..Default::default()
        }
        .into()
    }

    fn build(info: &OperationalizedMetricInfo) -> OperationalizedMetric {
        let (metric, errors) = OperationalizedMetric::new(info);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        metric.unwrap()
    }

    #[test]
    fn average_divides_on_drain() {
        let metric = build(&metric_info("Duration", AggregationType::Average, vec![]));
        for ms in [2, 4, 6] {
            assert!(metric.fold(&request_ms(ms)).matched);
        }
        let result = metric.drain_and_reset(Utc::now());
        assert!((result.value - 4.0).abs() < 1e-9);
        assert_eq!(result.count, 3);
    }

    #[test]
    fn min_and_max_start_from_first_value() {
        let min = build(&metric_info("Duration", AggregationType::Min, vec![]));
        let max = build(&metric_info("Duration", AggregationType::Max, vec![]));
        for ms in [50, 20, 70] {
            min.fold(&request_ms(ms));
            max.fold(&request_ms(ms));
        }
        assert_eq!(min.drain_and_reset(Utc::now()).value, 20.0);
        assert_eq!(max.drain_and_reset(Utc::now()).value, 70.0);
    }

    #[test]
    fn sum_and_count() {
        let sum = build(&metric_info("Duration", AggregationType::Sum, vec![]));
        let count = build(&metric_info("Count()", AggregationType::Count, vec![]));
        for ms in [1, 2, 3] {
            sum.fold(&request_ms(ms));
            count.fold(&request_ms(ms));
        }
        assert_eq!(sum.drain_and_reset(Utc::now()).value, 6.0);
        assert_eq!(count.drain_and_reset(Utc::now()).value, 3.0);
    }

    #[test]
    fn drain_resets_exactly_once() {
        let metric = build(&metric_info("Count", AggregationType::Sum, vec![]));
        metric.fold(&request_ms(1));
        assert_eq!(metric.drain_and_reset(Utc::now()).value, 1.0);
        let second = metric.drain_and_reset(Utc::now());
        assert_eq!(second.value, 0.0);
        assert_eq!(second.count, 0);
    }

    #[test]
    fn filters_gate_folding() {
        let slow = FilterConjunctionGroupInfo::new(vec![FilterInfo::new(
            "Duration",
            Predicate::GreaterThan,
            "100",
        )]);
        let metric = build(&metric_info("Count()", AggregationType::Count, vec![slow]));
        assert!(!metric.fold(&request_ms(50)).matched);
        assert!(metric.fold(&request_ms(150)).matched);
        assert_eq!(metric.peek().count, 1);
    }

    #[test]
    fn other_kinds_are_ignored() {
        let metric = build(&metric_info("Count()", AggregationType::Count, vec![]));
        let dependency: TelemetryDocument = DependencyTelemetry::default().into();
        let result = metric.fold(&dependency);
        assert!(!result.matched);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn projection_on_text_field_is_rejected() {
        let (metric, errors) =
            OperationalizedMetric::new(&metric_info("Name", AggregationType::Sum, vec![]));
        assert!(metric.is_none());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ConfigurationErrorKind::MetricProjectionFailure);
        assert!(errors[0].message.contains("Name"));
    }

    #[test]
    fn unsupported_telemetry_type_is_rejected() {
        let mut info = metric_info("Count()", AggregationType::Count, vec![]);
        info.telemetry_type = TelemetryType::Unsupported;
        let (metric, errors) = OperationalizedMetric::new(&info);
        assert!(metric.is_none());
        assert_eq!(errors[0].kind, ConfigurationErrorKind::MetricUnsupportedTelemetryType);
    }

    #[test]
    fn unreadable_projection_skips_document() {
        let metric = build(&metric_info(
            "CustomDimensions.size",
            AggregationType::Sum,
            vec![],
        ));
        let mut request = RequestTelemetry::default();
        request.properties.insert("size".into(), "large".into());
        let result = metric.fold(&request.into());
        assert!(!result.matched);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("large"));

        let mut request = RequestTelemetry::default();
        request.properties.insert("size".into(), "12.5".into());
        assert!(metric.fold(&request.into()).matched);
        assert_eq!(metric.drain_and_reset(Utc::now()).value, 12.5);
    }

    #[test]
    fn identical_definition_continues_the_window() {
        let info = metric_info("Count()", AggregationType::Count, vec![]);
        let previous = build(&info);
        previous.fold(&request_ms(1));

        let mut next = build(&info);
        assert!(next.continue_from(&previous));
        assert!(next.shares_accumulator_with(&previous));
        previous.fold(&request_ms(1));
        assert_eq!(next.drain_and_reset(Utc::now()).value, 2.0);

        let mut changed = build(&metric_info("Duration", AggregationType::Sum, vec![]));
        assert!(!changed.continue_from(&previous));
        assert!(!changed.shares_accumulator_with(&previous));
    }

    #[test]
    fn broken_filter_disables_only_its_group() {
        let broken =
            FilterConjunctionGroupInfo::new(vec![FilterInfo::new("Bogus", Predicate::Equal, "1")]);
        let fast = FilterConjunctionGroupInfo::new(vec![FilterInfo::new(
            "Duration",
            Predicate::LessThan,
            "10",
        )]);
        let (metric, errors) = OperationalizedMetric::new(&metric_info(
            "Count()",
            AggregationType::Count,
            vec![broken, fast],
        ));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ConfigurationErrorKind::MetricFilterFailure);
        assert!(errors[0].message.contains("Bogus"));

        let metric = metric.unwrap();
        assert!(metric.fold(&request_ms(5)).matched);
        assert!(!metric.fold(&request_ms(50)).matched);
    }
}
