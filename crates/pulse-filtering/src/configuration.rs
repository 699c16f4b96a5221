//! The collection configuration: one immutable, fully built snapshot of every
//! document stream and operationalized metric for a given ETag.
//!
//! A configuration is never changed once published. Reconfiguration builds a
//! new one, lets it take over the running state of the old one, and swaps it
//! in (see [`crate::engine::LiveMetricsEngine`]). Only the metric
//! accumulators, quota state and document counters are mutable, each behind
//! its own synchronisation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pulse_types::{CollectionConfigurationInfo, TelemetryDocument};

use crate::clock::{Clock, SystemClock};
use crate::config::QuotaConfig;
use crate::error::{ConfigurationError, ConfigurationErrorKind};
use crate::field::FieldResolver;
use crate::metric::{MetricResult, OperationalizedMetric};
use crate::sink::{DocumentMatch, DocumentSink};
use crate::stream::DocumentStream;

/// Settings that shape how a configuration is built.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub quota: QuotaConfig,
    pub clock: Arc<dyn Clock>,
}

impl BuildOptions {
    pub fn new(quota: QuotaConfig, clock: Arc<dyn Clock>) -> Self {
        Self { quota, clock }
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            quota: QuotaConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

/// What happened to one document in [`CollectionConfiguration::on_telemetry`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TelemetryOutcome {
    /// Streams the document was forwarded to.
    pub forwarded_to: Vec<String>,
    /// Streams that matched but were out of quota.
    pub throttled_by: Vec<String>,
    /// Number of metrics the document was folded into.
    pub metrics_folded: usize,
    pub error_count: usize,
}

impl TelemetryOutcome {
    pub fn matched_any_stream(&self) -> bool {
        !self.forwarded_to.is_empty() || !self.throttled_by.is_empty()
    }
}

/// Document counters since the last collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DocumentCounters {
    pub forwarded: u64,
    pub throttled: u64,
}

#[derive(Debug, Default)]
struct CounterState {
    forwarded: AtomicU64,
    throttled: AtomicU64,
}

#[derive(Debug)]
pub struct CollectionConfiguration {
    etag: String,
    document_streams: Vec<DocumentStream>,
    metrics: Vec<OperationalizedMetric>,
    built_at: DateTime<Utc>,
    counters: Arc<CounterState>,
}

impl CollectionConfiguration {
    /// A configuration with no streams and no metrics.
    pub fn empty(etag: impl Into<String>) -> Self {
        Self {
            etag: etag.into(),
            document_streams: Vec::new(),
            metrics: Vec::new(),
            built_at: Utc::now(),
            counters: Arc::default(),
        }
    }

    /// Build every stream and metric in `info`.
    ///
    /// Never fails as a whole: each problem becomes a [`ConfigurationError`]
    /// tagged with its item id, and every valid item is still activated.
    pub fn build(
        info: &CollectionConfigurationInfo,
        options: &BuildOptions,
    ) -> (Self, Vec<ConfigurationError>) {
        let etag = info.etag.as_str();
        let mut resolver = FieldResolver::new();
        let mut errors = Vec::new();

        let mut stream_ids = HashSet::new();
        let mut document_streams = Vec::with_capacity(info.document_streams.len());
        for stream_info in &info.document_streams {
            if !stream_ids.insert(stream_info.id.as_str()) {
                errors.push(
                    ConfigurationError::new(
                        ConfigurationErrorKind::DocumentStreamDuplicateId,
                        stream_info.id.clone(),
                        format!("duplicate document stream id '{}'", stream_info.id),
                    )
                    .with_data("DocumentStreamId", stream_info.id.clone())
                    .with_data("ETag", etag),
                );
                continue;
            }
            let (stream, stream_errors) =
                DocumentStream::build(stream_info, &mut resolver, etag, options);
            errors.extend(stream_errors);
            document_streams.push(stream);
        }

        let mut metric_ids = HashSet::new();
        let mut metrics = Vec::with_capacity(info.metrics.len());
        for metric_info in &info.metrics {
            if !metric_ids.insert(metric_info.id.as_str()) {
                errors.push(
                    ConfigurationError::new(
                        ConfigurationErrorKind::MetricDuplicateId,
                        metric_info.id.clone(),
                        format!("duplicate metric id '{}'", metric_info.id),
                    )
                    .with_data("MetricId", metric_info.id.clone())
                    .with_data("ETag", etag),
                );
                continue;
            }
            let (metric, metric_errors) =
                OperationalizedMetric::build(metric_info, &mut resolver, etag);
            errors.extend(metric_errors);
            metrics.extend(metric);
        }

        for error in &errors {
            tracing::warn!(
                etag,
                item_id = %error.item_id,
                kind = ?error.kind,
                "{}",
                error.message
            );
        }
        tracing::debug!(
            etag,
            streams = document_streams.len(),
            metrics = metrics.len(),
            fields_resolved = resolver.resolved_count(),
            field_cache_hits = resolver.cache_hits(),
            "collection configuration built"
        );

        let configuration = Self {
            etag: info.etag.clone(),
            document_streams,
            metrics,
            built_at: options.clock.now(),
            counters: Arc::default(),
        };
        (configuration, errors)
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn document_streams(&self) -> &[DocumentStream] {
        &self.document_streams
    }

    pub fn metrics(&self) -> &[OperationalizedMetric] {
        &self.metrics
    }

    /// Feed one emitted document through every stream and metric.
    ///
    /// A document matched by several streams is forwarded once, listing each
    /// stream that still had quota. Evaluation errors go to the sink keyed by
    /// the stream or metric that raised them.
    pub fn on_telemetry(
        &self,
        document: &TelemetryDocument,
        sink: &dyn DocumentSink,
    ) -> TelemetryOutcome {
        let kind = document.kind();
        let mut outcome = TelemetryOutcome::default();

        for stream in &self.document_streams {
            let result = stream.check_filters(document);
            if !result.errors.is_empty() {
                outcome.error_count += result.errors.len();
                sink.on_evaluation_errors(stream.id(), &result.errors);
            }
            if !result.matched {
                continue;
            }
            if stream.try_consume_quota(kind) {
                outcome.forwarded_to.push(stream.id().to_string());
            } else {
                tracing::trace!(stream_id = stream.id(), %kind, "document stream out of quota");
                outcome.throttled_by.push(stream.id().to_string());
            }
        }

        if !outcome.throttled_by.is_empty() {
            self.counters
                .throttled
                .fetch_add(outcome.throttled_by.len() as u64, Ordering::Relaxed);
        }
        if !outcome.forwarded_to.is_empty() {
            self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
            sink.on_document(DocumentMatch {
                stream_ids: outcome.forwarded_to.clone(),
                document: document.clone(),
            });
        }

        for metric in &self.metrics {
            let result = metric.fold(document);
            if !result.errors.is_empty() {
                outcome.error_count += result.errors.len();
                sink.on_evaluation_errors(metric.id(), &result.errors);
            }
            if result.matched {
                outcome.metrics_folded += 1;
            }
        }

        outcome
    }

    /// Drain every metric's window, in configuration order.
    pub fn collect_metrics(&self, window_end: DateTime<Utc>) -> Vec<MetricResult> {
        self.metrics
            .iter()
            .map(|metric| metric.drain_and_reset(window_end))
            .collect()
    }

    /// Forwarded and throttled counts since the previous call.
    pub fn take_document_counters(&self) -> DocumentCounters {
        DocumentCounters {
            forwarded: self.counters.forwarded.swap(0, Ordering::Relaxed),
            throttled: self.counters.throttled.swap(0, Ordering::Relaxed),
        }
    }

    /// Take over the running state of `previous` before this configuration
    /// is published: document counters, the quotas of streams that keep
    /// their id, and the windows of metrics whose definition is unchanged.
    ///
    /// Producers still holding `previous` keep folding into the shared state,
    /// so nothing they record is lost.
    pub fn continue_from(&mut self, previous: &CollectionConfiguration) {
        self.counters = Arc::clone(&previous.counters);
        for stream in &mut self.document_streams {
            if let Some(old) = previous
                .document_streams
                .iter()
                .find(|old| old.id() == stream.id())
            {
                stream.continue_from(old);
            }
        }
        for metric in &mut self.metrics {
            if let Some(old) = previous.metrics.iter().find(|old| old.id() == metric.id()) {
                metric.continue_from(old);
            }
        }
    }

    /// Drain the metrics of this configuration that `successor` did not
    /// take over. Call after `successor` has been published.
    pub fn retire(
        &self,
        successor: &CollectionConfiguration,
        window_end: DateTime<Utc>,
    ) -> Vec<MetricResult> {
        self.metrics
            .iter()
            .filter(|metric| {
                !successor
                    .metrics
                    .iter()
                    .any(|next| next.shares_accumulator_with(metric))
            })
            .map(|metric| metric.drain_and_reset(window_end))
            .collect()
    }
}
