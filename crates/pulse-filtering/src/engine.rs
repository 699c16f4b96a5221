//! The live-metrics engine: owns the active [`CollectionConfiguration`] and
//! replaces it atomically on every control-plane push.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_types::{CollectionConfigurationInfo, TelemetryDocument};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::configuration::{BuildOptions, CollectionConfiguration, TelemetryOutcome};
use crate::error::ConfigurationError;
use crate::metric::MetricResult;
use crate::sink::DocumentSink;

/// Result of pushing a configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationUpdate {
    pub etag: String,
    /// `false` when the ETag matched the last applied push.
    pub applied: bool,
    pub errors: Vec<ConfigurationError>,
}

/// Everything reported for one collection window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    /// ETag of the configuration the metrics were computed under.
    pub etag: String,
    pub window_end: DateTime<Utc>,
    pub metrics: Vec<MetricResult>,
    pub documents_forwarded: u64,
    pub documents_throttled: u64,
}

/// Holds the active configuration behind an [`ArcSwap`].
///
/// Telemetry threads load the current snapshot without locking; a push
/// builds the replacement off to the side and publishes it with one store.
/// Documents in flight during a swap finish against the snapshot they
/// loaded, and whatever they record is still reported.
pub struct LiveMetricsEngine {
    active: ArcSwap<CollectionConfiguration>,
    sink: Arc<dyn DocumentSink>,
    options: BuildOptions,
    collection_interval: Duration,
    /// ETag of the last applied push; `None` until the first one. Also
    /// serializes pushes so the ETag check and the store cannot interleave.
    applied_etag: Mutex<Option<String>>,
    /// Windows of metrics retired by a push, reported by the next `collect`.
    retired: Mutex<Vec<CollectionReport>>,
}

impl LiveMetricsEngine {
    pub fn new(config: &EngineConfig, sink: Arc<dyn DocumentSink>) -> Self {
        Self::with_clock(config, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &EngineConfig,
        sink: Arc<dyn DocumentSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut engine =
            Self::with_options(BuildOptions::new(config.quota.clone(), clock), sink);
        engine.collection_interval = config.collection_interval();
        engine
    }

    pub fn with_options(options: BuildOptions, sink: Arc<dyn DocumentSink>) -> Self {
        Self {
            active: ArcSwap::from_pointee(CollectionConfiguration::empty("")),
            sink,
            options,
            collection_interval: EngineConfig::default().collection_interval(),
            applied_etag: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Length of one collection window.
    pub fn collection_interval(&self) -> Duration {
        self.collection_interval
    }

    /// Build `info` and make it the active configuration.
    ///
    /// A push carrying the ETag of the last applied push is ignored. Otherwise
    /// the new configuration replaces the old one even if some items failed
    /// to build; the failures are returned for the control plane.
    ///
    /// Metrics whose definition is unchanged keep their running window, and
    /// streams keep their quota. Windows of metrics that were removed or
    /// redefined are closed and reported by the next [`collect`](Self::collect)
    /// under the old ETag.
    pub fn update_configuration(&self, info: &CollectionConfigurationInfo) -> ConfigurationUpdate {
        let mut applied_etag = self.applied_etag.lock();
        if applied_etag.as_deref() == Some(info.etag.as_str()) {
            tracing::debug!(etag = %info.etag, "configuration unchanged");
            return ConfigurationUpdate {
                etag: info.etag.clone(),
                applied: false,
                errors: Vec::new(),
            };
        }

        let (mut configuration, errors) = CollectionConfiguration::build(info, &self.options);
        let previous = self.active.load_full();
        configuration.continue_from(&previous);
        tracing::info!(
            previous_etag = previous.etag(),
            etag = %info.etag,
            streams = configuration.document_streams().len(),
            metrics = configuration.metrics().len(),
            errors = errors.len(),
            "collection configuration updated"
        );
        let configuration = Arc::new(configuration);
        self.active.store(Arc::clone(&configuration));
        *applied_etag = Some(info.etag.clone());

        let window_end = self.options.clock.now();
        let metrics = previous.retire(&configuration, window_end);
        if !metrics.is_empty() {
            self.retired.lock().push(CollectionReport {
                etag: previous.etag().to_string(),
                window_end,
                metrics,
                documents_forwarded: 0,
                documents_throttled: 0,
            });
        }

        ConfigurationUpdate {
            etag: info.etag.clone(),
            applied: true,
            errors,
        }
    }

    /// The configuration currently in force.
    pub fn active(&self) -> Arc<CollectionConfiguration> {
        self.active.load_full()
    }

    pub fn etag(&self) -> String {
        self.active.load().etag().to_string()
    }

    /// Called once per emitted document.
    pub fn on_telemetry(&self, document: &TelemetryDocument) -> TelemetryOutcome {
        self.active.load().on_telemetry(document, self.sink.as_ref())
    }

    /// Close the current window.
    ///
    /// Returns the windows of metrics retired by pushes since the last call,
    /// oldest first, followed by the report of the active configuration.
    pub fn collect(&self) -> Vec<CollectionReport> {
        let mut reports = std::mem::take(&mut *self.retired.lock());
        let configuration = self.active.load_full();
        let window_end = self.options.clock.now();
        let metrics = configuration.collect_metrics(window_end);
        let counters = configuration.take_document_counters();
        reports.push(CollectionReport {
            etag: configuration.etag().to_string(),
            window_end,
            metrics,
            documents_forwarded: counters.forwarded,
            documents_throttled: counters.throttled,
        });
        reports
    }
}

impl std::fmt::Debug for LiveMetricsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveMetricsEngine")
            .field("etag", &self.active.load().etag())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
