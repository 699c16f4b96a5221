//! # pulse-filtering
//!
//! Live filtering and metrics aggregation over emitted telemetry.
//!
//! A control plane pushes a [`CollectionConfigurationInfo`](pulse_types::CollectionConfigurationInfo)
//! describing document streams (live-viewer subscriptions) and operationalized
//! metrics. The engine compiles it into an immutable [`CollectionConfiguration`],
//! swaps it in atomically, and then consults it once per emitted document.
//!
//! ## Architecture
//!
//! ```text
//!   control plane ──► LiveMetricsEngine::update_configuration
//!                          │ build (fields resolved once, errors collected)
//!                          ▼
//!                   ┌──────────────────────────┐
//!                   │ CollectionConfiguration  │  ◄── ArcSwap
//!                   │  DocumentStream[]        │──► DocumentSink (quota-gated)
//!                   │  OperationalizedMetric[] │──► AccumulatedAggregate
//!                   └──────────────────────────┘
//!                          ▲                │ collect() each window
//!   telemetry ──► on_telemetry              ▼
//!                                   CollectionReporter
//! ```
//!
//! Filters are `(field, predicate, comparand)` triples combined with AND
//! inside a conjunction group; groups are combined with OR. Comparands are
//! coerced to the field's type on evaluation, and coercion failures are
//! reported as diagnostics, never as hard errors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pulse_filtering::{EngineConfig, LiveMetricsEngine, MemorySink};
//! use pulse_types::{CollectionConfigurationInfo, RequestTelemetry};
//!
//! let sink = Arc::new(MemorySink::new());
//! let engine = LiveMetricsEngine::new(&EngineConfig::default(), sink.clone());
//!
//! let info = CollectionConfigurationInfo::from_json(r#"{
//!     "ETag": "v1",
//!     "DocumentStreams": [{
//!         "Id": "failures",
//!         "DocumentFilterGroups": [{
//!             "TelemetryType": "Request",
//!             "Filters": { "Filters": [
//!                 { "FieldName": "Success", "Predicate": "Equal", "Comparand": "false" }
//!             ]}
//!         }]
//!     }]
//! }"#).unwrap();
//! let update = engine.update_configuration(&info);
//! assert!(update.errors.is_empty());
//!
//! engine.on_telemetry(&RequestTelemetry { success: Some(false), ..Default::default() }.into());
//! assert_eq!(sink.len(), 1);
//! ```

#![deny(unsafe_code)]

pub mod clock;
pub mod collection;
pub mod config;
pub mod configuration;
pub mod engine;
pub mod error;
pub mod field;
pub mod filter;
pub mod logging;
pub mod metric;
pub mod predicate;
pub mod quota;
pub mod sink;
pub mod stream;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collection::{ChannelReporter, CollectionHandle, CollectionLoop, CollectionReporter};
pub use config::{CollectionSettings, EngineConfig, LoggingConfig, QuotaConfig};
pub use configuration::{
    BuildOptions, CollectionConfiguration, DocumentCounters, TelemetryOutcome,
};
pub use engine::{CollectionReport, ConfigurationUpdate, LiveMetricsEngine};
pub use error::{
    ConfigurationError, ConfigurationErrorKind, EvaluationError, FieldError, FilterError,
    PulseError, PulseResult,
};
pub use field::{FieldAccessor, FieldResolver, FieldType, FieldValue};
pub use filter::{
    DocumentFilterConjunctionGroup, Filter, FilterConjunctionGroup, FilterFailure, MatchResult,
};
pub use logging::init_tracing;
pub use metric::{AccumulatedAggregate, MetricResult, OperationalizedMetric, Projection};
pub use predicate::Comparand;
pub use quota::{QuotaTracker, StreamQuotas};
pub use sink::{ChannelSink, DocumentMatch, DocumentSink, MemorySink, NullSink};
pub use stream::DocumentStream;
