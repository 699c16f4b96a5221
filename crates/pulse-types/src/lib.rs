//! # pulse-types
//!
//! Core data model for the Pulse live-metrics pipeline.
//!
//! Two families of types live here:
//!
//! - **Telemetry documents** ([`TelemetryDocument`]): the immutable records
//!   produced by instrumentation (requests, dependency calls, exceptions,
//!   custom events, traces) and consumed by the filtering engine.
//! - **Collection configuration DTOs** ([`CollectionConfigurationInfo`] and
//!   friends): the versioned description of document streams and
//!   operationalized metrics pushed by the control plane.
//!
//! The DTOs use the control plane's wire names (`ETag`, `DocumentStreams`,
//! `FieldName`, ...) so they round-trip through `serde_json` unchanged.

#![deny(unsafe_code)]

pub mod collection;
pub mod telemetry;

pub use collection::{
    AggregationType, CollectionConfigurationInfo, DocumentFilterConjunctionGroupInfo,
    DocumentStreamInfo, FilterConjunctionGroupInfo, FilterInfo, OperationalizedMetricInfo,
    Predicate, TelemetryType,
};
pub use telemetry::{
    DependencyTelemetry, EventTelemetry, ExceptionTelemetry, ParseTelemetryKindError,
    RequestTelemetry, SeverityLevel, TelemetryContext, TelemetryDocument, TelemetryKind,
    TraceTelemetry,
};
