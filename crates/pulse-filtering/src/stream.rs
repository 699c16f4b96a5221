//! Document streams: one live-viewer subscription each.

use std::sync::Arc;

use pulse_types::{DocumentStreamInfo, TelemetryDocument, TelemetryKind};

use crate::configuration::BuildOptions;
use crate::error::{ConfigurationError, ConfigurationErrorKind};
use crate::field::FieldResolver;
use crate::filter::{DocumentFilterConjunctionGroup, MatchResult};
use crate::quota::StreamQuotas;

/// A compiled [`DocumentStreamInfo`].
///
/// A document matches when any group of the document's own kind matches.
/// Groups for other kinds are skipped, and a stream with no group for a kind
/// never matches documents of that kind.
#[derive(Debug)]
pub struct DocumentStream {
    id: String,
    groups: Vec<DocumentFilterConjunctionGroup>,
    quotas: Arc<StreamQuotas>,
}

impl DocumentStream {
    /// Build with default quotas and the system clock.
    pub fn new(info: &DocumentStreamInfo) -> (Self, Vec<ConfigurationError>) {
        Self::with_options(info, &BuildOptions::default())
    }

    pub fn with_options(
        info: &DocumentStreamInfo,
        options: &BuildOptions,
    ) -> (Self, Vec<ConfigurationError>) {
        Self::build(info, &mut FieldResolver::new(), "", options)
    }

    /// Compile every group, collecting one error per invalid field reference
    /// and one per group of an unsupported telemetry type.
    pub(crate) fn build(
        info: &DocumentStreamInfo,
        resolver: &mut FieldResolver,
        etag: &str,
        options: &BuildOptions,
    ) -> (Self, Vec<ConfigurationError>) {
        let error = |kind, message: String| {
            ConfigurationError::new(kind, info.id.clone(), message)
                .with_data("DocumentStreamId", info.id.clone())
                .with_data("ETag", etag)
        };

        let mut errors = Vec::new();
        let mut groups = Vec::with_capacity(info.document_filter_groups.len());
        for group_info in &info.document_filter_groups {
            let Some(kind) = group_info.telemetry_type.kind() else {
                errors.push(error(
                    ConfigurationErrorKind::DocumentStreamUnsupportedTelemetryType,
                    format!(
                        "document stream '{}' uses unsupported telemetry type {}",
                        info.id, group_info.telemetry_type
                    ),
                ));
                continue;
            };
            let (group, failures) =
                DocumentFilterConjunctionGroup::build(kind, group_info, resolver);
            errors.extend(failures.into_iter().map(|failure| {
                error(
                    ConfigurationErrorKind::DocumentStreamFilterFailure,
                    format!("document stream '{}': {}", info.id, failure),
                )
            }));
            groups.push(group);
        }

        let stream = Self {
            id: info.id.clone(),
            groups,
            quotas: Arc::new(StreamQuotas::new(&options.quota, options.clock.clone())),
        };
        (stream, errors)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn groups(&self) -> &[DocumentFilterConjunctionGroup] {
        &self.groups
    }

    /// Does `document` match this stream?
    ///
    /// Every group of the document's kind is evaluated, even after a match,
    /// so that all evaluation errors are reported.
    pub fn check_filters(&self, document: &TelemetryDocument) -> MatchResult {
        let mut result = MatchResult::no_match();
        for group in &self.groups {
            if group.check(document, &mut result.errors) {
                result.matched = true;
            }
        }
        result
    }

    /// Keep using `previous`'s quota state instead of starting afresh.
    pub(crate) fn continue_from(&mut self, previous: &DocumentStream) {
        self.quotas = Arc::clone(&previous.quotas);
    }

    /// Take one unit of this stream's quota for `kind`.
    pub fn try_consume_quota(&self, kind: TelemetryKind) -> bool {
        self.quotas.try_consume(kind)
    }
}
