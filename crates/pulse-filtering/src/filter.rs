//! Compiled filters and the AND/OR groups built from them.
//!
//! ```text
//!   DocumentFilterConjunctionGroup   kind == document kind
//!     └─ FilterConjunctionGroup      AND, short-circuits on first false
//!          └─ Filter                 field accessor + predicate + comparand
//! ```
//!
//! A filter that fails to compile makes its conjunction group inert: the
//! group never matches, and the failure is reported once at build time.

use std::sync::Arc;

use pulse_types::{
    DocumentFilterConjunctionGroupInfo, FilterConjunctionGroupInfo, FilterInfo, Predicate,
    TelemetryDocument, TelemetryKind,
};

use crate::error::{EvaluationError, FilterError};
use crate::field::{FieldAccessor, FieldResolver};
use crate::predicate::{self, Comparand};

/// Outcome of checking a document: whether it matched, plus every
/// evaluation error met along the way. Errors never change control flow.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub matched: bool,
    pub errors: Vec<String>,
}

impl MatchResult {
    pub fn no_match() -> Self {
        Self::default()
    }
}

/// A filter that could not be compiled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterFailure {
    pub filter: FilterInfo,
    pub error: FilterError,
}

impl std::fmt::Display for FilterFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to create filter {}: {}", self.filter, self.error)
    }
}

/// One compiled `(field, predicate, comparand)` triple.
#[derive(Clone, Debug)]
pub struct Filter {
    info: FilterInfo,
    accessor: Arc<FieldAccessor>,
    comparand: Comparand,
}

impl Filter {
    pub fn build(
        kind: TelemetryKind,
        info: &FilterInfo,
        resolver: &mut FieldResolver,
    ) -> Result<Self, FilterError> {
        let accessor = resolver.resolve(kind, &info.field_name)?;
        let field_type = accessor.field_type();
        if !predicate::supports(info.predicate, field_type) {
            return Err(FilterError::UnsupportedPredicate {
                field: info.field_name.clone(),
                predicate: info.predicate,
                field_type,
            });
        }
        Ok(Self {
            info: info.clone(),
            accessor,
            comparand: Comparand::parse(&info.comparand),
        })
    }

    pub fn info(&self) -> &FilterInfo {
        &self.info
    }

    pub fn predicate(&self) -> Predicate {
        self.info.predicate
    }

    pub fn check(&self, document: &TelemetryDocument) -> Result<bool, EvaluationError> {
        let value = self.accessor.extract(document);
        predicate::evaluate(self.info.predicate, &self.comparand, &value)
    }
}

/// Filters combined with AND.
#[derive(Clone, Debug, Default)]
pub struct FilterConjunctionGroup {
    filters: Vec<Filter>,
    inert: bool,
}

impl FilterConjunctionGroup {
    /// Compile every filter of `info`, collecting failures instead of
    /// stopping at the first one.
    pub fn build(
        kind: TelemetryKind,
        info: &FilterConjunctionGroupInfo,
        resolver: &mut FieldResolver,
    ) -> (Self, Vec<FilterFailure>) {
        let mut filters = Vec::with_capacity(info.filters.len());
        let mut failures = Vec::new();
        for filter_info in &info.filters {
            match Filter::build(kind, filter_info, resolver) {
                Ok(filter) => filters.push(filter),
                Err(error) => failures.push(FilterFailure {
                    filter: filter_info.clone(),
                    error,
                }),
            }
        }
        let inert = !failures.is_empty();
        (Self { filters, inert }, failures)
    }

    /// Whether a compile failure disabled this group.
    pub fn is_inert(&self) -> bool {
        self.inert
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// AND of all filters. A failing evaluation counts as `false`; its
    /// message is appended to `errors`.
    pub fn check(&self, document: &TelemetryDocument, errors: &mut Vec<String>) -> bool {
        if self.inert {
            return false;
        }
        for filter in &self.filters {
            match filter.check(document) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    errors.push(format!("failed to evaluate filter {}: {}", filter.info, e));
                    return false;
                }
            }
        }
        true
    }
}

/// A conjunction group bound to one telemetry kind.
#[derive(Clone, Debug)]
pub struct DocumentFilterConjunctionGroup {
    kind: TelemetryKind,
    group: FilterConjunctionGroup,
}

impl DocumentFilterConjunctionGroup {
    /// Build for a supported `kind`. Callers reject unsupported telemetry
    /// types before getting here.
    pub fn build(
        kind: TelemetryKind,
        info: &DocumentFilterConjunctionGroupInfo,
        resolver: &mut FieldResolver,
    ) -> (Self, Vec<FilterFailure>) {
        let (group, failures) = FilterConjunctionGroup::build(kind, &info.filters, resolver);
        (Self { kind, group }, failures)
    }

    pub fn kind(&self) -> TelemetryKind {
        self.kind
    }

    pub fn group(&self) -> &FilterConjunctionGroup {
        &self.group
    }

    pub fn check(&self, document: &TelemetryDocument, errors: &mut Vec<String>) -> bool {
        document.kind() == self.kind && self.group.check(document, errors)
    }
}
