//! Predicate evaluation with type-aware coercion.
//!
//! Comparands arrive as text. They are pre-parsed once per filter into every
//! shape they could be compared as; a shape that failed to parse turns into
//! an [`EvaluationError`] only when a document actually needs it.
//!
//! String comparison is ordinal and case-insensitive. Ordering operators
//! compare as `f64` (durations in milliseconds, timestamps chronologically).

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use pulse_types::Predicate;

use crate::error::EvaluationError;
use crate::field::{FieldType, FieldValue};

/// A textual comparand and the typed forms it coerces to.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparand {
    raw: String,
    folded: String,
    number: Option<f64>,
    duration_ms: Option<f64>,
    boolean: Option<bool>,
    timestamp: Option<DateTime<Utc>>,
}

impl Comparand {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let number = parse_number(trimmed);
        Self {
            raw: raw.to_string(),
            folded: fold(raw),
            number,
            duration_ms: number.or_else(|| parse_timespan_ms(trimmed)),
            boolean: parse_bool(trimmed),
            timestamp: DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn number(&self) -> Result<f64, EvaluationError> {
        self.number
            .ok_or_else(|| EvaluationError::ComparandNotNumeric(self.raw.clone()))
    }

    fn duration_ms(&self) -> Result<f64, EvaluationError> {
        self.duration_ms
            .ok_or_else(|| EvaluationError::ComparandNotDuration(self.raw.clone()))
    }

    fn boolean(&self) -> Result<bool, EvaluationError> {
        self.boolean
            .ok_or_else(|| EvaluationError::ComparandNotBoolean(self.raw.clone()))
    }

    fn timestamp(&self) -> Result<DateTime<Utc>, EvaluationError> {
        self.timestamp
            .ok_or_else(|| EvaluationError::ComparandNotTimestamp(self.raw.clone()))
    }
}

/// Whether `predicate` can ever apply to a field of `field_type`.
///
/// Checked at build time so misconfigured filters surface as configuration
/// errors instead of failing on every document.
pub fn supports(predicate: Predicate, field_type: FieldType) -> bool {
    use Predicate::*;

    match field_type {
        FieldType::Text => matches!(predicate, Equal | NotEqual | Contains | DoesNotContain),
        FieldType::DynamicText => true,
        FieldType::Number | FieldType::Duration | FieldType::Timestamp => {
            !predicate.is_containment()
        }
        FieldType::Boolean => matches!(predicate, Equal | NotEqual),
        FieldType::Map | FieldType::Any => predicate.is_containment(),
    }
}

/// Evaluate `value <predicate> comparand`.
pub fn evaluate(
    predicate: Predicate,
    comparand: &Comparand,
    value: &FieldValue<'_>,
) -> Result<bool, EvaluationError> {
    match value {
        FieldValue::Text(text) if predicate.is_ordering() => {
            let lhs = coerce_text(text)?;
            Ok(ordered(predicate, lhs.partial_cmp(&comparand.number()?)))
        }
        FieldValue::Text(text) => Ok(compare_text(predicate, text, comparand)),
        FieldValue::Number(n) => numeric(predicate, *n, comparand.number()?),
        FieldValue::Duration(d) => {
            numeric(predicate, d.as_secs_f64() * 1000.0, comparand.duration_ms()?)
        }
        FieldValue::Timestamp(t) => {
            if predicate.is_containment() {
                return Err(EvaluationError::UnsupportedPredicate(predicate));
            }
            Ok(ordered(predicate, Some(t.cmp(&comparand.timestamp()?))))
        }
        FieldValue::Bool(b) => match predicate {
            Predicate::Equal => Ok(*b == comparand.boolean()?),
            Predicate::NotEqual => Ok(*b != comparand.boolean()?),
            other => Err(EvaluationError::UnsupportedPredicate(other)),
        },
        FieldValue::Map(map) => {
            let contains = || {
                map.iter().any(|(key, value)| {
                    fold(key).contains(&comparand.folded)
                        || fold(&format!("{}:{}", key, value)).contains(&comparand.folded)
                })
            };
            match predicate {
                Predicate::Contains => Ok(contains()),
                Predicate::DoesNotContain => Ok(!contains()),
                other => Err(EvaluationError::UnsupportedPredicate(other)),
            }
        }
        FieldValue::Many(values) => {
            if !predicate.is_containment() {
                return Err(EvaluationError::UnsupportedPredicate(predicate));
            }
            let mut any = false;
            for candidate in values {
                if evaluate(Predicate::Contains, comparand, candidate)? {
                    any = true;
                    break;
                }
            }
            Ok(if predicate == Predicate::Contains { any } else { !any })
        }
        FieldValue::Missing => Err(EvaluationError::MissingValue),
    }
}

fn compare_text(predicate: Predicate, text: &str, comparand: &Comparand) -> bool {
    let text = fold(text);
    match predicate {
        Predicate::Equal => text == comparand.folded,
        Predicate::NotEqual => text != comparand.folded,
        Predicate::Contains => text.contains(&comparand.folded),
        Predicate::DoesNotContain => !text.contains(&comparand.folded),
        // Ordering predicates never reach here.
        _ => false,
    }
}

fn numeric(predicate: Predicate, lhs: f64, rhs: f64) -> Result<bool, EvaluationError> {
    if predicate.is_containment() {
        return Err(EvaluationError::UnsupportedPredicate(predicate));
    }
    Ok(ordered(predicate, lhs.partial_cmp(&rhs)))
}

fn ordered(predicate: Predicate, ordering: Option<Ordering>) -> bool {
    let Some(ordering) = ordering else {
        return predicate == Predicate::NotEqual;
    };
    match predicate {
        Predicate::Equal => ordering == Ordering::Equal,
        Predicate::NotEqual => ordering != Ordering::Equal,
        Predicate::LessThan => ordering == Ordering::Less,
        Predicate::LessThanOrEqual => ordering != Ordering::Greater,
        Predicate::GreaterThan => ordering == Ordering::Greater,
        Predicate::GreaterThanOrEqual => ordering != Ordering::Less,
        Predicate::Contains | Predicate::DoesNotContain => false,
    }
}

/// Text on the value side of a numeric comparison. Empty text is treated as
/// an absent value rather than zero.
fn coerce_text(text: &str) -> Result<f64, EvaluationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EvaluationError::MissingValue);
    }
    parse_number(trimmed).ok_or_else(|| EvaluationError::ValueNotNumeric(text.to_string()))
}

fn fold(s: &str) -> String {
    s.to_lowercase()
}

fn parse_number(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse `[-][d.]hh:mm:ss[.fraction]` into milliseconds.
fn parse_timespan_ms(s: &str) -> Option<f64> {
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let mut parts = s.split(':');
    let head = parts.next()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    let (days, hours): (u64, u64) = match head.split_once('.') {
        Some((d, h)) => (d.parse().ok()?, h.parse().ok()?),
        None => (0, head.parse().ok()?),
    };
    if hours >= 24 && days > 0 {
        return None;
    }

    let total_minutes = days
        .checked_mul(24)
        .and_then(|h| h.checked_add(hours))
        .and_then(|h| h.checked_mul(60))
        .and_then(|m| m.checked_add(minutes))?;
    let total_seconds = total_minutes as f64 * 60.0 + seconds;
    let ms = total_seconds * 1000.0;
    Some(if negative { -ms } else { ms })
}
