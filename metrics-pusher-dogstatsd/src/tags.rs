use std::num::IntErrorKind;

use thiserror::Error;

const METRIC_SEPARATOR: char = '.';

/// Errors that could occur while extracting tags from a metric name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    /// The metric name had no segments at all, such as an empty name or one made only of dots.
    #[error("metric name has no segments")]
    NoSegments,

    /// A numeric segment was outside of the range of a 64-bit signed integer.
    #[error("numeric segment '{segment}' is out of range")]
    OutOfRange {
        /// The offending segment.
        segment: String,
    },
}

/// A tag derived from a numeric segment of a metric name.
///
/// The key is the last non-numeric segment seen before the numeric one, and the value is the numeric segment as it
/// appeared in the metric name, without any normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedTag<'a> {
    key: &'a str,
    value: &'a str,
}

impl<'a> DerivedTag<'a> {
    /// Returns the tag key.
    pub fn key(&self) -> &'a str {
        self.key
    }

    /// Returns the tag value.
    pub fn value(&self) -> &'a str {
        self.value
    }
}

/// The result of splitting a dotted metric name into a clean name and a set of derived tags.
#[derive(Debug, PartialEq, Eq)]
pub struct ExtractedName<'a> {
    segments: Vec<&'a str>,
    tags: Vec<DerivedTag<'a>>,
}

impl<'a> ExtractedName<'a> {
    /// Returns the number of segments that make up the clean metric name.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Returns the segments that make up the clean metric name, in their original order.
    pub fn segments(&self) -> &[&'a str] {
        &self.segments
    }

    /// Returns the clean metric name: every non-numeric segment joined with `.`.
    pub fn name(&self) -> String {
        self.segments.join(".")
    }

    /// Returns the tags derived from numeric segments, in the order they appeared.
    pub fn tags(&self) -> &[DerivedTag<'a>] {
        &self.tags
    }
}

/// Splits a dotted metric name into a clean metric name and a list of derived tags.
///
/// Segments are walked left to right. A segment that is a base-10 integer becomes a tag keyed by the most recent
/// non-numeric segment; every other segment is appended to the clean name and becomes the new key. A numeric segment
/// seen before any key is treated as a regular name segment.
///
/// The key is not cleared after being used, so a run of numeric segments yields one tag per segment, all with the same
/// key: `foo.200.300` produces the name `foo` and the tags `foo:200` and `foo:300`.
///
/// Empty segments, as in `foo..bar`, are skipped.
///
/// # Errors
///
/// If the name has no segments, [`ExtractError::NoSegments`] is returned. If a numeric segment does not fit in an
/// `i64`, or sits exactly at one of its bounds, [`ExtractError::OutOfRange`] is returned and the whole name is
/// rejected.
pub fn extract_tags(metric_name: &str) -> Result<ExtractedName<'_>, ExtractError> {
    let mut segments = Vec::new();
    let mut tags = Vec::new();
    let mut key = None;

    for segment in metric_name.split(METRIC_SEPARATOR).filter(|s| !s.is_empty()) {
        match (parse_numeric(segment)?, key) {
            (true, Some(key)) => tags.push(DerivedTag { key, value: segment }),
            _ => {
                key = Some(segment);
                segments.push(segment);
            }
        }
    }

    // The first segment always lands in the clean name, so an empty name means there were no segments at all.
    if segments.is_empty() {
        return Err(ExtractError::NoSegments);
    }

    Ok(ExtractedName { segments, tags })
}

/// Returns `true` if the whole segment is a base-10 integer.
fn parse_numeric(segment: &str) -> Result<bool, ExtractError> {
    match segment.parse::<i64>() {
        Ok(i64::MIN | i64::MAX) => Err(ExtractError::OutOfRange { segment: segment.to_string() }),
        Ok(_) => Ok(true),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                Err(ExtractError::OutOfRange { segment: segment.to_string() })
            }
            _ => Ok(false),
        },
    }
}
