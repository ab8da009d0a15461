//! Up-front parameter validation for the public operations.
//!
//! Problems found here are caller errors: every issue is collected in one pass
//! and reported together as a single [`ParamError`] before any connection is
//! attempted or any snapshot is read.

use crate::snapshot::Snapshot;
use reqwest::Url;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Timeout applied when the caller does not pass one.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSide {
    Before,
    After,
}

impl SnapshotSide {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotSide::Before => "before",
            SnapshotSide::After => "after",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// One fatal input problem, identified by a `VAL` code.
pub enum ParamIssue {
    EndpointMissing,
    EndpointNotString,
    EndpointBlank,
    EndpointInvalidUrl,
    TimeoutNotNumber,
    TimeoutNotPositive,
    TimeoutOutOfRange,
    SnapshotMissing(SnapshotSide),
    SnapshotNotObject(SnapshotSide),
    SnapshotMalformed(SnapshotSide),
}

impl ParamIssue {
    pub fn code(&self) -> &'static str {
        use SnapshotSide::{After, Before};
        match self {
            ParamIssue::EndpointMissing => "VAL-001",
            ParamIssue::EndpointNotString => "VAL-002",
            ParamIssue::EndpointBlank => "VAL-003",
            ParamIssue::EndpointInvalidUrl => "VAL-004",
            ParamIssue::TimeoutNotNumber => "VAL-005",
            ParamIssue::TimeoutNotPositive | ParamIssue::TimeoutOutOfRange => "VAL-006",
            ParamIssue::SnapshotMissing(Before) => "VAL-010",
            ParamIssue::SnapshotNotObject(Before) => "VAL-011",
            ParamIssue::SnapshotMalformed(Before) => "VAL-012",
            ParamIssue::SnapshotMissing(After) => "VAL-013",
            ParamIssue::SnapshotNotObject(After) => "VAL-014",
            ParamIssue::SnapshotMalformed(After) => "VAL-015",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            ParamIssue::EndpointMissing
            | ParamIssue::EndpointNotString
            | ParamIssue::EndpointBlank
            | ParamIssue::EndpointInvalidUrl => "endpoint",
            ParamIssue::TimeoutNotNumber
            | ParamIssue::TimeoutNotPositive
            | ParamIssue::TimeoutOutOfRange => "timeout",
            ParamIssue::SnapshotMissing(side)
            | ParamIssue::SnapshotNotObject(side)
            | ParamIssue::SnapshotMalformed(side) => side.as_str(),
        }
    }

    fn detail(&self) -> &'static str {
        match self {
            ParamIssue::EndpointMissing | ParamIssue::SnapshotMissing(_) => "Missing value",
            ParamIssue::EndpointNotString => "Must be a string",
            ParamIssue::EndpointBlank => "Must not be empty",
            ParamIssue::EndpointInvalidUrl => "Must be a valid URL",
            ParamIssue::TimeoutNotNumber => "Must be a number",
            ParamIssue::TimeoutNotPositive => "Must be greater than 0",
            ParamIssue::TimeoutOutOfRange => "Too large to represent as a duration",
            ParamIssue::SnapshotNotObject(_) => "Must be an object",
            ParamIssue::SnapshotMalformed(_) => "Must contain readable categories and entries",
        }
    }
}

impl fmt::Display for ParamIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.code(), self.subject(), self.detail())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Every fatal input problem found in one validation pass.
pub struct ParamError {
    issues: Vec<ParamIssue>,
}

impl ParamError {
    pub fn issues(&self) -> &[ParamIssue] {
        &self.issues
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.issues.iter().map(ParamIssue::code).collect()
    }
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, issue) in self.issues.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParamError {}

fn finish<T>(issues: Vec<ParamIssue>, value: impl FnOnce() -> T) -> Result<T, ParamError> {
    if issues.is_empty() {
        Ok(value())
    } else {
        Err(ParamError { issues })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Validated inputs for one validation run.
pub struct RunOptions {
    pub endpoint: String,
    pub timeout: Duration,
}

impl RunOptions {
    /// Validate raw `endpoint`/`timeout` arguments. `None` means the argument
    /// was not supplied at all; an explicit JSON null is a wrong type.
    pub fn parse(endpoint: Option<&Value>, timeout: Option<&Value>) -> Result<Self, ParamError> {
        let mut issues = Vec::new();

        let endpoint = match endpoint {
            None => {
                issues.push(ParamIssue::EndpointMissing);
                None
            }
            Some(Value::String(text)) if text.trim().is_empty() => {
                issues.push(ParamIssue::EndpointBlank);
                None
            }
            Some(Value::String(text)) => {
                let trimmed = text.trim();
                if Url::parse(trimmed).is_err() {
                    issues.push(ParamIssue::EndpointInvalidUrl);
                }
                Some(trimmed.to_string())
            }
            Some(_) => {
                issues.push(ParamIssue::EndpointNotString);
                None
            }
        };

        let timeout = match timeout {
            None => Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
            Some(Value::Number(number)) => match number.as_f64() {
                Some(ms) if ms > 0.0 => match Duration::try_from_secs_f64(ms / 1000.0) {
                    Ok(timeout) => Some(timeout),
                    Err(_) => {
                        issues.push(ParamIssue::TimeoutOutOfRange);
                        None
                    }
                },
                _ => {
                    issues.push(ParamIssue::TimeoutNotPositive);
                    None
                }
            },
            Some(_) => {
                issues.push(ParamIssue::TimeoutNotNumber);
                None
            }
        };

        finish(issues, || RunOptions {
            endpoint: endpoint.unwrap_or_default(),
            timeout: timeout.unwrap_or_default(),
        })
    }

    /// Convenience for callers that already hold typed values.
    pub fn new(endpoint: &str, timeout_ms: Option<u64>) -> Result<Self, ParamError> {
        let endpoint = Value::String(endpoint.to_string());
        let timeout = timeout_ms.map(Value::from);
        Self::parse(Some(&endpoint), timeout.as_ref())
    }
}

/// A snapshot read back from JSON, plus the category keys its document
/// actually carried.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub snapshot: Snapshot,
    pub declared_categories: Vec<&'static str>,
}

/// Check both compare inputs and read them as snapshots. Absent fields inside
/// `categories` and `entries` read as false, null or empty.
pub fn parse_compare_inputs(
    before: Option<&Value>,
    after: Option<&Value>,
) -> Result<(StoredSnapshot, StoredSnapshot), ParamError> {
    let mut issues = Vec::new();
    let before = read_side(before, SnapshotSide::Before, &mut issues);
    let after = read_side(after, SnapshotSide::After, &mut issues);
    match (before, after) {
        (Some(before), Some(after)) if issues.is_empty() => Ok((before, after)),
        _ => Err(ParamError { issues }),
    }
}

fn read_side(
    value: Option<&Value>,
    side: SnapshotSide,
    issues: &mut Vec<ParamIssue>,
) -> Option<StoredSnapshot> {
    let Some(value) = value else {
        issues.push(ParamIssue::SnapshotMissing(side));
        return None;
    };
    let Some(object) = value.as_object() else {
        issues.push(ParamIssue::SnapshotNotObject(side));
        return None;
    };
    let has_sections = ["categories", "entries"]
        .iter()
        .all(|key| object.get(*key).is_some_and(Value::is_object));
    if !has_sections {
        issues.push(ParamIssue::SnapshotMalformed(side));
        return None;
    }
    match serde_json::from_value::<Snapshot>(value.clone()) {
        Ok(snapshot) => {
            let declared_categories = declared_categories(&snapshot, object);
            Some(StoredSnapshot {
                snapshot,
                declared_categories,
            })
        }
        Err(_) => {
            issues.push(ParamIssue::SnapshotMalformed(side));
            None
        }
    }
}

fn declared_categories(snapshot: &Snapshot, object: &Map<String, Value>) -> Vec<&'static str> {
    let Some(categories) = object.get("categories").and_then(Value::as_object) else {
        return Vec::new();
    };
    snapshot
        .categories
        .pairs()
        .into_iter()
        .map(|(name, _)| name)
        .filter(|name| categories.contains_key(*name))
        .collect()
}
