//! OperationOutcome detection.
//!
//! Every response body is speculatively parsed as an OperationOutcome. A body
//! that does not parse, or parses without the OperationOutcome type tag, is
//! simply "not an outcome" and never an error by itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `resourceType` of an OperationOutcome.
pub const OPERATION_OUTCOME: &str = "OperationOutcome";

/// Issue severity, ordered `Information < Warning < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Information,
    Warning,
    Error,
    Fatal,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Information => "information",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Error => "error",
            IssueSeverity::Fatal => "fatal",
        }
    }

    pub fn is_error(&self) -> bool {
        *self >= IssueSeverity::Error
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeIssue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<IssueSeverity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl fmt::Display for OutcomeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code.as_deref().unwrap_or_default();
        let severity = self.severity.map(|s| s.as_str()).unwrap_or_default();
        write!(f, "[{code} {severity}]")?;
        if let Some(diagnostics) = &self.diagnostics {
            write!(f, " {diagnostics}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    #[serde(rename = "resourceType", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issue: Vec<OutcomeIssue>,
}

impl OperationOutcome {
    /// True when the type tag names an OperationOutcome (case-insensitive).
    pub fn is_operation_outcome(&self) -> bool {
        self.resource_type
            .as_deref()
            .is_some_and(|rt| rt.eq_ignore_ascii_case(OPERATION_OUTCOME))
    }

    /// True when at least one issue has `error` or `fatal` severity.
    pub fn contains_error(&self) -> bool {
        self.issue
            .iter()
            .any(|issue| issue.severity.is_some_and(|s| s.is_error()))
    }
}

/// An OperationOutcome returned by the server, with the HTTP status it came with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct OperationOutcomeError {
    pub outcome: OperationOutcome,
    pub http_status: u16,
}

impl fmt::Display for OperationOutcomeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{OPERATION_OUTCOME}, issues: ")?;
        for (i, issue) in self.outcome.issue.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// Check a response body for an OperationOutcome that should fail the call.
///
/// With `force_error` any recognized outcome is an error; otherwise only an
/// outcome holding an `error` or `fatal` issue is.
pub fn check_operation_outcome(
    body: &[u8],
    force_error: bool,
    http_status: u16,
) -> Result<(), OperationOutcomeError> {
    if body.is_empty() {
        return Ok(());
    }
    let Ok(outcome) = serde_json::from_slice::<OperationOutcome>(body) else {
        return Ok(());
    };
    if !outcome.is_operation_outcome() {
        return Ok(());
    }
    if force_error || outcome.contains_error() {
        return Err(OperationOutcomeError {
            outcome,
            http_status,
        });
    }
    tracing::debug!(
        http_status,
        issues = outcome.issue.len(),
        "ignoring non-error OperationOutcome"
    );
    Ok(())
}
