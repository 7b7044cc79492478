// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical errors and the error taxonomy framework for CCCS.
//!
//! Every failure surfaced by the substrate carries an [`ErrorKind`] — a
//! machine-readable, stable code — plus a human-readable message and an
//! optional cause. The [`ErrorTaxonomy`] maps kinds to caller-facing
//! [`CanonicalError`]s with severity, retryability, a curated user message,
//! and a fresh debug id.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `snake_case` string that is guaranteed not
/// to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Identity resolution cannot complete, or the actor context is invalid.
    ActorUnavailable,
    /// No snapshot loaded, snapshot signature invalid, or evaluation failed.
    PolicyUnavailable,
    /// No redaction rules, or rule-version mismatch under strict matching.
    RedactionBlocked,
    /// A peer requested an incompatible semantic version.
    VersionMismatch,
    /// The budget cache or upstream denied the action.
    BudgetExceeded,
    /// A receipt is missing required fields, carries an invalid decision
    /// status, or exceeds the size cap.
    ReceiptSchema,
    /// Bootstrap did not see all dependencies healthy within the timeout.
    BootstrapTimeout,
    /// Catch-all for unexpected internal errors.
    Unknown,
}

impl ErrorKind {
    /// Stable `&'static str` representation of the code
    /// (e.g. `"actor_unavailable"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActorUnavailable => "actor_unavailable",
            Self::PolicyUnavailable => "policy_unavailable",
            Self::RedactionBlocked => "redaction_blocked",
            Self::VersionMismatch => "version_mismatch",
            Self::BudgetExceeded => "budget_exceeded",
            Self::ReceiptSchema => "receipt_schema_error",
            Self::BootstrapTimeout => "bootstrap_timeout",
            Self::Unknown => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// CccsError
// ---------------------------------------------------------------------------

/// Unified CCCS error: a stable [`ErrorKind`], a human-readable message,
/// and an optional underlying cause.
///
/// # Builder usage
///
/// ```
/// use cccs_error::{CccsError, ErrorKind};
///
/// let err = CccsError::new(ErrorKind::BudgetExceeded, "cost 5 > remaining 1");
/// assert_eq!(err.kind(), ErrorKind::BudgetExceeded);
/// ```
pub struct CccsError {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CccsError {
    /// Create a new error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The stable error code.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for CccsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("CccsError");
        d.field("kind", &self.kind);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        d.finish()
    }
}

impl fmt::Display for CccsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for CccsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Severity / taxonomy
// ---------------------------------------------------------------------------

/// Severity band of a canonical error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Info,
    /// Degraded but serving.
    Warning,
    /// Request-affecting failure.
    High,
    /// Integrity- or availability-affecting failure.
    Critical,
}

/// One taxonomy row: how a given error kind is presented to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    /// Canonical code reported to callers.
    pub canonical_code: String,
    /// Severity band.
    pub severity: Severity,
    /// Whether the caller may retry the operation.
    pub retryable: bool,
    /// Curated, safe-to-display message.
    pub user_message: String,
}

/// The normalized, cross-subsystem representation of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalError {
    /// Canonical code (e.g. `"budget_exceeded"`).
    pub canonical_code: String,
    /// Severity band.
    pub severity: Severity,
    /// Whether the caller may retry.
    pub retryable: bool,
    /// Curated, safe-to-display message.
    pub user_message: String,
    /// Fresh correlation id for support/debugging (`err-…`).
    pub debug_id: String,
}

/// Ordered mapping from [`ErrorKind`]s to [`TaxonomyEntry`]s.
///
/// `normalize_error` picks the first entry whose kind matches, falling back
/// to an `unknown_error`/critical/non-retryable entry, and attaches a fresh
/// debug id.
#[derive(Debug, Clone)]
pub struct ErrorTaxonomy {
    entries: Vec<(ErrorKind, TaxonomyEntry)>,
}

impl ErrorTaxonomy {
    /// Build a taxonomy from an ordered mapping.
    #[must_use]
    pub fn new(entries: Vec<(ErrorKind, TaxonomyEntry)>) -> Self {
        Self { entries }
    }

    /// The default mapping covering every canonical kind.
    #[must_use]
    pub fn with_defaults() -> Self {
        fn entry(kind: ErrorKind, severity: Severity, user_message: &str) -> (ErrorKind, TaxonomyEntry) {
            (
                kind,
                TaxonomyEntry {
                    canonical_code: kind.as_str().to_string(),
                    severity,
                    retryable: false,
                    user_message: user_message.to_string(),
                },
            )
        }
        Self::new(vec![
            entry(
                ErrorKind::ActorUnavailable,
                Severity::High,
                "The caller's identity could not be resolved.",
            ),
            entry(
                ErrorKind::PolicyUnavailable,
                Severity::High,
                "No valid policy is available for this action.",
            ),
            entry(
                ErrorKind::RedactionBlocked,
                Severity::High,
                "The response could not be redacted safely.",
            ),
            entry(
                ErrorKind::VersionMismatch,
                Severity::High,
                "The requested API version is not supported.",
            ),
            entry(
                ErrorKind::BudgetExceeded,
                Severity::High,
                "The action's budget has been exhausted.",
            ),
            entry(
                ErrorKind::ReceiptSchema,
                Severity::Critical,
                "The action receipt could not be recorded.",
            ),
            entry(
                ErrorKind::BootstrapTimeout,
                Severity::Critical,
                "The runtime could not reach its dependencies in time.",
            ),
        ])
    }

    /// Normalize any [`CccsError`] into a [`CanonicalError`].
    #[must_use]
    pub fn normalize_error(&self, error: &CccsError) -> CanonicalError {
        let entry = self.resolve_entry(error.kind());
        CanonicalError {
            canonical_code: entry.canonical_code.clone(),
            severity: entry.severity,
            retryable: entry.retryable,
            user_message: entry.user_message.clone(),
            debug_id: format!("err-{}", &Uuid::new_v4().simple().to_string()[..12]),
        }
    }

    fn resolve_entry(&self, kind: ErrorKind) -> TaxonomyEntry {
        self.entries
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, e)| e.clone())
            .unwrap_or_else(|| TaxonomyEntry {
                canonical_code: "unknown_error".to_string(),
                severity: Severity::Critical,
                retryable: false,
                user_message: "An unknown error occurred.".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    const ALL_KINDS: &[ErrorKind] = &[
        ErrorKind::ActorUnavailable,
        ErrorKind::PolicyUnavailable,
        ErrorKind::RedactionBlocked,
        ErrorKind::VersionMismatch,
        ErrorKind::BudgetExceeded,
        ErrorKind::ReceiptSchema,
        ErrorKind::BootstrapTimeout,
        ErrorKind::Unknown,
    ];

    #[test]
    fn display_includes_code_and_message() {
        let err = CccsError::new(ErrorKind::BudgetExceeded, "cost 5 > remaining 1");
        assert_eq!(err.to_string(), "[budget_exceeded] cost 5 > remaining 1");
    }

    #[test]
    fn source_chain_is_preserved() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = CccsError::new(ErrorKind::Unknown, "wrapped").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "not found");
    }

    #[test]
    fn all_kinds_have_unique_codes() {
        let mut seen = HashSet::new();
        for kind in ALL_KINDS {
            assert!(seen.insert(kind.as_str()), "duplicate code {}", kind);
        }
        assert_eq!(seen.len(), ALL_KINDS.len());
    }

    #[test]
    fn kind_serde_matches_as_str() {
        for kind in ALL_KINDS {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: ErrorKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, *kind);
        }
    }

    #[test]
    fn normalize_uses_first_matching_entry() {
        let taxonomy = ErrorTaxonomy::new(vec![
            (
                ErrorKind::BudgetExceeded,
                TaxonomyEntry {
                    canonical_code: "budget_exceeded".into(),
                    severity: Severity::High,
                    retryable: false,
                    user_message: "first".into(),
                },
            ),
            (
                ErrorKind::BudgetExceeded,
                TaxonomyEntry {
                    canonical_code: "budget_exceeded".into(),
                    severity: Severity::Info,
                    retryable: true,
                    user_message: "second".into(),
                },
            ),
        ]);
        let err = CccsError::new(ErrorKind::BudgetExceeded, "boom");
        let canonical = taxonomy.normalize_error(&err);
        assert_eq!(canonical.user_message, "first");
        assert_eq!(canonical.severity, Severity::High);
    }

    #[test]
    fn normalize_falls_back_to_unknown() {
        let taxonomy = ErrorTaxonomy::new(vec![]);
        let err = CccsError::new(ErrorKind::PolicyUnavailable, "missing");
        let canonical = taxonomy.normalize_error(&err);
        assert_eq!(canonical.canonical_code, "unknown_error");
        assert_eq!(canonical.severity, Severity::Critical);
        assert!(!canonical.retryable);
        assert_eq!(canonical.user_message, "An unknown error occurred.");
    }

    #[test]
    fn debug_ids_are_fresh_per_normalization() {
        let taxonomy = ErrorTaxonomy::with_defaults();
        let err = CccsError::new(ErrorKind::ActorUnavailable, "x");
        let a = taxonomy.normalize_error(&err);
        let b = taxonomy.normalize_error(&err);
        assert!(a.debug_id.starts_with("err-"));
        assert_eq!(a.debug_id.len(), "err-".len() + 12);
        assert_ne!(a.debug_id, b.debug_id);
    }

    #[test]
    fn default_taxonomy_covers_spec_table() {
        let taxonomy = ErrorTaxonomy::with_defaults();
        let receipt = taxonomy.normalize_error(&CccsError::new(ErrorKind::ReceiptSchema, "x"));
        assert_eq!(receipt.canonical_code, "receipt_schema_error");
        assert_eq!(receipt.severity, Severity::Critical);
        let actor = taxonomy.normalize_error(&CccsError::new(ErrorKind::ActorUnavailable, "x"));
        assert_eq!(actor.severity, Severity::High);
        assert!(!actor.retryable);
    }
}
