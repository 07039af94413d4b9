//! The result algebra every handler and behavior speaks.
//!
//! An [`Outcome`] is either `Success` (a value plus an optional operator
//! message) or `Failure` (a non-empty [`ErrorList`]). There is no third
//! state: cancellations, store outages, and panics are all converted into
//! structured failures before they leave the pipeline.
//!
//! # Key Invariants
//!
//! 1. **A failure always explains itself**: `ErrorList` cannot be empty, by
//!    construction and by deserialization.
//! 2. **The first error is the primary one**: behaviors that need a single
//!    representative error (span tags, HTTP mapping) use [`ErrorList::primary`].
//! 3. **Success is never synthesized**: only handlers and verbatim idempotent
//!    replay produce `Success` values.
//!
//! # Example
//!
//! ```ignore
//! use conveyor::{ErrorInfo, Outcome};
//!
//! fn half(n: u32) -> Outcome<u32> {
//!     if n % 2 == 0 {
//!         Outcome::success(n / 2)
//!     } else {
//!         Outcome::failure(ErrorInfo::general("math.odd", "cannot halve an odd number"))
//!     }
//! }
//!
//! assert!(half(4).is_success());
//! assert_eq!(half(3).errors()[0].code, "math.odd");
//! ```

use std::ops::Deref;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ErrorInfo;

// =============================================================================
// ErrorList
// =============================================================================

/// A non-empty list of [`ErrorInfo`] values.
///
/// The non-emptiness is enforced everywhere a list can come into existence:
/// [`ErrorList::new`] panics on an empty vector (a programming error at the
/// call site), and deserialization rejects an empty array (bad data at the
/// boundary). Dereferences to `[ErrorInfo]` for iteration and indexing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ErrorList(Vec<ErrorInfo>);

impl ErrorList {
    /// Wrap a list of errors.
    ///
    /// # Panics
    ///
    /// Panics if `errors` is empty. A failure with nothing to say is a bug
    /// in the caller, not a representable state.
    pub fn new(errors: Vec<ErrorInfo>) -> Self {
        assert!(
            !errors.is_empty(),
            "an ErrorList must contain at least one error"
        );
        ErrorList(errors)
    }

    /// Wrap a single error.
    pub fn single(error: ErrorInfo) -> Self {
        ErrorList(vec![error])
    }

    /// The first (primary) error. Always present.
    pub fn primary(&self) -> &ErrorInfo {
        &self.0[0]
    }

    /// Consume the list, yielding the underlying vector (never empty).
    pub fn into_vec(self) -> Vec<ErrorInfo> {
        self.0
    }
}

impl Deref for ErrorList {
    type Target = [ErrorInfo];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<ErrorInfo> for ErrorList {
    fn from(error: ErrorInfo) -> Self {
        ErrorList::single(error)
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a ErrorInfo;
    type IntoIter = std::slice::Iter<'a, ErrorInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// Manual impl so an empty array is rejected at the boundary, not later.
impl<'de> Deserialize<'de> for ErrorList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let errors = Vec::<ErrorInfo>::deserialize(deserializer)?;
        if errors.is_empty() {
            return Err(serde::de::Error::custom(
                "an error list must contain at least one error",
            ));
        }
        Ok(ErrorList(errors))
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// The two-state result of a dispatched request.
///
/// Handlers return this, behaviors pass it along (or replace it with their
/// own failure), and the pipeline hands it back to the caller. `Success`
/// carries the typed value and an optional human message ("tenant restored
/// from soft delete"). `Failure` carries a non-empty [`ErrorList`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T> {
    /// The request succeeded.
    Success {
        /// The handler's typed result.
        value: T,
        /// Optional human-facing note about how success was reached.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The request failed with at least one structured error.
    Failure(ErrorList),
}

impl<T> Outcome<T> {
    /// A plain success.
    pub fn success(value: T) -> Self {
        Outcome::Success {
            value,
            message: None,
        }
    }

    /// A success with a human-facing note.
    pub fn success_with_message(value: T, message: impl Into<String>) -> Self {
        Outcome::Success {
            value,
            message: Some(message.into()),
        }
    }

    /// A failure from a single error.
    pub fn failure(error: impl Into<ErrorInfo>) -> Self {
        Outcome::Failure(ErrorList::single(error.into()))
    }

    /// A failure from a list of errors.
    ///
    /// # Panics
    ///
    /// Panics if `errors` is empty (see [`ErrorList::new`]).
    pub fn failures(errors: Vec<ErrorInfo>) -> Self {
        Outcome::Failure(ErrorList::new(errors))
    }

    /// True when this outcome is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// True when this outcome is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// The success value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success { value, .. } => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// Consume the outcome, yielding the success value if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Success { value, .. } => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// The success message, if one was attached.
    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Success { message, .. } => message.as_deref(),
            Outcome::Failure(_) => None,
        }
    }

    /// The errors behind a failure; empty for successes.
    pub fn errors(&self) -> &[ErrorInfo] {
        match self {
            Outcome::Success { .. } => &[],
            Outcome::Failure(errors) => errors,
        }
    }

    /// Consume the outcome, yielding the error list if it failed.
    pub fn into_errors(self) -> Option<ErrorList> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure(errors) => Some(errors),
        }
    }

    /// Map the success value, preserving the message and any failure as-is.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success { value, message } => Outcome::Success {
                value: f(value),
                message,
            },
            Outcome::Failure(errors) => Outcome::Failure(errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{codes, ErrorCategory};

    // =========================================================================
    // ErrorList Tests
    // =========================================================================

    #[test]
    #[should_panic(expected = "at least one error")]
    fn test_error_list_rejects_empty_vec() {
        let _ = ErrorList::new(Vec::new());
    }

    #[test]
    fn test_error_list_deserialize_rejects_empty_array() {
        let result = serde_json::from_str::<ErrorList>("[]");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("at least one error"));
    }

    #[test]
    fn test_primary_is_first() {
        let errors = ErrorList::new(vec![
            ErrorInfo::not_found("tenant.not_found", "no such tenant"),
            ErrorInfo::general("other", "secondary"),
        ]);
        assert_eq!(errors.primary().code, "tenant.not_found");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_error_list_iterates() {
        let errors = ErrorList::single(ErrorInfo::general("only", "one"));
        let codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["only"]);
    }

    // =========================================================================
    // Outcome Tests
    // =========================================================================

    #[test]
    fn test_success_basics() {
        let outcome = Outcome::success(7_u32);
        assert!(outcome.is_success());
        assert!(!outcome.is_failure());
        assert_eq!(outcome.value(), Some(&7));
        assert_eq!(outcome.message(), None);
        assert!(outcome.errors().is_empty());
    }

    #[test]
    fn test_success_with_message() {
        let outcome = Outcome::success_with_message(7_u32, "restored from soft delete");
        assert_eq!(outcome.message(), Some("restored from soft delete"));
        assert_eq!(outcome.into_value(), Some(7));
    }

    #[test]
    fn test_failure_basics() {
        let outcome: Outcome<u32> =
            Outcome::failure(ErrorInfo::conflict("tenant.duplicate_name", "taken"));
        assert!(outcome.is_failure());
        assert_eq!(outcome.value(), None);
        assert_eq!(outcome.errors()[0].category, ErrorCategory::Conflict);
        let errors = outcome.into_errors().unwrap();
        assert_eq!(errors.primary().code, "tenant.duplicate_name");
    }

    #[test]
    #[should_panic(expected = "at least one error")]
    fn test_failures_rejects_empty_vec() {
        let _: Outcome<u32> = Outcome::failures(Vec::new());
    }

    #[test]
    fn test_map_preserves_message_and_failure() {
        let doubled = Outcome::success_with_message(3_u32, "note").map(|n| n * 2);
        assert_eq!(doubled.value(), Some(&6));
        assert_eq!(doubled.message(), Some("note"));

        let failed: Outcome<u32> =
            Outcome::failure(ErrorInfo::general(codes::CANCELLED, "cancelled"));
        let mapped: Outcome<String> = failed.map(|n| n.to_string());
        assert!(mapped.is_failure());
        assert_eq!(mapped.errors()[0].code, codes::CANCELLED);
    }

    #[test]
    fn test_serde_round_trip() {
        let success = Outcome::success_with_message(41_u32, "close enough");
        let json = serde_json::to_value(&success).unwrap();
        let back: Outcome<u32> = serde_json::from_value(json).unwrap();
        assert_eq!(back, success);

        let failure: Outcome<u32> =
            Outcome::failure(ErrorInfo::not_found("tenant.not_found", "no such tenant"));
        let json = serde_json::to_value(&failure).unwrap();
        let back: Outcome<u32> = serde_json::from_value(json).unwrap();
        assert_eq!(back, failure);
    }

    #[test]
    fn test_failure_deserialize_rejects_empty_errors() {
        let result = serde_json::from_str::<Outcome<u32>>(r#"{"failure":[]}"#);
        assert!(result.is_err());
    }
}
