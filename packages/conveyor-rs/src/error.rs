//! Structured error model for pipeline results, plus the library error enum.
//!
//! `ErrorInfo` is the unit of failure inside an [`Outcome`](crate::Outcome):
//! a category, a stable code, a human message, and optional structured detail
//! and children. `PipelineError` is different in kind - it reports misuse of
//! the pipeline itself (unregistered handlers, double registration), never a
//! business failure.
//!
//! # The Failure Channel Rule
//!
//! > **Expected failures travel as `Outcome::Failure`, never as panics or
//! > `Err` values.**
//!
//! - `ErrorInfo` is the only externalized failure shape (structured, stable)
//! - `PipelineError` surfaces programming errors at the dispatch boundary
//! - panics are contained at the route boundary and become `Exception` errors
//!
//! # Matching on Codes
//!
//! `code` + `category` are stable and machine-matchable; `message` is not.
//!
//! ```ignore
//! use conveyor::{codes, ErrorCategory};
//!
//! match outcome.errors().first() {
//!     Some(e) if e.code == codes::IDEMPOTENCY_IN_PROGRESS => retry_later(),
//!     Some(e) if e.category == ErrorCategory::NotFound => respond_404(),
//!     _ => respond_500(),
//! }
//! ```

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Category
// =============================================================================

/// Coarse failure classification carried by every [`ErrorInfo`].
///
/// Categories are the contract the outer layers map onto transport concerns
/// (HTTP status classes, retry policies). They never change meaning:
///
/// - `Validation`: aggregate of field-level input errors
/// - `Conflict`: business-rule collision (duplicate name, lost idempotency race)
/// - `NotFound`: the referenced resource does not exist
/// - `General`: a handler-reported business failure
/// - `Exception`: an unexpected fault converted to structure at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Input validation failed - details are safe to expose.
    Validation,
    /// A business rule collided with existing state.
    Conflict,
    /// Resource not found.
    NotFound,
    /// Handler-reported business failure.
    General,
    /// Unexpected fault (panic, store outage) captured at the boundary.
    Exception,
}

impl ErrorCategory {
    /// Stable lowercase name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::General => "general",
            ErrorCategory::Exception => "exception",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Stable Codes
// =============================================================================

/// Stable error codes emitted by the pipeline itself.
///
/// Domain handlers define their own codes (`tenant.duplicate_name` and so on);
/// these are the ones the behaviors emit.
pub mod codes {
    /// Aggregate validation failure wrapping per-rule children.
    pub const VALIDATION: &str = "request.validation";
    /// One failed validation rule; `detail.field` names the field.
    pub const VALIDATION_RULE: &str = "validation.rule";
    /// The request's cancellation token fired before completion.
    pub const CANCELLED: &str = "request.cancelled";
    /// The handler or a behavior panicked; contained at the route boundary.
    pub const PANICKED: &str = "request.panicked";
    /// Another submission holds the in-progress claim for this request id.
    pub const IDEMPOTENCY_IN_PROGRESS: &str = "idempotency.in_progress";
    /// The idempotency store failed at the transport level.
    pub const IDEMPOTENCY_STORE_ERROR: &str = "idempotency.store_error";
    /// A stored result exists but no longer deserializes.
    pub const IDEMPOTENCY_DECODE_ERROR: &str = "idempotency.decode_error";
    /// The unit of work could not open a transaction.
    pub const TRANSACTION_BEGIN_FAILED: &str = "transaction.begin_failed";
    /// Persisting or committing the unit of work failed; it was rolled back.
    pub const TRANSACTION_COMMIT_FAILED: &str = "transaction.commit_failed";
}

// =============================================================================
// ErrorInfo
// =============================================================================

/// One structured error inside a failed [`Outcome`](crate::Outcome).
///
/// # Stability
///
/// `category` and `code` together are the machine-matchable identity of an
/// error. `message` is for humans and may be reworded freely. `detail` holds
/// structured context (an attempted value, an entity id); `children` carry
/// the individual errors behind an aggregate (validation failures).
///
/// # Example
///
/// ```ignore
/// use conveyor::ErrorInfo;
///
/// let err = ErrorInfo::conflict("tenant.duplicate_name", "tenant name already in use")
///     .with_detail(serde_json::json!({ "name": "Acme" }));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Coarse classification.
    pub category: ErrorCategory,
    /// Stable machine-matchable code.
    pub code: String,
    /// Human-readable message. Not stable.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    /// Child errors for aggregate failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ErrorInfo>,
}

impl ErrorInfo {
    /// Create an error with an explicit category.
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            detail: None,
            children: Vec::new(),
        }
    }

    /// A `Validation` error.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, code, message)
    }

    /// A `Conflict` error.
    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conflict, code, message)
    }

    /// A `NotFound` error.
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, code, message)
    }

    /// A `General` (business) error.
    pub fn general(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::General, code, message)
    }

    /// An `Exception` error for faults captured at the boundary.
    pub fn exception(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Exception, code, message)
    }

    /// Attach a structured payload.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Attach child errors (aggregate failures).
    pub fn with_children(mut self, children: Vec<ErrorInfo>) -> Self {
        self.children = children;
        self
    }

    /// One-line `category/code: message` rendering for logs and span tags.
    pub fn summary(&self) -> String {
        format!("{}/{}: {}", self.category, self.code, self.message)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.category, self.code, self.message)
    }
}

// =============================================================================
// FieldError
// =============================================================================

/// A single field-level validation failure produced by a validator.
///
/// Validators return these; the validation behavior folds them into one
/// aggregate `ErrorInfo` whose children carry the field name in `detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// The offending field, dotted for nesting (`address.zip`).
    pub field: String,
    /// What rule was violated.
    pub message: String,
}

impl FieldError {
    /// Create a field error.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl From<FieldError> for ErrorInfo {
    fn from(error: FieldError) -> Self {
        ErrorInfo::validation(codes::VALIDATION_RULE, error.message)
            .with_detail(serde_json::json!({ "field": error.field }))
    }
}

// =============================================================================
// Pipeline Error
// =============================================================================

/// Structured error type for pipeline registration and dispatch.
///
/// These are programming errors at the composition root, not business
/// failures: pattern-match on them in tests and wiring code.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A handler is already registered for this request type.
    #[error("handler already registered for request type {type_name}")]
    HandlerAlreadyRegistered {
        /// Human-readable request type name.
        type_name: &'static str,
    },

    /// No handler is registered for the given request type.
    #[error("no handler registered for request type {type_name}")]
    HandlerNotFound {
        /// Human-readable request type name.
        type_name: &'static str,
    },

    /// A route produced a value of the wrong output type (internal error).
    #[error("handler for request type {type_name} produced a mismatched output")]
    OutputMismatch {
        /// Human-readable request type name.
        type_name: &'static str,
    },
}

// =============================================================================
// Panic payloads
// =============================================================================

/// Best-effort human rendering of a panic payload.
pub(crate) fn panic_summary(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // ErrorCategory Tests
    // =========================================================================

    #[test]
    fn test_category_as_str_matches_serde() {
        let json = serde_json::to_string(&ErrorCategory::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
        assert_eq!(ErrorCategory::NotFound.as_str(), "not_found");
        assert_eq!(ErrorCategory::NotFound.to_string(), "not_found");
    }

    #[test]
    fn test_category_round_trips() {
        for category in [
            ErrorCategory::Validation,
            ErrorCategory::Conflict,
            ErrorCategory::NotFound,
            ErrorCategory::General,
            ErrorCategory::Exception,
        ] {
            let json = serde_json::to_string(&category).unwrap();
            let back: ErrorCategory = serde_json::from_str(&json).unwrap();
            assert_eq!(back, category);
        }
    }

    // =========================================================================
    // ErrorInfo Tests
    // =========================================================================

    #[test]
    fn test_constructors_set_category() {
        assert_eq!(
            ErrorInfo::validation("c", "m").category,
            ErrorCategory::Validation
        );
        assert_eq!(
            ErrorInfo::conflict("c", "m").category,
            ErrorCategory::Conflict
        );
        assert_eq!(
            ErrorInfo::not_found("c", "m").category,
            ErrorCategory::NotFound
        );
        assert_eq!(ErrorInfo::general("c", "m").category, ErrorCategory::General);
        assert_eq!(
            ErrorInfo::exception("c", "m").category,
            ErrorCategory::Exception
        );
    }

    #[test]
    fn test_summary_format() {
        let err = ErrorInfo::conflict("tenant.duplicate_name", "name already in use");
        assert_eq!(
            err.summary(),
            "conflict/tenant.duplicate_name: name already in use"
        );
        assert_eq!(err.to_string(), err.summary());
    }

    #[test]
    fn test_detail_and_children_survive_serde() {
        let err = ErrorInfo::validation(codes::VALIDATION, "request validation failed")
            .with_children(vec![
                FieldError::new("name", "must not be empty").into(),
                FieldError::new("email", "must be a valid address").into(),
            ]);

        let json = serde_json::to_value(&err).unwrap();
        let back: ErrorInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
        assert_eq!(back.children.len(), 2);
        assert_eq!(
            back.children[0].detail,
            Some(serde_json::json!({ "field": "name" }))
        );
    }

    #[test]
    fn test_detail_omitted_when_absent() {
        let json = serde_json::to_value(ErrorInfo::general("g", "m")).unwrap();
        assert!(json.get("detail").is_none());
        assert!(json.get("children").is_none());
    }

    // =========================================================================
    // FieldError Tests
    // =========================================================================

    #[test]
    fn test_field_error_into_error_info() {
        let info: ErrorInfo = FieldError::new("user_name", "too short").into();
        assert_eq!(info.category, ErrorCategory::Validation);
        assert_eq!(info.code, codes::VALIDATION_RULE);
        assert_eq!(info.message, "too short");
        assert_eq!(info.detail, Some(serde_json::json!({ "field": "user_name" })));
    }

    // =========================================================================
    // PipelineError Tests
    // =========================================================================

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::HandlerNotFound {
            type_name: "CreateTenant",
        };
        assert!(err.to_string().contains("no handler registered"));
        assert!(err.to_string().contains("CreateTenant"));
    }

    #[test]
    fn test_pipeline_error_is_pattern_matchable() {
        let err = PipelineError::HandlerAlreadyRegistered {
            type_name: "CreateTenant",
        };
        match &err {
            PipelineError::HandlerAlreadyRegistered { type_name } => {
                assert_eq!(*type_name, "CreateTenant");
            }
            _ => panic!("expected HandlerAlreadyRegistered"),
        }
    }

    // =========================================================================
    // Panic Summary Tests
    // =========================================================================

    #[test]
    fn test_panic_summary_str_and_string() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_summary(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_summary(payload.as_ref()), "kaboom");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_summary(payload.as_ref()), "panic with non-string payload");
    }
}
