//! Request validation: the gate in front of every behavior chain.
//!
//! Validators are cheap, synchronous rules over the request value alone.
//! Anything that needs I/O (uniqueness, existence) is a business rule and
//! belongs in the handler, where it can fail as `Conflict` or `NotFound`.
//!
//! All registered validators run, every failed rule is collected, and the
//! result is a single `Validation` error whose children carry the
//! individual field errors. Partial feedback ("fix the name, then we'll
//! tell you about the email") never happens.

use std::sync::Arc;

use crate::error::{codes, ErrorInfo, FieldError};
use crate::handler::Next;
use crate::outcome::Outcome;
use crate::request::Request;

/// One validation rule set for a request type.
///
/// Implement it on a struct, or use any `Fn(&R) -> Vec<FieldError>`
/// closure via the blanket impl:
///
/// ```ignore
/// pipeline.register_validator::<CreateTenant>(|req: &CreateTenant| {
///     let mut errors = Vec::new();
///     if req.name.trim().is_empty() {
///         errors.push(FieldError::new("name", "must not be empty"));
///     }
///     errors
/// });
/// ```
pub trait Validate<R>: Send + Sync {
    /// Return every violated rule; empty means the request passes.
    fn validate(&self, request: &R) -> Vec<FieldError>;
}

impl<R, F> Validate<R> for F
where
    F: Fn(&R) -> Vec<FieldError> + Send + Sync,
{
    fn validate(&self, request: &R) -> Vec<FieldError> {
        self(request)
    }
}

/// Runs every validator for the request type before anything else.
///
/// On failure the rest of the chain never runs: no span, no transaction,
/// no idempotency claim.
pub struct ValidationBehavior<R> {
    validators: Vec<Arc<dyn Validate<R>>>,
}

impl<R: Request> ValidationBehavior<R> {
    /// Build from the validators registered for `R`, in registration order.
    pub fn new(validators: Vec<Arc<dyn Validate<R>>>) -> Self {
        Self { validators }
    }

    /// Validate, then either short-circuit with the aggregate failure or
    /// continue inward.
    pub async fn handle<T>(&self, request: &R, next: Next<'_, T>) -> Outcome<T> {
        let mut rule_errors: Vec<FieldError> = Vec::new();
        for validator in &self.validators {
            rule_errors.extend(validator.validate(request));
        }

        if !rule_errors.is_empty() {
            let children: Vec<ErrorInfo> =
                rule_errors.into_iter().map(ErrorInfo::from).collect();
            return Outcome::failure(
                ErrorInfo::validation(codes::VALIDATION, "request validation failed")
                    .with_children(children),
            );
        }

        next.run().await
    }
}
