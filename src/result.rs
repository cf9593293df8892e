//! Outcome of one policy execution.
//!
//! A [`PolicyResult`] is built by the executing policy and handed back by value once the call
//! completes. It separates errors raised by the delegate itself ([`errors`](PolicyResult::errors))
//! from failures of the surrounding machinery
//! ([`catch_block_errors`](PolicyResult::catch_block_errors)).
//!
//! Flag semantics:
//! - `is_failed`: the call did not produce an acceptable outcome.
//! - `is_canceled`: cancellation was observed; always implies `is_failed`.
//! - `is_success`: neither failed nor canceled, even if errors were handled on the way.
//! - `no_error`: the delegate never failed.
//! - `error_filter_unsatisfied`: the filter rejected an error and the policy stopped early.

use crate::error::{CatchBlockError, FailedReason, NoDelegateError, PolicyError};
use crate::policy::PolicyKind;
use std::sync::Arc;

/// Outcome of a wrapped child policy, recorded by its parent once per delegation.
#[derive(Debug, Clone)]
pub struct WrappedPolicyResult {
    kind: PolicyKind,
    result: PolicyResult<()>,
}

impl WrappedPolicyResult {
    /// Kind of the child policy.
    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    /// Name of the child policy.
    pub fn policy_name(&self) -> &str {
        self.result.policy_name()
    }

    /// The child's outcome; its value was handed to the parent.
    pub fn result(&self) -> &PolicyResult<()> {
        &self.result
    }
}

/// Structured outcome of a policy call producing `T` (`()` for calls without a value).
#[derive(Debug, Clone)]
pub struct PolicyResult<T> {
    policy_name: String,
    value: Option<T>,
    errors: Vec<PolicyError>,
    catch_block_errors: Vec<CatchBlockError>,
    wrapped_policy_results: Vec<WrappedPolicyResult>,
    failed_reason: FailedReason,
    unprocessed_error: Option<PolicyError>,
    critical_error: Option<PolicyError>,
    failed_handler_index: Option<usize>,
    is_failed: bool,
    is_canceled: bool,
    error_filter_unsatisfied: bool,
    errors_not_used: bool,
}

impl<T> PolicyResult<T> {
    pub(crate) fn new(policy_name: impl Into<String>) -> Self {
        Self {
            policy_name: policy_name.into(),
            value: None,
            errors: Vec::new(),
            catch_block_errors: Vec::new(),
            wrapped_policy_results: Vec::new(),
            failed_reason: FailedReason::None,
            unprocessed_error: None,
            critical_error: None,
            failed_handler_index: None,
            is_failed: false,
            is_canceled: false,
            error_filter_unsatisfied: false,
            errors_not_used: false,
        }
    }

    /// Result for a call made without a delegate.
    pub(crate) fn delegate_missing(policy_name: impl Into<String>) -> Self {
        let mut result = Self::new(policy_name);
        result.errors.push(Arc::new(NoDelegateError));
        result.is_failed = true;
        result.failed_reason = FailedReason::DelegateIsNull;
        result
    }

    /// Name of the policy that produced this result.
    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    /// The produced value; `None` when the call failed or produced nothing.
    pub fn result(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Take the produced value.
    pub fn into_result(self) -> Option<T> {
        self.value
    }

    /// Errors raised by the delegate, in occurrence order.
    pub fn errors(&self) -> &[PolicyError] {
        &self.errors
    }

    /// Most recent delegate error.
    pub fn last_error(&self) -> Option<&PolicyError> {
        self.errors.last()
    }

    /// Failures of processors, savers, fallbacks and result handlers.
    pub fn catch_block_errors(&self) -> &[CatchBlockError] {
        &self.catch_block_errors
    }

    /// Outcomes of wrapped child policies, one per delegation.
    pub fn wrapped_policy_results(&self) -> &[WrappedPolicyResult] {
        &self.wrapped_policy_results
    }

    /// Why the result failed beyond its primary errors.
    pub fn failed_reason(&self) -> FailedReason {
        self.failed_reason
    }

    /// The error that escaped handling and caused the failure.
    pub fn unprocessed_error(&self) -> Option<&PolicyError> {
        self.unprocessed_error.as_ref()
    }

    /// Set when the escaping failure crossed a sync/async bridge; a
    /// [`BridgeError`](crate::BridgeError) wrapping the underlying error.
    pub fn critical_error(&self) -> Option<&PolicyError> {
        self.critical_error.as_ref()
    }

    /// Position of the result handler that failed the result, among the handlers that ran.
    pub fn failed_handler_index(&self) -> Option<usize> {
        self.failed_handler_index
    }

    /// Whether the call failed.
    pub fn is_failed(&self) -> bool {
        self.is_failed
    }

    /// Whether cancellation was observed.
    pub fn is_canceled(&self) -> bool {
        self.is_canceled
    }

    /// Neither failed nor canceled.
    pub fn is_success(&self) -> bool {
        !self.is_failed && !self.is_canceled
    }

    /// The delegate never failed.
    pub fn no_error(&self) -> bool {
        self.errors.is_empty()
    }

    /// The filter rejected an error.
    pub fn error_filter_unsatisfied(&self) -> bool {
        self.error_filter_unsatisfied
    }

    /// A custom error saver replaced the default bookkeeping, so `errors` may be incomplete.
    pub fn errors_not_used(&self) -> bool {
        self.errors_not_used
    }

    pub(crate) fn set_value(&mut self, value: Option<T>) {
        self.value = value;
    }

    pub(crate) fn add_error(&mut self, error: PolicyError) {
        self.errors.push(error);
    }

    pub(crate) fn add_catch_block_error(&mut self, error: CatchBlockError) {
        self.catch_block_errors.push(error);
    }

    pub(crate) fn add_wrapped_result(&mut self, wrapped: WrappedPolicyResult) {
        self.wrapped_policy_results.push(wrapped);
    }

    pub(crate) fn set_failed(&mut self) {
        self.is_failed = true;
    }

    pub(crate) fn set_ok(&mut self) {
        self.is_failed = false;
    }

    pub(crate) fn set_canceled(&mut self) {
        self.is_canceled = true;
        self.is_failed = true;
    }

    pub(crate) fn set_filter_unsatisfied(&mut self) {
        self.error_filter_unsatisfied = true;
        self.is_failed = true;
    }

    pub(crate) fn set_errors_not_used(&mut self) {
        self.errors_not_used = true;
    }

    pub(crate) fn set_failed_reason(&mut self, reason: FailedReason) {
        self.failed_reason = reason;
    }

    pub(crate) fn set_unprocessed_error(&mut self, error: PolicyError) {
        self.unprocessed_error = Some(error);
    }

    pub(crate) fn set_critical_error(&mut self, error: PolicyError) {
        self.critical_error = Some(error);
    }

    /// A result handler flagged or broke the result; the first such handler is remembered.
    pub(crate) fn set_handler_failed(&mut self, index: usize) {
        self.is_failed = true;
        if self.failed_reason == FailedReason::None {
            self.failed_reason = FailedReason::PolicyResultHandlerFailed;
        }
        self.failed_handler_index.get_or_insert(index);
    }

    /// Split off the value, keeping the rest as a wrapped-child record.
    pub(crate) fn into_wrapped(self, kind: PolicyKind) -> (Option<T>, WrappedPolicyResult) {
        let PolicyResult {
            policy_name,
            value,
            errors,
            catch_block_errors,
            wrapped_policy_results,
            failed_reason,
            unprocessed_error,
            critical_error,
            failed_handler_index,
            is_failed,
            is_canceled,
            error_filter_unsatisfied,
            errors_not_used,
        } = self;
        let result = PolicyResult {
            policy_name,
            value: None,
            errors,
            catch_block_errors,
            wrapped_policy_results,
            failed_reason,
            unprocessed_error,
            critical_error,
            failed_handler_index,
            is_failed,
            is_canceled,
            error_filter_unsatisfied,
            errors_not_used,
        };
        (value, WrappedPolicyResult { kind, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::into_policy_error;

    #[test]
    fn fresh_result_is_success_without_errors() {
        let result: PolicyResult<u8> = PolicyResult::new("p");
        assert!(result.is_success());
        assert!(result.no_error());
        assert!(!result.is_failed());
        assert_eq!(result.failed_reason(), FailedReason::None);
        assert_eq!(result.result(), None);
        assert_eq!(result.policy_name(), "p");
    }

    #[test]
    fn canceled_implies_failed() {
        let mut result: PolicyResult<()> = PolicyResult::new("p");
        result.set_canceled();
        assert!(result.is_canceled());
        assert!(result.is_failed());
        assert!(!result.is_success());
    }

    #[test]
    fn filter_unsatisfied_implies_failed() {
        let mut result: PolicyResult<()> = PolicyResult::new("p");
        result.set_filter_unsatisfied();
        assert!(result.error_filter_unsatisfied());
        assert!(result.is_failed());
    }

    #[test]
    fn handled_errors_do_not_imply_failure() {
        let mut result = PolicyResult::new("p");
        result.add_error(into_policy_error("first"));
        result.set_value(Some(5));
        assert!(!result.no_error());
        assert!(result.is_success());
        assert_eq!(result.result(), Some(&5));
        assert_eq!(result.last_error().map(|e| e.to_string()), Some("first".to_string()));
    }

    #[test]
    fn missing_delegate_is_marked() {
        let result: PolicyResult<i32> = PolicyResult::delegate_missing("p");
        assert!(result.is_failed());
        assert_eq!(result.failed_reason(), FailedReason::DelegateIsNull);
        assert_eq!(result.errors().len(), 1);
        assert!(result.errors()[0].as_ref().is::<NoDelegateError>());
    }

    #[test]
    fn first_failing_handler_is_remembered() {
        let mut result: PolicyResult<()> = PolicyResult::new("p");
        result.set_handler_failed(2);
        result.set_handler_failed(4);
        assert_eq!(result.failed_handler_index(), Some(2));
        assert_eq!(result.failed_reason(), FailedReason::PolicyResultHandlerFailed);
        assert!(result.unprocessed_error().is_none());
    }

    #[test]
    fn handler_failure_keeps_an_earlier_reason() {
        let mut result: PolicyResult<()> = PolicyResult::new("p");
        result.set_failed_reason(FailedReason::PolicyProcessorFailed);
        result.set_handler_failed(0);
        assert_eq!(result.failed_reason(), FailedReason::PolicyProcessorFailed);
    }

    #[test]
    fn into_wrapped_moves_the_value_out() {
        let mut result = PolicyResult::new("child");
        result.add_error(into_policy_error("e"));
        result.set_value(Some("v".to_string()));
        let (value, wrapped) = result.into_wrapped(PolicyKind::Retry);
        assert_eq!(value.as_deref(), Some("v"));
        assert_eq!(wrapped.kind(), PolicyKind::Retry);
        assert_eq!(wrapped.policy_name(), "child");
        assert_eq!(wrapped.result().errors().len(), 1);
        assert_eq!(wrapped.result().result(), None);
    }
}
