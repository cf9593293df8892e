//! Include/exclude predicates deciding which errors a policy handles.
//!
//! Semantics:
//! - An empty include list admits every error before exclusion is considered.
//! - A matching exclude predicate rejects the error regardless of inclusion.
//! - Predicates are evaluated in registration order; the first matching exclusion wins.
//!
//! [`ErrorFilter`] is the compiled predicate set a policy owns. [`CatchBlockFilter`] is the
//! user-facing builder that can be prepared up front and merged into any policy.
//!
//! ```rust
//! use catchpoint::CatchBlockFilter;
//!
//! let filter = CatchBlockFilter::new()
//!     .include_error::<std::io::Error>()
//!     .exclude_error_where(|e: &std::io::Error| e.kind() == std::io::ErrorKind::NotFound);
//!
//! let not_found: catchpoint::PolicyError =
//!     std::sync::Arc::new(std::io::Error::from(std::io::ErrorKind::NotFound));
//! let refused: catchpoint::PolicyError =
//!     std::sync::Arc::new(std::io::Error::from(std::io::ErrorKind::ConnectionRefused));
//! assert!(!filter.admits(&not_found));
//! assert!(filter.admits(&refused));
//! ```

use crate::error::{error_is, inner_error_is, PolicyError};
use crate::error_set::ErrorSet;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Predicate over an observed error.
pub type ErrorPredicate = Arc<dyn Fn(&PolicyError) -> bool + Send + Sync>;

fn typed_predicate<E, F>(predicate: F) -> ErrorPredicate
where
    E: Error + 'static,
    F: Fn(&E) -> bool + Send + Sync + 'static,
{
    Arc::new(move |error: &PolicyError| {
        error.as_ref().downcast_ref::<E>().is_some_and(|typed| predicate(typed))
    })
}

/// Ordered include and exclude predicate lists.
#[derive(Clone, Default)]
pub struct ErrorFilter {
    included: Vec<ErrorPredicate>,
    excluded: Vec<ErrorPredicate>,
}

impl fmt::Debug for ErrorFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorFilter")
            .field("included", &self.included.len())
            .field("excluded", &self.excluded.len())
            .finish()
    }
}

impl ErrorFilter {
    /// Filter that admits everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an included predicate.
    pub fn include<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PolicyError) -> bool + Send + Sync + 'static,
    {
        self.included.push(Arc::new(predicate));
        self
    }

    /// Add an excluded predicate.
    pub fn exclude<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PolicyError) -> bool + Send + Sync + 'static,
    {
        self.excluded.push(Arc::new(predicate));
        self
    }

    /// Include errors of type `E`.
    pub fn include_error<E: Error + 'static>(self) -> Self {
        self.include(error_is::<E>)
    }

    /// Exclude errors of type `E`.
    pub fn exclude_error<E: Error + 'static>(self) -> Self {
        self.exclude(error_is::<E>)
    }

    /// Include errors whose direct cause is an `E`.
    pub fn include_inner_error<E: Error + 'static>(self) -> Self {
        self.include(inner_error_is::<E>)
    }

    /// Exclude errors whose direct cause is an `E`.
    pub fn exclude_inner_error<E: Error + 'static>(self) -> Self {
        self.exclude(inner_error_is::<E>)
    }

    /// Include errors of type `E` satisfying `predicate`.
    pub fn include_error_where<E, F>(mut self, predicate: F) -> Self
    where
        E: Error + 'static,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.included.push(typed_predicate(predicate));
        self
    }

    /// Exclude errors of type `E` satisfying `predicate`.
    pub fn exclude_error_where<E, F>(mut self, predicate: F) -> Self
    where
        E: Error + 'static,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.excluded.push(typed_predicate(predicate));
        self
    }

    /// One included predicate per set entry.
    pub fn include_error_set(mut self, set: &ErrorSet) -> Self {
        self.included.extend(
            set.entries().iter().map(|entry| -> ErrorPredicate { Arc::new(entry.matcher()) }),
        );
        self
    }

    /// One excluded predicate per set entry.
    pub fn exclude_error_set(mut self, set: &ErrorSet) -> Self {
        self.excluded.extend(
            set.entries().iter().map(|entry| -> ErrorPredicate { Arc::new(entry.matcher()) }),
        );
        self
    }

    /// Union both predicate lists of `other` into `self`, keeping registration order.
    pub fn append(&mut self, other: &ErrorFilter) {
        self.included.extend(other.included.iter().cloned());
        self.excluded.extend(other.excluded.iter().cloned());
    }

    /// Number of included predicates.
    pub fn included_len(&self) -> usize {
        self.included.len()
    }

    /// Number of excluded predicates.
    pub fn excluded_len(&self) -> usize {
        self.excluded.len()
    }

    /// Whether the filter has no predicates at all.
    pub fn is_empty(&self) -> bool {
        self.included.is_empty() && self.excluded.is_empty()
    }

    /// Whether the policy should handle `error`.
    pub fn admits(&self, error: &PolicyError) -> bool {
        if self.excluded.iter().any(|predicate| predicate(error)) {
            return false;
        }
        self.included.is_empty() || self.included.iter().any(|predicate| predicate(error))
    }
}

/// Reusable filter builder that can be merged into a policy or another filter.
#[derive(Debug, Clone, Default)]
pub struct CatchBlockFilter {
    filter: ErrorFilter,
}

impl CatchBlockFilter {
    /// Filter that admits everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same as [`new`](Self::new); reads better at call sites that only exclude.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Include errors of type `E`.
    pub fn include_error<E: Error + 'static>(self) -> Self {
        Self { filter: self.filter.include_error::<E>() }
    }

    /// Exclude errors of type `E`.
    pub fn exclude_error<E: Error + 'static>(self) -> Self {
        Self { filter: self.filter.exclude_error::<E>() }
    }

    /// Include errors whose direct cause is an `E`.
    pub fn include_inner_error<E: Error + 'static>(self) -> Self {
        Self { filter: self.filter.include_inner_error::<E>() }
    }

    /// Exclude errors whose direct cause is an `E`.
    pub fn exclude_inner_error<E: Error + 'static>(self) -> Self {
        Self { filter: self.filter.exclude_inner_error::<E>() }
    }

    /// Include errors of type `E` satisfying `predicate`.
    pub fn include_error_where<E, F>(self, predicate: F) -> Self
    where
        E: Error + 'static,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self { filter: self.filter.include_error_where(predicate) }
    }

    /// Exclude errors of type `E` satisfying `predicate`.
    pub fn exclude_error_where<E, F>(self, predicate: F) -> Self
    where
        E: Error + 'static,
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self { filter: self.filter.exclude_error_where(predicate) }
    }

    /// Include every entry of `set`.
    pub fn include_error_set(self, set: &ErrorSet) -> Self {
        Self { filter: self.filter.include_error_set(set) }
    }

    /// Exclude every entry of `set`.
    pub fn exclude_error_set(self, set: &ErrorSet) -> Self {
        Self { filter: self.filter.exclude_error_set(set) }
    }

    /// Merge `other`'s predicates after this filter's own.
    pub fn merge(mut self, other: &CatchBlockFilter) -> Self {
        self.filter.append(&other.filter);
        self
    }

    /// The compiled predicate set.
    pub fn error_filter(&self) -> &ErrorFilter {
        &self.filter
    }

    /// Whether `error` passes the filter.
    pub fn admits(&self, error: &PolicyError) -> bool {
        self.filter.admits(error)
    }
}

impl From<CatchBlockFilter> for ErrorFilter {
    fn from(filter: CatchBlockFilter) -> Self {
        filter.filter
    }
}
