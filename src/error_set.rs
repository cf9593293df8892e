//! Declarative multi-type error matching.
//!
//! An [`ErrorSet`] lists error types, each matched either as the error itself or as its direct
//! cause (`Error::source`). Entries combine with logical OR: attached to a filter, every entry
//! becomes one included or one excluded predicate.
//!
//! ```rust
//! use catchpoint::{ErrorFilter, ErrorSet};
//!
//! let set = ErrorSet::from_error::<std::io::Error>().with_inner_error::<std::fmt::Error>();
//! let filter = ErrorFilter::new().exclude_error_set(&set);
//! assert_eq!(filter.excluded_len(), 2);
//! ```

use crate::error::{error_is, inner_error_is, PolicyError};
use std::error::Error;

/// One `(error_type, is_inner_cause)` entry of an [`ErrorSet`].
#[derive(Debug, Clone, Copy)]
pub struct ErrorSetEntry {
    type_name: &'static str,
    is_inner: bool,
    matcher: fn(&PolicyError) -> bool,
}

impl ErrorSetEntry {
    fn outer<E: Error + 'static>() -> Self {
        Self { type_name: std::any::type_name::<E>(), is_inner: false, matcher: error_is::<E> }
    }

    fn inner<E: Error + 'static>() -> Self {
        Self { type_name: std::any::type_name::<E>(), is_inner: true, matcher: inner_error_is::<E> }
    }

    /// Fully qualified name of the matched type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the entry tests the direct cause instead of the error itself.
    pub fn is_inner(&self) -> bool {
        self.is_inner
    }

    /// Whether `error` has exactly this entry's shape.
    pub fn matches(&self, error: &PolicyError) -> bool {
        (self.matcher)(error)
    }

    pub(crate) fn matcher(&self) -> fn(&PolicyError) -> bool {
        self.matcher
    }
}

/// Ordered list of error types to include in or exclude from a filter.
#[derive(Debug, Clone, Default)]
pub struct ErrorSet {
    entries: Vec<ErrorSetEntry>,
}

impl ErrorSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set matching errors of type `E`.
    pub fn from_error<E: Error + 'static>() -> Self {
        Self::new().with_error::<E>()
    }

    /// Set matching errors whose direct cause is an `E`.
    pub fn from_inner_error<E: Error + 'static>() -> Self {
        Self::new().with_inner_error::<E>()
    }

    /// Append a match on type `E`.
    pub fn with_error<E: Error + 'static>(mut self) -> Self {
        self.entries.push(ErrorSetEntry::outer::<E>());
        self
    }

    /// Append a match on errors caused by an `E`.
    pub fn with_inner_error<E: Error + 'static>(mut self) -> Self {
        self.entries.push(ErrorSetEntry::inner::<E>());
        self
    }

    /// Entries in registration order.
    pub fn entries(&self) -> &[ErrorSetEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry matches `error`.
    pub fn matches(&self, error: &PolicyError) -> bool {
        self.entries.iter().any(|entry| entry.matches(error))
    }
}
