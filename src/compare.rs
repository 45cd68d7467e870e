//! User-supplied key ordering (§4.6, design note "Comparator sentinel").

use std::cmp::Ordering;

/// Result of a prefix comparison: either a definite answer, or a request
/// for the caller to fetch full keys and fall back to [`CompareFn`].
///
/// Modeled as a plain enum rather than an error/exception, per the design
/// note: this is a protocol between the two comparators, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOrdering {
    Less,
    Equal,
    Greater,
    NeedFullKey,
}

/// `compare(a, b) -> Ordering`. Must be a total order, stable across the
/// database's lifetime (changing comparators on an existing file produces
/// undefined ordering).
pub type CompareFn = Box<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// `prefix_compare(a_prefix, a_len_total, b_prefix, b_len_total)`.
pub type PrefixCompareFn = Box<dyn Fn(&[u8], usize, &[u8], usize) -> PrefixOrdering + Send + Sync>;

/// Default: plain lexicographic byte-string order.
pub fn lexicographic() -> CompareFn {
    Box::new(|a, b| a.cmp(b))
}
