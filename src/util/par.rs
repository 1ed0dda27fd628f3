//! Parallel-for and fold/reduce helpers.
//!
//! Every parallel phase in the crate goes through these two functions. With
//! the `rayon` feature they fan out over the global rayon pool when
//! `parallel` is set; otherwise they run sequentially in index order. Either
//! way the closures only read shared state, and all mutation of caller-owned
//! collections happens after the call returns.

use crate::util::VolMatchResult;

/// Maps `f` over `items`, preserving order. Stops at the first error.
#[cfg(feature = "rayon")]
pub(crate) fn try_map<T, R, F>(items: &[T], parallel: bool, f: F) -> VolMatchResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> VolMatchResult<R> + Sync + Send,
{
    use rayon::prelude::*;
    if parallel {
        items
            .par_iter()
            .enumerate()
            .map(|(idx, item)| f(idx, item))
            .collect()
    } else {
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| f(idx, item))
            .collect()
    }
}

/// Maps `f` over `items`, preserving order. Stops at the first error.
#[cfg(not(feature = "rayon"))]
pub(crate) fn try_map<T, R, F>(items: &[T], _parallel: bool, f: F) -> VolMatchResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> VolMatchResult<R> + Sync + Send,
{
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| f(idx, item))
        .collect()
}

/// Folds `items` into per-worker accumulators and merges them pairwise.
///
/// `merge` must be associative and commutative: the grouping of items into
/// accumulators is unspecified when running in parallel.
#[cfg(feature = "rayon")]
pub(crate) fn try_fold_reduce<T, A, ID, F, M>(
    items: &[T],
    parallel: bool,
    identity: ID,
    fold: F,
    merge: M,
) -> VolMatchResult<A>
where
    T: Sync,
    A: Send,
    ID: Fn() -> A + Sync + Send,
    F: Fn(A, usize, &T) -> VolMatchResult<A> + Sync + Send,
    M: Fn(A, A) -> A + Sync + Send,
{
    use rayon::prelude::*;
    if parallel {
        items
            .par_iter()
            .enumerate()
            .try_fold(&identity, |acc, (idx, item)| fold(acc, idx, item))
            .try_reduce(&identity, |a, b| Ok(merge(a, b)))
    } else {
        items
            .iter()
            .enumerate()
            .try_fold(identity(), |acc, (idx, item)| fold(acc, idx, item))
    }
}

/// Folds `items` into per-worker accumulators and merges them pairwise.
#[cfg(not(feature = "rayon"))]
pub(crate) fn try_fold_reduce<T, A, ID, F, M>(
    items: &[T],
    _parallel: bool,
    identity: ID,
    fold: F,
    _merge: M,
) -> VolMatchResult<A>
where
    T: Sync,
    A: Send,
    ID: Fn() -> A + Sync + Send,
    F: Fn(A, usize, &T) -> VolMatchResult<A> + Sync + Send,
    M: Fn(A, A) -> A + Sync + Send,
{
    items
        .iter()
        .enumerate()
        .try_fold(identity(), |acc, (idx, item)| fold(acc, idx, item))
}
