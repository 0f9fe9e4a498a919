//! Fork-join helpers over particle attribute slices.
//!
//! Every helper returns only after all workers are done, which is the barrier
//! between two phases of a substep.

use rayon::prelude::*;

pub fn par_iter_mut2<T1: Send + Sync, T2: Send + Sync, F: Fn(usize, &mut T1, &mut T2) + Send + Sync>(
    arr1: &mut [T1],
    arr2: &mut [T2],
    f: F,
) {
    (arr1, arr2)
        .into_par_iter()
        .enumerate()
        .for_each(|(idx, (v1, v2))| {
            f(idx, v1, v2);
        });
}

/// Like [`par_iter_mut2`], but every call also yields a value that is folded with `combine`.
pub fn par_iter_reduce2<
    T1: Send + Sync,
    T2: Send + Sync,
    F: Fn(usize, &mut T1, &mut T2) -> X + Send + Sync,
    X: Send,
    C: Fn(X, X) -> X + Send + Sync,
    I: Fn() -> X + Send + Sync,
>(
    arr1: &mut [T1],
    arr2: &mut [T2],
    identity: I,
    combine: C,
    f: F,
) -> X {
    (arr1, arr2)
        .into_par_iter()
        .enumerate()
        .map(|(i, (a, b))| f(i, a, b))
        .reduce(identity, combine)
}

/// Read-only parallel map-reduce over `0..n`.
pub fn par_map_reduce<X: Send, F: Fn(usize) -> X + Send + Sync, C: Fn(X, X) -> X + Send + Sync>(
    n: usize,
    identity: impl Fn() -> X + Send + Sync,
    combine: C,
    f: F,
) -> X {
    (0..n).into_par_iter().map(f).reduce(identity, combine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_counts_and_writes() {
        let mut a = vec![1; 100];
        let mut b = vec![0; 100];
        let flagged = par_iter_reduce2(
            &mut a,
            &mut b,
            || 0,
            |x, y| x + y,
            |i, a, b| {
                *b = *a + i;
                usize::from(i % 10 == 0)
            },
        );
        assert_eq!(flagged, 10);
        assert_eq!(b[99], 100);
    }

    #[test]
    fn map_reduce_sums() {
        assert_eq!(par_map_reduce(101, || 0usize, |a, b| a + b, |i| i), 5050);
    }
}
