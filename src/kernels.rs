//! The three WHAM update routines over flat, caller-owned arrays.
//!
//! With $S$ thermodynamic states indexed by $K$ and $B$ Markov states (bins) indexed by $i$, one
//! WHAM iteration evaluates
//!
//! $$ f_i = \ln \sum_K N_K e^{f_K - b_{Ki}} - \ln N_i, \qquad
//!    f_K = -\ln \sum_i e^{-(b_{Ki} + f_i)} $$
//!
//! and optionally shifts $f_i$ so that $\sum_i e^{-f_i} = 1$. Every quantity is kept in log
//! space. The bias matrix `b_k_i` is flattened row-major, so $b_{Ki}$ is `b_k_i[K * B + i]`.
//!
//! These routines trust the caller. They never allocate and let `NaN` and infinities flow through
//! unchanged. Apart from requiring one bias entry per state and bin, they rely on slice indexing
//! to catch arrays of the wrong length. A bin that was never visited has $\ln N_i = -\infty$ and
//! gets $f_i = +\infty$.
//! Use [`Wham`](crate::wham::Wham) for length-checked entry points.
//!
//! The scratch buffer is pure workspace: its contents are meaningless before and after a call.
//! It must hold at least `max(S, B)` entries; [`Workspace::new`] sizes one correctly.

use crate::lse::logsumexp;
use rayon::prelude::*;
use std::ops::{Deref, DerefMut};

/// A reusable scratch buffer for the WHAM routines
///
/// Dereferences to `[f64]`, so `&mut workspace` can be passed wherever a scratch slice is
/// expected. A single workspace must not be shared between concurrent calls; give each worker its
/// own.
#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    scratch: Vec<f64>,
}

impl Workspace {
    /// A workspace large enough for `n_therm_states` thermodynamic states and `n_markov_states`
    /// bins
    pub fn new(n_therm_states: usize, n_markov_states: usize) -> Self {
        Self {
            scratch: vec![0.0; n_therm_states.max(n_markov_states)],
        }
    }
}

impl Deref for Workspace {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.scratch
    }
}

impl DerefMut for Workspace {
    fn deref_mut(&mut self) -> &mut [f64] {
        &mut self.scratch
    }
}

/// Update the free energies of all bins from the free energies of the thermodynamic states.
///
/// For every bin `i`, writes
/// `f_i[i] = logsumexp_K(log_n_k[K] - b_k_i[K * B + i] + f_k[K]) - log_n_i[i]`.
///
/// The number of thermodynamic states is `log_n_k.len()` and the number of bins is
/// `log_n_i.len()`.
///
/// # Panics
///
/// Panics if there are no thermodynamic states or no bins, if `scratch` or `f_k` are shorter than
/// these dimensions require, or if `b_k_i` does not hold exactly one entry per state and bin.
pub fn update_bin_free_energies(
    log_n_k: &[f64],
    log_n_i: &[f64],
    f_k: &[f64],
    b_k_i: &[f64],
    scratch: &mut [f64],
    f_i: &mut [f64],
) {
    let n_therm_states = log_n_k.len();
    let n_markov_states = log_n_i.len();
    assert!(
        n_therm_states > 0 && n_markov_states > 0,
        "WHAM needs at least one thermodynamic state and one bin"
    );
    debug_assert_eq!(f_k.len(), n_therm_states);
    debug_assert_eq!(f_i.len(), n_markov_states);
    assert_eq!(
        b_k_i.len(),
        n_therm_states * n_markov_states,
        "b_k_i must hold n_therm_states * n_markov_states entries"
    );

    let scratch = &mut scratch[..n_therm_states];
    for (i, (f, &log_n)) in f_i.iter_mut().zip(log_n_i).enumerate() {
        bin_terms(log_n_k, f_k, b_k_i, n_markov_states, i, scratch);
        *f = logsumexp(scratch) - log_n;
    }
}

/// Update the free energies of all thermodynamic states from the free energies of the bins.
///
/// For every state `K`, writes `f_k[K] = -logsumexp_i(-(b_k_i[K * B + i] + f_i[i]))`.
///
/// The number of bins is `f_i.len()` and the number of thermodynamic states is `f_k.len()`.
///
/// # Panics
///
/// Panics if there are no thermodynamic states or no bins, if `scratch` is shorter than the
/// number of bins, or if `b_k_i` does not hold exactly one entry per state and bin.
pub fn update_state_free_energies(
    f_i: &[f64],
    b_k_i: &[f64],
    scratch: &mut [f64],
    f_k: &mut [f64],
) {
    let n_markov_states = f_i.len();
    assert!(
        !f_k.is_empty() && n_markov_states > 0,
        "WHAM needs at least one thermodynamic state and one bin"
    );
    assert_eq!(
        b_k_i.len(),
        f_k.len() * n_markov_states,
        "b_k_i must hold n_therm_states * n_markov_states entries"
    );

    let scratch = &mut scratch[..n_markov_states];
    for (f, b_i) in f_k.iter_mut().zip(b_k_i.chunks_exact(n_markov_states)) {
        state_terms(f_i, b_i, scratch);
        *f = -logsumexp(scratch);
    }
}

/// Shift the bin free energies so that $\sum_i e^{-f_i} = 1$.
///
/// Adds `logsumexp_i(-f_i[i])` to every entry. Calling it again right away is a no-op up to
/// rounding.
///
/// # Panics
///
/// Panics if `f_i` is empty or `scratch` is shorter than `f_i`.
pub fn normalize_bin_free_energies(f_i: &mut [f64], scratch: &mut [f64]) {
    assert!(!f_i.is_empty(), "WHAM needs at least one bin");

    let scratch = &mut scratch[..f_i.len()];
    for (s, &f) in scratch.iter_mut().zip(f_i.iter()) {
        *s = -f;
    }
    let shift = logsumexp(scratch);
    for f in f_i.iter_mut() {
        *f += shift;
    }
}

/// Parallel version of [`update_bin_free_energies`].
///
/// Bins are distributed over the rayon thread pool, each worker filling its own scratch buffer,
/// so no workspace is taken. Results are identical to the sequential routine.
///
/// # Panics
///
/// Same conditions as [`update_bin_free_energies`].
pub fn par_update_bin_free_energies(
    log_n_k: &[f64],
    log_n_i: &[f64],
    f_k: &[f64],
    b_k_i: &[f64],
    f_i: &mut [f64],
) {
    let n_therm_states = log_n_k.len();
    let n_markov_states = log_n_i.len();
    assert!(
        n_therm_states > 0 && n_markov_states > 0,
        "WHAM needs at least one thermodynamic state and one bin"
    );
    debug_assert_eq!(f_i.len(), n_markov_states);
    assert_eq!(
        b_k_i.len(),
        n_therm_states * n_markov_states,
        "b_k_i must hold n_therm_states * n_markov_states entries"
    );

    f_i.par_iter_mut()
        .zip(log_n_i.par_iter())
        .enumerate()
        .for_each_init(
            || vec![0.0; n_therm_states],
            |scratch, (i, (f, &log_n))| {
                bin_terms(log_n_k, f_k, b_k_i, n_markov_states, i, scratch);
                *f = logsumexp(scratch) - log_n;
            },
        );
}

/// Parallel version of [`update_state_free_energies`].
///
/// # Panics
///
/// Same conditions as [`update_state_free_energies`].
pub fn par_update_state_free_energies(f_i: &[f64], b_k_i: &[f64], f_k: &mut [f64]) {
    let n_markov_states = f_i.len();
    assert!(
        !f_k.is_empty() && n_markov_states > 0,
        "WHAM needs at least one thermodynamic state and one bin"
    );
    assert_eq!(
        b_k_i.len(),
        f_k.len() * n_markov_states,
        "b_k_i must hold n_therm_states * n_markov_states entries"
    );

    f_k.par_iter_mut()
        .zip(b_k_i.par_chunks_exact(n_markov_states))
        .for_each_init(
            || vec![0.0; n_markov_states],
            |scratch, (f, b_i)| {
                state_terms(f_i, b_i, scratch);
                *f = -logsumexp(scratch);
            },
        );
}

/// Fill `scratch` with `log_n_k[K] - b_k_i[K, i] + f_k[K]` for every state `K`
#[inline]
fn bin_terms(
    log_n_k: &[f64],
    f_k: &[f64],
    b_k_i: &[f64],
    n_markov_states: usize,
    i: usize,
    scratch: &mut [f64],
) {
    for (k, s) in scratch.iter_mut().enumerate() {
        *s = log_n_k[k] - b_k_i[k * n_markov_states + i] + f_k[k];
    }
}

/// Fill `scratch` with `-(b_i[i] + f_i[i])` for every bin `i` of one row of the bias matrix
#[inline]
fn state_terms(f_i: &[f64], b_i: &[f64], scratch: &mut [f64]) {
    for ((s, &b), &f) in scratch.iter_mut().zip(b_i).zip(f_i) {
        *s = -(b + f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::izip;

    const TOL: f64 = 1e-10;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < TOL, "{:?} != {:?}", a, b);
        }
    }

    /// Three states, four bins, with no particular symmetry
    fn asymmetric() -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
        let log_n_k = vec![100f64.ln(), 250f64.ln(), 50f64.ln()];
        let log_n_i = vec![80f64.ln(), 120f64.ln(), 150f64.ln(), 50f64.ln()];
        let f_k = vec![0.3, -0.2, 1.1];
        let b_k_i = vec![
            0.0, 0.5, 2.0, 4.5, //
            2.0, 0.5, 0.0, 0.5, //
            4.5, 2.0, 0.5, 0.0,
        ];
        (log_n_k, log_n_i, f_k, b_k_i)
    }

    #[test]
    fn symmetric_two_by_two() {
        let log_n_k = [10f64.ln(), 10f64.ln()];
        let log_n_i = [20f64.ln(), 20f64.ln()];
        let f_k = [0.0, 0.0];
        let b_k_i = [0.0; 4];
        let mut ws = Workspace::new(2, 2);
        let mut f_i = [f64::NAN; 2];

        update_bin_free_energies(&log_n_k, &log_n_i, &f_k, &b_k_i, &mut ws, &mut f_i);

        assert_close(&f_i, &[0.0, 0.0]);
    }

    #[test]
    fn normalize_two_bins() {
        let mut f_i = [0.0, 0.0];
        let mut ws = Workspace::new(1, 2);

        normalize_bin_free_energies(&mut f_i, &mut ws);

        assert_close(&f_i, &[2f64.ln(), 2f64.ln()]);
        let total: f64 = f_i.iter().map(|f| (-f).exp()).sum();
        assert!((total - 1.0).abs() < TOL);
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut f_i = [3.0, -1.5, 0.25, 12.0, -7.0];
        let mut ws = Workspace::new(1, 5);

        normalize_bin_free_energies(&mut f_i, &mut ws);
        let once = f_i;
        normalize_bin_free_energies(&mut f_i, &mut ws);

        assert_close(&f_i, &once);
    }

    #[test]
    fn single_state_reduces_to_direct_formula() {
        let log_n_k = [30f64.ln()];
        let log_n_i = [5f64.ln(), 10f64.ln(), 15f64.ln()];
        let f_k = [0.7];
        let b_k_i = [1.0, 0.0, 2.5];
        let mut ws = Workspace::new(1, 3);
        let mut f_i = [0.0; 3];

        update_bin_free_energies(&log_n_k, &log_n_i, &f_k, &b_k_i, &mut ws, &mut f_i);

        for (&f, &log_n, &b) in izip!(&f_i, &log_n_i, &b_k_i) {
            let expected = log_n_k[0] - b + f_k[0] - log_n;
            assert!((f - expected).abs() < TOL);
        }
    }

    #[test]
    fn single_bin_reduces_to_direct_formula() {
        let f_i = [0.4];
        let b_k_i = [0.0, 1.5, -2.0];
        let mut ws = Workspace::new(3, 1);
        let mut f_k = [0.0; 3];

        update_state_free_energies(&f_i, &b_k_i, &mut ws, &mut f_k);

        for (&f, &b) in f_k.iter().zip(&b_k_i) {
            assert!((f - (b + f_i[0])).abs() < TOL);
        }
    }

    #[test]
    fn state_update_matches_definition() {
        let (_, _, _, b_k_i) = asymmetric();
        let f_i = [0.1, -0.4, 0.9, 2.0];
        let mut ws = Workspace::new(3, 4);
        let mut f_k = [0.0; 3];

        update_state_free_energies(&f_i, &b_k_i, &mut ws, &mut f_k);

        for (k, &f) in f_k.iter().enumerate() {
            let z: f64 = (0..4).map(|i| (-(b_k_i[k * 4 + i] + f_i[i])).exp()).sum();
            assert!((f + z.ln()).abs() < TOL);
        }
    }

    #[test]
    fn gauge_shift_is_removed_by_normalization() {
        let (log_n_k, log_n_i, f_k, b_k_i) = asymmetric();
        let shift = 3.7;
        let f_k_shifted: Vec<f64> = f_k.iter().map(|f| f - shift).collect();
        let mut ws = Workspace::new(3, 4);
        let mut f_i = [0.0; 4];
        let mut f_i_shifted = [0.0; 4];

        update_bin_free_energies(&log_n_k, &log_n_i, &f_k, &b_k_i, &mut ws, &mut f_i);
        update_bin_free_energies(
            &log_n_k,
            &log_n_i,
            &f_k_shifted,
            &b_k_i,
            &mut ws,
            &mut f_i_shifted,
        );

        for (a, b) in f_i.iter().zip(&f_i_shifted) {
            assert!((a - b - shift).abs() < TOL);
        }

        normalize_bin_free_energies(&mut f_i, &mut ws);
        normalize_bin_free_energies(&mut f_i_shifted, &mut ws);
        assert_close(&f_i, &f_i_shifted);

        // Both equations move with the same constant
        let mut f_k_from_shifted = [0.0; 3];
        let mut f_k_plain = [0.0; 3];
        let f_i_plus: Vec<f64> = f_i.iter().map(|f| f + shift).collect();
        update_state_free_energies(&f_i, &b_k_i, &mut ws, &mut f_k_plain);
        update_state_free_energies(&f_i_plus, &b_k_i, &mut ws, &mut f_k_from_shifted);
        for (a, b) in f_k_plain.iter().zip(&f_k_from_shifted) {
            assert!((b - a - shift).abs() < TOL);
        }
    }

    #[test]
    fn scratch_does_not_leak_between_calls() {
        let (log_n_k, log_n_i, f_k, b_k_i) = asymmetric();
        let mut shared = Workspace::new(3, 4);
        let mut fresh_f_i = [0.0; 4];
        let mut shared_f_i = [0.0; 4];

        // Dirty the shared workspace with an unrelated call
        let mut junk = [1.0e300, -4.0, 17.0, f64::NAN];
        normalize_bin_free_energies(&mut junk, &mut shared);
        for s in shared.iter_mut() {
            *s = f64::NAN;
        }

        update_bin_free_energies(
            &log_n_k,
            &log_n_i,
            &f_k,
            &b_k_i,
            &mut Workspace::new(3, 4),
            &mut fresh_f_i,
        );
        update_bin_free_energies(&log_n_k, &log_n_i, &f_k, &b_k_i, &mut shared, &mut shared_f_i);

        assert_eq!(fresh_f_i, shared_f_i);
    }

    #[test]
    fn oversized_scratch_is_accepted() {
        let (log_n_k, log_n_i, f_k, b_k_i) = asymmetric();
        let mut big = vec![0.0; 64];
        let mut f_i = [0.0; 4];
        let mut expected = [0.0; 4];

        update_bin_free_energies(&log_n_k, &log_n_i, &f_k, &b_k_i, &mut big, &mut f_i);
        update_bin_free_energies(
            &log_n_k,
            &log_n_i,
            &f_k,
            &b_k_i,
            &mut Workspace::new(3, 4),
            &mut expected,
        );

        assert_eq!(f_i, expected);
    }

    #[test]
    fn unvisited_bin_propagates_infinity() {
        let log_n_k = [10f64.ln()];
        let log_n_i = [10f64.ln(), f64::NEG_INFINITY];
        let mut ws = Workspace::new(1, 2);
        let mut f_i = [0.0; 2];

        update_bin_free_energies(&log_n_k, &log_n_i, &[0.0], &[0.0, 0.0], &mut ws, &mut f_i);

        assert_eq!(f_i[1], f64::INFINITY);
    }

    #[test]
    #[should_panic]
    fn short_scratch_panics() {
        let (log_n_k, log_n_i, f_k, b_k_i) = asymmetric();
        let mut f_i = [0.0; 4];
        update_bin_free_energies(&log_n_k, &log_n_i, &f_k, &b_k_i, &mut [0.0; 2], &mut f_i);
    }

    #[test]
    #[should_panic]
    fn no_bins_panics() {
        normalize_bin_free_energies(&mut [], &mut [0.0]);
    }

    #[test]
    #[should_panic(expected = "b_k_i must hold")]
    fn short_bias_panics_in_state_update() {
        let mut f_k = [0.0, 456.0];
        update_state_free_energies(&[0.0, 0.0], &[0.0; 3], &mut [0.0; 2], &mut f_k);
    }

    #[test]
    #[should_panic(expected = "b_k_i must hold")]
    fn short_bias_panics_in_parallel_state_update() {
        let mut f_k = [0.0, 456.0];
        par_update_state_free_energies(&[0.0, 0.0], &[0.0; 3], &mut f_k);
    }

    #[test]
    #[should_panic(expected = "b_k_i must hold")]
    fn long_bias_panics_in_bin_update() {
        let mut f_i = [0.0; 2];
        let b_k_i = [0.0; 5];
        update_bin_free_energies(&[0.0; 2], &[0.0; 2], &[0.0; 2], &b_k_i, &mut [0.0; 2], &mut f_i);
    }

    #[test]
    fn nan_in_one_state_reaches_the_bin() {
        // A state with no samples contributes -inf and must not hide the NaN of another state
        let log_n_k = [f64::NEG_INFINITY, f64::NAN];
        let log_n_i = [10f64.ln()];
        let mut ws = Workspace::new(2, 1);
        let mut f_i = [0.0];

        let (f_k, b_k_i) = ([0.0, 0.0], [0.0, 0.0]);
        update_bin_free_energies(&log_n_k, &log_n_i, &f_k, &b_k_i, &mut ws, &mut f_i);
        assert!(f_i[0].is_nan());

        par_update_bin_free_energies(&log_n_k, &log_n_i, &f_k, &b_k_i, &mut f_i);
        assert!(f_i[0].is_nan());
    }

    #[test]
    fn parallel_matches_sequential() {
        let (log_n_k, log_n_i, f_k, b_k_i) = asymmetric();
        let mut ws = Workspace::new(3, 4);

        let mut f_i = [0.0; 4];
        let mut par_f_i = [0.0; 4];
        update_bin_free_energies(&log_n_k, &log_n_i, &f_k, &b_k_i, &mut ws, &mut f_i);
        par_update_bin_free_energies(&log_n_k, &log_n_i, &f_k, &b_k_i, &mut par_f_i);
        assert_eq!(f_i, par_f_i);

        let mut f_k_out = [0.0; 3];
        let mut par_f_k_out = [0.0; 3];
        update_state_free_energies(&f_i, &b_k_i, &mut ws, &mut f_k_out);
        par_update_state_free_energies(&f_i, &b_k_i, &mut par_f_k_out);
        assert_eq!(f_k_out, par_f_k_out);
    }
}
