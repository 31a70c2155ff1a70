//! Numerically stable log-sum-exp reductions.
//!
//! All reductions compute $\ln \sum_i e^{x_i}$ by shifting every term by the maximum $m$,
//!
//! $$ \ln \sum_i e^{x_i} = m + \ln \sum_i e^{x_i - m}, $$
//!
//! so that no exponential overflows and the largest term contributes exactly one. An infinite
//! maximum is returned unchanged, which keeps a sequence made only of `-inf` at `-inf` instead of
//! producing `NaN`. `NaN` anywhere in the input makes the result `NaN`, even next to an infinity.
//!
//! The WHAM kernels use [`logsumexp`]. [`logsumexp_sort_inplace`] trades a sort for accuracy on
//! long sequences with a wide dynamic range and is used to build the exact reference free
//! energies of the test systems; [`logsumexp_pair`] is a standalone two-term utility.

/// Log-sum-exp of a sequence of values.
///
/// Returns `-inf` for an empty sequence, the logarithm of an empty sum.
///
/// ```
/// use wham_rs::lse::logsumexp;
///
/// let lse = logsumexp(&[1000.0, 1000.0]);
/// assert!((lse - (1000.0 + 2f64.ln())).abs() < 1e-12);
/// ```
pub fn logsumexp(values: &[f64]) -> f64 {
    let (first, rest) = match values.split_first() {
        Some(split) => split,
        None => return f64::NEG_INFINITY,
    };

    let max = rest
        .iter()
        .fold(*first, |max, &x| if max < x || x.is_nan() { x } else { max });
    if max.is_nan() || max.is_infinite() {
        return max;
    }

    max + values.iter().map(|&x| (x - max).exp()).sum::<f64>().ln()
}

/// Log-sum-exp of a sequence of values, sorting them in place first.
///
/// The shifted exponentials are accumulated from the smallest to the largest with Kahan
/// compensation, which loses less precision than [`logsumexp`] when many small terms are added to
/// a few large ones. The order of `values` is not preserved.
pub fn logsumexp_sort_inplace(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }

    if values.iter().any(|x| x.is_nan()) {
        return f64::NAN;
    }

    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let max = values[values.len() - 1];
    if max.is_infinite() {
        return max;
    }

    let mut sum = 0.0;
    let mut compensation = 0.0;
    for &x in values.iter() {
        let y = (x - max).exp() - compensation;
        let t = sum + y;
        compensation = (t - sum) - y;
        sum = t;
    }

    max + sum.ln()
}

/// Log-sum-exp of two values, $\ln(e^a + e^b)$
pub fn logsumexp_pair(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }

    let max = if a < b { b } else { a };
    if max.is_infinite() {
        return max;
    }
    max + ((a - max).exp() + (b - max).exp()).ln()
}
