use crate::errors::*;
use crate::lse::logsumexp_sort_inplace;
use crate::wham::Wham;
use ndarray::{array, Array1, Array2};
use tracing::debug;

/// Test case of umbrella sampling along a double well.
///
/// The unbiased reduced potential of bin `i` is $\beta h (x_i^2 - 1)^2$ for a barrier height $h$,
/// and thermodynamic state `k` adds a harmonic umbrella
/// $b_{ki} = \frac{\beta}{2} k_k (x_i - o_k)^2$. Counts are the expected, noise-free histogram
/// for a given number of samples per state, so the analytical free energies are an exact fixed
/// point of the WHAM equations.
///
/// # Examples
///
/// Generate a histogram with default parameters and check it against the exact answer.
///
/// ```
/// use wham_rs::testsystems::*;
///
/// let testcase = HarmonicUmbrellas::default();
/// let n_k = vec![1000.0; testcase.n_therm_states()];
/// let wham = testcase.wham(&n_k).unwrap();
///
/// let mut workspace = wham.workspace();
/// let mut f_i = vec![0.0; wham.n_markov_states()];
/// let f_k = testcase.f_k();
/// wham.update_f_i(f_k.as_slice().unwrap(), &mut workspace, &mut f_i).unwrap();
///
/// for (estimate, exact) in f_i.iter().zip(testcase.f_i().iter()) {
///     assert!((estimate - exact).abs() < 1e-9);
/// }
/// ```
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct HarmonicUmbrellas {
    /// Umbrella centres for each state.
    #[builder(default = "array![-1.5, -1.0, -0.5, 0.0, 0.5, 1.0, 1.5]")]
    o_k: Array1<f64>,

    /// Force constants for each state.
    #[builder(default = "Array1::from_elem(7, 10.0)")]
    k_k: Array1<f64>,

    /// Bin centres.
    #[builder(default = "Array1::linspace(-1.5, 1.5, 31)")]
    x_i: Array1<f64>,

    /// Height of the double-well barrier
    #[builder(default = "1.0")]
    barrier: f64,

    /// Inverse temperature
    #[builder(default = "1.0")]
    beta: f64,
}

impl HarmonicUmbrellasBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let (Some(o_k), Some(k_k)) = (&self.o_k, &self.k_k) {
            if o_k.len() != k_k.len() {
                return Err(format!(
                    "o_k and k_k must have equal lengths (not {} and {})",
                    o_k.len(),
                    k_k.len()
                ));
            }
            if o_k.is_empty() {
                return Err("At least one umbrella is required".to_string());
            }
        }

        if let Some(x_i) = &self.x_i {
            if x_i.is_empty() {
                return Err("At least one bin is required".to_string());
            }
        }

        Ok(())
    }

    /// Build the test case
    pub fn build(&self) -> Result<HarmonicUmbrellas> {
        Ok(self.build_inner()?)
    }
}

impl Default for HarmonicUmbrellas {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("HarmonicUmbrellas should not fail with default params")
    }
}

impl HarmonicUmbrellas {
    /// Get a new builder for the `HarmonicUmbrellas` struct.
    pub fn builder() -> HarmonicUmbrellasBuilder {
        HarmonicUmbrellasBuilder::default()
    }

    /// Number of umbrellas
    pub fn n_therm_states(&self) -> usize {
        self.o_k.len()
    }

    /// Number of bins
    pub fn n_markov_states(&self) -> usize {
        self.x_i.len()
    }

    /// Bin centres
    pub fn x_i(&self) -> &Array1<f64> {
        &self.x_i
    }

    /// Exact free energies of the bins, normalized so that $\sum_i e^{-f_i} = 1$
    pub fn f_i(&self) -> Array1<f64> {
        let u_i = self
            .x_i
            .mapv(|x| self.beta * self.barrier * (x * x - 1.0).powi(2));
        let mut neg_u_i: Vec<f64> = u_i.iter().map(|u| -u).collect();
        let shift = logsumexp_sort_inplace(&mut neg_u_i);
        u_i + shift
    }

    /// Reduced bias energies `b_k_i[k, i]` of bin `i` in umbrella `k`
    pub fn b_k_i(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.n_therm_states(), self.n_markov_states()), |(k, i)| {
            let dx = self.x_i[i] - self.o_k[k];
            0.5 * self.beta * self.k_k[k] * dx * dx
        })
    }

    /// Exact free energies of the umbrella states, consistent with [`f_i`](Self::f_i)
    pub fn f_k(&self) -> Array1<f64> {
        let f_i = self.f_i();
        let b_k_i = self.b_k_i();
        b_k_i
            .outer_iter()
            .map(|b_i| {
                let mut terms: Vec<f64> =
                    b_i.iter().zip(f_i.iter()).map(|(b, f)| -(b + f)).collect();
                -logsumexp_sort_inplace(&mut terms)
            })
            .collect()
    }

    /// Expected histogram `n_k_i[k, i]` when `n_k[k]` samples are drawn in each umbrella
    pub fn counts(&self, n_k: &[f64]) -> Result<Array2<f64>> {
        if n_k.len() != self.n_therm_states() {
            return Err(WhamError::ArrayLengthMismatch(
                n_k.len(),
                self.n_therm_states(),
            ));
        }

        let f_i = self.f_i();
        let f_k = self.f_k();
        let b_k_i = self.b_k_i();
        Ok(Array2::from_shape_fn(b_k_i.dim(), |(k, i)| {
            n_k[k] * (f_k[k] - b_k_i[[k, i]] - f_i[i]).exp()
        }))
    }

    /// A WHAM estimator for the expected histogram of `n_k[k]` samples per umbrella
    pub fn wham(&self, n_k: &[f64]) -> Result<Wham> {
        let counts = self.counts(n_k)?;
        debug!(
            n_therm_states = self.n_therm_states(),
            n_markov_states = self.n_markov_states(),
            total_samples = counts.sum(),
            "Generated umbrella histogram"
        );
        Wham::from_counts(&counts, self.b_k_i())
    }
}
