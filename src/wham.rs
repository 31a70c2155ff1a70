use crate::errors::*;
use crate::kernels::{self, Workspace};
use ndarray::{Array1, Array2, Axis, ErrorKind, ShapeError};
use tracing::{debug, trace};

/// Define the initial guess for the free energies of the thermodynamic states
#[derive(Debug, Clone, PartialEq)]
pub enum InitialFreeEnergies {
    /// Use the specified free energy values
    Specified(Vec<f64>),
    /// Initialize all free energies to zero
    Zeros,
}

impl Default for InitialFreeEnergies {
    fn default() -> Self {
        Self::Zeros
    }
}

impl From<&[f64]> for InitialFreeEnergies {
    fn from(slice: &[f64]) -> Self {
        Self::Specified(Vec::from(slice))
    }
}

/// Weighted histogram analysis method (WHAM) for binned samples from multiple biased
/// thermodynamic states.
///
/// `Wham` holds the immutable inputs of the WHAM equations and offers length-checked versions of
/// the routines in [`kernels`](crate::kernels). It does not iterate by itself: the caller owns
/// `f_k` and `f_i`, alternates [`update_f_i`](Wham::update_f_i) and
/// [`update_f_k`](Wham::update_f_k), and decides when the iterates have converged.
///
/// # Example
///
/// ```
/// use wham_rs::wham::Wham;
/// use ndarray::array;
///
/// let wham = Wham::builder()
///     .counts(&array![[10.0, 0.0], [5.0, 5.0]])
///     .b_k_i(array![[0.0, 3.0], [0.0, 0.0]])
///     .build()
///     .unwrap();
///
/// let mut workspace = wham.workspace();
/// let mut f_k = wham.initial_f_k();
/// let mut f_i = vec![0.0; wham.n_markov_states()];
/// for _ in 0..100 {
///     wham.update_f_i(&f_k, &mut workspace, &mut f_i).unwrap();
///     wham.update_f_k(&f_i, &mut workspace, &mut f_k).unwrap();
/// }
/// wham.normalize(&mut f_i, &mut workspace).unwrap();
/// assert!(f_i.iter().all(|f| f.is_finite()));
/// ```
///
/// # References
///
/// 1. Kumar S, Rosenberg JM, Bouzida D, Swendsen RH and Kollman PA. The weighted histogram
/// analysis method for free-energy calculations on biomolecules. I. The method. J. Comput. Chem.
/// 13:1011, 1992 <https://doi.org/10.1002/jcc.540130812>
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct Wham {
    /// `log_n_k[k]` is the logarithm of the number of samples drawn in thermodynamic state `k`
    log_n_k: Array1<f64>,

    /// `log_n_i[i]` is the logarithm of the number of samples, from all states, that fell in bin
    /// `i`
    ///
    /// A bin without samples has a `log_n_i` of `-inf` and ends up with an infinite free energy.
    log_n_i: Array1<f64>,

    /// `b_k_i[k, i]` is the reduced bias energy of bin `i` in thermodynamic state `k`
    b_k_i: Array2<f64>,

    /// Set to the initial dimensionless free energies of the states to use as a guess
    #[builder(default)]
    initial_free_energies: InitialFreeEnergies,

    /// Set to true to spread updates over the rayon thread pool
    #[builder(default = "false")]
    parallel: bool,
}

impl WhamBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(log_n_k) = &self.log_n_k {
            if log_n_k.is_empty() {
                return Err("At least one thermodynamic state is required".to_string());
            }
        }

        if let Some(log_n_i) = &self.log_n_i {
            if log_n_i.is_empty() {
                return Err("At least one bin is required".to_string());
            }
        }

        if let (Some(log_n_k), Some(log_n_i), Some(b_k_i)) =
            (&self.log_n_k, &self.log_n_i, &self.b_k_i)
        {
            let expected = (log_n_k.len(), log_n_i.len());
            if b_k_i.dim() != expected {
                return Err(format!(
                    "b_k_i must have shape (n_therm_states, n_markov_states) = {:?} (not {:?})",
                    expected,
                    b_k_i.dim()
                ));
            }
        }

        Ok(())
    }

    /// Set `log_n_k` and `log_n_i` from a histogram of counts
    ///
    /// `n_k_i[k, i]` is the number of samples from thermodynamic state `k` that fell in bin `i`.
    pub fn counts(&mut self, n_k_i: &Array2<f64>) -> &mut Self {
        self.log_n_k = Some(n_k_i.sum_axis(Axis(1)).mapv(f64::ln));
        self.log_n_i = Some(n_k_i.sum_axis(Axis(0)).mapv(f64::ln));
        self
    }

    /// Build and initialise the WHAM estimator
    pub fn build(&self) -> Result<Wham> {
        self.build_inner()?.init()
    }
}

impl Wham {
    /// Lay out the arrays contiguously and check the initial guess; called by build methods
    fn init(mut self) -> Result<Self> {
        if self.log_n_k.as_slice().is_none() {
            self.log_n_k = Array1::from(self.log_n_k.to_vec());
        }
        if self.log_n_i.as_slice().is_none() {
            self.log_n_i = Array1::from(self.log_n_i.to_vec());
        }
        if !self.b_k_i.is_standard_layout() {
            let dim = self.b_k_i.dim();
            self.b_k_i = Array2::from_shape_vec(dim, self.b_k_i.iter().copied().collect())?;
        }

        if let InitialFreeEnergies::Specified(energies) = &self.initial_free_energies {
            if energies.len() != self.n_therm_states() {
                return Err(WhamError::ArrayLengthMismatch(
                    energies.len(),
                    self.n_therm_states(),
                ));
            }
        }

        debug!(
            n_therm_states = self.n_therm_states(),
            n_markov_states = self.n_markov_states(),
            parallel = self.parallel,
            "Built WHAM estimator"
        );
        Ok(self)
    }

    /// Get a new builder for the `Wham` struct. `Wham` can only be constructed via the builder.
    pub fn builder() -> WhamBuilder {
        WhamBuilder::default()
    }

    /// Build a `Wham` from a histogram of counts and a bias matrix of the same shape
    ///
    /// `n_k_i[k, i]` is the number of samples from thermodynamic state `k` that fell in bin `i`,
    /// and `b_k_i[k, i]` is the reduced bias energy of bin `i` in state `k`.
    pub fn from_counts(n_k_i: &Array2<f64>, b_k_i: Array2<f64>) -> Result<Self> {
        if n_k_i.dim() != b_k_i.dim() {
            return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
        }

        Self::builder().counts(n_k_i).b_k_i(b_k_i).build()
    }

    /// $S$, the number of thermodynamic states
    pub fn n_therm_states(&self) -> usize {
        self.log_n_k.len()
    }

    /// $B$, the number of bins (Markov states)
    pub fn n_markov_states(&self) -> usize {
        self.log_n_i.len()
    }

    /// `log_n_k[k]` is the logarithm of the number of samples drawn in thermodynamic state `k`
    pub fn log_n_k(&self) -> &Array1<f64> {
        &self.log_n_k
    }

    /// `log_n_i[i]` is the logarithm of the number of samples that fell in bin `i`
    pub fn log_n_i(&self) -> &Array1<f64> {
        &self.log_n_i
    }

    /// `b_k_i[k, i]` is the reduced bias energy of bin `i` in thermodynamic state `k`
    ///
    /// Always in standard (row-major) layout.
    pub fn b_k_i(&self) -> &Array2<f64> {
        &self.b_k_i
    }

    /// Whether updates run on the rayon thread pool
    pub fn parallel(&self) -> bool {
        self.parallel
    }

    /// A scratch buffer sized for this estimator
    pub fn workspace(&self) -> Workspace {
        Workspace::new(self.n_therm_states(), self.n_markov_states())
    }

    /// The initial guess for the free energies of the thermodynamic states
    pub fn initial_f_k(&self) -> Vec<f64> {
        match &self.initial_free_energies {
            InitialFreeEnergies::Specified(energies) => energies.clone(),
            InitialFreeEnergies::Zeros => vec![0.0; self.n_therm_states()],
        }
    }

    /// Compute the free energies `f_i` of all bins from the free energies `f_k` of the states.
    ///
    /// `workspace` must hold at least `max(n_therm_states, n_markov_states)` entries; see
    /// [`workspace`](Wham::workspace). A parallel estimator gives every worker its own scratch
    /// buffer and ignores `workspace`, which may then be empty.
    pub fn update_f_i(&self, f_k: &[f64], workspace: &mut [f64], f_i: &mut [f64]) -> Result<()> {
        expect_len(f_k.len(), self.n_therm_states())?;
        expect_len(f_i.len(), self.n_markov_states())?;

        if self.parallel {
            kernels::par_update_bin_free_energies(
                self.log_n_k_slice(),
                self.log_n_i_slice(),
                f_k,
                self.b_k_i_slice(),
                f_i,
            );
        } else {
            self.expect_workspace(workspace)?;
            kernels::update_bin_free_energies(
                self.log_n_k_slice(),
                self.log_n_i_slice(),
                f_k,
                self.b_k_i_slice(),
                workspace,
                f_i,
            );
        }

        trace!("Updated {} bin free energies", f_i.len());
        Ok(())
    }

    /// Compute the free energies `f_k` of all states from the free energies `f_i` of the bins.
    ///
    /// `workspace` is used as in [`update_f_i`](Wham::update_f_i).
    pub fn update_f_k(&self, f_i: &[f64], workspace: &mut [f64], f_k: &mut [f64]) -> Result<()> {
        expect_len(f_i.len(), self.n_markov_states())?;
        expect_len(f_k.len(), self.n_therm_states())?;

        if self.parallel {
            kernels::par_update_state_free_energies(f_i, self.b_k_i_slice(), f_k);
        } else {
            self.expect_workspace(workspace)?;
            kernels::update_state_free_energies(f_i, self.b_k_i_slice(), workspace, f_k);
        }

        trace!("Updated {} state free energies", f_k.len());
        Ok(())
    }

    /// Shift the bin free energies `f_i` so that $\sum_i e^{-f_i} = 1$
    pub fn normalize(&self, f_i: &mut [f64], workspace: &mut [f64]) -> Result<()> {
        expect_len(f_i.len(), self.n_markov_states())?;
        self.expect_workspace(workspace)?;

        kernels::normalize_bin_free_energies(f_i, workspace);
        Ok(())
    }

    fn expect_workspace(&self, workspace: &[f64]) -> Result<()> {
        let needed = self.n_therm_states().max(self.n_markov_states());
        if workspace.len() < needed {
            return Err(WhamError::WorkspaceTooSmall(workspace.len(), needed));
        }
        Ok(())
    }

    // init() leaves every array contiguous, so the slice views below always exist

    fn log_n_k_slice(&self) -> &[f64] {
        self.log_n_k
            .as_slice()
            .expect("log_n_k is contiguous after init")
    }

    fn log_n_i_slice(&self) -> &[f64] {
        self.log_n_i
            .as_slice()
            .expect("log_n_i is contiguous after init")
    }

    fn b_k_i_slice(&self) -> &[f64] {
        self.b_k_i
            .as_slice()
            .expect("b_k_i is in standard layout after init")
    }
}

fn expect_len(len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(WhamError::ArrayLengthMismatch(len, expected));
    }
    Ok(())
}
