#![warn(rust_2018_idioms, missing_docs, missing_debug_implementations)]

//! The weighted histogram analysis method (WHAM) for combining binned samples from multiple
//! biased thermodynamic states into unbiased free energies.
//!
//! Samples from $S$ thermodynamic states are histogrammed into $B$ bins (Markov states). With
//! $N_K$ the number of samples from state $K$, $N_i$ the number of samples in bin $i$ and
//! $b_{Ki}$ the reduced bias energy of bin $i$ in state $K$, the free energies solve
//!
//! $$ f_i = \ln \sum_K N_K e^{f_K - b_{Ki}} - \ln N_i, \qquad
//!    f_K = -\ln \sum_i e^{-(b_{Ki} + f_i)}, $$
//!
//! which is usually done by fixed-point iteration. This crate provides the pieces of one
//! iteration; the caller drives the loop and decides on convergence.
//!
//! - [`kernels`] has the raw update routines over flat slices, with a caller-owned [`Workspace`].
//! - [`wham::Wham`] wraps them behind a builder and length checks.
//! - [`lse`] has the log-sum-exp reductions everything is built on.
//! - [`testsystems`] has an analytic umbrella-sampling case with a known answer.
//!
//! ```
//! use wham_rs::testsystems::HarmonicUmbrellas;
//!
//! let testcase = HarmonicUmbrellas::default();
//! let wham = testcase.wham(&[1000.0; 7]).unwrap();
//!
//! let mut workspace = wham.workspace();
//! let mut f_k = wham.initial_f_k();
//! let mut f_i = vec![0.0; wham.n_markov_states()];
//! for _ in 0..500 {
//!     wham.update_f_i(&f_k, &mut workspace, &mut f_i).unwrap();
//!     wham.update_f_k(&f_i, &mut workspace, &mut f_k).unwrap();
//!     wham.normalize(&mut f_i, &mut workspace).unwrap();
//! }
//! ```
//!
//! Please reference the following if you use this code in your research:
//!
//! [1] Kumar S, Rosenberg JM, Bouzida D, Swendsen RH and Kollman PA. The weighted histogram
//! analysis method for free-energy calculations on biomolecules. I. The method. J. Comput. Chem.
//! 13:1011, 1992. <https://doi.org/10.1002/jcc.540130812>

#[macro_use]
extern crate derive_builder;

pub mod errors;
pub mod kernels;
pub mod lse;
pub mod testsystems;
pub mod wham;

#[cfg(feature = "python")]
mod python;

pub use errors::{Result, WhamError};
pub use kernels::{
    normalize_bin_free_energies, update_bin_free_energies, update_state_free_energies, Workspace,
};
pub use wham::{InitialFreeEnergies, Wham, WhamBuilder};
