//! Python extension module exposing the WHAM routines over NumPy arrays.
//!
//! Every function takes contiguous `float64` arrays and returns a freshly allocated array, so no
//! scratch buffer crosses the language boundary. Array length mismatches raise `ValueError`.

use crate::errors::WhamError;
use crate::kernels::{self, Workspace};
use numpy::{IntoPyArray, PyArray1, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

impl From<WhamError> for PyErr {
    fn from(err: WhamError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

fn expect_len(len: usize, expected: usize) -> Result<(), WhamError> {
    if len != expected {
        return Err(WhamError::ArrayLengthMismatch(len, expected));
    }
    Ok(())
}

fn contiguous<E: std::fmt::Display>(slice: Result<&[f64], E>) -> PyResult<&[f64]> {
    slice.map_err(|err| PyValueError::new_err(err.to_string()))
}

#[pymodule]
fn wham_rs(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    /// Bin free energies f_i from state free energies f_K
    #[pyfn(m, "wham_fi")]
    fn wham_fi_py<'py>(
        py: Python<'py>,
        log_n_k: PyReadonlyArray1<f64>,
        log_n_i: PyReadonlyArray1<f64>,
        f_k: PyReadonlyArray1<f64>,
        b_k_i: PyReadonlyArray2<f64>,
    ) -> PyResult<&'py PyArray1<f64>> {
        let log_n_k = contiguous(log_n_k.as_slice())?;
        let log_n_i = contiguous(log_n_i.as_slice())?;
        let f_k = contiguous(f_k.as_slice())?;
        let b_k_i = contiguous(b_k_i.as_slice())?;
        let (n_therm_states, n_markov_states) = (log_n_k.len(), log_n_i.len());
        expect_len(f_k.len(), n_therm_states)?;
        expect_len(b_k_i.len(), n_therm_states * n_markov_states)?;
        if n_therm_states == 0 || n_markov_states == 0 {
            return Err(PyValueError::new_err(
                "WHAM needs at least one thermodynamic state and one bin",
            ));
        }

        let mut workspace = Workspace::new(n_therm_states, n_markov_states);
        let mut f_i = vec![0.0; n_markov_states];
        kernels::update_bin_free_energies(log_n_k, log_n_i, f_k, b_k_i, &mut workspace, &mut f_i);
        Ok(f_i.into_pyarray(py))
    }

    /// State free energies f_K from bin free energies f_i
    #[pyfn(m, "wham_fk")]
    fn wham_fk_py<'py>(
        py: Python<'py>,
        f_i: PyReadonlyArray1<f64>,
        b_k_i: PyReadonlyArray2<f64>,
    ) -> PyResult<&'py PyArray1<f64>> {
        let n_therm_states = b_k_i.as_array().dim().0;
        let f_i = contiguous(f_i.as_slice())?;
        let b_k_i = contiguous(b_k_i.as_slice())?;
        let n_markov_states = f_i.len();
        expect_len(b_k_i.len(), n_therm_states * n_markov_states)?;
        if n_therm_states == 0 || n_markov_states == 0 {
            return Err(PyValueError::new_err(
                "WHAM needs at least one thermodynamic state and one bin",
            ));
        }

        let mut workspace = Workspace::new(n_therm_states, n_markov_states);
        let mut f_k = vec![0.0; n_therm_states];
        kernels::update_state_free_energies(f_i, b_k_i, &mut workspace, &mut f_k);
        Ok(f_k.into_pyarray(py))
    }

    /// Shift f_i so that sum(exp(-f_i)) == 1
    #[pyfn(m, "wham_normalize")]
    fn wham_normalize_py<'py>(
        py: Python<'py>,
        f_i: PyReadonlyArray1<f64>,
    ) -> PyResult<&'py PyArray1<f64>> {
        let mut f_i = contiguous(f_i.as_slice())?.to_vec();
        if f_i.is_empty() {
            return Err(PyValueError::new_err("WHAM needs at least one bin"));
        }

        let mut workspace = Workspace::new(0, f_i.len());
        kernels::normalize_bin_free_energies(&mut f_i, &mut workspace);
        Ok(f_i.into_pyarray(py))
    }

    Ok(())
}
