use anyhow::Result;
use itertools::izip;
use ndarray::Array1;
use wham_rs::testsystems::*;

/// Largest absolute elementwise difference
fn max_change(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // Nine umbrellas across a double well with a 3 kT barrier
    let testcase = HarmonicUmbrellas::builder()
        .o_k(Array1::linspace(-2.0, 2.0, 9))
        .k_k(Array1::from_elem(9, 15.0))
        .x_i(Array1::linspace(-2.0, 2.0, 41))
        .barrier(3.0)
        .build()?;

    let n_k = vec![500.0; testcase.n_therm_states()];
    let wham = testcase.wham(&n_k)?;

    let tolerance = 1.0e-10;
    let maximum_iterations = 100_000;

    let mut workspace = wham.workspace();
    let mut f_k = wham.initial_f_k();
    let mut f_i = vec![0.0; wham.n_markov_states()];
    let mut previous = f_i.clone();
    let mut iterations = 0;
    while iterations < maximum_iterations {
        wham.update_f_i(&f_k, &mut workspace, &mut f_i)?;
        wham.update_f_k(&f_i, &mut workspace, &mut f_k)?;
        wham.normalize(&mut f_i, &mut workspace)?;
        iterations += 1;

        if max_change(&f_i, &previous) < tolerance {
            break;
        }
        previous.copy_from_slice(&f_i);
    }

    println!("Converged after {} iterations", iterations);
    println!("{:>8} {:>12} {:>12}", "x", "f_i", "exact");
    let exact_f_i = testcase.f_i();
    for (x, f, exact) in izip!(testcase.x_i(), &f_i, &exact_f_i) {
        println!("{:>8.3} {:>12.6} {:>12.6}", x, f, exact);
    }

    Ok(())
}
