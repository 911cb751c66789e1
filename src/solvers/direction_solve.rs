//! C5: direction-solve family. For each antenna, stacks one linear system
//! across every baseline that touches it and every direction, fixing the
//! "other" antenna's current gain estimate, and solves it with the
//! configured LLS back-end (C3).
//!
//! Correlations are solved independently of one another (see
//! [`crate::math::Jones::sandwich_corrwise`]); scalar/diagonal modes only
//! ever populate the XX/YY correlations, so only those are solved.

use crate::gain::GainTensor;
use crate::math::lls::{self, LlsOutcome};
use crate::math::Jones;
use crate::settings::PolarisationMode;
use crate::solve_data::SolveData;
use ndarray::{Array1, Array2, Array3};
use num_complex::Complex64;

use super::base::{BlockProposal, SolverConfig};

fn correlations_for_mode(mode: PolarisationMode) -> &'static [usize] {
    match mode {
        PolarisationMode::Scalar => &[0],
        PolarisationMode::Diagonal => &[0, 3],
        PolarisationMode::FullJones => &[0, 1, 2, 3],
    }
}

/// Computes one channel block's proposed next iterate.
pub fn compute_update(
    data: &SolveData,
    solutions: &GainTensor,
    block: usize,
    config: &SolverConfig,
) -> BlockProposal {
    let n_dir = data.n_directions;
    let n_ant = data.n_antennas;
    let correlations = correlations_for_mode(config.mode);

    // antenna -> list of (baseline_row, sample, is_ant1)
    let mut adjacency: Vec<Vec<(usize, usize, bool)>> = vec![Vec::new(); n_ant];
    for (row, bl) in data.baselines.iter().enumerate() {
        for sample in 0..data.n_samples {
            if data.weights[[row, sample]] <= 0.0 {
                continue;
            }
            adjacency[bl.antenna1].push((row, sample, true));
            adjacency[bl.antenna2].push((row, sample, false));
        }
    }

    let mut proposal = Array3::from_elem((n_dir, n_ant, 1), Jones::identity());

    for ant in 0..n_ant {
        let rows = &adjacency[ant];
        if rows.is_empty() {
            // No unflagged data touches this antenna in this block; leave
            // its current gain untouched.
            for d in 0..n_dir {
                proposal[[d, ant, 0]] = solutions.solutions[[block, d, ant, 0]];
            }
            continue;
        }

        let mut per_corr_solution: [Option<Array1<Complex64>>; 4] = [None, None, None, None];
        for &corr in correlations {
            let n_eq = rows.len();
            let mut a = Array2::<Complex64>::zeros((n_eq, n_dir));
            let mut b = Array1::<Complex64>::zeros(n_eq);

            for (eq, &(row, sample, is_ant1)) in rows.iter().enumerate() {
                let bl = data.baselines[row];
                let other = if is_ant1 { bl.antenna2 } else { bl.antenna1 };
                let weight = data.weights[[row, sample]].sqrt();
                let obs = data.observed[[row, sample]].as_slice()[corr];

                for d in 0..n_dir {
                    let model = data.model[[d, row, sample]].as_slice()[corr];
                    let other_gain = solutions.solutions[[block, d, other, 0]].as_slice()[corr];
                    let coeff = if is_ant1 {
                        model * other_gain.conj()
                    } else {
                        // V = g1 * m * conj(g2); conjugate both sides to
                        // linearise in g2: conj(V) = conj(g1*m) * g2.
                        (model * other_gain).conj()
                    };
                    a[[eq, d]] = coeff * weight;
                }
                b[eq] = if is_ant1 { obs * weight } else { obs.conj() * weight };
            }

            match lls::solve(config.lls_algorithm, a.view(), b.view()) {
                LlsOutcome::Solved(x) => {
                    per_corr_solution[corr] = Some(x);
                }
                LlsOutcome::RankDeficient => return None,
            }
        }

        for d in 0..n_dir {
            let mut entries = [Complex64::new(0.0, 0.0); 4];
            let previous = solutions.solutions[[block, d, ant, 0]];
            for corr in 0..4 {
                entries[corr] = match &per_corr_solution[corr] {
                    Some(x) => x[d],
                    None => previous.as_slice()[corr],
                };
            }
            proposal[[d, ant, 0]] = Jones::from(entries);
        }
    }

    Some(proposal)
}
