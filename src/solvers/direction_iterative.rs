//! C6: direction-iterative family. Coordinate descent over directions:
//! for each direction, subtracts every other direction's current
//! contribution from the observed data, then solves a single-unknown
//! closed-form least-squares step per antenna (no C3 needed — the normal
//! equation for one complex unknown has a direct solution). Supports
//! per-direction sub-intervals (`solutions_per_direction`), each using
//! only the samples that fall inside it.

use crate::gain::GainTensor;
use crate::math::Jones;
use crate::settings::PolarisationMode;
use crate::solve_data::SolveData;
use ndarray::Array3;
use num_complex::Complex64;

use super::base::{BlockProposal, SolverConfig};

fn correlations_for_mode(mode: PolarisationMode) -> &'static [usize] {
    match mode {
        PolarisationMode::Scalar => &[0],
        PolarisationMode::Diagonal => &[0, 3],
        PolarisationMode::FullJones => &[0, 1, 2, 3],
    }
}

/// Floor-division sub-interval boundaries for `n_time` samples split into
/// `n_sub` sub-intervals; any remainder is folded into the final
/// sub-interval (Open Question (b)).
fn sub_interval_of(time: usize, n_time: usize, n_sub: usize) -> usize {
    if n_sub <= 1 {
        return 0;
    }
    let len = (n_time / n_sub).max(1);
    (time / len).min(n_sub - 1)
}

pub fn compute_update(
    data: &SolveData,
    solutions: &GainTensor,
    block: usize,
    config: &SolverConfig,
) -> BlockProposal {
    let n_dir = data.n_directions;
    let n_ant = data.n_antennas;
    let n_sub = solutions.dim().3;
    let correlations = correlations_for_mode(config.mode);

    // Per-direction sub-interval count; defaults to 1 when unset or out of
    // range, and is clamped to the tensor's allocated sub axis length.
    let sub_count = |d: usize| -> usize {
        config
            .solutions_per_direction
            .get(d)
            .copied()
            .unwrap_or(1)
            .clamp(1, n_sub)
    };

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

    let mut proposal = Array3::from_elem((n_dir, n_ant, n_sub), Jones::identity());
    // Seed with current values; each (direction, sub_interval) slot below
    // overwrites only what it actually touches.
    for d in 0..n_dir {
        for a in 0..n_ant {
            for s in 0..n_sub {
                proposal[[d, a, s]] = solutions.solutions[[block, d, a, s]];
            }
        }
    }

    for d in 0..n_dir {
        for ant in 0..n_ant {
            let rows = &adjacency[ant];
            if rows.is_empty() {
                continue;
            }

            let d_sub_count = sub_count(d);
            for s in 0..d_sub_count {
                let mut per_corr = [None; 4];
                for &corr in correlations {
                    let mut numerator = Complex64::new(0.0, 0.0);
                    let mut denominator = 0.0f64;

                    for &(row, sample, is_ant1) in rows {
                        let time = data.sample_time(sample);
                        if sub_interval_of(time, data.n_time, d_sub_count) != s {
                            continue;
                        }
                        let bl = data.baselines[row];
                        let other = if is_ant1 { bl.antenna2 } else { bl.antenna1 };
                        let weight = data.weights[[row, sample]];

                        let mut residual = data.observed[[row, sample]].as_slice()[corr];
                        for d_other in 0..n_dir {
                            if d_other == d {
                                continue;
                            }
                            let s_other = sub_interval_of(time, data.n_time, sub_count(d_other));
                            let g_a = solutions.solutions[[block, d_other, ant, s_other]]
                                .as_slice()[corr];
                            let g_b = solutions.solutions[[block, d_other, other, s_other]]
                                .as_slice()[corr];
                            let m = data.model[[d_other, row, sample]].as_slice()[corr];
                            let contribution = if is_ant1 {
                                g_a * m * g_b.conj()
                            } else {
                                g_b * m * g_a.conj()
                            };
                            residual -= contribution;
                        }

                        let g_other = solutions.solutions[[block, d, other, s]].as_slice()[corr];
                        let model = data.model[[d, row, sample]].as_slice()[corr];
                        let coeff = if is_ant1 {
                            model * g_other.conj()
                        } else {
                            (model * g_other).conj()
                        };
                        let rhs = if is_ant1 { residual } else { residual.conj() };

                        numerator += coeff.conj() * rhs * weight;
                        denominator += coeff.norm_sqr() * weight;
                    }

                    if denominator > 1e-300 {
                        per_corr[corr] = Some(numerator / denominator);
                    }
                }

                let previous = solutions.solutions[[block, d, ant, s]];
                let mut entries = [Complex64::new(0.0, 0.0); 4];
                for corr in 0..4 {
                    entries[corr] = per_corr[corr].unwrap_or(previous.as_slice()[corr]);
                }
                proposal[[d, ant, s]] = Jones::from(entries);
            }
        }
    }

    Some(proposal)
}
