//! Re-solve of channel blocks that failed to converge, seeding them from a
//! weighted average of their nearest converged neighbours in channel-block
//! index. Not present in the demixing pipeline this crate is built
//! around; grounded instead on the neighbour-interpolation retry used by
//! direction-independent calibration's per-chanblock solve loop, which
//! generalises naturally to any channel-block-parallel solver here.

use crate::constraints::Constraint;
use crate::gain::GainTensor;
use crate::solve_data::SolveData;

use super::{Solver, SolverResult};

/// Runs `solver` once, then retries any non-converged blocks (seeded from
/// their nearest converged neighbours) until no further block converts or
/// `max_rounds` is exhausted.
pub fn solve_with_retry(
    solver: &mut Solver,
    data: &[SolveData],
    solutions: &mut GainTensor,
    constraints: &mut [Constraint],
    max_rounds: usize,
) -> SolverResult {
    let mut result = solver.run(data, solutions, constraints);

    for _round in 0..max_rounds {
        let failed: Vec<usize> = result
            .block_converged
            .iter()
            .enumerate()
            .filter(|(_, &c)| !c)
            .map(|(b, _)| b)
            .collect();
        if failed.is_empty() {
            break;
        }

        let converged_neighbours: Vec<usize> = result
            .block_converged
            .iter()
            .enumerate()
            .filter(|(_, &c)| c)
            .map(|(b, _)| b)
            .collect();
        if converged_neighbours.is_empty() {
            // Nothing to interpolate from; further rounds cannot help.
            break;
        }

        for &b in &failed {
            let seed = nearest_neighbour_average(&converged_neighbours, b, solutions);
            let (n_dir, n_ant, n_sub) = (
                solutions.dim().1,
                solutions.dim().2,
                solutions.dim().3,
            );
            for d in 0..n_dir {
                for a in 0..n_ant {
                    for s in 0..n_sub {
                        solutions.solutions[[b, d, a, s]] = seed[[d, a, s]];
                    }
                }
            }
        }

        let new_result = solver.run(data, solutions, constraints);
        let improved = new_result
            .block_converged
            .iter()
            .zip(result.block_converged.iter())
            .any(|(new, old)| *new && !*old);
        result = new_result;
        if !improved {
            break;
        }
    }

    result
}

fn nearest_neighbour_average(
    converged: &[usize],
    target: usize,
    solutions: &GainTensor,
) -> ndarray::Array3<crate::math::Jones> {
    let (_, n_dir, n_ant, n_sub) = solutions.dim();
    let mut nearest = converged.to_vec();
    nearest.sort_by_key(|&b| (b as isize - target as isize).unsigned_abs());
    let closest_distance = (nearest[0] as isize - target as isize).unsigned_abs();
    let tied: Vec<usize> = nearest
        .iter()
        .copied()
        .take_while(|&b| (b as isize - target as isize).unsigned_abs() == closest_distance)
        .collect();

    let mut out = ndarray::Array3::from_elem(
        (n_dir, n_ant, n_sub),
        crate::math::Jones::identity(),
    );
    for d in 0..n_dir {
        for a in 0..n_ant {
            for s in 0..n_sub {
                let mut sum = crate::math::Jones::zero();
                for &b in &tied {
                    sum += solutions.solutions[[b, d, a, s]];
                }
                out[[d, a, s]] = sum.scale(1.0 / tied.len() as f64);
            }
        }
    }
    out
}
