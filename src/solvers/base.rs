//! C4: the iteration driver shared by every solver variant. Parameterised
//! over an `update_fn` that computes one channel block's proposed next
//! iterate (C5 or C6); everything else — damping, the constraint chain,
//! stall/divergence detection, the convergence test — lives here once.

use crate::constraints::{apply_chain, Constraint, ConstraintStatistics};
use crate::gain::GainTensor;
use crate::math::lls::LlsAlgorithm;
use crate::settings::PolarisationMode;
use crate::solve_data::SolveData;
use ndarray::Array3;

use crate::math::Jones;

/// History window used by stall detection: a block is declared stalled
/// when its relative-change history is monotone non-decreasing across
/// this many consecutive iterations.
const STALL_WINDOW: usize = 3;

#[derive(Clone, Debug)]
pub struct SolverConfig {
    pub mode: PolarisationMode,
    pub lls_algorithm: LlsAlgorithm,
    pub max_iterations: usize,
    pub min_iterations: usize,
    pub tolerance: f64,
    pub step_size: f64,
    pub detect_stalling: bool,
    pub flag_unconverged: bool,
    pub flag_diverged_only: bool,
    /// Per-direction sub-interval counts, only consulted by the
    /// direction-iterative family (C6); direction-solve always treats
    /// every direction as having exactly one sub-interval.
    pub solutions_per_direction: Vec<usize>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            mode: PolarisationMode::Scalar,
            lls_algorithm: LlsAlgorithm::Qr,
            max_iterations: crate::constants::DEFAULT_MAX_ITERATIONS,
            min_iterations: 0,
            tolerance: crate::constants::DEFAULT_TOLERANCE,
            step_size: crate::constants::DEFAULT_STEP_SIZE,
            detect_stalling: true,
            flag_unconverged: false,
            flag_diverged_only: false,
            solutions_per_direction: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SolverResult {
    pub iterations: usize,
    pub converged: bool,
    pub constraint_statistics: ConstraintStatistics,
    /// Per-channel-block convergence, consulted by the retry-by-
    /// interpolation pass ([`crate::solvers::retry`]).
    pub block_converged: Vec<bool>,
}

/// Per-channel-block proposal returned by a C5/C6 update step. `None`
/// signals the chosen LLS method detected rank deficiency for this block.
pub type BlockProposal = Option<Array3<Jones>>;

/// Runs the shared SolverBase loop (§4.4) to completion.
///
/// `update_fn(data, solutions, block_index, config) -> BlockProposal` computes
/// the proposed next iterate for one channel block, reading the *current*
/// full solution tensor (so it can see other directions'/antennas' current
/// gains) but only returning the `(direction, antenna, sub_interval)` slab
/// for its own block.
pub fn run<F>(
    data: &[SolveData],
    solutions: &mut GainTensor,
    config: &SolverConfig,
    constraints: &mut [Constraint],
    mut update_fn: F,
) -> SolverResult
where
    F: FnMut(&SolveData, &GainTensor, usize, &SolverConfig) -> BlockProposal,
{
    let n_blocks = data.len();
    let mut history: Vec<Vec<f64>> = vec![Vec::new(); n_blocks];
    let mut block_converged = vec![false; n_blocks];
    let mut block_diverged = vec![false; n_blocks];
    let mut stats = ConstraintStatistics::default();
    let mut iterations = 0usize;

    loop {
        iterations += 1;
        let previous = solutions.clone();

        for (b, block_data) in data.iter().enumerate() {
            if block_diverged[b] || block_converged[b] {
                continue;
            }
            match update_fn(block_data, &previous, b, config) {
                Some(proposed) => {
                    let (n_dir, n_ant, n_sub) = proposed.dim();
                    for d in 0..n_dir {
                        for a in 0..n_ant {
                            for s in 0..n_sub {
                                let old = previous.solutions[[b, d, a, s]];
                                let prop = proposed[[d, a, s]];
                                solutions.solutions[[b, d, a, s]] =
                                    old.damped_update(&prop, config.step_size);
                            }
                        }
                    }
                }
                None => {
                    block_diverged[b] = true;
                    log::warn!("solver: channel block {b} reported rank deficiency at iteration {iterations}");
                }
            }
        }

        let all_stable = apply_chain(constraints, solutions, iterations, &mut stats);

        for b in 0..n_blocks {
            if block_diverged[b] || block_converged[b] {
                continue;
            }
            let rel = solutions.block_relative_change_from(&previous, b);
            history[b].push(rel);

            if config.detect_stalling && history[b].len() >= STALL_WINDOW {
                let window = &history[b][history[b].len() - STALL_WINDOW..];
                if window.windows(2).all(|w| w[1] >= w[0] - 1e-15) {
                    block_diverged[b] = true;
                    log::warn!("solver: channel block {b} stalled at iteration {iterations}");
                    continue;
                }
            }

            if rel < config.tolerance && all_stable && iterations >= config.min_iterations {
                block_converged[b] = true;
            }
        }

        let all_done = (0..n_blocks).all(|b| block_converged[b] || block_diverged[b]);
        if all_done || iterations >= config.max_iterations + 1 {
            break;
        }
    }

    for b in 0..n_blocks {
        if block_diverged[b] && (config.flag_unconverged || config.flag_diverged_only) {
            solutions.fill_block_nan(b);
        }
    }

    let converged = (0..n_blocks).all(|b| block_converged[b]);
    if !converged {
        log::info!(
            "solver: {}/{n_blocks} channel blocks converged after {iterations} iterations",
            block_converged.iter().filter(|c| **c).count()
        );
    }

    SolverResult {
        iterations,
        converged,
        constraint_statistics: stats,
        block_converged,
    }
}
