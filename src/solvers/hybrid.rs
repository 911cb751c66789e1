//! C7: runs a sequence of child solvers, each feeding its resulting gains
//! forward as the next child's initial guess. Reports the sum of the
//! children's iteration counts and the last child's convergence flag.

use crate::constraints::{Constraint, ConstraintStatistics};
use crate::gain::GainTensor;
use crate::solve_data::SolveData;

use super::base::SolverResult;
use super::Solver;

#[derive(Clone, Debug)]
pub struct HybridChild {
    pub solver: Solver,
    pub constraints: Vec<Constraint>,
}

pub fn run(
    children: &mut [HybridChild],
    data: &[SolveData],
    solutions: &mut GainTensor,
) -> SolverResult {
    let mut total_iterations = 0;
    let mut last_converged = false;
    let mut last_block_converged = vec![false; data.len()];
    let mut combined_stats = ConstraintStatistics::default();

    for child in children.iter_mut() {
        let result = child.solver.run(data, solutions, &mut child.constraints);
        total_iterations += result.iterations;
        last_converged = result.converged;
        last_block_converged = result.block_converged;
        for (label, values) in result.constraint_statistics.entries() {
            combined_stats.record(label.clone(), values.clone());
        }
    }

    SolverResult {
        iterations: total_iterations,
        converged: last_converged,
        constraint_statistics: combined_stats,
        block_converged: last_block_converged,
    }
}
