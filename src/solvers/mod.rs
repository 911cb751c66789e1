pub mod base;
pub mod direction_iterative;
pub mod direction_solve;
pub mod hybrid;
pub mod retry;

pub use base::{SolverConfig, SolverResult};
pub use hybrid::HybridChild;

use crate::constraints::Constraint;
use crate::gain::GainTensor;
use crate::solve_data::SolveData;

/// The solver family, modelled as a sealed variant rather than a trait
/// object: `Solve(data, solutions, constraints) -> result` is the whole
/// shared contract, and dispatch stays a flat `match` for cache locality.
#[derive(Clone, Debug)]
pub enum Solver {
    DirectionSolve(SolverConfig),
    DirectionIterative(SolverConfig),
}

impl Solver {
    pub fn config(&self) -> &SolverConfig {
        match self {
            Solver::DirectionSolve(c) | Solver::DirectionIterative(c) => c,
        }
    }

    pub fn config_mut(&mut self) -> &mut SolverConfig {
        match self {
            Solver::DirectionSolve(c) | Solver::DirectionIterative(c) => c,
        }
    }

    pub fn run(
        &mut self,
        data: &[SolveData],
        solutions: &mut GainTensor,
        constraints: &mut [Constraint],
    ) -> SolverResult {
        match self {
            Solver::DirectionSolve(config) => {
                base::run(data, solutions, config, constraints, |d, s, b, c| {
                    direction_solve::compute_update(d, s, b, c)
                })
            }
            Solver::DirectionIterative(config) => {
                base::run(data, solutions, config, constraints, |d, s, b, c| {
                    direction_iterative::compute_update(d, s, b, c)
                })
            }
        }
    }
}
