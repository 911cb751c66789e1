//! Antenna-group averaging, and its "core constraint" specialisation
//! (grouping every station within a fixed radius of the array centre into
//! one such group).

use super::ConstraintApplyResult;
use crate::gain::GainTensor;
use crate::math::Jones;

#[derive(Clone, Debug)]
pub struct AntennaGroupConstraint {
    /// Each inner vec is a group of antenna indices sharing one averaged
    /// gain; antennas absent from every group are left untouched.
    pub groups: Vec<Vec<usize>>,
}

impl AntennaGroupConstraint {
    pub fn new(groups: Vec<Vec<usize>>) -> Self {
        Self { groups }
    }

    /// The core-constraint specialisation: a single group containing every
    /// antenna within `radius_m` of the array centre. Antenna positions are
    /// resolved upstream (measurement-set metadata is an external
    /// collaborator here); callers pass the already-filtered index list.
    pub fn core(core_antennas: Vec<usize>) -> Self {
        Self {
            groups: vec![core_antennas],
        }
    }

    pub fn apply(&mut self, solutions: &mut GainTensor) -> ConstraintApplyResult {
        let (n_blocks, n_dir, _n_ant, n_sub) = solutions.dim();
        for group in &self.groups {
            if group.len() < 2 {
                continue;
            }
            for b in 0..n_blocks {
                for d in 0..n_dir {
                    for s in 0..n_sub {
                        let mut mean = Jones::zero();
                        for &ant in group {
                            mean += solutions.solutions[[b, d, ant, s]];
                        }
                        mean = mean.scale(1.0 / group.len() as f64);
                        for &ant in group {
                            solutions.solutions[[b, d, ant, s]] = mean;
                        }
                    }
                }
            }
        }
        // Averaging is an exact projection: it is stable the moment it is
        // applied, there is no internal residual to converge.
        ConstraintApplyResult::STABLE
    }
}
