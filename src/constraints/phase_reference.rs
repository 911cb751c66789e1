//! Subtracts the reference antenna's phase from every antenna, per
//! direction and channel block, so the solution is anchored to a common
//! phase zero-point.

use super::ConstraintApplyResult;
use crate::gain::GainTensor;
use num_complex::Complex64;

#[derive(Clone, Copy, Debug)]
pub struct PhaseReferenceConstraint {
    pub reference_antenna: usize,
}

impl Default for PhaseReferenceConstraint {
    fn default() -> Self {
        Self {
            reference_antenna: 0,
        }
    }
}

impl PhaseReferenceConstraint {
    pub fn apply(&mut self, solutions: &mut GainTensor) -> ConstraintApplyResult {
        let (n_blocks, n_dir, n_ant, n_sub) = solutions.dim();
        if self.reference_antenna >= n_ant {
            return ConstraintApplyResult::STABLE;
        }
        for b in 0..n_blocks {
            for d in 0..n_dir {
                for s in 0..n_sub {
                    let reference = solutions.solutions[[b, d, self.reference_antenna, s]];
                    let ref_phase_xx = reference.xx().arg();
                    let rotation = Complex64::from_polar(1.0, -ref_phase_xx);
                    for a in 0..n_ant {
                        let j = solutions.solutions[[b, d, a, s]];
                        solutions.solutions[[b, d, a, s]] = j.scale_complex(rotation);
                    }
                }
            }
        }
        ConstraintApplyResult::STABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Jones;
    use approx::assert_relative_eq;

    #[test]
    fn reference_antenna_ends_with_zero_phase() {
        let mut solutions = GainTensor::identity(1, 1, 2, 1);
        solutions.solutions[[0, 0, 0, 0]] = Jones::scalar(Complex64::from_polar(1.0, 0.7));
        solutions.solutions[[0, 0, 1, 0]] = Jones::scalar(Complex64::from_polar(1.0, 1.2));
        let mut c = PhaseReferenceConstraint { reference_antenna: 0 };
        c.apply(&mut solutions);
        assert_relative_eq!(solutions.solutions[[0, 0, 0, 0]].xx().arg(), 0.0, epsilon = 1e-9);
    }
}
