//! Zeroes the off-diagonal entries of a full-Jones solution, the
//! projection that `full_jones` solver tests apply before comparing
//! against a diagonal ground truth.

use super::ConstraintApplyResult;
use crate::gain::GainTensor;
use crate::math::Jones;
use num_complex::Complex64;

#[derive(Clone, Copy, Debug, Default)]
pub struct DiagonalProjectionConstraint;

impl DiagonalProjectionConstraint {
    pub fn apply(&mut self, solutions: &mut GainTensor) -> ConstraintApplyResult {
        let zero = Complex64::new(0.0, 0.0);
        for j in solutions.solutions.iter_mut() {
            *j = Jones::new(j.xx(), zero, zero, j.yy());
        }
        ConstraintApplyResult::STABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn off_diagonal_entries_are_zeroed() {
        let mut solutions = GainTensor::filled(
            1,
            1,
            1,
            1,
            Jones::new(
                Complex64::new(1.0, 0.0),
                Complex64::new(0.3, 0.1),
                Complex64::new(-0.2, 0.4),
                Complex64::new(1.0, 0.0),
            ),
        );
        let mut c = DiagonalProjectionConstraint;
        c.apply(&mut solutions);
        let j = solutions.solutions[[0, 0, 0, 0]];
        assert_relative_eq!(j.xy().norm(), 0.0);
        assert_relative_eq!(j.yx().norm(), 0.0);
    }
}
