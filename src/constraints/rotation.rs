//! Reduces a full-Jones solution to a physically-motivated
//! (rotation angle, diagonal amplitude) parameterisation: `Rotation`
//! replaces the solution by a pure rotation matrix fit to it, and
//! `RotationDiagonal` additionally keeps the fitted diagonal amplitudes.

use super::ConstraintApplyResult;
use crate::gain::GainTensor;
use crate::math::Jones;
use num_complex::Complex64;

/// Fits `J ~= diag(a, b) * R(theta)` and returns `(theta, a, b)`, using the
/// polar decomposition's rotation angle: `theta = atan2(xy.re - yx.re,
/// xx.re + yy.re)` restricted to the real parts, which is exact for a
/// noiseless pure-rotation input and a stable least-squares-style estimate
/// otherwise.
fn fit_rotation(j: &Jones) -> (f64, f64, f64) {
    let theta = (j.xy().re - j.yx().re).atan2(j.xx().re + j.yy().re);
    let (s, c) = theta.sin_cos();
    // Recover diagonal amplitudes by projecting back onto the fitted
    // rotation basis.
    let a = j.xx().re * c + j.yx().re * s;
    let b = j.yy().re * c - j.xy().re * s;
    (theta, a, b)
}

fn rotation_matrix(theta: f64, a: f64, b: f64) -> Jones {
    let (s, c) = theta.sin_cos();
    Jones::new(
        Complex64::new(a * c, 0.0),
        Complex64::new(-b * s, 0.0),
        Complex64::new(a * s, 0.0),
        Complex64::new(b * c, 0.0),
    )
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RotationConstraint;

impl RotationConstraint {
    pub fn apply(&mut self, solutions: &mut GainTensor) -> ConstraintApplyResult {
        for j in solutions.solutions.iter_mut() {
            let (theta, _a, _b) = fit_rotation(j);
            *j = rotation_matrix(theta, 1.0, 1.0);
        }
        ConstraintApplyResult::STABLE
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RotationDiagonalConstraint;

impl RotationDiagonalConstraint {
    pub fn apply(&mut self, solutions: &mut GainTensor) -> ConstraintApplyResult {
        for j in solutions.solutions.iter_mut() {
            let (theta, a, b) = fit_rotation(j);
            *j = rotation_matrix(theta, a, b);
        }
        ConstraintApplyResult::STABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn pure_rotation_is_recovered_exactly() {
        let theta = 0.4;
        let input = rotation_matrix(theta, 1.0, 1.0);
        let mut solutions = GainTensor::filled(1, 1, 1, 1, input);
        let mut c = RotationConstraint;
        c.apply(&mut solutions);
        let out = solutions.solutions[[0, 0, 0, 0]];
        assert_relative_eq!(out.xx().re, input.xx().re, epsilon = 1e-9);
        assert_relative_eq!(out.xy().re, input.xy().re, epsilon = 1e-9);
    }

    #[test]
    fn rotation_diagonal_recovers_amplitudes() {
        let theta = -0.2;
        let input = rotation_matrix(theta, 2.0, 0.5);
        let mut solutions = GainTensor::filled(1, 1, 1, 1, input);
        let mut c = RotationDiagonalConstraint;
        c.apply(&mut solutions);
        let out = solutions.solutions[[0, 0, 0, 0]];
        assert_relative_eq!(out.xx().re, input.xx().re, epsilon = 1e-9);
        assert_relative_eq!(out.yy().re, input.yy().re, epsilon = 1e-9);
    }
}
