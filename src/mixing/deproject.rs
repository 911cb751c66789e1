//! C9: builds `P = I - A(A*A)^-1 A*` from the un-modelled ("extra", and
//! optionally the target) columns of the mixing tensor, per (baseline,
//! output channel, correlation) cell, then applies it to the complementary
//! (modelled) columns of the mixing tensor and to the per-direction
//! averaged visibility vector.

use super::MixingTensor;
use ndarray::{Array2, Array4};
use num_complex::Complex64;

pub struct Deprojector {
    /// Indices of directions with no model (the "extra" directions, plus
    /// the target when `ignore_target` is set).
    pub un_modelled_directions: Vec<usize>,
}

impl Deprojector {
    /// Gauss-Jordan inversion with partial pivoting; returns the all-zero
    /// matrix when a pivot is (near-)singular, per the component design's
    /// "treat (A*A)^-1 as zero" rule.
    fn inverse_or_zero(m: &Array2<Complex64>) -> Array2<Complex64> {
        let n = m.nrows();
        let mut a = m.clone();
        let mut inv = Array2::<Complex64>::zeros((n, n));
        for i in 0..n {
            inv[[i, i]] = Complex64::new(1.0, 0.0);
        }

        for col in 0..n {
            let mut pivot_row = col;
            let mut pivot_mag = a[[col, col]].norm();
            for row in (col + 1)..n {
                let mag = a[[row, col]].norm();
                if mag > pivot_mag {
                    pivot_mag = mag;
                    pivot_row = row;
                }
            }
            if pivot_mag < 1e-10 {
                return Array2::<Complex64>::zeros((n, n));
            }
            if pivot_row != col {
                for k in 0..n {
                    a.swap([col, k], [pivot_row, k]);
                    inv.swap([col, k], [pivot_row, k]);
                }
            }
            let pivot = a[[col, col]];
            for k in 0..n {
                a[[col, k]] /= pivot;
                inv[[col, k]] /= pivot;
            }
            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = a[[row, col]];
                if factor.norm() == 0.0 {
                    continue;
                }
                for k in 0..n {
                    let a_col_k = a[[col, k]];
                    a[[row, k]] -= factor * a_col_k;
                    let inv_col_k = inv[[col, k]];
                    inv[[row, k]] -= factor * inv_col_k;
                }
            }
        }
        inv
    }

    fn build_p(&self, mixing: &MixingTensor, corr: usize, chan: usize, bl: usize) -> Array2<Complex64> {
        let n_dir = mixing.n_directions();
        let s = self.un_modelled_directions.len();
        let mut identity = Array2::<Complex64>::zeros((n_dir, n_dir));
        for i in 0..n_dir {
            identity[[i, i]] = Complex64::new(1.0, 0.0);
        }
        if s == 0 {
            return identity;
        }

        let mut a = Array2::<Complex64>::zeros((n_dir, s));
        for (col, &dir) in self.un_modelled_directions.iter().enumerate() {
            for row in 0..n_dir {
                a[[row, col]] = mixing.tensor[[row, dir, corr, chan, bl]];
            }
        }
        let mut ata = Array2::<Complex64>::zeros((s, s));
        for i in 0..s {
            for j in 0..s {
                let mut acc = Complex64::new(0.0, 0.0);
                for row in 0..n_dir {
                    acc += a[[row, i]].conj() * a[[row, j]];
                }
                ata[[i, j]] = acc;
            }
        }
        let ata_inv = Self::inverse_or_zero(&ata);

        // P = I - A * ata_inv * A^H
        let mut p = identity;
        for row in 0..n_dir {
            for col in 0..n_dir {
                let mut acc = Complex64::new(0.0, 0.0);
                for i in 0..s {
                    for j in 0..s {
                        acc += a[[row, i]] * ata_inv[[i, j]] * a[[col, j]].conj();
                    }
                }
                p[[row, col]] -= acc;
            }
        }
        p
    }

    /// Replaces the mixing tensor's modelled columns by `P . M'`.
    pub fn deproject_mixing(&self, mixing: &mut MixingTensor) {
        let (n_dir, _, n_corr, n_chan, n_bl) = mixing.tensor.dim();
        if self.un_modelled_directions.is_empty() {
            return;
        }
        let modelled: Vec<usize> = (0..n_dir)
            .filter(|d| !self.un_modelled_directions.contains(d))
            .collect();

        for bl in 0..n_bl {
            for chan in 0..n_chan {
                for corr in 0..n_corr {
                    let p = self.build_p(mixing, corr, chan, bl);
                    for &col in &modelled {
                        let original: Vec<Complex64> =
                            (0..n_dir).map(|row| mixing.tensor[[row, col, corr, chan, bl]]).collect();
                        for row in 0..n_dir {
                            let mut acc = Complex64::new(0.0, 0.0);
                            for k in 0..n_dir {
                                acc += p[[row, k]] * original[k];
                            }
                            mixing.tensor[[row, col, corr, chan, bl]] = acc;
                        }
                    }
                }
            }
        }
    }

    /// Replaces the per-direction averaged visibility vector `v` (shape
    /// `(n_directions, n_baselines, n_chan, n_corr)`) by `P . v`, using the
    /// same `P` built from the (already-deprojected-or-not, caller's
    /// choice) mixing tensor.
    pub fn deproject_vector(&self, mixing: &MixingTensor, v: &mut Array4<Complex64>) {
        let (n_dir, bl_dim, chan_dim, corr_dim) = v.dim();
        if self.un_modelled_directions.is_empty() {
            return;
        }
        for bl in 0..bl_dim {
            for chan in 0..chan_dim {
                for corr in 0..corr_dim {
                    let p = self.build_p(mixing, corr, chan, bl);
                    let original: Vec<Complex64> =
                        (0..n_dir).map(|d| v[[d, bl, chan, corr]]).collect();
                    for row in 0..n_dir {
                        let mut acc = Complex64::new(0.0, 0.0);
                        for k in 0..n_dir {
                            acc += p[[row, k]] * original[k];
                        }
                        v[[row, bl, chan, corr]] = acc;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixing::MixingMatrixBuilder;
    use approx::assert_relative_eq;

    #[test]
    fn projection_is_idempotent_with_full_rank_extra_columns() {
        let n_dir = 3;
        let mut builder = MixingMatrixBuilder::new(n_dir, 1, 1, 1);
        let phasors = ndarray::Array3::from_shape_fn((n_dir, 1, 1), |(d, _, _)| {
            if d == n_dir - 1 {
                Complex64::new(1.0, 0.0)
            } else {
                Complex64::from_polar(1.0, 0.3 * (d as f64 + 1.0))
            }
        });
        let weights = ndarray::Array3::from_elem((1, 1, 1), 1.0);
        builder.accumulate(&phasors, &weights);
        let mixing = builder.finalize(1);

        let deprojector = Deprojector {
            un_modelled_directions: vec![2],
        };
        let p = deprojector.build_p(&mixing, 0, 0, 0);

        // P * P should equal P to machine tolerance.
        let mut pp = Array2::<Complex64>::zeros((n_dir, n_dir));
        for i in 0..n_dir {
            for j in 0..n_dir {
                let mut acc = Complex64::new(0.0, 0.0);
                for k in 0..n_dir {
                    acc += p[[i, k]] * p[[k, j]];
                }
                pp[[i, j]] = acc;
            }
        }
        for i in 0..n_dir {
            for j in 0..n_dir {
                assert_relative_eq!(pp[[i, j]].re, p[[i, j]].re, epsilon = 1e-8);
                assert_relative_eq!(pp[[i, j]].im, p[[i, j]].im, epsilon = 1e-8);
            }
        }
    }
}
