//! C8: accumulates weighted inter-direction phase-decorrelation factors
//! across input time samples, averages them in frequency, and expands the
//! upper-triangular accumulator into the full NxN mixing tensor.
//!
//! Callers supply phasors with the convention that the *target* (last)
//! direction's own phasor is identity — this is what makes the "target
//! uses conj(phasor(other)) alone" rule in the component design fall out
//! naturally, with no special-casing in the accumulation loop itself.

use ndarray::{Array4, Array5};
use num_complex::Complex64;

/// Mixing tensor, shape `(n_directions, n_directions, n_corr, n_chan_out,
/// n_baselines)`.
#[derive(Clone, Debug)]
pub struct MixingTensor {
    pub tensor: Array5<Complex64>,
}

impl MixingTensor {
    pub fn n_directions(&self) -> usize {
        self.tensor.dim().0
    }
}

fn pair_index(d0: usize, d1: usize, n_dir: usize) -> usize {
    debug_assert!(d0 < d1);
    d0 * n_dir - d0 * (d0 + 1) / 2 + (d1 - d0 - 1)
}

pub struct MixingMatrixBuilder {
    n_directions: usize,
    n_baselines: usize,
    n_chan_in: usize,
    n_corr: usize,
    /// (pair, baseline, chan_in, corr)
    numerator: Array4<Complex64>,
    weight: Array4<f64>,
}

impl MixingMatrixBuilder {
    pub fn new(n_directions: usize, n_baselines: usize, n_chan_in: usize, n_corr: usize) -> Self {
        let n_pairs = n_directions * (n_directions.saturating_sub(1)) / 2;
        Self {
            n_directions,
            n_baselines,
            n_chan_in,
            n_corr,
            numerator: Array4::zeros((n_pairs, n_baselines, n_chan_in, n_corr)),
            weight: Array4::zeros((n_pairs, n_baselines, n_chan_in, n_corr)),
        }
    }

    /// Accumulates one raw input time sample. `phasors[[d, bl, chan]]` is
    /// direction `d`'s phase-shift factor for that baseline/channel (1 for
    /// the target direction, by convention); `weights[[bl, chan, corr]]` is
    /// already zero wherever the sample is flagged.
    pub fn accumulate(
        &mut self,
        phasors: &ndarray::Array3<Complex64>,
        weights: &ndarray::Array3<f64>,
    ) {
        for d1 in 1..self.n_directions {
            for d0 in 0..d1 {
                let pair = pair_index(d0, d1, self.n_directions);
                for bl in 0..self.n_baselines {
                    for ch in 0..self.n_chan_in {
                        let factor = phasors[[d0, bl, ch]] * phasors[[d1, bl, ch]].conj();
                        for corr in 0..self.n_corr {
                            let w = weights[[bl, ch, corr]];
                            if w <= 0.0 {
                                continue;
                            }
                            self.numerator[[pair, bl, ch, corr]] += factor * w;
                            self.weight[[pair, bl, ch, corr]] += w;
                        }
                    }
                }
            }
        }
    }

    /// Averages the accumulator into `n_chan_out` output channels
    /// (`n_chan_in` must be an integer multiple of `n_chan_out`) and
    /// expands by conjugate symmetry into the full NxN tensor.
    pub fn finalize(&self, n_chan_out: usize) -> MixingTensor {
        let group_size = (self.n_chan_in / n_chan_out.max(1)).max(1);
        let mut tensor = Array5::<Complex64>::zeros((
            self.n_directions,
            self.n_directions,
            self.n_corr,
            n_chan_out,
            self.n_baselines,
        ));

        for d in 0..self.n_directions {
            for corr in 0..self.n_corr {
                for chan_out in 0..n_chan_out {
                    for bl in 0..self.n_baselines {
                        tensor[[d, d, corr, chan_out, bl]] = Complex64::new(1.0, 0.0);
                    }
                }
            }
        }

        for d1 in 1..self.n_directions {
            for d0 in 0..d1 {
                let pair = pair_index(d0, d1, self.n_directions);
                for bl in 0..self.n_baselines {
                    for corr in 0..self.n_corr {
                        for chan_out in 0..n_chan_out {
                            let mut num = Complex64::new(0.0, 0.0);
                            let mut wsum = 0.0;
                            for ch in (chan_out * group_size)..((chan_out + 1) * group_size) {
                                num += self.numerator[[pair, bl, ch, corr]];
                                wsum += self.weight[[pair, bl, ch, corr]];
                            }
                            let mean = if wsum > 0.0 {
                                num / wsum
                            } else {
                                Complex64::new(0.0, 0.0)
                            };
                            tensor[[d0, d1, corr, chan_out, bl]] = mean;
                            tensor[[d1, d0, corr, chan_out, bl]] = mean.conj();
                        }
                    }
                }
            }
        }

        MixingTensor { tensor }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn diagonal_is_identity_and_off_diagonal_is_conjugate_symmetric() {
        let n_dir = 3;
        let n_bl = 2;
        let n_chan_in = 4;
        let n_corr = 1;
        let mut builder = MixingMatrixBuilder::new(n_dir, n_bl, n_chan_in, n_corr);

        let mut phasors = ndarray::Array3::from_elem((n_dir, n_bl, n_chan_in), Complex64::new(1.0, 0.0));
        for bl in 0..n_bl {
            for ch in 0..n_chan_in {
                phasors[[0, bl, ch]] = Complex64::from_polar(1.0, 0.3);
                phasors[[1, bl, ch]] = Complex64::from_polar(1.0, -0.2);
                // direction 2 is the target: phasor stays 1.
            }
        }
        let weights = ndarray::Array3::from_elem((n_bl, n_chan_in, n_corr), 1.0);
        builder.accumulate(&phasors, &weights);

        let mixing = builder.finalize(2);
        for d in 0..n_dir {
            for chan_out in 0..2 {
                for bl in 0..n_bl {
                    let diag = mixing.tensor[[d, d, 0, chan_out, bl]];
                    assert_relative_eq!(diag.re, 1.0, epsilon = 1e-12);
                    assert_relative_eq!(diag.im, 0.0, epsilon = 1e-12);
                }
            }
        }
        let m01 = mixing.tensor[[0, 1, 0, 0, 0]];
        let m10 = mixing.tensor[[1, 0, 0, 0, 0]];
        assert_relative_eq!(m01.re, m10.re, epsilon = 1e-12);
        assert_relative_eq!(m01.im, -m10.im, epsilon = 1e-12);
        assert!(m01.norm() <= 1.0 + 1e-9);
    }

    #[test]
    fn zero_weight_block_emits_identity() {
        let n_dir = 2;
        let builder = MixingMatrixBuilder::new(n_dir, 1, 2, 1);
        let mixing = builder.finalize(1);
        assert_relative_eq!(mixing.tensor[[0, 1, 0, 0, 0]].norm(), 0.0);
        assert_relative_eq!(mixing.tensor[[0, 0, 0, 0, 0]].re, 1.0);
    }
}
