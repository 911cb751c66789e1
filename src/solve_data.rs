//! C1: a per-channel-block, read-only view of observed and model
//! visibilities handed to a solver. Baselines with no unflagged samples in
//! a given block are dropped from that block's view.

use crate::constants::NUM_POLARISATIONS;
use crate::error::SolveError;
use crate::math::Jones;
use ndarray::{s, Array2, Array3, ArrayView4, ArrayView5};

/// One compacted baseline inside a [`SolveData`] view: the antenna pair
/// plus its row index into `observed`/`model`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Baseline {
    pub antenna1: usize,
    pub antenna2: usize,
}

#[derive(Debug)]
pub struct SolveData {
    pub n_antennas: usize,
    pub n_directions: usize,
    pub baselines: Vec<Baseline>,
    /// channel indices (into the original buffer) covered by this block.
    pub channel_range: std::ops::Range<usize>,
    /// (baseline, sample) -> observed Jones matrix, sample = time*n_chan+chan
    /// flattened over this block's channel range.
    pub observed: Array2<Jones>,
    /// (baseline, sample) -> non-negative weight (already folded with the
    /// flag: weight is 0 wherever flagged).
    pub weights: Array2<f64>,
    /// (direction, baseline, sample) -> model Jones matrix.
    pub model: Array3<Jones>,
    pub n_samples: usize,
    pub n_time: usize,
    pub n_channels: usize,
}

impl SolveData {
    /// The time-slot index (within this block) that `sample` belongs to.
    pub fn sample_time(&self, sample: usize) -> usize {
        sample / self.n_channels
    }

    /// Partition a full-resolution buffer into `n_channel_blocks` views,
    /// dividing channels as evenly as possible (remainder channels go to
    /// the first blocks, one extra channel each).
    pub fn build(
        n_channel_blocks: usize,
        n_antennas: usize,
        antenna1: &[usize],
        antenna2: &[usize],
        observed: ArrayView4<num_complex::Complex64>,
        weights: ArrayView4<f64>,
        flags: ArrayView4<bool>,
        model: ArrayView5<num_complex::Complex64>,
    ) -> Result<Vec<SolveData>, SolveError> {
        let n_baselines = antenna1.len();
        if antenna2.len() != n_baselines {
            return Err(SolveError::ModelVisibilityCountMismatch {
                n_vis: antenna1.len(),
                n_model: antenna2.len(),
            });
        }
        for &a in antenna1.iter().chain(antenna2.iter()) {
            if a >= n_antennas {
                return Err(SolveError::AntennaIndexOutOfRange {
                    index: a,
                    n_antennas,
                });
            }
        }
        let (obs_bl, n_time, n_chan, n_corr) = observed.dim();
        if obs_bl != n_baselines {
            return Err(SolveError::ModelVisibilityCountMismatch {
                n_vis: obs_bl,
                n_model: n_baselines,
            });
        }
        if n_corr != NUM_POLARISATIONS {
            return Err(SolveError::ModelVisibilityCountMismatch {
                n_vis: n_corr,
                n_model: NUM_POLARISATIONS,
            });
        }
        let n_directions = model.dim().0;
        if n_directions == 0 {
            return Err(SolveError::NoDirections);
        }

        let boundaries = channel_block_boundaries(n_chan, n_channel_blocks);
        let mut blocks = Vec::with_capacity(boundaries.len());
        for range in boundaries {
            blocks.push(build_one_block(
                range, n_antennas, antenna1, antenna2, observed, weights, flags, model, n_time,
                n_directions,
            ));
        }
        Ok(blocks)
    }
}

/// Divides `n_chan` channels into `n_blocks` contiguous runs as evenly as
/// possible; the first `n_chan % n_blocks` blocks get one extra channel.
fn channel_block_boundaries(n_chan: usize, n_blocks: usize) -> Vec<std::ops::Range<usize>> {
    let n_blocks = n_blocks.max(1);
    let base = n_chan / n_blocks;
    let remainder = n_chan % n_blocks;
    let mut ranges = Vec::with_capacity(n_blocks);
    let mut start = 0;
    for b in 0..n_blocks {
        let len = base + if b < remainder { 1 } else { 0 };
        ranges.push(start..(start + len));
        start += len;
    }
    ranges
}

#[allow(clippy::too_many_arguments)]
fn build_one_block(
    channel_range: std::ops::Range<usize>,
    n_antennas: usize,
    antenna1: &[usize],
    antenna2: &[usize],
    observed: ArrayView4<num_complex::Complex64>,
    weights: ArrayView4<f64>,
    flags: ArrayView4<bool>,
    model: ArrayView5<num_complex::Complex64>,
    n_time: usize,
    n_directions: usize,
) -> SolveData {
    let n_chan_block = channel_range.len();
    let n_samples = n_time * n_chan_block;
    let n_baselines = antenna1.len();

    let mut kept_baselines = Vec::new();
    let mut kept_rows = Vec::new();
    for bl in 0..n_baselines {
        let mut any_weight = false;
        'outer: for t in 0..n_time {
            for c in channel_range.clone() {
                for p in 0..NUM_POLARISATIONS {
                    if !flags[[bl, t, c, p]] && weights[[bl, t, c, p]] > 0.0 {
                        any_weight = true;
                        break 'outer;
                    }
                }
            }
        }
        if any_weight {
            kept_baselines.push(Baseline {
                antenna1: antenna1[bl],
                antenna2: antenna2[bl],
            });
            kept_rows.push(bl);
        }
    }

    let n_kept = kept_rows.len();
    let mut obs_out = Array2::from_elem((n_kept, n_samples), Jones::zero());
    let mut weight_out = Array2::<f64>::zeros((n_kept, n_samples));
    let mut model_out = Array3::from_elem((n_directions, n_kept, n_samples), Jones::zero());

    for (out_bl, &bl) in kept_rows.iter().enumerate() {
        for t in 0..n_time {
            for (local_c, c) in channel_range.clone().enumerate() {
                let sample = t * n_chan_block + local_c;
                let mut jones = [num_complex::Complex64::new(0.0, 0.0); 4];
                let mut w: f64 = 0.0;
                for p in 0..NUM_POLARISATIONS {
                    let flagged = flags[[bl, t, c, p]];
                    let weight = if flagged { 0.0 } else { weights[[bl, t, c, p]] };
                    jones[p] = observed[[bl, t, c, p]];
                    w = w.max(weight);
                }
                obs_out[[out_bl, sample]] = Jones::from(jones);
                weight_out[[out_bl, sample]] = w;

                for d in 0..n_directions {
                    let mut mjones = [num_complex::Complex64::new(0.0, 0.0); 4];
                    for p in 0..NUM_POLARISATIONS {
                        mjones[p] = model[[d, bl, t, c, p]];
                    }
                    model_out[[d, out_bl, sample]] = Jones::from(mjones);
                }
            }
        }
    }

    SolveData {
        n_antennas,
        n_directions,
        baselines: kept_baselines,
        channel_range,
        observed: obs_out,
        weights: weight_out,
        model: model_out,
        n_samples,
        n_time,
        n_channels: n_chan_block,
    }
}
