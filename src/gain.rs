//! The gain/solution tensor shared by the solver family and the constraint
//! chain: one [`crate::math::Jones`] per (channel block, direction,
//! antenna, sub-interval). The full channel-block axis is kept together
//! (rather than solved as independent per-block tensors) because some
//! constraints, notably the frequency-smoothness kernel, operate across
//! channel blocks; only the per-block *update* step (C5/C6) is
//! independent and thus parallelisable.

use crate::math::Jones;
use ndarray::Array4;

#[derive(Clone, Debug)]
pub struct GainTensor {
    /// (channel_block, direction, antenna, sub_interval)
    pub solutions: Array4<Jones>,
}

impl GainTensor {
    pub fn identity(
        n_channel_blocks: usize,
        n_directions: usize,
        n_antennas: usize,
        n_sub_intervals: usize,
    ) -> Self {
        Self::filled(
            n_channel_blocks,
            n_directions,
            n_antennas,
            n_sub_intervals,
            Jones::identity(),
        )
    }

    pub fn filled(
        n_channel_blocks: usize,
        n_directions: usize,
        n_antennas: usize,
        n_sub_intervals: usize,
        value: Jones,
    ) -> Self {
        Self {
            solutions: Array4::from_elem(
                (n_channel_blocks, n_directions, n_antennas, n_sub_intervals),
                value,
            ),
        }
    }

    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.solutions.dim()
    }

    pub fn n_channel_blocks(&self) -> usize {
        self.solutions.dim().0
    }

    pub fn block_norm(&self, block: usize) -> f64 {
        self.solutions
            .index_axis(ndarray::Axis(0), block)
            .iter()
            .map(|j| j.norm() * j.norm())
            .sum::<f64>()
            .sqrt()
    }

    /// `||self[block] - other[block]|| / ||other[block]||`, the per-block
    /// relative change used by the convergence test. Zero when the
    /// previous block is exactly zero.
    pub fn block_relative_change_from(&self, previous: &GainTensor, block: usize) -> f64 {
        let new = self.solutions.index_axis(ndarray::Axis(0), block);
        let old = previous.solutions.index_axis(ndarray::Axis(0), block);
        let mut diff_sq = 0.0;
        let mut base_sq = 0.0;
        for (n, o) in new.iter().zip(old.iter()) {
            let d = (*n - *o).norm();
            diff_sq += d * d;
            base_sq += o.norm() * o.norm();
        }
        if base_sq <= 0.0 {
            0.0
        } else {
            (diff_sq / base_sq).sqrt()
        }
    }

    pub fn fill_block_nan(&mut self, block: usize) {
        let nan = num_complex::Complex64::new(f64::NAN, f64::NAN);
        for j in self
            .solutions
            .index_axis_mut(ndarray::Axis(0), block)
            .iter_mut()
        {
            *j = Jones::new(nan, nan, nan, nan);
        }
    }
}
