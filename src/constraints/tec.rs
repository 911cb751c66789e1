//! Fits a `1/frequency` phase curve (dispersive delay through the
//! ionosphere, "TEC") across channel blocks for each antenna, optionally
//! with an additive constant phase, and replaces the per-channel-block
//! phase by the fitted model. Closed-form (ordinary least squares on
//! `phase(freq) ~= -K * tec / freq [+ phase0]`); no phase unwrapping is
//! attempted, a pragmatic simplification valid while the true phase slope
//! across the band stays within one cycle.

use super::{ConstraintApplyResult, ConstraintStatistics};
use crate::gain::GainTensor;
use num_complex::Complex64;

/// The standard ionospheric dispersion constant (rad * Hz / TECU),
/// matching DP3's TEC constraint.
pub const TEC_DISPERSION_CONSTANT: f64 = -8.4479745e9;

#[derive(Clone, Debug)]
pub struct TecConstraint {
    pub channel_block_frequencies_hz: Vec<f64>,
}

impl TecConstraint {
    pub fn apply(
        &mut self,
        solutions: &mut GainTensor,
        stats: &mut ConstraintStatistics,
    ) -> ConstraintApplyResult {
        fit_and_replace(solutions, &self.channel_block_frequencies_hz, false, stats)
    }
}

#[derive(Clone, Debug)]
pub struct TecPhaseConstraint {
    pub channel_block_frequencies_hz: Vec<f64>,
}

impl TecPhaseConstraint {
    pub fn apply(
        &mut self,
        solutions: &mut GainTensor,
        stats: &mut ConstraintStatistics,
    ) -> ConstraintApplyResult {
        fit_and_replace(solutions, &self.channel_block_frequencies_hz, true, stats)
    }
}

fn fit_and_replace(
    solutions: &mut GainTensor,
    frequencies_hz: &[f64],
    fit_phase_offset: bool,
    stats: &mut ConstraintStatistics,
) -> ConstraintApplyResult {
    let (n_blocks, n_dir, n_ant, n_sub) = solutions.dim();
    if n_blocks != frequencies_hz.len() || n_blocks == 0 {
        return ConstraintApplyResult::STABLE;
    }

    let mut fitted_tecs = Vec::with_capacity(n_dir * n_ant * n_sub);
    for d in 0..n_dir {
        for a in 0..n_ant {
            for s in 0..n_sub {
                let phases: Vec<f64> = (0..n_blocks)
                    .map(|b| solutions.solutions[[b, d, a, s]].xx().arg())
                    .collect();
                let (tec, phase0) = fit_tec(frequencies_hz, &phases, fit_phase_offset);
                fitted_tecs.push(tec);
                for (b, &freq) in frequencies_hz.iter().enumerate() {
                    let model_phase = TEC_DISPERSION_CONSTANT * tec / freq + phase0;
                    let old = solutions.solutions[[b, d, a, s]];
                    let amp_xx = old.xx().norm();
                    let amp_yy = old.yy().norm();
                    solutions.solutions[[b, d, a, s]] = crate::math::Jones::diagonal(
                        Complex64::from_polar(amp_xx, model_phase),
                        Complex64::from_polar(amp_yy, model_phase),
                    );
                }
            }
        }
    }
    stats.record("tec", fitted_tecs);
    ConstraintApplyResult::STABLE
}

/// Ordinary least squares fit of `phase ~= K * tec / freq [+ phase0]`.
fn fit_tec(frequencies_hz: &[f64], phases: &[f64], fit_phase_offset: bool) -> (f64, f64) {
    let x: Vec<f64> = frequencies_hz.iter().map(|f| 1.0 / f).collect();
    let n = x.len() as f64;

    if !fit_phase_offset {
        let sum_xy: f64 = x.iter().zip(phases).map(|(xi, yi)| xi * yi).sum();
        let sum_xx: f64 = x.iter().map(|xi| xi * xi).sum();
        let tec = if sum_xx > 0.0 {
            sum_xy / (sum_xx * TEC_DISPERSION_CONSTANT)
        } else {
            0.0
        };
        return (tec, 0.0);
    }

    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = phases.iter().sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (xi, yi) in x.iter().zip(phases) {
        sxx += (xi - mean_x) * (xi - mean_x);
        sxy += (xi - mean_x) * (yi - mean_y);
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let tec = slope / TEC_DISPERSION_CONSTANT;
    let phase0 = mean_y - slope * mean_x;
    (tec, phase0)
}
