//! C10: per-chunk orchestration tying the mixing tensor (C8), the
//! deprojector (C9) and the solver family (C4-C7) together into the full
//! phase-shift / solve / subtract pipeline.
//!
//! Sky-model prediction and phase-shift-factor geometry (UVW rotation
//! toward a direction's phase centre) are external collaborators: callers
//! hand in already-simulated model visibilities and already-computed
//! phasors for each raw time/channel sample, the same way [`SolveData`]
//! takes pre-built visibility cubes rather than reading a measurement set.

use ndarray::{Array3, Array4, Array5};
use num_complex::Complex64;
use rayon::prelude::*;

use crate::constraints::Constraint;
use crate::gain::GainTensor;
use crate::math::Jones;
use crate::mixing::{Deprojector, MixingMatrixBuilder, MixingTensor};
use crate::solve_data::SolveData;
use crate::solvers::Solver;

/// One chunk of raw-resolution input: `N_time_chunk * demix_time_step`
/// time slots' worth of visibilities, covering every channel the chunk
/// will solve and subtract over.
pub struct DemixChunk {
    pub n_antennas: usize,
    pub antenna1: Vec<usize>,
    pub antenna2: Vec<usize>,
    /// (baseline, time, chan, corr)
    pub observed: Array4<Complex64>,
    pub weights: Array4<f64>,
    pub flags: Array4<bool>,
    /// (direction, baseline, time, chan, corr); the target direction is
    /// `n_directions - 1`.
    pub model: Array5<Complex64>,
    /// (direction, baseline, time, chan) phase-shift factor toward each
    /// direction's phase centre; the target's own phasor is identity.
    pub phasors: Array4<Complex64>,
    /// Baselines to run the demixing pipeline over; `None` means all of
    /// them. Baselines outside the selection pass the subtract-resolution
    /// average of their observed data straight through, untouched.
    pub selected_baselines: Option<Vec<usize>>,
}

impl DemixChunk {
    pub fn n_directions(&self) -> usize {
        self.model.dim().0
    }

    pub fn n_baselines(&self) -> usize {
        self.antenna1.len()
    }
}

#[derive(Clone, Debug)]
pub struct DemixSettings {
    pub freq_step: usize,
    pub time_step: usize,
    pub demix_freq_step: usize,
    pub demix_time_step: usize,
    pub n_time_chunk: usize,
    pub n_channel_blocks: usize,
    /// Directions with no model that must be projected out of the
    /// subtracted set (the "extra" sources, plus the target when
    /// `ignore_target` is configured upstream).
    pub un_modelled_directions: Vec<usize>,
    pub propagate_solutions: bool,
    pub propagate_converged_only: bool,
    /// Per-direction sub-interval counts (§3 "solutions-per-direction"),
    /// already resolved by [`crate::settings::Settings::resolved_solutions_per_direction`]
    /// to one entry per direction. Empty means every direction gets 1.
    pub solutions_per_direction: Vec<usize>,
}

pub struct DemixOutput {
    /// One residual buffer per subtract-resolution output slot, shape
    /// `(baseline, chan_out, corr)`.
    pub residuals: Vec<Array3<Complex64>>,
    pub solve_results: Vec<crate::solvers::SolverResult>,
}

pub struct Demixer {
    settings: DemixSettings,
    previous_solution: Option<GainTensor>,
}

/// Splits `n` raw indices into contiguous groups of `step` (the last group
/// may be shorter).
fn group_ranges(n: usize, step: usize) -> Vec<std::ops::Range<usize>> {
    let step = step.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < n {
        let end = (start + step).min(n);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

impl Demixer {
    pub fn new(settings: DemixSettings) -> Self {
        Self {
            settings,
            previous_solution: None,
        }
    }

    /// Pads `solutions_per_direction` to `n_directions` entries (missing
    /// entries default to 1, matching [`crate::settings::Settings::resolved_solutions_per_direction`])
    /// and returns, alongside it, the gain tensor's required sub-interval
    /// axis length: the largest per-direction count, since every
    /// direction shares the same tensor axis and only consumes the
    /// leading `sub_count(direction)` slots of it.
    fn resolve_sub_intervals(solutions_per_direction: &[usize], n_directions: usize) -> (Vec<usize>, usize) {
        let mut resolved = solutions_per_direction.to_vec();
        resolved.resize(n_directions, 1);
        let n_sub = resolved.iter().copied().max().unwrap_or(1).max(1);
        (resolved, n_sub)
    }

    /// Weighted average of `data` over a raw time range and a raw channel
    /// range, per (baseline, corr). A group with zero total weight
    /// averages to zero.
    fn average_group(
        data: &Array4<Complex64>,
        weights: &Array4<f64>,
        flags: &Array4<bool>,
        bl: usize,
        time_range: std::ops::Range<usize>,
        chan_range: std::ops::Range<usize>,
        corr: usize,
    ) -> (Complex64, f64) {
        let mut num = Complex64::new(0.0, 0.0);
        let mut wsum = 0.0;
        for t in time_range.clone() {
            for c in chan_range.clone() {
                if flags[[bl, t, c, corr]] {
                    continue;
                }
                let w = weights[[bl, t, c, corr]];
                if w <= 0.0 {
                    continue;
                }
                num += data[[bl, t, c, corr]] * w;
                wsum += w;
            }
        }
        if wsum > 0.0 {
            (num / wsum, wsum)
        } else {
            (Complex64::new(0.0, 0.0), 0.0)
        }
    }

    /// Builds the solve-resolution mixing tensor for one output slot
    /// (a `(time_range, chan_range)` group of raw samples) and deprojects
    /// the un-modelled directions out of it, folding their decorrelation
    /// weight into the remaining directions' columns instead.
    fn solve_slot_mixing(
        &self,
        chunk: &DemixChunk,
        time_range: std::ops::Range<usize>,
        chan_range: std::ops::Range<usize>,
    ) -> MixingTensor {
        let n_dir = chunk.n_directions();
        let n_bl = chunk.n_baselines();
        let n_corr = chunk.observed.dim().3;

        let mut builder = MixingMatrixBuilder::new(n_dir, n_bl, chan_range.len(), n_corr);
        for t in time_range.clone() {
            let phasors = chunk
                .phasors
                .slice(ndarray::s![.., .., t, chan_range.clone()])
                .to_owned();
            let weights = chunk
                .weights
                .slice(ndarray::s![.., t, chan_range.clone(), ..])
                .to_owned();
            builder.accumulate(&phasors, &weights);
        }
        let mut mixing = builder.finalize(1);

        let deprojector = Deprojector {
            un_modelled_directions: self.settings.un_modelled_directions.clone(),
        };
        deprojector.deproject_mixing(&mut mixing);
        mixing
    }

    /// Combines each direction's raw averaged model through the
    /// (deprojected) mixing tensor: `mixed[d] = sum_d' M[d, d'] *
    /// model[d']`. This is how the inter-direction decorrelation the
    /// mixing tensor captures actually reaches the solver, since
    /// [`SolveData`] takes one shared observed array and a per-direction
    /// model rather than the fully coupled per-direction equations the
    /// mixing factors feed in the original formulation.
    fn mix_model(mixing: &MixingTensor, model: &Array5<Complex64>) -> Array5<Complex64> {
        let (n_dir, n_bl, n_time, n_chan, n_corr) = model.dim();
        let mut mixed = Array5::<Complex64>::zeros((n_dir, n_bl, n_time, n_chan, n_corr));
        for d in 0..n_dir {
            for dp in 0..n_dir {
                for bl in 0..n_bl {
                    for corr in 0..n_corr {
                        let weight = mixing.tensor[[d, dp, corr, 0, bl]];
                        if weight == Complex64::new(0.0, 0.0) {
                            continue;
                        }
                        for t in 0..n_time {
                            for c in 0..n_chan {
                                mixed[[d, bl, t, c, corr]] += weight * model[[dp, bl, t, c, corr]];
                            }
                        }
                    }
                }
            }
        }
        mixed
    }

    /// Accumulates the (plain, non-deprojected) subtract-resolution mixing
    /// tensor for one subtract output slot.
    fn subtract_slot_mixing(
        &self,
        chunk: &DemixChunk,
        time_range: std::ops::Range<usize>,
        chan_range: std::ops::Range<usize>,
    ) -> MixingTensor {
        let n_dir = chunk.n_directions();
        let n_bl = chunk.n_baselines();
        let n_corr = chunk.observed.dim().3;
        let mut builder = MixingMatrixBuilder::new(n_dir, n_bl, chan_range.len(), n_corr);
        for t in time_range {
            let phasors = chunk
                .phasors
                .slice(ndarray::s![.., .., t, chan_range.clone()])
                .to_owned();
            let weights = chunk
                .weights
                .slice(ndarray::s![.., t, chan_range.clone(), ..])
                .to_owned();
            builder.accumulate(&phasors, &weights);
        }
        builder.finalize(1)
    }

    /// Averages `chunk.observed`/`chunk.model` over a raw `(time, chan)`
    /// group into one `(baseline, corr)` slice, honouring flags.
    fn average_observed(&self, chunk: &DemixChunk, time_range: std::ops::Range<usize>, chan_range: std::ops::Range<usize>) -> Array3<Complex64> {
        let n_bl = chunk.n_baselines();
        let n_corr = chunk.observed.dim().3;
        let mut out = Array3::<Complex64>::zeros((n_bl, 1, n_corr));
        for bl in 0..n_bl {
            for corr in 0..n_corr {
                let (mean, _) = Self::average_group(&chunk.observed, &chunk.weights, &chunk.flags, bl, time_range.clone(), chan_range.clone(), corr);
                out[[bl, 0, corr]] = mean;
            }
        }
        out
    }

    fn average_model_direction(
        &self,
        chunk: &DemixChunk,
        direction: usize,
        time_range: std::ops::Range<usize>,
        chan_range: std::ops::Range<usize>,
    ) -> Array3<Complex64> {
        let n_bl = chunk.n_baselines();
        let n_corr = chunk.model.dim().4;
        let mut out = Array3::<Complex64>::zeros((n_bl, 1, n_corr));
        for bl in 0..n_bl {
            for corr in 0..n_corr {
                let mut num = Complex64::new(0.0, 0.0);
                let mut wsum = 0.0;
                for t in time_range.clone() {
                    for c in chan_range.clone() {
                        if chunk.flags[[bl, t, c, corr]] {
                            continue;
                        }
                        let w = chunk.weights[[bl, t, c, corr]];
                        if w <= 0.0 {
                            continue;
                        }
                        num += chunk.model[[direction, bl, t, c, corr]] * w;
                        wsum += w;
                    }
                }
                out[[bl, 0, corr]] = if wsum > 0.0 { num / wsum } else { Complex64::new(0.0, 0.0) };
            }
        }
        out
    }

    /// Runs the full per-chunk pipeline described by the component design:
    /// solve-resolution mixing + deprojection, solve-slot calibration,
    /// subtract-resolution subtraction, baseline-selection merge-back.
    pub fn process_chunk(&mut self, chunk: &DemixChunk, solver_template: &Solver, constraints_template: &[Constraint]) -> DemixOutput {
        let n_dir = chunk.n_directions();
        let n_ant = chunk.n_antennas;
        let n_bl = chunk.n_baselines();
        let n_time = chunk.observed.dim().1;
        let n_chan = chunk.observed.dim().2;
        let n_corr = chunk.observed.dim().3;
        let target = n_dir - 1;

        // Each solve-resolution *slot* spans `demix_time_step` raw samples;
        // group the chunk's raw time axis into those slots directly.
        let solve_slots = group_ranges(n_time, self.settings.demix_time_step);

        // Step 2: accumulate + deproject the solve-resolution mixing
        // tensor, one per solve slot (solved over the full chunk bandwidth).
        let solve_mixing: Vec<MixingTensor> = solve_slots
            .iter()
            .map(|slot| self.solve_slot_mixing(chunk, slot.clone(), 0..n_chan))
            .collect();

        // Step 4: build SolveData per solve slot (averaged observed/model
        // at solve resolution) and run the solver, in parallel across
        // slots. Initial unknowns come from the previous chunk's solution.
        let (resolved_spd, n_sub) = Self::resolve_sub_intervals(&self.settings.solutions_per_direction, n_dir);
        let seed = self.previous_solution.clone().unwrap_or_else(|| {
            GainTensor::identity(self.settings.n_channel_blocks.max(1), n_dir, n_ant, n_sub)
        });

        let per_slot: Vec<(GainTensor, crate::solvers::SolverResult)> = solve_slots
            .par_iter()
            .zip(solve_mixing.par_iter())
            .map(|(slot, mixing)| {
                let mut observed = Array4::<Complex64>::zeros((n_bl, 1, n_chan, n_corr));
                let mut model = Array5::<Complex64>::zeros((n_dir, n_bl, 1, n_chan, n_corr));
                let mut weights = Array4::<f64>::zeros((n_bl, 1, n_chan, n_corr));
                let flags = Array4::<bool>::from_elem((n_bl, 1, n_chan, n_corr), false);
                for c in 0..n_chan {
                    let avg_obs = self.average_observed(chunk, slot.clone(), c..(c + 1));
                    for bl in 0..n_bl {
                        for corr in 0..n_corr {
                            observed[[bl, 0, c, corr]] = avg_obs[[bl, 0, corr]];
                            let (_, wsum) = Self::average_group(&chunk.observed, &chunk.weights, &chunk.flags, bl, slot.clone(), c..(c + 1), corr);
                            weights[[bl, 0, c, corr]] = wsum;
                        }
                    }
                    for d in 0..n_dir {
                        let avg_model = self.average_model_direction(chunk, d, slot.clone(), c..(c + 1));
                        for bl in 0..n_bl {
                            for corr in 0..n_corr {
                                model[[d, bl, 0, c, corr]] = avg_model[[bl, 0, corr]];
                            }
                        }
                    }
                }
                let model = Self::mix_model(mixing, &model);

                let blocks = SolveData::build(
                    self.settings.n_channel_blocks,
                    n_ant,
                    &chunk.antenna1,
                    &chunk.antenna2,
                    observed.view(),
                    weights.view(),
                    flags.view(),
                    model.view(),
                )
                .unwrap_or_default();

                let mut solutions = seed.clone();
                let mut solver = solver_template.clone();
                solver.config_mut().solutions_per_direction = resolved_spd.clone();
                let mut constraints = constraints_template.to_vec();
                let result = solver.run(&blocks, &mut solutions, &mut constraints);
                (solutions, result)
            })
            .collect();

        // Step 5/6/7: per solve slot, subtract every non-target direction
        // from each subtract-resolution slot inside it, honouring baseline
        // selection.
        let mut residuals = Vec::new();
        let mut solve_results = Vec::with_capacity(per_slot.len());
        for (slot_index, slot) in solve_slots.iter().enumerate() {
            let (solutions, result) = &per_slot[slot_index];
            solve_results.push(result.clone());

            let subtract_slots = group_ranges(slot.len(), self.settings.time_step);
            for sub_relative in subtract_slots {
                let sub_range = (slot.start + sub_relative.start)..(slot.start + sub_relative.end);
                let mut residual = self.average_observed_full_bandwidth(chunk, sub_range.clone());

                let subtract_mixing = self.subtract_slot_mixing(chunk, sub_range.clone(), 0..n_chan);

                for d in 0..n_dir {
                    if d == target {
                        continue;
                    }
                    if self.settings.un_modelled_directions.contains(&d) {
                        continue;
                    }
                    let model_avg = self.average_model_direction_full_bandwidth(chunk, d, sub_range.clone());
                    for bl in 0..n_bl {
                        if let Some(selected) = &chunk.selected_baselines {
                            if !selected.contains(&bl) {
                                continue;
                            }
                        }
                        let ant1 = chunk.antenna1[bl];
                        let ant2 = chunk.antenna2[bl];
                        let g1 = solutions.solutions[[0, d, ant1, 0]];
                        let g2 = solutions.solutions[[0, d, ant2, 0]];
                        for c in 0..n_chan {
                            let model_jones = Jones::new(
                                model_avg[[bl, c, 0]],
                                model_avg[[bl, c, 1]],
                                model_avg[[bl, c, 2]],
                                model_avg[[bl, c, 3]],
                            );
                            let predicted = g1.sandwich_corrwise(&model_jones, &g2);
                            for (corr, value) in predicted.iter().enumerate() {
                                let weight = subtract_mixing.tensor[[target, d, corr, 0, bl]];
                                residual[[bl, c, corr]] -= value * weight;
                            }
                        }
                    }
                }
                residuals.push(residual);
            }
        }

        if self.settings.propagate_solutions {
            if let Some((solutions, result)) = per_slot.last() {
                if !self.settings.propagate_converged_only || result.converged {
                    self.previous_solution = Some(solutions.clone());
                }
            }
        }

        DemixOutput {
            residuals,
            solve_results,
        }
    }

    /// Averages the observed data over a subtract-resolution time range,
    /// one value per `(baseline, channel, corr)`; this is the running
    /// residual buffer's initial state before any direction is subtracted.
    fn average_observed_full_bandwidth(&self, chunk: &DemixChunk, time_range: std::ops::Range<usize>) -> Array3<Complex64> {
        let n_bl = chunk.n_baselines();
        let n_chan = chunk.observed.dim().2;
        let n_corr = chunk.observed.dim().3;
        let mut flat = Array3::<Complex64>::zeros((n_bl, n_chan, n_corr));
        for bl in 0..n_bl {
            for c in 0..n_chan {
                for corr in 0..n_corr {
                    let (mean, _) = Self::average_group(&chunk.observed, &chunk.weights, &chunk.flags, bl, time_range.clone(), c..(c + 1), corr);
                    flat[[bl, c, corr]] = mean;
                }
            }
        }
        flat
    }

    fn average_model_direction_full_bandwidth(&self, chunk: &DemixChunk, direction: usize, time_range: std::ops::Range<usize>) -> Array3<Complex64> {
        let n_bl = chunk.n_baselines();
        let n_chan = chunk.model.dim().3;
        let n_corr = chunk.model.dim().4;
        let mut out = Array3::<Complex64>::zeros((n_bl, n_chan, n_corr));
        for bl in 0..n_bl {
            for c in 0..n_chan {
                for corr in 0..n_corr {
                    let mut num = Complex64::new(0.0, 0.0);
                    let mut wsum = 0.0;
                    for t in time_range.clone() {
                        if chunk.flags[[bl, t, c, corr]] {
                            continue;
                        }
                        let w = chunk.weights[[bl, t, c, corr]];
                        if w <= 0.0 {
                            continue;
                        }
                        num += chunk.model[[direction, bl, t, c, corr]] * w;
                        wsum += w;
                    }
                    out[[bl, c, corr]] = if wsum > 0.0 { num / wsum } else { Complex64::new(0.0, 0.0) };
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::PolarisationMode;
    use crate::solvers::{Solver, SolverConfig};
    use ndarray::Array4;

    #[test]
    fn raw_time_range_splits_into_the_requested_step_size() {
        assert_eq!(group_ranges(10, 3), vec![0..3, 3..6, 6..9, 9..10]);
        assert_eq!(group_ranges(6, 2), vec![0..2, 2..4, 4..6]);
        assert_eq!(group_ranges(0, 2), Vec::<std::ops::Range<usize>>::new());
    }

    #[test]
    fn flagged_samples_are_excluded_from_the_weighted_average() {
        let data = Array4::from_elem((1, 2, 1, 1), Complex64::new(2.0, 0.0));
        let mut weights = Array4::<f64>::ones((1, 2, 1, 1));
        let mut flags = Array4::from_elem((1, 2, 1, 1), false);
        flags[[0, 1, 0, 0]] = true;
        weights[[0, 1, 0, 0]] = 1.0;
        let (mean, wsum) = Demixer::average_group(&data, &weights, &flags, 0, 0..2, 0..1, 0);
        assert_eq!(wsum, 1.0);
        assert!((mean.re - 2.0).abs() < 1e-12);
    }

    fn identity_chunk(n_time: usize, n_dir: usize) -> DemixChunk {
        let n_bl = 1;
        let n_chan = 1;
        let n_corr = crate::constants::NUM_POLARISATIONS;
        DemixChunk {
            n_antennas: 2,
            antenna1: vec![0],
            antenna2: vec![1],
            observed: Array4::from_elem((n_bl, n_time, n_chan, n_corr), Complex64::new(1.0, 0.0)),
            weights: Array4::ones((n_bl, n_time, n_chan, n_corr)),
            flags: Array4::from_elem((n_bl, n_time, n_chan, n_corr), false),
            model: Array5::from_elem((n_dir, n_bl, n_time, n_chan, n_corr), Complex64::new(1.0, 0.0)),
            phasors: Array4::from_elem((n_dir, n_bl, n_time, n_chan), Complex64::new(1.0, 0.0)),
            selected_baselines: None,
        }
    }

    #[test]
    fn process_chunk_emits_one_residual_per_subtract_slot_and_one_result_per_solve_slot() {
        let chunk = identity_chunk(4, 2);
        let settings = DemixSettings {
            freq_step: 1,
            time_step: 2,
            demix_freq_step: 1,
            demix_time_step: 2,
            n_time_chunk: 2,
            n_channel_blocks: 1,
            un_modelled_directions: Vec::new(),
            propagate_solutions: false,
            propagate_converged_only: false,
            solutions_per_direction: Vec::new(),
        };
        let mut demixer = Demixer::new(settings);
        let solver = Solver::DirectionSolve(SolverConfig {
            mode: PolarisationMode::Scalar,
            max_iterations: 5,
            min_iterations: 0,
            tolerance: 1e-2,
            ..Default::default()
        });
        let output = demixer.process_chunk(&chunk, &solver, &[]);
        assert_eq!(output.residuals.len(), 2);
        assert_eq!(output.solve_results.len(), 2);
    }

    /// Regression test: the gain tensor's sub-interval axis must be sized
    /// from the largest per-direction `solutions_per_direction` entry, not
    /// from `n_channel_blocks` (previously conflated, which made a
    /// direction's extra sub-intervals silently unreachable).
    #[test]
    fn sub_interval_axis_is_sized_from_the_largest_per_direction_count() {
        assert_eq!(Demixer::resolve_sub_intervals(&[], 3), (vec![1, 1, 1], 1));
        assert_eq!(Demixer::resolve_sub_intervals(&[2, 1, 1], 3), (vec![2, 1, 1], 2));
        assert_eq!(Demixer::resolve_sub_intervals(&[1, 4], 2), (vec![1, 4], 4));
    }

    /// End-to-end smoke test: a solutions-per-direction configuration with
    /// more sub-intervals than `n_channel_blocks` must actually reach the
    /// solver (via `SolverConfig::solutions_per_direction`) and run
    /// without the gain tensor's axis being too small to hold it.
    #[test]
    fn per_direction_sub_intervals_reach_the_solver() {
        let chunk = identity_chunk(4, 2);
        let settings = DemixSettings {
            freq_step: 1,
            time_step: 4,
            demix_freq_step: 4,
            demix_time_step: 4,
            n_time_chunk: 1,
            n_channel_blocks: 1,
            un_modelled_directions: Vec::new(),
            propagate_solutions: false,
            propagate_converged_only: false,
            solutions_per_direction: vec![2, 1],
        };
        let mut demixer = Demixer::new(settings);
        let solver = Solver::DirectionIterative(SolverConfig {
            mode: PolarisationMode::Scalar,
            max_iterations: 3,
            min_iterations: 0,
            tolerance: 1e-2,
            ..Default::default()
        });
        let output = demixer.process_chunk(&chunk, &solver, &[]);
        assert_eq!(output.residuals.len(), 1);
        assert_eq!(output.solve_results.len(), 1);
    }
}
