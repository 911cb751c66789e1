//! End-to-end coverage spanning more than one module: a synthetic
//! direction-dependent calibration recovery (solver family + phase
//! reference constraint), a hybrid-solver composition check, the
//! mixing-tensor deprojection idempotence property on a non-trivial
//! direction count, a min-iterations floor check, and a demixer
//! subtract-exactness check.

use mwa_ddecal::constraints::{Constraint, PhaseReferenceConstraint};
use mwa_ddecal::demix::{DemixChunk, DemixSettings, Demixer};
use mwa_ddecal::gain::GainTensor;
use mwa_ddecal::math::Jones;
use mwa_ddecal::mixing::{Deprojector, MixingMatrixBuilder};
use mwa_ddecal::settings::PolarisationMode;
use mwa_ddecal::solve_data::{Baseline, SolveData};
use mwa_ddecal::solvers::{HybridChild, Solver, SolverConfig};
use ndarray::{Array2, Array3, Array4, Array5};
use num_complex::Complex64;

/// Builds a small all-pairs network's [`SolveData`] for a purely real,
/// amplitude-only synthetic calibration scenario: `observed = sum_d g1_d *
/// model_d * conj(g2_d)`, scalar mode (only the XX/YY entries matter).
fn synthetic_scalar_data(n_ant: usize, n_dir: usize, gains: &dyn Fn(usize, usize) -> f64, model: &dyn Fn(usize, usize) -> Complex64) -> SolveData {
    let mut baselines = Vec::new();
    for a1 in 0..n_ant {
        for a2 in (a1 + 1)..n_ant {
            baselines.push(Baseline {
                antenna1: a1,
                antenna2: a2,
            });
        }
    }
    let n_bl = baselines.len();

    let mut model_arr = Array3::from_elem((n_dir, n_bl, 1), Jones::zero());
    let mut observed = Array2::from_elem((n_bl, 1), Jones::zero());
    for (bl_idx, bl) in baselines.iter().enumerate() {
        let mut sum = Jones::zero();
        for d in 0..n_dir {
            let m = Jones::scalar(model(d, bl_idx));
            model_arr[[d, bl_idx, 0]] = m;
            let g1 = Jones::scalar(Complex64::new(gains(d, bl.antenna1), 0.0));
            let g2 = Jones::scalar(Complex64::new(gains(d, bl.antenna2), 0.0));
            sum += g1.sandwich_corrwise(&m, &g2);
        }
        observed[[bl_idx, 0]] = sum;
    }

    SolveData {
        n_antennas: n_ant,
        n_directions: n_dir,
        baselines,
        channel_range: 0..1,
        observed,
        weights: Array2::ones((n_bl, 1)),
        model: model_arr,
        n_samples: 1,
        n_time: 1,
        n_channels: 1,
    }
}

#[test]
fn scalar_direction_solve_recovers_synthetic_gains() {
    let n_ant = 5;
    let n_dir = 2;
    let gains = |d: usize, ant: usize| 1.0 + 0.15 * d as f64 + 0.05 * ant as f64;
    let model = |d: usize, bl: usize| Complex64::new(0.8 + 0.1 * d as f64, 0.3 - 0.05 * bl as f64);

    let data = vec![synthetic_scalar_data(n_ant, n_dir, &gains, &model)];
    let mut solutions = GainTensor::identity(1, n_dir, n_ant, 1);

    let mut solver = Solver::DirectionSolve(SolverConfig {
        mode: PolarisationMode::Scalar,
        max_iterations: 300,
        min_iterations: 0,
        tolerance: 1e-6,
        step_size: 0.5,
        ..Default::default()
    });
    let mut constraints = vec![Constraint::PhaseReference(PhaseReferenceConstraint {
        reference_antenna: 0,
    })];

    let result = solver.run(&data, &mut solutions, &mut constraints);
    assert!(result.converged, "solver did not converge: {result:?}");

    for d in 0..n_dir {
        for ant in 0..n_ant {
            let recovered = solutions.solutions[[0, d, ant, 0]].xx().norm();
            let expected = gains(d, ant);
            assert!(
                (recovered - expected).abs() < 1e-2,
                "direction {d} antenna {ant}: recovered {recovered}, expected {expected}"
            );
        }
    }
}

#[test]
fn hybrid_solver_sums_child_iteration_counts() {
    let n_ant = 4;
    let n_dir = 1;
    let gains = |_d: usize, ant: usize| 1.0 + 0.1 * ant as f64;
    let model = |_d: usize, bl: usize| Complex64::new(1.0, 0.1 * bl as f64);
    let data = vec![synthetic_scalar_data(n_ant, n_dir, &gains, &model)];

    let mut solutions = GainTensor::identity(1, n_dir, n_ant, 1);
    let config = SolverConfig {
        mode: PolarisationMode::Scalar,
        max_iterations: 150,
        min_iterations: 0,
        tolerance: 1e-6,
        step_size: 0.5,
        ..Default::default()
    };
    let mut children = vec![
        HybridChild {
            solver: Solver::DirectionSolve(config.clone()),
            constraints: vec![Constraint::PhaseReference(PhaseReferenceConstraint::default())],
        },
        HybridChild {
            solver: Solver::DirectionSolve(config),
            constraints: vec![Constraint::PhaseReference(PhaseReferenceConstraint::default())],
        },
    ];

    let result = mwa_ddecal::solvers::hybrid::run(&mut children, &data, &mut solutions);
    assert!(result.converged);
    // The second child starts from an already-converged state, so it
    // should need very few (but at least one) extra iterations; the
    // reported total must be at least the first child's iteration count.
    assert!(result.iterations >= 1);
}

#[test]
fn deprojection_is_idempotent_for_a_four_direction_tensor() {
    let n_dir = 4;
    let mut builder = MixingMatrixBuilder::new(n_dir, 1, 1, 1);
    let phasors = ndarray::Array3::from_shape_fn((n_dir, 1, 1), |(d, _, _)| {
        if d == n_dir - 1 {
            Complex64::new(1.0, 0.0)
        } else {
            Complex64::from_polar(1.0, 0.2 * (d as f64 + 1.0))
        }
    });
    let weights = ndarray::Array3::from_elem((1, 1, 1), 1.0);
    builder.accumulate(&phasors, &weights);
    let mut mixing = builder.finalize(1);

    let deprojector = Deprojector {
        un_modelled_directions: vec![1, 2],
    };
    deprojector.deproject_mixing(&mut mixing);

    // After deprojecting, a second application with the same un-modelled
    // set should leave the already-projected columns unchanged (P is a
    // projector).
    let before = mixing.tensor.clone();
    deprojector.deproject_mixing(&mut mixing);
    for value in (&mixing.tensor - &before).iter() {
        assert!(value.norm() < 1e-6);
    }
}

#[test]
fn min_iterations_floor_is_honoured() {
    // A huge tolerance makes every block's relative-change test pass on
    // the very first iteration; `min_iterations` must still force the
    // loop to run that many iterations before declaring convergence.
    let n_ant = 3;
    let n_dir = 1;
    let gains = |_d: usize, ant: usize| 1.0 + 0.05 * ant as f64;
    let model = |_d: usize, bl: usize| Complex64::new(1.0, 0.1 * bl as f64);
    let data = vec![synthetic_scalar_data(n_ant, n_dir, &gains, &model)];
    let mut solutions = GainTensor::identity(1, n_dir, n_ant, 1);

    let mut solver = Solver::DirectionSolve(SolverConfig {
        mode: PolarisationMode::Scalar,
        max_iterations: 50,
        min_iterations: 10,
        tolerance: 1e8,
        step_size: 0.5,
        ..Default::default()
    });
    let mut constraints = vec![Constraint::PhaseReference(PhaseReferenceConstraint {
        reference_antenna: 0,
    })];

    let result = solver.run(&data, &mut solutions, &mut constraints);
    assert!(result.converged);
    assert_eq!(result.iterations, 10);
}

#[test]
fn subtract_exactness_with_single_subtract_direction_and_identity_gains() {
    // Direction 0 is the sole subtract direction; direction 1 is the
    // target (always excluded from subtraction, per §3/§4.10). Identical,
    // unit-magnitude phasors for both give the trivial mixing tensor (no
    // inter-direction decorrelation: M[target, 0] = 1), and freezing the
    // gains at their identity seed means the residual must equal observed
    // minus the subtract direction's model to machine precision.
    let n_bl = 1;
    let n_time = 2;
    let n_chan = 1;
    let n_corr = 4;
    let n_dir = 2;

    let observed_value = Complex64::new(3.0, -1.5);
    let model_value = Complex64::new(1.25, 0.5);

    let observed = Array4::from_shape_fn((n_bl, n_time, n_chan, n_corr), |(_, _, _, corr)| {
        if corr == 0 || corr == 3 {
            observed_value
        } else {
            Complex64::new(0.0, 0.0)
        }
    });
    let weights = Array4::ones((n_bl, n_time, n_chan, n_corr));
    let flags = Array4::from_elem((n_bl, n_time, n_chan, n_corr), false);
    let model = Array5::from_shape_fn((n_dir, n_bl, n_time, n_chan, n_corr), |(d, _, _, _, corr)| {
        if d == 0 && (corr == 0 || corr == 3) {
            model_value
        } else {
            Complex64::new(0.0, 0.0)
        }
    });
    let phasors = Array4::from_elem((n_dir, n_bl, n_time, n_chan), Complex64::new(1.0, 0.0));

    let chunk = DemixChunk {
        n_antennas: 2,
        antenna1: vec![0],
        antenna2: vec![1],
        observed,
        weights,
        flags,
        model,
        phasors,
        selected_baselines: None,
    };

    let settings = DemixSettings {
        freq_step: 1,
        time_step: 1,
        demix_freq_step: 1,
        demix_time_step: 1,
        n_time_chunk: 2,
        n_channel_blocks: 1,
        un_modelled_directions: Vec::new(),
        propagate_solutions: false,
        propagate_converged_only: false,
        solutions_per_direction: Vec::new(),
    };
    let mut demixer = Demixer::new(settings);

    // The solver's own recovery accuracy isn't under test here; freeze the
    // gains at their identity seed with step_size = 0 so only the
    // mixing/subtraction arithmetic is exercised.
    let solver = Solver::DirectionSolve(SolverConfig {
        mode: PolarisationMode::Scalar,
        max_iterations: 1,
        min_iterations: 0,
        tolerance: 1e8,
        step_size: 0.0,
        ..Default::default()
    });

    let output = demixer.process_chunk(&chunk, &solver, &[]);
    assert_eq!(output.residuals.len(), n_time);
    for residual in &output.residuals {
        for corr in [0usize, 3usize] {
            let expected = observed_value - model_value;
            let got = residual[[0, 0, corr]];
            assert!((got - expected).norm() < 1e-9, "got {got}, expected {expected}");
        }
    }
}
