//! Named constants used across the crate.

/// Number of correlation products per baseline (XX, XY, YX, YY).
pub const NUM_POLARISATIONS: usize = 4;

/// Default initial gain value, matching DDECal's `defaultgain` key.
pub const DEFAULT_GAIN: f64 = 1.0;

/// Default maximum number of solver iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 50;

/// Default convergence tolerance on the gain update norm.
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// Default damping factor applied to each iterative gain update.
pub const DEFAULT_STEP_SIZE: f64 = 0.2;

/// Number of consecutive iterations a solver averages with the previous
/// iterate, a StefCal-style stabilisation trick applied every other step.
pub const AVERAGE_EVERY_N_ITERATIONS: usize = 2;

/// Minimum number of iterations below which stall/divergence detection is
/// not attempted (matching DDECal's solver warm-up period).
pub const MIN_ITERATIONS_BEFORE_STALL_CHECK: usize = 2;
