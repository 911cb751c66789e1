//! Pipeline configuration. Grounded on DP3's `ddecal/Settings.cc`, but
//! expressed as a plain `serde`-derived struct with field defaults instead
//! of pulled out of a generic string-keyed parameter set, since parsing a
//! measurement-set-backed parset is an external collaborator here.

use crate::error::ConfigError;
use crate::math::lls::LlsAlgorithm;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolarisationMode {
    Scalar,
    Diagonal,
    FullJones,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::EnumString, strum_macros::Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum SolverAlgorithm {
    #[strum(serialize = "directionsolve")]
    DirectionSolve,
    #[strum(serialize = "directioniterative")]
    DirectionIterative,
    Hybrid,
}

/// One named group of antenna indices that a core/antenna-group constraint
/// averages together. A group of size 1 is meaningless (it averages an
/// antenna with itself) and is rejected by [`Settings::validate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntennaGroup {
    pub name: String,
    pub antennas: Vec<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SmoothnessConstraintSettings {
    pub bandwidth_hz: f64,
    pub reference_frequency_hz: Option<f64>,
    pub reference_distance_m: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub mode: PolarisationMode,
    pub solver_algorithm: SolverAlgorithm,
    pub lls_solver: LlsAlgorithm,
    pub max_iterations: usize,
    pub min_iterations: usize,
    pub tolerance: f64,
    pub step_size: f64,
    pub detect_stalling: bool,
    pub propagate_solutions: bool,
    pub propagate_converged_only: bool,
    pub flag_unconverged: bool,
    pub flag_diverged_only: bool,

    pub n_channel_blocks: usize,
    pub solution_interval: usize,
    pub solutions_per_direction: Vec<usize>,

    pub directions: Vec<String>,
    pub subtract_sources: Vec<String>,
    pub model_sources: Vec<String>,
    pub other_sources: Vec<String>,
    pub target_source: Option<String>,
    pub ignore_target: bool,

    pub core_constraint_radius_m: Option<f64>,
    pub antenna_constraints: Vec<AntennaGroup>,
    pub smoothness_constraint: Option<SmoothnessConstraintSettings>,

    pub freq_step: usize,
    pub time_step: usize,
    pub demix_freq_step: usize,
    pub demix_time_step: usize,
    pub n_time_chunk: usize,

    pub default_gain: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: PolarisationMode::FullJones,
            solver_algorithm: SolverAlgorithm::DirectionSolve,
            lls_solver: LlsAlgorithm::Qr,
            max_iterations: crate::constants::DEFAULT_MAX_ITERATIONS,
            min_iterations: 0,
            tolerance: crate::constants::DEFAULT_TOLERANCE,
            step_size: crate::constants::DEFAULT_STEP_SIZE,
            detect_stalling: true,
            propagate_solutions: false,
            propagate_converged_only: false,
            flag_unconverged: false,
            flag_diverged_only: false,
            n_channel_blocks: 1,
            solution_interval: 1,
            solutions_per_direction: Vec::new(),
            directions: Vec::new(),
            subtract_sources: Vec::new(),
            model_sources: Vec::new(),
            other_sources: Vec::new(),
            target_source: None,
            ignore_target: false,
            core_constraint_radius_m: None,
            antenna_constraints: Vec::new(),
            smoothness_constraint: None,
            freq_step: 1,
            time_step: 1,
            demix_freq_step: 1,
            demix_time_step: 1,
            n_time_chunk: num_cpus_fallback(),
            default_gain: crate::constants::DEFAULT_GAIN,
        }
    }
}

/// `ntimechunk` defaults to the thread count; without pulling in a
/// thread-pool introspection dependency here (the pool itself is an
/// external collaborator), fall back to the number of logical CPUs as
/// reported by `std`.
fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Settings {
    /// Parse a solver algorithm name the way `ParseSolverAlgorithm` does,
    /// producing a descriptive error for unknown names.
    pub fn parse_solver_algorithm(name: &str) -> Result<SolverAlgorithm, ConfigError> {
        SolverAlgorithm::from_str(&name.to_lowercase())
            .map_err(|_| ConfigError::UnknownSolverAlgorithm(name.to_string()))
    }

    pub fn parse_lls_algorithm(name: &str) -> Result<LlsAlgorithm, ConfigError> {
        LlsAlgorithm::from_str(&name.to_lowercase())
            .map_err(|_| ConfigError::UnknownLlsSolver(name.to_string()))
    }

    /// Fail-fast validation, run once at construction, matching the
    /// `Settings` constructor's behaviour of throwing immediately on a bad
    /// configuration rather than deferring to first use.
    pub fn validate(&self, n_directions: usize) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.step_size) {
            return Err(ConfigError::StepSizeOutOfRange(self.step_size));
        }
        if self.tolerance <= 0.0 {
            return Err(ConfigError::NonPositiveTolerance(self.tolerance));
        }
        for group in &self.antenna_constraints {
            if group.antennas.len() == 1 {
                return Err(ConfigError::AntennaConstraintGroupOfOne);
            }
        }
        if self.solutions_per_direction.len() > n_directions {
            return Err(ConfigError::SolutionsPerDirectionLengthMismatch {
                got: self.solutions_per_direction.len(),
                expected: n_directions,
            });
        }
        for (index, &n) in self.solutions_per_direction.iter().enumerate() {
            if n == 0 {
                return Err(ConfigError::SolutionsPerDirectionZero { index });
            }
        }
        if let Some(target) = &self.target_source {
            if self.other_sources.iter().any(|s| s == target) {
                return Err(ConfigError::TargetInExtraSources(target.clone()));
            }
        }
        Ok(())
    }

    /// Resolve `solutions_per_direction`, padding any missing trailing
    /// entries with 1 (the `Settings.cc` default-padding behaviour) —
    /// whether the list is empty or simply shorter than `n_directions`.
    pub fn resolved_solutions_per_direction(&self, n_directions: usize) -> Vec<usize> {
        let mut resolved = self.solutions_per_direction.clone();
        resolved.resize(n_directions, 1);
        resolved
    }
}
