//! Crate-public error types. Numerical non-convergence is never an error
//! here; these cover only construction-time and shape failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown solver algorithm '{0}'")]
    UnknownSolverAlgorithm(String),

    #[error("unknown LLS solver type '{0}'")]
    UnknownLlsSolver(String),

    #[error("antenna constraint group has size 1; groups must contain 0 or >=2 antennas")]
    AntennaConstraintGroupOfOne,

    #[error(
        "solutions_per_direction has {got} entries but there are {expected} directions"
    )]
    SolutionsPerDirectionLengthMismatch { got: usize, expected: usize },

    #[error("solutions_per_direction entry at index {index} is zero; must be >=1")]
    SolutionsPerDirectionZero { index: usize },

    #[error("'{0}' appears in both the target source and the extra (othersources) list")]
    TargetInExtraSources(String),

    #[error("the sky model name is empty")]
    EmptySkyModel,

    #[error("the instrument model name is empty")]
    EmptyInstrumentModel,

    #[error("step size {0} is out of the valid range [0, 1]")]
    StepSizeOutOfRange(f64),

    #[error("tolerance must be positive, got {0}")]
    NonPositiveTolerance(f64),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("expected 4 polarisations per visibility, got {0}")]
    NotFourPolarisations(usize),

    #[error(
        "time averaging factor {factor} does not evenly divide the chunk length {chunk_len}"
    )]
    TimeAveragingDoesNotDivide { factor: usize, chunk_len: usize },

    #[error(
        "frequency averaging factor {factor} does not evenly divide the channel count {nchan}"
    )]
    FreqAveragingDoesNotDivide { factor: usize, nchan: usize },

    #[error("no directions were supplied to the demixer")]
    NoDirections,
}

#[derive(Error, Debug)]
pub enum FacetParseError {
    #[error("expected '(' after '{0}' keyword")]
    ExpectedOpenParen(String),

    #[error("expected a number or ')' inside a coordinate list")]
    ExpectedNumberOrCloseParen,

    #[error("polygon coordinate list has an odd number of values ({0})")]
    OddPolygonCoordinateCount(usize),

    #[error("point expects exactly two numbers, got {0}")]
    PointExpectsTwoValues(usize),

    #[error("could not parse '{0}' as a number")]
    NotANumber(String),

    #[error("unexpected end of input while parsing a facet file")]
    UnexpectedEof,
}

#[derive(Error, Debug)]
pub enum SolveError {
    #[error("SolveData has {n_vis} visibilities but the model has {n_model}")]
    ModelVisibilityCountMismatch { n_vis: usize, n_model: usize },

    #[error("antenna index {index} in a baseline is out of range (n_antennas={n_antennas})")]
    AntennaIndexOutOfRange { index: usize, n_antennas: usize },

    #[error("the direction-solve family requires at least one direction, got 0")]
    NoDirections,
}
