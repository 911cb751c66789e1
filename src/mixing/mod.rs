pub mod builder;
pub mod deproject;

pub use builder::{MixingMatrixBuilder, MixingTensor};
pub use deproject::Deprojector;
