pub mod jones;
pub mod lls;

pub use jones::Jones;
pub use lls::{LlsAlgorithm, LlsOutcome};
