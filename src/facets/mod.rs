pub mod ds9;

pub use ds9::{parse_str, Facet};
