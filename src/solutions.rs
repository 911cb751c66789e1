//! Persisted-solution labelling: turns a [`GainTensor`] into the
//! `DirectionalGain:{row}:{col}:{Real,Imag}:<ant>:<dir>` real/imag pairs
//! laid out on a (frequency, time) grid, i.e. the channel-block and
//! sub-interval axes. Actual HDF5 "h5parm" / ParmDB file writing is an
//! external collaborator; this module only produces the labelled grids.

use crate::gain::GainTensor;
use crate::settings::PolarisationMode;
use ndarray::Array2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Part {
    Real,
    Imag,
}

impl std::fmt::Display for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Part::Real => write!(f, "Real"),
            Part::Imag => write!(f, "Imag"),
        }
    }
}

/// The `(row, col)` Jones entries persisted for a given polarisation mode:
/// scalar keeps just the single scalar entry, diagonal keeps both diagonal
/// entries, full Jones keeps all four.
fn entries_for_mode(mode: PolarisationMode) -> &'static [(usize, usize)] {
    match mode {
        PolarisationMode::Scalar => &[(0, 0)],
        PolarisationMode::Diagonal => &[(0, 0), (1, 1)],
        PolarisationMode::FullJones => &[(0, 0), (0, 1), (1, 0), (1, 1)],
    }
}

/// Maps a Jones `(row, col)` pair to its flat index in `Jones::as_slice`'s
/// `[xx, xy, yx, yy]` layout.
fn jones_index(row: usize, col: usize) -> usize {
    match (row, col) {
        (0, 0) => 0,
        (0, 1) => 1,
        (1, 0) => 2,
        (1, 1) => 3,
        _ => panic!("Jones matrices are 2x2; row/col must be 0 or 1"),
    }
}

pub fn label(row: usize, col: usize, part: Part, antenna: &str, direction: &str) -> String {
    format!("DirectionalGain:{row}:{col}:{part}:{antenna}:{direction}")
}

/// Produces one `(frequency, time)` grid (shape `(n_channel_blocks,
/// n_sub_intervals)`) per label, for every antenna/direction/Jones-entry
/// combination relevant to `mode`.
pub fn labelled_grids(
    solutions: &GainTensor,
    antenna_names: &[String],
    direction_names: &[String],
    mode: PolarisationMode,
) -> Vec<(String, Array2<f64>)> {
    let (n_blocks, n_dir, n_ant, n_sub) = solutions.dim();
    assert_eq!(antenna_names.len(), n_ant);
    assert_eq!(direction_names.len(), n_dir);

    let mut out = Vec::new();
    for (d, direction) in direction_names.iter().enumerate().take(n_dir) {
        for (a, antenna) in antenna_names.iter().enumerate().take(n_ant) {
            for &(row, col) in entries_for_mode(mode) {
                let idx = jones_index(row, col);
                let mut real = Array2::<f64>::zeros((n_blocks, n_sub));
                let mut imag = Array2::<f64>::zeros((n_blocks, n_sub));
                for block in 0..n_blocks {
                    for sub in 0..n_sub {
                        let value = solutions.solutions[[block, d, a, sub]].as_slice()[idx];
                        real[[block, sub]] = value.re;
                        imag[[block, sub]] = value.im;
                    }
                }
                out.push((label(row, col, Part::Real, antenna, direction), real));
                out.push((label(row, col, Part::Imag, antenna, direction), imag));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Jones;

    #[test]
    fn scalar_mode_emits_one_real_imag_pair_per_antenna_direction() {
        let solutions = GainTensor::filled(2, 1, 3, 1, Jones::scalar(num_complex::Complex64::new(0.5, 0.25)));
        let antennas = vec!["ant0".to_string(), "ant1".to_string(), "ant2".to_string()];
        let directions = vec!["dir0".to_string()];
        let grids = labelled_grids(&solutions, &antennas, &directions, PolarisationMode::Scalar);
        assert_eq!(grids.len(), 3 * 2);
        let (found_label, grid) = grids
            .iter()
            .find(|(l, _)| l == "DirectionalGain:0:0:Real:ant1:dir0")
            .unwrap();
        assert_eq!(found_label, "DirectionalGain:0:0:Real:ant1:dir0");
        assert_eq!(grid.dim(), (2, 1));
        assert!((grid[[0, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn full_jones_mode_emits_all_four_entries() {
        let solutions = GainTensor::identity(1, 1, 1, 1);
        let antennas = vec!["ant0".to_string()];
        let directions = vec!["dir0".to_string()];
        let grids = labelled_grids(&solutions, &antennas, &directions, PolarisationMode::FullJones);
        assert_eq!(grids.len(), 4 * 2);
    }
}
