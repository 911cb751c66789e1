//! C2: the constraint chain. An ordered, owned list of constraints applied
//! after every solver iteration. Modelled as a sealed variant (rather than
//! a trait object) per the flat-dispatch guidance for this family: cache
//! locality over virtual-dispatch generality, and it keeps the chain
//! trivially `Clone`.

mod antenna_group;
mod diagonal_projection;
mod phase_reference;
mod rotation;
mod smoothness;
mod tec;

pub use antenna_group::AntennaGroupConstraint;
pub use diagonal_projection::DiagonalProjectionConstraint;
pub use phase_reference::PhaseReferenceConstraint;
pub use rotation::{RotationConstraint, RotationDiagonalConstraint};
pub use smoothness::SmoothnessConstraint;
pub use tec::{TecConstraint, TecPhaseConstraint};

use crate::gain::GainTensor;
use indexmap::IndexMap;

/// Per-iteration statistics a constraint may record (fitted TEC values,
/// phases, etc.), keyed by a short label. A constraint calls
/// [`ConstraintStatistics::record`] once per `apply`, so a multi-iteration
/// solve records under the same label repeatedly; an [`IndexMap`] keeps the
/// most recent values per label (insertion order preserved for the first
/// time each label appears) rather than letting the history grow unbounded.
#[derive(Clone, Debug, Default)]
pub struct ConstraintStatistics {
    entries: IndexMap<String, Vec<f64>>,
}

impl ConstraintStatistics {
    pub fn record(&mut self, label: impl Into<String>, values: Vec<f64>) {
        self.entries.insert(label.into(), values);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Vec<f64>)> {
        self.entries.iter()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstraintApplyResult {
    /// False while the constraint's own internal residual has not yet
    /// fallen below its tolerance; the outer solver will not declare
    /// convergence while any constraint in the chain reports `!stable`.
    pub stable: bool,
}

impl ConstraintApplyResult {
    pub const STABLE: Self = Self { stable: true };
    pub const UNSTABLE: Self = Self { stable: false };
}

#[derive(Clone, Debug)]
pub enum Constraint {
    AntennaGroup(AntennaGroupConstraint),
    Core(AntennaGroupConstraint),
    Smoothness(SmoothnessConstraint),
    PhaseReference(PhaseReferenceConstraint),
    Rotation(RotationConstraint),
    RotationDiagonal(RotationDiagonalConstraint),
    DiagonalProjection(DiagonalProjectionConstraint),
    Tec(TecConstraint),
    TecPhase(TecPhaseConstraint),
}

impl Constraint {
    pub fn apply(
        &mut self,
        solutions: &mut GainTensor,
        _step_index: usize,
        stats: &mut ConstraintStatistics,
    ) -> ConstraintApplyResult {
        match self {
            Constraint::AntennaGroup(c) => c.apply(solutions),
            Constraint::Core(c) => c.apply(solutions),
            Constraint::Smoothness(c) => c.apply(solutions),
            Constraint::PhaseReference(c) => c.apply(solutions),
            Constraint::Rotation(c) => c.apply(solutions),
            Constraint::RotationDiagonal(c) => c.apply(solutions),
            Constraint::DiagonalProjection(c) => c.apply(solutions),
            Constraint::Tec(c) => c.apply(solutions, stats),
            Constraint::TecPhase(c) => c.apply(solutions, stats),
        }
    }
}

/// Runs every constraint in `chain`, in order, and reports whether *all*
/// of them are stable.
pub fn apply_chain(
    chain: &mut [Constraint],
    solutions: &mut GainTensor,
    step_index: usize,
    stats: &mut ConstraintStatistics,
) -> bool {
    let mut all_stable = true;
    for constraint in chain.iter_mut() {
        let result = constraint.apply(solutions, step_index, stats);
        all_stable &= result.stable;
    }
    all_stable
}
