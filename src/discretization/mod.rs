//! Discretization consumed by the adaptive core.
//!
//! The adaptation and transfer code only sees the narrow [`Discretization`]
//! interface: DOF counts, topology application, renumbering, transfer
//! operators, rebalancing, and the end-of-update signal. [`QuadSpace`] is the
//! cell-centred finite-volume space on a quadtree forest that the operator
//! and estimator use for geometry and discrete differential operators.

pub mod space;
pub mod transfer;

pub use space::{BoundaryFace, CellGeometry, Domain, FaceLink, LinkTarget, QuadSpace};
pub use transfer::TransferOperator;

use crate::adapt::controller::RefinementDecision;
use crate::mhd_error::MhdError;
use std::ops::Range;

/// Narrow interface onto a mesh + function-space pair that is mutated in place
/// by refinement, derefinement and rebalancing.
pub trait Discretization {
    /// Number of DOFs over all ranks.
    fn global_dofs(&self) -> usize;

    /// Global DOF range owned by this rank.
    fn owned_rows(&self) -> Range<usize>;

    /// Counter bumped by every renumbering.
    fn generation(&self) -> u64;

    /// Split and merge the cells named by `decision`. Numbering is left
    /// untouched until [`Discretization::update`].
    fn apply_decision(&mut self, decision: &RefinementDecision) -> Result<(), MhdError>;

    /// Recompute the numbering after a topology change, keeping the previous
    /// numbering for transfer until [`Discretization::updates_finished`].
    fn update(&mut self) -> Result<(), MhdError>;

    /// Move cell ownership so every rank holds an equal share, renumbering
    /// like [`Discretization::update`].
    fn rebalance(&mut self) -> Result<(), MhdError>;

    /// Linear map from previous-numbering global vectors to the rows `rows`
    /// of the current numbering.
    fn transfer_operator(&self, rows: Range<usize>) -> Result<TransferOperator, MhdError>;

    /// Whether previous-numbering bookkeeping is still held.
    fn has_pending_transfer(&self) -> bool;

    /// Owned range of the previous numbering (the layout before the update).
    fn previous_owned_rows(&self) -> Option<Range<usize>>;

    /// Release transient transfer bookkeeping.
    fn updates_finished(&mut self);
}
