//! Moving field data across topology changes and rebalancing.
//!
//! Every call transfers all [`FIELD_COUNT`](crate::data::FIELD_COUNT) blocks
//! through one transfer operator into one reshaped buffer, and releases the
//! discretization's pending-transfer bookkeeping on every exit path.

use crate::adapt::controller::RefinementDecision;
use crate::algs::communicator::Communicator;
use crate::data::field_state::{BlockState, Bootstrap, Evolving, Field, Layout};
use crate::debug_invariants::DebugInvariants;
use crate::discretization::Discretization;
use crate::mhd_error::MhdError;
use std::ops::{Deref, DerefMut, Range};

/// How a layout's rows map onto the global numbering.
pub trait Distribution: Layout {
    /// Rows of the current numbering held by this rank.
    fn rows(space: &impl Discretization) -> Range<usize>;

    /// Rows of the previous numbering held by this rank.
    fn previous_rows(space: &impl Discretization) -> Option<Range<usize>>;

    /// Global vector from this rank's rows. Collective for distributed layouts.
    fn gather(comm: &impl Communicator, local: &[f64]) -> Vec<f64>;
}

impl Distribution for Bootstrap {
    fn rows(space: &impl Discretization) -> Range<usize> {
        0..space.global_dofs()
    }

    fn previous_rows(_space: &impl Discretization) -> Option<Range<usize>> {
        None
    }

    fn gather(_comm: &impl Communicator, local: &[f64]) -> Vec<f64> {
        local.to_vec()
    }
}

impl Distribution for Evolving {
    fn rows(space: &impl Discretization) -> Range<usize> {
        space.owned_rows()
    }

    fn previous_rows(space: &impl Discretization) -> Option<Range<usize>> {
        space.previous_owned_rows()
    }

    fn gather(comm: &impl Communicator, local: &[f64]) -> Vec<f64> {
        comm.allgather_f64(local)
    }
}

/// Calls [`Discretization::updates_finished`] when dropped.
struct FinishGuard<'a, D: Discretization>(&'a mut D);

impl<D: Discretization> Deref for FinishGuard<'_, D> {
    type Target = D;
    fn deref(&self) -> &D {
        &*self.0
    }
}

impl<D: Discretization> DerefMut for FinishGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut *self.0
    }
}

impl<D: Discretization> Drop for FinishGuard<'_, D> {
    fn drop(&mut self) {
        self.0.updates_finished();
    }
}

/// Global vector of every block, in block order.
fn gather_blocks<L: Distribution>(
    comm: &impl Communicator,
    state: &BlockState<L>,
) -> [Vec<f64>; 4] {
    Field::ALL.map(|f| L::gather(comm, state.block(f)))
}

fn transfer_blocks<L: Distribution, D: Discretization>(
    space: &D,
    state: &mut BlockState<L>,
    old: &[Vec<f64>; 4],
) -> Result<(), MhdError> {
    if let Some(prev) = L::previous_rows(space) {
        debug_assert_eq!(prev.len(), state.block_len());
    }
    let rows = L::rows(space);
    let op = space.transfer_operator(rows.clone())?;
    state.reshape(rows.len());
    for f in Field::ALL {
        op.apply(&old[f.index()], state.block_mut(f))?;
    }
    state.debug_assert_invariants();
    Ok(())
}

/// Apply `decision` to `space` and transfer every block of `state`.
///
/// Collective. Returns whether the mesh changed.
pub fn apply_decision<L, D, C>(
    space: &mut D,
    comm: &C,
    state: &mut BlockState<L>,
    decision: &RefinementDecision,
) -> Result<bool, MhdError>
where
    L: Distribution,
    D: Discretization,
    C: Communicator,
{
    if !decision.changed() {
        return Ok(false);
    }
    let expected = L::rows(space).len();
    comm.agree(if state.block_len() == expected {
        Ok(())
    } else {
        Err(MhdError::LayoutMismatch {
            expected,
            found: state.block_len(),
        })
    })?;
    let old = gather_blocks(comm, state);
    let mut space = FinishGuard(space);
    comm.agree(space.apply_decision(decision))?;
    comm.agree(space.update())?;
    comm.agree(transfer_blocks(&*space, state, &old))?;
    log::debug!(
        "[{}] split {} merged {} -> {} dofs",
        L::NAME,
        decision.split.len(),
        decision.merge.len(),
        space.global_dofs()
    );
    Ok(true)
}

/// Rebalance ownership of `space` and redistribute every block of `state`.
///
/// Collective.
pub fn rebalance<L, D, C>(
    space: &mut D,
    comm: &C,
    state: &mut BlockState<L>,
) -> Result<(), MhdError>
where
    L: Distribution,
    D: Discretization,
    C: Communicator,
{
    let old = gather_blocks(comm, state);
    let mut space = FinishGuard(space);
    comm.agree(space.rebalance())?;
    comm.agree(transfer_blocks(&*space, state, &old))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::data::field_state::FieldState;
    use crate::discretization::{Domain, QuadSpace};

    #[test]
    fn failed_transfer_still_releases_bookkeeping() {
        let domain = Domain {
            x0: 0.0,
            x1: 1.0,
            y0: 0.0,
            y1: 1.0,
        };
        let mut space = QuadSpace::new(domain, 2, 2, 0, 1).unwrap();
        let cells = space.cells().to_vec();
        let mut state = FieldState::new(space.global_dofs());
        let bogus = RefinementDecision {
            split: vec![crate::topology::forest::TreeCell::new(3, 0, 0)],
            merge: Vec::new(),
        };
        assert!(apply_decision(&mut space, &NoComm, &mut state, &bogus).is_err());
        assert!(!space.has_pending_transfer());
        assert_eq!(state.block_len(), 4);
        assert_eq!(space.cells(), cells.as_slice());
        space.validate_invariants().unwrap();
    }
}
