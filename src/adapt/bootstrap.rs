//! Initial adapt-until-steady loop.
//!
//! Starting from the base mesh, the initial ψ is projected onto a replicated
//! scratch state, j is recovered from it, and the mesh is refined wherever
//! the indicator is large. The loop repeats until the refiner stops marking
//! cells. The scratch state is dropped at the end; the caller projects the
//! initial condition afresh onto the final mesh.

use super::controller::RefinementController;
use super::transfer::{apply_decision, rebalance};
use crate::algs::communicator::Communicator;
use crate::data::field_state::{BootstrapState, Field};
use crate::discretization::{Discretization, QuadSpace};
use crate::mhd_error::MhdError;
use crate::physics::ResistiveMhdOperator;

/// Outcome of [`bootstrap_adaptive_mesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapSummary {
    /// Number of refinement rounds that changed the mesh.
    pub rounds: usize,
    /// Global cell count afterwards.
    pub cells: usize,
}

/// Refine `space` against the scenario's initial condition until the refiner
/// is satisfied. Leaves `operator` assembled for the final numbering.
///
/// Collective.
pub fn bootstrap_adaptive_mesh<C: Communicator>(
    space: &mut QuadSpace,
    comm: &C,
    operator: &mut ResistiveMhdOperator,
    controller: &RefinementController,
) -> Result<BootstrapSummary, MhdError> {
    operator.assemble_problem(space)?;
    let mut state = BootstrapState::new(0);
    operator.initial_conditions(space, 0..space.global_dofs(), &mut state);

    let mut rounds = 0;
    loop {
        let j = comm.agree(operator.current_replicated(space, state.block(Field::Psi)))?;
        state.set_block(Field::Current, &j)?;

        let indicator = comm.agree(controller.estimator.estimate(
            space,
            |f| state.block(f),
            state.version(),
        ))?;
        let decision = controller.refiner.decide(space, comm, &state, &indicator)?;
        if !apply_decision(space, comm, &mut state, &decision)? {
            break;
        }
        rounds += 1;
        rebalance(space, comm, &mut state)?;
        comm.agree(operator.assemble_problem(space))?;
        if comm.is_root() {
            log::info!(
                "initial mesh refinement round {}: {} cells",
                rounds,
                space.global_dofs()
            );
        }
    }

    Ok(BootstrapSummary {
        rounds,
        cells: space.global_dofs(),
    })
}
