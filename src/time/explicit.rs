//! Brailovskaya predictor-corrector step.

use super::TimeStepper;
use crate::algs::communicator::Communicator;
use crate::data::field_state::{Field, FieldState};
use crate::mhd_error::MhdError;
use crate::physics::{Coupling, MeshContext, ResistiveMhdOperator};

/// Two-stage explicit scheme:
///
/// 1. assemble both couplings from the current φ and ψ, then
///    `x* = x + dt·f(x)`;
/// 2. re-assemble only the ψ coupling from `x*`, then
///    `x ← x + dt·f(x*)`;
/// 3. re-derive φ from the new w (and j from ψ).
#[derive(Debug, Default)]
pub struct PredictorCorrector {
    predicted: Option<FieldState>,
    rate: Option<FieldState>,
}

impl<C: Communicator> TimeStepper<C> for PredictorCorrector {
    fn name(&self) -> &'static str {
        "predictor-corrector"
    }

    fn step(
        &mut self,
        op: &mut ResistiveMhdOperator,
        ctx: MeshContext<'_, C>,
        state: &mut FieldState,
        t: f64,
        dt: f64,
    ) -> Result<f64, MhdError> {
        let n = state.block_len();
        let predicted = self.predicted.get_or_insert_with(|| FieldState::new(n));
        let rate = self.rate.get_or_insert_with(|| FieldState::new(n));
        if predicted.block_len() != n {
            predicted.reshape(n);
        }

        op.assemble_coupling(ctx, Coupling::Velocity, state.block(Field::Phi))?;
        op.assemble_coupling(ctx, Coupling::Magnetic, state.block(Field::Psi))?;
        op.explicit_rate(ctx, state, rate)?;
        predicted.copy_from(state)?;
        predicted.axpy(dt, rate)?;

        op.assemble_coupling(ctx, Coupling::Magnetic, predicted.block(Field::Psi))?;
        op.explicit_rate(ctx, predicted, rate)?;
        // Reuse the predictor buffer for the accepted state.
        predicted.copy_from(state)?;
        predicted.axpy(dt, rate)?;
        op.refresh_auxiliaries(ctx, predicted)?;
        state.copy_from(predicted)?;
        Ok(t + dt)
    }
}
