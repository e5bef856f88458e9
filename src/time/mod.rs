//! Time integrators for the coupled MHD system.
//!
//! The concrete integrator is chosen once, from its numeric scheme code, by
//! [`stepper_from_code`]:
//!
//! | code | scheme |
//! |------|--------|
//! | 1  | backward Euler |
//! | 2  | Brailovskaya predictor-corrector (explicit) |
//! | 3  | SDIRK23, L-stable |
//! | 4  | SDIRK33 |
//! | 12 | implicit midpoint |
//! | 13 | SDIRK23, A-stable |
//! | 14 | SDIRK34 |

pub mod explicit;
pub mod implicit;

pub use explicit::PredictorCorrector;
pub use implicit::{ImplicitScheme, ImplicitStepper};

use crate::algs::communicator::Communicator;
use crate::data::field_state::FieldState;
use crate::mhd_error::{ConfigError, MhdError};
use crate::physics::{MeshContext, ResistiveMhdOperator};

/// Advances a [`FieldState`] by one step.
pub trait TimeStepper<C: Communicator> {
    fn name(&self) -> &'static str;

    /// Advance `state` from `t` by `dt` and return the new time. On error the
    /// state is left as it was. Collective.
    fn step(
        &mut self,
        op: &mut ResistiveMhdOperator,
        ctx: MeshContext<'_, C>,
        state: &mut FieldState,
        t: f64,
        dt: f64,
    ) -> Result<f64, MhdError>;
}

/// Code of the explicit predictor-corrector scheme.
pub const PREDICTOR_CORRECTOR_CODE: i32 = 2;

/// Build the integrator for a scheme code.
pub fn stepper_from_code<C: Communicator>(
    code: i32,
) -> Result<Box<dyn TimeStepper<C>>, ConfigError> {
    if code == PREDICTOR_CORRECTOR_CODE {
        return Ok(Box::new(PredictorCorrector::default()));
    }
    let scheme = ImplicitScheme::from_code(code)?;
    Ok(Box::new(ImplicitStepper::new(scheme)))
}

/// Whether `code` names a known scheme.
pub fn validate_scheme_code(code: i32) -> Result<(), ConfigError> {
    if code == PREDICTOR_CORRECTOR_CODE {
        Ok(())
    } else {
        ImplicitScheme::from_code(code).map(|_| ())
    }
}
