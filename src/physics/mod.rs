//! Reduced resistive MHD physics: problem parameters, the scenario registry
//! and the coupled-field operator.

pub mod operator;
pub mod scenario;

pub use operator::{Auxiliary, Coupling, Diagnostics, MeshContext, ResistiveMhdOperator};
pub use scenario::{ProfileFn, Scenario, ScenarioFns};

use serde::{Deserialize, Serialize};

/// Transport coefficients and scenario shape parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsParams {
    /// Resistivity η.
    pub resistivity: f64,
    /// Viscosity ν.
    pub viscosity: f64,
    /// Scale of the bracket nonlinearities; 0 leaves pure diffusion.
    pub nonlinear_scale: f64,
    /// Perturbation amplitude.
    pub alpha: f64,
    /// Domain length in x for the channel scenarios.
    pub lx: f64,
    /// Current-sheet width parameter.
    pub lambda: f64,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            resistivity: 1e-3,
            viscosity: 1e-3,
            nonlinear_scale: 1.0,
            alpha: 0.001,
            lx: 3.0,
            lambda: 5.0,
        }
    }
}
