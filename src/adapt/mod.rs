//! Error-driven mesh adaptation.
//!
//! - [`estimator`]: flux-jump indicators of the monitored fields.
//! - [`controller`]: threshold refiner and derefiner producing a globally
//!   agreed [`RefinementDecision`].
//! - [`transfer`]: applies a decision to the discretization and moves every
//!   field block to the new numbering.
//! - [`bootstrap`]: the initial adapt-until-steady loop.

pub mod bootstrap;
pub mod controller;
pub mod estimator;
pub mod transfer;

pub use bootstrap::{BootstrapSummary, bootstrap_adaptive_mesh};
pub use controller::{
    DerefinerParams, FamilyAggregate, RefinementController, RefinementDecision, RefinerParams,
    ThresholdDerefiner, ThresholdRefiner, TotalErrorNorm,
};
pub use estimator::{BlockFluxJumpEstimator, FluxJumpTracker};
pub use transfer::{apply_decision, rebalance};

use crate::discretization::Discretization;
use crate::mhd_error::MhdError;

/// Per-owned-cell composite error, stamped with the space generation and the
/// field-state version it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorIndicator {
    values: Vec<f64>,
    space_generation: u64,
    state_version: u64,
}

impl ErrorIndicator {
    pub fn new(values: Vec<f64>, space_generation: u64, state_version: u64) -> Self {
        Self {
            values,
            space_generation,
            state_version,
        }
    }

    /// Indicator values for the owned rows, in row order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn space_generation(&self) -> u64 {
        self.space_generation
    }

    pub fn state_version(&self) -> u64 {
        self.state_version
    }

    /// Refuse indicators computed for another numbering or from other field content.
    pub fn check_fresh(
        &self,
        space: &impl Discretization,
        state_version: u64,
    ) -> Result<(), MhdError> {
        if self.space_generation != space.generation() {
            return Err(MhdError::StaleAssembly {
                assembled: self.space_generation,
                current: space.generation(),
            });
        }
        if state_version != self.state_version {
            return Err(MhdError::StaleView {
                handle: self.state_version,
                current: state_version,
            });
        }
        let owned = space.owned_rows().len();
        if self.values.len() != owned {
            return Err(MhdError::LayoutMismatch {
                expected: owned,
                found: self.values.len(),
            });
        }
        Ok(())
    }
}
