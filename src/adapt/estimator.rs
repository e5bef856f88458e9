//! Flux-jump error indicators.
//!
//! For every interior face of an owned cell the normal components of the two
//! adjacent cell gradients are compared; the indicator of cell K is
//! `η_K² = Σ_f h_K · len_f · (∂ₙu_K − ∂ₙu_nb)²`. Two trackers (current
//! density and flux) are combined by root-sum-square.

use crate::adapt::ErrorIndicator;
use crate::data::field_state::Field;
use crate::discretization::space::gradient_from_links;
use crate::discretization::{Discretization, LinkTarget, QuadSpace};
use crate::mhd_error::MhdError;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Flux-jump indicator of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FluxJumpTracker {
    field: Field,
}

impl FluxJumpTracker {
    pub fn new(field: Field) -> Self {
        Self { field }
    }

    pub fn field(&self) -> Field {
        self.field
    }

    /// Squared indicator for each owned cell, from a global vector of the field.
    pub fn squared_indicators(
        &self,
        space: &QuadSpace,
        values: &[f64],
    ) -> Result<Vec<f64>, MhdError> {
        let n = space.global_dofs();
        if values.len() != n {
            return Err(MhdError::LayoutMismatch {
                expected: n,
                found: values.len(),
            });
        }
        // Boundary links are skipped: the trackers see interior faces only.
        let grad = |i: usize| {
            gradient_from_links(space.links(i), i, values[i], |l| match l.target {
                LinkTarget::Cell(j) => Some(values[j]),
                LinkTarget::Boundary(_) => None,
            })
        };
        let gradients: Vec<[f64; 2]> = (0..n).map(grad).collect();
        let rows = space.owned_rows();
        let cell = |i: usize| -> f64 {
            let h = space.geometry(i).h();
            space
                .links(i)
                .iter()
                .filter_map(|l| match l.target {
                    LinkTarget::Cell(j) if j != i => {
                        let jump = gradients[i][l.axis] - gradients[j][l.axis];
                        Some(h * l.len * jump * jump)
                    }
                    _ => None,
                })
                .sum()
        };
        #[cfg(feature = "rayon")]
        let out = rows.into_par_iter().map(cell).collect();
        #[cfg(not(feature = "rayon"))]
        let out = rows.map(cell).collect();
        Ok(out)
    }
}

/// Root-sum-square combination of the current-density and flux trackers.
#[derive(Debug, Clone)]
pub struct BlockFluxJumpEstimator {
    trackers: [FluxJumpTracker; 2],
}

impl Default for BlockFluxJumpEstimator {
    fn default() -> Self {
        Self {
            trackers: [
                FluxJumpTracker::new(Field::Current),
                FluxJumpTracker::new(Field::Psi),
            ],
        }
    }
}

impl BlockFluxJumpEstimator {
    pub fn trackers(&self) -> &[FluxJumpTracker; 2] {
        &self.trackers
    }

    /// Composite indicator over the owned cells.
    ///
    /// `global` returns the global vector of a monitored field;
    /// `state_version` is the [`version`](crate::data::FieldState::version)
    /// of the field state it came from.
    pub fn estimate<'a>(
        &self,
        space: &QuadSpace,
        global: impl Fn(Field) -> &'a [f64],
        state_version: u64,
    ) -> Result<ErrorIndicator, MhdError> {
        let mut total = vec![0.0; space.owned_rows().len()];
        for tracker in &self.trackers {
            let eta2 = tracker.squared_indicators(space, global(tracker.field()))?;
            for (t, e) in total.iter_mut().zip(eta2) {
                *t += e;
            }
        }
        for t in &mut total {
            *t = t.sqrt();
        }
        Ok(ErrorIndicator::new(
            total,
            space.generation(),
            state_version,
        ))
    }
}
