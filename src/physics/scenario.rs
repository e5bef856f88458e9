//! Registry of the built-in initial-value problems.
//!
//! Each scenario provides the initial flux function ψ, the matching current
//! density j = ∇²ψ, the equilibrium ("background") flux used for the
//! perturbation diagnostic, and an optional electric-field source E0 that
//! holds the equilibrium steady against resistive decay.

use super::PhysicsParams;
use crate::discretization::Domain;
use crate::mhd_error::ConfigError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Point function of the scenario parameters.
pub type ProfileFn = fn(&PhysicsParams, f64, f64) -> f64;

/// Island-coalescence equilibrium amplitude.
const COALESCENCE_EPSILON: f64 = 0.2;

/// Built-in problems, keyed by their historical case number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Scenario {
    /// Case 1: Alfvén wave on a uniform field; ideal (η = ν = 0).
    WavePropagation,
    /// Case 2: tearing mode of a Harris-like current sheet.
    TearingMode,
    /// Case 3: coalescence of a chain of magnetic islands.
    IslandCoalescence,
}

impl TryFrom<i32> for Scenario {
    type Error = ConfigError;

    fn try_from(id: i32) -> Result<Self, ConfigError> {
        match id {
            1 => Ok(Scenario::WavePropagation),
            2 => Ok(Scenario::TearingMode),
            3 => Ok(Scenario::IslandCoalescence),
            other => Err(ConfigError::UnknownScenario(other)),
        }
    }
}

impl From<Scenario> for i32 {
    fn from(s: Scenario) -> i32 {
        s.id()
    }
}

/// Profiles of one scenario.
#[derive(Clone, Copy)]
pub struct ScenarioFns {
    pub psi: ProfileFn,
    pub current: ProfileFn,
    pub background_psi: ProfileFn,
    pub source: Option<ProfileFn>,
}

impl Scenario {
    pub fn id(self) -> i32 {
        match self {
            Scenario::WavePropagation => 1,
            Scenario::TearingMode => 2,
            Scenario::IslandCoalescence => 3,
        }
    }

    /// Apply the scenario's parameter overrides.
    pub fn resolve(self, mut params: PhysicsParams) -> PhysicsParams {
        match self {
            Scenario::WavePropagation => {
                params.resistivity = 0.0;
                params.viscosity = 0.0;
            }
            Scenario::TearingMode => {}
            Scenario::IslandCoalescence => params.lambda = 0.5 / PI,
        }
        params
    }

    /// Physical domain; x is periodic.
    pub fn domain(self, params: &PhysicsParams) -> Domain {
        match self {
            Scenario::WavePropagation | Scenario::TearingMode => Domain {
                x0: 0.0,
                x1: params.lx,
                y0: 0.0,
                y1: 1.0,
            },
            Scenario::IslandCoalescence => Domain {
                x0: -1.0,
                x1: 1.0,
                y0: -1.0,
                y1: 1.0,
            },
        }
    }

    pub fn functions(self) -> ScenarioFns {
        match self {
            Scenario::WavePropagation => ScenarioFns {
                psi: |p, x, y| -y + wave_perturbation(p, x, y),
                current: |p, x, y| wave_current(p, x, y),
                background_psi: |_, _, y| -y,
                source: None,
            },
            Scenario::TearingMode => ScenarioFns {
                psi: |p, x, y| sheet_psi(p, y) + wave_perturbation(p, x, y),
                current: |p, x, y| sheet_current(p, y) + wave_current(p, x, y),
                background_psi: |p, _, y| sheet_psi(p, y),
                source: Some(|p, _, y| p.resistivity * sheet_current(p, y)),
            },
            Scenario::IslandCoalescence => ScenarioFns {
                psi: |p, x, y| {
                    islands_psi(p, x, y) + p.alpha * (0.5 * PI * y).cos() * (PI * x).cos()
                },
                current: |p, x, y| {
                    islands_current(p, x, y)
                        - 1.25 * PI * PI * p.alpha * (0.5 * PI * y).cos() * (PI * x).cos()
                },
                background_psi: islands_psi,
                source: Some(|p, x, y| p.resistivity * islands_current(p, x, y)),
            },
        }
    }
}

fn wave_perturbation(p: &PhysicsParams, x: f64, y: f64) -> f64 {
    p.alpha * (PI * y).sin() * (2.0 * PI / p.lx * x).cos()
}

fn wave_current(p: &PhysicsParams, x: f64, y: f64) -> f64 {
    -PI * PI * (1.0 + 4.0 / (p.lx * p.lx)) * wave_perturbation(p, x, y)
}

fn sheet_psi(p: &PhysicsParams, y: f64) -> f64 {
    (p.lambda * (y - 0.5)).cosh().ln() / p.lambda
}

fn sheet_current(p: &PhysicsParams, y: f64) -> f64 {
    p.lambda / (p.lambda * (y - 0.5)).cosh().powi(2)
}

fn islands_psi(p: &PhysicsParams, x: f64, y: f64) -> f64 {
    let l = p.lambda;
    -l * ((y / l).cosh() + COALESCENCE_EPSILON * (x / l).cos()).ln()
}

fn islands_current(p: &PhysicsParams, x: f64, y: f64) -> f64 {
    let l = p.lambda;
    let e = COALESCENCE_EPSILON;
    (e * e - 1.0) / l / ((y / l).cosh() + e * (x / l).cos()).powi(2)
}
