//! Run configuration.
//!
//! [`MhdConfig`] is plain serde data. A run goes through
//! [`MhdConfig::resolve`] once before anything is built; afterwards the
//! configuration is treated as immutable.

use crate::adapt::{DerefinerParams, RefinerParams, ThresholdDerefiner};
use crate::discretization::space::BOUNDARY_ATTRIBUTE_COUNT;
use crate::mhd_error::ConfigError;
use crate::physics::{PhysicsParams, Scenario};
use crate::solver::{CgParams, NewtonParams, PreconditionerKind};
use crate::time::validate_scheme_code;
use serde::{Deserialize, Serialize};

/// Every knob of a run, with its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MhdConfig {
    pub scenario: Scenario,
    pub physics: PhysicsParams,
    pub dt: f64,
    pub t_final: f64,
    /// Diagnostics cadence in steps.
    pub vis_steps: usize,
    /// Uniform refinements applied to the base grid before partitioning.
    pub serial_refinements: u8,
    /// Uniform refinements applied after partitioning.
    pub parallel_refinements: u8,
    /// Levels the adaptive refiner may add beyond the uniform refinements.
    pub amr_levels: u8,
    /// Base grid `[nx, ny]`; the scenario chooses one when absent.
    pub base_grid: Option<[u32; 2]>,
    pub refiner: RefinerParams,
    pub derefiner: DerefinerParams,
    /// Time integrator code, see [`crate::time`].
    pub ode_solver: i32,
    pub cg: CgParams,
    pub newton: NewtonParams,
    pub preconditioner: PreconditionerKind,
    /// Essential-boundary markers, one per boundary attribute.
    pub essential_boundary: Vec<u8>,
    /// Adapt the mesh every this many steps; 0 keeps the bootstrap mesh.
    pub adapt_every: usize,
}

impl Default for MhdConfig {
    fn default() -> Self {
        Self {
            scenario: Scenario::WavePropagation,
            physics: PhysicsParams::default(),
            dt: 1e-4,
            t_final: 5.0,
            vis_steps: 10,
            serial_refinements: 2,
            parallel_refinements: 0,
            amr_levels: 1,
            base_grid: None,
            refiner: RefinerParams::default(),
            derefiner: DerefinerParams::default(),
            ode_solver: 2,
            cg: CgParams::default(),
            newton: NewtonParams::default(),
            preconditioner: PreconditionerKind::default(),
            essential_boundary: vec![1],
            adapt_every: 0,
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

fn positive(name: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("must be positive and finite, got {v}")))
    }
}

fn non_negative(name: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(invalid(name, format!("must be non-negative and finite, got {v}")))
    }
}

impl MhdConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check every parameter without modifying anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.essential_boundary.len() != BOUNDARY_ATTRIBUTE_COUNT {
            return Err(ConfigError::BoundaryAttributes {
                expected: BOUNDARY_ATTRIBUTE_COUNT,
                found: self.essential_boundary.len(),
            });
        }
        validate_scheme_code(self.ode_solver)?;
        positive("dt", self.dt)?;
        non_negative("t_final", self.t_final)?;
        if self.vis_steps == 0 {
            return Err(invalid("vis_steps", "must be at least 1"));
        }
        if let Some([nx, ny]) = self.base_grid {
            if nx == 0 || ny == 0 {
                return Err(invalid("base_grid", format!("empty grid {nx}x{ny}")));
            }
        }

        let p = &self.physics;
        non_negative("physics.resistivity", p.resistivity)?;
        non_negative("physics.viscosity", p.viscosity)?;
        non_negative("physics.nonlinear_scale", p.nonlinear_scale)?;
        positive("physics.lx", p.lx)?;
        positive("physics.lambda", p.lambda)?;

        let r = &self.refiner;
        if !(r.total_fraction > 0.0 && r.total_fraction <= 1.0) {
            return Err(invalid(
                "refiner.total_fraction",
                format!("must lie in (0, 1], got {}", r.total_fraction),
            ));
        }
        non_negative("refiner.local_err_goal", r.local_err_goal)?;
        non_negative("refiner.total_err_goal", r.total_err_goal)?;
        if r.max_elements == 0 {
            return Err(invalid("refiner.max_elements", "must be at least 1"));
        }
        non_negative("derefiner.threshold", self.derefiner.threshold)?;
        ThresholdDerefiner::new(self.derefiner, r.local_err_goal)?;

        positive("cg.rel_tol", self.cg.rel_tol)?;
        positive("newton.rel_tol", self.newton.rel_tol)?;
        positive("newton.fd_epsilon", self.newton.fd_epsilon)?;
        if self.newton.gmres.restart == 0 {
            return Err(invalid("newton.gmres.restart", "must be at least 1"));
        }
        Ok(())
    }

    /// Validate, then fill in everything derived from other settings:
    /// scenario parameter overrides, the base grid and the maximum
    /// refinement level.
    pub fn resolve(mut self) -> Result<Self, ConfigError> {
        self.validate()?;
        self.physics = self.scenario.resolve(self.physics);
        if self.base_grid.is_none() {
            self.base_grid = Some(self.default_base_grid());
        }
        self.refiner.max_level = self
            .serial_refinements
            .saturating_add(self.parallel_refinements)
            .saturating_add(self.amr_levels);
        Ok(self)
    }

    /// Square base cells over the scenario's domain.
    fn default_base_grid(&self) -> [u32; 2] {
        let domain = self.scenario.domain(&self.physics);
        let ratio = (domain.width() / domain.height()).round().max(1.0) as u32;
        [2 * ratio, 2]
    }

    /// Base grid after [`MhdConfig::resolve`].
    pub fn grid(&self) -> [u32; 2] {
        self.base_grid.unwrap_or_else(|| self.default_base_grid())
    }
}
