//! Singly diagonally implicit Runge–Kutta family.
//!
//! Each stage solves `k = f(x_stage + a·dt·k)` through
//! [`ResistiveMhdOperator::implicit_solve`].

use super::TimeStepper;
use crate::algs::communicator::Communicator;
use crate::data::field_state::FieldState;
use crate::mhd_error::{ConfigError, MhdError};
use crate::physics::{MeshContext, ResistiveMhdOperator};
use std::f64::consts::PI;

/// Implicit schemes by their numeric code.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImplicitScheme {
    /// Code 1.
    BackwardEuler,
    /// Two-stage, third order; codes 3 (γ = (2−√2)/2, L-stable) and 13
    /// (γ = (3+√3)/6).
    Sdirk23 { gamma: f64 },
    /// Code 4, L-stable three-stage.
    Sdirk33,
    /// Code 12.
    ImplicitMidpoint,
    /// Code 14, three-stage fourth order.
    Sdirk34,
}

impl ImplicitScheme {
    pub fn from_code(code: i32) -> Result<Self, ConfigError> {
        match code {
            1 => Ok(ImplicitScheme::BackwardEuler),
            3 => Ok(ImplicitScheme::Sdirk23 {
                gamma: (2.0 - 2f64.sqrt()) / 2.0,
            }),
            4 => Ok(ImplicitScheme::Sdirk33),
            12 => Ok(ImplicitScheme::ImplicitMidpoint),
            13 => Ok(ImplicitScheme::Sdirk23 {
                gamma: (3.0 + 3f64.sqrt()) / 6.0,
            }),
            14 => Ok(ImplicitScheme::Sdirk34),
            other => Err(ConfigError::UnknownScheme(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ImplicitScheme::BackwardEuler => "backward-euler",
            ImplicitScheme::Sdirk23 { .. } => "sdirk23",
            ImplicitScheme::Sdirk33 => "sdirk33",
            ImplicitScheme::ImplicitMidpoint => "implicit-midpoint",
            ImplicitScheme::Sdirk34 => "sdirk34",
        }
    }
}

/// Runs an [`ImplicitScheme`] with scratch stage buffers.
#[derive(Debug)]
pub struct ImplicitStepper {
    scheme: ImplicitScheme,
    x: FieldState,
    y: FieldState,
    z: FieldState,
    k: FieldState,
}

impl ImplicitStepper {
    pub fn new(scheme: ImplicitScheme) -> Self {
        Self {
            scheme,
            x: FieldState::new(0),
            y: FieldState::new(0),
            z: FieldState::new(0),
            k: FieldState::new(0),
        }
    }

    pub fn scheme(&self) -> ImplicitScheme {
        self.scheme
    }

    fn fit(&mut self, n: usize) {
        for buf in [&mut self.x, &mut self.y, &mut self.z, &mut self.k] {
            if buf.block_len() != n {
                buf.reshape(n);
            }
        }
    }

    /// Stages on the scratch buffers; the result is left in `self.x`.
    fn stages<C: Communicator>(
        &mut self,
        op: &ResistiveMhdOperator,
        ctx: MeshContext<'_, C>,
        dt: f64,
    ) -> Result<(), MhdError> {
        let scheme = self.scheme;
        let Self { x, y, z, k, .. } = self;
        match scheme {
            ImplicitScheme::BackwardEuler => {
                op.implicit_solve(ctx, dt, x, k)?;
                x.axpy(dt, k)?;
            }
            ImplicitScheme::ImplicitMidpoint => {
                op.implicit_solve(ctx, dt / 2.0, x, k)?;
                x.axpy(dt, k)?;
            }
            ImplicitScheme::Sdirk23 { gamma } => {
                op.implicit_solve(ctx, gamma * dt, x, k)?;
                y.copy_from(x)?;
                y.axpy((1.0 - 2.0 * gamma) * dt, k)?;
                x.axpy(dt / 2.0, k)?;
                op.implicit_solve(ctx, gamma * dt, y, k)?;
                x.axpy(dt / 2.0, k)?;
            }
            ImplicitScheme::Sdirk33 => {
                const A: f64 = 0.435866521508458999416019;
                const B: f64 = 1.20849664917601007033648;
                const C: f64 = 0.717933260754229499708010;
                op.implicit_solve(ctx, A * dt, x, k)?;
                y.copy_from(x)?;
                y.axpy((C - A) * dt, k)?;
                z.copy_from(x)?;
                z.axpy(B * dt, k)?;
                op.implicit_solve(ctx, A * dt, y, k)?;
                z.axpy((1.0 - A - B) * dt, k)?;
                op.implicit_solve(ctx, A * dt, z, k)?;
                x.copy_from(z)?;
                x.axpy(A * dt, k)?;
            }
            ImplicitScheme::Sdirk34 => {
                let a = (PI / 18.0).cos() / 3f64.sqrt() + 0.5;
                let b = 1.0 / (6.0 * (2.0 * a - 1.0) * (2.0 * a - 1.0));
                op.implicit_solve(ctx, a * dt, x, k)?;
                y.copy_from(x)?;
                y.axpy((0.5 - a) * dt, k)?;
                z.copy_from(x)?;
                z.axpy(2.0 * a * dt, k)?;
                x.axpy(b * dt, k)?;
                op.implicit_solve(ctx, a * dt, y, k)?;
                z.axpy((1.0 - 4.0 * a) * dt, k)?;
                x.axpy((1.0 - 2.0 * b) * dt, k)?;
                op.implicit_solve(ctx, a * dt, z, k)?;
                x.axpy(b * dt, k)?;
            }
        }
        Ok(())
    }
}

impl<C: Communicator> TimeStepper<C> for ImplicitStepper {
    fn name(&self) -> &'static str {
        self.scheme.name()
    }

    fn step(
        &mut self,
        op: &mut ResistiveMhdOperator,
        ctx: MeshContext<'_, C>,
        state: &mut FieldState,
        t: f64,
        dt: f64,
    ) -> Result<f64, MhdError> {
        self.fit(state.block_len());
        self.x.copy_from(state)?;
        self.stages(op, ctx, dt)?;
        op.refresh_auxiliaries(ctx, &mut self.x)?;
        state.copy_from(&self.x)?;
        Ok(t + dt)
    }
}
