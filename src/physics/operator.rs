//! Coupled-field operator of reduced resistive MHD.
//!
//! With u = ẑ×∇φ, B = ẑ×∇ψ and L the discrete Laplacian:
//!
//! ```text
//! ∂ψ/∂t = −s·u·∇ψ + η Lψ − E0
//! ∂w/∂t = −s·u·∇w + s·B·∇j + ν Lw
//! Lφ = w   (φ = 0 on the boundary),   j = Lψ
//! ```
//!
//! φ and j are never advanced in time; they are re-derived from w and ψ.
//! Everything assembled here is stamped with the discretization generation
//! and refused once the mesh has been renumbered.

use super::PhysicsParams;
use super::scenario::Scenario;
use crate::algs::communicator::Communicator;
use crate::data::field_state::{BlockState, Field, FieldState, Layout};
use crate::discretization::{Discretization, QuadSpace};
use crate::mhd_error::MhdError;
use crate::solver::{
    CgParams, ConjugateGradient, JfnkSolver, NewtonParams, NewtonReport, PreconditionerContext,
    PreconditionerFactory,
};
use std::ops::Range;

/// Discretization and communicator an operator call works against.
pub struct MeshContext<'a, C> {
    pub space: &'a QuadSpace,
    pub comm: &'a C,
}

impl<C> Clone for MeshContext<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for MeshContext<'_, C> {}

impl<'a, C: Communicator> MeshContext<'a, C> {
    pub fn new(space: &'a QuadSpace, comm: &'a C) -> Self {
        Self { space, comm }
    }
}

/// Bracket coupling assembled from one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    /// u = ẑ×∇φ, from the stream function.
    Velocity,
    /// B = ẑ×∇ψ, from the flux function.
    Magnetic,
}

/// Field recovered from another by an elliptic solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auxiliary {
    /// φ from w by solving Lφ = w.
    StreamFunction,
    /// j from ψ by the lumped-mass solve of j = Lψ.
    CurrentDensity,
}

/// Derived fields for output.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    /// ψ − ψ_background on owned rows.
    pub perturbation: Vec<f64>,
    /// Current density on owned rows.
    pub current: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Assembly {
    generation: u64,
    rows: Range<usize>,
    psi_bc: Vec<f64>,
    zero_bc: Vec<f64>,
    source: Vec<f64>,
    background: Vec<f64>,
    area: Vec<f64>,
    /// Diagonal of −K (positive).
    poisson_diag: Vec<f64>,
    /// Diagonal of the Laplacian (non-positive).
    laplacian_diag: Vec<f64>,
    velocity: Vec<[f64; 2]>,
    magnetic: Vec<[f64; 2]>,
}

#[inline]
fn dot2(a: [f64; 2], b: [f64; 2]) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

/// Reduced resistive MHD right-hand side with its elliptic sub-solves.
#[derive(Debug)]
pub struct ResistiveMhdOperator {
    params: PhysicsParams,
    scenario: Scenario,
    cg: ConjugateGradient,
    newton: JfnkSolver,
    factory: Box<dyn PreconditionerFactory>,
    assembly: Option<Assembly>,
}

impl ResistiveMhdOperator {
    /// `params` are used as given; apply [`Scenario::resolve`] beforehand.
    pub fn new(
        scenario: Scenario,
        params: PhysicsParams,
        cg: CgParams,
        newton: NewtonParams,
        factory: Box<dyn PreconditionerFactory>,
    ) -> Self {
        Self {
            params,
            scenario,
            cg: ConjugateGradient::new(cg),
            newton: JfnkSolver::new(newton),
            factory,
            assembly: None,
        }
    }

    pub fn params(&self) -> &PhysicsParams {
        &self.params
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Generation of the discretization the operator was assembled for.
    pub fn assembled_generation(&self) -> Option<u64> {
        self.assembly.as_ref().map(|a| a.generation)
    }

    /// Assemble boundary data, sources and diagonals for the current numbering.
    /// Couplings are reset to zero.
    pub fn assemble_problem(&mut self, space: &QuadSpace) -> Result<(), MhdError> {
        space.check_geometry()?;
        let p = self.params;
        let fns = self.scenario.functions();
        let rows = space.owned_rows();

        let psi_bc = space.boundary_values(|x, y| (fns.psi)(&p, x, y));
        if let Some(k) = psi_bc.iter().position(|v| !v.is_finite()) {
            return Err(MhdError::Assembly {
                cell: space.boundary_faces()[k].cell,
                reason: "non-finite boundary value".into(),
            });
        }
        let source = match fns.source {
            Some(e0) => space.project(|x, y| e0(&p, x, y), rows.clone()),
            None => vec![0.0; rows.len()],
        };
        if let Some(i) = source.iter().position(|v| !v.is_finite()) {
            return Err(MhdError::Assembly {
                cell: rows.start + i,
                reason: "non-finite source coefficient".into(),
            });
        }
        let background = space.project(|x, y| (fns.background_psi)(&p, x, y), rows.clone());
        let area = space.areas(rows.clone());
        let kdiag = space.stiffness_diagonal(rows.clone());
        let poisson_diag = kdiag.iter().map(|d| -d).collect();
        let laplacian_diag = kdiag.iter().zip(&area).map(|(d, a)| d / a).collect();
        let n = rows.len();

        self.assembly = Some(Assembly {
            generation: space.generation(),
            rows,
            zero_bc: vec![0.0; psi_bc.len()],
            psi_bc,
            source,
            background,
            area,
            poisson_diag,
            laplacian_diag,
            velocity: vec![[0.0; 2]; n],
            magnetic: vec![[0.0; 2]; n],
        });
        log::debug!(
            "assembled operator for generation {} ({} owned rows)",
            space.generation(),
            n
        );
        Ok(())
    }

    fn assembly(&self, space: &QuadSpace) -> Result<&Assembly, MhdError> {
        let a = self.assembly.as_ref().ok_or_else(|| MhdError::Assembly {
            cell: 0,
            reason: "operator used before assembly".into(),
        })?;
        if a.generation != space.generation() {
            return Err(MhdError::StaleAssembly {
                assembled: a.generation,
                current: space.generation(),
            });
        }
        Ok(a)
    }

    fn check_rows(a: &Assembly, len: usize) -> Result<(), MhdError> {
        if len != a.rows.len() {
            return Err(MhdError::LayoutMismatch {
                expected: a.rows.len(),
                found: len,
            });
        }
        Ok(())
    }

    fn rotated_gradient<C: Communicator>(
        ctx: MeshContext<'_, C>,
        a: &Assembly,
        coupling: Coupling,
        values: &[f64],
    ) -> Result<Vec<[f64; 2]>, MhdError> {
        Self::check_rows(a, values.len())?;
        let global = ctx.comm.allgather_f64(values);
        let bc = match coupling {
            Coupling::Velocity => &a.zero_bc,
            Coupling::Magnetic => &a.psi_bc,
        };
        let grad = ctx.space.gradient(&global, Some(bc), a.rows.clone())?;
        Ok(grad.into_iter().map(|[gx, gy]| [-gy, gx]).collect())
    }

    /// Re-assemble one bracket coupling from owned `values` of its source field.
    /// Collective.
    pub fn assemble_coupling<C: Communicator>(
        &mut self,
        ctx: MeshContext<'_, C>,
        coupling: Coupling,
        values: &[f64],
    ) -> Result<(), MhdError> {
        let field = Self::rotated_gradient(ctx, self.assembly(ctx.space)?, coupling, values)?;
        if let Some(a) = self.assembly.as_mut() {
            match coupling {
                Coupling::Velocity => a.velocity = field,
                Coupling::Magnetic => a.magnetic = field,
            }
        }
        Ok(())
    }

    fn stream_function<C: Communicator>(
        &self,
        ctx: MeshContext<'_, C>,
        a: &Assembly,
        w: &[f64],
    ) -> Result<Vec<f64>, MhdError> {
        Self::check_rows(a, w.len())?;
        let b: Vec<f64> = w.iter().zip(&a.area).map(|(w, ar)| -w * ar).collect();
        let mut phi = vec![0.0; w.len()];
        let apply = |v: &[f64], out: &mut [f64]| -> Result<(), MhdError> {
            let global = ctx.comm.allgather_f64(v);
            ctx.space.stiffness_apply(&global, None, a.rows.clone(), out)?;
            for o in out.iter_mut() {
                *o = -*o;
            }
            Ok(())
        };
        let report = self
            .cg
            .solve(ctx.comm, apply, Some(&a.poisson_diag), &b, &mut phi)?;
        log::trace!("stream function solve: {} cg iterations", report.iterations);
        Ok(phi)
    }

    fn current_density<C: Communicator>(
        ctx: MeshContext<'_, C>,
        a: &Assembly,
        psi: &[f64],
    ) -> Result<Vec<f64>, MhdError> {
        Self::check_rows(a, psi.len())?;
        let global = ctx.comm.allgather_f64(psi);
        let mut j = vec![0.0; psi.len()];
        ctx.space
            .laplacian(&global, Some(&a.psi_bc), a.rows.clone(), &mut j)?;
        Ok(j)
    }

    /// Solve for an auxiliary field from owned rows of its primary field.
    /// Collective.
    pub fn derive_auxiliary<C: Communicator>(
        &self,
        ctx: MeshContext<'_, C>,
        aux: Auxiliary,
        primary: &[f64],
    ) -> Result<Vec<f64>, MhdError> {
        let a = self.assembly(ctx.space)?;
        match aux {
            Auxiliary::StreamFunction => self.stream_function(ctx, a, primary),
            Auxiliary::CurrentDensity => Self::current_density(ctx, a, primary),
        }
    }

    /// j = Lψ on every row from a replicated ψ. Local.
    pub fn current_replicated(&self, space: &QuadSpace, psi: &[f64]) -> Result<Vec<f64>, MhdError> {
        let a = self.assembly(space)?;
        let n = space.global_dofs();
        let mut j = vec![0.0; n];
        space.laplacian(psi, Some(&a.psi_bc), 0..n, &mut j)?;
        Ok(j)
    }

    /// ψ and w rates from given couplings. Collective.
    #[allow(clippy::too_many_arguments)]
    fn rates<C: Communicator>(
        &self,
        ctx: MeshContext<'_, C>,
        a: &Assembly,
        (psi, w, j): (&[f64], &[f64], &[f64]),
        velocity: &[[f64; 2]],
        magnetic: &[[f64; 2]],
        dpsi: &mut [f64],
        dw: &mut [f64],
    ) -> Result<(), MhdError> {
        let rows = a.rows.clone();
        let space = ctx.space;
        let psi_g = ctx.comm.allgather_f64(psi);
        let w_g = ctx.comm.allgather_f64(w);
        let j_g = ctx.comm.allgather_f64(j);
        let grad_psi = space.gradient(&psi_g, Some(&a.psi_bc), rows.clone())?;
        let grad_w = space.gradient(&w_g, Some(&a.zero_bc), rows.clone())?;
        let grad_j = space.gradient(&j_g, None, rows.clone())?;
        space.laplacian(&psi_g, Some(&a.psi_bc), rows.clone(), dpsi)?;
        space.laplacian(&w_g, Some(&a.zero_bc), rows.clone(), dw)?;

        let PhysicsParams {
            resistivity: eta,
            viscosity: nu,
            nonlinear_scale: s,
            ..
        } = self.params;
        for i in 0..dpsi.len() {
            let u = velocity[i];
            let b = magnetic[i];
            dpsi[i] = -s * dot2(u, grad_psi[i]) + eta * dpsi[i] - a.source[i];
            dw[i] = -s * dot2(u, grad_w[i]) + s * dot2(b, grad_j[i]) + nu * dw[i];
        }
        let bad = dpsi
            .iter()
            .zip(dw.iter())
            .position(|(p, w)| !(p.is_finite() && w.is_finite()));
        ctx.comm.agree(match bad {
            Some(i) => Err(MhdError::Assembly {
                cell: rows.start + i,
                reason: "non-finite coupling term".into(),
            }),
            None => Ok(()),
        })
    }

    /// Rates with φ, j and both couplings re-derived from ψ and w.
    fn full_rates<C: Communicator>(
        &self,
        ctx: MeshContext<'_, C>,
        a: &Assembly,
        psi: &[f64],
        w: &[f64],
        dpsi: &mut [f64],
        dw: &mut [f64],
    ) -> Result<(), MhdError> {
        let phi = self.stream_function(ctx, a, w)?;
        let velocity = Self::rotated_gradient(ctx, a, Coupling::Velocity, &phi)?;
        let magnetic = Self::rotated_gradient(ctx, a, Coupling::Magnetic, psi)?;
        let j = Self::current_density(ctx, a, psi)?;
        self.rates(ctx, a, (psi, w, &j), &velocity, &magnetic, dpsi, dw)
    }

    fn prepare_rate(a: &Assembly, x: &FieldState, rate: &mut FieldState) -> Result<(), MhdError> {
        Self::check_rows(a, x.block_len())?;
        if rate.block_len() != x.block_len() {
            rate.reshape(x.block_len());
        }
        rate.block_mut(Field::Phi).fill(0.0);
        rate.block_mut(Field::Current).fill(0.0);
        Ok(())
    }

    /// Rate of `x` using the couplings last assembled with
    /// [`ResistiveMhdOperator::assemble_coupling`]; j is derived from x's ψ.
    /// φ and j rates are zero. Collective.
    pub fn explicit_rate<C: Communicator>(
        &self,
        ctx: MeshContext<'_, C>,
        x: &FieldState,
        rate: &mut FieldState,
    ) -> Result<(), MhdError> {
        let a = self.assembly(ctx.space)?;
        Self::prepare_rate(a, x, rate)?;
        let j = Self::current_density(ctx, a, x.block(Field::Psi))?;
        let [_, dpsi, dw, _] = rate.blocks_mut();
        self.rates(
            ctx,
            a,
            (x.block(Field::Psi), x.block(Field::Omega), &j),
            &a.velocity,
            &a.magnetic,
            dpsi,
            dw,
        )
    }

    /// Right-hand side `f(x, t)`; the system is autonomous. Does not touch the
    /// assembled couplings, so repeated calls on the same state agree. Collective.
    pub fn eval_rhs<C: Communicator>(
        &self,
        ctx: MeshContext<'_, C>,
        x: &FieldState,
        _time: f64,
        rate: &mut FieldState,
    ) -> Result<(), MhdError> {
        let a = self.assembly(ctx.space)?;
        Self::prepare_rate(a, x, rate)?;
        let [_, dpsi, dw, _] = rate.blocks_mut();
        self.full_rates(ctx, a, x.block(Field::Psi), x.block(Field::Omega), dpsi, dw)
    }

    /// Solve `k = f(x + dt·k)` for the ψ and w rates with JFNK. φ and j
    /// rates of `k` are zero. Collective.
    pub fn implicit_solve<C: Communicator>(
        &self,
        ctx: MeshContext<'_, C>,
        dt: f64,
        x: &FieldState,
        k: &mut FieldState,
    ) -> Result<NewtonReport, MhdError> {
        let a = self.assembly(ctx.space)?;
        Self::prepare_rate(a, x, k)?;
        let n = a.rows.len();
        let x_psi = x.block(Field::Psi);
        let x_w = x.block(Field::Omega);

        let mut y = vec![0.0; 2 * n];
        {
            let (kp, kw) = y.split_at_mut(n);
            self.full_rates(ctx, a, x_psi, x_w, kp, kw)?;
        }

        let diffusion: Vec<f64> = a
            .laplacian_diag
            .iter()
            .map(|d| self.params.resistivity * d)
            .chain(a.laplacian_diag.iter().map(|d| self.params.viscosity * d))
            .collect();
        let pc = self.factory.build(&PreconditionerContext {
            dt,
            diffusion_diagonal: &diffusion,
        });

        let mut stage_psi = vec![0.0; n];
        let mut stage_w = vec![0.0; n];
        let residual = |k: &[f64], out: &mut [f64]| -> Result<(), MhdError> {
            let (kp, kw) = k.split_at(n);
            for i in 0..n {
                stage_psi[i] = x_psi[i] + dt * kp[i];
                stage_w[i] = x_w[i] + dt * kw[i];
            }
            {
                let (op, ow) = out.split_at_mut(n);
                self.full_rates(ctx, a, &stage_psi, &stage_w, op, ow)?;
            }
            for (o, ki) in out.iter_mut().zip(k) {
                *o = ki - *o;
            }
            Ok(())
        };
        let report = self.newton.solve(ctx.comm, residual, pc.as_ref(), &mut y)?;
        k.set_block(Field::Psi, &y[..n])?;
        k.set_block(Field::Omega, &y[n..])?;
        Ok(report)
    }

    /// Re-derive φ from w and j from ψ in place. Collective.
    pub fn refresh_auxiliaries<C: Communicator>(
        &self,
        ctx: MeshContext<'_, C>,
        state: &mut FieldState,
    ) -> Result<(), MhdError> {
        let a = self.assembly(ctx.space)?;
        let phi = self.stream_function(ctx, a, state.block(Field::Omega))?;
        let j = Self::current_density(ctx, a, state.block(Field::Psi))?;
        state.set_block(Field::Phi, &phi)?;
        state.set_block(Field::Current, &j)
    }

    /// Perturbation ψ − ψ_background and current density of `state`. Collective.
    pub fn compute_derived_diagnostics<C: Communicator>(
        &self,
        ctx: MeshContext<'_, C>,
        state: &FieldState,
    ) -> Result<Diagnostics, MhdError> {
        let a = self.assembly(ctx.space)?;
        let psi = state.block(Field::Psi);
        Self::check_rows(a, psi.len())?;
        let perturbation = psi.iter().zip(&a.background).map(|(p, b)| p - b).collect();
        let current = Self::current_density(ctx, a, psi)?;
        Ok(Diagnostics {
            perturbation,
            current,
        })
    }

    /// Project the scenario's initial condition onto `rows`: φ = w = 0 and ψ,
    /// j from their profiles. Reshapes `state`.
    pub fn initial_conditions<L: Layout>(
        &self,
        space: &QuadSpace,
        rows: Range<usize>,
        state: &mut BlockState<L>,
    ) {
        let p = self.params;
        let fns = self.scenario.functions();
        state.reshape(rows.len());
        let psi = space.project(|x, y| (fns.psi)(&p, x, y), rows.clone());
        let current = space.project(|x, y| (fns.current)(&p, x, y), rows);
        let [_, psi_block, _, current_block] = state.blocks_mut();
        psi_block.copy_from_slice(&psi);
        current_block.copy_from_slice(&current);
    }
}
