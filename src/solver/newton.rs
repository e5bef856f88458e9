//! Jacobian-free Newton–Krylov solver.
//!
//! Newton's method on `F(x) = 0` where each correction solves `J δ = −F`
//! with restarted, right-preconditioned GMRES. The Jacobian is never formed:
//! `J v ≈ (F(x + εv) − F(x)) / ε`.

use super::{axpy, dot, norm};
use crate::algs::communicator::Communicator;
use crate::mhd_error::MhdError;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Approximate inverse of the Newton Jacobian.
pub trait Preconditioner {
    /// `z ≈ J⁻¹ r` on owned rows.
    fn apply(&self, r: &[f64], z: &mut [f64]);
}

/// `z = r`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreconditioner;

impl Preconditioner for IdentityPreconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }
}

/// Point-Jacobi scaling by a stored inverse diagonal.
#[derive(Debug, Clone)]
pub struct DiagonalPreconditioner {
    inv_diag: Vec<f64>,
}

impl DiagonalPreconditioner {
    pub fn from_diagonal(diag: &[f64]) -> Self {
        Self {
            inv_diag: diag
                .iter()
                .map(|&d| if d != 0.0 { 1.0 / d } else { 1.0 })
                .collect(),
        }
    }
}

impl Preconditioner for DiagonalPreconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        for ((zi, ri), di) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *zi = ri * di;
        }
    }
}

/// What a [`PreconditionerFactory`] may look at when building a preconditioner
/// for the stage equation `k − f(x + dt·k) = 0`.
#[derive(Debug, Clone, Copy)]
pub struct PreconditionerContext<'a> {
    /// Stage step size.
    pub dt: f64,
    /// Diagonal of the linear (diffusive) part of `∂f/∂x`, per unknown.
    pub diffusion_diagonal: &'a [f64],
}

/// Hook that builds a preconditioner for each implicit stage solve.
pub trait PreconditionerFactory: Debug {
    fn name(&self) -> &'static str;
    fn build(&self, ctx: &PreconditionerContext<'_>) -> Box<dyn Preconditioner>;
}

/// Builds [`IdentityPreconditioner`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFactory;

impl PreconditionerFactory for IdentityFactory {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn build(&self, _ctx: &PreconditionerContext<'_>) -> Box<dyn Preconditioner> {
        Box::new(IdentityPreconditioner)
    }
}

/// Jacobi on `I − dt·D`, with `D` the diffusion diagonal.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffusionJacobiFactory;

impl PreconditionerFactory for DiffusionJacobiFactory {
    fn name(&self) -> &'static str {
        "diffusion-jacobi"
    }

    fn build(&self, ctx: &PreconditionerContext<'_>) -> Box<dyn Preconditioner> {
        let diag: Vec<f64> = ctx
            .diffusion_diagonal
            .iter()
            .map(|d| 1.0 - ctx.dt * d)
            .collect();
        Box::new(DiagonalPreconditioner::from_diagonal(&diag))
    }
}

/// Configurable choice of [`PreconditionerFactory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionerKind {
    Identity,
    #[default]
    DiffusionJacobi,
}

impl PreconditionerKind {
    pub fn factory(self) -> Box<dyn PreconditionerFactory> {
        match self {
            PreconditionerKind::Identity => Box::new(IdentityFactory),
            PreconditionerKind::DiffusionJacobi => Box::new(DiffusionJacobiFactory),
        }
    }
}

/// Inner GMRES settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GmresParams {
    pub restart: usize,
    pub max_iter: usize,
    pub rel_tol: f64,
}

impl Default for GmresParams {
    fn default() -> Self {
        Self {
            restart: 50,
            max_iter: 500,
            rel_tol: 1e-8,
        }
    }
}

/// Outer Newton settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonParams {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub max_iter: usize,
    pub fd_epsilon: f64,
    pub gmres: GmresParams,
}

impl Default for NewtonParams {
    fn default() -> Self {
        Self {
            rel_tol: 1e-8,
            abs_tol: 1e-12,
            max_iter: 20,
            fd_epsilon: 1e-7,
            gmres: GmresParams::default(),
        }
    }
}

/// Outcome of a converged Newton solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonReport {
    pub iterations: usize,
    pub krylov_iterations: usize,
    pub residual: f64,
}

/// Newton–GMRES with finite-difference Jacobian actions.
#[derive(Debug, Clone, Default)]
pub struct JfnkSolver {
    params: NewtonParams,
}

impl JfnkSolver {
    pub fn new(params: NewtonParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &NewtonParams {
        &self.params
    }

    /// Solve `F(x) = 0` in place. `residual(x, out)` evaluates the owned rows
    /// of `F`; it may issue collectives. Collective.
    pub fn solve<C, F>(
        &self,
        comm: &C,
        mut residual: F,
        precond: &dyn Preconditioner,
        x: &mut [f64],
    ) -> Result<NewtonReport, MhdError>
    where
        C: Communicator,
        F: FnMut(&[f64], &mut [f64]) -> Result<(), MhdError>,
    {
        let n = x.len();
        let mut r = vec![0.0; n];
        residual(x, &mut r)?;
        let mut r_norm = norm(comm, &r);
        let target = (self.params.rel_tol * r_norm).max(self.params.abs_tol);
        let mut krylov_total = 0;

        let mut delta = vec![0.0; n];
        let mut rhs = vec![0.0; n];
        for it in 0..=self.params.max_iter {
            if r_norm <= target {
                log::debug!(
                    "newton converged in {it} iterations ({krylov_total} gmres, residual {r_norm:e})"
                );
                return Ok(NewtonReport {
                    iterations: it,
                    krylov_iterations: krylov_total,
                    residual: r_norm,
                });
            }
            if it == self.params.max_iter {
                break;
            }
            for (b, ri) in rhs.iter_mut().zip(&r) {
                *b = -ri;
            }
            delta.fill(0.0);
            let x_norm = norm(comm, x);
            let base = r.clone();
            let mut probe = vec![0.0; n];
            let mut f_probe = vec![0.0; n];
            let jacobian = |v: &[f64], out: &mut [f64]| -> Result<(), MhdError> {
                let v_norm = norm(comm, v);
                if v_norm == 0.0 {
                    out.fill(0.0);
                    return Ok(());
                }
                let eps = self.params.fd_epsilon * (1.0 + x_norm) / v_norm;
                for ((p, xi), vi) in probe.iter_mut().zip(x.iter()).zip(v) {
                    *p = xi + eps * vi;
                }
                residual(&probe, &mut f_probe)?;
                for ((o, fp), f0) in out.iter_mut().zip(&f_probe).zip(&base) {
                    *o = (fp - f0) / eps;
                }
                Ok(())
            };
            krylov_total += gmres(comm, &self.params.gmres, jacobian, precond, &rhs, &mut delta)?;
            axpy(1.0, &delta, x);
            residual(x, &mut r)?;
            r_norm = norm(comm, &r);
        }
        Err(MhdError::NonlinearSolve {
            iterations: self.params.max_iter,
            residual: r_norm,
        })
    }
}

/// Restarted right-preconditioned GMRES for `A x = b`, `x` starting at its
/// current contents. Returns the iteration count. Collective.
fn gmres<C, A>(
    comm: &C,
    params: &GmresParams,
    mut apply: A,
    precond: &dyn Preconditioner,
    b: &[f64],
    x: &mut [f64],
) -> Result<usize, MhdError>
where
    C: Communicator,
    A: FnMut(&[f64], &mut [f64]) -> Result<(), MhdError>,
{
    let n = b.len();
    let m = params.restart.max(1);
    let target = params.rel_tol * norm(comm, b);
    let mut total = 0;
    let mut w = vec![0.0; n];
    let mut z = vec![0.0; n];
    let mut r = vec![0.0; n];

    loop {
        apply(x, &mut r)?;
        for (ri, bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
        let beta = norm(comm, &r);
        if beta <= target || beta == 0.0 {
            return Ok(total);
        }
        if total >= params.max_iter {
            return Err(MhdError::LinearSolve {
                iterations: total,
                residual: beta,
            });
        }

        let mut basis: Vec<Vec<f64>> = vec![r.iter().map(|v| v / beta).collect()];
        let mut h = vec![vec![0.0; m]; m + 1];
        let mut g = vec![0.0; m + 1];
        let (mut cs, mut sn) = (vec![0.0; m], vec![0.0; m]);
        g[0] = beta;
        let mut k_used = 0;

        for k in 0..m {
            precond.apply(&basis[k], &mut z);
            apply(&z, &mut w)?;
            for (j, v) in basis.iter().enumerate() {
                h[j][k] = dot(comm, &w, v);
                axpy(-h[j][k], v, &mut w);
            }
            h[k + 1][k] = norm(comm, &w);
            for j in 0..k {
                let t = cs[j] * h[j][k] + sn[j] * h[j + 1][k];
                h[j + 1][k] = -sn[j] * h[j][k] + cs[j] * h[j + 1][k];
                h[j][k] = t;
            }
            let rho = h[k][k].hypot(h[k + 1][k]);
            let breakdown = h[k + 1][k] <= f64::EPSILON * rho;
            if rho == 0.0 {
                break;
            }
            if !breakdown {
                basis.push(w.iter().map(|v| v / h[k + 1][k]).collect());
            }
            cs[k] = h[k][k] / rho;
            sn[k] = h[k + 1][k] / rho;
            h[k][k] = rho;
            h[k + 1][k] = 0.0;
            g[k + 1] = -sn[k] * g[k];
            g[k] *= cs[k];
            k_used = k + 1;
            total += 1;
            if g[k + 1].abs() <= target || breakdown || total >= params.max_iter {
                break;
            }
        }

        // Back substitution and x += M⁻¹ V y.
        let mut y = vec![0.0; k_used];
        for i in (0..k_used).rev() {
            let s: f64 = (i + 1..k_used).map(|j| h[i][j] * y[j]).sum();
            y[i] = (g[i] - s) / h[i][i];
        }
        w.fill(0.0);
        for (yi, v) in y.iter().zip(&basis) {
            axpy(*yi, v, &mut w);
        }
        precond.apply(&w, &mut z);
        axpy(1.0, &z, x);
        if k_used == 0 {
            return Err(MhdError::LinearSolve {
                iterations: total,
                residual: beta,
            });
        }
    }
}
