//! Jacobi-preconditioned conjugate gradients on distributed vectors.

use super::{axpy, dot};
use crate::algs::communicator::Communicator;
use crate::mhd_error::MhdError;
use serde::{Deserialize, Serialize};

/// Stopping criteria for [`ConjugateGradient`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgParams {
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub max_iter: usize,
}

impl Default for CgParams {
    fn default() -> Self {
        Self {
            rel_tol: 1e-12,
            abs_tol: 1e-14,
            max_iter: 2000,
        }
    }
}

/// Outcome of a converged linear solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub iterations: usize,
    pub residual: f64,
}

/// Conjugate gradients for a symmetric positive definite operator.
#[derive(Debug, Clone, Default)]
pub struct ConjugateGradient {
    params: CgParams,
}

impl ConjugateGradient {
    pub fn new(params: CgParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CgParams {
        &self.params
    }

    /// Solve `A x = b` starting from the contents of `x`.
    ///
    /// `apply(v, out)` computes the owned rows of `A v`; it may issue
    /// collectives. `diag` is an optional Jacobi preconditioner (the diagonal
    /// of `A`). Collective.
    pub fn solve<C, F>(
        &self,
        comm: &C,
        mut apply: F,
        diag: Option<&[f64]>,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveReport, MhdError>
    where
        C: Communicator,
        F: FnMut(&[f64], &mut [f64]) -> Result<(), MhdError>,
    {
        let n = b.len();
        if x.len() != n {
            return Err(MhdError::LayoutMismatch {
                expected: n,
                found: x.len(),
            });
        }
        let precondition = |r: &[f64], z: &mut [f64]| match diag {
            Some(d) => {
                for ((zi, ri), di) in z.iter_mut().zip(r).zip(d) {
                    *zi = ri / di;
                }
            }
            None => z.copy_from_slice(r),
        };

        let mut r = vec![0.0; n];
        apply(x, &mut r)?;
        for (ri, bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
        let b_norm = dot(comm, b, b).sqrt();
        let target = (self.params.rel_tol * b_norm).max(self.params.abs_tol);
        let mut res = dot(comm, &r, &r).sqrt();
        if res <= target {
            return Ok(SolveReport {
                iterations: 0,
                residual: res,
            });
        }

        let mut z = vec![0.0; n];
        precondition(&r, &mut z);
        let mut p = z.clone();
        let mut ap = vec![0.0; n];
        let mut rz = dot(comm, &r, &z);

        for it in 1..=self.params.max_iter {
            apply(&p, &mut ap)?;
            let pap = dot(comm, &p, &ap);
            if !(pap > 0.0) {
                return Err(MhdError::LinearSolve {
                    iterations: it,
                    residual: res,
                });
            }
            let alpha = rz / pap;
            axpy(alpha, &p, x);
            axpy(-alpha, &ap, &mut r);
            res = dot(comm, &r, &r).sqrt();
            if res <= target {
                log::trace!("cg converged in {it} iterations (residual {res:e})");
                return Ok(SolveReport {
                    iterations: it,
                    residual: res,
                });
            }
            precondition(&r, &mut z);
            let rz_next = dot(comm, &r, &z);
            let beta = rz_next / rz;
            rz = rz_next;
            for (pi, zi) in p.iter_mut().zip(&z) {
                *pi = zi + beta * *pi;
            }
        }
        Err(MhdError::LinearSolve {
            iterations: self.params.max_iter,
            residual: res,
        })
    }
}
