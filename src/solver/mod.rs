//! Algebraic solver backend.
//!
//! Vectors are distributed by owned rows; every inner product is an
//! all-reduce, so all ranks take identical convergence decisions.

pub mod linear;
pub mod newton;

pub use linear::{CgParams, ConjugateGradient, SolveReport};
pub use newton::{
    DiagonalPreconditioner, DiffusionJacobiFactory, GmresParams, IdentityFactory,
    IdentityPreconditioner, JfnkSolver, NewtonParams, NewtonReport, Preconditioner,
    PreconditionerContext, PreconditionerFactory, PreconditionerKind,
};

use crate::algs::communicator::Communicator;

/// Global inner product of two distributed vectors.
pub fn dot(comm: &impl Communicator, a: &[f64], b: &[f64]) -> f64 {
    comm.allreduce_sum(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

/// Global Euclidean norm of a distributed vector.
pub fn norm(comm: &impl Communicator, a: &[f64]) -> f64 {
    dot(comm, a, a).sqrt()
}

/// `y += a * x`.
pub(crate) fn axpy(a: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
}
