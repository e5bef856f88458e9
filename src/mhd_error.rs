//! MhdError: Unified error type for rmhd-amr public APIs
//!
//! Every fallible operation in the crate returns [`MhdError`]. Errors are
//! grouped into the classes reported by [`MhdError::kind`], which the driver
//! uses to decide between aborting the run and reporting a failed step.

use thiserror::Error;

/// Problems detected while validating a configuration, before any stepping.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The essential-boundary marker list does not match the mesh attributes.
    #[error("essential boundary list has {found} entries but the mesh has {expected} boundary attribute(s)")]
    BoundaryAttributes { expected: usize, found: usize },
    /// Scenario id not present in the registry.
    #[error("unknown scenario id {0}")]
    UnknownScenario(i32),
    /// ODE scheme code not recognised.
    #[error("unknown ODE solver type {0}")]
    UnknownScheme(i32),
    /// A numeric parameter is outside its admissible range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    /// The derefinement threshold must sit strictly below the refinement goal.
    #[error("derefinement threshold {deref} must be strictly below the local refinement goal {refine}")]
    Hysteresis { deref: f64, refine: f64 },
    /// Configuration text could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// Coarse classification of [`MhdError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid setup; terminate before stepping.
    Configuration,
    /// Malformed geometry, coefficients or topology; abort the run.
    Assembly,
    /// A backend solve did not converge; the step failed.
    SolverNonConvergence,
    /// Misuse of a buffer, view or assembled operator across a mesh change.
    Invariant,
    /// Another rank failed; this rank aborts in lockstep.
    Collective,
}

/// Unified error type for rmhd-amr operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MhdError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Non-finite coefficients or degenerate cells encountered during assembly.
    #[error("assembly error at cell {cell}: {reason}")]
    Assembly { cell: usize, reason: String },
    /// A refinement decision or forest operation referenced an invalid cell.
    #[error("topology error: {0}")]
    Topology(String),
    /// Linear backend gave up.
    #[error("linear solve did not converge after {iterations} iterations (residual {residual:e})")]
    LinearSolve { iterations: usize, residual: f64 },
    /// Nonlinear backend gave up.
    #[error("nonlinear solve did not converge after {iterations} Newton iterations (residual {residual:e})")]
    NonlinearSolve { iterations: usize, residual: f64 },
    /// A block handle was used after the state it points into was reshaped.
    #[error("stale field view: handle from generation {handle}, state is at generation {current}")]
    StaleView { handle: u64, current: u64 },
    /// An operator or indicator built for an older discretization was used.
    #[error("stale assembly: built for discretization generation {assembled}, current is {current}")]
    StaleAssembly { assembled: u64, current: u64 },
    /// Buffer length does not match the layout it is used with.
    #[error("layout mismatch: expected {expected} values, found {found}")]
    LayoutMismatch { expected: usize, found: usize },
    /// Another rank reported a failure during a collective agreement.
    #[error("rank {rank} reported a failure; aborting collectively")]
    RemoteFailure { rank: usize },
}

impl MhdError {
    /// Classify the error following the driver's propagation policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MhdError::Config(_) => ErrorKind::Configuration,
            MhdError::Assembly { .. } | MhdError::Topology(_) => ErrorKind::Assembly,
            MhdError::LinearSolve { .. } | MhdError::NonlinearSolve { .. } => {
                ErrorKind::SolverNonConvergence
            }
            MhdError::StaleView { .. }
            | MhdError::StaleAssembly { .. }
            | MhdError::LayoutMismatch { .. } => ErrorKind::Invariant,
            MhdError::RemoteFailure { .. } => ErrorKind::Collective,
        }
    }

    /// Whether the run must stop (everything except solver non-convergence).
    pub fn is_fatal(&self) -> bool {
        self.kind() != ErrorKind::SolverNonConvergence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_failures_are_not_fatal() {
        let e = MhdError::NonlinearSolve {
            iterations: 10,
            residual: 1.0,
        };
        assert_eq!(e.kind(), ErrorKind::SolverNonConvergence);
        assert!(!e.is_fatal());
        let c: MhdError = ConfigError::UnknownScheme(7).into();
        assert!(c.is_fatal());
        assert_eq!(c.to_string(), "unknown ODE solver type 7");
    }
}
