#![cfg_attr(docsrs, feature(doc_cfg))]
//! # rmhd-amr
//!
//! rmhd-amr advances the four coupled scalar fields of 2D reduced resistive
//! MHD (stream function φ, flux function ψ, vorticity w, current density j)
//! on an adaptively refined quadtree, in serial or across ranks.
//!
//! ## Features
//! - Block field state with four equal-length blocks, in a replicated
//!   bootstrap layout or a distributed evolving layout
//! - Flux-jump error estimation on j and ψ with threshold refinement and
//!   optional derefinement, agreed collectively across ranks
//! - Lossless transfer of every field block across refinement, derefinement
//!   and rebalancing
//! - Explicit predictor-corrector and a family of SDIRK integrators solved by
//!   Jacobian-free Newton–Krylov with pluggable preconditioners
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! rmhd-amr = "0.1"
//! # Optional features:
//! # features = ["mpi-support","rayon"]
//! ```
//!
//! A run is configured with [`config::MhdConfig`] and driven by
//! [`driver::Simulation`]; lower-level pieces (estimator, refiner, transfer,
//! operator, steppers) are usable on their own.
//!
//! ## Determinism
//!
//! Every refinement decision is taken from all-gathered or all-reduced data,
//! sorted by error and then by cell key, so all ranks reach identical meshes.

pub mod adapt;
pub mod algs;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod discretization;
pub mod driver;
pub mod mhd_error;
pub mod physics;
pub mod solver;
pub mod time;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::adapt::{
        DerefinerParams, ErrorIndicator, RefinementController, RefinementDecision, RefinerParams,
        bootstrap_adaptive_mesh,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    pub use crate::config::MhdConfig;
    pub use crate::data::{BootstrapState, Field, FieldState};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::discretization::{Discretization, Domain, QuadSpace};
    pub use crate::driver::{MemorySink, Simulation, Snapshot, SnapshotSink};
    pub use crate::mhd_error::{ConfigError, ErrorKind, MhdError};
    pub use crate::physics::{MeshContext, PhysicsParams, ResistiveMhdOperator, Scenario};
    pub use crate::time::{TimeStepper, stepper_from_code};
    pub use crate::topology::forest::{QuadForest, TreeCell};
}
