//! Parallel plumbing shared by the adaptive core and the solvers.

pub mod communicator;

pub use communicator::{Communicator, LocalComm, NoComm};
