//! Mesh topology: the quadtree forest and its cell addressing.
//!
//! The forest is replicated on every rank; ownership and numbering live in
//! [`crate::discretization::QuadSpace`].

pub mod forest;

pub use forest::{Direction, FaceNeighbors, QuadForest, TreeCell};
