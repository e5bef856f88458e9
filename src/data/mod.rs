//! Data module: block-structured field storage

pub mod field_state;

pub use field_state::{
    BlockHandle, BlockState, Bootstrap, BootstrapState, Evolving, FIELD_COUNT, Field, FieldState,
    Layout,
};
