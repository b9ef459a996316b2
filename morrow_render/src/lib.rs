//! GPU-resident matrix storage for skinned-mesh rendering.
//!
//! The render backend itself is a collaborator, consumed through the narrow
//! buffer interface in [`api`]. This crate owns the CPU-side arena that bone
//! transforms are written into every animation tick and the per-in-flight
//! frame buffers the renderer binds.

pub mod api;

mod matrix;

pub use matrix::{MatrixId, MatrixStorage};
