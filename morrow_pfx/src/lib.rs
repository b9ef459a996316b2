//! Particle-effect pools and emitter handles.
//!
//! Each distinct effect definition gets one [`PfxBucket`] holding the
//! CPU-side particle and emitter state; [`PfxObjects`] owns the buckets for
//! a world and routes emitter creation. Gameplay code only ever touches
//! particle state through [`PfxEmitter`] handles, which are safe to mutate
//! from worker threads while the tick and render passes run elsewhere in the
//! frame.

pub mod definition;

mod bucket;
mod emitter;
mod objects;

pub use bucket::{Particle, PfxBucket, SpillBlock, SpillId};
pub use definition::PfxDefinition;
pub use emitter::PfxEmitter;
pub use objects::PfxObjects;
