//! Static per-effect parameters.
//!
//! Definitions are resolved by the effect registry and shared read-only
//! across the engine; buckets read them and never mutate them.

/// Parameters of one effect definition.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PfxDefinition {
    /// Registry identity, stable for the process lifetime.
    pub name: String,
    /// Milliseconds between arming an emitter and its next burst.
    pub pps_create_em_delay: u64,
    /// Particles spawned per burst.
    pub pps_count: u32,
    /// Particle block length per emitter slot.
    pub max_particles: usize,
    /// Lifetime of a spawned particle.
    pub particle_lifetime_ms: u64,
    /// Initial particle speed, in units per second.
    pub emission_speed: f32,
    /// Whether fresh emitters start in looped mode.
    pub looped_default: bool,
    /// Preferred effect duration, consumed by the effect-transition logic.
    /// Zero means unbounded.
    pub preferred_duration_ms: u64,
}

impl Default for PfxDefinition {
    fn default() -> Self {
        Self {
            name: String::new(),
            pps_create_em_delay: 0,
            pps_count: 1,
            max_particles: 64,
            particle_lifetime_ms: 1000,
            emission_speed: 1.0,
            looped_default: false,
            preferred_duration_ms: 0,
        }
    }
}
