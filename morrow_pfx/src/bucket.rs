use std::sync::Arc;

use glam::Vec3;
use morrow_arena::FreeList;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use slab::Slab;
use tracing::trace_span;

use crate::definition::PfxDefinition;
use crate::emitter::PfxEmitter;

/// Index of a spill block within a bucket.
///
/// Stays valid until [`PfxBucket::release_spill`], independently of the
/// emitter slot the block was attached to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpillId(pub(crate) usize);

/// Secondary storage preserving an emitter's position and direction after
/// its primary slot has been recycled.
#[derive(Copy, Clone, Debug)]
pub struct SpillBlock {
    pub pos: Vec3,
    pub dir: [Vec3; 3],
    // Slot the block mirrors, cleared when the slot is recycled.
    slot: Option<u32>,
}

/// One renderable particle.
#[derive(Copy, Clone, Debug, Default)]
pub struct Particle {
    pub pos: Vec3,
    pub vel: Vec3,
    pub life_ms: u64,
}

impl Particle {
    pub const fn is_alive(&self) -> bool {
        self.life_ms > 0
    }
}

/// Per-slot emitter runtime state.
#[derive(Clone, Debug)]
struct EmitterState {
    pos: Vec3,
    target: Option<Vec3>,
    dir: [Vec3; 3],
    active: bool,
    looped: bool,
    wait_for_next_ms: u64,
    // Chained successor slot, kept in sync by every mutator.
    next: Option<u32>,
    block: Option<usize>,
}

impl EmitterState {
    fn cleared(def: &PfxDefinition) -> Self {
        Self {
            pos: Vec3::ZERO,
            target: None,
            dir: [Vec3::X, Vec3::Y, Vec3::Z],
            active: false,
            looped: def.looped_default,
            wait_for_next_ms: 0,
            next: None,
            block: None,
        }
    }
}

/// Particle and emitter pool for one effect definition.
///
/// The bucket owns the CPU-side particle array the renderer consumes, the
/// per-slot emitter descriptors gameplay code mutates through [`PfxEmitter`]
/// handles, and the spill blocks the effect-transition logic parks state in.
/// Every operation takes the bucket's single lock once; mutations applied to
/// a chained slot sequence happen under that one acquisition, so observers
/// never see a half-propagated chain.
pub struct PfxBucket {
    def: Arc<PfxDefinition>,
    inner: Mutex<BucketInner>,
}

struct BucketInner {
    val: Vec<EmitterState>,
    free_emitter: FreeList,
    blocks: Slab<SpillBlock>,
    // `max_particles` entries per slot, parallel to `val`.
    particles: Vec<Particle>,
}

impl PfxBucket {
    pub(crate) fn new(def: Arc<PfxDefinition>) -> Self {
        Self {
            def,
            inner: Mutex::new(BucketInner {
                val: Vec::new(),
                free_emitter: FreeList::new(),
                blocks: Slab::new(),
                particles: Vec::new(),
            }),
        }
    }

    pub fn definition(&self) -> &Arc<PfxDefinition> {
        &self.def
    }

    /// Binds a fresh emitter slot, recycling the most recently freed one.
    pub fn alloc_emitter(self: &Arc<Self>) -> PfxEmitter {
        let _span = trace_span!("PfxBucket::alloc_emitter").entered();

        let mut inner = self.inner.lock();

        let id = match inner.free_emitter.pop() {
            Some(id) => {
                inner.val[id as usize] = EmitterState::cleared(&self.def);
                id
            }
            None => {
                let id = inner.val.len() as u32;
                inner.val.push(EmitterState::cleared(&self.def));
                let len = inner.val.len() * self.def.max_particles;
                inner.particles.resize(len, Particle::default());
                id
            }
        };

        drop(inner);
        PfxEmitter::bind(Arc::downgrade(self), id)
    }

    /// Releases an emitter slot back to the free list.
    ///
    /// Reached only from [`PfxEmitter`]'s destructor; at that point no other
    /// handle can reference the slot.
    pub(crate) fn free_emitter_slot(&self, id: u32) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let index = id as usize;

        let Some(state) = inner.val.get_mut(index) else {
            return;
        };

        // An attached spill block is orphaned, not dropped: the transition
        // logic that attached it still reads it by index and releases it.
        if let Some(block) = state.block.take() {
            if let Some(block) = inner.blocks.get_mut(block) {
                block.slot = None;
            }
        }

        *state = EmitterState::cleared(&self.def);

        let begin = index * self.def.max_particles;
        let end = begin + self.def.max_particles;
        for particle in &mut inner.particles[begin..end] {
            particle.life_ms = 0;
        }

        inner.free_emitter.push(id);
    }

    pub(crate) fn set_position(&self, id: u32, pos: Vec3) {
        self.apply_chain(id, |state, block| {
            state.pos = pos;
            if let Some(block) = block {
                block.pos = pos;
            }
        });
    }

    pub(crate) fn set_direction(&self, id: u32, dir: [Vec3; 3]) {
        self.apply_chain(id, |state, block| {
            state.dir = dir;
            if let Some(block) = block {
                block.dir = dir;
            }
        });
    }

    pub(crate) fn set_target(&self, id: u32, target: Option<Vec3>) {
        self.apply_chain(id, |state, _| {
            state.target = target;
        });
    }

    pub(crate) fn set_active(&self, id: u32, active: bool) {
        let delay = self.def.pps_create_em_delay;
        self.apply_chain(id, move |state, _| {
            if state.active == active {
                return;
            }

            state.active = active;
            if active {
                state.wait_for_next_ms = delay;
            }
        });
    }

    pub(crate) fn set_looped(&self, id: u32, looped: bool) {
        self.apply_chain(id, |state, _| {
            state.looped = looped;
        });
    }

    pub(crate) fn is_active(&self, id: u32) -> bool {
        self.inner
            .lock()
            .val
            .get(id as usize)
            .is_some_and(|state| state.active)
    }

    pub(crate) fn chain(&self, id: u32, next: u32) {
        debug_assert_ne!(id, next);

        let mut inner = self.inner.lock();
        if let Some(state) = inner.val.get_mut(id as usize) {
            state.next = Some(next);
        }
    }

    pub(crate) fn unchain(&self, id: u32) {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.val.get_mut(id as usize) {
            state.next = None;
        }
    }

    /// Attaches a spill block to `id`, seeded with the slot's current state.
    ///
    /// Returns the existing block if the slot already has one.
    pub(crate) fn attach_spill(&self, id: u32) -> Option<SpillId> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let state = inner.val.get_mut(id as usize)?;
        if let Some(block) = state.block {
            return Some(SpillId(block));
        }

        let block = inner.blocks.insert(SpillBlock {
            pos: state.pos,
            dir: state.dir,
            slot: Some(id),
        });
        state.block = Some(block);

        Some(SpillId(block))
    }

    /// Reads a spill block, attached or orphaned.
    pub fn spill(&self, id: SpillId) -> Option<SpillBlock> {
        self.inner.lock().blocks.get(id.0).copied()
    }

    /// Frees a spill block, unlinking it from its slot if still attached.
    pub fn release_spill(&self, id: SpillId) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(block) = inner.blocks.try_remove(id.0) else {
            return;
        };

        if let Some(slot) = block.slot {
            if let Some(state) = inner.val.get_mut(slot as usize) {
                state.block = None;
            }
        }
    }

    /// Advances particle simulation and emission by `dt_ms`.
    pub fn tick(&self, dt_ms: u64) {
        let _span = trace_span!("PfxBucket::tick").entered();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let BucketInner { val, particles, .. } = inner;

        let dt = dt_ms as f32 / 1000.0;
        for particle in particles.iter_mut() {
            if particle.life_ms == 0 {
                continue;
            }

            particle.life_ms = particle.life_ms.saturating_sub(dt_ms);
            particle.pos += particle.vel * dt;
        }

        // Emission state machine: the armed timer counts down; on expiry the
        // slot spawns a burst, then re-arms if looped or goes inactive.
        let block_len = self.def.max_particles;
        for (index, state) in val.iter_mut().enumerate() {
            if !state.active {
                continue;
            }

            if state.wait_for_next_ms > dt_ms {
                state.wait_for_next_ms -= dt_ms;
                continue;
            }
            state.wait_for_next_ms = 0;

            let begin = index * block_len;
            spawn_burst(&mut particles[begin..begin + block_len], state, &self.def);

            if state.looped {
                state.wait_for_next_ms = self.def.pps_create_em_delay;
            } else {
                state.active = false;
            }
        }
    }

    /// The particle array, for draw-call submission.
    ///
    /// Holds the bucket lock for the guard's lifetime; the renderer reads
    /// once per frame and releases.
    pub fn particles(&self) -> MappedMutexGuard<'_, [Particle]> {
        MutexGuard::map(self.inner.lock(), |inner| inner.particles.as_mut_slice())
    }

    /// Number of particles currently alive.
    pub fn alive_particles(&self) -> usize {
        self.inner
            .lock()
            .particles
            .iter()
            .filter(|particle| particle.is_alive())
            .count()
    }

    /// Number of live emitter slots.
    pub fn emitter_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.val.len() - inner.free_emitter.len()
    }

    /// Applies `f` to the slot and every slot reachable over its chain,
    /// mirroring into attached spill blocks, all under one lock
    /// acquisition.
    fn apply_chain<F>(&self, id: u32, f: F)
    where
        F: Fn(&mut EmitterState, Option<&mut SpillBlock>),
    {
        let mut guard = self.inner.lock();
        let BucketInner { val, blocks, .. } = &mut *guard;

        let mut cursor = Some(id);
        // A malformed chain must not wedge the caller; bound the walk by the
        // slot count.
        let mut budget = val.len();

        while let (Some(id), Some(remaining)) = (cursor, budget.checked_sub(1)) {
            budget = remaining;

            let Some(state) = val.get_mut(id as usize) else {
                break;
            };

            let block = state.block.and_then(|block| blocks.get_mut(block));
            f(state, block);
            cursor = state.next;
        }
    }
}

fn spawn_burst(block: &mut [Particle], state: &EmitterState, def: &PfxDefinition) {
    let direction = match state.target {
        Some(target) => (target - state.pos)
            .try_normalize()
            .unwrap_or(state.dir[2]),
        None => state.dir[1],
    };
    let vel = direction * def.emission_speed;

    let mut budget = def.pps_count;
    for particle in block {
        if budget == 0 {
            break;
        }

        if particle.is_alive() {
            continue;
        }

        *particle = Particle {
            pos: state.pos,
            vel,
            life_ms: def.particle_lifetime_ms,
        };
        budget -= 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec3;

    use super::PfxBucket;
    use crate::definition::PfxDefinition;

    fn bucket(def: PfxDefinition) -> Arc<PfxBucket> {
        Arc::new(PfxBucket::new(Arc::new(def)))
    }

    fn small_def() -> PfxDefinition {
        PfxDefinition {
            name: "test".into(),
            pps_create_em_delay: 100,
            pps_count: 4,
            max_particles: 8,
            particle_lifetime_ms: 500,
            ..PfxDefinition::default()
        }
    }

    #[test]
    fn slot_recycling_is_lifo() {
        let bucket = bucket(small_def());

        let a = bucket.alloc_emitter();
        assert_eq!(a.slot(), Some(0));

        drop(a);

        let c = bucket.alloc_emitter();
        assert_eq!(c.slot(), Some(0));

        // The free list is empty again, so the next slot is appended.
        let d = bucket.alloc_emitter();
        assert_eq!(d.slot(), Some(1));
        assert_eq!(bucket.emitter_count(), 2);
    }

    #[test]
    fn activation_arms_emission_delay() {
        let bucket = bucket(small_def());
        let emitter = bucket.alloc_emitter();

        emitter.set_active(true);
        assert!(emitter.is_active());

        // Still waiting: no particles before the armed delay expires.
        bucket.tick(60);
        assert_eq!(bucket.alive_particles(), 0);

        bucket.tick(60);
        assert_eq!(bucket.alive_particles(), 4);
    }

    #[test]
    fn looped_emitter_rearms() {
        let mut def = small_def();
        def.particle_lifetime_ms = 10_000;
        let bucket = bucket(def);

        let emitter = bucket.alloc_emitter();
        emitter.set_looped(true);
        emitter.set_active(true);

        bucket.tick(100);
        assert_eq!(bucket.alive_particles(), 4);
        assert!(emitter.is_active());

        bucket.tick(100);
        assert_eq!(bucket.alive_particles(), 8);
    }

    #[test]
    fn one_shot_emitter_goes_inactive() {
        let bucket = bucket(small_def());
        let emitter = bucket.alloc_emitter();

        emitter.set_active(true);
        bucket.tick(100);

        assert_eq!(bucket.alive_particles(), 4);
        assert!(!emitter.is_active());

        // Particles age out on their own afterwards.
        bucket.tick(499);
        assert_eq!(bucket.alive_particles(), 4);
        bucket.tick(1);
        assert_eq!(bucket.alive_particles(), 0);
    }

    #[test]
    fn particles_integrate_position() {
        let mut def = small_def();
        def.pps_count = 1;
        def.emission_speed = 2.0;
        def.particle_lifetime_ms = 10_000;
        let bucket = bucket(def);

        let emitter = bucket.alloc_emitter();
        emitter.set_position(Vec3::new(1.0, 0.0, 0.0));
        emitter.set_active(true);

        bucket.tick(100);
        // One second of drift along the default up axis at 2 units/s.
        bucket.tick(500);
        bucket.tick(500);

        let particles = bucket.particles();
        let particle = particles.iter().find(|p| p.is_alive()).unwrap();
        assert_eq!(particle.pos, Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn chain_propagates_mutations() {
        let bucket = bucket(small_def());

        let primary = bucket.alloc_emitter();
        let successor = bucket.alloc_emitter();
        primary.chain(&successor);

        primary.set_active(true);
        assert!(successor.is_active());

        primary.set_position(Vec3::splat(7.0));
        bucket.tick(100);

        // Both slots burst from the propagated position.
        let particles = bucket.particles();
        let alive: Vec<_> = particles.iter().filter(|p| p.is_alive()).collect();
        assert_eq!(alive.len(), 8);
        assert!(alive.iter().all(|p| p.pos == Vec3::splat(7.0)));
    }

    #[test]
    fn spill_block_mirrors_mutations() {
        let bucket = bucket(small_def());
        let emitter = bucket.alloc_emitter();

        emitter.set_position(Vec3::new(1.0, 2.0, 3.0));
        let spill = emitter.attach_spill().unwrap();

        // Seeded from the slot's state at attach time.
        assert_eq!(bucket.spill(spill).unwrap().pos, Vec3::new(1.0, 2.0, 3.0));

        emitter.set_position(Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(bucket.spill(spill).unwrap().pos, Vec3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn spill_block_survives_slot_recycling() {
        let bucket = bucket(small_def());
        let emitter = bucket.alloc_emitter();

        emitter.set_position(Vec3::splat(9.0));
        let spill = emitter.attach_spill().unwrap();
        drop(emitter);

        // The slot is gone but the parked state is still readable.
        assert_eq!(bucket.spill(spill).unwrap().pos, Vec3::splat(9.0));

        // A successor reusing the slot no longer writes into the orphan.
        let successor = bucket.alloc_emitter();
        assert_eq!(successor.slot(), Some(0));
        successor.set_position(Vec3::ZERO);
        assert_eq!(bucket.spill(spill).unwrap().pos, Vec3::splat(9.0));

        bucket.release_spill(spill);
        assert!(bucket.spill(spill).is_none());
    }

    #[test]
    fn freeing_kills_slot_particles() {
        let bucket = bucket(small_def());
        let emitter = bucket.alloc_emitter();

        emitter.set_active(true);
        bucket.tick(100);
        assert_eq!(bucket.alive_particles(), 4);

        drop(emitter);
        assert_eq!(bucket.alive_particles(), 0);
        assert_eq!(bucket.emitter_count(), 0);
    }
}
