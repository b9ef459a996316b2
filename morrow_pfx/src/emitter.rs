use std::sync::{Arc, Weak};

use glam::Vec3;

use crate::bucket::{PfxBucket, SpillId};

/// Movable, owning handle to one emitter slot in a [`PfxBucket`].
///
/// A default-constructed or taken-from handle is empty: every operation on
/// it is a no-op. World objects hold an emitter whether or not an effect is
/// currently playing and never need to null-check first. The same applies
/// once the owning bucket has been dropped.
///
/// There is no `Clone` impl; exactly one handle references a slot at any
/// time, and dropping the handle is what releases the slot.
#[derive(Debug, Default)]
pub struct PfxEmitter {
    bucket: Weak<PfxBucket>,
    id: u32,
}

impl PfxEmitter {
    pub(crate) fn bind(bucket: Weak<PfxBucket>, id: u32) -> Self {
        Self { bucket, id }
    }

    /// Returns `true` if the handle is not bound to a live bucket slot.
    pub fn is_empty(&self) -> bool {
        self.bucket.strong_count() == 0
    }

    /// The slot this handle is bound to, if any.
    pub fn slot(&self) -> Option<u32> {
        (!self.is_empty()).then_some(self.id)
    }

    pub fn set_position(&self, pos: Vec3) {
        if let Some(bucket) = self.bucket.upgrade() {
            bucket.set_position(self.id, pos);
        }
    }

    /// Sets the emitter's three-axis direction frame.
    pub fn set_direction(&self, dir: [Vec3; 3]) {
        if let Some(bucket) = self.bucket.upgrade() {
            bucket.set_direction(self.id, dir);
        }
    }

    pub fn set_target(&self, target: Option<Vec3>) {
        if let Some(bucket) = self.bucket.upgrade() {
            bucket.set_target(self.id, target);
        }
    }

    /// Activates or deactivates emission.
    ///
    /// Activation arms the definition's emission delay before the next
    /// burst.
    pub fn set_active(&self, active: bool) {
        if let Some(bucket) = self.bucket.upgrade() {
            bucket.set_active(self.id, active);
        }
    }

    pub fn set_looped(&self, looped: bool) {
        if let Some(bucket) = self.bucket.upgrade() {
            bucket.set_looped(self.id, looped);
        }
    }

    pub fn is_active(&self) -> bool {
        self.bucket
            .upgrade()
            .is_some_and(|bucket| bucket.is_active(self.id))
    }

    /// Chains `next` as this emitter's successor slot.
    ///
    /// Mutations applied to this handle then also reach the successor, so
    /// switching the active effect variant does not lose updates applied to
    /// the logical emitter identity. Both handles must belong to the same
    /// bucket.
    pub fn chain(&self, next: &PfxEmitter) {
        let Some(bucket) = self.bucket.upgrade() else {
            return;
        };

        if Weak::ptr_eq(&self.bucket, &next.bucket) && !next.is_empty() {
            bucket.chain(self.id, next.id);
        }
    }

    /// Removes this emitter's chain link.
    pub fn unchain(&self) {
        if let Some(bucket) = self.bucket.upgrade() {
            bucket.unchain(self.id);
        }
    }

    /// Attaches spill storage to this emitter's slot, seeded with its
    /// current position and direction.
    ///
    /// The block keeps mirroring mutations while the slot lives and stays
    /// readable through [`PfxBucket::spill`] after the slot is recycled; the
    /// caller releases it with [`PfxBucket::release_spill`].
    pub fn attach_spill(&self) -> Option<SpillId> {
        self.bucket
            .upgrade()
            .and_then(|bucket| bucket.attach_spill(self.id))
    }

    /// The bucket this handle is bound to, if it is still alive.
    pub fn bucket(&self) -> Option<Arc<PfxBucket>> {
        self.bucket.upgrade()
    }
}

impl Drop for PfxEmitter {
    fn drop(&mut self) {
        // The bucket may be gone already; the slot died with it.
        if let Some(bucket) = self.bucket.upgrade() {
            bucket.free_emitter_slot(self.id);
        }
    }
}
