use std::sync::Arc;

use ahash::AHashMap;
use morrow_tasks::TaskPool;
use parking_lot::Mutex;
use tracing::{debug, trace_span};

use crate::bucket::PfxBucket;
use crate::definition::PfxDefinition;
use crate::emitter::PfxEmitter;

/// The set of particle buckets of one world, keyed by effect definition.
///
/// Buckets are created lazily on first request and live until the world is
/// dropped. World-simulation code spawns emitters through
/// [`create_emitter`]; the tick loop advances every bucket once per tick and
/// the renderer walks them once per frame.
///
/// [`create_emitter`]: Self::create_emitter
#[derive(Default)]
pub struct PfxObjects {
    buckets: Mutex<AHashMap<String, Arc<PfxBucket>>>,
}

impl PfxObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bucket for `def`, created on first use.
    pub fn get(&self, def: &Arc<PfxDefinition>) -> Arc<PfxBucket> {
        let mut buckets = self.buckets.lock();

        buckets
            .entry(def.name.clone())
            .or_insert_with(|| {
                debug!("creating pfx bucket: {}", def.name);
                Arc::new(PfxBucket::new(def.clone()))
            })
            .clone()
    }

    /// Spawns an emitter for `def` in the matching bucket.
    pub fn create_emitter(&self, def: &Arc<PfxDefinition>) -> PfxEmitter {
        self.get(def).alloc_emitter()
    }

    /// Advances every bucket's simulation by `dt_ms`.
    pub fn tick(&self, dt_ms: u64) {
        let _span = trace_span!("PfxObjects::tick").entered();

        for bucket in self.snapshot() {
            bucket.tick(dt_ms);
        }
    }

    /// Advances every bucket's simulation by `dt_ms`, one job per bucket on
    /// `pool`.
    ///
    /// Blocks until all buckets have ticked, so the caller can sequence this
    /// between the gameplay and render phases.
    pub fn tick_on(&self, pool: &TaskPool, dt_ms: u64) {
        let _span = trace_span!("PfxObjects::tick").entered();

        pool.for_each(self.snapshot(), move |bucket| bucket.tick(dt_ms));
    }

    /// Visits every bucket, for per-frame draw submission.
    pub fn for_each_bucket(&self, mut f: impl FnMut(&Arc<PfxBucket>)) {
        for bucket in self.snapshot() {
            f(&bucket);
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    // Cloned bucket list so ticking and traversal never hold the map lock
    // while a bucket lock is taken.
    fn snapshot(&self) -> Vec<Arc<PfxBucket>> {
        self.buckets.lock().values().cloned().collect()
    }
}
