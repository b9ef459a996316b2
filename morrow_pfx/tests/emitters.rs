//! Drives the emitter surface the way world simulation does: concurrent
//! spawn/mutate/drop from gameplay threads, a parallel tick pass between
//! gameplay and render, and renderer reads of the particle arrays.

use std::sync::Arc;
use std::thread;

use glam::Vec3;
use morrow_pfx::{PfxDefinition, PfxObjects};
use morrow_tasks::TaskPool;

fn def(name: &str) -> Arc<PfxDefinition> {
    Arc::new(PfxDefinition {
        name: name.into(),
        pps_create_em_delay: 0,
        pps_count: 2,
        max_particles: 4,
        particle_lifetime_ms: 60_000,
        ..PfxDefinition::default()
    })
}

#[test]
fn concurrent_world_simulation() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 16;

    let objects = Arc::new(PfxObjects::new());
    let defs = [def("torch"), def("spark"), def("mist")];

    let mut workers = Vec::new();
    for worker in 0..THREADS {
        let objects = objects.clone();
        let defs = defs.clone();

        workers.push(thread::spawn(move || {
            let mut kept = Vec::new();
            for index in 0..PER_THREAD {
                let emitter = objects.create_emitter(&defs[(worker + index) % defs.len()]);
                emitter.set_position(Vec3::new(index as f32, 0.0, worker as f32));

                if index % 2 == 0 {
                    kept.push(emitter);
                }
                // Odd-indexed emitters drop right here, mid-churn.
            }
            kept
        }));
    }

    let kept: Vec<_> = workers
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();
    assert_eq!(kept.len(), THREADS * PER_THREAD / 2);

    let mut live = 0;
    objects.for_each_bucket(|bucket| live += bucket.emitter_count());
    assert_eq!(live, kept.len());

    // Tick pass between gameplay and render, one job per bucket.
    for emitter in &kept {
        emitter.set_active(true);
    }

    let pool = TaskPool::new(4);
    objects.tick_on(&pool, 16);

    let mut alive = 0;
    objects.for_each_bucket(|bucket| alive += bucket.alive_particles());
    assert_eq!(alive, kept.len() * 2);

    // Renderer read: each bucket exposes one particle block per slot ever
    // allocated, dead entries included.
    objects.for_each_bucket(|bucket| {
        let particles = bucket.particles();
        assert_eq!(particles.len() % 4, 0);
    });
}

#[test]
fn mutation_races_with_ticking() {
    let objects = Arc::new(PfxObjects::new());
    let fx = def("storm");

    let emitters: Vec<_> = (0..8).map(|_| objects.create_emitter(&fx)).collect();

    let ticker = {
        let objects = objects.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                objects.tick(1);
            }
        })
    };

    for round in 0..100 {
        for (index, emitter) in emitters.iter().enumerate() {
            emitter.set_active(round % 2 == 0);
            emitter.set_position(Vec3::splat((round + index) as f32));
        }
    }

    ticker.join().unwrap();
}

#[test]
fn handles_degrade_when_world_drops() {
    let objects = PfxObjects::new();
    let emitter = objects.create_emitter(&def("torch"));

    drop(objects);

    assert!(emitter.is_empty());
    emitter.set_active(true);
    assert!(!emitter.is_active());
    drop(emitter);
}
