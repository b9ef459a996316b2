//! Process-scoped worker pool for parallel tick dispatch.
//!
//! The pool is constructed explicitly and passed by reference to the
//! components that need parallel iteration. Dropping the pool shuts the
//! workers down and joins them, giving deterministic shutdown ordering.

pub mod park;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_queue::SegQueue;
use park::Parker;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed-size pool of worker threads executing queued jobs.
#[derive(Debug)]
pub struct TaskPool {
    inner: Arc<Inner>,
    threads: Option<Vec<JoinHandle<()>>>,
}

struct Inner {
    queue: SegQueue<Job>,
    parker: Parker,
    shutdown: AtomicBool,
}

impl TaskPool {
    /// Creates a new `TaskPool` running `threads` worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero.
    pub fn new(threads: usize) -> Self {
        assert_ne!(threads, 0);

        let inner = Arc::new(Inner {
            queue: SegQueue::new(),
            parker: Parker::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut vec = Vec::new();
        for index in 0..threads {
            let inner = inner.clone();
            let handle = std::thread::Builder::new()
                .name(format!("worker{}", index))
                .spawn(move || worker_main(inner))
                .expect("failed to spawn worker thread");
            vec.push(handle);
        }

        Self {
            inner,
            threads: Some(vec),
        }
    }

    /// Number of worker threads in the pool.
    pub fn threads(&self) -> usize {
        self.threads.as_ref().map_or(0, Vec::len)
    }

    /// Enqueues a job for execution on a worker thread.
    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.push(Box::new(job));
        self.inner.parker.unpark();
    }

    /// Runs `f` over every item on the pool and blocks until all calls have
    /// completed.
    pub fn for_each<I, T, F>(&self, items: I, f: F)
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let group = Arc::new(WaitGroup::new());

        for item in items {
            let f = f.clone();
            let group = group.clone();

            group.add(1);
            self.spawn(move || {
                f(item);
                group.done();
            });
        }

        group.wait();
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);

        let threads = self.threads.take().unwrap();
        for _ in 0..threads.len() {
            self.inner.parker.unpark();
        }

        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("queued", &self.queue.len())
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

fn worker_main(inner: Arc<Inner>) {
    loop {
        while let Some(job) = inner.queue.pop() {
            job();
        }

        if inner.shutdown.load(Ordering::Acquire) {
            return;
        }

        inner.parker.park();
    }
}

/// Counter tracking a batch of in-flight jobs.
///
/// [`wait`] blocks until every [`add`]ed job has reported [`done`].
///
/// [`add`]: Self::add
/// [`done`]: Self::done
/// [`wait`]: Self::wait
#[derive(Debug, Default)]
pub struct WaitGroup {
    pending: AtomicUsize,
    parker: Parker,
}

impl WaitGroup {
    pub const fn new() -> Self {
        Self {
            pending: AtomicUsize::new(0),
            parker: Parker::new(),
        }
    }

    /// Registers `count` jobs with the group.
    ///
    /// Must happen before the jobs are enqueued, otherwise a completed job
    /// could drive the counter below zero.
    pub fn add(&self, count: usize) {
        self.pending.fetch_add(count, Ordering::AcqRel);
    }

    /// Marks one job as completed.
    pub fn done(&self) {
        let pending = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert_ne!(pending, 0);

        if pending == 1 {
            self.parker.unpark();
        }
    }

    /// Blocks until the pending count reaches zero.
    pub fn wait(&self) {
        loop {
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }

            self.parker.park();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::TaskPool;

    #[test]
    fn spawn_runs_jobs() {
        let pool = TaskPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let counter = counter.clone();
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::AcqRel);
            });
        }

        // Dropping the pool drains the queue and joins the workers.
        drop(pool);
        assert_eq!(counter.load(Ordering::Acquire), 64);
    }

    #[test]
    fn for_each_visits_every_item() {
        let pool = TaskPool::new(4);
        let sum = Arc::new(AtomicUsize::new(0));

        let total = sum.clone();
        pool.for_each(0..100usize, move |value| {
            total.fetch_add(value, Ordering::AcqRel);
        });

        assert_eq!(sum.load(Ordering::Acquire), (0..100).sum());
    }

    #[test]
    fn for_each_empty_does_not_block() {
        let pool = TaskPool::new(1);
        pool.for_each(std::iter::empty::<usize>(), |_| {});
    }
}
