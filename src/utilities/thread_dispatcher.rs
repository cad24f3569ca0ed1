//! Worker thread dispatch.
//!
//! The simulation does not need a load balancing forloop; every stage does
//! its own domain specific balancing by having workers claim jobs off a
//! shared atomic counter. All the dispatcher has to do is get some threads
//! running a worker body and return when they're all done, so wrapping an
//! existing thread pool is viable.

use crate::utilities::memory::buffer_pool::BufferPool;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, Ordering};

/// Provides threads to run simulation workers and per-worker memory pools
/// for their ephemeral allocations.
pub trait ThreadDispatcher: Sync {
    /// Number of workers the dispatcher will invoke.
    fn thread_count(&self) -> i32;

    /// Invokes the worker body once per worker and returns once all have
    /// completed. Workers must be backed by independently progressing
    /// threads; the solver's stage fences rely on it.
    fn dispatch_workers(&self, worker_body: &(dyn Fn(i32) + Sync));

    /// Gets the buffer pool dedicated to a worker.
    ///
    /// # Safety
    /// The caller must be the worker that owns the pool, or must otherwise
    /// guarantee exclusive access for the duration of use.
    unsafe fn worker_pool(&self, worker_index: i32) -> *mut BufferPool;
}

/// Dispatcher backed by scoped OS threads, one per worker per dispatch.
pub struct SimpleThreadDispatcher {
    thread_count: i32,
    worker_pools: Vec<UnsafeCell<BufferPool>>,
}

impl SimpleThreadDispatcher {
    pub fn new(thread_count: i32) -> Self {
        assert!(thread_count > 0, "Dispatcher requires at least one worker.");
        let worker_pools = (0..thread_count)
            .map(|_| UnsafeCell::new(BufferPool::new(16384)))
            .collect();
        Self {
            thread_count,
            worker_pools,
        }
    }
}

impl ThreadDispatcher for SimpleThreadDispatcher {
    fn thread_count(&self) -> i32 {
        self.thread_count
    }

    fn dispatch_workers(&self, worker_body: &(dyn Fn(i32) + Sync)) {
        std::thread::scope(|scope| {
            for worker_index in 1..self.thread_count {
                scope.spawn(move || worker_body(worker_index));
            }
            worker_body(0);
        });
    }

    unsafe fn worker_pool(&self, worker_index: i32) -> *mut BufferPool {
        self.worker_pools[worker_index as usize].get()
    }
}

// Worker pools are only touched by their owning workers during a dispatch.
unsafe impl Sync for SimpleThreadDispatcher {}

impl Drop for SimpleThreadDispatcher {
    fn drop(&mut self) {
        for pool in &mut self.worker_pools {
            pool.get_mut().clear();
        }
    }
}

/// Shared claim counter for job loops. Workers fetch-then-decrement until
/// the counter is exhausted.
pub struct JobCounter {
    remaining: CachePadded<AtomicI32>,
}

impl JobCounter {
    pub fn new(job_count: i32) -> Self {
        Self {
            remaining: CachePadded::new(AtomicI32::new(job_count)),
        }
    }

    pub fn reset(&self, job_count: i32) {
        self.remaining.store(job_count, Ordering::Release);
    }

    /// Claims the next job index, highest first. Returns None when no work
    /// remains.
    #[inline(always)]
    pub fn claim(&self) -> Option<i32> {
        let index = self.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
        if index < 0 {
            None
        } else {
            Some(index)
        }
    }
}

/// Wrapper making a raw pointer shareable across worker closures. The
/// simulation's stage structure guarantees the underlying writes are
/// disjoint.
pub struct SendPtr<T>(pub *mut T);

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for SendPtr<T> {}
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn dispatch_runs_every_worker_once() {
        let dispatcher = SimpleThreadDispatcher::new(4);
        let counter = AtomicUsize::new(0);
        dispatcher.dispatch_workers(&|_worker| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(counter.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn job_counter_hands_out_each_job_exactly_once() {
        let counter = JobCounter::new(100);
        let claimed = std::sync::Mutex::new(Vec::new());
        let dispatcher = SimpleThreadDispatcher::new(4);
        dispatcher.dispatch_workers(&|_worker| {
            let mut local = Vec::new();
            while let Some(job) = counter.claim() {
                local.push(job);
            }
            claimed.lock().unwrap().extend(local);
        });
        let mut all = claimed.into_inner().unwrap();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
