//! Background prefetch worker.
//!
//! One named thread per image. It holds only a `Weak` handle to the cache and a
//! [`CancelToken`], asks the cache for the next missing index, decodes it without
//! holding the cache lock and hands the result back.

use crate::cache::{AdaptiveFrameCache, InsertOutcome};
use crate::decoder::FrameDecoder;
use crate::memory::MemoryProbe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Shared cancellation flag between an image and its worker
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Where the worker gets its memory budget from
pub enum MemoryBudget {
    Fixed(u64),
    Probe(MemoryProbe),
}

impl MemoryBudget {
    pub(crate) fn sample(&mut self) -> u64 {
        match self {
            MemoryBudget::Fixed(bytes) => *bytes,
            MemoryBudget::Probe(probe) => probe.budget(),
        }
    }
}

/// Handle to the prefetch thread.
///
/// Dropping it cancels the worker without joining; a decode in flight finishes on
/// its own and its result is thrown away.
pub struct Prefetcher {
    cache: Weak<AdaptiveFrameCache>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl Prefetcher {
    pub fn spawn<D: FrameDecoder>(
        cache: &Arc<AdaptiveFrameCache>,
        decoder: D,
        budget: MemoryBudget,
        cancel: CancelToken,
    ) -> std::io::Result<Self> {
        let weak = Arc::downgrade(cache);
        let worker_cache = Weak::clone(&weak);
        let worker_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("frame-prefetch".to_string())
            .spawn(move || run(worker_cache, decoder, budget, worker_cancel))?;

        Ok(Self {
            cache: weak,
            cancel,
            handle: Some(handle),
        })
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Stop the worker and wake it if it is idle
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Some(cache) = self.cache.upgrade() {
            cache.shutdown();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.cancel();
        // Detach; teardown never waits on a decode
        self.handle.take();
    }
}

fn run<D: FrameDecoder>(cache: Weak<AdaptiveFrameCache>, mut decoder: D, mut budget: MemoryBudget, cancel: CancelToken) {
    log::debug!("Prefetch worker started");
    let mut decoded = 0u64;
    let mut decode_time = Duration::ZERO;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(strong) = cache.upgrade() else {
            break;
        };
        if strong.is_shut_down() {
            break;
        }

        let memory_budget = budget.sample();
        let Some(index) = strong.next_target(memory_budget) else {
            continue;
        };
        // The image may go away while this frame decodes
        drop(strong);

        let start = Instant::now();
        let result = decoder.decode(index);
        decode_time += start.elapsed();
        decoded += 1;

        if cancel.is_cancelled() {
            break;
        }
        let Some(strong) = cache.upgrade() else {
            break;
        };
        if let InsertOutcome::Failed(e) = strong.insert(index, result) {
            log::debug!("Prefetch of frame {} failed: {}", index, e);
        }
    }

    log::debug!(
        "Prefetch worker stopped after {} decode(s), {:?} decoding",
        decoded,
        decode_time
    );
}
