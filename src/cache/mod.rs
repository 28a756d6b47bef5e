//! Adaptive frame cache.
//!
//! A per-index slot table plus a window of frames kept decoded ahead of the
//! playback cursor. The consumer reads with [`AdaptiveFrameCache::get`]; the
//! prefetch worker asks for the next missing index with
//! [`AdaptiveFrameCache::next_target`] and hands decode results back through
//! [`AdaptiveFrameCache::insert`]. All table work happens under one mutex; decoding
//! and dropping evicted payloads happen outside it.

pub mod window;

use crate::decoder::{FrameImage, FrameSize};
use crate::error::DecodeError;
use crate::memory::MemoryPressureListener;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Window size while under memory pressure
pub const PRESSURE_FLOOR: usize = 1;

/// Time after a pressure event before the window may grow again
pub const GROW_AFTER_PRESSURE_DELAY: Duration = Duration::from_secs(2);

/// Window ceiling during the first recovery step
pub const GROW_AFTER_PRESSURE_SIZE: usize = 2;

/// Time spent at [`GROW_AFTER_PRESSURE_SIZE`] before the ceiling is lifted
pub const RESET_AFTER_GROW_DELAY: Duration = Duration::from_secs(3);

/// Pressure events beyond this count pin the window to [`PRESSURE_FLOOR`]
pub const MAX_GROW_ATTEMPTS: u32 = 2;

/// How long an idle worker sleeps before re-sampling the memory budget
pub const IDLE_WAIT: Duration = Duration::from_secs(1);

type EvictedFrames = SmallVec<[Arc<FrameImage>; 8]>;

/// Decode state of one frame index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Never requested
    Unrequested,
    /// Claimed by the worker, decode in flight
    Queued,
    Decoded,
    /// Was decoded, dropped when the window moved or shrank
    Evicted,
    /// Decoding failed; never retried
    Failed,
}

/// A frame index together with its delay and live cache state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub index: usize,
    pub delay: Duration,
    pub state: FrameState,
}

/// A decoded frame resident in the cache
#[derive(Debug, Clone)]
pub struct CachedFrame {
    pub index: usize,
    pub payload: Arc<FrameImage>,
    pub byte_size: u64,
    /// Logical clock value of the last `get` or insert
    pub last_touch: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `get` calls that returned a frame
    pub hits: u64,
    /// `get` calls that returned nothing
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub failures: u64,
    /// Decodes that finished after their index had left the window
    pub discarded: u64,
    pub resident_frames: usize,
    pub resident_bytes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Result of handing a decode result back to the cache
#[derive(Debug)]
pub enum InsertOutcome {
    Stored(Arc<FrameImage>),
    /// The index left the window while decoding
    Discarded,
    Failed(DecodeError),
}

#[derive(Debug)]
enum Slot {
    Unrequested,
    Queued,
    Decoded(CachedFrame),
    Evicted,
    Failed(DecodeError),
}

impl Slot {
    fn state(&self) -> FrameState {
        match self {
            Slot::Unrequested => FrameState::Unrequested,
            Slot::Queued => FrameState::Queued,
            Slot::Decoded(_) => FrameState::Decoded,
            Slot::Evicted => FrameState::Evicted,
            Slot::Failed(_) => FrameState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PressurePhase {
    Relaxed,
    Floor { since: Instant },
    Grown { since: Instant },
    Pinned,
}

/// Memory pressure recovery: floor, then a small window, then unrestricted
#[derive(Debug)]
struct Pressure {
    events: u32,
    phase: PressurePhase,
}

impl Pressure {
    fn new() -> Self {
        Self {
            events: 0,
            phase: PressurePhase::Relaxed,
        }
    }

    fn record(&mut self, now: Instant) {
        self.events += 1;
        self.phase = if self.events > MAX_GROW_ATTEMPTS {
            PressurePhase::Pinned
        } else {
            PressurePhase::Floor { since: now }
        };
    }

    fn ceiling(&self) -> usize {
        match self.phase {
            PressurePhase::Relaxed => usize::MAX,
            PressurePhase::Floor { .. } | PressurePhase::Pinned => PRESSURE_FLOOR,
            PressurePhase::Grown { .. } => GROW_AFTER_PRESSURE_SIZE,
        }
    }

    /// Move to the next recovery step if its delay has passed
    fn advance(&mut self, now: Instant) -> bool {
        let next = match self.phase {
            PressurePhase::Floor { since } if now >= since + GROW_AFTER_PRESSURE_DELAY => {
                PressurePhase::Grown { since: now }
            }
            PressurePhase::Grown { since } if now >= since + RESET_AFTER_GROW_DELAY => PressurePhase::Relaxed,
            _ => return false,
        };
        self.phase = next;
        true
    }

    fn next_step_at(&self) -> Option<Instant> {
        match self.phase {
            PressurePhase::Floor { since } => Some(since + GROW_AFTER_PRESSURE_DELAY),
            PressurePhase::Grown { since } => Some(since + RESET_AFTER_GROW_DELAY),
            PressurePhase::Relaxed | PressurePhase::Pinned => None,
        }
    }
}

#[derive(Debug)]
struct CacheState {
    slots: Vec<Slot>,
    cursor: usize,
    size_current: usize,
    size_max: usize,
    /// Hint or heuristic, before budget, pressure and cap
    optimal: usize,
    memory_budget: u64,
    pressure: Pressure,
    clock: u64,
    stats: CacheStats,
    shutdown: bool,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn in_window(&self, index: usize) -> bool {
        window::in_window(index, self.cursor, self.size_current, self.slots.len())
    }

    /// Recompute the window and evict everything that fell out of it
    fn resize(&mut self, frame_bytes: u64, evicted: &mut EvictedFrames) {
        let frame_count = self.slots.len();
        let size = self
            .optimal
            .min(window::budget_limit(frame_bytes, self.memory_budget))
            .min(self.pressure.ceiling());
        let size = window::clamp_window(size, frame_count, self.size_max);

        if size != self.size_current {
            log::debug!("Frame cache window {} -> {} (of {} frames)", self.size_current, size, frame_count);
            self.size_current = size;
        }
        self.evict_outside_window(evicted);
    }

    fn evict_outside_window(&mut self, evicted: &mut EvictedFrames) {
        let mut candidates: SmallVec<[(usize, u64); 16]> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Decoded(cached) if !self.in_window(index) => Some((index, cached.last_touch)),
                _ => None,
            })
            .collect();
        if candidates.is_empty() {
            return;
        }

        window::sort_for_eviction(&mut candidates, self.cursor, self.slots.len());
        for (index, _) in candidates {
            if let Slot::Decoded(cached) = std::mem::replace(&mut self.slots[index], Slot::Evicted) {
                self.stats.evictions += 1;
                self.stats.resident_frames -= 1;
                self.stats.resident_bytes -= cached.byte_size;
                evicted.push(cached.payload);
            }
        }
    }
}

/// Bounded, index-keyed store of decoded frames with an adaptive window.
#[derive(Debug)]
pub struct AdaptiveFrameCache {
    state: Mutex<CacheState>,
    wake: Condvar,
    frame_count: usize,
    canonical_size: FrameSize,
}

impl AdaptiveFrameCache {
    /// Create an empty cache.
    ///
    /// `optimal_hint` of 0 selects the heuristic from
    /// [`window::compute_window_size`]; `size_max` of 0 means no cap.
    pub fn new(
        frame_count: usize,
        canonical_size: FrameSize,
        optimal_hint: usize,
        size_max: usize,
        memory_budget: u64,
    ) -> Self {
        let frame_count = frame_count.max(1);
        let frame_bytes = canonical_size.byte_size();
        let optimal = if optimal_hint > 0 {
            optimal_hint
        } else {
            window::compute_window_size(frame_bytes, frame_count, u64::MAX, 0)
        };

        let mut state = CacheState {
            slots: (0..frame_count).map(|_| Slot::Unrequested).collect(),
            cursor: 0,
            size_current: 1,
            size_max,
            optimal,
            memory_budget,
            pressure: Pressure::new(),
            clock: 0,
            stats: CacheStats::default(),
            shutdown: false,
        };
        let mut evicted = EvictedFrames::new();
        state.resize(frame_bytes, &mut evicted);

        log::debug!(
            "Frame cache for {} frames of {}: optimal {}, window {}, cap {}",
            frame_count,
            canonical_size,
            optimal,
            state.size_current,
            size_max
        );

        Self {
            state: Mutex::new(state),
            wake: Condvar::new(),
            frame_count,
            canonical_size,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn canonical_size(&self) -> FrameSize {
        self.canonical_size
    }

    /// Return the decoded frame at `index` if it is resident and inside the window.
    ///
    /// Never decodes and never waits for a decode. Moves the cursor to `index`.
    /// Out-of-range indices log a warning, return `None` and leave the cursor alone.
    pub fn get(&self, index: usize) -> Option<Arc<FrameImage>> {
        if index >= self.frame_count {
            log::warn!("Frame index {} out of range (frame count {})", index, self.frame_count);
            return None;
        }

        let mut state = self.state.lock();
        let moved = state.cursor != index;
        state.cursor = index;

        let touch = state.tick();
        let in_window = state.in_window(index);
        let found = match &mut state.slots[index] {
            Slot::Decoded(cached) if in_window => {
                cached.last_touch = touch;
                Some(Arc::clone(&cached.payload))
            }
            _ => None,
        };
        if found.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        drop(state);

        if moved {
            self.wake.notify_one();
        }
        found
    }

    pub fn frame_state(&self, index: usize) -> Option<FrameState> {
        self.state.lock().slots.get(index).map(Slot::state)
    }

    /// The stored error of a failed frame
    pub fn failure(&self, index: usize) -> Option<DecodeError> {
        match self.state.lock().slots.get(index) {
            Some(Slot::Failed(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Snapshot of the resident frames, nearest to the cursor first
    pub fn resident(&self) -> Vec<CachedFrame> {
        let state = self.state.lock();
        let mut frames: Vec<CachedFrame> = state
            .slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Decoded(cached) => Some(cached.clone()),
                _ => None,
            })
            .collect();
        frames.sort_by_key(|cached| window::circular_distance(cached.index, state.cursor, self.frame_count));
        frames
    }

    pub fn cursor(&self) -> usize {
        self.state.lock().cursor
    }

    pub fn frame_cache_size_current(&self) -> usize {
        self.state.lock().size_current
    }

    pub fn frame_cache_size_max(&self) -> usize {
        self.state.lock().size_max
    }

    pub fn memory_budget(&self) -> u64 {
        self.state.lock().memory_budget
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Set the explicit cap (0 = unlimited), shrinking the window right away.
    pub fn set_max_cache_size(&self, cap: usize) {
        let mut evicted = EvictedFrames::new();
        {
            let mut state = self.state.lock();
            state.size_max = cap;
            state.resize(self.canonical_size.byte_size(), &mut evicted);
        }
        self.wake.notify_one();

        if !evicted.is_empty() {
            log::debug!("Cache cap {} evicted {} frame(s)", cap, evicted.len());
        }
    }

    /// Shrink to the floor and evict everything but the cursor frame.
    pub fn on_memory_pressure(&self) {
        let mut evicted = EvictedFrames::new();
        let events = {
            let mut state = self.state.lock();
            state.pressure.record(Instant::now());
            state.resize(self.canonical_size.byte_size(), &mut evicted);
            state.pressure.events
        };
        self.wake.notify_one();

        log::debug!(
            "Memory pressure event {}: evicted {} frame(s)",
            events,
            evicted.len()
        );
    }

    /// Claim the next index the worker should decode.
    ///
    /// Applies `memory_budget` and any due pressure recovery step, evicts frames
    /// outside the window, then marks the first missing window index as queued.
    /// When the window is full this waits on the condvar (bounded by [`IDLE_WAIT`]
    /// or the next recovery step) and returns `None`. A pass that evicted frames
    /// returns `None` without waiting.
    pub fn next_target(&self, memory_budget: u64) -> Option<usize> {
        self.claim(memory_budget, true)
    }

    /// Like [`next_target`](Self::next_target) but returns `None` right away when
    /// the window is full.
    pub fn try_next_target(&self, memory_budget: u64) -> Option<usize> {
        self.claim(memory_budget, false)
    }

    fn claim(&self, memory_budget: u64, block: bool) -> Option<usize> {
        let mut evicted = EvictedFrames::new();
        let target = {
            let mut state = self.state.lock();
            if state.shutdown {
                return None;
            }

            let now = Instant::now();
            state.memory_budget = memory_budget;
            if state.pressure.advance(now) {
                log::debug!("Memory pressure easing, window ceiling {}", state.pressure.ceiling());
            }
            state.resize(self.canonical_size.byte_size(), &mut evicted);

            let (cursor, size) = (state.cursor, state.size_current);
            let target = window::window_indices(cursor, size, self.frame_count)
                .find(|index| matches!(state.slots[*index], Slot::Unrequested | Slot::Evicted));

            if let Some(index) = target {
                state.slots[index] = Slot::Queued;
            } else if block && evicted.is_empty() {
                // Held since the scan, so a cursor move cannot slip in before the wait
                let wait = state
                    .pressure
                    .next_step_at()
                    .map(|at| at.saturating_duration_since(now).min(IDLE_WAIT))
                    .unwrap_or(IDLE_WAIT);
                self.wake.wait_for(&mut state, wait);
            }
            // With evictions, return so the payloads are freed and the caller rescans
            target
        };
        drop(evicted);
        target
    }

    /// Hand a decode result back.
    ///
    /// Frames whose size differs from the canvas are rejected as failures. A frame
    /// whose index left the window while decoding is discarded.
    pub fn insert(&self, index: usize, decoded: Result<FrameImage, DecodeError>) -> InsertOutcome {
        if index >= self.frame_count {
            return InsertOutcome::Failed(DecodeError::OutOfRange {
                index,
                frame_count: self.frame_count,
            });
        }

        let decoded = decoded.and_then(|frame| {
            if frame.size() == self.canonical_size {
                Ok(frame)
            } else {
                Err(DecodeError::SizeMismatch {
                    index,
                    width: frame.width(),
                    height: frame.height(),
                    expected_width: self.canonical_size.width,
                    expected_height: self.canonical_size.height,
                })
            }
        });

        let mut discarded = None;
        let outcome = {
            let mut state = self.state.lock();
            match decoded {
                Ok(frame) if state.in_window(index) => {
                    let payload = Arc::new(frame);
                    let byte_size = payload.byte_size();
                    let last_touch = state.tick();
                    state.slots[index] = Slot::Decoded(CachedFrame {
                        index,
                        payload: Arc::clone(&payload),
                        byte_size,
                        last_touch,
                    });
                    state.stats.insertions += 1;
                    state.stats.resident_frames += 1;
                    state.stats.resident_bytes += byte_size;
                    InsertOutcome::Stored(payload)
                }
                Ok(frame) => {
                    state.slots[index] = Slot::Evicted;
                    state.stats.discarded += 1;
                    discarded = Some(frame);
                    InsertOutcome::Discarded
                }
                Err(e) => {
                    state.slots[index] = Slot::Failed(e.clone());
                    state.stats.failures += 1;
                    if e.is_out_of_memory() {
                        let mut evicted = EvictedFrames::new();
                        state.pressure.record(Instant::now());
                        state.resize(self.canonical_size.byte_size(), &mut evicted);
                        parking_lot::MutexGuard::unlocked(&mut state, || drop(evicted));
                    }
                    InsertOutcome::Failed(e)
                }
            }
        };
        drop(discarded);

        match &outcome {
            InsertOutcome::Stored(_) => log::trace!("Cached frame {}", index),
            InsertOutcome::Discarded => log::trace!("Discarded frame {}, no longer in window", index),
            InsertOutcome::Failed(e) => log::warn!("Frame {} unavailable: {}", index, e),
        }
        outcome
    }

    /// Wake the worker and stop handing out targets.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.wake.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }
}

impl MemoryPressureListener for AdaptiveFrameCache {
    fn on_memory_pressure(&self) {
        AdaptiveFrameCache::on_memory_pressure(self);
    }
}
