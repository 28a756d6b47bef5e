use crate::cache::{AdaptiveFrameCache, CacheStats, FrameDescriptor, FrameState, InsertOutcome};
use crate::config::AnimatedImageOptions;
use crate::decoder::container::{self, AnimatedImageSource};
use crate::decoder::worker::GifFrameDecoder;
use crate::decoder::{FrameDecoder, FrameImage, FrameSize};
use crate::error::{BuildError, DecodeError};
use crate::memory::{MemoryPressureMonitor, MemoryProbe, MemorySubscription};
use crate::prefetch::{CancelToken, MemoryBudget, Prefetcher};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// An animated image with an adaptive, background-filled frame cache.
///
/// Construction parses the source, decodes the poster frame on the calling thread
/// and starts one prefetch worker. [`image_lazily_cached_at_index`] never blocks:
/// a frame that is not ready yet comes back as `None` and the caller should
/// re-poll.
///
/// [`image_lazily_cached_at_index`]: AnimatedImage::image_lazily_cached_at_index
pub struct AnimatedImage {
    source: AnimatedImageSource,
    cache: Arc<AdaptiveFrameCache>,
    poster: Arc<FrameImage>,
    predrawing_enabled: bool,
    prefetcher: Prefetcher,
    _subscription: MemorySubscription,
}

impl AnimatedImage {
    /// Build with the size heuristic and predrawing enabled
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Option<Self> {
        Self::build(bytes, 0, true)
    }

    /// Build an image, or log the reason at error level and return `None`.
    pub fn build(bytes: impl Into<Arc<[u8]>>, optimal_frame_cache_size: usize, predrawing_enabled: bool) -> Option<Self> {
        let options = AnimatedImageOptions::default()
            .with_optimal_frame_cache_size(optimal_frame_cache_size)
            .with_predrawing(predrawing_enabled);

        match Self::try_build(bytes, options) {
            Ok(image) => Some(image),
            Err(e) => {
                log::error!("Failed to create animated image: {}", e);
                None
            }
        }
    }

    pub fn try_build(bytes: impl Into<Arc<[u8]>>, options: AnimatedImageOptions) -> Result<Self, BuildError> {
        let source = container::parse(bytes)?;
        // Declared canvases can be far larger than the file; check before allocating
        let memory_limit = options
            .memory_budget
            .unwrap_or_else(|| MemoryProbe::new().budget());
        let decoder = GifFrameDecoder::new(&source, options.predrawing_enabled).with_memory_limit(memory_limit);
        Self::with_decoder(source, decoder, options)
    }

    /// Build around an already parsed source and any [`FrameDecoder`].
    ///
    /// The decoder produces the poster here and then moves to the worker thread.
    pub fn with_decoder<D: FrameDecoder>(
        source: AnimatedImageSource,
        mut decoder: D,
        options: AnimatedImageOptions,
    ) -> Result<Self, BuildError> {
        let start = Instant::now();

        let mut budget = match options.memory_budget {
            Some(bytes) => MemoryBudget::Fixed(bytes),
            None => MemoryBudget::Probe(MemoryProbe::new()),
        };
        let cache = Arc::new(AdaptiveFrameCache::new(
            source.frame_count(),
            source.canonical_size(),
            options.optimal_frame_cache_size,
            options.frame_cache_size_max,
            budget.sample(),
        ));

        let poster = match cache.insert(0, decoder.decode(0)) {
            InsertOutcome::Stored(poster) => poster,
            InsertOutcome::Failed(e) => return Err(BuildError::Poster(e)),
            InsertOutcome::Discarded => return Err(BuildError::Poster(DecodeError::MissingFrame { index: 0 })),
        };

        let monitor = options
            .memory_monitor
            .unwrap_or_else(|| MemoryPressureMonitor::shared().clone());
        let subscription = monitor.subscribe(&cache);

        let prefetcher =
            Prefetcher::spawn(&cache, decoder, budget, CancelToken::new()).map_err(BuildError::Worker)?;

        log::info!(
            "Animated image {}: {} frames, loop count {}, window {} (ready in {:?})",
            source.canonical_size(),
            source.frame_count(),
            source.loop_count(),
            cache.frame_cache_size_current(),
            start.elapsed()
        );

        Ok(Self {
            source,
            cache,
            poster,
            predrawing_enabled: options.predrawing_enabled,
            prefetcher,
            _subscription: subscription,
        })
    }

    /// Frame 0, decoded during construction
    pub fn poster_image(&self) -> Arc<FrameImage> {
        Arc::clone(&self.poster)
    }

    pub fn size(&self) -> FrameSize {
        self.source.canonical_size()
    }

    /// 0 means the animation repeats forever
    pub fn loop_count(&self) -> u32 {
        self.source.loop_count()
    }

    pub fn delay_times(&self) -> &[Duration] {
        self.source.delay_times()
    }

    pub fn delay_time_at(&self, index: usize) -> Option<Duration> {
        self.source.delay_time_at(index)
    }

    pub fn frame_count(&self) -> usize {
        self.source.frame_count()
    }

    pub fn data(&self) -> &Arc<[u8]> {
        self.source.data()
    }

    pub fn source(&self) -> &AnimatedImageSource {
        &self.source
    }

    pub fn predrawing_enabled(&self) -> bool {
        self.predrawing_enabled
    }

    pub fn frame_cache_size_current(&self) -> usize {
        self.cache.frame_cache_size_current()
    }

    pub fn frame_cache_size_max(&self) -> usize {
        self.cache.frame_cache_size_max()
    }

    /// Cap the window (0 = unlimited). Frames outside the new window are evicted
    /// right away.
    pub fn set_frame_cache_size_max(&self, max: usize) {
        self.cache.set_max_cache_size(max);
    }

    /// The frame at `index` if it is already decoded and inside the window.
    ///
    /// Moves the playback cursor to `index`. Returns `None` for frames that are
    /// still being prefetched, have failed to decode, or are out of range (the last
    /// case also logs a warning and leaves the cursor where it was).
    pub fn image_lazily_cached_at_index(&self, index: usize) -> Option<Arc<FrameImage>> {
        self.cache.get(index)
    }

    pub fn frame_state(&self, index: usize) -> Option<FrameState> {
        self.cache.frame_state(index)
    }

    pub fn frame_descriptor(&self, index: usize) -> Option<FrameDescriptor> {
        Some(FrameDescriptor {
            index,
            delay: self.source.delay_time_at(index)?,
            state: self.cache.frame_state(index)?,
        })
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Shrink the cache as if the memory monitor had signalled
    pub fn on_memory_pressure(&self) {
        self.cache.on_memory_pressure();
    }

    /// Non-owning handle for timers and other periodic callers
    pub fn downgrade(&self) -> WeakAnimatedImage {
        WeakAnimatedImage {
            cache: Arc::downgrade(&self.cache),
            cancel: self.prefetcher.cancel_token().clone(),
            delay_times: self.source.delay_times().into(),
        }
    }
}

impl Drop for AnimatedImage {
    fn drop(&mut self) {
        self.prefetcher.cancel();
        log::debug!("Animated image dropped ({} frames)", self.source.frame_count());
    }
}

impl fmt::Debug for AnimatedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimatedImage")
            .field("source", &self.source)
            .field("frame_cache_size_current", &self.frame_cache_size_current())
            .field("frame_cache_size_max", &self.frame_cache_size_max())
            .field("predrawing_enabled", &self.predrawing_enabled)
            .finish()
    }
}

/// Weak handle to an [`AnimatedImage`].
///
/// Does not keep the image alive; every accessor returns `None` once the image
/// is dropped.
#[derive(Clone)]
pub struct WeakAnimatedImage {
    cache: Weak<AdaptiveFrameCache>,
    cancel: CancelToken,
    delay_times: Arc<[Duration]>,
}

impl WeakAnimatedImage {
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled() && self.cache.strong_count() > 0
    }

    pub fn image_lazily_cached_at_index(&self, index: usize) -> Option<Arc<FrameImage>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.cache.upgrade()?.get(index)
    }

    pub fn delay_time_at(&self, index: usize) -> Option<Duration> {
        if !self.is_alive() {
            return None;
        }
        self.delay_times.get(index).copied()
    }

    pub fn frame_count(&self) -> Option<usize> {
        if !self.is_alive() {
            return None;
        }
        Some(self.delay_times.len())
    }
}

impl fmt::Debug for WeakAnimatedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakAnimatedImage")
            .field("alive", &self.is_alive())
            .field("frame_count", &self.delay_times.len())
            .finish()
    }
}
