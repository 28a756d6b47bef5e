//! Animated GIF frame delivery with an adaptive, prefetched frame cache.
//!
//! ```no_run
//! use animated_image::AnimatedImage;
//!
//! let bytes = std::fs::read("spinner.gif").unwrap();
//! let image = AnimatedImage::build(bytes, 0, true).unwrap();
//! let poster = image.poster_image();
//! assert_eq!(poster.size(), image.size());
//!
//! // Later, from the render loop:
//! if let Some(frame) = image.image_lazily_cached_at_index(1) {
//!     let _bgra = frame.render_pixels();
//! }
//! ```

pub mod animated;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod logging;
pub mod memory;
pub mod prefetch;

pub use animated::{AnimatedImage, WeakAnimatedImage};
pub use cache::window::compute_window_size;
pub use cache::{AdaptiveFrameCache, CacheStats, FrameDescriptor, FrameState};
pub use config::AnimatedImageOptions;
pub use decoder::container::{parse, AnimatedImageSource, DEFAULT_DELAY, MINIMUM_DELAY};
pub use decoder::worker::GifFrameDecoder;
pub use decoder::{FrameDecoder, FrameImage, FrameSize};
pub use error::{BuildError, DecodeError, ParseError};
pub use memory::{MemoryPressureListener, MemoryPressureMonitor, MemorySubscription, SystemMemoryWatcher};
