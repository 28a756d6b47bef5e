pub mod container;
pub mod rgb_conversion;
pub mod worker;

use crate::error::DecodeError;
use image::RgbaImage;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

/// Bytes per decoded pixel (RGBA8 / BGRA8)
pub const BYTES_PER_PIXEL: u64 = 4;

/// Pixel dimensions of the canvas or of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Estimated bytes of one decoded frame of this size
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * BYTES_PER_PIXEL
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A fully composited frame.
///
/// `rgba` is the straight-alpha canvas as the decoder produced it. The render
/// buffer (premultiplied BGRA, what a compositor uploads) is either drawn at decode
/// time ("predrawn") or lazily on the first [`FrameImage::render_pixels`] call.
pub struct FrameImage {
    index: usize,
    rgba: RgbaImage,
    render: OnceLock<Vec<u8>>,
    decode_time: Duration,
}

impl FrameImage {
    /// Wrap a decoded canvas; the render buffer is drawn on first use.
    pub fn new(index: usize, rgba: RgbaImage, decode_time: Duration) -> Self {
        Self {
            index,
            rgba,
            render: OnceLock::new(),
            decode_time,
        }
    }

    /// Wrap a decoded canvas and draw the render buffer right away.
    pub fn predrawn(index: usize, rgba: RgbaImage, decode_time: Duration) -> Result<Self, DecodeError> {
        let frame = Self::new(index, rgba, decode_time);
        let pixels = frame.draw()?;
        let _ = frame.render.set(pixels);
        Ok(frame)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.rgba.width()
    }

    pub fn height(&self) -> u32 {
        self.rgba.height()
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.rgba.width(), self.rgba.height())
    }

    /// Straight-alpha RGBA canvas
    pub fn rgba(&self) -> &RgbaImage {
        &self.rgba
    }

    pub fn decode_time(&self) -> Duration {
        self.decode_time
    }

    /// Whether the render buffer already exists
    pub fn is_predrawn(&self) -> bool {
        self.render.get().is_some()
    }

    /// Premultiplied BGRA8 pixels, drawing them now if they were not predrawn.
    pub fn render_pixels(&self) -> Result<&[u8], DecodeError> {
        if let Some(pixels) = self.render.get() {
            return Ok(pixels);
        }
        let pixels = self.draw()?;
        Ok(self.render.get_or_init(|| pixels))
    }

    /// Estimated resident size used by the cache budget
    pub fn byte_size(&self) -> u64 {
        self.size().byte_size()
    }

    fn draw(&self) -> Result<Vec<u8>, DecodeError> {
        rgb_conversion::rgba_to_render_bgra(self.rgba.as_raw()).map_err(|_| DecodeError::OutOfMemory {
            index: self.index,
            bytes: self.rgba.as_raw().len(),
        })
    }
}

impl fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameImage")
            .field("index", &self.index)
            .field("size", &self.size())
            .field("predrawn", &self.is_predrawn())
            .field("decode_time", &self.decode_time)
            .finish()
    }
}

/// Decodes single frames by index.
///
/// Implementations run on the prefetch worker thread (and once on the
/// constructing thread for the poster frame), so they must be `Send`.
pub trait FrameDecoder: Send + 'static {
    fn decode(&mut self, index: usize) -> Result<FrameImage, DecodeError>;
}

impl<F> FrameDecoder for F
where
    F: FnMut(usize) -> Result<FrameImage, DecodeError> + Send + 'static,
{
    fn decode(&mut self, index: usize) -> Result<FrameImage, DecodeError> {
        self(index)
    }
}
