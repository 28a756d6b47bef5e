use super::container::AnimatedImageSource;
use super::{FrameDecoder, FrameImage, FrameSize};
use crate::error::DecodeError;
use image::RgbaImage;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

type GifStream = gif::Decoder<Cursor<Arc<[u8]>>>;

/// Frame rectangle clipped to the canvas
#[derive(Debug, Clone, Copy)]
struct Rect {
    left: usize,
    top: usize,
    width: usize,
    height: usize,
}

impl Rect {
    fn clipped(frame: &gif::Frame<'_>, canvas: FrameSize) -> Self {
        let left = (frame.left as usize).min(canvas.width as usize);
        let top = (frame.top as usize).min(canvas.height as usize);
        Self {
            left,
            top,
            width: (frame.width as usize).min(canvas.width as usize - left),
            height: (frame.height as usize).min(canvas.height as usize - top),
        }
    }

    fn row_range(&self, row: usize, canvas_width: usize) -> std::ops::Range<usize> {
        let start = ((self.top + row) * canvas_width + self.left) * 4;
        start..start + self.width * 4
    }
}

/// What to do with the canvas before drawing the next frame
enum Disposal {
    Clear(Rect),
    Restore(Rect, Vec<u8>),
}

/// Sequential composition state over one pass of the GIF stream
struct Composition {
    stream: GifStream,
    canvas: Vec<u8>,
    pending: Option<Disposal>,
    next_index: usize,
}

impl Composition {
    /// Draw frame `next_index` onto the canvas
    fn advance(&mut self, size: FrameSize) -> Result<(), DecodeError> {
        let index = self.next_index;
        let canvas_width = size.width as usize;

        match self.pending.take() {
            Some(Disposal::Clear(rect)) => {
                for row in 0..rect.height {
                    self.canvas[rect.row_range(row, canvas_width)].fill(0);
                }
            }
            Some(Disposal::Restore(rect, saved)) => {
                for (row, saved_row) in saved.chunks_exact(rect.width * 4).enumerate() {
                    self.canvas[rect.row_range(row, canvas_width)].copy_from_slice(saved_row);
                }
            }
            None => {}
        }

        let frame = match self.stream.read_next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(DecodeError::MissingFrame { index }),
            Err(e) => {
                return Err(DecodeError::Corrupt {
                    index,
                    reason: e.to_string(),
                })
            }
        };

        let rect = Rect::clipped(frame, size);
        self.pending = match frame.dispose {
            gif::DisposalMethod::Background => Some(Disposal::Clear(rect)),
            gif::DisposalMethod::Previous if rect.width > 0 => {
                let mut saved = Vec::with_capacity(rect.width * rect.height * 4);
                for row in 0..rect.height {
                    saved.extend_from_slice(&self.canvas[rect.row_range(row, canvas_width)]);
                }
                Some(Disposal::Restore(rect, saved))
            }
            _ => None,
        };

        // Transparent source pixels leave the canvas untouched
        let stride = frame.width as usize * 4;
        for row in 0..rect.height {
            let source_start = row * stride;
            let Some(source) = frame.buffer.get(source_start..source_start + rect.width * 4) else {
                break;
            };
            let target = &mut self.canvas[rect.row_range(row, canvas_width)];
            for (dst, src) in target.chunks_exact_mut(4).zip(source.chunks_exact(4)) {
                if src[3] != 0 {
                    dst.copy_from_slice(src);
                }
            }
        }

        self.next_index += 1;
        Ok(())
    }
}

/// Decodes GIF frames by index, compositing each onto the full canvas.
///
/// Consecutive indices continue the same stream pass; going backwards (or
/// recovering from an error) restarts from the first frame and replays up to the
/// requested one.
pub struct GifFrameDecoder {
    data: Arc<[u8]>,
    size: FrameSize,
    frame_count: usize,
    predraw: bool,
    memory_limit: u64,
    composition: Option<Composition>,
}

impl GifFrameDecoder {
    pub fn new(source: &AnimatedImageSource, predraw: bool) -> Self {
        Self {
            data: Arc::clone(source.data()),
            size: source.canonical_size(),
            frame_count: source.frame_count(),
            predraw,
            memory_limit: u64::MAX,
            composition: None,
        }
    }

    /// Refuse to decode when one frame's working buffers would exceed `bytes`.
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn predraw_enabled(&self) -> bool {
        self.predraw
    }

    /// Bytes held while producing one frame: the canvas, the copy handed out
    /// and, when predrawing, the render buffer.
    fn working_set(&self) -> u64 {
        let buffers = if self.predraw { 3 } else { 2 };
        self.size.byte_size().saturating_mul(buffers)
    }

    fn open(&self, index: usize) -> Result<Composition, DecodeError> {
        let needed = self.working_set();
        if needed > self.memory_limit {
            return Err(DecodeError::OutOfMemory {
                index,
                bytes: usize::try_from(needed).unwrap_or(usize::MAX),
            });
        }


        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);

        let stream = options
            .read_info(Cursor::new(Arc::clone(&self.data)))
            .map_err(|e| DecodeError::Corrupt {
                index,
                reason: e.to_string(),
            })?;

        Ok(Composition {
            stream,
            canvas: zeroed_canvas(self.size, index)?,
            pending: None,
            next_index: 0,
        })
    }
}

impl FrameDecoder for GifFrameDecoder {
    fn decode(&mut self, index: usize) -> Result<FrameImage, DecodeError> {
        if index >= self.frame_count {
            return Err(DecodeError::OutOfRange {
                index,
                frame_count: self.frame_count,
            });
        }

        let start = Instant::now();

        // An error drops the composition, so the next call starts a fresh pass
        let mut composition = match self.composition.take() {
            Some(composition) if composition.next_index <= index => composition,
            previous => {
                if previous.is_some() {
                    log::debug!("Restarting GIF stream to reach frame {}", index);
                }
                self.open(index)?
            }
        };

        while composition.next_index <= index {
            composition.advance(self.size).map_err(|e| match e {
                DecodeError::Corrupt { index: bad, reason } if bad != index => DecodeError::Corrupt {
                    index,
                    reason: format!("depends on corrupt frame {}: {}", bad, reason),
                },
                other => other,
            })?;
        }

        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(composition.canvas.len())
            .map_err(|_| DecodeError::OutOfMemory {
                index,
                bytes: composition.canvas.len(),
            })?;
        pixels.extend_from_slice(&composition.canvas);
        self.composition = Some(composition);

        let rgba = RgbaImage::from_raw(self.size.width, self.size.height, pixels).ok_or_else(|| {
            DecodeError::Corrupt {
                index,
                reason: "canvas buffer does not match canvas size".to_string(),
            }
        })?;

        let frame = if self.predraw {
            FrameImage::predrawn(index, rgba, start.elapsed())?
        } else {
            FrameImage::new(index, rgba, start.elapsed())
        };

        log::trace!("Decoded frame {} in {:?} (predrawn: {})", index, frame.decode_time(), self.predraw);
        Ok(frame)
    }
}

fn zeroed_canvas(size: FrameSize, index: usize) -> Result<Vec<u8>, DecodeError> {
    let bytes = size.byte_size() as usize;
    let mut canvas = Vec::new();
    canvas
        .try_reserve_exact(bytes)
        .map_err(|_| DecodeError::OutOfMemory { index, bytes })?;
    canvas.resize(bytes, 0);
    Ok(canvas)
}
