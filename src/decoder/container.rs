//! GIF container walking: frame count, per-frame delays, loop count and canvas size.
//!
//! Only frame descriptors are read here; pixel data is skipped and decoded later,
//! one frame at a time, by [`GifFrameDecoder`](super::worker::GifFrameDecoder).

use super::FrameSize;
use crate::error::ParseError;
use std::fmt;
use std::io::{self, Cursor};
use std::sync::Arc;
use std::time::Duration;

/// Delays strictly below this are treated as bogus (see [`DEFAULT_DELAY`])
pub const MINIMUM_DELAY: Duration = Duration::from_millis(20);

/// Delay used in place of any delay below [`MINIMUM_DELAY`].
///
/// Matches what browsers do; a zero delay would otherwise spin the playback loop.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Immutable description of an animated image, created once per source.
#[derive(Clone)]
pub struct AnimatedImageSource {
    data: Arc<[u8]>,
    delay_times: Vec<Duration>,
    loop_count: u32,
    canonical_size: FrameSize,
}

impl AnimatedImageSource {
    /// The bytes the source was parsed from
    pub fn data(&self) -> &Arc<[u8]> {
        &self.data
    }

    /// Number of frames; always equal to `delay_times().len()` and at least 1
    pub fn frame_count(&self) -> usize {
        self.delay_times.len()
    }

    /// Clamped delay for every frame, in frame order
    pub fn delay_times(&self) -> &[Duration] {
        &self.delay_times
    }

    pub fn delay_time_at(&self, index: usize) -> Option<Duration> {
        self.delay_times.get(index).copied()
    }

    /// 0 means the animation repeats forever
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn canonical_size(&self) -> FrameSize {
        self.canonical_size
    }

    /// Total duration of one pass through the animation
    pub fn loop_duration(&self) -> Duration {
        self.delay_times.iter().sum()
    }
}

impl fmt::Debug for AnimatedImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnimatedImageSource")
            .field("bytes", &self.data.len())
            .field("frame_count", &self.frame_count())
            .field("loop_count", &self.loop_count)
            .field("canonical_size", &self.canonical_size)
            .finish()
    }
}

/// Clamp a raw GIF delay (centiseconds) to a playable interval
pub fn clamp_delay(centiseconds: u16) -> Duration {
    let delay = Duration::from_millis(centiseconds as u64 * 10);
    if delay < MINIMUM_DELAY {
        DEFAULT_DELAY
    } else {
        delay
    }
}

/// Map the NETSCAPE2.0 loop extension to a loop count (0 = forever).
///
/// A stream without the extension plays once.
fn loop_count_from(repeat: gif::Repeat) -> u32 {
    match repeat {
        gif::Repeat::Infinite => 0,
        gif::Repeat::Finite(0) => 1,
        gif::Repeat::Finite(count) => count as u32,
    }
}

/// True for a well-formed header followed only by extension blocks and the trailer.
fn ends_before_first_frame(data: &[u8]) -> bool {
    if data.len() < 13 || !(data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a")) {
        return false;
    }

    let flags = data[10];
    let mut pos = 13;
    if flags & 0x80 != 0 {
        pos += 3 << ((flags & 0x07) + 1);
    }

    loop {
        match data.get(pos) {
            Some(0x3B) => return true,
            Some(0x21) => {
                // Introducer and label, then sub-blocks up to the zero terminator
                pos += 2;
                loop {
                    let Some(&len) = data.get(pos) else {
                        return false;
                    };
                    pos += 1 + len as usize;
                    if len == 0 {
                        break;
                    }
                }
            }
            _ => return false,
        }
    }
}

/// Parse GIF bytes into an [`AnimatedImageSource`].
///
/// Fails on a malformed header, an empty canvas, zero frames, or a stream that
/// ends before the trailer.
pub fn parse(data: impl Into<Arc<[u8]>>) -> Result<AnimatedImageSource, ParseError> {
    let data: Arc<[u8]> = data.into();

    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);

    let mut decoder = match options.read_info(Cursor::new(Arc::clone(&data))) {
        Ok(decoder) => decoder,
        // The gif crate reports a stream that ends at the trailer as a header error
        Err(_) if ends_before_first_frame(&data) => return Err(ParseError::NoFrames),
        Err(e) => return Err(ParseError::MalformedHeader(e.to_string())),
    };

    let canonical_size = FrameSize::new(decoder.width() as u32, decoder.height() as u32);
    if canonical_size.width == 0 || canonical_size.height == 0 {
        return Err(ParseError::InvalidCanvas {
            width: canonical_size.width,
            height: canonical_size.height,
        });
    }

    let mut delay_times = Vec::new();
    loop {
        match decoder.next_frame_info() {
            Ok(Some(frame)) => delay_times.push(clamp_delay(frame.delay)),
            Ok(None) => break,
            Err(gif::DecodingError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(ParseError::Truncated {
                    frames_read: delay_times.len(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                return Err(ParseError::Corrupt {
                    frames_read: delay_times.len(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if delay_times.is_empty() {
        return Err(ParseError::NoFrames);
    }

    let loop_count = loop_count_from(decoder.repeat());

    log::debug!(
        "Parsed GIF: {} frames, canvas {}, loop count {}, {} bytes",
        delay_times.len(),
        canonical_size,
        loop_count,
        data.len()
    );

    Ok(AnimatedImageSource {
        data,
        delay_times,
        loop_count,
        canonical_size,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::codecs::gif::{GifEncoder, Repeat};
    use image::{Delay, Frame, Rgba, RgbaImage};

    /// Encode a GIF whose frame `i` is filled with red = i * 20
    pub(crate) fn build_test_gif(width: u32, height: u32, delays_ms: &[u32], repeat: Option<Repeat>) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            if let Some(repeat) = repeat {
                encoder.set_repeat(repeat).unwrap();
            }
            let frames = delays_ms.iter().enumerate().map(|(idx, delay_ms)| {
                let red = ((idx * 20) % 256) as u8;
                let rgba = RgbaImage::from_pixel(width, height, Rgba([red, 0, 0, 255]));
                Frame::from_parts(rgba, 0, 0, Delay::from_numer_denom_ms(*delay_ms, 1))
            });
            encoder.encode_frames(frames).unwrap();
        }
        out
    }

    #[test]
    fn test_parse_uniform_animation() {
        let bytes = build_test_gif(4, 3, &[100; 10], Some(Repeat::Infinite));
        let source = parse(bytes).unwrap();

        assert_eq!(source.frame_count(), 10);
        assert_eq!(source.delay_times().len(), source.frame_count());
        assert!(source.delay_times().iter().all(|d| *d == Duration::from_millis(100)));
        assert_eq!(source.loop_count(), 0);
        assert_eq!(source.canonical_size(), FrameSize::new(4, 3));
        assert_eq!(source.loop_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_short_delays_use_default() {
        let bytes = build_test_gif(2, 2, &[10, 20, 50], Some(Repeat::Infinite));
        let source = parse(bytes).unwrap();

        assert_eq!(
            source.delay_times(),
            &[DEFAULT_DELAY, Duration::from_millis(20), Duration::from_millis(50)]
        );
    }

    #[test]
    fn test_clamp_delay_boundaries() {
        assert_eq!(clamp_delay(0), DEFAULT_DELAY);
        assert_eq!(clamp_delay(1), DEFAULT_DELAY);
        assert_eq!(clamp_delay(2), MINIMUM_DELAY);
        assert_eq!(clamp_delay(7), Duration::from_millis(70));
    }

    #[test]
    fn test_finite_and_missing_loop_counts() {
        let finite = parse(build_test_gif(1, 1, &[100, 100], Some(Repeat::Finite(3)))).unwrap();
        assert_eq!(finite.loop_count(), 3);

        let once = parse(build_test_gif(1, 1, &[100, 100], None)).unwrap();
        assert_eq!(once.loop_count(), 1);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let bytes = build_test_gif(3, 3, &[30, 60, 90, 120], Some(Repeat::Finite(2)));
        let a = parse(bytes.clone()).unwrap();
        let b = parse(bytes).unwrap();

        assert_eq!(a.frame_count(), b.frame_count());
        assert_eq!(a.loop_count(), b.loop_count());
        assert_eq!(a.delay_times(), b.delay_times());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(parse(b"not-a-gif".to_vec()), Err(ParseError::MalformedHeader(_))));
        assert!(matches!(parse(Vec::new()), Err(ParseError::MalformedHeader(_))));
    }

    #[test]
    fn test_header_without_frames_is_rejected() {
        let bytes = build_test_gif(4, 4, &[100, 100], Some(Repeat::Infinite));
        // Header (6) + logical screen descriptor (7), no global palette needed to fail
        let truncated = bytes[..13].to_vec();
        assert!(parse(truncated).is_err());
    }

    #[test]
    fn test_missing_trailer_is_rejected() {
        let bytes = build_test_gif(4, 4, &[100, 100, 100], Some(Repeat::Infinite));
        let truncated = bytes[..bytes.len() - 1].to_vec();
        assert!(parse(truncated).is_err());
    }

    #[test]
    fn test_zero_frames_is_rejected() {
        let bytes = build_test_gif(4, 4, &[100], Some(Repeat::Infinite));
        // Keep header, screen descriptor and global palette; append only the trailer
        let palette_len = if bytes[10] & 0x80 != 0 { 3 << ((bytes[10] & 0x07) + 1) } else { 0 };
        let mut empty = bytes[..13 + palette_len].to_vec();
        empty.push(0x3B);
        assert!(matches!(parse(empty), Err(ParseError::NoFrames)));
    }

    #[test]
    fn test_extensions_without_frames_is_rejected() {
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&[4, 0, 4, 0, 0x80, 0, 0]);
        bytes.extend_from_slice(&[0; 6]);
        // NETSCAPE2.0 loop extension, then the trailer
        bytes.extend_from_slice(&[0x21, 0xFF, 11]);
        bytes.extend_from_slice(b"NETSCAPE2.0");
        bytes.extend_from_slice(&[3, 1, 0, 0, 0, 0x3B]);
        assert!(matches!(parse(bytes), Err(ParseError::NoFrames)));
    }

    #[test]
    fn test_header_only_is_not_reported_as_empty() {
        let bytes = build_test_gif(4, 4, &[100], Some(Repeat::Infinite));
        assert!(matches!(parse(bytes[..13].to_vec()), Err(ParseError::MalformedHeader(_))));
        assert!(!ends_before_first_frame(&bytes));
    }
}
