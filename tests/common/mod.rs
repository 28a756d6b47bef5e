#![allow(dead_code)]

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, Rgba, RgbaImage};
use std::time::{Duration, Instant};

/// GIF with `delays_ms.len()` frames; frame `i` is a solid colour derived from `i`
pub fn gif_bytes(width: u32, height: u32, delays_ms: &[u32], repeat: Repeat) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder.set_repeat(repeat).unwrap();
        let frames = delays_ms.iter().enumerate().map(|(index, delay_ms)| {
            let rgba = RgbaImage::from_pixel(width, height, frame_colour(index));
            Frame::from_parts(rgba, 0, 0, Delay::from_numer_denom_ms(*delay_ms, 1))
        });
        encoder.encode_frames(frames).unwrap();
    }
    out
}

pub fn frame_colour(index: usize) -> Rgba<u8> {
    Rgba([((index * 37) % 256) as u8, ((index * 11) % 256) as u8, 200, 255])
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// One 1x1 frame on a canvas that declares `width` x `height`
pub fn gif_with_canvas(width: u16, height: u16) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = gif::Encoder::new(&mut out, width, height, &[]).unwrap();
        let mut pixels = vec![255, 0, 0, 255];
        let frame = gif::Frame::from_rgba(1, 1, &mut pixels);
        encoder.write_frame(&frame).unwrap();
    }
    out
}
