use std::collections::TryReserveError;

/// Premultiply one 8-bit channel by alpha, rounding to nearest
#[inline]
fn premultiply(channel: u8, alpha: u8) -> u8 {
    ((channel as u16 * alpha as u16 + 127) / 255) as u8
}

/// Convert straight-alpha interleaved RGBA8 to premultiplied BGRA8
///
/// This is the layout compositors upload directly, so doing it ahead of time
/// removes the per-frame conversion from the render path.
///
/// # Arguments
/// * `rgba` - Interleaved RGBA8 pixels (RGBARGBA...)
///
/// # Returns
/// Vec<u8> of the same length containing premultiplied BGRA8, or the
/// allocation error if the buffer could not be reserved.
pub fn rgba_to_render_bgra(rgba: &[u8]) -> Result<Vec<u8>, TryReserveError> {
    let mut bgra = Vec::new();
    bgra.try_reserve_exact(rgba.len())?;

    for pixel in rgba.chunks_exact(4) {
        let alpha = pixel[3];
        match alpha {
            255 => bgra.extend_from_slice(&[pixel[2], pixel[1], pixel[0], 255]),
            0 => bgra.extend_from_slice(&[0, 0, 0, 0]),
            _ => bgra.extend_from_slice(&[
                premultiply(pixel[2], alpha), // B
                premultiply(pixel[1], alpha), // G
                premultiply(pixel[0], alpha), // R
                alpha,                        // A
            ]),
        }
    }

    Ok(bgra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_pixels_swap_channels() {
        let rgba = [255, 127, 0, 255, 10, 20, 30, 255];
        let bgra = rgba_to_render_bgra(&rgba).unwrap();

        assert_eq!(&bgra[0..4], &[0, 127, 255, 255]);
        assert_eq!(&bgra[4..8], &[30, 20, 10, 255]);
    }

    #[test]
    fn test_transparent_pixels_are_zeroed() {
        let rgba = [200, 100, 50, 0];
        let bgra = rgba_to_render_bgra(&rgba).unwrap();

        assert_eq!(bgra, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_partial_alpha_is_premultiplied() {
        // 255 * 128 / 255 = 128, 100 * 128 / 255 = 50.2 -> 50
        let rgba = [255, 100, 0, 128];
        let bgra = rgba_to_render_bgra(&rgba).unwrap();

        assert_eq!(bgra, vec![0, 50, 128, 128]);
    }

    #[test]
    fn test_output_length_matches_input() {
        let rgba = vec![7u8; 4 * 16];
        assert_eq!(rgba_to_render_bgra(&rgba).unwrap().len(), rgba.len());
    }
}
