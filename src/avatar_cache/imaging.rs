//! Avatar image pipeline: decoding, square scaling, PNG encoding and
//! deterministic placeholder avatars.

use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::io::Cursor;

use super::size::clamp_size;
use super::MAX_RETAINED_SIZE;

/// Background of generated placeholders
const PLACEHOLDER_BACKGROUND: Rgba<u8> = Rgba([0xF0, 0xF0, 0xF0, 0xFF]);
const GRID_CELLS: u32 = 5;

/// Decode fetched bytes into an RGBA bitmap, guessing the format
pub fn decode_image(bytes: &[u8]) -> image::ImageResult<RgbaImage> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Encode a bitmap as PNG
pub fn encode_png(image: &RgbaImage) -> image::ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Bound the resolution retained in the cache
///
/// Images larger than `MAX_RETAINED_SIZE` in either dimension are scaled down to
/// a `MAX_RETAINED_SIZE` square; smaller images are kept untouched.
pub fn cap_retained(image: RgbaImage) -> RgbaImage {
    if image.width() > MAX_RETAINED_SIZE || image.height() > MAX_RETAINED_SIZE {
        scale_image(&image, MAX_RETAINED_SIZE)
    } else {
        image
    }
}

/// Dimensions of `width x height` fitted inside a `size` square
fn fit_within(width: u32, height: u32, size: u32) -> (u32, u32) {
    let scaled = |short: u32, long: u32| {
        ((u64::from(size) * u64::from(short) / u64::from(long)) as u32).max(1)
    };
    match width.cmp(&height) {
        std::cmp::Ordering::Greater => (size, scaled(height, width)),
        std::cmp::Ordering::Less => (scaled(width, height), size),
        std::cmp::Ordering::Equal => (size, size),
    }
}

/// Scale `src` into an exactly `size x size` square.
///
/// The aspect ratio is preserved and the result is centered on a transparent
/// canvas. Large reductions are done in repeated 6/7 steps before the final
/// resize, which keeps thin features from aliasing away.
pub fn scale_image(src: &RgbaImage, size: u32) -> RgbaImage {
    let size = clamp_size(i64::from(size));
    let (src_width, src_height) = src.dimensions();
    if src_width == 0 || src_height == 0 {
        return RgbaImage::new(size, size);
    }

    let (target_width, target_height) = fit_within(src_width, src_height, size);

    let mut current: Cow<'_, RgbaImage> = Cow::Borrowed(src);
    while target_width <= current.width() * 6 / 7 && target_height <= current.height() * 6 / 7 {
        let step = imageops::resize(
            current.as_ref(),
            current.width() * 6 / 7,
            current.height() * 6 / 7,
            FilterType::CatmullRom,
        );
        // the superseded intermediate is released here
        current = Cow::Owned(step);
    }

    let resized = if current.dimensions() == (target_width, target_height) {
        current.into_owned()
    } else {
        imageops::resize(
            current.as_ref(),
            target_width,
            target_height,
            FilterType::CatmullRom,
        )
    };

    let mut canvas = RgbaImage::new(size, size);
    imageops::overlay(
        &mut canvas,
        &resized,
        i64::from((size - target_width) / 2),
        i64::from((size - target_height) / 2),
    );
    canvas
}

fn clamp_channel(value: u8) -> u8 {
    value.clamp(0x20, 0xDF)
}

/// Generate a symmetric 5x5 pixel-art avatar from `seed`.
///
/// Pure function of `(seed, size)`: the colour comes from the first three digest
/// bytes and the cell pattern from the following bits, mirrored left to right.
pub fn generate_placeholder(seed: &str, size: u32) -> RgbaImage {
    let size = clamp_size(i64::from(size));
    let digest = Sha256::digest(seed.as_bytes());
    let foreground = Rgba([
        clamp_channel(digest[0]),
        clamp_channel(digest[1]),
        clamp_channel(digest[2]),
        0xFF,
    ]);

    // only the left three columns are drawn, the right half is a pixel mirror
    let mut cells = [[false; 3]; GRID_CELLS as usize];
    for (row, cols) in cells.iter_mut().enumerate() {
        for (col, cell) in cols.iter_mut().enumerate() {
            let bit = row * 3 + col;
            *cell = (digest[3 + bit / 8] >> (bit % 8)) & 1 == 1;
        }
    }

    let mut canvas = RgbaImage::from_pixel(size, size, PLACEHOLDER_BACKGROUND);
    let margin = size / 12;
    let inner = size - 2 * margin;
    let edge = |index: u32| margin + index * inner / GRID_CELLS;

    for (row, cols) in cells.iter().enumerate() {
        for (col, filled) in cols.iter().enumerate() {
            if !filled {
                continue;
            }
            let (row, col) = (row as u32, col as u32);
            for y in edge(row)..edge(row + 1) {
                for x in edge(col)..edge(col + 1) {
                    canvas.put_pixel(x, y, foreground);
                }
            }
        }
    }

    for y in 0..size {
        for x in 0..size / 2 {
            let pixel = *canvas.get_pixel(x, y);
            canvas.put_pixel(size - 1 - x, y, pixel);
        }
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar_cache::{MAX_SIZE, MIN_SIZE};

    fn solid(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]))
    }

    #[test]
    fn test_fit_within_preserves_aspect() {
        assert_eq!(fit_within(200, 100, 64), (64, 32));
        assert_eq!(fit_within(100, 300, 48), (16, 48));
        assert_eq!(fit_within(50, 50, 32), (32, 32));
        assert_eq!(fit_within(1000, 1, 16), (16, 1));
    }

    #[test]
    fn test_scale_downscale_is_square_and_centered() {
        let scaled = scale_image(&solid(400, 200), 64);
        assert_eq!(scaled.dimensions(), (64, 64));
        // letterbox rows are transparent
        assert_eq!(scaled.get_pixel(32, 0)[3], 0);
        assert_eq!(scaled.get_pixel(32, 63)[3], 0);
        // content sits in the middle band
        assert_eq!(scaled.get_pixel(32, 32)[3], 255);
    }

    #[test]
    fn test_scale_upscale_single_pass() {
        let scaled = scale_image(&solid(20, 40), 80);
        assert_eq!(scaled.dimensions(), (80, 80));
        assert_eq!(scaled.get_pixel(0, 40)[3], 0);
        assert_eq!(scaled.get_pixel(40, 40)[3], 255);
    }

    #[test]
    fn test_scale_clamps_requested_size() {
        assert_eq!(scale_image(&solid(300, 300), 500).dimensions(), (128, 128));
        assert_eq!(scale_image(&solid(300, 300), 2).dimensions(), (16, 16));
    }

    #[test]
    fn test_scale_empty_source() {
        let empty = RgbaImage::new(0, 0);
        let scaled = scale_image(&empty, 32);
        assert_eq!(scaled.dimensions(), (32, 32));
    }

    #[test]
    fn test_cap_retained() {
        assert_eq!(cap_retained(solid(512, 256)).dimensions(), (128, 128));
        assert_eq!(cap_retained(solid(100, 60)).dimensions(), (100, 60));
    }

    #[test]
    fn test_placeholder_is_deterministic() {
        let a = generate_placeholder("https://example.com/a.png", 48);
        let b = generate_placeholder("https://example.com/a.png", 48);
        assert_eq!(a.dimensions(), (48, 48));
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_placeholder_differs_by_seed() {
        let a = generate_placeholder("alice", 32);
        let b = generate_placeholder("bob", 32);
        assert_ne!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_placeholder_is_mirrored_at_every_size() {
        for seed in ["mirror", "alice", "bob", "x"] {
            for size in MIN_SIZE..=MAX_SIZE {
                let image = generate_placeholder(seed, size);
                for y in 0..size {
                    for x in 0..size / 2 {
                        assert_eq!(
                            image.get_pixel(x, y),
                            image.get_pixel(size - 1 - x, y),
                            "seed {seed} size {size} at ({x}, {y})"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_placeholder_colour_avoids_extremes() {
        let image = generate_placeholder("colour", 64);
        for pixel in image.pixels() {
            if *pixel != PLACEHOLDER_BACKGROUND {
                assert!(pixel.0[..3].iter().all(|c| (0x20..=0xDF).contains(c)));
            }
        }
    }

    #[test]
    fn test_png_round_trip_keeps_dimensions() {
        let png = encode_png(&generate_placeholder("png", 32)).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        assert_eq!(decode_image(&png).unwrap().dimensions(), (32, 32));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_image(b"definitely not an image").is_err());
    }
}
