//! In-memory bitmap results for still capture.
//!
//! Frames are raw RGBA8, row-major, top row first — the same layout the
//! writer pipes to FFmpeg. Orientation is a pure geometric transform applied
//! on read-back, not a re-render.

use crate::geometry::Size;

/// Orientation applied to a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// As rendered.
    #[default]
    Up,
    /// Rotated 180 degrees.
    UpsideDown,
    /// Rotated 90 degrees counter-clockwise.
    Left,
    /// Rotated 90 degrees clockwise.
    Right,
}

/// An owned RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    size: Size,
    pixels: Vec<u8>,
}

impl Bitmap {
    /// Wrap a raw RGBA buffer. `pixels` must be exactly `width * height * 4`
    /// bytes.
    pub fn from_rgba(size: Size, pixels: Vec<u8>) -> Bitmap {
        assert_eq!(
            pixels.len(),
            size.byte_len(),
            "RGBA buffer length does not match {size}"
        );
        Bitmap { size, pixels }
    }

    /// A single-color bitmap. Handy for tests and one-shot filter inputs.
    pub fn solid(size: Size, rgba: [u8; 4]) -> Bitmap {
        let mut pixels = Vec::with_capacity(size.byte_len());
        for _ in 0..(size.width as usize * size.height as usize) {
            pixels.extend_from_slice(&rgba);
        }
        Bitmap { size, pixels }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// RGBA value at (x, y), origin top-left.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.size.width as usize + x as usize) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    /// Flip rows top-to-bottom. GL read-back is bottom-up, so callers that
    /// want top-down image data apply this once.
    pub fn flipped_vertically(&self) -> Bitmap {
        let row = self.size.width as usize * 4;
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for chunk in self.pixels.chunks_exact(row).rev() {
            pixels.extend_from_slice(chunk);
        }
        Bitmap {
            size: self.size,
            pixels,
        }
    }

    /// Apply an orientation as a pure pixel remap.
    pub fn oriented(&self, orientation: Orientation) -> Bitmap {
        match orientation {
            Orientation::Up => self.clone(),
            Orientation::UpsideDown => self.remap(self.size, |x, y| {
                (self.size.width - 1 - x, self.size.height - 1 - y)
            }),
            // 90 CCW: the right edge of the source becomes the top row.
            Orientation::Left => self.remap(
                Size::new(self.size.height, self.size.width),
                |x, y| (self.size.width - 1 - y, x),
            ),
            // 90 CW: the left edge of the source becomes the top row.
            Orientation::Right => self.remap(
                Size::new(self.size.height, self.size.width),
                |x, y| (y, self.size.height - 1 - x),
            ),
        }
    }

    /// Build a bitmap of `out_size` where destination (x, y) samples the
    /// source coordinate returned by `src_for`.
    fn remap(&self, out_size: Size, src_for: impl Fn(u32, u32) -> (u32, u32)) -> Bitmap {
        let mut pixels = vec![0u8; out_size.byte_len()];
        let src_row = self.size.width as usize * 4;
        let dst_row = out_size.width as usize * 4;
        for y in 0..out_size.height {
            for x in 0..out_size.width {
                let (sx, sy) = src_for(x, y);
                let s = sy as usize * src_row + sx as usize * 4;
                let d = y as usize * dst_row + x as usize * 4;
                pixels[d..d + 4].copy_from_slice(&self.pixels[s..s + 4]);
            }
        }
        Bitmap {
            size: out_size,
            pixels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2x1 bitmap: red on the left, green on the right.
    fn red_green() -> Bitmap {
        Bitmap::from_rgba(
            Size::new(2, 1),
            vec![255, 0, 0, 255, 0, 255, 0, 255],
        )
    }

    #[test]
    fn up_is_identity() {
        let b = red_green();
        assert_eq!(b.oriented(Orientation::Up), b);
    }

    #[test]
    fn upside_down_reverses_pixels() {
        let b = red_green().oriented(Orientation::UpsideDown);
        assert_eq!(b.pixel(0, 0), [0, 255, 0, 255]);
        assert_eq!(b.pixel(1, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn left_rotation_swaps_dimensions() {
        let b = red_green().oriented(Orientation::Left);
        assert_eq!(b.size(), Size::new(1, 2));
        // CCW: right edge (green) becomes the top.
        assert_eq!(b.pixel(0, 0), [0, 255, 0, 255]);
        assert_eq!(b.pixel(0, 1), [255, 0, 0, 255]);
    }

    #[test]
    fn right_rotation_swaps_dimensions() {
        let b = red_green().oriented(Orientation::Right);
        assert_eq!(b.size(), Size::new(1, 2));
        // CW: left edge (red) becomes the top.
        assert_eq!(b.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(b.pixel(0, 1), [0, 255, 0, 255]);
    }

    #[test]
    fn four_rights_make_an_up() {
        let b = Bitmap::from_rgba(
            Size::new(2, 2),
            vec![
                1, 2, 3, 4, 5, 6, 7, 8, //
                9, 10, 11, 12, 13, 14, 15, 16,
            ],
        );
        let rotated = b
            .oriented(Orientation::Right)
            .oriented(Orientation::Right)
            .oriented(Orientation::Right)
            .oriented(Orientation::Right);
        assert_eq!(rotated, b);
    }

    #[test]
    fn vertical_flip_reverses_rows() {
        let b = Bitmap::from_rgba(
            Size::new(1, 2),
            vec![255, 0, 0, 255, 0, 255, 0, 255],
        );
        let f = b.flipped_vertically();
        assert_eq!(f.pixel(0, 0), [0, 255, 0, 255]);
        assert_eq!(f.pixel(0, 1), [255, 0, 0, 255]);
    }

    #[test]
    #[should_panic(expected = "RGBA buffer length")]
    fn mismatched_buffer_panics() {
        let _ = Bitmap::from_rgba(Size::new(2, 2), vec![0u8; 3]);
    }
}
