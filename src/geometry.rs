//! Output size negotiation.
//!
//! A producer's output size is its natural upstream size unless an explicit
//! override is set: verbatim (may distort) or aspect-preserving (fit within
//! the bounds, renderer handles centering). [`resolve_output_size`] is pure;
//! memoization and invalidation live in the node state.

use std::fmt;

/// Pixel dimensions of a texture or frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }

    /// True when either dimension is zero; nothing can be allocated or fit.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// RGBA8 byte length of a frame at this size.
    pub(crate) fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An explicit override of the negotiated output dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForcedSize {
    pub size: Size,
    /// When set, the natural size is scaled to fit within `size` preserving
    /// its aspect ratio instead of being stretched to `size` verbatim.
    pub respect_aspect: bool,
}

/// Resolve the output frame size for a producer.
///
/// - No override: the natural input size passes through.
/// - Absolute override: the forced size verbatim (may distort).
/// - Aspect-preserving override: the input scaled to fit within the forced
///   bounds. Only the fitted dimensions are returned; any centering offsets
///   are the renderer's concern.
pub fn resolve_output_size(input: Size, forced: Option<ForcedSize>) -> Size {
    match forced {
        None => input,
        Some(f) if !f.respect_aspect => f.size,
        Some(f) => fit_within(input, f.size),
    }
}

/// Largest size with `input`'s aspect ratio that fits inside `bounds`.
fn fit_within(input: Size, bounds: Size) -> Size {
    if input.is_empty() || bounds.is_empty() {
        return input;
    }
    let sx = bounds.width as f64 / input.width as f64;
    let sy = bounds.height as f64 / input.height as f64;
    let scale = sx.min(sy);
    Size {
        width: ((input.width as f64 * scale).round() as u32).clamp(1, bounds.width),
        height: ((input.height as f64 * scale).round() as u32).clamp(1, bounds.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_override_passes_input_through() {
        let input = Size::new(1280, 720);
        assert_eq!(resolve_output_size(input, None), input);
    }

    #[test]
    fn absolute_override_wins_verbatim() {
        let forced = ForcedSize {
            size: Size::new(100, 400),
            respect_aspect: false,
        };
        assert_eq!(
            resolve_output_size(Size::new(1920, 1080), Some(forced)),
            Size::new(100, 400)
        );
    }

    #[test]
    fn aspect_fit_shrinks_to_bounds() {
        let forced = ForcedSize {
            size: Size::new(320, 320),
            respect_aspect: true,
        };
        assert_eq!(
            resolve_output_size(Size::new(640, 480), Some(forced)),
            Size::new(320, 240)
        );
    }

    #[test]
    fn aspect_fit_portrait_input() {
        let forced = ForcedSize {
            size: Size::new(320, 320),
            respect_aspect: true,
        };
        assert_eq!(
            resolve_output_size(Size::new(480, 640), Some(forced)),
            Size::new(240, 320)
        );
    }

    #[test]
    fn aspect_fit_never_exceeds_bounds() {
        let forced = ForcedSize {
            size: Size::new(333, 217),
            respect_aspect: true,
        };
        for (w, h) in [(640, 480), (1919, 1081), (7, 5000), (5000, 7)] {
            let out = resolve_output_size(Size::new(w, h), Some(forced));
            assert!(out.width <= 333, "{w}x{h} -> {out}");
            assert!(out.height <= 217, "{w}x{h} -> {out}");
            // Ratio preserved within rounding tolerance.
            let in_ratio = w as f64 / h as f64;
            let out_ratio = out.width as f64 / out.height as f64;
            assert!(
                (in_ratio - out_ratio).abs() / in_ratio < 0.02
                    || out.width == 1
                    || out.height == 1,
                "{w}x{h} -> {out}"
            );
        }
    }

    #[test]
    fn aspect_fit_with_empty_input_returns_input() {
        let forced = ForcedSize {
            size: Size::new(320, 320),
            respect_aspect: true,
        };
        assert_eq!(
            resolve_output_size(Size::new(0, 0), Some(forced)),
            Size::new(0, 0)
        );
    }

    #[test]
    fn resolve_is_deterministic() {
        let input = Size::new(1234, 567);
        let forced = Some(ForcedSize {
            size: Size::new(300, 300),
            respect_aspect: true,
        });
        assert_eq!(
            resolve_output_size(input, forced),
            resolve_output_size(input, forced)
        );
    }
}
