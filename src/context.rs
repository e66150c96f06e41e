//! The GL-facing seam.
//!
//! The output stage never talks to a concrete GL binding directly; it goes
//! through [`RenderContext`] so the same node code runs against a real
//! context ([`crate::gl::GlowContext`]) or a CPU one
//! ([`crate::software::SoftwareContext`]). Every method is only ever invoked
//! from work submitted through [`crate::dispatch::GlThread`], which is what
//! makes the context current on its owning thread.

use crate::bitmap::Bitmap;
use crate::error::OutputError;
use crate::geometry::Size;

/// A texture plus the framebuffer that renders into it.
///
/// Plain ids, freely copyable; the resources they name live on the context
/// thread. `fbo == 0` means "no framebuffer attached" (upload-only textures).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetTexture {
    pub tex: u32,
    pub fbo: u32,
    pub size: Size,
}

/// Texture/framebuffer primitives of the current GL context.
///
/// Methods take `&self`: GL handles interior mutability itself, and shared
/// borrows are what allow reentrant dispatch on the context thread.
pub trait RenderContext: 'static {
    /// Allocate a texture of `size` with a framebuffer attached.
    /// `smooth` selects linear filtering over nearest.
    fn create_target(&self, size: Size, smooth: bool) -> Result<TargetTexture, OutputError>;

    /// Reallocate `target`'s storage at `size`, keeping its ids.
    fn resize_target(&self, target: &mut TargetTexture, size: Size) -> Result<(), OutputError>;

    /// Release the texture (and framebuffer, if any).
    fn delete_target(&self, target: TargetTexture);

    /// Upload bitmap pixels into a fresh texture (no framebuffer).
    fn upload_bitmap(&self, bitmap: &Bitmap, smooth: bool) -> Result<TargetTexture, OutputError>;

    /// Read the full RGBA8 contents of a texture.
    fn read_pixels(&self, tex: u32, size: Size) -> Result<Vec<u8>, OutputError>;
}
