//! glow-backed render context.
//!
//! Construct the `glow::Context` inside the [`crate::dispatch::GlThread`]
//! factory closure, after making the platform GL context current on that
//! thread, then wrap it in [`GlowContext`]. Allocation failures (including
//! incomplete framebuffers) surface as recoverable errors instead of
//! aborting, so a caller can retry at a smaller size.
//!
//! This backend needs a live GL context and is exercised by real pipelines;
//! headless tests run against [`crate::software::SoftwareContext`].

use std::num::NonZeroU32;

use glow::HasContext;

use crate::bitmap::Bitmap;
use crate::context::{RenderContext, TargetTexture};
use crate::error::OutputError;
use crate::geometry::Size;

/// [`RenderContext`] over a `glow::Context`.
pub struct GlowContext {
    gl: glow::Context,
}

impl GlowContext {
    pub fn new(gl: glow::Context) -> Self {
        GlowContext { gl }
    }

    /// The underlying GL handle, for render closures that issue draw calls.
    pub fn raw(&self) -> &glow::Context {
        &self.gl
    }

    /// Allocate an RGBA8 texture, optionally seeded with pixel data.
    fn alloc_texture(
        &self,
        size: Size,
        smooth: bool,
        pixels: Option<&[u8]>,
    ) -> Result<glow::NativeTexture, OutputError> {
        let gl = &self.gl;
        unsafe {
            let tex = gl
                .create_texture()
                .map_err(|e| alloc_failure(size, e))?;
            gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            let filter = if smooth { glow::LINEAR } else { glow::NEAREST } as i32;
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, filter);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, filter);
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                glow::CLAMP_TO_EDGE as i32,
            );
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                glow::CLAMP_TO_EDGE as i32,
            );
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA as i32,
                size.width as i32,
                size.height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(pixels),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
            if gl.get_error() == glow::OUT_OF_MEMORY {
                gl.delete_texture(tex);
                return Err(alloc_failure(size, "GL_OUT_OF_MEMORY"));
            }
            Ok(tex)
        }
    }
}

impl RenderContext for GlowContext {
    fn create_target(&self, size: Size, smooth: bool) -> Result<TargetTexture, OutputError> {
        let gl = &self.gl;
        let tex = self.alloc_texture(size, smooth, None)?;
        unsafe {
            let fbo = match gl.create_framebuffer() {
                Ok(f) => f,
                Err(e) => {
                    gl.delete_texture(tex);
                    return Err(alloc_failure(size, e));
                }
            };
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(tex),
                0,
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fbo);
                gl.delete_texture(tex);
                return Err(alloc_failure(
                    size,
                    format!("framebuffer incomplete: 0x{status:x}"),
                ));
            }
            Ok(TargetTexture {
                tex: tex.0.get(),
                fbo: fbo.0.get(),
                size,
            })
        }
    }

    fn resize_target(&self, target: &mut TargetTexture, size: Size) -> Result<(), OutputError> {
        let gl = &self.gl;
        let tex = native_texture(target.tex).ok_or_else(|| {
            alloc_failure(size, "resize of an invalid texture handle")
        })?;
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA as i32,
                size.width as i32,
                size.height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(None),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
            if gl.get_error() == glow::OUT_OF_MEMORY {
                return Err(alloc_failure(size, "GL_OUT_OF_MEMORY"));
            }
        }
        target.size = size;
        Ok(())
    }

    fn delete_target(&self, target: TargetTexture) {
        let gl = &self.gl;
        unsafe {
            if let Some(fbo) = native_framebuffer(target.fbo) {
                gl.delete_framebuffer(fbo);
            }
            if let Some(tex) = native_texture(target.tex) {
                gl.delete_texture(tex);
            }
        }
    }

    fn upload_bitmap(&self, bitmap: &Bitmap, smooth: bool) -> Result<TargetTexture, OutputError> {
        let size = bitmap.size();
        let tex = self.alloc_texture(size, smooth, Some(bitmap.pixels()))?;
        Ok(TargetTexture {
            tex: tex.0.get(),
            fbo: 0,
            size,
        })
    }

    fn read_pixels(&self, tex: u32, size: Size) -> Result<Vec<u8>, OutputError> {
        let gl = &self.gl;
        let tex = native_texture(tex).ok_or(OutputError::NoFrameAvailable)?;
        unsafe {
            // Transient read framebuffer; the texture's own FBO may be bound
            // for drawing elsewhere.
            let fbo = gl
                .create_framebuffer()
                .map_err(|e| alloc_failure(size, e))?;
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(
                glow::READ_FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(tex),
                0,
            );
            let mut pixels = vec![0u8; size.byte_len()];
            gl.read_pixels(
                0,
                0,
                size.width as i32,
                size.height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(pixels.as_mut_slice())),
            );
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
            gl.delete_framebuffer(fbo);
            Ok(pixels)
        }
    }
}

fn native_texture(id: u32) -> Option<glow::NativeTexture> {
    NonZeroU32::new(id).map(glow::NativeTexture)
}

fn native_framebuffer(id: u32) -> Option<glow::NativeFramebuffer> {
    NonZeroU32::new(id).map(glow::NativeFramebuffer)
}

fn alloc_failure(size: Size, reason: impl Into<String>) -> OutputError {
    OutputError::AllocationFailure {
        size,
        reason: reason.into(),
    }
}
