//! CPU-backed render context.
//!
//! Textures are plain RGBA buffers in a map, so the whole output stage runs
//! headless: tests, CI, and tools that only shuffle pixels around. Supports
//! allocation-failure injection for exercising the error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::bitmap::Bitmap;
use crate::context::{RenderContext, TargetTexture};
use crate::error::OutputError;
use crate::geometry::Size;

struct SoftTexture {
    size: Size,
    pixels: Vec<u8>,
}

#[derive(Default)]
struct SoftState {
    next_id: u32,
    textures: HashMap<u32, SoftTexture>,
}

/// Software implementation of [`RenderContext`].
pub struct SoftwareContext {
    state: Mutex<SoftState>,
    fail_allocations: AtomicBool,
    allocations: AtomicU64,
}

impl SoftwareContext {
    pub fn new() -> Self {
        SoftwareContext {
            state: Mutex::new(SoftState::default()),
            fail_allocations: AtomicBool::new(false),
            allocations: AtomicU64::new(0),
        }
    }

    /// Make subsequent allocations fail, mimicking GL running out of memory.
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Relaxed);
    }

    /// How many textures have been allocated over this context's lifetime.
    pub fn allocation_count(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// How many textures are currently alive (leak checking).
    pub fn live_textures(&self) -> usize {
        self.state.lock().unwrap().textures.len()
    }

    /// Overwrite a texture's pixels — the software stand-in for a render
    /// pass. Returns false if the texture id is unknown or the buffer length
    /// does not match.
    pub fn write_pixels(&self, tex: u32, pixels: &[u8]) -> bool {
        let mut st = self.state.lock().unwrap();
        match st.textures.get_mut(&tex) {
            Some(t) if pixels.len() == t.size.byte_len() => {
                t.pixels.copy_from_slice(pixels);
                true
            }
            _ => false,
        }
    }

    fn allocate(&self, size: Size, pixels: Vec<u8>) -> Result<u32, OutputError> {
        if self.fail_allocations.load(Ordering::Relaxed) {
            return Err(OutputError::AllocationFailure {
                size,
                reason: "allocation failure injected".to_string(),
            });
        }
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let id = st.next_id;
        st.textures.insert(id, SoftTexture { size, pixels });
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }
}

impl Default for SoftwareContext {
    fn default() -> Self {
        SoftwareContext::new()
    }
}

impl RenderContext for SoftwareContext {
    fn create_target(&self, size: Size, _smooth: bool) -> Result<TargetTexture, OutputError> {
        let tex = self.allocate(size, vec![0u8; size.byte_len()])?;
        // No separate framebuffer object in software; reuse the texture id.
        Ok(TargetTexture { tex, fbo: tex, size })
    }

    fn resize_target(&self, target: &mut TargetTexture, size: Size) -> Result<(), OutputError> {
        let mut st = self.state.lock().unwrap();
        let t = st
            .textures
            .get_mut(&target.tex)
            .ok_or(OutputError::NoFrameAvailable)?;
        t.size = size;
        t.pixels = vec![0u8; size.byte_len()];
        target.size = size;
        Ok(())
    }

    fn delete_target(&self, target: TargetTexture) {
        self.state.lock().unwrap().textures.remove(&target.tex);
    }

    fn upload_bitmap(&self, bitmap: &Bitmap, _smooth: bool) -> Result<TargetTexture, OutputError> {
        let size = bitmap.size();
        let tex = self.allocate(size, bitmap.pixels().to_vec())?;
        Ok(TargetTexture { tex, fbo: 0, size })
    }

    fn read_pixels(&self, tex: u32, size: Size) -> Result<Vec<u8>, OutputError> {
        let st = self.state.lock().unwrap();
        let t = st.textures.get(&tex).ok_or(OutputError::NoFrameAvailable)?;
        if t.size != size {
            return Err(OutputError::NoFrameAvailable);
        }
        Ok(t.pixels.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_read_roundtrip() {
        let ctx = SoftwareContext::new();
        let t = ctx.create_target(Size::new(2, 2), false).unwrap();
        assert!(ctx.write_pixels(t.tex, &[7u8; 16]));
        assert_eq!(ctx.read_pixels(t.tex, t.size).unwrap(), vec![7u8; 16]);
    }

    #[test]
    fn delete_frees_texture() {
        let ctx = SoftwareContext::new();
        let t = ctx.create_target(Size::new(4, 4), false).unwrap();
        assert_eq!(ctx.live_textures(), 1);
        ctx.delete_target(t);
        assert_eq!(ctx.live_textures(), 0);
        assert!(ctx.read_pixels(t.tex, t.size).is_err());
    }

    #[test]
    fn injected_failure_surfaces_as_allocation_error() {
        let ctx = SoftwareContext::new();
        ctx.set_fail_allocations(true);
        match ctx.create_target(Size::new(8, 8), false) {
            Err(OutputError::AllocationFailure { size, .. }) => {
                assert_eq!(size, Size::new(8, 8));
            }
            other => panic!("expected AllocationFailure, got {other:?}"),
        }
        assert_eq!(ctx.allocation_count(), 0);
    }

    #[test]
    fn resize_reallocates_storage() {
        let ctx = SoftwareContext::new();
        let mut t = ctx.create_target(Size::new(2, 2), false).unwrap();
        assert!(ctx.write_pixels(t.tex, &[9u8; 16]));
        ctx.resize_target(&mut t, Size::new(1, 1)).unwrap();
        assert_eq!(t.size, Size::new(1, 1));
        // Storage is fresh after resize.
        assert_eq!(ctx.read_pixels(t.tex, t.size).unwrap(), vec![0u8; 4]);
    }
}
