//! The producing node: output texture lifecycle, per-frame propagation,
//! still capture.
//!
//! An [`OutputNode`] owns exactly one offscreen target texture, allocated
//! lazily at the negotiated output size and reallocated only when that size
//! (or the filtering mode) changes. Per frame it runs the caller's render
//! closure into the target on the context thread, then hands
//! `(texture, size, ready)` to every registered consumer. Consumers borrow
//! the texture until the next pass overwrites it.
//!
//! All GL work — allocation, render, propagation, read-back — goes through
//! the node's [`GlThread`]; registry mutation and flag setters are plain
//! locked state and may run on any thread.

use std::sync::{Arc, Mutex, Weak};

use crate::bitmap::{Bitmap, Orientation};
use crate::context::{RenderContext, TargetTexture};
use crate::dispatch::GlThread;
use crate::error::OutputError;
use crate::geometry::{resolve_output_size, ForcedSize, Size};
use crate::registry::{same_target, SlotPolicy, TargetRegistry};
use crate::sink::FrameSink;
use crate::writer::MovieWriter;

struct AllocatedTarget {
    texture: TargetTexture,
    /// Size generation the texture was allocated under; a mismatch means the
    /// negotiated size may have changed and the allocation must be checked.
    generation: u64,
    smooth: bool,
}

struct NodeState {
    output: Option<AllocatedTarget>,
    input_size: Option<Size>,
    forced_size: Option<ForcedSize>,
    cached_output_size: Option<Size>,
    size_generation: u64,
    smooth_scale: bool,
    ignore_updates: bool,
    retain_full_resolution: bool,
}

impl NodeState {
    fn new() -> Self {
        NodeState {
            output: None,
            input_size: None,
            forced_size: None,
            cached_output_size: None,
            size_generation: 0,
            smooth_scale: false,
            ignore_updates: false,
            retain_full_resolution: false,
        }
    }

    fn resolved_output_size(&mut self) -> Size {
        if let Some(s) = self.cached_output_size {
            return s;
        }
        let input = self.input_size.unwrap_or(Size::new(0, 0));
        let s = resolve_output_size(input, self.forced_size);
        self.cached_output_size = Some(s);
        s
    }

    fn invalidate_size(&mut self) {
        self.cached_output_size = None;
        self.size_generation = self.size_generation.wrapping_add(1);
    }
}

/// Ensure the output texture exists at the currently negotiated size.
/// Resizes in place when only the dimensions changed, recreates when the
/// filtering mode changed, and leaves the node in its pre-allocation state
/// on failure.
fn ensure_output<C: RenderContext>(
    ctx: &C,
    st: &mut NodeState,
) -> Result<TargetTexture, OutputError> {
    let size = st.resolved_output_size();
    if size.is_empty() {
        return Err(OutputError::NoFrameAvailable);
    }
    let generation = st.size_generation;
    let smooth = st.smooth_scale;

    if let Some(alloc) = st.output.as_mut() {
        if alloc.generation == generation {
            return Ok(alloc.texture);
        }
        if alloc.smooth == smooth {
            if alloc.texture.size != size {
                ctx.resize_target(&mut alloc.texture, size)?;
            }
            alloc.generation = generation;
            return Ok(alloc.texture);
        }
        let old = st.output.take().expect("output present");
        ctx.delete_target(old.texture);
    }

    let texture = ctx.create_target(size, smooth)?;
    st.output = Some(AllocatedTarget {
        texture,
        generation,
        smooth,
    });
    Ok(texture)
}

/// A node that renders into an owned texture and distributes it downstream.
pub struct OutputNode<C: RenderContext> {
    gl: Arc<GlThread<C>>,
    targets: Arc<TargetRegistry<C>>,
    state: Arc<Mutex<NodeState>>,
    ignore: Arc<Mutex<Option<Weak<dyn FrameSink<C>>>>>,
    writer: Mutex<Option<Arc<MovieWriter>>>,
}

impl<C: RenderContext> OutputNode<C> {
    pub fn new(gl: Arc<GlThread<C>>) -> Self {
        OutputNode::with_slot_policy(gl, SlotPolicy::default())
    }

    pub fn with_slot_policy(gl: Arc<GlThread<C>>, policy: SlotPolicy) -> Self {
        OutputNode {
            gl,
            targets: Arc::new(TargetRegistry::new(policy)),
            state: Arc::new(Mutex::new(NodeState::new())),
            ignore: Arc::new(Mutex::new(None)),
            writer: Mutex::new(None),
        }
    }

    // ---- target management ----

    /// Attach a consumer; its input slot follows the registry's slot policy.
    /// Returns the assigned slot.
    pub fn add_target(&self, sink: &Arc<dyn FrameSink<C>>) -> Result<usize, OutputError> {
        self.targets.add(sink)
    }

    /// Attach a consumer feeding an explicit input slot.
    pub fn add_target_at_slot(
        &self,
        sink: &Arc<dyn FrameSink<C>>,
        slot: usize,
    ) -> Result<(), OutputError> {
        self.targets.add_at(sink, slot)
    }

    /// Detach a consumer. No-op if it was never attached. If the consumer was
    /// the ignore-for-updates target, that relation is cleared too.
    pub fn remove_target(&self, sink: &Arc<dyn FrameSink<C>>) {
        self.targets.remove(sink);
        let mut ignore = self.ignore.lock().expect("ignore lock");
        if let Some(current) = ignore.as_ref() {
            if same_target(current, &Arc::downgrade(sink)) {
                *ignore = None;
            }
        }
    }

    /// Detach every consumer. Owned resources are unaffected.
    pub fn remove_all_targets(&self) {
        self.targets.clear();
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Designate one consumer whose updates are suppressed while
    /// [`OutputNode::set_should_ignore_updates_to_this_target`] is set.
    pub fn set_target_to_ignore_for_updates(&self, sink: Option<&Arc<dyn FrameSink<C>>>) {
        *self.ignore.lock().expect("ignore lock") = sink.map(Arc::downgrade);
    }

    pub fn set_should_ignore_updates_to_this_target(&self, ignore: bool) {
        self.state.lock().expect("node state lock").ignore_updates = ignore;
    }

    // ---- size negotiation ----

    /// Record the natural size inferred from upstream.
    pub fn set_input_size(&self, size: Size) {
        let mut st = self.state.lock().expect("node state lock");
        if st.input_size != Some(size) {
            st.input_size = Some(size);
            st.invalidate_size();
        }
    }

    /// Override the output size verbatim (may distort). An empty size clears
    /// the override. Reallocation happens lazily on the next frame.
    pub fn force_processing_at_size(&self, size: Size) {
        self.set_forced(if size.is_empty() {
            None
        } else {
            Some(ForcedSize {
                size,
                respect_aspect: false,
            })
        });
    }

    /// Override the output size, scaling the natural size to fit within
    /// `size` while preserving its aspect ratio.
    pub fn force_processing_at_size_respecting_aspect_ratio(&self, size: Size) {
        self.set_forced(if size.is_empty() {
            None
        } else {
            Some(ForcedSize {
                size,
                respect_aspect: true,
            })
        });
    }

    /// Drop any forced size; the natural input size wins again.
    pub fn clear_forced_size(&self) {
        self.set_forced(None);
    }

    fn set_forced(&self, forced: Option<ForcedSize>) {
        let mut st = self.state.lock().expect("node state lock");
        if st.forced_size != forced {
            st.forced_size = forced;
            st.invalidate_size();
        }
    }

    /// The output size frames will be produced at, memoized until an input
    /// to the negotiation changes.
    pub fn resolved_output_size(&self) -> Size {
        self.state
            .lock()
            .expect("node state lock")
            .resolved_output_size()
    }

    pub fn set_should_smoothly_scale_output(&self, smooth: bool) {
        let mut st = self.state.lock().expect("node state lock");
        if st.smooth_scale != smooth {
            st.smooth_scale = smooth;
            st.invalidate_size();
        }
    }

    /// Hint that the next capture should be lossless: disables the smooth
    /// downscale optimization and marks full resolution as retained. A mode
    /// flag only — no GL work happens here.
    pub fn prepare_for_image_capture(&self) {
        let mut st = self.state.lock().expect("node state lock");
        st.retain_full_resolution = true;
        if st.smooth_scale {
            st.smooth_scale = false;
            st.invalidate_size();
        }
    }

    pub fn retains_full_resolution(&self) -> bool {
        self.state
            .lock()
            .expect("node state lock")
            .retain_full_resolution
    }

    // ---- texture lifecycle ----

    /// Allocate the output texture at the negotiated size if it does not
    /// already exist at that size. Idempotent. A no-op while the negotiated
    /// size is still empty (no upstream size and no absolute override).
    pub fn initialize_output_texture(&self) -> Result<(), OutputError> {
        let state = self.state.clone();
        self.gl.run_sync(move |ctx| {
            let mut st = state.lock().expect("node state lock");
            if st.resolved_output_size().is_empty() {
                return Ok(());
            }
            ensure_output(ctx, &mut st).map(|_| ())
        })?
    }

    /// Release the output texture. Safe to call repeatedly; a later frame
    /// reallocates lazily.
    pub fn delete_output_texture(&self) -> Result<(), OutputError> {
        let state = self.state.clone();
        self.gl.run_sync(move |ctx| {
            let mut st = state.lock().expect("node state lock");
            if let Some(alloc) = st.output.take() {
                ctx.delete_target(alloc.texture);
            }
        })
    }

    pub fn has_output_texture(&self) -> bool {
        self.state.lock().expect("node state lock").output.is_some()
    }

    // ---- frame production & propagation ----

    /// Produce one frame: resolve the output size, ensure the target texture,
    /// run `render` into it on the context thread, then hand the texture and
    /// size to every registered consumer in order.
    ///
    /// The consumer set notified is exactly the registry contents at the
    /// instant the pass begins; the designated ignore target is skipped while
    /// the ignore flag is set. A render or consumer error aborts the pass for
    /// the remaining targets. Returns the frame's resolved size.
    pub fn process_frame<F>(&self, render: F) -> Result<Size, OutputError>
    where
        F: FnOnce(&C, &TargetTexture) -> Result<(), OutputError> + Send + 'static,
    {
        let state = self.state.clone();
        let targets = self.targets.clone();
        let ignore = self.ignore.clone();
        self.gl.run_sync(move |ctx| {
            let (texture, ignore_updates) = {
                let mut st = state.lock().expect("node state lock");
                let texture = ensure_output(ctx, &mut st)?;
                (texture, st.ignore_updates)
            };
            render(ctx, &texture)?;

            let skip = ignore.lock().expect("ignore lock").clone();
            for edge in targets.snapshot() {
                let Some(sink) = edge.sink.upgrade() else {
                    continue;
                };
                if ignore_updates {
                    if let Some(skip) = &skip {
                        if same_target(skip, &edge.sink) {
                            continue;
                        }
                    }
                }
                sink.set_input_texture(texture.tex, edge.slot);
                sink.set_input_size(texture.size, edge.slot);
                sink.new_frame_ready(ctx)?;
            }
            Ok(texture.size)
        })?
    }

    // ---- still image capture ----

    /// Read the current output texture back into a bitmap. Fails with
    /// `NoFrameAvailable` before the first frame or after
    /// [`OutputNode::delete_output_texture`].
    pub fn image_from_current_output(&self) -> Result<Bitmap, OutputError> {
        self.image_from_current_output_with_orientation(Orientation::Up)
    }

    /// Like [`OutputNode::image_from_current_output`], applying `orientation`
    /// as a pure transform on the read-back pixels.
    pub fn image_from_current_output_with_orientation(
        &self,
        orientation: Orientation,
    ) -> Result<Bitmap, OutputError> {
        let state = self.state.clone();
        let bitmap = self.gl.run_sync(move |ctx| {
            let st = state.lock().expect("node state lock");
            let alloc = st.output.as_ref().ok_or(OutputError::NoFrameAvailable)?;
            let pixels = ctx.read_pixels(alloc.texture.tex, alloc.texture.size)?;
            Ok(Bitmap::from_rgba(alloc.texture.size, pixels))
        })??;
        Ok(bitmap.oriented(orientation))
    }

    /// One-shot convenience: push a single externally supplied image through
    /// this node synchronously and return the filtered bitmap. Uses the
    /// node's forced-size settings but touches neither the live output
    /// texture nor the target registry.
    pub fn filter_image<F>(&self, input: Bitmap, render: F) -> Result<Bitmap, OutputError>
    where
        F: FnOnce(&C, &TargetTexture, &TargetTexture) -> Result<(), OutputError> + Send + 'static,
    {
        let state = self.state.clone();
        self.gl.run_sync(move |ctx| {
            let (forced, smooth) = {
                let st = state.lock().expect("node state lock");
                (st.forced_size, st.smooth_scale)
            };
            let out_size = resolve_output_size(input.size(), forced);
            if out_size.is_empty() {
                return Err(OutputError::NoFrameAvailable);
            }

            let source = ctx.upload_bitmap(&input, smooth)?;
            let dest = match ctx.create_target(out_size, smooth) {
                Ok(d) => d,
                Err(e) => {
                    ctx.delete_target(source);
                    return Err(e);
                }
            };
            let result = render(ctx, &source, &dest)
                .and_then(|()| ctx.read_pixels(dest.tex, out_size));
            ctx.delete_target(source);
            ctx.delete_target(dest);
            result.map(|pixels| Bitmap::from_rgba(out_size, pixels))
        })?
    }

    // ---- collaborators ----

    /// Hold a shared reference to a movie writer collaborator. The node only
    /// holds and releases the handle; add the writer as a target to feed it
    /// frames.
    pub fn set_movie_writer(&self, writer: Option<Arc<MovieWriter>>) {
        *self.writer.lock().expect("writer lock") = writer;
    }

    pub fn movie_writer(&self) -> Option<Arc<MovieWriter>> {
        self.writer.lock().expect("writer lock").clone()
    }
}

impl<C: RenderContext> Drop for OutputNode<C> {
    fn drop(&mut self) {
        // Best-effort: the texture lives on the context thread, release it
        // there without blocking teardown.
        let taken = self
            .state
            .lock()
            .ok()
            .and_then(|mut st| st.output.take());
        if let Some(alloc) = taken {
            self.gl.run_detached(move |ctx| ctx.delete_target(alloc.texture));
        }
    }
}
