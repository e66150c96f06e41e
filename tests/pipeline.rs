//! End-to-end pipeline behavior against the software backend: size
//! negotiation, fan-out, selective suppression, still capture, and the
//! one-shot filter path — everything a real producer node exercises per
//! frame, minus the GPU.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use framecast::{
    Bitmap, FrameSink, GlThread, OutputError, OutputNode, RenderContext, Size, SoftwareContext,
};

struct RecordingSink {
    frames: AtomicUsize,
    last_size: Mutex<Option<Size>>,
    last_slot: Mutex<Option<usize>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(RecordingSink {
            frames: AtomicUsize::new(0),
            last_size: Mutex::new(None),
            last_slot: Mutex::new(None),
        })
    }

    fn frames(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }
}

impl FrameSink<SoftwareContext> for RecordingSink {
    fn set_input_texture(&self, _tex: u32, slot: usize) {
        *self.last_slot.lock().unwrap() = Some(slot);
    }

    fn set_input_size(&self, size: Size, _slot: usize) {
        *self.last_size.lock().unwrap() = Some(size);
    }

    fn new_frame_ready(&self, _ctx: &SoftwareContext) -> Result<(), OutputError> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn as_sink(s: &Arc<RecordingSink>) -> Arc<dyn FrameSink<SoftwareContext>> {
    s.clone()
}

fn spawn_node() -> (Arc<GlThread<SoftwareContext>>, OutputNode<SoftwareContext>) {
    let gl = GlThread::spawn(|| Ok(SoftwareContext::new())).unwrap();
    let node = OutputNode::new(gl.clone());
    (gl, node)
}

fn clear(
    value: u8,
) -> impl FnOnce(&SoftwareContext, &framecast::TargetTexture) -> Result<(), OutputError> {
    move |ctx, target| {
        let pixels = vec![value; target.size.width as usize * target.size.height as usize * 4];
        assert!(ctx.write_pixels(target.tex, &pixels));
        Ok(())
    }
}

#[test]
fn forced_aspect_size_flows_through_to_consumers_and_capture() {
    let (_gl, node) = spawn_node();
    node.set_input_size(Size::new(640, 480));
    node.force_processing_at_size_respecting_aspect_ratio(Size::new(320, 320));

    let preview = RecordingSink::new();
    let encoder = RecordingSink::new();
    node.add_target(&as_sink(&preview)).unwrap();
    node.add_target(&as_sink(&encoder)).unwrap();

    let size = node.process_frame(clear(128)).unwrap();
    assert_eq!(size, Size::new(320, 240));
    assert_eq!(preview.frames(), 1);
    assert_eq!(encoder.frames(), 1);
    assert_eq!(*preview.last_size.lock().unwrap(), Some(Size::new(320, 240)));

    let still = node.image_from_current_output().unwrap();
    assert_eq!(still.size(), Size::new(320, 240));
    assert_eq!(still.pixel(100, 100), [128, 128, 128, 128]);
}

#[test]
fn suppressed_preview_misses_frames_until_reenabled() {
    let (_gl, node) = spawn_node();
    node.set_input_size(Size::new(16, 16));

    let preview = RecordingSink::new();
    let encoder = RecordingSink::new();
    node.add_target(&as_sink(&preview)).unwrap();
    node.add_target(&as_sink(&encoder)).unwrap();

    node.set_target_to_ignore_for_updates(Some(&as_sink(&preview)));
    node.set_should_ignore_updates_to_this_target(true);
    node.process_frame(clear(1)).unwrap();
    node.process_frame(clear(2)).unwrap();

    node.set_should_ignore_updates_to_this_target(false);
    node.process_frame(clear(3)).unwrap();

    assert_eq!(encoder.frames(), 3);
    assert_eq!(preview.frames(), 1);
}

#[test]
fn consumers_added_mid_stream_only_see_later_frames() {
    let (_gl, node) = spawn_node();
    node.set_input_size(Size::new(8, 8));

    let early = RecordingSink::new();
    node.add_target(&as_sink(&early)).unwrap();
    node.process_frame(clear(1)).unwrap();

    let late = RecordingSink::new();
    node.add_target(&as_sink(&late)).unwrap();
    node.process_frame(clear(2)).unwrap();

    node.remove_target(&as_sink(&early));
    node.process_frame(clear(3)).unwrap();

    assert_eq!(early.frames(), 2);
    assert_eq!(late.frames(), 2);
}

#[test]
fn capture_after_texture_release_reports_no_frame() {
    let (_gl, node) = spawn_node();
    node.set_input_size(Size::new(4, 4));
    node.process_frame(clear(7)).unwrap();
    assert!(node.has_output_texture());

    node.delete_output_texture().unwrap();
    assert!(matches!(
        node.image_from_current_output(),
        Err(OutputError::NoFrameAvailable)
    ));

    // The next frame reallocates lazily and capture works again.
    node.process_frame(clear(9)).unwrap();
    assert_eq!(node.image_from_current_output().unwrap().pixel(0, 0), [9; 4]);
}

#[test]
fn slot_assignment_reaches_the_consumer() {
    let (_gl, node) = spawn_node();
    node.set_input_size(Size::new(4, 4));

    let blend_b_input = RecordingSink::new();
    node.add_target_at_slot(&as_sink(&blend_b_input), 1).unwrap();
    node.process_frame(clear(1)).unwrap();

    assert_eq!(*blend_b_input.last_slot.lock().unwrap(), Some(1));
}

#[test]
fn nested_gl_dispatch_inside_a_render_closure_does_not_deadlock() {
    let (gl, node) = spawn_node();
    node.set_input_size(Size::new(4, 4));

    let inner_gl = gl.clone();
    node.process_frame(move |ctx, target| {
        // A consumer-style read-back issued from within the pass.
        let nested = inner_gl
            .run_sync(|_| ())
            .map(|()| ctx.read_pixels(target.tex, target.size));
        assert!(matches!(nested, Ok(Ok(_))));
        Ok(())
    })
    .unwrap();
}

#[test]
fn one_shot_filtering_respects_the_forced_size() {
    let (_gl, node) = spawn_node();
    node.force_processing_at_size_respecting_aspect_ratio(Size::new(50, 25));

    let input = Bitmap::solid(Size::new(100, 100), [10, 20, 30, 255]);
    let out = node
        .filter_image(input, |ctx, _source, dest| {
            let pixels = vec![200u8; dest.size.width as usize * dest.size.height as usize * 4];
            assert!(ctx.write_pixels(dest.tex, &pixels));
            Ok(())
        })
        .unwrap();

    assert_eq!(out.size(), Size::new(25, 25));
    assert_eq!(out.pixel(12, 12), [200; 4]);
}
