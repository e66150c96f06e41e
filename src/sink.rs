//! Consumer capability.
//!
//! Anything downstream of an output node — a filter, a preview, a movie
//! writer — implements [`FrameSink`]. The producer calls the three methods
//! once per propagation pass, on the context thread; the sink decides how
//! and when to render relative to those calls.

use crate::error::OutputError;
use crate::geometry::Size;

/// A downstream consumer of a producer's output texture.
///
/// `C` is the render context type the pipeline runs against; sinks that do
/// GL work (read-back, their own render pass) do it through the `ctx`
/// handed to [`FrameSink::new_frame_ready`].
pub trait FrameSink<C>: Send + Sync {
    /// Receive the producer's output texture for input `slot`. The texture
    /// is borrowed: it is only valid until the next propagation pass
    /// overwrites it, so consume or copy before then.
    fn set_input_texture(&self, tex: u32, slot: usize);

    /// Receive the frame size for input `slot`.
    fn set_input_size(&self, size: Size, slot: usize);

    /// All inputs for this frame are in place. Runs on the context thread.
    /// An error aborts the remainder of the propagation pass.
    fn new_frame_ready(&self, ctx: &C) -> Result<(), OutputError>;

    /// How many producers already feed this sink. Used for default slot
    /// assignment when a target is added without an explicit slot.
    fn next_input_slot(&self) -> usize {
        0
    }
}
