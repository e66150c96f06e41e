use std::fmt;

use crate::geometry::Size;

/// Errors surfaced by the output stage.
///
/// Registry mutation errors are reported synchronously and never corrupt
/// existing state. GL errors during a propagation pass abort the pass for the
/// remaining targets rather than delivering a partially-updated frame set.
#[derive(Debug)]
pub enum OutputError {
    /// A consumer handed to the registry was invalid: already registered at
    /// that slot, or dead before the edge could be created.
    InvalidTarget { reason: String },
    /// Capture requested before the first frame was rendered (or after
    /// `delete_output_texture`). Non-fatal.
    NoFrameAvailable,
    /// The context thread is gone, failed to start, or its queue is closed.
    ContextUnavailable,
    /// GL texture/framebuffer creation failed. The node stays in its
    /// pre-allocation state; the caller may retry at a smaller size.
    AllocationFailure { size: Size, reason: String },
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::InvalidTarget { reason } => {
                write!(f, "Invalid target: {reason}")
            }
            OutputError::NoFrameAvailable => {
                write!(f, "No frame has been rendered into the output texture yet")
            }
            OutputError::ContextUnavailable => {
                write!(f, "GL context thread is not available")
            }
            OutputError::AllocationFailure { size, reason } => {
                write!(f, "Failed to allocate {size} output target: {reason}")
            }
        }
    }
}

impl std::error::Error for OutputError {}
