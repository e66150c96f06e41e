//! framecast — the output stage of a GL image/video processing pipeline.
//!
//! A producing node renders into an offscreen texture and hands that texture
//! to any number of downstream consumers: filters, preview sinks, movie
//! writers. framecast covers the plumbing every such node needs:
//!
//! - [`TargetRegistry`]: the ordered fan-out edges from a producer to its
//!   consumers, safe to mutate while frames are in flight.
//! - Size negotiation ([`resolve_output_size`]): natural upstream size vs an
//!   optional forced override, absolute or aspect-preserving.
//! - [`GlThread`]: the single choke point for GL access. The context lives on
//!   one thread; work submitted from elsewhere blocks until it has run there,
//!   work submitted from that thread itself runs in place (no self-deadlock).
//! - [`OutputNode`]: composes the above, owns the output texture, drives
//!   per-frame propagation and synchronous still capture.
//! - [`MovieWriter`]: a ready-made consumer that pipes frames to FFmpeg.
//!
//! Shader programs, window/context creation and codec internals stay outside:
//! the caller builds the GL context inside the [`GlThread`] factory closure
//! and renders through the closure passed to [`OutputNode::process_frame`].
//!
//! The [`SoftwareContext`] backend runs the whole pipeline without a GPU:
//!
//! ```
//! use framecast::{GlThread, OutputNode, Size, SoftwareContext};
//!
//! let gl = GlThread::spawn(|| Ok(SoftwareContext::new())).unwrap();
//! let node = OutputNode::new(gl);
//! node.set_input_size(Size::new(640, 480));
//! node.force_processing_at_size_respecting_aspect_ratio(Size::new(320, 320));
//!
//! let size = node.process_frame(|_ctx, _target| Ok(())).unwrap();
//! assert_eq!(size, Size::new(320, 240));
//! ```

pub mod bitmap;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod gl;
pub mod logging;
pub mod output;
pub mod registry;
pub mod sink;
pub mod software;
pub mod writer;

pub use bitmap::{Bitmap, Orientation};
pub use config::{load_output_config, ForcedSizeCfg, OutputConfig};
pub use context::{RenderContext, TargetTexture};
pub use dispatch::GlThread;
pub use error::OutputError;
pub use geometry::{resolve_output_size, ForcedSize, Size};
pub use gl::GlowContext;
pub use output::OutputNode;
pub use registry::{SlotPolicy, TargetRegistry};
pub use sink::FrameSink;
pub use software::SoftwareContext;
pub use writer::{Codec, Container, MovieWriter, WriterConfig};
