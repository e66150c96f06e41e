//! Output-stage configuration.
//!
//! Loading is lenient: a missing file means defaults, a malformed file is
//! logged and means defaults. Unknown keys are ignored so configs survive
//! version skew.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::context::RenderContext;
use crate::dispatch::GlThread;
use crate::geometry::{ForcedSize, Size};
use crate::logw;
use crate::output::OutputNode;
use crate::registry::SlotPolicy;
use crate::writer::WriterConfig;
use std::sync::Arc;

/// Forced-size override as written in config.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ForcedSizeCfg {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub respect_aspect: bool,
}

impl ForcedSizeCfg {
    pub fn to_forced_size(self) -> ForcedSize {
        ForcedSize {
            size: Size::new(self.width, self.height),
            respect_aspect: self.respect_aspect,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub smooth_scale: bool,
    #[serde(default)]
    pub forced_size: Option<ForcedSizeCfg>,
    #[serde(default)]
    pub slot_policy: SlotPolicy,
    #[serde(default)]
    pub writer: WriterConfig,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            smooth_scale: false,
            forced_size: None,
            slot_policy: SlotPolicy::default(),
            writer: WriterConfig::default(),
        }
    }
}

impl OutputConfig {
    /// Build a node configured per this config (slot policy, smooth scale,
    /// forced size). The writer section is not instantiated here; pass it to
    /// [`crate::writer::MovieWriter::new`] when capture is wanted.
    pub fn build_node<C: RenderContext>(&self, gl: Arc<GlThread<C>>) -> OutputNode<C> {
        let node = OutputNode::with_slot_policy(gl, self.slot_policy);
        node.set_should_smoothly_scale_output(self.smooth_scale);
        if let Some(forced) = self.forced_size {
            let f = forced.to_forced_size();
            if f.respect_aspect {
                node.force_processing_at_size_respecting_aspect_ratio(f.size);
            } else {
                node.force_processing_at_size(f.size);
            }
        }
        node
    }
}

/// Read `path` as JSON. Any failure falls back to defaults so a bad config
/// never takes the pipeline down.
pub fn load_output_config(path: &Path) -> OutputConfig {
    let data = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return OutputConfig::default(),
    };
    match serde_json::from_str(&data) {
        Ok(cfg) => cfg,
        Err(e) => {
            logw!(
                "CONFIG",
                "failed to parse {}: {e}; using defaults",
                path.display()
            );
            OutputConfig::default()
        }
    }
}
