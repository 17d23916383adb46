/// Pipeline configuration loaded from defaults, a JSON file, or CLI flags
use crate::error::PipelineError;
use constants::texture::{ATLAS_HEIGHT, ATLAS_WIDTH, CELL_HEIGHT, CELL_WIDTH, FALLBACK_COLOUR};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How many atlases to plan for a given record count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AtlasCountPolicy {
    /// `ceil(records / cells_per_atlas)`.
    #[default]
    Exact,
    /// `records / cells_per_atlas + 1`, one blank trailing atlas at exact multiples.
    Faithful,
}

/// Configuration parameters for one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Atlas texture width in pixels.
    pub atlas_width: u32,
    /// Atlas texture height in pixels.
    pub atlas_height: u32,
    /// Thumbnail cell width in pixels.
    pub cell_width: u32,
    /// Thumbnail cell height in pixels.
    pub cell_height: u32,
    /// Prepended to every non-empty manifest source before resolution.
    pub prefix: Option<String>,
    /// Directory relative local paths resolve against (working directory when unset).
    pub base_dir: Option<PathBuf>,
    /// Atlas count planning policy.
    pub atlas_count_policy: AtlasCountPolicy,
    /// Acquisition workers. One keeps everything on the calling thread.
    pub workers: usize,
    /// Records dispatched per parallel window.
    pub queue_depth: usize,
    /// Per-request timeout for remote sources.
    pub http_timeout_secs: u64,
    /// Colour painted into cells whose image could not be acquired.
    pub fallback_colour: [u8; 3],
    /// Draw a progress bar while processing records.
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            atlas_width: ATLAS_WIDTH,
            atlas_height: ATLAS_HEIGHT,
            cell_width: CELL_WIDTH,
            cell_height: CELL_HEIGHT,
            prefix: None,
            base_dir: None,
            atlas_count_policy: AtlasCountPolicy::Exact,
            workers: 1,
            queue_depth: 64,
            http_timeout_secs: 30,
            fallback_colour: FALLBACK_COLOUR,
            show_progress: false,
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    /// Rejects values that make the run meaningless before any work starts.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.queue_depth == 0 {
            return Err(PipelineError::InvalidConfig(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective worker count; zero is treated as one.
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }
}
