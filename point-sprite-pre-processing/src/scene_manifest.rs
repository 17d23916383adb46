/// Scene manifest generation linking atlases, vertices and draw batches.
use crate::layout::{AtlasLayout, DrawBatch};
use crate::pipeline::PipelineReport;
use crate::sink::AtlasFormat;
use crate::vertex::{vertex_bytes, VertexRecord};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Everything a renderer needs to draw the ingested point sprites.
#[derive(Debug, Serialize, Deserialize)]
pub struct SceneManifest {
    /// Grid geometry shared by every atlas.
    pub layout: AtlasLayout,
    /// Atlas texture files and their container format.
    pub atlases: AtlasFiles,
    /// Vertex buffer file and its record layout.
    pub vertices: VertexFile,
    /// One draw call per atlas, in atlas order.
    pub draw_batches: Vec<DrawBatch>,
    /// Counters from the ingestion run.
    pub report: PipelineReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AtlasFiles {
    pub format: AtlasFormat,
    /// Paths relative to the manifest directory, in atlas order.
    pub files: Vec<String>,
}

/// Raw `vec4` records: x, y, z, slot.
#[derive(Debug, Serialize, Deserialize)]
pub struct VertexFile {
    pub file: String,
    pub count: u64,
    pub stride: usize,
}

/// Writes `vertices.bin` and `manifest.json` into an output directory.
pub struct ManifestGenerator {
    output_dir: PathBuf,
}

impl ManifestGenerator {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Writes the vertex buffer and the manifest describing it.
    pub fn write_scene(
        &self,
        layout: AtlasLayout,
        atlases: AtlasFiles,
        vertices: &[VertexRecord],
        report: PipelineReport,
    ) -> Result<SceneManifest, Box<dyn std::error::Error>> {
        fs::create_dir_all(&self.output_dir)?;

        let vertex_file = "vertices.bin".to_string();
        fs::write(self.output_dir.join(&vertex_file), vertex_bytes(vertices))?;

        let manifest = SceneManifest {
            layout,
            atlases,
            vertices: VertexFile {
                file: vertex_file,
                count: vertices.len() as u64,
                stride: std::mem::size_of::<VertexRecord>(),
            },
            draw_batches: layout.draw_batches(),
            report,
        };

        let manifest_path = self.output_dir.join("manifest.json");
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

        info!("Generated scene manifest: {}", manifest_path.display());
        log_manifest_summary(&manifest);
        Ok(manifest)
    }
}

fn log_manifest_summary(manifest: &SceneManifest) {
    info!("Manifest Summary:");
    info!("  Points: {}", manifest.vertices.count);
    info!(
        "  Atlases: {} x {}x{} ({:?})",
        manifest.atlases.files.len(),
        manifest.layout.atlas_width,
        manifest.layout.atlas_height,
        manifest.atlases.format
    );
    info!("  Draw batches: {}", manifest.draw_batches.len());
    if manifest.report.fallback_cells > 0 {
        info!("  Fallback cells: {}", manifest.report.fallback_cells);
    }
}
