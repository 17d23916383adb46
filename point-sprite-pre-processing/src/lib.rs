/// Point manifest ingestion into thumbnail atlases and a point-sprite vertex buffer
pub mod acquire;
pub mod atlas;
pub mod config;
pub mod dds_writer;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod pipeline;
pub mod scene_manifest;
pub mod sink;
pub mod thumbnail;
pub mod vertex;

#[cfg(test)]
mod test_support;

pub use config::{AtlasCountPolicy, PipelineConfig};
pub use error::{AcquireError, PipelineError, SinkError};
pub use pipeline::{ingest_manifest, AtlasPipeline, IngestOutput, PipelineReport, PipelineState};
