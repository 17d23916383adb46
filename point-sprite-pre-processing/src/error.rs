/// Error types for manifest ingestion and atlas generation
use std::path::PathBuf;
use thiserror::Error;

/// Fatal pipeline errors. Any of these aborts the run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cell {cell_width}x{cell_height} does not evenly divide atlas {atlas_width}x{atlas_height}")]
    NonDivisorCell {
        atlas_width: u32,
        atlas_height: u32,
        cell_width: u32,
        cell_height: u32,
    },

    #[error("atlas and cell dimensions must be positive (atlas {atlas_width}x{atlas_height}, cell {cell_width}x{cell_height})")]
    ZeroDimension {
        atlas_width: u32,
        atlas_height: u32,
        cell_width: u32,
        cell_height: u32,
    },

    #[error("atlas {atlas_width}x{atlas_height} with cell {cell_width}x{cell_height} exceeds grid limits: {reason}")]
    OversizedGrid {
        atlas_width: u32,
        atlas_height: u32,
        cell_width: u32,
        cell_height: u32,
        reason: &'static str,
    },

    #[error("cannot read manifest {}: {source}", .path.display())]
    UnreadableManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest read failed after {records_read} of {record_count} records: {source}")]
    ManifestRead {
        records_read: u64,
        record_count: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("vertex buffer holds {capacity} records but record {attempted} was produced")]
    CapacityExceeded { capacity: u64, attempted: u64 },

    #[error("texture sink rejected atlas {atlas}: {source}")]
    Sink {
        atlas: u64,
        #[source]
        source: SinkError,
    },

    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot initialise HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl PipelineError {
    /// True for errors raised before any record was processed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::NonDivisorCell { .. }
                | PipelineError::ZeroDimension { .. }
                | PipelineError::OversizedGrid { .. }
                | PipelineError::UnreadableManifest { .. }
                | PipelineError::InvalidConfig(_)
                | PipelineError::HttpClient(_)
        )
    }
}

/// Per-record acquisition failure. Recovered by painting a fallback cell.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {source_name}: {source}")]
    Decode {
        source_name: String,
        #[source]
        source: image::ImageError,
    },

    #[error("request for {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("request for {url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("response from {url} exceeds the {limit} byte body limit")]
    BodyTooLarge { url: String, limit: u64 },

    #[error("{source_name} decoded to an empty image")]
    EmptyImage { source_name: String },
}

impl From<reqwest::Error> for AcquireError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        match e.status() {
            Some(status) => AcquireError::HttpStatus {
                url,
                status: status.as_u16(),
            },
            None => AcquireError::Http {
                url,
                message: e.to_string(),
            },
        }
    }
}

/// Failure of an atlas sink to accept a finalised atlas.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DDS error: {0}")]
    Dds(#[from] ddsfile::Error),

    #[error("image encode error: {0}")]
    Image(#[from] image::ImageError),
}
