/// Image acquisition from local files or remote URLs
use crate::error::{AcquireError, PipelineError};
use constants::manifest::{MAX_REMOTE_BODY_BYTES, REMOTE_PREFIXES};
use image::io::Reader as ImageReader;
use image::{DynamicImage, ImageError, RgbImage};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a resolved source string is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    Local(&'a str),
    Remote(&'a str),
}

impl<'a> ImageSource<'a> {
    /// Literal prefix test: `http://` and `https://` go to the network,
    /// everything else is a filesystem path.
    pub fn classify(source: &'a str) -> Self {
        if REMOTE_PREFIXES.iter().any(|p| source.starts_with(p)) {
            ImageSource::Remote(source)
        } else {
            ImageSource::Local(source)
        }
    }
}

/// Blocking fetch of a remote resource into a caller-owned buffer.
pub trait RemoteFetch: Sync {
    /// Appends the response body to `buf`. Non-2xx responses are errors.
    fn fetch_into(&self, url: &str, buf: &mut Vec<u8>) -> Result<(), AcquireError>;
}

/// `reqwest` blocking client shared by all workers.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PipelineError::HttpClient)?;
        Ok(Self { client })
    }

    /// Wraps an already configured client.
    pub fn from_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl RemoteFetch for HttpFetcher {
    fn fetch_into(&self, url: &str, buf: &mut Vec<u8>) -> Result<(), AcquireError> {
        let response = self.client.get(url).send()?.error_for_status()?;
        let too_large = || AcquireError::BodyTooLarge {
            url: url.to_string(),
            limit: MAX_REMOTE_BODY_BYTES,
        };

        // Content-Length is only a hint; the read below enforces the limit.
        if let Some(len) = response.content_length() {
            if len > MAX_REMOTE_BODY_BYTES {
                return Err(too_large());
            }
            buf.try_reserve(len as usize).map_err(|_| too_large())?;
        }

        let start = buf.len();
        response
            .take(MAX_REMOTE_BODY_BYTES + 1)
            .read_to_end(buf)
            .map_err(|e| AcquireError::Http {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if (buf.len() - start) as u64 > MAX_REMOTE_BODY_BYTES {
            return Err(too_large());
        }
        Ok(())
    }
}

/// Growable byte buffer reused across remote fetches.
/// Cleared between fetches, never shrunk.
#[derive(Debug, Default)]
pub struct TransferBuffer {
    bytes: Vec<u8>,
    peak_capacity: usize,
}

impl TransferBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current allocation in bytes.
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    /// Largest allocation reached so far.
    pub fn peak_capacity(&self) -> usize {
        self.peak_capacity
    }

    fn begin(&mut self) -> &mut Vec<u8> {
        self.bytes.clear();
        &mut self.bytes
    }

    fn finish(&mut self) -> &[u8] {
        self.peak_capacity = self.peak_capacity.max(self.bytes.capacity());
        &self.bytes
    }
}

/// Decoded RGB image plus the transfer cost of getting it.
#[derive(Debug)]
pub struct AcquiredImage {
    pub pixels: RgbImage,
    /// Body size for remote sources, `None` for local files.
    pub fetched_bytes: Option<u64>,
}

/// Resolves a source string to decoded RGB pixels.
pub struct ImageAcquirer<F> {
    fetcher: F,
    base_dir: Option<PathBuf>,
}

impl<F: RemoteFetch> ImageAcquirer<F> {
    pub fn new(fetcher: F, base_dir: Option<PathBuf>) -> Self {
        Self { fetcher, base_dir }
    }

    /// Loads and decodes one image. Every failure is a recoverable `AcquireError`.
    pub fn acquire(
        &self,
        source: &str,
        transfer: &mut TransferBuffer,
    ) -> Result<AcquiredImage, AcquireError> {
        let (image, fetched_bytes) = match ImageSource::classify(source) {
            ImageSource::Local(path) => (self.load_local(path)?, None),
            ImageSource::Remote(url) => {
                self.fetcher.fetch_into(url, transfer.begin())?;
                let body = transfer.finish();
                let image = image::load_from_memory(body).map_err(|e| AcquireError::Decode {
                    source_name: url.to_string(),
                    source: e,
                })?;
                (image, Some(body.len() as u64))
            }
        };

        if image.width() == 0 || image.height() == 0 {
            return Err(AcquireError::EmptyImage {
                source_name: source.to_string(),
            });
        }

        Ok(AcquiredImage {
            pixels: image.to_rgb8(),
            fetched_bytes,
        })
    }

    /// Decodes a local file, detecting the format from its content rather
    /// than its extension.
    fn load_local(&self, path: &str) -> Result<DynamicImage, AcquireError> {
        let resolved = self.resolve_local(path);
        let io_error = |source| AcquireError::Io {
            path: resolved.display().to_string(),
            source,
        };

        let reader = ImageReader::open(&resolved)
            .map_err(io_error)?
            .with_guessed_format()
            .map_err(io_error)?;

        reader.decode().map_err(|e| match e {
            ImageError::IoError(source) => io_error(source),
            other => AcquireError::Decode {
                source_name: resolved.display().to_string(),
                source: other,
            },
        })
    }

    /// Joins relative paths onto the configured base directory.
    pub fn resolve_local(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}
