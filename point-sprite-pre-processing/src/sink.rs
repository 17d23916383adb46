/// Texture upload collaborators receiving finalised atlases
use crate::atlas::AtlasImage;
use crate::dds_writer::write_rgb8_texture;
use crate::error::SinkError;
use image::{ImageBuffer, Rgb};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Receives each finalised atlas once, in atlas order. Ownership moves in.
pub trait AtlasSink {
    fn upload_atlas(&mut self, atlas: AtlasImage) -> Result<(), SinkError>;
}

/// Keeps atlases in memory.
impl AtlasSink for Vec<AtlasImage> {
    fn upload_atlas(&mut self, atlas: AtlasImage) -> Result<(), SinkError> {
        self.push(atlas);
        Ok(())
    }
}

/// On-disk container for atlas textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AtlasFormat {
    /// Uncompressed R8G8B8A8 DDS.
    #[default]
    Dds,
    /// RGB PNG.
    Png,
}

impl AtlasFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AtlasFormat::Dds => "dds",
            AtlasFormat::Png => "png",
        }
    }
}

/// Writes each atlas to `<output_dir>/atlases/atlas_NNN.<ext>`.
pub struct AtlasFileWriter {
    output_dir: PathBuf,
    format: AtlasFormat,
    /// Written files relative to `output_dir`, in atlas order.
    files: Vec<String>,
}

impl AtlasFileWriter {
    /// Creates the atlas directory under `output_dir`.
    pub fn new(output_dir: &Path, format: AtlasFormat) -> Result<Self, SinkError> {
        fs::create_dir_all(output_dir.join("atlases"))?;
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            format,
            files: Vec::new(),
        })
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn format(&self) -> AtlasFormat {
        self.format
    }
}

impl AtlasSink for AtlasFileWriter {
    fn upload_atlas(&mut self, atlas: AtlasImage) -> Result<(), SinkError> {
        let relative = format!("atlases/atlas_{:03}.{}", atlas.index, self.format.extension());
        let path = self.output_dir.join(&relative);

        match self.format {
            AtlasFormat::Dds => {
                write_rgb8_texture(&path, atlas.width, atlas.height, &atlas.pixels)?;
            }
            AtlasFormat::Png => {
                let (width, height) = (atlas.width, atlas.height);
                let image: ImageBuffer<Rgb<u8>, Vec<u8>> =
                    ImageBuffer::from_raw(width, height, atlas.pixels).ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("atlas buffer does not match {}x{}", width, height),
                        )
                    })?;
                image.save(&path)?;
            }
        }

        info!("Saved {}", path.display());
        self.files.push(relative);
        Ok(())
    }
}
