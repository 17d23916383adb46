use crate::error::SinkError;
use ddsfile::{AlphaMode, D3D10ResourceDimension, Dds, DxgiFormat, NewDxgiParams};
use std::path::Path;

/// Writes a tightly packed RGB8 buffer as an opaque R8G8B8A8 DDS texture.
pub fn write_rgb8_texture(
    path: &Path,
    width: u32,
    height: u32,
    rgb: &[u8],
) -> Result<(), SinkError> {
    let mut bytes = Vec::with_capacity(rgb.len() / 3 * 4);
    for pixel in rgb.chunks_exact(3) {
        bytes.extend_from_slice(pixel);
        bytes.push(u8::MAX);
    }

    let params = NewDxgiParams {
        height,
        width,
        depth: None,
        format: DxgiFormat::R8G8B8A8_UNorm,
        mipmap_levels: Some(1),
        array_layers: Some(1),
        caps2: None,
        is_cubemap: false,
        resource_dimension: D3D10ResourceDimension::Texture2D,
        alpha_mode: AlphaMode::Opaque,
    };

    let mut dds = Dds::new_dxgi(params)?;
    dds.data = bytes;
    dds.write(&mut std::fs::File::create(path)?)?;
    Ok(())
}
