/// Square crop and uniform scale of decoded images into atlas cells
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Crops the top-left `min(w, h)` square and scales it by `cell_width / size`
/// with bilinear filtering.
///
/// The crop is anchored at (0, 0), not centred. The result is square with a
/// side of `cell_width` up to rounding; the packer clamps whatever it copies
/// to the cell, so a cell taller than it is wide keeps its lower rows unpainted.
pub fn make_thumbnail(pixels: &RgbImage, cell_width: u32) -> RgbImage {
    let (width, height) = pixels.dimensions();
    let size = width.min(height);

    let cropped = imageops::crop_imm(pixels, 0, 0, size, size).to_image();

    let scale = cell_width as f64 / size as f64;
    let side = (size as f64 * scale).round().max(1.0) as u32;

    imageops::resize(&cropped, side, side, FilterType::Triangle)
}
