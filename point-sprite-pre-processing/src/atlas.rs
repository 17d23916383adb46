/// Atlas accumulation and finalisation for GPU texture upload
use crate::layout::AtlasLayout;
use constants::texture::ATLAS_CHANNELS;
use image::RgbImage;
use log::{debug, warn};

/// Finalised atlas handed to the texture upload collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasImage {
    /// Position of this atlas in upload order.
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGB8 rows, row 0 first.
    pub pixels: Vec<u8>,
    /// Cells written before finalisation (thumbnails and fallbacks).
    pub placed: u32,
}

impl AtlasImage {
    /// RGB value at atlas pixel `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * ATLAS_CHANNELS;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }

    /// Reinterprets the buffer as an `image` RGB image without copying.
    pub fn into_rgb_image(self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels)
    }
}

/// Pixel buffer for the atlas currently being filled.
struct AtlasAccumulator {
    index: u64,
    pixels: Vec<u8>,
    placed: u32,
}

impl AtlasAccumulator {
    fn zeroed(index: u64, bytes: usize) -> Self {
        Self {
            index,
            pixels: vec![0u8; bytes],
            placed: 0,
        }
    }
}

/// Owns the single in-flight atlas and writes cells into it.
pub struct AtlasPacker {
    layout: AtlasLayout,
    fallback_colour: [u8; 3],
    current: Option<AtlasAccumulator>,
    next_index: u64,
}

impl AtlasPacker {
    pub fn new(layout: AtlasLayout, fallback_colour: [u8; 3]) -> Self {
        Self {
            layout,
            fallback_colour,
            current: None,
            next_index: 0,
        }
    }

    /// Starts a zero-filled atlas. A no-op while the current atlas is still empty.
    pub fn begin_atlas(&mut self) {
        match &mut self.current {
            Some(acc) if acc.placed == 0 => {}
            Some(acc) => {
                warn!(
                    "Discarding atlas {} with {} unflushed cells",
                    acc.index, acc.placed
                );
                acc.pixels.fill(0);
                acc.placed = 0;
            }
            None => {
                debug!("Beginning atlas {}", self.next_index);
                self.current = Some(AtlasAccumulator::zeroed(
                    self.next_index,
                    self.layout.atlas_bytes(),
                ));
            }
        }
    }

    /// Current accumulator, begun on first use.
    fn accumulator(&mut self) -> &mut AtlasAccumulator {
        let index = self.next_index;
        let bytes = self.layout.atlas_bytes();
        self.current
            .get_or_insert_with(|| AtlasAccumulator::zeroed(index, bytes))
    }

    /// Copies a thumbnail into `slot`, flipping it vertically within the cell.
    /// Only the overlap of thumbnail and cell is written; the rest of the
    /// cell keeps its current contents.
    pub fn place_thumbnail(&mut self, slot: u32, thumbnail: &RgbImage) {
        let layout = self.layout;
        let (thumb_width, thumb_height) = thumbnail.dimensions();
        let copy_width = layout.cell_width.min(thumb_width) as usize;
        let copy_height = layout.cell_height.min(thumb_height);
        let row_bytes = copy_width * ATLAS_CHANNELS;
        let thumb_stride = thumb_width as usize * ATLAS_CHANNELS;
        let atlas_stride = layout.atlas_width as usize * ATLAS_CHANNELS;
        let source = thumbnail.as_raw();

        let acc = self.accumulator();
        for y in 0..copy_height {
            let (ax, ay) = layout.atlas_pixel(slot, 0, y);
            let dst = ay as usize * atlas_stride + ax as usize * ATLAS_CHANNELS;
            let src = y as usize * thumb_stride;
            acc.pixels[dst..dst + row_bytes].copy_from_slice(&source[src..src + row_bytes]);
        }
        acc.placed += 1;
    }

    /// Paints `slot` entirely with the fallback colour.
    pub fn place_fallback(&mut self, slot: u32) {
        let layout = self.layout;
        let colour = self.fallback_colour;
        let atlas_stride = layout.atlas_width as usize * ATLAS_CHANNELS;

        let acc = self.accumulator();
        for y in 0..layout.cell_height {
            let (ax, ay) = layout.atlas_pixel(slot, 0, y);
            let start = ay as usize * atlas_stride + ax as usize * ATLAS_CHANNELS;
            let row = &mut acc.pixels[start..start + layout.cell_width as usize * ATLAS_CHANNELS];
            for pixel in row.chunks_exact_mut(ATLAS_CHANNELS) {
                pixel.copy_from_slice(&colour);
            }
        }
        acc.placed += 1;
    }

    /// True when the current atlas holds at least one cell.
    pub fn has_placements(&self) -> bool {
        self.current.as_ref().is_some_and(|acc| acc.placed > 0)
    }

    /// Atlases finalised so far.
    pub fn finalized_count(&self) -> u64 {
        self.next_index
    }

    /// Moves the current atlas out for upload. `None` when no atlas was begun.
    pub fn finalize_atlas(&mut self) -> Option<AtlasImage> {
        let acc = self.current.take()?;
        self.next_index = acc.index + 1;
        debug!("Finalising atlas {} ({} cells)", acc.index, acc.placed);

        Some(AtlasImage {
            index: acc.index,
            width: self.layout.atlas_width,
            height: self.layout.atlas_height,
            pixels: acc.pixels,
            placed: acc.placed,
        })
    }
}
