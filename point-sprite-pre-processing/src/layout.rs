/// Atlas grid layout planning and cell addressing
use crate::config::AtlasCountPolicy;
use crate::error::PipelineError;
use constants::texture::{ATLAS_CHANNELS, MAX_CELLS_PER_ATLAS};
use serde::{Deserialize, Serialize};

/// Derived, read-only grid configuration for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasLayout {
    /// Atlas texture width in pixels.
    pub atlas_width: u32,
    /// Atlas texture height in pixels.
    pub atlas_height: u32,
    /// Thumbnail cell width in pixels.
    pub cell_width: u32,
    /// Thumbnail cell height in pixels.
    pub cell_height: u32,
    /// Cells along one atlas row.
    pub cells_per_row: u32,
    /// Cells in one atlas.
    pub cells_per_atlas: u32,
    /// Records the layout was planned for.
    pub record_count: u64,
    /// Atlases to allocate for `record_count` under the chosen policy.
    pub atlas_count: u64,
}

/// UV bounds of one cell in normalised texture space.
/// Row 0 of the atlas buffer is v = 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellRegion {
    pub uv_min: [f32; 2],
    pub uv_max: [f32; 2],
}

/// Contiguous vertex range drawn with one atlas bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawBatch {
    pub atlas: u64,
    pub first: u64,
    pub count: u64,
}

impl AtlasLayout {
    /// Computes the grid for `record_count` records.
    /// Fails fast when a cell does not tile the atlas exactly, or when the
    /// grid holds more slots than a vertex can address or more bytes than
    /// fit in memory.
    pub fn plan(
        atlas_width: u32,
        atlas_height: u32,
        cell_width: u32,
        cell_height: u32,
        record_count: u64,
        policy: AtlasCountPolicy,
    ) -> Result<Self, PipelineError> {
        if atlas_width == 0 || atlas_height == 0 || cell_width == 0 || cell_height == 0 {
            return Err(PipelineError::ZeroDimension {
                atlas_width,
                atlas_height,
                cell_width,
                cell_height,
            });
        }

        if atlas_width % cell_width != 0 || atlas_height % cell_height != 0 {
            return Err(PipelineError::NonDivisorCell {
                atlas_width,
                atlas_height,
                cell_width,
                cell_height,
            });
        }

        let oversized = |reason| PipelineError::OversizedGrid {
            atlas_width,
            atlas_height,
            cell_width,
            cell_height,
            reason,
        };

        let cells_per_row = atlas_width / cell_width;
        let per_atlas = u64::from(cells_per_row) * u64::from(atlas_height / cell_height);
        if per_atlas > MAX_CELLS_PER_ATLAS {
            return Err(oversized("more than 2^24 cells per atlas"));
        }
        let cells_per_atlas = per_atlas as u32;

        (atlas_width as usize)
            .checked_mul(atlas_height as usize)
            .and_then(|pixels| pixels.checked_mul(ATLAS_CHANNELS))
            .ok_or_else(|| oversized("atlas buffer size overflows usize"))?;

        let atlas_count = match policy {
            AtlasCountPolicy::Exact => record_count.div_ceil(per_atlas),
            AtlasCountPolicy::Faithful => record_count / per_atlas + 1,
        };

        Ok(Self {
            atlas_width,
            atlas_height,
            cell_width,
            cell_height,
            cells_per_row,
            cells_per_atlas,
            record_count,
            atlas_count,
        })
    }

    /// Slot of a record within its atlas.
    pub fn slot_of(&self, index: u64) -> u32 {
        (index % self.cells_per_atlas as u64) as u32
    }

    /// Atlas holding a record.
    pub fn atlas_of(&self, index: u64) -> u64 {
        index / self.cells_per_atlas as u64
    }

    /// Grid column and row of a slot.
    pub fn cell_position(&self, slot: u32) -> (u32, u32) {
        (slot % self.cells_per_row, slot / self.cells_per_row)
    }

    /// Atlas pixel written for thumbnail pixel `(x, y)` at `slot`.
    /// Each cell is flipped vertically on its own.
    pub fn atlas_pixel(&self, slot: u32, x: u32, y: u32) -> (u32, u32) {
        let (sx, sy) = self.cell_position(slot);
        (
            sx * self.cell_width + x,
            (sy + 1) * self.cell_height - 1 - y,
        )
    }

    /// Bytes in one RGB atlas buffer.
    pub fn atlas_bytes(&self) -> usize {
        self.atlas_width as usize * self.atlas_height as usize * ATLAS_CHANNELS
    }

    /// Normalised texture coordinates covered by a slot.
    pub fn cell_uv(&self, slot: u32) -> CellRegion {
        let (sx, sy) = self.cell_position(slot);
        let u_step = self.cell_width as f32 / self.atlas_width as f32;
        let v_step = self.cell_height as f32 / self.atlas_height as f32;

        let u_min = sx as f32 * u_step;
        let v_min = sy as f32 * v_step;

        CellRegion {
            uv_min: [u_min, v_min],
            uv_max: [u_min + u_step, v_min + v_step],
        }
    }

    /// One draw range per atlas that holds at least one record.
    pub fn draw_batches(&self) -> Vec<DrawBatch> {
        let per_atlas = self.cells_per_atlas as u64;
        let mut batches = Vec::new();
        let mut remaining = self.record_count;

        for atlas in 0..self.atlas_count {
            if remaining == 0 {
                break;
            }
            let count = remaining.min(per_atlas);
            batches.push(DrawBatch {
                atlas,
                first: atlas * per_atlas,
                count,
            });
            remaining -= count;
        }

        batches
    }
}
