/// Default atlas texture width in pixels
pub const ATLAS_WIDTH: u32 = 4096;

/// Default atlas texture height in pixels
pub const ATLAS_HEIGHT: u32 = 4096;

/// Default thumbnail cell width in pixels
pub const CELL_WIDTH: u32 = 64;

/// Default thumbnail cell height in pixels
pub const CELL_HEIGHT: u32 = 64;

/// Bytes per atlas pixel (RGB8)
pub const ATLAS_CHANNELS: usize = 3;

/// Opaque warning colour painted into cells whose image could not be acquired
pub const FALLBACK_COLOUR: [u8; 3] = [255, 255, 0];

/// Size of one vertex record (x, y, z, slot as f32)
pub const VERTEX_STRIDE: usize = 16;

/// Most cells one atlas may hold; slots are stored as f32 and stay exact up to 2^24
pub const MAX_CELLS_PER_ATLAS: u64 = 1 << 24;
