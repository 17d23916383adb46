/// Per-point vertex records written into a caller-owned buffer
use crate::error::PipelineError;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// One point: world position plus its slot within its atlas.
/// Laid out as a single `vec4` attribute.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct VertexRecord {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Slot index stored as a float, exact up to 2^24 cells per atlas.
    pub slot: f32,
}

impl VertexRecord {
    pub fn new(position: [f32; 3], slot: u32) -> Self {
        Self {
            x: position[0],
            y: position[1],
            z: position[2],
            slot: slot as f32,
        }
    }

    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn slot_index(&self) -> u32 {
        self.slot as u32
    }
}

/// Sequential writer over a pre-sized vertex buffer.
pub struct VertexEmitter<'a> {
    buffer: &'a mut [VertexRecord],
    cursor: usize,
}

impl<'a> VertexEmitter<'a> {
    pub fn new(buffer: &'a mut [VertexRecord]) -> Self {
        Self { buffer, cursor: 0 }
    }

    /// Writes the next record. Writing past the buffer is a sizing bug.
    pub fn emit(&mut self, record: VertexRecord) -> Result<(), PipelineError> {
        let Some(slot) = self.buffer.get_mut(self.cursor) else {
            return Err(PipelineError::CapacityExceeded {
                capacity: self.buffer.len() as u64,
                attempted: self.cursor as u64,
            });
        };
        *slot = record;
        self.cursor += 1;
        Ok(())
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.cursor
    }
}

/// Raw native-endian bytes of a vertex buffer, 16 bytes per record.
pub fn vertex_bytes(records: &[VertexRecord]) -> &[u8] {
    bytemuck::cast_slice(records)
}
