/// Values shared between the atlas pre-processor and the renderers reading its output
pub mod manifest;
pub mod texture;
