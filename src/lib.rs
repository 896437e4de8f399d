//! Umber: an 8-bit palettized software rasterizer
//!
//! A fixed-function CPU rendering pipeline in the spirit of late-90s
//! software renderers:
//! - Perspective-correct scanline triangle fill with a 16-bit depth test
//! - 8-bit indexed color against a fixed R3G3B2 palette (optional
//!   Floyd-Steinberg dithering on upload)
//! - Mip-mapped nearest-neighbor texture sampling
//! - Sutherland-Hodgman z-plane and screen-rect polygon clipping
//! - Bresenham lines, point plotting, screen-space blits
//! - Immediate mode (begin/vertex/end) on top of the same draw paths
//!
//! Everything renders into an in-memory framebuffer; a thin platform layer
//! (the demo binary uses macroquad) maps it through the palette and blits it
//! to a window.

/// Version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod color;
pub mod config;
pub mod context;
pub mod error;
pub mod framebuffer;
pub mod geometry;
pub mod math;
pub mod state;
pub mod texture;

mod pool;
mod raster;

pub use color::{color_to_index, Color, ColorIndex, ImageData, ImageFormat, Palette};
pub use config::RenderConfig;
pub use context::{
    FrameBufferId, IndexBufferId, Primitive, RenderContext, TextureId, VertexBufferId,
    IMMEDIATE_VERTEX_CAPACITY,
};
pub use error::{ErrorCode, RenderError};
pub use framebuffer::{ClearFlags, FrameBuffer};
pub use geometry::{IndexBuffer, Vertex, VertexBuffer, VertexLayout};
pub use math::{Mat4, Vec2, Vec3, Vec4};
pub use state::{Capability, CullMode, PolygonMode};
pub use texture::{Texture, MAX_TEXTURE_SIZE};
