//! Vertex and index buffers
//!
//! Buffers own plain `Vec` storage and are resized destructively whenever an
//! upload changes the element count. The transform pass runs in place over
//! the vertices, filling the derived screen-space fields that the rasterizer
//! consumes.

use std::io::Read;

use crate::color::{color_to_index, ColorIndex};
use crate::error::{ErrorCode, RenderError, RenderResult};
use crate::math::{Mat4, Vec2, Vec3, Vec4};
use crate::state::Viewport;

/// A single vertex: model-space inputs plus derived raster fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vertex {
    /// Model-space position
    pub coord: Vec4,
    /// Texture coordinate
    pub tex_coord: Vec2,
    /// Optional pre-quantized per-vertex color
    pub color: Option<ColorIndex>,
    /// Derived: screen x, screen y, and z = 1/w
    pub ndc: Vec3,
    /// Derived: texture coordinate, premultiplied by 1/w when perspective
    /// correction is on
    pub inv_tex_coord: Vec2,
}

/// Describes how vertex attributes are laid out in a flat `&[f32]` upload.
/// All fields count in floats: `stride` is the distance between consecutive
/// vertices, the offsets point at the first component of each attribute
/// (positions are x,y,z; texture coordinates u,v; colors r,g,b in [0, 1]).
#[derive(Debug, Clone, Copy)]
pub struct VertexLayout {
    pub stride: usize,
    pub position: usize,
    pub tex_coord: Option<usize>,
    pub color: Option<usize>,
}

impl VertexLayout {
    /// Positions only, tightly packed.
    pub fn positions() -> Self {
        Self { stride: 3, position: 0, tex_coord: None, color: None }
    }

    /// Interleaved x,y,z,u,v records.
    pub fn positions_uvs() -> Self {
        Self { stride: 5, position: 0, tex_coord: Some(3), color: None }
    }

    fn validate(&self, context: &'static str) -> RenderResult<()> {
        let mut needed = self.position + 3;
        if let Some(uv) = self.tex_coord {
            needed = needed.max(uv + 2);
        }
        if let Some(color) = self.color {
            needed = needed.max(color + 3);
        }
        if self.stride == 0 || self.stride < needed {
            return Err(RenderError::new(ErrorCode::InvalidArgument, context));
        }
        Ok(())
    }
}

fn transform_vertex(vertex: &mut Vertex, mvp: &Mat4, viewport: &Viewport, perspective_correct: bool) {
    // Model space -> clip space
    let clip = mvp.transform_vec4(vertex.coord);

    // The reciprocal of w doubles as the stored depth: it grows as the
    // surface gets closer, which is what the GREATER depth test expects
    let rhw = 1.0 / clip.w;

    // NDC -> screen (+0.5 is for rounding adjustment; the viewport's
    // half-height is negative, folding in the vertical flip)
    vertex.ndc.x = viewport.x + (clip.x * rhw + 1.0) * viewport.half_width + 0.5;
    vertex.ndc.y = viewport.y + (clip.y * rhw + 1.0) * viewport.half_height + 0.5;
    vertex.ndc.z = rhw;

    if perspective_correct {
        vertex.inv_tex_coord.x = vertex.tex_coord.x * rhw;
        vertex.inv_tex_coord.y = vertex.tex_coord.y * rhw;
    } else {
        vertex.inv_tex_coord = vertex.tex_coord;
    }
}

/// Owns a contiguous vertex array.
#[derive(Debug, Default)]
pub struct VertexBuffer {
    vertices: Vec<Vertex>,
}

impl VertexBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed-size buffer of default vertices (immediate-mode accumulator).
    pub fn with_len(len: usize) -> Self {
        Self { vertices: vec![Vertex::default(); len] }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn vertex_mut(&mut self, index: usize) -> &mut Vertex {
        &mut self.vertices[index]
    }

    fn resize(&mut self, count: usize) {
        // Destructive: old contents are discarded when the count changes
        if self.vertices.len() != count {
            self.vertices = vec![Vertex::default(); count];
        }
    }

    /// Bulk upload from a flat float array. The vertex count is
    /// `data.len() / layout.stride`, which must divide evenly.
    pub fn set_data(&mut self, data: &[f32], layout: &VertexLayout) -> RenderResult<()> {
        layout.validate("vertex_buffer_data")?;
        if data.len() % layout.stride != 0 {
            return Err(RenderError::new(ErrorCode::ArgumentMismatch, "vertex_buffer_data"));
        }

        let count = data.len() / layout.stride;
        self.resize(count);

        for (vert, record) in self.vertices.iter_mut().zip(data.chunks_exact(layout.stride)) {
            let p = layout.position;
            vert.coord = Vec4::point(record[p], record[p + 1], record[p + 2]);

            vert.tex_coord = match layout.tex_coord {
                Some(t) => Vec2::new(record[t], record[t + 1]),
                None => Vec2::ZERO,
            };

            vert.color = layout.color.map(|c| {
                color_to_index(
                    (record[c].clamp(0.0, 1.0) * 255.0) as u8,
                    (record[c + 1].clamp(0.0, 1.0) * 255.0) as u8,
                    (record[c + 2].clamp(0.0, 1.0) * 255.0) as u8,
                )
            });

            vert.ndc = Vec3::ZERO;
            vert.inv_tex_coord = Vec2::ZERO;
        }

        Ok(())
    }

    /// Reads the binary geometry vertex block: a little-endian u16 count
    /// followed by that many x,y,z,u,v f32 records.
    pub fn read_from(&mut self, reader: &mut impl Read) -> RenderResult<usize> {
        let count = read_u16(reader)? as usize;
        self.resize(count);

        for vert in &mut self.vertices {
            let x = read_f32(reader)?;
            let y = read_f32(reader)?;
            let z = read_f32(reader)?;
            let u = read_f32(reader)?;
            let v = read_f32(reader)?;

            *vert = Vertex {
                coord: Vec4::point(x, y, z),
                tex_coord: Vec2::new(u, v),
                ..Vertex::default()
            };
        }

        Ok(count)
    }

    /// Transforms `count` vertices starting at `first` in place.
    pub fn transform_range(
        &mut self,
        first: usize,
        count: usize,
        mvp: &Mat4,
        viewport: &Viewport,
        perspective_correct: bool,
    ) -> RenderResult<()> {
        let last = first.checked_add(count).ok_or(RenderError::new(
            ErrorCode::IndexOutOfBounds,
            "vertex_buffer_transform",
        ))?;
        if last > self.vertices.len() {
            return Err(RenderError::new(ErrorCode::IndexOutOfBounds, "vertex_buffer_transform"));
        }

        for vert in &mut self.vertices[first..last] {
            transform_vertex(vert, mvp, viewport, perspective_correct);
        }
        Ok(())
    }

    pub fn transform_all(&mut self, mvp: &Mat4, viewport: &Viewport, perspective_correct: bool) {
        for vert in &mut self.vertices {
            transform_vertex(vert, mvp, viewport, perspective_correct);
        }
    }
}

/// Owns an array of 16-bit indices into a vertex buffer.
#[derive(Debug, Default)]
pub struct IndexBuffer {
    indices: Vec<u16>,
}

impl IndexBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn set_data(&mut self, indices: &[u16]) {
        if self.indices.len() != indices.len() {
            self.indices = vec![0; indices.len()];
        }
        self.indices.copy_from_slice(indices);
    }

    /// Reads the binary geometry index block: a little-endian u16 count
    /// followed by that many u16 indices.
    pub fn read_from(&mut self, reader: &mut impl Read) -> RenderResult<usize> {
        let count = read_u16(reader)? as usize;
        if self.indices.len() != count {
            self.indices = vec![0; count];
        }
        for index in &mut self.indices {
            *index = read_u16(reader)?;
        }
        Ok(count)
    }

    /// Verifies that `count` indices starting at `first` exist and all point
    /// inside a vertex buffer of `vertex_count` entries. An out-of-range
    /// entry is treated as data corruption.
    pub fn validate_range(&self, first: usize, count: usize, vertex_count: usize) -> RenderResult<()> {
        let last = first.checked_add(count).ok_or(RenderError::new(
            ErrorCode::InvalidArgument,
            "draw_indexed",
        ))?;
        if last > self.indices.len() {
            return Err(RenderError::new(ErrorCode::InvalidArgument, "draw_indexed"));
        }
        for &index in &self.indices[first..last] {
            if index as usize >= vertex_count {
                return Err(RenderError::fatal("index buffer entry out of bounds"));
            }
        }
        Ok(())
    }
}

fn read_u16(reader: &mut impl Read) -> RenderResult<u16> {
    let mut bytes = [0u8; 2];
    reader
        .read_exact(&mut bytes)
        .map_err(|_| RenderError::new(ErrorCode::UnexpectedEof, "geometry_read"))?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_f32(reader: &mut impl Read) -> RenderResult<f32> {
    let mut bytes = [0u8; 4];
    reader
        .read_exact(&mut bytes)
        .map_err(|_| RenderError::new(ErrorCode::UnexpectedEof, "geometry_read"))?;
    Ok(f32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport_320x240() -> Viewport {
        let mut vp = Viewport::default();
        vp.set_rect(0, 0, 320, 240, 240);
        vp
    }

    #[test]
    fn test_upload_interleaved_with_stride() {
        let mut vb = VertexBuffer::new();
        #[rustfmt::skip]
        let data = [
            // x, y, z, u, v
            0.0, 0.0, 0.0, 0.0, 0.0,
            1.0, 0.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 0.0, 1.0,
        ];
        vb.set_data(&data, &VertexLayout::positions_uvs()).unwrap();

        assert_eq!(vb.len(), 3);
        assert_eq!(vb.vertices()[1].coord, Vec4::point(1.0, 0.0, 0.0));
        assert_eq!(vb.vertices()[2].tex_coord, Vec2::new(0.0, 1.0));
        assert_eq!(vb.vertices()[0].coord.w, 1.0);
    }

    #[test]
    fn test_upload_with_color_attribute() {
        let mut vb = VertexBuffer::new();
        let layout = VertexLayout { stride: 6, position: 0, tex_coord: None, color: Some(3) };
        let data = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        vb.set_data(&data, &layout).unwrap();
        assert_eq!(vb.vertices()[0].color, Some(color_to_index(255, 0, 0)));
    }

    #[test]
    fn test_upload_rejects_ragged_data() {
        let mut vb = VertexBuffer::new();
        let err = vb.set_data(&[0.0; 7], &VertexLayout::positions()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ArgumentMismatch);
    }

    #[test]
    fn test_resize_is_destructive() {
        let mut vb = VertexBuffer::new();
        vb.set_data(&[1.0, 2.0, 3.0], &VertexLayout::positions()).unwrap();
        vb.set_data(&[0.0; 6], &VertexLayout::positions()).unwrap();
        assert_eq!(vb.len(), 2);
        assert_eq!(vb.vertices()[0].coord.x, 0.0);
    }

    #[test]
    fn test_transform_writes_screen_coords() {
        let mut vb = VertexBuffer::new();
        vb.set_data(&[0.0, 0.0, 0.0], &VertexLayout::positions()).unwrap();

        // Identity MVP: the origin lands at the viewport center (+0.5)
        vb.transform_range(0, 1, &Mat4::IDENTITY, &viewport_320x240(), true).unwrap();
        let v = vb.vertices()[0];
        assert!((v.ndc.x - 160.5).abs() < 1e-3);
        assert!((v.ndc.y - (239.0 - 120.0 + 0.5)).abs() < 1e-3);
        assert!((v.ndc.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_transform_premultiplies_uv() {
        let mut vb = VertexBuffer::new();
        #[rustfmt::skip]
        let data = [0.0, 0.0, 0.0, 0.8, 0.6];
        vb.set_data(&data, &VertexLayout::positions_uvs()).unwrap();

        // Scale w to 2 so 1/w = 0.5
        let mut mvp = Mat4::IDENTITY;
        mvp.m[15] = 2.0;

        vb.transform_range(0, 1, &mvp, &viewport_320x240(), true).unwrap();
        let v = vb.vertices()[0];
        assert!((v.ndc.z - 0.5).abs() < 1e-6);
        assert!((v.inv_tex_coord.x - 0.4).abs() < 1e-6);
        assert!((v.inv_tex_coord.y - 0.3).abs() < 1e-6);

        vb.transform_range(0, 1, &mvp, &viewport_320x240(), false).unwrap();
        let v = vb.vertices()[0];
        assert!((v.inv_tex_coord.x - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_transform_range_bounds() {
        let mut vb = VertexBuffer::new();
        vb.set_data(&[0.0; 9], &VertexLayout::positions()).unwrap();

        let vp = viewport_320x240();
        assert!(vb.transform_range(0, 3, &Mat4::IDENTITY, &vp, true).is_ok());
        assert!(vb.transform_range(1, 2, &Mat4::IDENTITY, &vp, true).is_ok());

        let err = vb.transform_range(2, 2, &Mat4::IDENTITY, &vp, true).unwrap_err();
        assert_eq!(err.code, ErrorCode::IndexOutOfBounds);
    }

    #[test]
    fn test_index_validation() {
        let mut ib = IndexBuffer::new();
        ib.set_data(&[0, 1, 2, 3]);

        assert!(ib.validate_range(0, 4, 4).is_ok());

        let err = ib.validate_range(0, 4, 3).unwrap_err();
        assert_eq!(err.code, ErrorCode::Fatal);

        let err = ib.validate_range(2, 3, 10).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_geometry_file_round_trip() {
        // vertex block: count = 2, records x,y,z,u,v
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u16.to_le_bytes());
        for f in [1.0f32, 2.0, 3.0, 0.5, 0.25, -1.0, 0.0, 4.0, 0.0, 1.0] {
            bytes.extend_from_slice(&f.to_le_bytes());
        }
        // index block: count = 3
        bytes.extend_from_slice(&3u16.to_le_bytes());
        for i in [0u16, 1, 1] {
            bytes.extend_from_slice(&i.to_le_bytes());
        }

        let mut cursor = std::io::Cursor::new(bytes);
        let mut vb = VertexBuffer::new();
        let mut ib = IndexBuffer::new();

        assert_eq!(vb.read_from(&mut cursor).unwrap(), 2);
        assert_eq!(ib.read_from(&mut cursor).unwrap(), 3);

        assert_eq!(vb.vertices()[0].coord, Vec4::point(1.0, 2.0, 3.0));
        assert_eq!(vb.vertices()[1].tex_coord, Vec2::new(0.0, 1.0));
        assert_eq!(ib.indices(), &[0, 1, 1]);
    }

    #[test]
    fn test_geometry_file_truncated() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&5u16.to_le_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());

        let mut cursor = std::io::Cursor::new(bytes);
        let mut vb = VertexBuffer::new();
        let err = vb.read_from(&mut cursor).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnexpectedEof);
    }
}
