//! The render context: resource ownership, bindings, draws, immediate mode
//!
//! One `RenderContext` is one logical device: it owns every framebuffer,
//! buffer and texture in generational pools, the render state machine, the
//! clipping scratch, the palette and the sticky error state. Public entry
//! points follow the C-style contract: validate, record an error code on bad
//! input, never panic. The context is intentionally not `Send`; drive it
//! from one thread.

use std::io::Read;
use std::path::Path;

use crate::color::{ImageData, Palette};
use crate::config::RenderConfig;
use crate::error::{ErrorCode, ErrorHandler, ErrorState, RenderError, RenderResult};
use crate::framebuffer::{ClearFlags, FrameBuffer};
use crate::geometry::{IndexBuffer, VertexBuffer, VertexLayout};
use crate::math::{Mat4, Vec2, Vec4};
use crate::pool::{Handle, Pool};
use crate::raster::{self, ClipScratch};
use crate::state::{Capability, CullMode, PolygonMode, RenderState};
use crate::texture::Texture;

/// Capacity of the immediate-mode vertex accumulator.
pub const IMMEDIATE_VERTEX_CAPACITY: usize = 32;

macro_rules! resource_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) Handle);
    };
}

resource_id!(
    /// Opaque handle to a context-owned framebuffer.
    FrameBufferId
);
resource_id!(
    /// Opaque handle to a context-owned vertex buffer.
    VertexBufferId
);
resource_id!(
    /// Opaque handle to a context-owned index buffer.
    IndexBufferId
);
resource_id!(
    /// Opaque handle to a context-owned texture.
    TextureId
);

/// Primitive kinds accepted by the draw calls and immediate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl Primitive {
    /// Points and lines consume the screen coordinates produced by the
    /// bulk transform pass; triangles transform per-vertex while clipping.
    fn needs_vertex_transform(self) -> bool {
        matches!(
            self,
            Primitive::Points | Primitive::Lines | Primitive::LineStrip | Primitive::LineLoop
        )
    }
}

/// Dispatches one draw over already-validated resources.
#[allow(clippy::too_many_arguments)]
fn dispatch_draw(
    fb: &mut FrameBuffer,
    state: &RenderState,
    scratch: &mut ClipScratch,
    flat_texture: &mut Texture,
    texture: Option<&Texture>,
    perspective_correct: bool,
    primitive: Primitive,
    vertex_buffer: &VertexBuffer,
    index_buffer: Option<&IndexBuffer>,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    // Untextured polygons fill with the draw color through the 1x1 stand-in
    let polygon_texture: &Texture = match texture {
        Some(t) => t,
        None => {
            flat_texture.set_flat_color(state.draw_color);
            flat_texture
        }
    };

    match (primitive, index_buffer) {
        (Primitive::Points, None) => raster::render_points(fb, state, vertex_buffer, count, first),
        (Primitive::Points, Some(ib)) => {
            raster::render_indexed_points(fb, state, vertex_buffer, ib, count, first)
        }

        (Primitive::Lines, None) => {
            raster::render_lines(fb, texture, state, vertex_buffer, count, first)
        }
        (Primitive::Lines, Some(ib)) => {
            raster::render_indexed_lines(fb, texture, state, vertex_buffer, ib, count, first)
        }
        (Primitive::LineStrip, None) => {
            raster::render_line_strip(fb, texture, state, vertex_buffer, count, first, false)
        }
        (Primitive::LineStrip, Some(ib)) => {
            raster::render_indexed_line_strip(fb, texture, state, vertex_buffer, ib, count, first, false)
        }
        (Primitive::LineLoop, None) => {
            raster::render_line_strip(fb, texture, state, vertex_buffer, count, first, true)
        }
        (Primitive::LineLoop, Some(ib)) => {
            raster::render_indexed_line_strip(fb, texture, state, vertex_buffer, ib, count, first, true)
        }

        (Primitive::Triangles, None) => raster::render_triangles(
            fb,
            polygon_texture,
            state,
            scratch,
            perspective_correct,
            vertex_buffer,
            count,
            first,
        ),
        (Primitive::Triangles, Some(ib)) => raster::render_indexed_triangles(
            fb,
            polygon_texture,
            state,
            scratch,
            perspective_correct,
            vertex_buffer,
            ib,
            count,
            first,
        ),
        (Primitive::TriangleStrip, None) => raster::render_triangle_strip(
            fb,
            polygon_texture,
            state,
            scratch,
            perspective_correct,
            vertex_buffer,
            count,
            first,
        ),
        (Primitive::TriangleStrip, Some(ib)) => raster::render_indexed_triangle_strip(
            fb,
            polygon_texture,
            state,
            scratch,
            perspective_correct,
            vertex_buffer,
            ib,
            count,
            first,
        ),
        (Primitive::TriangleFan, None) => raster::render_triangle_fan(
            fb,
            polygon_texture,
            state,
            scratch,
            perspective_correct,
            vertex_buffer,
            count,
            first,
        ),
        (Primitive::TriangleFan, Some(ib)) => raster::render_indexed_triangle_fan(
            fb,
            polygon_texture,
            state,
            scratch,
            perspective_correct,
            vertex_buffer,
            ib,
            count,
            first,
        ),
    }
}

/// One software rendering context.
pub struct RenderContext {
    state: RenderState,

    frame_buffers: Pool<FrameBuffer>,
    vertex_buffers: Pool<VertexBuffer>,
    index_buffers: Pool<IndexBuffer>,
    textures: Pool<Texture>,

    flat_texture: Texture,
    scratch: ClipScratch,
    palette: Palette,
    errors: ErrorState,
    perspective_correct: bool,

    // Immediate mode
    imm_buffer: VertexBuffer,
    imm_active: bool,
    imm_count: usize,
    imm_primitive: Primitive,

    blit: Vec<u8>,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderContext {
    pub fn new() -> Self {
        Self {
            state: RenderState::new(),
            frame_buffers: Pool::default(),
            vertex_buffers: Pool::default(),
            index_buffers: Pool::default(),
            textures: Pool::default(),
            flat_texture: Texture::flat(),
            scratch: ClipScratch::new(),
            palette: Palette::r3g3b2(),
            errors: ErrorState::default(),
            perspective_correct: true,
            imm_buffer: VertexBuffer::with_len(IMMEDIATE_VERTEX_CAPACITY),
            imm_active: false,
            imm_count: 0,
            imm_primitive: Primitive::Points,
            blit: Vec::new(),
        }
    }

    pub fn with_config(config: &RenderConfig) -> Self {
        let mut ctx = Self::new();
        ctx.perspective_correct = config.perspective_correct;
        ctx.state.set_clear_color(config.clear_color.0, config.clear_color.1, config.clear_color.2);
        ctx
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    // --- errors --- //

    pub fn last_error(&self) -> ErrorCode {
        self.errors.last()
    }

    /// Returns and clears the last error.
    pub fn take_error(&mut self) -> ErrorCode {
        self.errors.take()
    }

    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.errors.set_handler(handler);
    }

    // --- framebuffers --- //

    pub fn create_frame_buffer(&mut self, width: u32, height: u32) -> Option<FrameBufferId> {
        let fb = FrameBuffer::new(width, height);
        let fb = self.errors.check(fb)?;
        Some(FrameBufferId(self.frame_buffers.insert(fb)))
    }

    /// Deletes a framebuffer. Deleting the bound framebuffer unbinds it and
    /// records `InvalidState` (resource deleted while still in use).
    pub fn delete_frame_buffer(&mut self, id: FrameBufferId) {
        if self.frame_buffers.remove(id.0).is_none() {
            self.errors.record(RenderError::new(ErrorCode::InvalidId, "delete_frame_buffer"));
            return;
        }
        if self.state.bound_frame_buffer == Some(id) {
            self.state.bind_frame_buffer(None, None);
            self.errors.record(RenderError::new(
                ErrorCode::InvalidState,
                "delete_frame_buffer: framebuffer was still bound",
            ));
        }
    }

    pub fn bind_frame_buffer(&mut self, id: Option<FrameBufferId>) {
        match id {
            Some(id) => match self.frame_buffers.get(id.0) {
                Some(fb) => {
                    let size = fb.size();
                    self.state.bind_frame_buffer(Some(id), Some(size));
                }
                None => self
                    .errors
                    .record(RenderError::new(ErrorCode::InvalidId, "bind_frame_buffer")),
            },
            None => self.state.bind_frame_buffer(None, None),
        }
    }

    /// Clears the given framebuffer to the current clear color and the given
    /// depth, under the bitmask.
    pub fn clear_frame_buffer(&mut self, id: FrameBufferId, depth: f32, flags: ClearFlags) {
        let clear_color = self.state.clear_color;
        match self.frame_buffers.get_mut(id.0) {
            Some(fb) => fb.clear(clear_color, depth, flags),
            None => self
                .errors
                .record(RenderError::new(ErrorCode::InvalidId, "clear_frame_buffer")),
        }
    }

    // --- vertex buffers --- //

    pub fn create_vertex_buffer(&mut self) -> VertexBufferId {
        VertexBufferId(self.vertex_buffers.insert(VertexBuffer::new()))
    }

    pub fn delete_vertex_buffer(&mut self, id: VertexBufferId) {
        if self.vertex_buffers.remove(id.0).is_none() {
            self.errors.record(RenderError::new(ErrorCode::InvalidId, "delete_vertex_buffer"));
            return;
        }
        if self.state.bound_vertex_buffer == Some(id) {
            self.state.bound_vertex_buffer = None;
            self.errors.record(RenderError::new(
                ErrorCode::InvalidState,
                "delete_vertex_buffer: buffer was still bound",
            ));
        }
    }

    pub fn bind_vertex_buffer(&mut self, id: Option<VertexBufferId>) {
        if let Some(id) = id {
            if !self.vertex_buffers.contains(id.0) {
                self.errors
                    .record(RenderError::new(ErrorCode::InvalidId, "bind_vertex_buffer"));
                return;
            }
        }
        self.state.bound_vertex_buffer = id;
    }

    pub fn vertex_buffer_data(&mut self, id: VertexBufferId, data: &[f32], layout: &VertexLayout) {
        let result = match self.vertex_buffers.get_mut(id.0) {
            Some(vb) => vb.set_data(data, layout),
            None => Err(RenderError::new(ErrorCode::InvalidId, "vertex_buffer_data")),
        };
        self.errors.check(result);
    }

    /// Reads the vertex block of a binary geometry stream into the buffer.
    pub fn vertex_buffer_data_from_reader(
        &mut self,
        id: VertexBufferId,
        reader: &mut impl Read,
    ) -> Option<usize> {
        let result = match self.vertex_buffers.get_mut(id.0) {
            Some(vb) => vb.read_from(reader),
            None => Err(RenderError::new(ErrorCode::InvalidId, "vertex_buffer_data_from_reader")),
        };
        self.errors.check(result)
    }

    // --- index buffers --- //

    pub fn create_index_buffer(&mut self) -> IndexBufferId {
        IndexBufferId(self.index_buffers.insert(IndexBuffer::new()))
    }

    pub fn delete_index_buffer(&mut self, id: IndexBufferId) {
        if self.index_buffers.remove(id.0).is_none() {
            self.errors.record(RenderError::new(ErrorCode::InvalidId, "delete_index_buffer"));
            return;
        }
        if self.state.bound_index_buffer == Some(id) {
            self.state.bound_index_buffer = None;
            self.errors.record(RenderError::new(
                ErrorCode::InvalidState,
                "delete_index_buffer: buffer was still bound",
            ));
        }
    }

    pub fn bind_index_buffer(&mut self, id: Option<IndexBufferId>) {
        if let Some(id) = id {
            if !self.index_buffers.contains(id.0) {
                self.errors
                    .record(RenderError::new(ErrorCode::InvalidId, "bind_index_buffer"));
                return;
            }
        }
        self.state.bound_index_buffer = id;
    }

    pub fn index_buffer_data(&mut self, id: IndexBufferId, indices: &[u16]) {
        match self.index_buffers.get_mut(id.0) {
            Some(ib) => ib.set_data(indices),
            None => self
                .errors
                .record(RenderError::new(ErrorCode::InvalidId, "index_buffer_data")),
        }
    }

    /// Reads the index block of a binary geometry stream into the buffer.
    pub fn index_buffer_data_from_reader(
        &mut self,
        id: IndexBufferId,
        reader: &mut impl Read,
    ) -> Option<usize> {
        let result = match self.index_buffers.get_mut(id.0) {
            Some(ib) => ib.read_from(reader),
            None => Err(RenderError::new(ErrorCode::InvalidId, "index_buffer_data_from_reader")),
        };
        self.errors.check(result)
    }

    // --- textures --- //

    pub fn create_texture(&mut self) -> TextureId {
        TextureId(self.textures.insert(Texture::new()))
    }

    pub fn delete_texture(&mut self, id: TextureId) {
        if self.textures.remove(id.0).is_none() {
            self.errors.record(RenderError::new(ErrorCode::InvalidId, "delete_texture"));
            return;
        }
        if self.state.bound_texture == Some(id) {
            self.state.bound_texture = None;
            self.errors.record(RenderError::new(
                ErrorCode::InvalidState,
                "delete_texture: texture was still bound",
            ));
        }
    }

    pub fn bind_texture(&mut self, id: Option<TextureId>) {
        if let Some(id) = id {
            if !self.textures.contains(id.0) {
                self.errors.record(RenderError::new(ErrorCode::InvalidId, "bind_texture"));
                return;
            }
        }
        self.state.bound_texture = id;
    }

    pub fn texture_image(
        &mut self,
        id: TextureId,
        image: &ImageData,
        dither: bool,
        generate_mips: bool,
    ) -> bool {
        let result = match self.textures.get_mut(id.0) {
            Some(tex) => tex.upload(image, dither, generate_mips),
            None => Err(RenderError::new(ErrorCode::InvalidId, "texture_image")),
        };
        self.errors.check(result).is_some()
    }

    pub fn texture_image_from_file<P: AsRef<Path>>(
        &mut self,
        id: TextureId,
        path: P,
        dither: bool,
        generate_mips: bool,
    ) -> bool {
        let result = match self.textures.get_mut(id.0) {
            Some(tex) => tex.upload_from_file(path, dither, generate_mips),
            None => Err(RenderError::new(ErrorCode::InvalidId, "texture_image_from_file")),
        };
        self.errors.check(result).is_some()
    }

    pub fn texture_mip_dimensions(&mut self, id: TextureId, mip: u8) -> Option<(i16, i16)> {
        let result = match self.textures.get(id.0) {
            Some(tex) => tex.mip_dimensions(mip),
            None => Err(RenderError::new(ErrorCode::InvalidId, "texture_mip_dimensions")),
        };
        self.errors.check(result)
    }

    // --- transform state --- //

    pub fn set_projection_matrix(&mut self, matrix: Mat4) {
        self.state.set_projection_matrix(matrix);
    }

    pub fn set_view_matrix(&mut self, matrix: Mat4) {
        self.state.set_view_matrix(matrix);
    }

    pub fn set_model_matrix(&mut self, matrix: Mat4) {
        self.state.set_model_matrix(matrix);
    }

    // --- render state --- //

    pub fn enable(&mut self, cap: Capability) {
        let size = self.bound_frame_buffer_size();
        self.state.set_capability(cap, true, size);
    }

    pub fn disable(&mut self, cap: Capability) {
        let size = self.bound_frame_buffer_size();
        self.state.set_capability(cap, false, size);
    }

    pub fn is_enabled(&self, cap: Capability) -> bool {
        self.state.capability(cap)
    }

    pub fn set_cull_mode(&mut self, mode: CullMode) {
        self.state.set_cull_mode(mode);
    }

    pub fn set_polygon_mode(&mut self, mode: PolygonMode) {
        self.state.set_polygon_mode(mode);
    }

    pub fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        let size = self.bound_frame_buffer_size();
        let result = self.state.set_viewport(x, y, width, height, size);
        self.errors.check(result);
    }

    pub fn set_scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        let size = self.bound_frame_buffer_size();
        self.state.set_scissor(x, y, width, height, size);
    }

    pub fn set_depth_range(&mut self, min_depth: f32, max_depth: f32) {
        self.state.set_depth_range(min_depth, max_depth);
    }

    /// Sets the z-plane clip range; keep it matching the projection's
    /// near/far planes.
    pub fn set_depth_clip(&mut self, near: f32, far: f32) {
        let result = self.state.set_depth_clip(near, far);
        self.errors.check(result);
    }

    pub fn set_clear_color(&mut self, r: u8, g: u8, b: u8) {
        self.state.set_clear_color(r, g, b);
    }

    pub fn set_draw_color(&mut self, r: u8, g: u8, b: u8) {
        self.state.set_draw_color(r, g, b);
    }

    pub fn set_lod_bias(&mut self, value: i32) {
        self.state.set_lod_bias(value);
    }

    fn bound_frame_buffer_size(&self) -> Option<(u32, u32)> {
        self.state
            .bound_frame_buffer
            .and_then(|id| self.frame_buffers.get(id.0))
            .map(|fb| fb.size())
    }

    // --- draw calls --- //

    pub fn draw(&mut self, primitive: Primitive, count: usize, first: usize) {
        let result = self.draw_inner(primitive, count, first, false);
        self.errors.check(result);
    }

    pub fn draw_indexed(&mut self, primitive: Primitive, count: usize, first: usize) {
        let result = self.draw_inner(primitive, count, first, true);
        self.errors.check(result);
    }

    fn draw_inner(
        &mut self,
        primitive: Primitive,
        count: usize,
        first: usize,
        indexed: bool,
    ) -> RenderResult<()> {
        let fb_id = self
            .state
            .bound_frame_buffer
            .ok_or(RenderError::new(ErrorCode::InvalidState, "draw: no framebuffer bound"))?;
        let vb_id = self
            .state
            .bound_vertex_buffer
            .ok_or(RenderError::new(ErrorCode::NullPointer, "draw: no vertex buffer bound"))?;

        let fb = self
            .frame_buffers
            .get_mut(fb_id.0)
            .ok_or(RenderError::new(ErrorCode::InvalidId, "draw"))?;
        let vb = self
            .vertex_buffers
            .get_mut(vb_id.0)
            .ok_or(RenderError::new(ErrorCode::InvalidId, "draw"))?;

        let ib = if indexed {
            let ib_id = self
                .state
                .bound_index_buffer
                .ok_or(RenderError::new(ErrorCode::NullPointer, "draw: no index buffer bound"))?;
            let ib = self
                .index_buffers
                .get(ib_id.0)
                .ok_or(RenderError::new(ErrorCode::InvalidId, "draw"))?;
            // Every referenced index must land inside the vertex buffer
            ib.validate_range(first, count, vb.len())?;
            Some(ib)
        } else {
            let last = first
                .checked_add(count)
                .ok_or(RenderError::new(ErrorCode::InvalidArgument, "draw"))?;
            if last > vb.len() {
                return Err(RenderError::new(ErrorCode::InvalidArgument, "draw"));
            }
            None
        };

        if primitive.needs_vertex_transform() {
            if indexed {
                // Indices may reference any vertex
                vb.transform_all(
                    &self.state.model_view_projection,
                    &self.state.viewport,
                    self.perspective_correct,
                );
            } else {
                vb.transform_range(
                    first,
                    count,
                    &self.state.model_view_projection,
                    &self.state.viewport,
                    self.perspective_correct,
                )?;
            }
        }

        let texture = match self.state.bound_texture {
            Some(id) => {
                let tex = self
                    .textures
                    .get(id.0)
                    .ok_or(RenderError::new(ErrorCode::InvalidId, "draw"))?;
                tex.has_data().then_some(tex)
            }
            None => None,
        };

        dispatch_draw(
            fb,
            &self.state,
            &mut self.scratch,
            &mut self.flat_texture,
            texture,
            self.perspective_correct,
            primitive,
            vb,
            ib,
            count,
            first,
        )
    }

    // --- screen-space utilities --- //

    pub fn draw_screen_point(&mut self, x: i32, y: i32) {
        let result = match self.bound_frame_buffer_mut() {
            Ok((fb, state)) => raster::screenspace_point(fb, state, x, y),
            Err(e) => Err(e),
        };
        self.errors.check(result);
    }

    pub fn draw_screen_line(&mut self, x1: i32, y1: i32, x2: i32, y2: i32) {
        let result = match self.bound_frame_buffer_mut() {
            Ok((fb, state)) => raster::screenspace_line(fb, state, x1, y1, x2, y2),
            Err(e) => Err(e),
        };
        self.errors.check(result);
    }

    /// Fills a screen-space rectangle with the bound texture (black texels
    /// transparent) or, with no texture bound, the draw color.
    pub fn draw_screen_image(&mut self, left: i32, top: i32, right: i32, bottom: i32) {
        let result = (|| {
            let fb_id = self.state.bound_frame_buffer.ok_or(RenderError::new(
                ErrorCode::InvalidState,
                "draw_screen_image: no framebuffer bound",
            ))?;
            let fb = self
                .frame_buffers
                .get_mut(fb_id.0)
                .ok_or(RenderError::new(ErrorCode::InvalidId, "draw_screen_image"))?;

            let texture = match self.state.bound_texture {
                Some(id) => self.textures.get(id.0).filter(|t| t.has_data()),
                None => None,
            };

            raster::screenspace_image(fb, texture, &self.state, left, top, right, bottom)
        })();
        self.errors.check(result);
    }

    fn bound_frame_buffer_mut(&mut self) -> RenderResult<(&mut FrameBuffer, &RenderState)> {
        let fb_id = self
            .state
            .bound_frame_buffer
            .ok_or(RenderError::new(ErrorCode::InvalidState, "no framebuffer bound"))?;
        let fb = self
            .frame_buffers
            .get_mut(fb_id.0)
            .ok_or(RenderError::new(ErrorCode::InvalidId, "framebuffer"))?;
        Ok((fb, &self.state))
    }

    // --- immediate mode --- //

    pub fn begin(&mut self, primitive: Primitive) {
        if self.imm_active {
            self.errors
                .record(RenderError::new(ErrorCode::InvalidState, "begin: already active"));
            return;
        }
        self.imm_active = true;
        self.imm_primitive = primitive;
        self.imm_count = 0;
    }

    pub fn end(&mut self) {
        if !self.imm_active {
            self.errors
                .record(RenderError::new(ErrorCode::InvalidState, "end: not active"));
            return;
        }
        let result = self.imm_flush();
        self.errors.check(result);
        self.imm_active = false;
    }

    /// Sets the texture coordinate of the pending vertex.
    pub fn tex_coord2f(&mut self, u: f32, v: f32) {
        self.imm_buffer.vertex_mut(self.imm_count).tex_coord = Vec2::new(u, v);
    }

    /// Sets the color of the pending vertex.
    pub fn color3b(&mut self, r: u8, g: u8, b: u8) {
        self.imm_buffer.vertex_mut(self.imm_count).color =
            Some(crate::color::color_to_index(r, g, b));
    }

    pub fn vertex4f(&mut self, x: f32, y: f32, z: f32, w: f32) {
        self.imm_buffer.vertex_mut(self.imm_count).coord = Vec4::new(x, y, z, w);
        self.imm_count += 1;

        // Flush when full; for triangles, flush early on a whole-triangle
        // boundary so a primitive never straddles two flushes
        if self.imm_count >= IMMEDIATE_VERTEX_CAPACITY {
            let result = self.imm_flush();
            self.errors.check(result);
        }
        if self.imm_primitive == Primitive::Triangles
            && self.imm_count + 3 >= IMMEDIATE_VERTEX_CAPACITY
            && self.imm_count % 3 == 0
        {
            let result = self.imm_flush();
            self.errors.check(result);
        }
    }

    pub fn vertex3f(&mut self, x: f32, y: f32, z: f32) {
        self.vertex4f(x, y, z, 1.0);
    }

    pub fn vertex2f(&mut self, x: f32, y: f32) {
        self.vertex4f(x, y, 0.0, 1.0);
    }

    fn imm_flush(&mut self) -> RenderResult<()> {
        if self.imm_count == 0 {
            return Ok(());
        }
        let count = std::mem::take(&mut self.imm_count);

        let fb_id = self
            .state
            .bound_frame_buffer
            .ok_or(RenderError::new(ErrorCode::InvalidState, "immediate draw: no framebuffer"))?;
        let fb = self
            .frame_buffers
            .get_mut(fb_id.0)
            .ok_or(RenderError::new(ErrorCode::InvalidId, "immediate draw"))?;

        if self.imm_primitive.needs_vertex_transform() {
            self.imm_buffer.transform_range(
                0,
                count,
                &self.state.model_view_projection,
                &self.state.viewport,
                self.perspective_correct,
            )?;
        }

        let texture = match self.state.bound_texture {
            Some(id) => {
                let tex = self
                    .textures
                    .get(id.0)
                    .ok_or(RenderError::new(ErrorCode::InvalidId, "immediate draw"))?;
                tex.has_data().then_some(tex)
            }
            None => None,
        };

        dispatch_draw(
            fb,
            &self.state,
            &mut self.scratch,
            &mut self.flat_texture,
            texture,
            self.perspective_correct,
            self.imm_primitive,
            &self.imm_buffer,
            None,
            count,
            0,
        )
    }

    // --- presentation --- //

    /// Resolves the bound framebuffer through the palette into an RGBA8
    /// staging buffer for the platform blit.
    pub fn present(&mut self) -> Option<&[u8]> {
        let fb_id = match self.state.bound_frame_buffer {
            Some(id) => id,
            None => {
                self.errors
                    .record(RenderError::new(ErrorCode::InvalidState, "present: no framebuffer"));
                return None;
            }
        };
        let fb = match self.frame_buffers.get(fb_id.0) {
            Some(fb) => fb,
            None => {
                self.errors.record(RenderError::new(ErrorCode::InvalidId, "present"));
                return None;
            }
        };

        fb.resolve_rgba(&self.palette, &mut self.blit);
        Some(&self.blit)
    }

    /// Read access to a framebuffer's pixels (tests, screenshots).
    pub fn frame_buffer(&self, id: FrameBufferId) -> Option<&FrameBuffer> {
        self.frame_buffers.get(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::color_to_index;

    /// Context with a bound 8x8 framebuffer and full viewport.
    fn ready_context() -> (RenderContext, FrameBufferId) {
        let mut ctx = RenderContext::new();
        let fb = ctx.create_frame_buffer(8, 8).unwrap();
        ctx.bind_frame_buffer(Some(fb));
        ctx.set_viewport(0, 0, 8, 8);
        ctx.set_depth_clip(0.001, 100.0);
        assert_eq!(ctx.last_error(), ErrorCode::None);
        (ctx, fb)
    }

    fn red_pixels(ctx: &RenderContext, fb: FrameBufferId) -> usize {
        let red = color_to_index(255, 0, 0);
        ctx.frame_buffer(fb)
            .unwrap()
            .pixels()
            .iter()
            .filter(|px| px.color == red)
            .count()
    }

    #[test]
    fn test_draw_without_framebuffer_is_recorded() {
        let mut ctx = RenderContext::new();
        ctx.draw(Primitive::Triangles, 3, 0);
        assert_eq!(ctx.take_error(), ErrorCode::InvalidState);
    }

    #[test]
    fn test_draw_without_vertex_buffer_is_recorded() {
        let (mut ctx, _) = ready_context();
        ctx.draw(Primitive::Triangles, 3, 0);
        assert_eq!(ctx.take_error(), ErrorCode::NullPointer);
    }

    #[test]
    fn test_draw_range_validation() {
        let (mut ctx, _) = ready_context();
        let vb = ctx.create_vertex_buffer();
        ctx.vertex_buffer_data(vb, &[0.0; 12], &VertexLayout::positions());
        ctx.bind_vertex_buffer(Some(vb));

        ctx.draw(Primitive::Triangles, 6, 0);
        assert_eq!(ctx.take_error(), ErrorCode::InvalidArgument);

        ctx.draw(Primitive::Triangles, 3, 1);
        assert_eq!(ctx.take_error(), ErrorCode::None);
    }

    #[test]
    fn test_stale_handle_reports_invalid_id() {
        let (mut ctx, _) = ready_context();
        let vb = ctx.create_vertex_buffer();
        ctx.delete_vertex_buffer(vb);
        assert_eq!(ctx.last_error(), ErrorCode::None);

        ctx.vertex_buffer_data(vb, &[0.0; 3], &VertexLayout::positions());
        assert_eq!(ctx.take_error(), ErrorCode::InvalidId);

        ctx.bind_vertex_buffer(Some(vb));
        assert_eq!(ctx.take_error(), ErrorCode::InvalidId);
    }

    #[test]
    fn test_delete_bound_resource_records_invalid_state() {
        let (mut ctx, fb) = ready_context();
        ctx.delete_frame_buffer(fb);
        assert_eq!(ctx.take_error(), ErrorCode::InvalidState);

        // The binding is gone: drawing now reports no framebuffer
        ctx.draw_screen_point(0, 0);
        assert_eq!(ctx.take_error(), ErrorCode::InvalidState);
    }

    #[test]
    fn test_indexed_draw_rejects_out_of_range_index() {
        let (mut ctx, fb) = ready_context();

        let vb = ctx.create_vertex_buffer();
        ctx.vertex_buffer_data(vb, &[0.0; 9], &VertexLayout::positions());
        ctx.bind_vertex_buffer(Some(vb));

        let ib = ctx.create_index_buffer();
        ctx.index_buffer_data(ib, &[0, 1, 7]);
        ctx.bind_index_buffer(Some(ib));

        ctx.set_draw_color(255, 0, 0);
        ctx.draw_indexed(Primitive::Triangles, 3, 0);

        // Fatal, and nothing was rasterized
        assert_eq!(ctx.take_error(), ErrorCode::Fatal);
        assert_eq!(red_pixels(&ctx, fb), 0);
    }

    #[test]
    fn test_triangle_draw_writes_pixels() {
        let (mut ctx, fb) = ready_context();
        ctx.clear_frame_buffer(fb, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);

        let vb = ctx.create_vertex_buffer();
        #[rustfmt::skip]
        ctx.vertex_buffer_data(
            vb,
            &[-1.0, -1.0, 0.5,  1.0, -1.0, 0.5,  0.0, 1.0, 0.5],
            &VertexLayout::positions(),
        );
        ctx.bind_vertex_buffer(Some(vb));
        ctx.set_draw_color(255, 0, 0);

        ctx.draw(Primitive::Triangles, 3, 0);
        assert_eq!(ctx.last_error(), ErrorCode::None);
        assert!(red_pixels(&ctx, fb) > 0);
    }

    #[test]
    fn test_immediate_mode_state_errors() {
        let (mut ctx, _) = ready_context();

        ctx.end();
        assert_eq!(ctx.take_error(), ErrorCode::InvalidState);

        ctx.begin(Primitive::Triangles);
        ctx.begin(Primitive::Points);
        assert_eq!(ctx.take_error(), ErrorCode::InvalidState);

        ctx.end();
        assert_eq!(ctx.last_error(), ErrorCode::None);
    }

    #[test]
    fn test_immediate_mode_draws_triangle() {
        let (mut ctx, fb) = ready_context();
        ctx.clear_frame_buffer(fb, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
        ctx.set_draw_color(255, 0, 0);

        ctx.begin(Primitive::Triangles);
        ctx.vertex3f(0.0, 1.0, 0.5);
        ctx.vertex3f(1.0, -0.8, 0.5);
        ctx.vertex3f(-1.0, -0.8, 0.5);
        ctx.end();

        assert_eq!(ctx.last_error(), ErrorCode::None);
        assert!(red_pixels(&ctx, fb) > 0);
    }

    #[test]
    fn test_immediate_mode_flushes_on_triangle_boundary() {
        let (mut ctx, fb) = ready_context();
        ctx.clear_frame_buffer(fb, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
        ctx.set_draw_color(255, 0, 0);

        ctx.begin(Primitive::Triangles);
        // 30 vertices: 10 triangles; at vertex 30 the early-flush rule
        // (30 % 3 == 0 and 30 + 3 >= 32) kicks in before end()
        for _ in 0..10 {
            ctx.vertex3f(0.0, 1.0, 0.5);
            ctx.vertex3f(1.0, -0.8, 0.5);
            ctx.vertex3f(-1.0, -0.8, 0.5);
        }
        assert!(red_pixels(&ctx, fb) > 0, "expected early flush before end()");
        ctx.end();
        assert_eq!(ctx.last_error(), ErrorCode::None);
    }

    #[test]
    fn test_present_maps_through_palette() {
        let (mut ctx, fb) = ready_context();
        ctx.set_clear_color(255, 255, 255);
        ctx.clear_frame_buffer(fb, 0.0, ClearFlags::COLOR);

        let rgba = ctx.present().unwrap();
        assert_eq!(rgba.len(), 8 * 8 * 4);
        assert_eq!(&rgba[..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_scissor_limits_fill() {
        let (mut ctx, fb) = ready_context();
        ctx.clear_frame_buffer(fb, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
        ctx.set_draw_color(255, 0, 0);

        let vb = ctx.create_vertex_buffer();
        #[rustfmt::skip]
        ctx.vertex_buffer_data(
            vb,
            &[
                -1.0, -1.0, 0.5,  1.0, -1.0, 0.5,  -1.0, 1.0, 0.5,
                1.0, -1.0, 0.5,  1.0, 1.0, 0.5,  -1.0, 1.0, 0.5,
            ],
            &VertexLayout::positions(),
        );
        ctx.bind_vertex_buffer(Some(vb));

        // Full-screen quad without scissor
        ctx.draw(Primitive::Triangles, 6, 0);
        let full = red_pixels(&ctx, fb);

        ctx.clear_frame_buffer(fb, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
        ctx.enable(Capability::Scissor);
        ctx.set_scissor(2, 2, 4, 4);
        ctx.draw(Primitive::Triangles, 6, 0);
        let clipped = red_pixels(&ctx, fb);

        assert!(clipped < full);
        assert!(clipped > 0);
        assert!(clipped <= 5 * 5, "scissor area exceeded: {}", clipped);
    }

    #[test]
    fn test_screen_image_flat_fill() {
        let (mut ctx, fb) = ready_context();
        ctx.clear_frame_buffer(fb, 0.0, ClearFlags::COLOR);
        ctx.set_draw_color(255, 0, 0);

        ctx.draw_screen_image(0, 0, 7, 7);
        assert_eq!(ctx.last_error(), ErrorCode::None);
        assert_eq!(red_pixels(&ctx, fb), 64);
    }

    #[test]
    fn test_geometry_stream_draw() {
        // Vertex block + index block, then an indexed draw
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u16.to_le_bytes());
        #[rustfmt::skip]
        let verts = [
            -1.0f32, -1.0, 0.5, 0.0, 0.0,
            1.0, -1.0, 0.5, 1.0, 0.0,
            0.0, 1.0, 0.5, 0.5, 1.0,
        ];
        for f in verts {
            bytes.extend_from_slice(&f.to_le_bytes());
        }
        bytes.extend_from_slice(&3u16.to_le_bytes());
        for i in [0u16, 1, 2] {
            bytes.extend_from_slice(&i.to_le_bytes());
        }

        let (mut ctx, fb) = ready_context();
        ctx.clear_frame_buffer(fb, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);

        let mut cursor = std::io::Cursor::new(bytes);
        let vb = ctx.create_vertex_buffer();
        let ib = ctx.create_index_buffer();
        assert_eq!(ctx.vertex_buffer_data_from_reader(vb, &mut cursor), Some(3));
        assert_eq!(ctx.index_buffer_data_from_reader(ib, &mut cursor), Some(3));

        ctx.bind_vertex_buffer(Some(vb));
        ctx.bind_index_buffer(Some(ib));
        ctx.set_draw_color(255, 0, 0);
        ctx.draw_indexed(Primitive::Triangles, 3, 0);

        assert_eq!(ctx.last_error(), ErrorCode::None);
        assert!(red_pixels(&ctx, fb) > 0);
    }
}
