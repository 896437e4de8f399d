//! Render state machine
//!
//! One mutable bag of state per context: transform matrices with their
//! derived composites, the viewport mapping, the integer clip rectangles,
//! resource bindings, draw/clear colors and the capability flags. Setters
//! keep the derived state (composite matrices, effective clip rect)
//! consistent whenever an input changes.

use crate::color::{color_to_index, ColorIndex};
use crate::context::{FrameBufferId, IndexBufferId, TextureId, VertexBufferId};
use crate::error::{ErrorCode, RenderError, RenderResult};
use crate::math::Mat4;

/// Axis-aligned integer rectangle (inclusive edges).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }
}

/// Viewport mapping from NDC to screen space. Half extents are stored so the
/// per-vertex transform needs a single multiply; the half-height is negative
/// to fold the vertical flip (top-left origin) into that multiply.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub half_width: f32,
    pub half_height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
    pub depth_size: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            half_width: 0.0,
            half_height: 0.0,
            min_depth: 0.0,
            max_depth: 1.0,
            depth_size: 1.0,
        }
    }
}

impl Viewport {
    pub fn set_rect(&mut self, x: i32, y: i32, width: i32, height: i32, fb_height: i32) {
        self.x = x as f32;
        self.y = (fb_height - 1 - y) as f32;
        self.half_width = 0.5 * width as f32;
        self.half_height = -0.5 * height as f32;
    }

    pub fn set_depth_range(&mut self, min_depth: f32, max_depth: f32) {
        self.min_depth = min_depth;
        self.max_depth = max_depth;
        self.depth_size = max_depth - min_depth;
    }
}

/// Togglable pipeline capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Scissor = 0,
    MipMapping = 1,
}

const NUM_CAPABILITIES: usize = 2;

/// Which polygon facing gets discarded by the cull test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

/// How polygons are rasterized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

/// The mutable per-context render state.
#[derive(Debug)]
pub struct RenderState {
    pub projection: Mat4,
    pub view: Mat4,
    pub model: Mat4,
    pub view_projection: Mat4,
    pub model_view: Mat4,
    pub model_view_projection: Mat4,

    pub viewport: Viewport,

    pub viewport_rect: Rect,
    pub scissor_rect: Rect,
    pub clip_rect: Rect,

    pub bound_frame_buffer: Option<FrameBufferId>,
    pub bound_vertex_buffer: Option<VertexBufferId>,
    pub bound_index_buffer: Option<IndexBufferId>,
    pub bound_texture: Option<TextureId>,

    pub clear_color: ColorIndex,
    pub draw_color: ColorIndex,
    pub lod_bias: u8,

    pub cull_mode: CullMode,
    pub polygon_mode: PolygonMode,

    /// Z-plane clip range used by the clipping stage, normally matching the
    /// active projection's near/far planes.
    pub depth_clip: (f32, f32),

    capabilities: [bool; NUM_CAPABILITIES],
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            model_view: Mat4::IDENTITY,
            model_view_projection: Mat4::IDENTITY,
            viewport: Viewport::default(),
            viewport_rect: Rect::default(),
            scissor_rect: Rect::default(),
            clip_rect: Rect::default(),
            bound_frame_buffer: None,
            bound_vertex_buffer: None,
            bound_index_buffer: None,
            bound_texture: None,
            clear_color: color_to_index(0, 0, 0),
            draw_color: color_to_index(0, 0, 0),
            lod_bias: 0,
            cull_mode: CullMode::None,
            polygon_mode: PolygonMode::Fill,
            depth_clip: (1.0, 100.0),
            capabilities: [false; NUM_CAPABILITIES],
        }
    }
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }

    // --- capabilities --- //

    pub fn set_capability(&mut self, cap: Capability, enabled: bool, fb_size: Option<(u32, u32)>) {
        self.capabilities[cap as usize] = enabled;
        if cap == Capability::Scissor {
            self.update_clip_rect(fb_size);
        }
    }

    pub fn capability(&self, cap: Capability) -> bool {
        self.capabilities[cap as usize]
    }

    pub fn set_lod_bias(&mut self, value: i32) {
        self.lod_bias = value.clamp(0, 255) as u8;
    }

    // --- bindings / rectangles --- //

    /// Binds (or unbinds) a framebuffer and resets the clip rect to cover it.
    pub fn bind_frame_buffer(&mut self, id: Option<FrameBufferId>, size: Option<(u32, u32)>) {
        self.bound_frame_buffer = id;
        match size {
            Some((w, h)) => self.store_clip_rect(0, 0, w as i32 - 1, h as i32 - 1, Some(h)),
            None => self.store_clip_rect(0, 0, 0, 0, None),
        }
    }

    pub fn set_viewport(
        &mut self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        fb_size: Option<(u32, u32)>,
    ) -> RenderResult<()> {
        let (_, fb_height) = fb_size.ok_or(RenderError::new(ErrorCode::InvalidState, "viewport"))?;

        self.viewport.set_rect(x, y, width, height, fb_height as i32);

        self.viewport_rect = Rect::new(x, y, x + width, y + height);
        self.update_clip_rect(fb_size);
        Ok(())
    }

    pub fn set_depth_range(&mut self, min_depth: f32, max_depth: f32) {
        self.viewport.set_depth_range(min_depth, max_depth);
    }

    pub fn set_scissor(&mut self, x: i32, y: i32, width: i32, height: i32, fb_size: Option<(u32, u32)>) {
        self.scissor_rect = Rect::new(x, y, x + width, y + height);
        if self.capability(Capability::Scissor) {
            self.update_clip_rect(fb_size);
        }
    }

    pub fn set_depth_clip(&mut self, near: f32, far: f32) -> RenderResult<()> {
        if !(near > 0.0) || !(far > near) {
            return Err(RenderError::new(ErrorCode::InvalidArgument, "depth_clip"));
        }
        self.depth_clip = (near, far);
        Ok(())
    }

    /// Stores the clip rect, flipping top/bottom into the bottom-up pixel
    /// rows when the framebuffer height is known.
    fn store_clip_rect(&mut self, left: i32, top: i32, right: i32, bottom: i32, fb_height: Option<u32>) {
        self.clip_rect.left = left;
        self.clip_rect.right = right;
        match fb_height {
            Some(h) => {
                self.clip_rect.top = h as i32 - bottom - 1;
                self.clip_rect.bottom = h as i32 - top - 1;
            }
            None => {
                self.clip_rect.top = top;
                self.clip_rect.bottom = bottom;
            }
        }
    }

    /// Recomputes clip rect = viewport rect ∩ scissor rect (when enabled),
    /// clamped to the framebuffer bounds.
    fn update_clip_rect(&mut self, fb_size: Option<(u32, u32)>) {
        let Some((fb_width, fb_height)) = fb_size else {
            return;
        };

        let mut left = self.viewport_rect.left;
        let mut top = self.viewport_rect.top;
        let mut right = self.viewport_rect.right;
        let mut bottom = self.viewport_rect.bottom;

        if self.capability(Capability::Scissor) {
            left = left.max(self.scissor_rect.left);
            top = top.max(self.scissor_rect.top);
            right = right.min(self.scissor_rect.right);
            bottom = bottom.min(self.scissor_rect.bottom);
        }

        let max_x = fb_width as i32 - 1;
        let max_y = fb_height as i32 - 1;

        self.store_clip_rect(
            left.clamp(0, max_x),
            top.clamp(0, max_y),
            right.clamp(0, max_x),
            bottom.clamp(0, max_y),
            Some(fb_height),
        );
    }

    pub fn set_cull_mode(&mut self, mode: CullMode) {
        self.cull_mode = mode;
    }

    pub fn set_polygon_mode(&mut self, mode: PolygonMode) {
        self.polygon_mode = mode;
    }

    pub fn set_clear_color(&mut self, r: u8, g: u8, b: u8) {
        self.clear_color = color_to_index(r, g, b);
    }

    pub fn set_draw_color(&mut self, r: u8, g: u8, b: u8) {
        self.draw_color = color_to_index(r, g, b);
    }

    // --- matrices --- //

    pub fn set_projection_matrix(&mut self, matrix: Mat4) {
        self.projection = matrix;
        self.update_view_projection();
        self.update_model_view_projection();
    }

    pub fn set_view_matrix(&mut self, matrix: Mat4) {
        self.view = matrix;
        self.update_view_projection();
        self.update_model_view();
        self.update_model_view_projection();
    }

    pub fn set_model_matrix(&mut self, matrix: Mat4) {
        self.model = matrix;
        self.update_model_view();
        self.update_model_view_projection();
    }

    fn update_view_projection(&mut self) {
        self.view_projection = self.projection * self.view;
    }

    fn update_model_view(&mut self) {
        self.model_view = self.view * self.model;
    }

    fn update_model_view_projection(&mut self) {
        self.model_view_projection = self.view_projection * self.model;
    }
}
