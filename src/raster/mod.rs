//! The rasterization pipeline
//!
//! Draw paths pull everything they need from the render state: triangles are
//! transformed to clip space, z-clipped, projected, culled, clipped against
//! the clip rect and scanline-filled with a per-pixel depth test. Points and
//! lines reuse the screen coordinates produced by the vertex-buffer
//! transform pass.

mod clip;
mod line;

pub use clip::{ClipScratch, ClipVertex, RasterVertex, MAX_POLYGON_VERTS};

use crate::error::{RenderError, RenderResult};
use crate::framebuffer::{depth_from_z, FrameBuffer, Side};
use crate::geometry::{IndexBuffer, Vertex, VertexBuffer};
use crate::math::approx;
use crate::state::{Capability, CullMode, PolygonMode, RenderState};
use crate::texture::{sample_nearest, Texture};

fn index_inc(i: usize, n: usize) -> usize {
    if i + 1 >= n {
        0
    } else {
        i + 1
    }
}

fn index_dec(i: usize, n: usize) -> usize {
    if i == 0 {
        n - 1
    } else {
        i - 1
    }
}

/// Model space -> clip space, carrying the texture coordinate along.
fn transform_to_clip(vertex: &Vertex, state: &RenderState) -> ClipVertex {
    let clip = state.model_view_projection.transform_vec4(vertex.coord);
    ClipVertex {
        x: clip.x,
        y: clip.y,
        z: clip.z,
        w: clip.w,
        u: vertex.tex_coord.x,
        v: vertex.tex_coord.y,
    }
}

/// Perspective divide + viewport mapping, in place. Afterwards x/y are
/// screen coordinates and z holds 1/w; u/v are premultiplied by 1/w when
/// perspective correction is on.
fn project_vertex(v: &mut ClipVertex, state: &RenderState, perspective_correct: bool) {
    let rhw = 1.0 / v.w;

    v.x *= rhw;
    v.y *= rhw;
    v.z = rhw;

    v.x = state.viewport.x + (v.x + 1.0) * state.viewport.half_width + 0.5;
    v.y = state.viewport.y + (v.y + 1.0) * state.viewport.half_height + 0.5;

    if perspective_correct {
        v.u *= rhw;
        v.v *= rhw;
    }
}

/// Signed-area facing test on the first three projected vertices.
fn is_triangle_culled(a: &ClipVertex, b: &ClipVertex, c: &ClipVertex, mode: CullMode) -> bool {
    if mode == CullMode::None {
        return false;
    }
    let vis = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
    match mode {
        CullMode::Front => vis > 0.0,
        CullMode::Back => vis < 0.0,
        CullMode::None => false,
    }
}

/// Runs the loaded polygon through z clip, projection, cull and xy clip.
/// Returns false when nothing is left to rasterize.
fn clip_and_project(
    scratch: &mut ClipScratch,
    state: &RenderState,
    perspective_correct: bool,
) -> RenderResult<bool> {
    let (z_near, z_far) = state.depth_clip;
    scratch.clip_z(z_near, z_far)?;
    if scratch.count() < 3 {
        return Ok(false);
    }

    for v in scratch.clip_vertices_mut() {
        project_vertex(v, state, perspective_correct);
    }

    // Cull once per polygon, before the screen-space clip
    let cv = scratch.clip_vertices();
    if is_triangle_culled(&cv[0], &cv[1], &cv[2], state.cull_mode) {
        return Ok(false);
    }

    scratch.project_to_raster();
    scratch.clip_xy(state.clip_rect)?;

    Ok(scratch.count() >= 3)
}

/// Mip level for the whole polygon, derived from its nearest vertex.
fn compute_polygon_mip_level(texture: &Texture, scratch: &ClipScratch, state: &RenderState) -> u8 {
    if !state.capability(Capability::MipMapping) || texture.mips() == 0 {
        return 0;
    }

    let raster = scratch.raster_vertices();
    let mut z_min = raster[0].z;
    for v in &raster[1..] {
        if v.z < z_min {
            z_min = v.z;
        }
    }

    let level = approx::int_log2((0.25 / z_min) as f32);
    level.clamp(0, texture.mips() as i32 - 1) as u8
}

fn rasterize_polygon_fill(
    fb: &mut FrameBuffer,
    texture: &Texture,
    mip_level: u8,
    state: &RenderState,
    scratch: &ClipScratch,
    perspective_correct: bool,
) {
    let (texels, mip_width, mip_height) = texture.select_mip_level(mip_level, state.lod_bias as i32);

    let raster = scratch.raster_vertices();
    let n = raster.len();

    // Topmost and bottommost vertex by linear scan
    let (mut top, mut bottom) = (0, 0);
    for i in 1..n {
        if raster[top].y > raster[i].y {
            top = i;
        }
        if raster[bottom].y < raster[i].y {
            bottom = i;
        }
    }

    // Walk the boundary both ways, building one side table per direction
    let mut x = top;
    let mut y = index_dec(top, n);
    while x != bottom {
        fb.setup_scanlines(Side::Left, raster[x], raster[y]);
        x = y;
        y = index_dec(y, n);
    }

    let mut x = top;
    let mut y = index_inc(top, n);
    while x != bottom {
        fb.setup_scanlines(Side::Right, raster[x], raster[y]);
        x = y;
        y = index_inc(y, n);
    }

    let y_start = raster[top].y;
    let y_end = raster[bottom].y;

    let (pixels, start_side, end_side) = fb.fill_parts();

    // The leading edge may sit on the right; compare at the middle row
    let mid = ((y_start + y_end) / 2) as usize;
    let (left, right) = if start_side[mid].offset > end_side[mid].offset {
        (end_side, start_side)
    } else {
        (start_side, end_side)
    };

    for y in y_start..=y_end {
        let row = y as usize;
        let len = right[row].offset - left[row].offset;
        if len <= 0 {
            continue;
        }

        let z_step = (right[row].z - left[row].z) / len as f64;
        let u_step = (right[row].u - left[row].u) / len as f64;
        let v_step = (right[row].v - left[row].v) / len as f64;

        let mut offset = left[row].offset;
        let mut z_act = left[row].z;
        let mut u_act = left[row].u;
        let mut v_act = left[row].v;

        // len + 1 pixels, both boundary columns included
        let mut remaining = len;
        while remaining >= 0 {
            let Some(pixel) = pixels.get_mut(offset as usize) else {
                break;
            };

            let depth = depth_from_z(z_act);
            if depth > pixel.depth {
                pixel.depth = depth;

                let (u, v) = if perspective_correct {
                    // Recover w and undo the premultiplication
                    let w = 1.0 / z_act;
                    (u_act * w, v_act * w)
                } else {
                    (u_act, v_act)
                };

                pixel.color = sample_nearest(texels, mip_width, mip_height, u as f32, v as f32);
            }

            offset += 1;
            z_act += z_step;
            u_act += u_step;
            v_act += v_step;
            remaining -= 1;
        }
    }
}

fn rasterize_polygon_line(
    fb: &mut FrameBuffer,
    texture: &Texture,
    mip_level: u8,
    state: &RenderState,
    scratch: &ClipScratch,
) {
    let (texels, mip_width, mip_height) = texture.select_mip_level(mip_level, state.lod_bias as i32);
    let raster = scratch.raster_vertices();

    for i in 0..raster.len() - 1 {
        line::line_textured(fb, texels, mip_width, mip_height, &raster[i], &raster[i + 1]);
    }
    line::line_textured(fb, texels, mip_width, mip_height, &raster[raster.len() - 1], &raster[0]);
}

fn rasterize_polygon_point(fb: &mut FrameBuffer, state: &RenderState, scratch: &ClipScratch) {
    for v in scratch.raster_vertices() {
        fb.plot(v.x, v.y, state.draw_color);
    }
}

fn rasterize_polygon(
    fb: &mut FrameBuffer,
    texture: &Texture,
    mip_level: u8,
    state: &RenderState,
    scratch: &ClipScratch,
    perspective_correct: bool,
) {
    match state.polygon_mode {
        PolygonMode::Fill => {
            rasterize_polygon_fill(fb, texture, mip_level, state, scratch, perspective_correct)
        }
        PolygonMode::Line => rasterize_polygon_line(fb, texture, mip_level, state, scratch),
        PolygonMode::Point => rasterize_polygon_point(fb, state, scratch),
    }
}

/// Transforms one triangle, then clips and rasterizes it.
fn draw_triangle(
    fb: &mut FrameBuffer,
    texture: &Texture,
    state: &RenderState,
    scratch: &mut ClipScratch,
    perspective_correct: bool,
    a: &Vertex,
    b: &Vertex,
    c: &Vertex,
) -> RenderResult<()> {
    scratch.load(&[
        transform_to_clip(a, state),
        transform_to_clip(b, state),
        transform_to_clip(c, state),
    ])?;

    if clip_and_project(scratch, state, perspective_correct)? {
        let mip_level = compute_polygon_mip_level(texture, scratch, state);
        rasterize_polygon(fb, texture, mip_level, state, scratch, perspective_correct);
    }
    Ok(())
}

// --- triangles --- //

pub fn render_triangles(
    fb: &mut FrameBuffer,
    texture: &Texture,
    state: &RenderState,
    scratch: &mut ClipScratch,
    perspective_correct: bool,
    vertex_buffer: &VertexBuffer,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    let mut i = first;
    while i + 2 < first + count {
        draw_triangle(
            fb,
            texture,
            state,
            scratch,
            perspective_correct,
            &verts[i],
            &verts[i + 1],
            &verts[i + 2],
        )?;
        i += 3;
    }
    Ok(())
}

pub fn render_triangle_strip(
    fb: &mut FrameBuffer,
    texture: &Texture,
    state: &RenderState,
    scratch: &mut ClipScratch,
    perspective_correct: bool,
    vertex_buffer: &VertexBuffer,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    for i in 0..count.saturating_sub(2) {
        let (a, b, c) = (&verts[first + i], &verts[first + i + 1], &verts[first + i + 2]);
        // Swap every other triangle to keep a consistent winding
        let (b, c) = if i % 2 == 1 { (c, b) } else { (b, c) };
        draw_triangle(fb, texture, state, scratch, perspective_correct, a, b, c)?;
    }
    Ok(())
}

pub fn render_triangle_fan(
    fb: &mut FrameBuffer,
    texture: &Texture,
    state: &RenderState,
    scratch: &mut ClipScratch,
    perspective_correct: bool,
    vertex_buffer: &VertexBuffer,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    for i in 0..count.saturating_sub(2) {
        draw_triangle(
            fb,
            texture,
            state,
            scratch,
            perspective_correct,
            &verts[first],
            &verts[first + i + 1],
            &verts[first + i + 2],
        )?;
    }
    Ok(())
}

pub fn render_indexed_triangles(
    fb: &mut FrameBuffer,
    texture: &Texture,
    state: &RenderState,
    scratch: &mut ClipScratch,
    perspective_correct: bool,
    vertex_buffer: &VertexBuffer,
    index_buffer: &IndexBuffer,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    let indices = index_buffer.indices();
    let mut i = first;
    while i + 2 < first + count {
        draw_triangle(
            fb,
            texture,
            state,
            scratch,
            perspective_correct,
            &verts[indices[i] as usize],
            &verts[indices[i + 1] as usize],
            &verts[indices[i + 2] as usize],
        )?;
        i += 3;
    }
    Ok(())
}

pub fn render_indexed_triangle_strip(
    fb: &mut FrameBuffer,
    texture: &Texture,
    state: &RenderState,
    scratch: &mut ClipScratch,
    perspective_correct: bool,
    vertex_buffer: &VertexBuffer,
    index_buffer: &IndexBuffer,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    let indices = index_buffer.indices();
    for i in 0..count.saturating_sub(2) {
        let a = &verts[indices[first + i] as usize];
        let b = &verts[indices[first + i + 1] as usize];
        let c = &verts[indices[first + i + 2] as usize];
        let (b, c) = if i % 2 == 1 { (c, b) } else { (b, c) };
        draw_triangle(fb, texture, state, scratch, perspective_correct, a, b, c)?;
    }
    Ok(())
}

pub fn render_indexed_triangle_fan(
    fb: &mut FrameBuffer,
    texture: &Texture,
    state: &RenderState,
    scratch: &mut ClipScratch,
    perspective_correct: bool,
    vertex_buffer: &VertexBuffer,
    index_buffer: &IndexBuffer,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    let indices = index_buffer.indices();
    for i in 0..count.saturating_sub(2) {
        draw_triangle(
            fb,
            texture,
            state,
            scratch,
            perspective_correct,
            &verts[indices[first] as usize],
            &verts[indices[first + i + 1] as usize],
            &verts[indices[first + i + 2] as usize],
        )?;
    }
    Ok(())
}

// --- points --- //

/// Plots pre-transformed vertices, honoring per-vertex colors when present.
pub fn render_points(
    fb: &mut FrameBuffer,
    state: &RenderState,
    vertex_buffer: &VertexBuffer,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    for vert in &vertex_buffer.vertices()[first..first + count] {
        let color = vert.color.unwrap_or(state.draw_color);
        fb.plot(vert.ndc.x as i32, vert.ndc.y as i32, color);
    }
    Ok(())
}

pub fn render_indexed_points(
    fb: &mut FrameBuffer,
    state: &RenderState,
    vertex_buffer: &VertexBuffer,
    index_buffer: &IndexBuffer,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    for &index in &index_buffer.indices()[first..first + count] {
        let vert = &verts[index as usize];
        let color = vert.color.unwrap_or(state.draw_color);
        fb.plot(vert.ndc.x as i32, vert.ndc.y as i32, color);
    }
    Ok(())
}

// --- lines --- //

fn draw_vertex_line(
    fb: &mut FrameBuffer,
    texture: Option<&Texture>,
    state: &RenderState,
    a: &Vertex,
    b: &Vertex,
    first_err: &mut Option<RenderError>,
) {
    match texture {
        Some(tex) => {
            let (texels, w, h) = tex.select_mip_level(0, state.lod_bias as i32);
            let ra = RasterVertex {
                x: a.ndc.x as i32,
                y: a.ndc.y as i32,
                z: a.ndc.z as f64,
                u: a.inv_tex_coord.x as f64,
                v: a.inv_tex_coord.y as f64,
            };
            let rb = RasterVertex {
                x: b.ndc.x as i32,
                y: b.ndc.y as i32,
                z: b.ndc.z as f64,
                u: b.inv_tex_coord.x as f64,
                v: b.inv_tex_coord.y as f64,
            };
            line::line_textured(fb, texels, w, h, &ra, &rb);
        }
        None => {
            let result = line::line_colored(
                fb,
                a.ndc.x as i32,
                a.ndc.y as i32,
                b.ndc.x as i32,
                b.ndc.y as i32,
                state.draw_color,
            );
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
    }
}

/// Draws vertex pairs as separate lines. A line with an endpoint outside
/// the framebuffer reports an error but does not stop the remaining lines.
pub fn render_lines(
    fb: &mut FrameBuffer,
    texture: Option<&Texture>,
    state: &RenderState,
    vertex_buffer: &VertexBuffer,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    let mut first_err = None;

    let mut i = first;
    while i + 1 < first + count {
        draw_vertex_line(fb, texture, state, &verts[i], &verts[i + 1], &mut first_err);
        i += 2;
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub fn render_line_strip(
    fb: &mut FrameBuffer,
    texture: Option<&Texture>,
    state: &RenderState,
    vertex_buffer: &VertexBuffer,
    count: usize,
    first: usize,
    close_loop: bool,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    let mut first_err = None;

    for i in 0..count.saturating_sub(1) {
        draw_vertex_line(fb, texture, state, &verts[first + i], &verts[first + i + 1], &mut first_err);
    }
    if close_loop && count > 2 {
        draw_vertex_line(fb, texture, state, &verts[first + count - 1], &verts[first], &mut first_err);
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub fn render_indexed_lines(
    fb: &mut FrameBuffer,
    texture: Option<&Texture>,
    state: &RenderState,
    vertex_buffer: &VertexBuffer,
    index_buffer: &IndexBuffer,
    count: usize,
    first: usize,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    let indices = index_buffer.indices();
    let mut first_err = None;

    let mut i = first;
    while i + 1 < first + count {
        draw_vertex_line(
            fb,
            texture,
            state,
            &verts[indices[i] as usize],
            &verts[indices[i + 1] as usize],
            &mut first_err,
        );
        i += 2;
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

pub fn render_indexed_line_strip(
    fb: &mut FrameBuffer,
    texture: Option<&Texture>,
    state: &RenderState,
    vertex_buffer: &VertexBuffer,
    index_buffer: &IndexBuffer,
    count: usize,
    first: usize,
    close_loop: bool,
) -> RenderResult<()> {
    let verts = vertex_buffer.vertices();
    let indices = index_buffer.indices();
    let mut first_err = None;

    for i in 0..count.saturating_sub(1) {
        draw_vertex_line(
            fb,
            texture,
            state,
            &verts[indices[first + i] as usize],
            &verts[indices[first + i + 1] as usize],
            &mut first_err,
        );
    }
    if close_loop && count > 2 {
        draw_vertex_line(
            fb,
            texture,
            state,
            &verts[indices[first + count - 1] as usize],
            &verts[indices[first] as usize],
            &mut first_err,
        );
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// --- screen-space utilities --- //

/// Plots one point in screen coordinates (top-left origin).
pub fn screenspace_point(fb: &mut FrameBuffer, state: &RenderState, x: i32, y: i32) -> RenderResult<()> {
    let (w, h) = (fb.width() as i32, fb.height() as i32);
    if x < 0 || x >= w || y < 0 || y >= h {
        return Err(RenderError::new(crate::error::ErrorCode::InvalidArgument, "screen_point"));
    }

    let y = h - y - 1;
    fb.plot(x, y, state.draw_color);
    Ok(())
}

/// Draws one line in screen coordinates (top-left origin).
pub fn screenspace_line(
    fb: &mut FrameBuffer,
    state: &RenderState,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
) -> RenderResult<()> {
    let h = fb.height() as i32;
    line::line_colored(fb, x1, h - y1 - 1, x2, h - y2 - 1, state.draw_color)
}

/// Fills a screen-space rectangle, either sampling the given texture (with
/// index 0 treated as transparent) or with the flat draw color.
pub fn screenspace_image(
    fb: &mut FrameBuffer,
    texture: Option<&Texture>,
    state: &RenderState,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
) -> RenderResult<()> {
    let (w, h) = (fb.width() as i32, fb.height() as i32);

    let left = left.clamp(0, w - 1);
    let right = right.clamp(0, w - 1);
    let mut top = top.clamp(0, h - 1);
    let mut bottom = bottom.clamp(0, h - 1);

    // Top-left origin: flip into pixel rows
    top = h - top - 1;
    bottom = h - bottom - 1;

    let (top, bottom) = if top > bottom { (bottom, top) } else { (top, bottom) };
    let (left, right) = if left > right { (right, left) } else { (left, right) };

    match texture {
        Some(tex) => {
            let (texels, tw, th) = tex.select_mip_level(0, state.lod_bias as i32);

            let u_step = 1.0 / (right - left) as f32;
            let v_step = 1.0 / (bottom - top) as f32;
            let mut v = 1.0f32;

            for y in top..=bottom {
                let mut u = 0.0f32;
                for x in left..=right {
                    let color = sample_nearest(texels, tw, th, u, v);
                    // Black is transparent
                    if color != 0 {
                        fb.plot(x, y, color);
                    }
                    u += u_step;
                }
                v -= v_step;
            }
        }
        None => {
            for y in top..=bottom {
                for x in left..=right {
                    fb.plot(x, y, state.draw_color);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::color_to_index;
    use crate::framebuffer::ClearFlags;
    use crate::geometry::VertexLayout;
    use crate::math::Mat4;

    const RED: (u8, u8, u8) = (255, 0, 0);

    /// A ready-to-draw fixture: framebuffer, default state with a full
    /// viewport, and scratch buffers.
    struct Frame {
        fb: FrameBuffer,
        state: RenderState,
        scratch: ClipScratch,
        flat: Texture,
    }

    impl Frame {
        fn new(width: u32, height: u32) -> Self {
            let fb = FrameBuffer::new(width, height).unwrap();
            let mut state = RenderState::new();
            state
                .set_viewport(0, 0, width as i32, height as i32, Some((width, height)))
                .unwrap();
            // Geometry used here is already in clip-like space; keep the
            // near plane out of the way
            state.set_depth_clip(0.001, 100.0).unwrap();
            Self { fb, state, scratch: ClipScratch::new(), flat: Texture::flat() }
        }

        fn draw_triangles(&mut self, vb: &VertexBuffer, color: (u8, u8, u8)) {
            self.flat.set_flat_color(color_to_index(color.0, color.1, color.2));
            render_triangles(
                &mut self.fb,
                &self.flat,
                &self.state,
                &mut self.scratch,
                true,
                vb,
                vb.len(),
                0,
            )
            .unwrap();
        }
    }

    fn triangle_buffer(coords: &[f32]) -> VertexBuffer {
        let mut vb = VertexBuffer::new();
        vb.set_data(coords, &VertexLayout::positions()).unwrap();
        vb
    }

    #[test]
    fn test_fill_triangle_pixel_mask() {
        // 4x4 framebuffer, a triangle covering the lower-left half
        let mut frame = Frame::new(4, 4);
        frame.fb.clear(color_to_index(0, 0, 255), 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);

        // NDC coordinates: left column to right column, apex at the top
        let vb = triangle_buffer(&[
            -1.0, -1.0, 0.5, //
            1.0, -1.0, 0.5, //
            -1.0, 1.0, 0.5,
        ]);
        frame.draw_triangles(&vb, RED);

        let red = color_to_index(255, 0, 0);
        let blue = color_to_index(0, 0, 255);

        let mask: Vec<bool> = (0..16)
            .map(|i| frame.fb.pixels()[i].color == red)
            .collect();

        // Every pixel is either the draw color or the clear color
        for (i, px) in frame.fb.pixels().iter().enumerate() {
            assert!(px.color == red || px.color == blue, "pixel {} has color {}", i, px.color);
        }

        // Known mask for this viewport mapping: the single-pixel apex row
        // collapses (len = 0) and the hypotenuse widens toward the bottom
        #[rustfmt::skip]
        let expected = [
            false, false, false, false,
            true, true, true, false,
            true, true, true, true,
            true, true, true, true,
        ];
        assert_eq!(mask, expected);
    }

    /// A full-viewport quad whose vertices carry view depth `w` (the upload
    /// forces w = 1, so the projection below copies z into w; x/y/z are
    /// pre-scaled so NDC still spans the viewport).
    fn quad_at_depth(w: f32) -> VertexBuffer {
        let s = w;
        let z = 0.5 * w;
        #[rustfmt::skip]
        let data = [
            -s, -s, z,  s, -s, z,  -s, s, z,
            s, -s, z,  s, s, z,  -s, s, z,
        ];
        let mut vb = VertexBuffer::new();
        vb.set_data(&data, &VertexLayout::positions()).unwrap();
        vb
    }

    /// Projection that writes w = 2 * z, leaving x/y/z untouched.
    fn depth_projection() -> Mat4 {
        let mut proj = Mat4::IDENTITY;
        proj.m[11] = 2.0;
        proj.m[15] = 0.0;
        proj
    }

    #[test]
    fn test_depth_order_independence() {
        // Two overlapping opaque surfaces at different depths must resolve
        // to the same image in either draw order: the nearer one (larger
        // 1/w) wins the GREATER depth test
        let green = (0u8, 255u8, 0u8);
        let near = 2.0;
        let far = 4.0;

        let render = |first: f32, second: f32, c1: (u8, u8, u8), c2: (u8, u8, u8)| {
            let mut frame = Frame::new(8, 8);
            frame.fb.clear(0, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
            frame.state.set_projection_matrix(depth_projection());
            frame.draw_triangles(&quad_at_depth(first), c1);
            frame.draw_triangles(&quad_at_depth(second), c2);
            frame.fb.pixels().to_vec()
        };

        let near_first = render(near, far, (0, 255, 0), RED);
        let far_first = render(far, near, RED, green);

        assert_eq!(near_first, far_first);

        // Near (green) wins everywhere it overlaps
        let green_index = color_to_index(0, 255, 0);
        assert_eq!(near_first[8 * 4 + 4].color, green_index);
        let covered = near_first.iter().filter(|px| px.color == green_index).count();
        assert!(covered > 32, "near surface covered only {} pixels", covered);
    }

    #[test]
    fn test_cull_modes() {
        let mut frame = Frame::new(8, 8);
        frame.fb.clear(0, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);

        let vb = triangle_buffer(&[
            -1.0, -1.0, 0.5, //
            1.0, -1.0, 0.5, //
            0.0, 1.0, 0.5,
        ]);

        let red = color_to_index(255, 0, 0);

        // Establish which facing this winding has by drawing with cull off
        frame.state.set_cull_mode(CullMode::None);
        frame.draw_triangles(&vb, RED);
        let baseline: usize = frame.fb.pixels().iter().filter(|px| px.color == red).count();
        assert!(baseline > 0);

        // One of front/back culls it, the other keeps it
        let mut culled_count = 0;
        for mode in [CullMode::Front, CullMode::Back] {
            let mut f = Frame::new(8, 8);
            f.fb.clear(0, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
            f.state.set_cull_mode(mode);
            f.draw_triangles(&vb, RED);
            let count = f.fb.pixels().iter().filter(|px| px.color == red).count();
            if count == 0 {
                culled_count += 1;
            } else {
                assert_eq!(count, baseline);
            }
        }
        assert_eq!(culled_count, 1);
    }

    #[test]
    fn test_perspective_correct_vs_affine_midpoint() {
        // A quad receding in depth: the u coordinate sampled at the screen
        // midpoint must differ between affine and perspective-correct paths
        let mut checker = Texture::new();
        // 2x1 texture: left half index A, right half index B
        let data = [255u8, 0, 0, 0, 255, 0];
        let img = crate::color::ImageData::new(2, 1, crate::color::ImageFormat::Rgb, &data);
        checker.upload(&img, false, false).unwrap();

        // Left edge at w=1, right edge at w=8: strong perspective
        let draw = |perspective: bool| -> Vec<crate::framebuffer::Pixel> {
            let mut frame = Frame::new(16, 4);
            frame.fb.clear(0, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);

            let mut proj = Mat4::IDENTITY;
            proj.m[11] = 1.0; // w = z
            proj.m[15] = 0.0;
            frame.state.set_projection_matrix(proj);

            let mut vb = VertexBuffer::new();
            let (wl, wr) = (1.0f32, 8.0f32);
            #[rustfmt::skip]
            let data = [
                // x scaled by w so NDC spans [-1, 1]; uv spans [0, 1]
                -wl, -wl, wl, 0.0, 0.0,
                wr, -wr, wr, 1.0, 0.0,
                -wl, wl, wl, 0.0, 1.0,
                wr, -wr, wr, 1.0, 0.0,
                wr, wr, wr, 1.0, 1.0,
                -wl, wl, wl, 0.0, 1.0,
            ];
            vb.set_data(&data, &VertexLayout::positions_uvs()).unwrap();

            render_triangles(
                &mut frame.fb,
                &checker,
                &frame.state,
                &mut frame.scratch,
                perspective,
                &vb,
                vb.len(),
                0,
            )
            .unwrap();
            frame.fb.pixels().to_vec()
        };

        let corrected = draw(true);
        let affine = draw(false);

        let a = color_to_index(255, 0, 0);

        // Affine: u interpolates linearly, the texture seam sits at the
        // screen midpoint. Corrected: the seam shifts toward the far side,
        // so the near half keeps texel A well past the midpoint.
        let row = 2usize;
        let mid = 8usize;
        let affine_mid = affine[row * 16 + mid].color;
        let corrected_mid = corrected[row * 16 + mid].color;
        assert_ne!(
            affine_mid, corrected_mid,
            "perspective correction did not change the midpoint sample"
        );
        assert_eq!(corrected_mid, a);
    }

    #[test]
    fn test_polygon_point_mode_plots_vertices() {
        let mut frame = Frame::new(8, 8);
        frame.fb.clear(0, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
        frame.state.set_polygon_mode(PolygonMode::Point);
        frame.state.set_draw_color(255, 255, 255);

        let vb = triangle_buffer(&[
            -0.5, -0.5, 0.5, //
            0.5, -0.5, 0.5, //
            0.0, 0.5, 0.5,
        ]);
        frame.draw_triangles(&vb, (255, 255, 255));

        let white = color_to_index(255, 255, 255);
        let plotted = frame.fb.pixels().iter().filter(|px| px.color == white).count();
        assert_eq!(plotted, 3);
    }

    #[test]
    fn test_screenspace_image_black_transparent() {
        let mut frame = Frame::new(8, 8);
        let bg = color_to_index(0, 0, 255);
        frame.fb.clear(bg, 0.0, ClearFlags::COLOR);

        // An all-black texture writes nothing at all
        let black = [0u8, 0, 0];
        let img = crate::color::ImageData::new(1, 1, crate::color::ImageFormat::Rgb, &black);
        let mut tex = Texture::new();
        tex.upload(&img, false, false).unwrap();

        screenspace_image(&mut frame.fb, Some(&tex), &frame.state, 2, 2, 5, 5).unwrap();
        assert!(frame.fb.pixels().iter().all(|px| px.color == bg));

        // A non-black texture fills the whole rect
        let red_bytes = [255u8, 0, 0];
        let img = crate::color::ImageData::new(1, 1, crate::color::ImageFormat::Rgb, &red_bytes);
        tex.upload(&img, false, false).unwrap();

        screenspace_image(&mut frame.fb, Some(&tex), &frame.state, 2, 2, 5, 5).unwrap();

        let red = color_to_index(255, 0, 0);
        let red_count = frame.fb.pixels().iter().filter(|px| px.color == red).count();
        assert_eq!(red_count, 16);

        // Rows 2..=5 flip to pixel rows 2..=5 on an 8-row buffer
        for y in 2..=5u32 {
            for x in 2..=5u32 {
                assert_eq!(frame.fb.pixel(x, y).unwrap().color, red);
            }
        }
    }

    #[test]
    fn test_screenspace_point_bounds_and_flip() {
        let mut frame = Frame::new(8, 8);
        frame.fb.clear(0, 0.0, ClearFlags::COLOR);
        frame.state.set_draw_color(255, 255, 255);

        assert!(screenspace_point(&mut frame.fb, &frame.state, 8, 0).is_err());
        assert!(screenspace_point(&mut frame.fb, &frame.state, 0, -1).is_err());

        screenspace_point(&mut frame.fb, &frame.state, 1, 0).unwrap();
        // Top-left origin: y = 0 lands on the last pixel row
        assert_eq!(frame.fb.pixel(1, 7).unwrap().color, color_to_index(255, 255, 255));
    }

    #[test]
    fn test_strip_and_fan_cover_like_triangle_list() {
        // A quad as a strip and as a fan must fill the same pixels as the
        // equivalent two-triangle list
        let mut list_frame = Frame::new(8, 8);
        list_frame.fb.clear(0, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
        #[rustfmt::skip]
        let list = triangle_buffer(&[
            -0.8, -0.8, 0.5,  0.8, -0.8, 0.5,  -0.8, 0.8, 0.5,
            0.8, -0.8, 0.5,  0.8, 0.8, 0.5,  -0.8, 0.8, 0.5,
        ]);
        list_frame.draw_triangles(&list, RED);

        let mut strip_frame = Frame::new(8, 8);
        strip_frame.fb.clear(0, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
        #[rustfmt::skip]
        let strip = triangle_buffer(&[
            -0.8, -0.8, 0.5,  0.8, -0.8, 0.5,  -0.8, 0.8, 0.5,  0.8, 0.8, 0.5,
        ]);
        strip_frame.flat.set_flat_color(color_to_index(255, 0, 0));
        render_triangle_strip(
            &mut strip_frame.fb,
            &strip_frame.flat,
            &strip_frame.state,
            &mut strip_frame.scratch,
            true,
            &strip,
            4,
            0,
        )
        .unwrap();

        assert_eq!(list_frame.fb.pixels(), strip_frame.fb.pixels());

        // The fan decomposes around its first vertex; compare against a
        // list with the same diagonal
        let mut fan_list_frame = Frame::new(8, 8);
        fan_list_frame.fb.clear(0, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
        #[rustfmt::skip]
        let fan_list = triangle_buffer(&[
            -0.8, -0.8, 0.5,  0.8, -0.8, 0.5,  0.8, 0.8, 0.5,
            -0.8, -0.8, 0.5,  0.8, 0.8, 0.5,  -0.8, 0.8, 0.5,
        ]);
        fan_list_frame.draw_triangles(&fan_list, RED);

        let mut fan_frame = Frame::new(8, 8);
        fan_frame.fb.clear(0, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);
        #[rustfmt::skip]
        let fan = triangle_buffer(&[
            -0.8, -0.8, 0.5,  0.8, -0.8, 0.5,  0.8, 0.8, 0.5,  -0.8, 0.8, 0.5,
        ]);
        fan_frame.flat.set_flat_color(color_to_index(255, 0, 0));
        render_triangle_fan(
            &mut fan_frame.fb,
            &fan_frame.flat,
            &fan_frame.state,
            &mut fan_frame.scratch,
            true,
            &fan,
            4,
            0,
        )
        .unwrap();

        assert_eq!(fan_list_frame.fb.pixels(), fan_frame.fb.pixels());
    }

    #[test]
    fn test_mip_level_from_distance() {
        let mut tex = Texture::new();
        let data: Vec<u8> = std::iter::repeat([100u8, 100, 100]).take(64).flatten().collect();
        let img = crate::color::ImageData::new(8, 8, crate::color::ImageFormat::Rgb, &data);
        tex.upload(&img, false, true).unwrap();

        let mut state = RenderState::new();
        state.set_capability(Capability::MipMapping, true, None);

        let mut scratch = ClipScratch::new();
        scratch.load(&[ClipVertex::default(); 3]).unwrap();
        scratch.project_to_raster();

        // Nearest vertex very close (large 1/w): level 0
        let set_z = |scratch: &mut ClipScratch, z: f64| {
            for v in scratch.clip_vertices_mut() {
                v.z = z as f32;
            }
            scratch.project_to_raster();
        };

        set_z(&mut scratch, 1.0);
        assert_eq!(compute_polygon_mip_level(&tex, &scratch, &state), 0);

        // Far away (small 1/w): clamped to the last level
        set_z(&mut scratch, 0.001);
        assert_eq!(compute_polygon_mip_level(&tex, &scratch, &state), tex.mips() - 1);

        // Mip mapping disabled: always level 0
        state.set_capability(Capability::MipMapping, false, None);
        assert_eq!(compute_polygon_mip_level(&tex, &scratch, &state), 0);
    }
}
