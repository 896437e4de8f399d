//! Sutherland-Hodgman polygon clipping
//!
//! Polygons are clipped against one plane at a time, ping-ponging between
//! two fixed-capacity scratch arrays: z planes in clip space before the
//! perspective divide, then the four clip-rect edges in raster space.
//! Triangles can only grow by one vertex per plane, so the 32-slot cap is
//! never reached by the triangle paths, but every push is checked so an
//! extended caller gets a capacity error instead of silent overflow.

use crate::error::{ErrorCode, RenderError, RenderResult};
use crate::state::Rect;

/// Hard cap on polygon vertices inside the clipper.
pub const MAX_POLYGON_VERTS: usize = 32;

const CAPACITY_ERROR: RenderError =
    RenderError { code: ErrorCode::InvalidArgument, context: "clip: polygon vertex capacity exceeded" };

/// Vertex in clip space, before the perspective divide.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClipVertex {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
    pub u: f32,
    pub v: f32,
}

/// Vertex after projection: integer screen x/y plus interpolated z/u/v.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RasterVertex {
    pub x: i32,
    pub y: i32,
    pub z: f64,
    pub u: f64,
    pub v: f64,
}

// Intersection of edge (a, b) with the plane z = plane
fn zplane_vertex(a: ClipVertex, b: ClipVertex, plane: f32) -> ClipVertex {
    let m = (plane - b.z) as f64 / (a.z - b.z) as f64;
    ClipVertex {
        x: (m * (a.x - b.x) as f64 + b.x as f64) as f32,
        y: (m * (a.y - b.y) as f64 + b.y as f64) as f32,
        z: plane,
        w: (m * (a.w - b.w) as f64 + b.w as f64) as f32,
        u: (m * (a.u - b.u) as f64 + b.u as f64) as f32,
        v: (m * (a.v - b.v) as f64 + b.v as f64) as f32,
    }
}

// Intersection of edge (a, b) with the vertical line x = plane
fn xplane_vertex(a: RasterVertex, b: RasterVertex, plane: i32) -> RasterVertex {
    let m = (plane - b.x) as f64 / (a.x - b.x) as f64;
    RasterVertex {
        x: plane,
        y: (m * (a.y - b.y) as f64 + b.y as f64) as i32,
        z: m * (a.z - b.z) + b.z,
        u: m * (a.u - b.u) + b.u,
        v: m * (a.v - b.v) + b.v,
    }
}

// Intersection of edge (a, b) with the horizontal line y = plane
fn yplane_vertex(a: RasterVertex, b: RasterVertex, plane: i32) -> RasterVertex {
    let m = (plane - b.y) as f64 / (a.y - b.y) as f64;
    RasterVertex {
        x: (m * (a.x - b.x) as f64 + b.x as f64) as i32,
        y: plane,
        z: m * (a.z - b.z) + b.z,
        u: m * (a.u - b.u) + b.u,
        v: m * (a.v - b.v) + b.v,
    }
}

/// One Sutherland-Hodgman pass over a vertex array. `inside` classifies a
/// vertex against the plane; `intersect` produces the crossing vertex.
fn clip_pass<V: Copy>(
    src: &[V],
    dst: &mut [V; MAX_POLYGON_VERTS],
    inside: impl Fn(&V) -> bool,
    intersect: impl Fn(V, V) -> V,
) -> RenderResult<usize> {
    let mut out = 0usize;

    let mut push = |dst: &mut [V; MAX_POLYGON_VERTS], out: &mut usize, v: V| -> RenderResult<()> {
        if *out >= MAX_POLYGON_VERTS {
            return Err(CAPACITY_ERROR);
        }
        dst[*out] = v;
        *out += 1;
        Ok(())
    };

    for cur in 0..src.len() {
        let prev = if cur == 0 { src.len() - 1 } else { cur - 1 };
        let (a, b) = (src[prev], src[cur]);
        let (a_in, b_in) = (inside(&a), inside(&b));

        if a_in && b_in {
            // Inside
            push(dst, &mut out, b)?;
        } else if a_in {
            // Leaving
            push(dst, &mut out, intersect(a, b))?;
        } else if b_in {
            // Entering
            push(dst, &mut out, intersect(a, b))?;
            push(dst, &mut out, b)?;
        }
    }

    Ok(out)
}

/// Per-context clipping scratch: two ping-pong pairs (clip-space and
/// raster-space) plus the live vertex count.
pub struct ClipScratch {
    clip: [ClipVertex; MAX_POLYGON_VERTS],
    clip_tmp: [ClipVertex; MAX_POLYGON_VERTS],
    raster: [RasterVertex; MAX_POLYGON_VERTS],
    raster_tmp: [RasterVertex; MAX_POLYGON_VERTS],
    count: usize,
}

impl Default for ClipScratch {
    fn default() -> Self {
        Self {
            clip: [ClipVertex::default(); MAX_POLYGON_VERTS],
            clip_tmp: [ClipVertex::default(); MAX_POLYGON_VERTS],
            raster: [RasterVertex::default(); MAX_POLYGON_VERTS],
            raster_tmp: [RasterVertex::default(); MAX_POLYGON_VERTS],
            count: 0,
        }
    }
}

impl ClipScratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, vertices: &[ClipVertex]) -> RenderResult<()> {
        if vertices.len() > MAX_POLYGON_VERTS {
            return Err(CAPACITY_ERROR);
        }
        self.clip[..vertices.len()].copy_from_slice(vertices);
        self.count = vertices.len();
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn clip_vertices(&self) -> &[ClipVertex] {
        &self.clip[..self.count]
    }

    pub fn clip_vertices_mut(&mut self) -> &mut [ClipVertex] {
        &mut self.clip[..self.count]
    }

    pub fn raster_vertices(&self) -> &[RasterVertex] {
        &self.raster[..self.count]
    }

    /// Truncating conversion of the projected clip vertices into raster
    /// vertices.
    pub fn project_to_raster(&mut self) {
        for i in 0..self.count {
            let c = self.clip[i];
            self.raster[i] = RasterVertex {
                x: c.x as i32,
                y: c.y as i32,
                z: c.z as f64,
                u: c.u as f64,
                v: c.v as f64,
            };
        }
    }

    /// Clips against z >= z_min, then z <= z_max, in clip space.
    pub fn clip_z(&mut self, z_min: f32, z_max: f32) -> RenderResult<()> {
        let n = clip_pass(
            &self.clip[..self.count],
            &mut self.clip_tmp,
            |v| v.z >= z_min,
            |a, b| zplane_vertex(a, b, z_min),
        )?;
        self.count = clip_pass(
            &self.clip_tmp[..n],
            &mut self.clip,
            |v| v.z <= z_max,
            |a, b| zplane_vertex(a, b, z_max),
        )?;
        Ok(())
    }

    /// Clips the raster polygon against the clip rect: x-min, x-max, y-min,
    /// y-max, in that order.
    pub fn clip_xy(&mut self, rect: Rect) -> RenderResult<()> {
        let n = clip_pass(
            &self.raster[..self.count],
            &mut self.raster_tmp,
            |v| v.x >= rect.left,
            |a, b| xplane_vertex(a, b, rect.left),
        )?;
        let n = clip_pass(
            &self.raster_tmp[..n],
            &mut self.raster,
            |v| v.x <= rect.right,
            |a, b| xplane_vertex(a, b, rect.right),
        )?;
        let n = clip_pass(
            &self.raster[..n],
            &mut self.raster_tmp,
            |v| v.y >= rect.top,
            |a, b| yplane_vertex(a, b, rect.top),
        )?;
        self.count = clip_pass(
            &self.raster_tmp[..n],
            &mut self.raster,
            |v| v.y <= rect.bottom,
            |a, b| yplane_vertex(a, b, rect.bottom),
        )?;
        Ok(())
    }
}
