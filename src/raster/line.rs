//! Bresenham line rasterization
//!
//! Integer midpoint stepping decomposed into a major and minor axis: the
//! error accumulator starts at half the major extent, steps by the minor
//! extent and is corrected by the major extent, plotting one pixel per
//! iteration for max(|dx|, |dy|) iterations.

use crate::color::ColorIndex;
use crate::error::{ErrorCode, RenderError, RenderResult};
use crate::framebuffer::FrameBuffer;
use crate::raster::RasterVertex;
use crate::texture::sample_nearest;

struct Axes {
    // Parallel step (major axis only)
    pdx: i32,
    pdy: i32,
    // Diagonal step
    ddx: i32,
    ddy: i32,
    // Minor ("error short") and major ("error long") extents
    es: i32,
    el: i32,
}

fn decompose(dx: i32, dy: i32) -> Axes {
    let incx = dx.signum();
    let incy = dy.signum();
    let (dx, dy) = (dx.abs(), dy.abs());

    if dx > dy {
        Axes { pdx: incx, pdy: 0, ddx: incx, ddy: incy, es: dy, el: dx }
    } else {
        Axes { pdx: 0, pdy: incy, ddx: incx, ddy: incy, es: dx, el: dy }
    }
}

/// Draws a flat-colored line between two screen points. All endpoints must
/// lie inside the framebuffer.
pub fn line_colored(
    fb: &mut FrameBuffer,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    color: ColorIndex,
) -> RenderResult<()> {
    let (w, h) = (fb.width() as i32, fb.height() as i32);
    if x1 < 0 || x1 >= w || x2 < 0 || x2 >= w || y1 < 0 || y1 >= h || y2 < 0 || y2 >= h {
        return Err(RenderError::new(ErrorCode::InvalidArgument, "screen_line"));
    }

    let axes = decompose(x2 - x1, y2 - y1);
    if axes.el == 0 {
        return Ok(());
    }

    let mut x = x1;
    let mut y = y1;
    let mut err = axes.el / 2;

    for _ in 0..axes.el {
        fb.plot(x, y, color);

        err -= axes.es;
        if err < 0 {
            err += axes.el;
            x += axes.ddx;
            y += axes.ddy;
        } else {
            x += axes.pdx;
            y += axes.pdy;
        }
    }

    Ok(())
}

/// Draws a textured line between two raster vertices, linearly
/// interpolating u/v over the pixel count and nearest-sampling per pixel.
pub fn line_textured(
    fb: &mut FrameBuffer,
    texels: &[ColorIndex],
    mip_width: i16,
    mip_height: i16,
    a: &RasterVertex,
    b: &RasterVertex,
) {
    let axes = decompose(b.x - a.x, b.y - a.y);
    if axes.el == 0 {
        return;
    }

    let mut x = a.x;
    let mut y = a.y;
    let mut u = a.u;
    let mut v = a.v;

    let (u_step, v_step) = if axes.el > 1 {
        let n = (axes.el - 1) as f64;
        ((b.u - a.u) / n, (b.v - a.v) / n)
    } else {
        (0.0, 0.0)
    };

    let mut err = axes.el / 2;

    for _ in 0..axes.el {
        let color = sample_nearest(texels, mip_width, mip_height, u as f32, v as f32);
        fb.plot(x, y, color);

        u += u_step;
        v += v_step;

        err -= axes.es;
        if err < 0 {
            err += axes.el;
            x += axes.ddx;
            y += axes.ddy;
        } else {
            x += axes.pdx;
            y += axes.pdy;
        }
    }
}
