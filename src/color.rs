//! Indexed color: R3G3B2 palette, quantization, dithering
//!
//! The rasterizer works entirely in 8-bit color indices. An index encodes
//! 3 bits of red, 3 of green and 2 of blue:
//!
//! ```text
//! Bit     7 6 5 4 3 2 1 0
//! Color   R R R G G G B B
//! ```
//!
//! The palette maps indices back to full RGB at present time only; pixels
//! never store RGB during rasterization.

use crate::error::{ErrorCode, RenderError, RenderResult};

/// 8-bit index into the 256-entry palette.
pub type ColorIndex = u8;

// Quantization steps used while dithering (palette step per component)
const DITHER_SCALE_RED: i32 = 36;
const DITHER_SCALE_GREEN: i32 = 36;
const DITHER_SCALE_BLUE: i32 = 85;

// Divisors used when selecting a color index
const SELECT_RED: u16 = 32;
const SELECT_GREEN: u16 = 32;
const SELECT_BLUE: u16 = 64;

/// RGB palette entry (0-255 per channel)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Converts an RGB color into an R3G3B2 color index.
pub fn color_to_index(r: u8, g: u8, b: u8) -> ColorIndex {
    (((r as u16 / SELECT_RED) << 5) | ((g as u16 / SELECT_GREEN) << 2) | (b as u16 / SELECT_BLUE))
        as ColorIndex
}

/// 256-entry color palette with fixed R3G3B2 encoding.
#[derive(Debug, Clone)]
pub struct Palette {
    colors: [Color; 256],
}

impl Default for Palette {
    fn default() -> Self {
        Self::r3g3b2()
    }
}

impl Palette {
    /// Builds the palette by enumerating all 256 R3G3B2 combinations with
    /// evenly spaced intensity steps per bit width.
    pub fn r3g3b2() -> Self {
        const STEPS_3BIT: [u8; 8] = [0, 36, 73, 109, 146, 182, 219, 255];
        const STEPS_2BIT: [u8; 4] = [0, 85, 170, 255];

        let mut colors = [Color::BLACK; 256];
        let mut i = 0;
        for r in 0..8 {
            for g in 0..8 {
                for b in 0..4 {
                    colors[i] = Color::new(STEPS_3BIT[r], STEPS_3BIT[g], STEPS_2BIT[b]);
                    i += 1;
                }
            }
        }

        Self { colors }
    }

    pub fn get(&self, index: ColorIndex) -> Color {
        self.colors[index as usize]
    }
}

/// Channel layout of raw image bytes handed to texture upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Grayscale,
    GrayscaleAlpha,
    Rgb,
    Bgr,
    Rgba,
}

impl ImageFormat {
    pub fn channels(self) -> usize {
        match self {
            ImageFormat::Grayscale => 1,
            ImageFormat::GrayscaleAlpha => 2,
            ImageFormat::Rgb | ImageFormat::Bgr => 3,
            ImageFormat::Rgba => 4,
        }
    }

    /// Extract RGB from one pixel's bytes (alpha channels are ignored).
    fn rgb_at(self, px: &[u8]) -> (u8, u8, u8) {
        match self {
            ImageFormat::Grayscale | ImageFormat::GrayscaleAlpha => (px[0], px[0], px[0]),
            ImageFormat::Rgb | ImageFormat::Rgba => (px[0], px[1], px[2]),
            ImageFormat::Bgr => (px[2], px[1], px[0]),
        }
    }
}

/// Borrowed view of raw image bytes plus their layout.
#[derive(Debug, Clone, Copy)]
pub struct ImageData<'a> {
    pub width: i32,
    pub height: i32,
    pub format: ImageFormat,
    pub data: &'a [u8],
}

impl<'a> ImageData<'a> {
    pub fn new(width: i32, height: i32, format: ImageFormat, data: &'a [u8]) -> Self {
        Self { width, height, format, data }
    }

    fn validate(&self, context: &'static str) -> RenderResult<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(RenderError::new(ErrorCode::InvalidArgument, context));
        }
        let expected = self.width as usize * self.height as usize * self.format.channels();
        if self.data.len() < expected {
            return Err(RenderError::new(ErrorCode::ArgumentMismatch, context));
        }
        Ok(())
    }
}

/*
Floyd-Steinberg error distribution around the pixel 'px':
       [ px ] [7/16]
[3/16] [5/16] [1/16]
*/
fn dither_channel(buffer: &mut [i32], x: i32, y: i32, comp: usize, width: i32, height: i32, scale: i32) {
    let at = |x: i32, y: i32| (y * width + x) as usize * 3 + comp;

    let old_pixel = buffer[at(x, y)];
    let new_pixel = (old_pixel / scale) * scale;

    buffer[at(x, y)] = new_pixel;

    let quant_err = old_pixel - new_pixel;

    // Out-of-range neighbors are skipped at the buffer edges
    if x + 1 < width {
        buffer[at(x + 1, y)] += quant_err * 7 / 16;
    }
    if x > 0 && y + 1 < height {
        buffer[at(x - 1, y + 1)] += quant_err * 3 / 16;
    }
    if y + 1 < height {
        buffer[at(x, y + 1)] += quant_err * 5 / 16;
    }
    if x + 1 < width && y + 1 < height {
        buffer[at(x + 1, y + 1)] += quant_err * 1 / 16;
    }
}

/// Converts raw image colors into color indices, optionally applying
/// Floyd-Steinberg dithering. `dst` must hold width * height entries.
pub fn image_to_indices(dst: &mut [ColorIndex], image: &ImageData, dither: bool) -> RenderResult<()> {
    image.validate("image_to_indices")?;

    let width = image.width;
    let height = image.height;
    let channels = image.format.channels();
    let num_pixels = width as usize * height as usize;

    if dst.len() < num_pixels {
        return Err(RenderError::new(ErrorCode::ArgumentMismatch, "image_to_indices"));
    }

    if dither {
        // Expand into a signed intermediate buffer so the running error can
        // accumulate without premature clamping
        let mut buffer = vec![0i32; num_pixels * 3];
        for (i, px) in image.data.chunks_exact(channels).take(num_pixels).enumerate() {
            let (r, g, b) = image.format.rgb_at(px);
            buffer[i * 3] = r as i32;
            buffer[i * 3 + 1] = g as i32;
            buffer[i * 3 + 2] = b as i32;
        }

        for y in 0..height {
            for x in 0..width {
                dither_channel(&mut buffer, x, y, 0, width, height, DITHER_SCALE_RED);
                dither_channel(&mut buffer, x, y, 1, width, height, DITHER_SCALE_GREEN);
                dither_channel(&mut buffer, x, y, 2, width, height, DITHER_SCALE_BLUE);
            }
        }

        for i in 0..num_pixels {
            let r = buffer[i * 3].clamp(0, 255) as u8;
            let g = buffer[i * 3 + 1].clamp(0, 255) as u8;
            let b = buffer[i * 3 + 2].clamp(0, 255) as u8;
            dst[i] = color_to_index(r, g, b);
        }
    } else {
        for (i, px) in image.data.chunks_exact(channels).take(num_pixels).enumerate() {
            let (r, g, b) = image.format.rgb_at(px);
            dst[i] = color_to_index(r, g, b);
        }
    }

    Ok(())
}
