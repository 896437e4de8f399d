//! Texture store with mip chains
//!
//! A texture keeps every mip level concatenated in one flat texel array of
//! 8-bit color indices, with a fixed table of (offset, width, height)
//! records for O(1) level access. Mip level k is `max(1, size >> k)` per
//! axis; the chain runs down to 1x1. Downsampling always works on the RGB
//! source of the previous level and re-quantizes, so indexed rounding
//! errors do not compound across levels.

use std::path::Path;

use crate::color::{image_to_indices, ColorIndex, ImageData, ImageFormat};
use crate::error::{ErrorCode, RenderError, RenderResult};

/// Maximum texture extent per axis.
pub const MAX_TEXTURE_SIZE: i16 = 1024;

/// Maximum mip count: a 1024-texel axis yields levels 1024..1.
pub const MAX_MIPS: usize = 11;

#[derive(Debug, Clone, Copy, Default)]
struct MipLevel {
    offset: usize,
    width: i16,
    height: i16,
}

fn mip_size(size: i16, level: usize) -> i16 {
    (size >> level).max(1)
}

/// Mip-mapped 2D texture of color indices.
#[derive(Debug, Default)]
pub struct Texture {
    width: i16,
    height: i16,
    mips: u8,
    texels: Vec<ColorIndex>,
    levels: [MipLevel; MAX_MIPS],
}

impl Texture {
    pub fn new() -> Self {
        Self::default()
    }

    /// The 1x1 stand-in used when no texture is bound: a single texel, no
    /// mip chain, holding the current draw color.
    pub fn flat() -> Self {
        Self {
            width: 1,
            height: 1,
            mips: 0,
            texels: vec![0],
            levels: [MipLevel::default(); MAX_MIPS],
        }
    }

    pub fn set_flat_color(&mut self, color: ColorIndex) {
        self.texels[0] = color;
    }

    pub fn width(&self) -> i16 {
        self.width
    }

    pub fn height(&self) -> i16 {
        self.height
    }

    /// Number of mip levels (0 for the flat stand-in, else >= 1).
    pub fn mips(&self) -> u8 {
        self.mips
    }

    pub fn has_data(&self) -> bool {
        !self.texels.is_empty()
    }

    /// Dimensions of one mip level.
    pub fn mip_dimensions(&self, mip: u8) -> RenderResult<(i16, i16)> {
        if mip >= self.mips {
            return Err(RenderError::new(ErrorCode::InvalidArgument, "mip_dimensions"));
        }
        let level = self.levels[mip as usize];
        Ok((level.width, level.height))
    }

    /// Uploads a 2D image, converting it to color indices and optionally
    /// generating the full mip chain. The texel array is reallocated only
    /// when the dimensions or mip count change.
    pub fn upload(&mut self, image: &ImageData, dither: bool, generate_mips: bool) -> RenderResult<()> {
        let (width, height) = (image.width, image.height);
        if width <= 0 || height <= 0 {
            return Err(RenderError::new(ErrorCode::InvalidArgument, "texture_upload: zero size"));
        }
        if width > MAX_TEXTURE_SIZE as i32 || height > MAX_TEXTURE_SIZE as i32 {
            return Err(RenderError::new(
                ErrorCode::InvalidArgument,
                "texture_upload: maximum texture size exceeded",
            ));
        }

        let width = width as i16;
        let height = height as i16;

        // Count levels and total texels
        let mut mips: u8 = 0;
        let mut num_texels: usize = 0;
        if generate_mips {
            let (mut w, mut h) = (width, height);
            loop {
                num_texels += w as usize * h as usize;
                mips += 1;
                if w == 1 && h == 1 {
                    break;
                }
                w = (w / 2).max(1);
                h = (h / 2).max(1);
            }
        } else {
            mips = 1;
            num_texels = width as usize * height as usize;
        }

        if self.width != width || self.height != height || self.mips != mips {
            self.width = width;
            self.height = height;
            self.mips = mips;
            self.texels = vec![0; num_texels];

            // Record each level's sub-range of the flat array
            let mut offset = 0;
            for mip in 0..mips as usize {
                let w = mip_size(width, mip);
                let h = mip_size(height, mip);
                self.levels[mip] = MipLevel { offset, width: w, height: h };
                offset += w as usize * h as usize;
            }
        }

        // Normalize the source to one RGB triple per pixel so every level
        // (including the base) converts through the same path
        let mut rgb = extract_rgb(image);

        let base = width as usize * height as usize;
        let src = ImageData::new(width as i32, height as i32, ImageFormat::Rgb, &rgb);
        image_to_indices(&mut self.texels[..base], &src, dither)?;

        if generate_mips {
            let (mut w, mut h) = (width, height);
            for mip in 1..self.mips as usize {
                let (scaled, sw, sh) = scale_down_rgb(&rgb, w, h);
                rgb = scaled;
                w = sw;
                h = sh;

                let level = self.levels[mip];
                let slice = &mut self.texels
                    [level.offset..level.offset + w as usize * h as usize];
                let src = ImageData::new(w as i32, h as i32, ImageFormat::Rgb, &rgb);
                image_to_indices(slice, &src, dither)?;
            }
        }

        log::debug!("texture upload: {}x{}, {} mip level(s)", width, height, mips);
        Ok(())
    }

    /// Decodes an image file and uploads it (RGB, via the `image` crate).
    pub fn upload_from_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        dither: bool,
        generate_mips: bool,
    ) -> RenderResult<()> {
        let img = image::open(path.as_ref()).map_err(|e| {
            log::warn!("failed to decode {}: {}", path.as_ref().display(), e);
            RenderError::new(ErrorCode::InvalidArgument, "texture_upload_from_file")
        })?;

        let rgb = img.to_rgb8();
        let (width, height) = (rgb.width() as i32, rgb.height() as i32);
        let data = ImageData::new(width, height, ImageFormat::Rgb, rgb.as_raw());
        self.upload(&data, dither, generate_mips)
    }

    /// Returns one mip level's texels and dimensions. The requested level
    /// plus the bias is clamped into the valid range; a chain-less texture
    /// always yields its single level.
    pub fn select_mip_level(&self, mip: u8, lod_bias: i32) -> (&[ColorIndex], i16, i16) {
        if self.mips == 0 {
            return (&self.texels, self.width, self.height);
        }

        let level = (mip as i32 + lod_bias).clamp(0, self.mips as i32 - 1) as usize;
        let record = self.levels[level];
        let len = record.width as usize * record.height as usize;
        (
            &self.texels[record.offset..record.offset + len],
            record.width,
            record.height,
        )
    }
}

/// Nearest-neighbor sample with repeat wrapping. Coordinates may be
/// negative; the fractional part is shifted back into [0, 1).
pub fn sample_nearest(texels: &[ColorIndex], width: i16, height: i16, u: f32, v: f32) -> ColorIndex {
    let mut x = ((u - u.trunc()) * width as f32) as i32;
    let mut y = ((v - v.trunc()) * height as f32) as i32;

    if x < 0 {
        x += width as i32;
    }
    if y < 0 {
        y += height as i32;
    }

    let x = x.clamp(0, width as i32 - 1);
    let y = y.clamp(0, height as i32 - 1);

    texels[(y * width as i32 + x) as usize]
}

/// Flattens any supported source layout to packed RGB.
fn extract_rgb(image: &ImageData) -> Vec<u8> {
    let channels = image.format.channels();
    let num_pixels = image.width as usize * image.height as usize;
    let mut rgb = Vec::with_capacity(num_pixels * 3);

    for px in image.data.chunks_exact(channels).take(num_pixels) {
        let (r, g, b) = match image.format {
            ImageFormat::Grayscale | ImageFormat::GrayscaleAlpha => (px[0], px[0], px[0]),
            ImageFormat::Rgb | ImageFormat::Rgba => (px[0], px[1], px[2]),
            ImageFormat::Bgr => (px[2], px[1], px[0]),
        };
        rgb.push(r);
        rgb.push(g);
        rgb.push(b);
    }

    rgb
}

fn box2(a: u8, b: u8) -> u8 {
    ((a as u32 + b as u32) / 2) as u8
}

fn box4(a: u8, b: u8, c: u8, d: u8) -> u8 {
    ((a as u32 + b as u32 + c as u32 + d as u32) / 4) as u8
}

/// Halves an RGB image with a box filter; 2x1 / 1x2 when one axis is
/// already at its floor.
fn scale_down_rgb(data: &[u8], width: i16, height: i16) -> (Vec<u8>, i16, i16) {
    let scaled_width = (width / 2).max(1);
    let scaled_height = (height / 2).max(1);
    let mut scaled = vec![0u8; scaled_width as usize * scaled_height as usize * 3];

    let src = |x: usize, y: usize, c: usize| data[(y * width as usize + x) * 3 + c];

    if width > 1 && height > 1 {
        for y in 0..scaled_height as usize {
            for x in 0..scaled_width as usize {
                for c in 0..3 {
                    scaled[(y * scaled_width as usize + x) * 3 + c] = box4(
                        src(x * 2, y * 2, c),
                        src(x * 2 + 1, y * 2, c),
                        src(x * 2 + 1, y * 2 + 1, c),
                        src(x * 2, y * 2 + 1, c),
                    );
                }
            }
        }
    } else if width > 1 {
        for x in 0..scaled_width as usize {
            for c in 0..3 {
                scaled[x * 3 + c] = box2(src(x * 2, 0, c), src(x * 2 + 1, 0, c));
            }
        }
    } else if height > 1 {
        for y in 0..scaled_height as usize {
            for c in 0..3 {
                scaled[y * 3 + c] = box2(src(0, y * 2, c), src(0, y * 2 + 1, c));
            }
        }
    }

    (scaled, scaled_width, scaled_height)
}
