//! Demo viewer: a spinning textured cube rendered by the umber software
//! rasterizer and blitted to a macroquad window.
//!
//! Reads optional settings from `demo.ron` (see `RenderConfig`).

use macroquad::prelude::*;

use umber::{
    Capability, ClearFlags, CullMode, ImageData, ImageFormat, Mat4, Primitive, RenderConfig,
    RenderContext, VertexLayout,
};

const CONFIG_FILE: &str = "demo.ron";

fn window_conf() -> Conf {
    let config = RenderConfig::load_or_default(CONFIG_FILE);
    Conf {
        window_title: format!("Umber v{}", umber::VERSION),
        window_width: (config.width * config.window_scale) as i32,
        window_height: (config.height * config.window_scale) as i32,
        window_resizable: true,
        high_dpi: true,
        ..Default::default()
    }
}

/// Interleaved x,y,z,u,v vertices for a unit cube (12 triangles).
fn cube_vertices() -> Vec<f32> {
    // Each face: 4 corners (position + uv), split into two triangles
    #[rustfmt::skip]
    let faces: [[[f32; 5]; 4]; 6] = [
        // Front
        [[-1.0, -1.0,  1.0, 0.0, 0.0], [ 1.0, -1.0,  1.0, 1.0, 0.0],
         [ 1.0,  1.0,  1.0, 1.0, 1.0], [-1.0,  1.0,  1.0, 0.0, 1.0]],
        // Back
        [[ 1.0, -1.0, -1.0, 0.0, 0.0], [-1.0, -1.0, -1.0, 1.0, 0.0],
         [-1.0,  1.0, -1.0, 1.0, 1.0], [ 1.0,  1.0, -1.0, 0.0, 1.0]],
        // Top
        [[-1.0,  1.0,  1.0, 0.0, 0.0], [ 1.0,  1.0,  1.0, 1.0, 0.0],
         [ 1.0,  1.0, -1.0, 1.0, 1.0], [-1.0,  1.0, -1.0, 0.0, 1.0]],
        // Bottom
        [[-1.0, -1.0, -1.0, 0.0, 0.0], [ 1.0, -1.0, -1.0, 1.0, 0.0],
         [ 1.0, -1.0,  1.0, 1.0, 1.0], [-1.0, -1.0,  1.0, 0.0, 1.0]],
        // Right
        [[ 1.0, -1.0,  1.0, 0.0, 0.0], [ 1.0, -1.0, -1.0, 1.0, 0.0],
         [ 1.0,  1.0, -1.0, 1.0, 1.0], [ 1.0,  1.0,  1.0, 0.0, 1.0]],
        // Left
        [[-1.0, -1.0, -1.0, 0.0, 0.0], [-1.0, -1.0,  1.0, 1.0, 0.0],
         [-1.0,  1.0,  1.0, 1.0, 1.0], [-1.0,  1.0, -1.0, 0.0, 1.0]],
    ];

    let mut data = Vec::with_capacity(6 * 6 * 5);
    for face in &faces {
        for corner in [0usize, 1, 2, 0, 2, 3].iter().map(|&i| &face[i]) {
            data.extend_from_slice(corner);
        }
    }
    data
}

/// RGB checkerboard used as the cube texture.
fn checkerboard_rgb(size: usize, cell: usize, a: (u8, u8, u8), b: (u8, u8, u8)) -> Vec<u8> {
    let mut data = Vec::with_capacity(size * size * 3);
    for y in 0..size {
        for x in 0..size {
            let c = if ((x / cell) + (y / cell)) % 2 == 0 { a } else { b };
            data.extend_from_slice(&[c.0, c.1, c.2]);
        }
    }
    data
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();

    let config = RenderConfig::load_or_default(CONFIG_FILE);
    log::info!("umber demo: {}x{} (scale {})", config.width, config.height, config.window_scale);

    let mut ctx = RenderContext::with_config(&config);

    let fb = ctx
        .create_frame_buffer(config.width, config.height)
        .expect("framebuffer creation failed");
    ctx.bind_frame_buffer(Some(fb));
    ctx.set_viewport(0, 0, config.width as i32, config.height as i32);

    let projection = Mat4::perspective(
        config.width as f32 / config.height as f32,
        1.0,
        100.0,
        74.0f32.to_radians(),
    );
    ctx.set_projection_matrix(projection);
    ctx.set_depth_clip(1.0, 100.0);

    ctx.set_cull_mode(CullMode::Back);
    ctx.enable(Capability::MipMapping);

    // Checkerboard texture with a full mip chain
    let texture = ctx.create_texture();
    let texels = checkerboard_rgb(64, 8, (214, 178, 96), (64, 48, 32));
    let image = ImageData::new(64, 64, ImageFormat::Rgb, &texels);
    ctx.texture_image(texture, &image, config.dither, config.generate_mips);

    let cube_vb = ctx.create_vertex_buffer();
    let cube = cube_vertices();
    ctx.vertex_buffer_data(cube_vb, &cube, &VertexLayout::positions_uvs());
    let cube_count = cube.len() / 5;

    let mut rotation: f32 = 0.0;

    loop {
        if is_key_pressed(KeyCode::Escape) {
            break;
        }

        rotation += get_frame_time();

        // Spin the cube in front of the camera
        let mut model = Mat4::IDENTITY;
        model.translate(0.0, 0.0, 4.0);
        model.rotate(0.0, 1.0, 0.0, rotation);
        model.rotate(1.0, 0.0, 0.0, rotation * 0.6);
        ctx.set_model_matrix(model);

        ctx.clear_frame_buffer(fb, 0.0, ClearFlags::COLOR | ClearFlags::DEPTH);

        ctx.bind_texture(Some(texture));
        ctx.bind_vertex_buffer(Some(cube_vb));
        ctx.draw(Primitive::Triangles, cube_count, 0);

        // Immediate-mode overlay triangle, untextured
        ctx.bind_texture(None);
        ctx.set_cull_mode(CullMode::None);
        ctx.set_draw_color(255, 255, 0);
        ctx.begin(Primitive::Triangles);
        ctx.vertex3f(2.2, 1.155, 1.5);
        ctx.vertex3f(3.2, -0.577, 1.5);
        ctx.vertex3f(1.2, -0.577, 1.5);
        ctx.end();
        ctx.set_cull_mode(CullMode::Back);

        let error = ctx.take_error();
        if error != umber::ErrorCode::None {
            log::warn!("frame finished with error: {:?}", error);
        }

        // Blit through the palette
        if let Some(rgba) = ctx.present() {
            let blit = Texture2D::from_rgba8(config.width as u16, config.height as u16, rgba);
            blit.set_filter(FilterMode::Nearest);

            clear_background(BLACK);
            let scale = (screen_width() / config.width as f32)
                .min(screen_height() / config.height as f32);
            let dest = vec2(config.width as f32 * scale, config.height as f32 * scale);
            draw_texture_ex(
                &blit,
                (screen_width() - dest.x) * 0.5,
                (screen_height() - dest.y) * 0.5,
                WHITE,
                DrawTextureParams { dest_size: Some(dest), ..Default::default() },
            );
        }

        next_frame().await
    }
}
