// src/main.rs

// Demo driver: renders a sample scene through the pixel pipeline.
//
// Usage: pixel-pipeline [config.json] [out.ppm]

use anyhow::Context;
use log::info;
use pixel_pipeline::command::DrawSprite;
use pixel_pipeline::{BlendMode, Canvas, Color, PipelineConfig, PixelPipeline, Point, Rect, Texture};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

const WIDTH: usize = 640;
const HEIGHT: usize = 480;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PipelineConfig::load(&path)
            .with_context(|| format!("Failed to load pipeline config {}", path))?,
        None => PipelineConfig::default(),
    };
    let output = args.next();

    let pipeline = PixelPipeline::new(config).context("Failed to start pixel pipeline")?;
    let mut canvas = Canvas::new(pipeline, WIDTH, HEIGHT)?;

    let started = Instant::now();
    draw_scene(&mut canvas)?;
    let pixels = canvas.read_pixels().context("Rendering failed")?;
    info!(
        "Rendered {}x{} in {:?}, checksum {:016x}",
        WIDTH,
        HEIGHT,
        started.elapsed(),
        checksum(&pixels)
    );

    if let Some(path) = output {
        write_ppm(Path::new(&path), WIDTH, HEIGHT, &pixels)
            .with_context(|| format!("Failed to write {}", path))?;
        info!("Wrote {}", path);
    }

    let stats = canvas.into_pipeline().shutdown()?;
    info!("Pipeline stats: {}", serde_json::to_string(&stats)?);
    Ok(())
}

fn draw_scene(canvas: &mut Canvas) -> anyhow::Result<()> {
    canvas.clear(Color::rgb(16, 16, 32))?;

    // Vertical bands.
    for i in 0..16 {
        let x = i * (WIDTH as i32 / 16);
        let shade = (i * 16) as u8;
        canvas.fill_rect(
            Rect::from_xywh(x, 0, WIDTH as i32 / 16, HEIGHT as i32),
            Color::rgba(shade, 64, 255 - shade, 96),
        )?;
    }

    // Fan of triangles around the center.
    let (cx, cy) = (WIDTH as f32 / 2.0, HEIGHT as f32 / 2.0);
    let mut fan = Vec::new();
    for i in 0..24 {
        let a0 = i as f32 * std::f32::consts::TAU / 24.0;
        let a1 = (i + 1) as f32 * std::f32::consts::TAU / 24.0;
        if i % 2 == 0 {
            fan.extend_from_slice(&[
                Point::new(cx, cy),
                Point::new(cx + 200.0 * a0.cos(), cy + 200.0 * a0.sin()),
                Point::new(cx + 200.0 * a1.cos(), cy + 200.0 * a1.sin()),
            ]);
        }
    }
    canvas.draw_triangles(&fan, Color::rgba(255, 200, 0, 200))?;

    // Checkerboard sprites, additively blended inside a clip.
    let checker: Vec<u32> = (0..64)
        .map(|i| {
            if (i % 8 + i / 8) % 2 == 0 {
                Color::WHITE.to_argb()
            } else {
                Color::rgba(0, 0, 0, 0).to_argb()
            }
        })
        .collect();
    canvas.set_sampler(0, Arc::new(Texture::from_pixels(8, 8, checker)?))?;
    canvas.set_clip_rect(Rect::new(40, 40, WIDTH as i32 - 40, HEIGHT as i32 - 40))?;
    canvas.set_blend_mode(BlendMode::Add)?;
    for i in 0..6 {
        let sprite = DrawSprite::new(Rect::from_xywh(i * 110, 20 + i * 60, 96, 96), 0)
            .with_tint(Color::rgb(64 + i as u8 * 32, 128, 255 - i as u8 * 32));
        canvas.draw_sprite(sprite)?;
    }
    canvas.reset_clip_rect()?;
    canvas.set_blend_mode(BlendMode::SrcOver)?;

    // Border lines.
    let (w, h) = (WIDTH as i32 - 1, HEIGHT as i32 - 1);
    for (from, to) in [((0, 0), (w, 0)), ((w, 0), (w, h)), ((w, h), (0, h)), ((0, h), (0, 0))] {
        canvas.draw_line(from, to, Color::WHITE)?;
    }
    canvas.draw_line((0, 0), (w, h), Color::GREEN)?;
    canvas.draw_line((0, h), (w, 0), Color::GREEN)?;

    // A pixel block in the corner.
    let block: Vec<u32> = (0..32 * 32)
        .map(|i| Color::rgb((i % 32 * 8) as u8, (i / 32 * 8) as u8, 128).to_argb())
        .collect();
    canvas.draw_pixels(WIDTH as i32 - 48, 16, 32, 32, &block)?;
    Ok(())
}

/// FNV-1a over the packed pixels.
fn checksum(pixels: &[u32]) -> u64 {
    pixels
        .iter()
        .flat_map(|p| p.to_le_bytes())
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
            (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
        })
}

fn write_ppm(path: &Path, width: usize, height: usize, pixels: &[u32]) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "P6\n{} {}\n255\n", width, height)?;
    for &pixel in pixels {
        let c = Color::from_argb(pixel);
        out.write_all(&[c.r, c.g, c.b])?;
    }
    out.flush()
}
