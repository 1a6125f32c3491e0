// ============================================================================
// COMPOSITOR — assemble the displayed / exported raster and commit pastes
// ============================================================================

use image::{Rgba, RgbaImage, imageops};

use crate::canvas::{RasterImage, ViewTransform};
use crate::components::history::HistoryManager;
use crate::ops::floating::FloatingLayer;

/// Canvas colour behind the image.
pub const CANVAS_BACKGROUND: Rgba<u8> = Rgba([0x2b, 0x2b, 0x2b, 255]);
pub const GRID_COLOR: Rgba<u8> = Rgba([0, 255, 0, 128]);
pub const BORDER_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
/// Grid spacing in image pixels.
pub const GRID_STEP: f64 = 50.0;
/// Grid lines are never drawn closer than this on the canvas.
pub const MIN_GRID_STEP: f64 = 10.0;

/// Src-over composite.
pub fn alpha_blend(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    if src[3] == 0 {
        return dst;
    }
    if src[3] == 255 || dst[3] == 0 {
        return src;
    }
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a < 0.001 {
        return Rgba([0, 0, 0, 0]);
    }
    let inv = 1.0 / out_a;
    let mix = |s: u8, d: u8| {
        ((s as f32 * sa + d as f32 * da * (1.0 - sa)) * inv).round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

/// Draw `src` onto `dst` with its top-left at `(x, y)`, clipped.
/// `blend = false` overwrites instead of compositing.
pub fn draw_onto(dst: &mut RgbaImage, src: &RgbaImage, x: i64, y: i64, blend: bool) {
    let (dw, dh) = (dst.width() as i64, dst.height() as i64);
    let (sw, sh) = (src.width() as i64, src.height() as i64);
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + sw).min(dw);
    let y1 = (y + sh).min(dh);
    for dy in y0..y1 {
        for dx in x0..x1 {
            let s = *src.get_pixel((dx - x) as u32, (dy - y) as u32);
            let d = dst.get_pixel_mut(dx as u32, dy as u32);
            *d = if blend { alpha_blend(*d, s) } else { s };
        }
    }
}

// ---------------------------------------------------------------------------
//  View rendering
// ---------------------------------------------------------------------------

/// Render a `canvas`-sized view: the filtered base resampled for the view
/// scale, the floating layer over it, and optionally the grid overlay.
/// Only the visible part of the image is resampled.
pub fn render_view(
    filtered: &RgbaImage,
    view: &ViewTransform,
    canvas: (u32, u32),
    floating: Option<&FloatingLayer>,
    show_grid: bool,
) -> RgbaImage {
    let (cw, ch) = canvas;
    let mut out = RgbaImage::from_pixel(cw.max(1), ch.max(1), CANVAS_BACKGROUND);
    let (iw, ih) = filtered.dimensions();
    let (disp_w, disp_h) = view.displayed_size(iw, ih);
    if disp_w < 1 || disp_h < 1 {
        return out;
    }
    let scale = view.scale();
    let pan = (view.pan_x as f64, view.pan_y as f64);
    draw_scaled_visible(&mut out, filtered, pan, scale, view.display_filter());

    if let Some(layer) = floating {
        draw_scaled_visible(&mut out, layer.current(), layer.top_left, scale, view.display_filter());
    }

    if show_grid {
        draw_grid(&mut out, view, disp_w, disp_h);
    }
    out
}

/// Draw `src`, displayed at `origin` with `scale` canvas units per source
/// pixel, onto `out`. Only the part of `src` that lands on `out` is
/// resampled.
fn draw_scaled_visible(
    out: &mut RgbaImage,
    src: &RgbaImage,
    origin: (f64, f64),
    scale: f64,
    filter: imageops::FilterType,
) {
    let (sw, sh) = src.dimensions();
    let (cw, ch) = (out.width() as f64, out.height() as f64);
    let to_src = |c: f64, o: f64, max: u32| ((c - o) / scale).clamp(0.0, max as f64);
    let x0 = to_src(0.0, origin.0, sw).floor() as u32;
    let y0 = to_src(0.0, origin.1, sh).floor() as u32;
    let x1 = to_src(cw, origin.0, sw).ceil() as u32;
    let y1 = to_src(ch, origin.1, sh).ceil() as u32;
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    let crop = imageops::crop_imm(src, x0, y0, x1 - x0, y1 - y0).to_image();
    let tw = (((x1 - x0) as f64 * scale).round() as u32).max(1);
    let th = (((y1 - y0) as f64 * scale).round() as u32).max(1);
    let resized = imageops::resize(&crop, tw, th, filter);
    let px = origin.0 + x0 as f64 * scale;
    let py = origin.1 + y0 as f64 * scale;
    draw_onto(out, &resized, px.round() as i64, py.round() as i64, true);
}

/// Lines every [`GRID_STEP`] image pixels (at least [`MIN_GRID_STEP`] canvas
/// units apart) plus an outline of the image border.
pub fn draw_grid(out: &mut RgbaImage, view: &ViewTransform, disp_w: u32, disp_h: u32) {
    let step = (GRID_STEP * view.scale()).max(MIN_GRID_STEP) as usize;
    let (pan_x, pan_y) = view.pan();
    let (cw, ch) = (out.width() as i64, out.height() as i64);
    let mut plot = |x: i64, y: i64, color: Rgba<u8>| {
        if x >= 0 && y >= 0 && x < cw && y < ch {
            let d = out.get_pixel_mut(x as u32, y as u32);
            *d = alpha_blend(*d, color);
        }
    };
    let (w, h) = (disp_w as i64, disp_h as i64);
    for i in (0..w).step_by(step) {
        for j in 0..h {
            plot(pan_x as i64 + i, pan_y as i64 + j, GRID_COLOR);
        }
    }
    for j in (0..h).step_by(step) {
        for i in 0..w {
            plot(pan_x as i64 + i, pan_y as i64 + j, GRID_COLOR);
        }
    }
    let (l, t) = (pan_x as i64, pan_y as i64);
    for i in 0..=w {
        plot(l + i, t, BORDER_COLOR);
        plot(l + i, t + h, BORDER_COLOR);
    }
    for j in 0..=h {
        plot(l, t + j, BORDER_COLOR);
        plot(l + w, t + j, BORDER_COLOR);
    }
}

// ---------------------------------------------------------------------------
//  Full resolution / paste
// ---------------------------------------------------------------------------

/// Image pixel nearest to the floating layer's displayed top-left.
pub fn floating_image_origin(layer: &FloatingLayer, view: &ViewTransform) -> (i64, i64) {
    let (ix, iy) = view.canvas_to_image_f(layer.top_left.0, layer.top_left.1);
    (ix.round() as i64, iy.round() as i64)
}

/// The filtered base at full resolution with the floating layer composited
/// over it in image space.
pub fn compose_full_resolution(
    filtered: &RgbaImage,
    view: &ViewTransform,
    floating: Option<&FloatingLayer>,
) -> RgbaImage {
    let mut out = filtered.clone();
    if let Some(layer) = floating {
        let (x, y) = floating_image_origin(layer, view);
        draw_onto(&mut out, layer.current(), x, y, true);
    }
    out
}

/// Commit the floating layer into the base image. The pre-paste base is
/// pushed to history first; the layer is consumed.
pub fn paste(
    history: &mut HistoryManager,
    base: &mut RasterImage,
    layer: FloatingLayer,
    view: &ViewTransform,
) {
    history.push(Some(&*base));
    let (x, y) = floating_image_origin(&layer, view);
    let mut rgba = base.to_rgba8();
    draw_onto(&mut rgba, layer.current(), x, y, layer.has_transparency());
    *base = RasterImage::conform_rgba(rgba, base.format());
    log_info!(
        "pasted {}x{} layer at ({}, {})",
        layer.current().width(),
        layer.current().height(),
        x,
        y
    );
}
