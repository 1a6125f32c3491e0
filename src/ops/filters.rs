// ============================================================================
// FORENSIC FILTERS — pure RGBA → RGBA transforms for display and analysis
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat, RgbImage, RgbaImage};
use rayon::prelude::*;

use crate::canvas::luminance;
use crate::error::FilterError;

/// Standard 3×3 edge-highlighting kernel.
pub const EDGE_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];

/// Channel projection shown in place of the full-colour image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChannelMode {
    #[default]
    Rgb,
    R,
    G,
    B,
    H,
    S,
    V,
    Hsv,
    Y,
    Cb,
    Cr,
    YCbCr,
    L,
}

impl ChannelMode {
    pub fn all() -> &'static [ChannelMode] {
        use ChannelMode::*;
        &[Rgb, R, G, B, H, S, V, Hsv, Y, Cb, Cr, YCbCr, L]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChannelMode::Rgb => "RGB",
            ChannelMode::R => "R",
            ChannelMode::G => "G",
            ChannelMode::B => "B",
            ChannelMode::H => "H",
            ChannelMode::S => "S",
            ChannelMode::V => "V",
            ChannelMode::Hsv => "HSV",
            ChannelMode::Y => "Y",
            ChannelMode::Cb => "Cb",
            ChannelMode::Cr => "Cr",
            ChannelMode::YCbCr => "YCbCr",
            ChannelMode::L => "L",
        }
    }
}

impl FromStr for ChannelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelMode::all()
            .iter()
            .copied()
            .find(|m| m.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown channel '{}'", s))
    }
}

/// Analysis stage, applied last in the display pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    #[default]
    None,
    Equalize,
    Edges,
    Ela,
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AnalysisMode::None),
            "equalize" => Ok(AnalysisMode::Equalize),
            "edges" => Ok(AnalysisMode::Edges),
            "ela" => Ok(AnalysisMode::Ela),
            other => Err(format!("unknown analysis mode '{}'", other)),
        }
    }
}

/// Display-time filter settings. Composed in a fixed order:
/// channel projection → invert → analysis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayFilters {
    pub channel: ChannelMode,
    pub invert: bool,
    pub analysis: AnalysisMode,
    pub ela_quality: u8,
}

impl Default for DisplayFilters {
    fn default() -> Self {
        Self {
            channel: ChannelMode::Rgb,
            invert: false,
            analysis: AnalysisMode::None,
            ela_quality: 90,
        }
    }
}

impl DisplayFilters {
    pub fn is_identity(&self) -> bool {
        self.channel == ChannelMode::Rgb && !self.invert && self.analysis == AnalysisMode::None
    }

    /// Run the pipeline. A failing stage passes its input through unchanged.
    pub fn apply(&self, src: &RgbaImage) -> RgbaImage {
        let mut img = src.clone();
        if self.channel != ChannelMode::Rgb {
            img = guarded("channel", &img, |i| Ok(project_channel(i, self.channel)));
        }
        if self.invert {
            img = guarded("invert", &img, |i| Ok(invert(i)));
        }
        img = match self.analysis {
            AnalysisMode::None => img,
            AnalysisMode::Equalize => guarded("equalize", &img, |i| Ok(equalize(i))),
            AnalysisMode::Edges => guarded("edges", &img, |i| Ok(edges(i))),
            AnalysisMode::Ela => guarded("ela", &img, |i| ela(i, self.ela_quality)),
        };
        img
    }
}

/// Run one filter stage, degrading to the input on error or panic.
pub fn guarded<F>(stage: &'static str, input: &RgbaImage, f: F) -> RgbaImage
where
    F: FnOnce(&RgbaImage) -> Result<RgbaImage, FilterError>,
{
    let outcome = catch_unwind(AssertUnwindSafe(|| f(input))).unwrap_or_else(|payload| {
        Err(FilterError::Panicked { stage, message: panic_message(payload.as_ref()) })
    });
    match outcome {
        Ok(out) => out,
        Err(e) => {
            log_warn!("filter stage '{}' failed, showing input unchanged: {}", stage, e);
            input.clone()
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Row-parallel per-pixel map over an RGBA buffer.
fn map_pixels<F>(src: &RgbaImage, f: F) -> RgbaImage
where
    F: Fn([u8; 4]) -> [u8; 4] + Sync,
{
    let (w, h) = src.dimensions();
    let stride = w as usize * 4;
    let mut dst = RgbaImage::new(w, h);
    if stride == 0 {
        return dst;
    }
    let src_raw = src.as_raw();
    dst.as_mut().par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        let row_in = &src_raw[y * stride..(y + 1) * stride];
        for (px_out, px_in) in row_out.chunks_exact_mut(4).zip(row_in.chunks_exact(4)) {
            px_out.copy_from_slice(&f([px_in[0], px_in[1], px_in[2], px_in[3]]));
        }
    });
    dst
}

// ---------------------------------------------------------------------------
//  Channel projection
// ---------------------------------------------------------------------------

/// Project onto one channel or colour space. Alpha is carried through.
pub fn project_channel(src: &RgbaImage, mode: ChannelMode) -> RgbaImage {
    if mode == ChannelMode::Rgb {
        return src.clone();
    }
    map_pixels(src, |[r, g, b, a]| {
        let gray = |v: u8| [v, v, v, a];
        match mode {
            ChannelMode::Rgb => [r, g, b, a],
            ChannelMode::R => [r, 0, 0, a],
            ChannelMode::G => [0, g, 0, a],
            ChannelMode::B => [0, 0, b, a],
            ChannelMode::H => gray(rgb_to_hsv(r, g, b)[0]),
            ChannelMode::S => gray(rgb_to_hsv(r, g, b)[1]),
            ChannelMode::V => gray(rgb_to_hsv(r, g, b)[2]),
            ChannelMode::Hsv => {
                let [h, s, v] = rgb_to_hsv(r, g, b);
                [h, s, v, a]
            }
            ChannelMode::Y => gray(rgb_to_ycbcr(r, g, b)[0]),
            ChannelMode::Cb => gray(rgb_to_ycbcr(r, g, b)[1]),
            ChannelMode::Cr => gray(rgb_to_ycbcr(r, g, b)[2]),
            ChannelMode::YCbCr => {
                let [y, cb, cr] = rgb_to_ycbcr(r, g, b);
                [y, cb, cr, a]
            }
            ChannelMode::L => gray(luminance(r, g, b)),
        }
    })
}

/// HSV with every component scaled to 0..=255.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let v = max;
    if max == min {
        return [0, 0, v];
    }
    let delta = (max - min) as f32;
    let s = (delta * 255.0 / max as f32).round() as u8;
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let sector = if max == r {
        (gf - bf) / delta
    } else if max == g {
        2.0 + (bf - rf) / delta
    } else {
        4.0 + (rf - gf) / delta
    };
    let mut hue = sector / 6.0;
    if hue < 0.0 {
        hue += 1.0;
    }
    let h = (hue * 255.0).round().clamp(0.0, 255.0) as u8;
    [h, s, v]
}

/// Full-range BT.601 YCbCr.
pub fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let cb = 128.0 - 0.168736 * rf - 0.331264 * gf + 0.5 * bf;
    let cr = 128.0 + 0.5 * rf - 0.418688 * gf - 0.081312 * bf;
    [
        luminance(r, g, b),
        cb.round().clamp(0.0, 255.0) as u8,
        cr.round().clamp(0.0, 255.0) as u8,
    ]
}

// ---------------------------------------------------------------------------
//  Invert / equalize / edges
// ---------------------------------------------------------------------------

/// Complement the colour channels; alpha is left untouched.
pub fn invert(src: &RgbaImage) -> RgbaImage {
    map_pixels(src, |[r, g, b, a]| [255 - r, 255 - g, 255 - b, a])
}

/// Per-channel histogram equalisation of the RGB-converted image.
/// The result is opaque.
pub fn equalize(src: &RgbaImage) -> RgbaImage {
    let hist = Histogram::of(src);
    let luts = [equalize_lut(&hist.r), equalize_lut(&hist.g), equalize_lut(&hist.b)];
    map_pixels(src, |[r, g, b, _]| {
        [luts[0][r as usize], luts[1][g as usize], luts[2][b as usize], 255]
    })
}

/// Cumulative-distribution lookup table. Identity when the channel holds a
/// single value.
fn equalize_lut(hist: &[u32; 256]) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = i as u8;
    }
    let total: u64 = hist.iter().map(|&c| c as u64).sum();
    let last = hist.iter().rposition(|&c| c > 0).map_or(0, |i| hist[i] as u64);
    let step = (total - last) / 255;
    if step == 0 {
        return lut;
    }
    let mut n = step / 2;
    for (i, v) in lut.iter_mut().enumerate() {
        *v = (n / step).min(255) as u8;
        n += hist[i] as u64;
    }
    lut
}

/// Edge highlighting via [`EDGE_KERNEL`] on the RGB-converted image.
/// The result is opaque.
pub fn edges(src: &RgbaImage) -> RgbaImage {
    let rgb = DynamicImage::ImageRgba8(src.clone()).to_rgb8();
    DynamicImage::ImageRgb8(rgb).filter3x3(&EDGE_KERNEL).to_rgba8()
}

// ---------------------------------------------------------------------------
//  Error level analysis
// ---------------------------------------------------------------------------

/// Re-encode as JPEG at `quality`, decode, and amplify the difference.
pub fn ela(src: &RgbaImage, quality: u8) -> Result<RgbaImage, FilterError> {
    let rgb = DynamicImage::ImageRgba8(src.clone()).to_rgb8();
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality.clamp(1, 100)).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ColorType::Rgb8,
    )?;
    let reencoded = image::load_from_memory_with_format(&encoded, ImageFormat::Jpeg)?.to_rgb8();
    Ok(ela_from_reencoded(&rgb, &reencoded))
}

/// Absolute difference scaled so the largest channel difference maps to
/// 255. A zero maximum is treated as 1. The result is opaque.
pub fn ela_from_reencoded(original: &RgbImage, reencoded: &RgbImage) -> RgbaImage {
    let (w, h) = original.dimensions();
    let mut diff = RgbImage::new(w, h);
    let mut max_diff = 0u8;
    for ((d, a), b) in diff.pixels_mut().zip(original.pixels()).zip(reencoded.pixels()) {
        for c in 0..3 {
            d[c] = a[c].abs_diff(b[c]);
            max_diff = max_diff.max(d[c]);
        }
    }
    let max_diff = if max_diff == 0 { 1 } else { max_diff };
    let scale = 255.0 / max_diff as f32;
    let mut out = RgbaImage::new(w, h);
    for (o, d) in out.pixels_mut().zip(diff.pixels()) {
        let amp = |v: u8| (v as f32 * scale).round().clamp(0.0, 255.0) as u8;
        *o = image::Rgba([amp(d[0]), amp(d[1]), amp(d[2]), 255]);
    }
    out
}

// ---------------------------------------------------------------------------
//  Feathering
// ---------------------------------------------------------------------------

/// Erode alpha with a square minimum filter, then Gaussian-blur it.
/// Colour channels are untouched. The order matters: eroding first strips
/// the halo a segmentation leaves behind before the edge is softened.
pub fn feather(src: &RgbaImage, erode_radius: u32, blur_radius: f32) -> RgbaImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let alpha: Vec<u8> = src.pixels().map(|p| p[3]).collect();
    let eroded = erode_alpha(&alpha, w as usize, h as usize, erode_radius as usize);
    let softened = blur_alpha(&eroded, w as usize, h as usize, blur_radius);
    let mut out = src.clone();
    for (px, &a) in out.pixels_mut().zip(softened.iter()) {
        px[3] = a;
    }
    out
}

/// Separable minimum filter over a `(2r+1)²` window, edges clamped.
pub fn erode_alpha(alpha: &[u8], w: usize, h: usize, radius: usize) -> Vec<u8> {
    if radius == 0 {
        return alpha.to_vec();
    }
    let mut horiz = vec![0u8; w * h];
    horiz.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let src = &alpha[y * w..(y + 1) * w];
        for (x, out) in row.iter_mut().enumerate() {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(w - 1);
            *out = src[lo..=hi].iter().copied().min().unwrap_or(0);
        }
    });
    let mut out = vec![0u8; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let lo = y.saturating_sub(radius);
        let hi = (y + radius).min(h - 1);
        for (x, v) in row.iter_mut().enumerate() {
            *v = (lo..=hi).map(|sy| horiz[sy * w + x]).min().unwrap_or(0);
        }
    });
    out
}

/// Build a normalized 1D Gaussian kernel for the given sigma.
fn build_gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as usize;
    if radius == 0 {
        return vec![1.0];
    }
    let len = radius * 2 + 1;
    let mut kernel = vec![0.0f32; len];
    let s2 = 2.0 * sigma * sigma;
    let mut sum = 0.0f32;
    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f32 - radius as f32;
        *k = (-x * x / s2).exp();
        sum += *k;
    }
    let inv = 1.0 / sum;
    for v in &mut kernel {
        *v *= inv;
    }
    kernel
}

/// Rayon-parallel separable Gaussian blur of a single-channel buffer.
pub fn blur_alpha(alpha: &[u8], w: usize, h: usize, sigma: f32) -> Vec<u8> {
    if sigma <= 0.0 || w == 0 || h == 0 {
        return alpha.to_vec();
    }
    let kernel = build_gaussian_kernel(sigma);
    let radius = kernel.len() / 2;

    let mut buf_h = vec![0.0f32; w * h];
    buf_h.par_chunks_mut(w).enumerate().for_each(|(y, row_out)| {
        let row_in = &alpha[y * w..(y + 1) * w];
        for (x, out) in row_out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = (x as isize + ki as isize - radius as isize).clamp(0, w as isize - 1);
                acc += row_in[sx as usize] as f32 * kv;
            }
            *out = acc;
        }
    });

    let mut out = vec![0u8; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row_out)| {
        for (x, out) in row_out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = (y as isize + ki as isize - radius as isize).clamp(0, h as isize - 1);
                acc += buf_h[sy as usize * w + x] * kv;
            }
            *out = acc.round().clamp(0.0, 255.0) as u8;
        }
    });
    out
}

// ---------------------------------------------------------------------------
//  Background segmentation fallback
// ---------------------------------------------------------------------------

/// Mean of the four corner pixels' RGB.
pub fn corner_background_estimate(src: &RgbaImage) -> [f32; 3] {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return [0.0; 3];
    }
    let corners = [(0, 0), (w - 1, 0), (0, h - 1), (w - 1, h - 1)];
    let mut acc = [0.0f32; 3];
    for (x, y) in corners {
        let p = src.get_pixel(x, y);
        for c in 0..3 {
            acc[c] += p[c] as f32;
        }
    }
    acc.map(|v| v / 4.0)
}

/// Pixels closer than `tolerance` (RGB Euclidean) to the corner estimate
/// become transparent. Opacity never increases.
pub fn remove_background_by_corners(src: &RgbaImage, tolerance: f32) -> RgbaImage {
    let bg = corner_background_estimate(src);
    map_pixels(src, |[r, g, b, a]| {
        let d = ((r as f32 - bg[0]).powi(2) + (g as f32 - bg[1]).powi(2) + (b as f32 - bg[2]).powi(2))
            .sqrt();
        let mask = if d < tolerance { 0 } else { 255 };
        [r, g, b, a.min(mask)]
    })
}

// ---------------------------------------------------------------------------
//  Histogram data
// ---------------------------------------------------------------------------

/// Per-channel 256-bin counts, for an external plotting UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    pub r: [u32; 256],
    pub g: [u32; 256],
    pub b: [u32; 256],
}

impl Histogram {
    pub fn of(src: &RgbaImage) -> Self {
        let mut h = Self { r: [0; 256], g: [0; 256], b: [0; 256] };
        for p in src.pixels() {
            h.r[p[0] as usize] += 1;
            h.g[p[1] as usize] += 1;
            h.b[p[2] as usize] += 1;
        }
        h
    }

    pub fn max_count(&self) -> u32 {
        self.r.iter().chain(&self.g).chain(&self.b).copied().max().unwrap_or(0)
    }
}
