// ============================================================================
// TRANSFORM OPERATIONS — resample and rotate RGBA buffers
// ============================================================================

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

/// Resample to `new_w`×`new_h` (each at least 1 pixel).
pub fn resize_rgba(src: &RgbaImage, new_w: u32, new_h: u32, filter: FilterType) -> RgbaImage {
    let (w, h) = (new_w.max(1), new_h.max(1));
    if (w, h) == src.dimensions() {
        return src.clone();
    }
    imageops::resize(src, w, h, filter)
}

/// Normalise an angle to `[0, 360)`.
pub fn normalize_degrees(deg: f64) -> f64 {
    let d = deg.rem_euclid(360.0);
    if d >= 360.0 { 0.0 } else { d }
}

/// Size of the axis-aligned box enclosing a `w`×`h` rectangle rotated by
/// `degrees`.
pub fn rotated_bounds(w: u32, h: u32, degrees: f64) -> (u32, u32) {
    let (s, c) = degrees.to_radians().sin_cos();
    let (s, c) = (s.abs(), c.abs());
    // Shave float noise so 90° on a 10×20 box is exactly 20×10.
    let bw = (w as f64 * c + h as f64 * s - 1e-6).ceil().max(1.0);
    let bh = (w as f64 * s + h as f64 * c - 1e-6).ceil().max(1.0);
    (bw as u32, bh as u32)
}

/// Rotate clockwise (y-down screen space) by `degrees` into an expanded
/// canvas so no corner is clipped. Uncovered pixels are fully transparent.
/// Right angles are exact pixel permutations.
pub fn rotate_expand(src: &RgbaImage, degrees: f64) -> RgbaImage {
    let norm = normalize_degrees(degrees);
    const EPS: f64 = 1e-9;
    if norm < EPS || (360.0 - norm) < EPS {
        return src.clone();
    }
    if (norm - 90.0).abs() < EPS {
        return imageops::rotate90(src);
    }
    if (norm - 180.0).abs() < EPS {
        return imageops::rotate180(src);
    }
    if (norm - 270.0).abs() < EPS {
        return imageops::rotate270(src);
    }

    let (src_w, src_h) = src.dimensions();
    let (dst_w, dst_h) = rotated_bounds(src_w, src_h, norm);
    let mut dst = RgbaImage::new(dst_w, dst_h);

    let (sin, cos) = norm.to_radians().sin_cos();
    let (scx, scy) = (src_w as f64 * 0.5, src_h as f64 * 0.5);
    let (dcx, dcy) = (dst_w as f64 * 0.5, dst_h as f64 * 0.5);
    let row_bytes = dst_w as usize * 4;

    dst.as_mut().par_chunks_mut(row_bytes).enumerate().for_each(|(dy, row)| {
        let v = dy as f64 + 0.5 - dcy;
        for dx in 0..dst_w as usize {
            let u = dx as f64 + 0.5 - dcx;
            // inverse rotation back into source space
            let sx = u * cos + v * sin + scx - 0.5;
            let sy = -u * sin + v * cos + scy - 0.5;
            let px = bilinear_sample(src, sx as f32, sy as f32);
            row[dx * 4..dx * 4 + 4].copy_from_slice(&px.0);
        }
    });
    dst
}

/// Bilinear interpolation sampling from an RgbaImage. Taps outside the image
/// read as transparent. Colour is interpolated premultiplied by alpha.
pub fn bilinear_sample(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let sample = |sx: i32, sy: i32| -> [f32; 4] {
        if sx < 0 || sy < 0 || sx >= img.width() as i32 || sy >= img.height() as i32 {
            [0.0; 4]
        } else {
            let p = img.get_pixel(sx as u32, sy as u32);
            let a = p[3] as f32 / 255.0;
            [p[0] as f32 * a, p[1] as f32 * a, p[2] as f32 * a, p[3] as f32]
        }
    };

    let taps = [
        (sample(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (sample(x0 + 1, y0), fx * (1.0 - fy)),
        (sample(x0, y0 + 1), (1.0 - fx) * fy),
        (sample(x0 + 1, y0 + 1), fx * fy),
    ];
    let mut acc = [0.0f32; 4];
    for (px, w) in taps {
        for c in 0..4 {
            acc[c] += px[c] * w;
        }
    }

    let alpha = acc[3];
    if alpha < 0.5 {
        return Rgba([0, 0, 0, 0]);
    }
    let unpremul = 255.0 / alpha;
    let channel = |v: f32| (v * unpremul).round().clamp(0.0, 255.0) as u8;
    Rgba([
        channel(acc[0]),
        channel(acc[1]),
        channel(acc[2]),
        alpha.round().clamp(0.0, 255.0) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opaque(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([200, 100, 50, 255]))
    }

    #[test]
    fn right_angle_rotation_swaps_dimensions() {
        let img = opaque(10, 20);
        assert_eq!(rotate_expand(&img, 90.0).dimensions(), (20, 10));
        assert_eq!(rotate_expand(&img, -90.0).dimensions(), (20, 10));
        assert_eq!(rotate_expand(&img, 180.0).dimensions(), (10, 20));
    }

    #[test]
    fn full_turn_is_identity() {
        let mut img = opaque(5, 3);
        img.put_pixel(0, 0, Rgba([1, 2, 3, 4]));
        assert_eq!(rotate_expand(&img, 360.0), img);
        assert_eq!(rotate_expand(&img, -720.0), img);
    }

    #[test]
    fn quarter_turn_is_clockwise() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([0, 0, 255, 255]));
        let out = rotate_expand(&img, 90.0);
        // left pixel ends up on top after a clockwise turn
        assert_eq!(out.get_pixel(0, 0)[0], 255);
        assert_eq!(out.get_pixel(0, 1)[2], 255);
    }

    #[test]
    fn diagonal_rotation_expands_and_keeps_corners_transparent() {
        let img = opaque(10, 10);
        let out = rotate_expand(&img, 45.0);
        assert_eq!(out.dimensions(), (15, 15));
        assert_eq!(out.get_pixel(0, 0)[3], 0);
        assert_eq!(out.get_pixel(14, 14)[3], 0);
        assert_eq!(out.get_pixel(7, 7)[3], 255);
    }

    #[test]
    fn bounds_match_rotation() {
        assert_eq!(rotated_bounds(10, 20, 0.0), (10, 20));
        assert_eq!(rotated_bounds(10, 20, 90.0), (20, 10));
        assert_eq!(rotated_bounds(100, 100, 45.0), (142, 142));
    }

    #[test]
    fn normalize_wraps_negative_angles() {
        assert_eq!(normalize_degrees(-90.0), 270.0);
        assert_eq!(normalize_degrees(725.0), 5.0);
    }

    #[test]
    fn resize_clamps_to_one_pixel() {
        let out = resize_rgba(&opaque(4, 4), 0, 0, FilterType::Lanczos3);
        assert_eq!(out.dimensions(), (1, 1));
    }

    #[test]
    fn rotated_edges_keep_their_colour() {
        let img = RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255]));
        let out = rotate_expand(&img, 30.0);
        let mut partial = 0;
        for p in out.pixels().filter(|p| p[3] > 0) {
            assert_eq!(&p.0[..3], &[255, 255, 255], "edge pixel {:?}", p);
            if p[3] < 255 {
                partial += 1;
            }
        }
        assert!(partial > 0);
    }

    #[test]
    fn sampling_between_opaque_and_outside_keeps_rgb() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([200, 100, 50, 255]));
        let p = bilinear_sample(&img, 1.5, 0.0);
        assert_eq!(p.0, [200, 100, 50, 128]);
    }
}
