use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma, RgbImage, RgbaImage};

// ============================================================================
// RASTER IMAGE — the session's base pixel buffer
// ============================================================================

/// Pixel layouts the engine keeps a base image in. Every decoded image is
/// normalised into one of these at load time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb,
    Rgba,
    Luma,
}

impl PixelFormat {
    /// Conventional short mode name ("RGB", "RGBA", "L").
    pub fn mode_name(&self) -> &'static str {
        match self {
            PixelFormat::Rgb => "RGB",
            PixelFormat::Rgba => "RGBA",
            PixelFormat::Luma => "L",
        }
    }
}

/// BT.601 luma. The single luminance formula used by every code path
/// (L and Y projections, conversion back to a single-channel base).
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Convert RGBA to single-channel using [`luminance`]; alpha is dropped.
pub fn rgba_to_luma(src: &RgbaImage) -> GrayImage {
    let mut out = GrayImage::new(src.width(), src.height());
    for (dst, px) in out.pixels_mut().zip(src.pixels()) {
        *dst = Luma([luminance(px[0], px[1], px[2])]);
    }
    out
}

/// An owned raster. Cloning is always a deep copy of the pixel buffer, so a
/// clone stored elsewhere never observes later mutation of the original.
#[derive(Clone, Debug)]
pub struct RasterImage {
    pixels: DynamicImage,
}

impl RasterImage {
    /// Normalise any decoded image into RGB8, RGBA8 or L8.
    pub fn from_dynamic(img: DynamicImage) -> Self {
        let pixels = match img {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) | DynamicImage::ImageLuma8(_) => img,
            DynamicImage::ImageLuma16(_) => DynamicImage::ImageLuma8(img.to_luma8()),
            DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgb32F(_) => {
                DynamicImage::ImageRgb8(img.to_rgb8())
            }
            other => DynamicImage::ImageRgba8(other.to_rgba8()),
        };
        Self { pixels }
    }

    pub fn from_rgba(img: RgbaImage) -> Self {
        Self { pixels: DynamicImage::ImageRgba8(img) }
    }

    pub fn from_rgb(img: RgbImage) -> Self {
        Self { pixels: DynamicImage::ImageRgb8(img) }
    }

    pub fn from_luma(img: GrayImage) -> Self {
        Self { pixels: DynamicImage::ImageLuma8(img) }
    }

    /// Build a raster of `format` from RGBA working pixels. Used to write an
    /// RGBA composite back into a base image without changing its layout.
    pub fn conform_rgba(rgba: RgbaImage, format: PixelFormat) -> Self {
        match format {
            PixelFormat::Rgba => Self::from_rgba(rgba),
            PixelFormat::Rgb => Self::from_rgb(DynamicImage::ImageRgba8(rgba).to_rgb8()),
            PixelFormat::Luma => Self::from_luma(rgba_to_luma(&rgba)),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn format(&self) -> PixelFormat {
        match &self.pixels {
            DynamicImage::ImageRgb8(_) => PixelFormat::Rgb,
            DynamicImage::ImageLuma8(_) => PixelFormat::Luma,
            _ => PixelFormat::Rgba,
        }
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.pixels
    }

    pub fn to_rgba8(&self) -> RgbaImage {
        self.pixels.to_rgba8()
    }

    pub fn to_rgb8(&self) -> RgbImage {
        self.pixels.to_rgb8()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.pixels.as_bytes()
    }

    pub fn memory_bytes(&self) -> usize {
        self.as_bytes().len()
    }

    /// RGBA value at (x, y), or `None` outside the image.
    pub fn pixel_rgba(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let p = match &self.pixels {
            DynamicImage::ImageRgb8(img) => {
                let p = img.get_pixel(x, y);
                [p[0], p[1], p[2], 255]
            }
            DynamicImage::ImageLuma8(img) => {
                let v = img.get_pixel(x, y)[0];
                [v, v, v, 255]
            }
            DynamicImage::ImageRgba8(img) => img.get_pixel(x, y).0,
            other => image::GenericImageView::get_pixel(other, x, y).0,
        };
        Some(p)
    }
}

impl PartialEq for RasterImage {
    fn eq(&self, other: &Self) -> bool {
        self.format() == other.format()
            && self.dimensions() == other.dimensions()
            && self.as_bytes() == other.as_bytes()
    }
}

// ============================================================================
// VIEW TRANSFORM — canvas <-> image coordinates under pan/scale
// ============================================================================

/// Fraction of the canvas an image occupies after fit-to-screen.
const FIT_MARGIN: f64 = 0.9;

/// Above this scale the display is resampled nearest-neighbour so pixel
/// boundaries stay visible.
pub const NEAREST_ABOVE_SCALE: f64 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    /// Canvas units per image pixel. Always > 0.
    scale: f64,
    pub pan_x: i32,
    pub pan_y: i32,
    min_scale: f64,
    max_scale: f64,
    zoom_step: f64,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::with_limits(0.05, 40.0, 1.1)
    }
}

impl ViewTransform {
    /// `min_scale`/`max_scale` bound wheel zoom only; `zoom_step` is the
    /// per-tick factor.
    pub fn with_limits(min_scale: f64, max_scale: f64, zoom_step: f64) -> Self {
        let min_scale = if min_scale > 0.0 { min_scale } else { 0.05 };
        Self {
            scale: 1.0,
            pan_x: 0,
            pan_y: 0,
            min_scale,
            max_scale: max_scale.max(min_scale),
            zoom_step: zoom_step.max(1.001),
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Set the scale directly. Non-positive or non-finite values are ignored.
    pub fn set_scale(&mut self, scale: f64) {
        if scale.is_finite() && scale > 0.0 {
            self.scale = scale;
        }
    }

    pub fn pan(&self) -> (i32, i32) {
        (self.pan_x, self.pan_y)
    }

    pub fn image_to_canvas(&self, ix: f64, iy: f64) -> (f64, f64) {
        (
            ix * self.scale + self.pan_x as f64,
            iy * self.scale + self.pan_y as f64,
        )
    }

    /// Canvas point to integer image pixel, truncated toward zero.
    pub fn canvas_to_image(&self, cx: f64, cy: f64) -> (i32, i32) {
        let (ix, iy) = self.canvas_to_image_f(cx, cy);
        (ix.trunc() as i32, iy.trunc() as i32)
    }

    /// Canvas point to fractional image coordinates.
    pub fn canvas_to_image_f(&self, cx: f64, cy: f64) -> (f64, f64) {
        (
            (cx - self.pan_x as f64) / self.scale,
            (cy - self.pan_y as f64) / self.scale,
        )
    }

    /// Size of the image on the canvas at the current scale.
    pub fn displayed_size(&self, image_w: u32, image_h: u32) -> (u32, u32) {
        (
            (image_w as f64 * self.scale) as u32,
            (image_h as f64 * self.scale) as u32,
        )
    }

    /// Scale the image to 90% of the limiting canvas dimension and centre it.
    pub fn fit_to_screen(&mut self, canvas: (u32, u32), image: (u32, u32)) {
        let (cw, ch) = canvas;
        let (iw, ih) = image;
        if iw == 0 || ih == 0 || cw == 0 || ch == 0 {
            return;
        }
        let scale_w = cw as f64 / iw as f64;
        let scale_h = ch as f64 / ih as f64;
        self.scale = scale_w.min(scale_h) * FIT_MARGIN;
        self.center(canvas, image);
    }

    /// Real pixels (scale 1), centred.
    pub fn set_zoom_1to1(&mut self, canvas: (u32, u32), image: (u32, u32)) {
        self.scale = 1.0;
        self.center(canvas, image);
    }

    /// One wheel tick. The result is clamped to the configured bounds, but a
    /// scale already outside them (e.g. after fitting a huge image) is never
    /// pushed further out nor snapped.
    pub fn zoom(&mut self, direction: ZoomDirection) {
        self.scale = match direction {
            ZoomDirection::In => {
                let next = self.scale * self.zoom_step;
                if next > self.max_scale { self.max_scale.max(self.scale) } else { next }
            }
            ZoomDirection::Out => {
                let next = self.scale / self.zoom_step;
                if next < self.min_scale { self.min_scale.min(self.scale) } else { next }
            }
        };
    }

    pub fn pan_by(&mut self, dx: i32, dy: i32) {
        self.pan_x += dx;
        self.pan_y += dy;
    }

    /// Resampling filter for redraw at the current scale.
    pub fn display_filter(&self) -> FilterType {
        if self.scale > NEAREST_ABOVE_SCALE {
            FilterType::Nearest
        } else {
            FilterType::Triangle
        }
    }

    fn center(&mut self, canvas: (u32, u32), image: (u32, u32)) {
        let (new_w, new_h) = self.displayed_size(image.0, image.1);
        self.pan_x = (canvas.0 as i32 - new_w as i32).div_euclid(2);
        self.pan_y = (canvas.1 as i32 - new_h as i32).div_euclid(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_to_screen_centres_with_margin() {
        let mut view = ViewTransform::default();
        view.fit_to_screen((800, 600), (100, 100));
        assert!((view.scale() - 5.4).abs() < 1e-9);
        assert_eq!(view.pan(), (130, 30));
    }

    #[test]
    fn zoom_1to1_centres_even_when_image_is_larger() {
        let mut view = ViewTransform::default();
        view.set_zoom_1to1((100, 100), (301, 50));
        assert_eq!(view.scale(), 1.0);
        // Floor division, like the canvas layout it feeds.
        assert_eq!(view.pan(), (-101, 25));
    }

    #[test]
    fn canvas_image_round_trip_within_one_unit() {
        for &scale_target in &[0.07, 0.5, 1.0, 2.5, 5.4, 33.0] {
            let mut view = ViewTransform::default();
            view.scale = scale_target;
            view.pan_x = 17;
            view.pan_y = -9;
            for &(x, y) in &[(0.0, 0.0), (130.0, 30.0), (799.0, 1.0), (-40.0, 612.0)] {
                let (ix, iy) = view.canvas_to_image_f(x, y);
                let (bx, by) = view.image_to_canvas(ix, iy);
                assert!((bx - x).abs() <= 1.0 && (by - y).abs() <= 1.0);
            }
        }
    }

    #[test]
    fn canvas_to_image_truncates_toward_zero() {
        let mut view = ViewTransform::default();
        view.scale = 2.0;
        view.pan_x = 10;
        view.pan_y = 10;
        assert_eq!(view.canvas_to_image(15.0, 13.0), (2, 1));
        // -1.5 truncates to -1, not -2
        assert_eq!(view.canvas_to_image(7.0, 10.0), (-1, 0));
    }

    #[test]
    fn wheel_zoom_is_clamped() {
        let mut view = ViewTransform::with_limits(0.5, 2.0, 1.5);
        for _ in 0..10 {
            view.zoom(ZoomDirection::In);
        }
        assert_eq!(view.scale(), 2.0);
        for _ in 0..10 {
            view.zoom(ZoomDirection::Out);
        }
        assert_eq!(view.scale(), 0.5);
    }

    #[test]
    fn zoom_in_from_below_minimum_is_not_snapped() {
        let mut view = ViewTransform::with_limits(0.05, 40.0, 1.1);
        view.fit_to_screen((100, 100), (20_000, 20_000));
        let fitted = view.scale();
        assert!(fitted < 0.05);
        view.zoom(ZoomDirection::Out);
        assert_eq!(view.scale(), fitted);
        view.zoom(ZoomDirection::In);
        assert!((view.scale() - fitted * 1.1).abs() < 1e-12);
    }

    #[test]
    fn nearest_filter_only_when_magnified() {
        let mut view = ViewTransform::default();
        view.scale = 2.0;
        assert_eq!(view.display_filter(), FilterType::Triangle);
        view.scale = 2.01;
        assert_eq!(view.display_filter(), FilterType::Nearest);
    }

    #[test]
    fn raster_normalises_luma_alpha_to_rgba() {
        let la = image::GrayAlphaImage::from_pixel(2, 2, image::LumaA([10, 128]));
        let raster = RasterImage::from_dynamic(DynamicImage::ImageLumaA8(la));
        assert_eq!(raster.format(), PixelFormat::Rgba);
        assert_eq!(raster.pixel_rgba(1, 1), Some([10, 10, 10, 128]));
        assert_eq!(raster.pixel_rgba(2, 0), None);
    }

    #[test]
    fn conform_back_to_luma_uses_bt601() {
        let rgba = RgbaImage::from_pixel(1, 1, image::Rgba([255, 0, 0, 255]));
        let raster = RasterImage::conform_rgba(rgba, PixelFormat::Luma);
        assert_eq!(raster.pixel_rgba(0, 0), Some([76, 76, 76, 255]));
    }
}
