// ============================================================================
// SELECTION ENGINE — capture a region of the base image as an RGBA crop
// ============================================================================

use image::{GrayImage, Luma, RgbaImage};

use crate::canvas::{RasterImage, ViewTransform};

/// Selections narrower or shorter than this (canvas units) are discarded.
pub const MIN_SELECTION_EXTENT: f64 = 5.0;
/// Freehand needs at least this many captured points to close a polygon.
pub const MIN_FREEHAND_POINTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionShape {
    Rect,
    Oval,
    Freehand,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectionState {
    Idle,
    Capturing {
        shape: SelectionShape,
        start: (f64, f64),
        current: (f64, f64),
        /// Every pointer position, start included (Freehand only).
        points: Vec<(f64, f64)>,
    },
}

/// Result of a finalized selection.
#[derive(Clone, Debug)]
pub struct Capture {
    /// Cropped pixels with the shape mask folded into alpha.
    pub pixels: RgbaImage,
    /// Top-left of the crop in image pixels.
    pub image_origin: (u32, u32),
    /// Top-left of the crop in canvas units.
    pub canvas_top_left: (f64, f64),
}

#[derive(Debug)]
pub struct SelectionEngine {
    state: SelectionState,
}

impl Default for SelectionEngine {
    fn default() -> Self {
        Self { state: SelectionState::Idle }
    }
}

impl SelectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, SelectionState::Capturing { .. })
    }

    /// Pointer-down with the select tool. Restarts any capture in progress.
    pub fn begin(&mut self, shape: SelectionShape, cx: f64, cy: f64) {
        self.state = SelectionState::Capturing {
            shape,
            start: (cx, cy),
            current: (cx, cy),
            points: vec![(cx, cy)],
        };
    }

    /// Pointer-move while capturing.
    pub fn update(&mut self, cx: f64, cy: f64) {
        if let SelectionState::Capturing { shape, current, points, .. } = &mut self.state {
            *current = (cx, cy);
            if *shape == SelectionShape::Freehand {
                points.push((cx, cy));
            }
        }
    }

    pub fn cancel(&mut self) {
        self.state = SelectionState::Idle;
    }

    /// Canvas-space bounding box of the capture in progress, for drawing
    /// the marquee: `(min_x, min_y, max_x, max_y)`.
    pub fn live_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        match &self.state {
            SelectionState::Idle => None,
            SelectionState::Capturing { shape, start, current, points } => {
                Some(canvas_bounds(*shape, *start, *current, points))
            }
        }
    }

    /// Pointer-up. Always returns to Idle. Degenerate selections and
    /// selections entirely outside the image yield `None`.
    pub fn finish(&mut self, base: &RasterImage, view: &ViewTransform) -> Option<Capture> {
        let state = std::mem::replace(&mut self.state, SelectionState::Idle);
        let SelectionState::Capturing { shape, start, current, points } = state else {
            return None;
        };

        if shape == SelectionShape::Freehand && points.len() < MIN_FREEHAND_POINTS {
            log_debug!("freehand selection discarded: {} points", points.len());
            return None;
        }
        let (min_x, min_y, max_x, max_y) = canvas_bounds(shape, start, current, &points);
        if max_x - min_x < MIN_SELECTION_EXTENT || max_y - min_y < MIN_SELECTION_EXTENT {
            log_debug!("selection discarded: extent below {}", MIN_SELECTION_EXTENT);
            return None;
        }

        let (img_w, img_h) = base.dimensions();
        let (ax, ay) = view.canvas_to_image(min_x, min_y);
        let (bx, by) = view.canvas_to_image(max_x, max_y);
        let x0 = ax.clamp(0, img_w as i32) as u32;
        let y0 = ay.clamp(0, img_h as i32) as u32;
        let x1 = bx.clamp(0, img_w as i32) as u32;
        let y1 = by.clamp(0, img_h as i32) as u32;
        if x1 <= x0 || y1 <= y0 {
            log_debug!("selection discarded: outside the image");
            return None;
        }

        let mut pixels =
            image::imageops::crop_imm(&base.to_rgba8(), x0, y0, x1 - x0, y1 - y0).to_image();

        // Mask geometry is built from the unclamped shape in crop-local
        // image coordinates, so clipping by the image edge never reshapes it.
        let local = |cx: f64, cy: f64| {
            let (ix, iy) = view.canvas_to_image_f(cx, cy);
            (ix - x0 as f64, iy - y0 as f64)
        };
        let mask = match shape {
            SelectionShape::Rect => None,
            SelectionShape::Oval => {
                let (l, t) = local(min_x, min_y);
                let (r, b) = local(max_x, max_y);
                Some(ellipse_mask(pixels.width(), pixels.height(), (l, t, r, b)))
            }
            SelectionShape::Freehand => {
                let poly: Vec<(f64, f64)> = points.iter().map(|&(x, y)| local(x, y)).collect();
                Some(polygon_mask(pixels.width(), pixels.height(), &poly))
            }
        };
        if let Some(mask) = mask {
            apply_mask_to_alpha(&mut pixels, &mask);
        }

        Some(Capture {
            pixels,
            image_origin: (x0, y0),
            canvas_top_left: view.image_to_canvas(x0 as f64, y0 as f64),
        })
    }
}

fn canvas_bounds(
    shape: SelectionShape,
    start: (f64, f64),
    current: (f64, f64),
    points: &[(f64, f64)],
) -> (f64, f64, f64, f64) {
    match shape {
        SelectionShape::Rect | SelectionShape::Oval => (
            start.0.min(current.0),
            start.1.min(current.1),
            start.0.max(current.0),
            start.1.max(current.1),
        ),
        SelectionShape::Freehand => points.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(a, b, c, d), &(x, y)| (a.min(x), b.min(y), c.max(x), d.max(y)),
        ),
    }
}

/// Filled ellipse inscribed in `(left, top, right, bottom)`, tested at pixel
/// centres.
pub fn ellipse_mask(w: u32, h: u32, bounds: (f64, f64, f64, f64)) -> GrayImage {
    let (l, t, r, b) = bounds;
    let (cx, cy) = ((l + r) * 0.5, (t + b) * 0.5);
    let (rx, ry) = (((r - l) * 0.5).max(1e-6), ((b - t) * 0.5).max(1e-6));
    GrayImage::from_fn(w, h, |x, y| {
        let dx = (x as f64 + 0.5 - cx) / rx;
        let dy = (y as f64 + 0.5 - cy) / ry;
        Luma([if dx * dx + dy * dy <= 1.0 { 255 } else { 0 }])
    })
}

/// Scanline polygon fill (even-odd), closing edge included.
pub fn polygon_mask(w: u32, h: u32, points: &[(f64, f64)]) -> GrayImage {
    let mut mask = GrayImage::new(w, h);
    let n = points.len();
    if n < MIN_FREEHAND_POINTS {
        return mask;
    }
    let mut nodes: Vec<f64> = Vec::new();
    for y in 0..h {
        let yf = y as f64 + 0.5; // centre of pixel row
        nodes.clear();
        for i in 0..n {
            let j = (i + 1) % n;
            let (xi, yi) = points[i];
            let (xj, yj) = points[j];
            if (yi < yf && yj >= yf) || (yj < yf && yi >= yf) {
                let t = (yf - yi) / (yj - yi);
                nodes.push(xi + t * (xj - xi));
            }
        }
        nodes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        for pair in nodes.chunks_exact(2) {
            // pixels whose centre lies inside the span
            let x_start = (pair[0] - 0.5).ceil().max(0.0) as u32;
            let x_end = ((pair[1] - 0.5).floor() + 1.0).max(0.0) as u32;
            for x in x_start.min(w)..x_end.min(w) {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
    mask
}

/// Fold a coverage mask into alpha, never raising existing opacity.
pub fn apply_mask_to_alpha(pixels: &mut RgbaImage, mask: &GrayImage) {
    for (px, m) in pixels.pixels_mut().zip(mask.pixels()) {
        px[3] = px[3].min(m[0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn base(w: u32, h: u32) -> RasterImage {
        RasterImage::from_rgb(RgbImage::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, 7])))
    }

    fn identity_view() -> ViewTransform {
        ViewTransform::default()
    }

    #[test]
    fn tiny_selection_is_discarded() {
        let mut sel = SelectionEngine::new();
        sel.begin(SelectionShape::Rect, 10.0, 10.0);
        sel.update(14.0, 40.0);
        assert!(sel.finish(&base(50, 50), &identity_view()).is_none());
        assert_eq!(sel.state(), &SelectionState::Idle);
    }

    #[test]
    fn freehand_needs_three_points() {
        let mut sel = SelectionEngine::new();
        sel.begin(SelectionShape::Freehand, 0.0, 0.0);
        sel.update(30.0, 30.0);
        assert!(sel.finish(&base(50, 50), &identity_view()).is_none());
    }

    #[test]
    fn rect_crops_and_is_fully_opaque() {
        let mut sel = SelectionEngine::new();
        sel.begin(SelectionShape::Rect, 30.0, 25.0);
        sel.update(10.0, 5.0);
        let cap = sel.finish(&base(50, 50), &identity_view()).unwrap();
        assert_eq!(cap.image_origin, (10, 5));
        assert_eq!(cap.pixels.dimensions(), (20, 20));
        assert_eq!(cap.pixels.get_pixel(0, 0).0, [10, 5, 7, 255]);
        assert!(cap.pixels.pixels().all(|p| p[3] == 255));
    }

    #[test]
    fn selection_is_clamped_to_image_and_mapped_through_view() {
        let mut view = identity_view();
        view.fit_to_screen((200, 200), (50, 50)); // scale 3.6, pan 10
        let mut sel = SelectionEngine::new();
        sel.begin(SelectionShape::Rect, 0.0, 0.0);
        sel.update(46.0, 1000.0);
        let cap = sel.finish(&base(50, 50), &view).unwrap();
        assert_eq!(cap.image_origin, (0, 0));
        assert_eq!(cap.pixels.dimensions(), (10, 50));
        assert_eq!(cap.canvas_top_left, (10.0, 10.0));
    }

    #[test]
    fn oval_mask_clears_corners() {
        let mut sel = SelectionEngine::new();
        sel.begin(SelectionShape::Oval, 0.0, 0.0);
        sel.update(20.0, 10.0);
        let cap = sel.finish(&base(50, 50), &identity_view()).unwrap();
        assert_eq!(cap.pixels.get_pixel(0, 0)[3], 0);
        assert_eq!(cap.pixels.get_pixel(19, 9)[3], 0);
        assert_eq!(cap.pixels.get_pixel(10, 5)[3], 255);
    }

    #[test]
    fn freehand_triangle_masks_outside() {
        let mut sel = SelectionEngine::new();
        sel.begin(SelectionShape::Freehand, 0.0, 0.0);
        sel.update(20.0, 0.0);
        sel.update(0.0, 20.0);
        let cap = sel.finish(&base(50, 50), &identity_view()).unwrap();
        assert_eq!(cap.pixels.dimensions(), (20, 20));
        assert_eq!(cap.pixels.get_pixel(2, 2)[3], 255);
        assert_eq!(cap.pixels.get_pixel(18, 18)[3], 0);
    }

    #[test]
    fn polygon_fill_square() {
        let sq = [(1.0, 1.0), (4.0, 1.0), (4.0, 4.0), (1.0, 4.0)];
        let mask = polygon_mask(6, 6, &sq);
        let filled = mask.pixels().filter(|p| p[0] == 255).count();
        assert_eq!(filled, 9);
        assert_eq!(mask.get_pixel(1, 1)[0], 255);
        assert_eq!(mask.get_pixel(4, 4)[0], 0);
    }

    #[test]
    fn mask_never_raises_alpha() {
        let mut px = RgbaImage::from_pixel(1, 1, image::Rgba([0, 0, 0, 40]));
        apply_mask_to_alpha(&mut px, &GrayImage::from_pixel(1, 1, Luma([255])));
        assert_eq!(px.get_pixel(0, 0)[3], 40);
    }
}
