// ---------------------------------------------------------------------------
//  Floating layer — transformable region above the base image
// ---------------------------------------------------------------------------

use image::RgbaImage;
use image::imageops::FilterType;
use uuid::Uuid;

use crate::ops::selection::Capture;
use crate::ops::transform::{normalize_degrees, resize_rgba, rotate_expand};

pub const MIN_SCALE_PERCENT: f64 = 10.0;
pub const MAX_SCALE_PERCENT: f64 = 500.0;
/// Grab radius of the corner and rotate handles, canvas units.
pub const HANDLE_RADIUS: f64 = 8.0;
/// Distance of the rotate handle above the top edge, canvas units.
pub const ROTATE_HANDLE_OFFSET: f64 = 25.0;

/// What a drag on the layer is doing. Chosen once at drag start by hit-testing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InteractionMode {
    #[default]
    None,
    Move,
    Scale,
    Rotate,
}

/// Layer state captured at drag start; every drag update is computed
/// relative to it.
#[derive(Clone, Copy, Debug)]
struct DragStart {
    pointer: (f64, f64),
    top_left: (f64, f64),
    scale_percent: f64,
    rotation_degrees: f64,
    pivot: (f64, f64),
    distance: f64,
    angle: f64,
}

/// A captured or loaded region floating above the base image.
///
/// `current` is always `rotate(resize(base_reference, scale), rotation)`,
/// recomputed from the untouched base on every parameter change.
#[derive(Clone, Debug)]
pub struct FloatingLayer {
    id: Uuid,
    base_reference: RgbaImage,
    scale_percent: f64,
    rotation_degrees: f64,
    /// Canvas position of the current transformed bounding box.
    pub top_left: (f64, f64),
    current: RgbaImage,
    interaction: InteractionMode,
    drag: Option<DragStart>,
}

impl FloatingLayer {
    pub fn new(base_reference: RgbaImage, top_left: (f64, f64)) -> Self {
        let current = base_reference.clone();
        Self {
            id: Uuid::new_v4(),
            base_reference,
            scale_percent: 100.0,
            rotation_degrees: 0.0,
            top_left,
            current,
            interaction: InteractionMode::None,
            drag: None,
        }
    }

    pub fn from_capture(capture: Capture) -> Self {
        Self::new(capture.pixels, capture.canvas_top_left)
    }

    /// A layer centred on a `canvas_w`×`canvas_h` canvas.
    pub fn centered(base_reference: RgbaImage, canvas: (u32, u32), view_scale: f64) -> Self {
        let mut layer = Self::new(base_reference, (0.0, 0.0));
        let (w, h) = layer.canvas_size(view_scale);
        layer.top_left = ((canvas.0 as f64 - w) * 0.5, (canvas.1 as f64 - h) * 0.5);
        layer
    }

    /// Identity of this layer instance; a new capture gets a new id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn base_reference(&self) -> &RgbaImage {
        &self.base_reference
    }

    pub fn current(&self) -> &RgbaImage {
        &self.current
    }

    pub fn scale_percent(&self) -> f64 {
        self.scale_percent
    }

    pub fn rotation_degrees(&self) -> f64 {
        self.rotation_degrees
    }

    /// Rotation in `[0, 360)`, for comparisons.
    pub fn normalized_rotation(&self) -> f64 {
        normalize_degrees(self.rotation_degrees)
    }

    pub fn interaction(&self) -> InteractionMode {
        self.interaction
    }

    pub fn has_transparency(&self) -> bool {
        self.current.pixels().any(|p| p[3] < 255)
    }

    // -----------------------------------------------------------------------
    //  Geometry (canvas units)
    // -----------------------------------------------------------------------

    pub fn canvas_size(&self, view_scale: f64) -> (f64, f64) {
        (
            self.current.width() as f64 * view_scale,
            self.current.height() as f64 * view_scale,
        )
    }

    pub fn center(&self, view_scale: f64) -> (f64, f64) {
        let (w, h) = self.canvas_size(view_scale);
        (self.top_left.0 + w * 0.5, self.top_left.1 + h * 0.5)
    }

    /// TL, TR, BL, BR.
    pub fn corners(&self, view_scale: f64) -> [(f64, f64); 4] {
        let (x, y) = self.top_left;
        let (w, h) = self.canvas_size(view_scale);
        [(x, y), (x + w, y), (x, y + h), (x + w, y + h)]
    }

    pub fn rotate_handle(&self, view_scale: f64) -> (f64, f64) {
        let (cx, _) = self.center(view_scale);
        (cx, self.top_left.1 - ROTATE_HANDLE_OFFSET)
    }

    pub fn contains(&self, cx: f64, cy: f64, view_scale: f64) -> bool {
        let (x, y) = self.top_left;
        let (w, h) = self.canvas_size(view_scale);
        cx >= x && cx <= x + w && cy >= y && cy <= y + h
    }

    /// Rotate handle first, then corners, then the body.
    pub fn hit_test(&self, cx: f64, cy: f64, view_scale: f64) -> Option<InteractionMode> {
        let near = |p: (f64, f64)| distance(p, (cx, cy)) <= HANDLE_RADIUS;
        if near(self.rotate_handle(view_scale)) {
            return Some(InteractionMode::Rotate);
        }
        if self.corners(view_scale).into_iter().any(near) {
            return Some(InteractionMode::Scale);
        }
        if self.contains(cx, cy, view_scale) {
            return Some(InteractionMode::Move);
        }
        None
    }

    // -----------------------------------------------------------------------
    //  Interaction
    // -----------------------------------------------------------------------

    /// Start a drag if the pointer hits the layer. Returns whether it did.
    pub fn begin_drag(&mut self, cx: f64, cy: f64, view_scale: f64) -> bool {
        let Some(mode) = self.hit_test(cx, cy, view_scale) else {
            return false;
        };
        let pivot = self.center(view_scale);
        self.interaction = mode;
        self.drag = Some(DragStart {
            pointer: (cx, cy),
            top_left: self.top_left,
            scale_percent: self.scale_percent,
            rotation_degrees: self.rotation_degrees,
            pivot,
            distance: distance(pivot, (cx, cy)),
            angle: (cy - pivot.1).atan2(cx - pivot.0),
        });
        true
    }

    pub fn drag_to(&mut self, cx: f64, cy: f64, view_scale: f64) {
        let Some(start) = self.drag else { return };
        match self.interaction {
            InteractionMode::None => {}
            InteractionMode::Move => {
                self.top_left = (
                    start.top_left.0 + cx - start.pointer.0,
                    start.top_left.1 + cy - start.pointer.1,
                );
            }
            InteractionMode::Scale => {
                if start.distance < 1e-6 {
                    return;
                }
                let ratio = distance(start.pivot, (cx, cy)) / start.distance;
                self.scale_percent = clamp_scale(start.scale_percent * ratio);
                self.recompute(view_scale, start.pivot);
            }
            InteractionMode::Rotate => {
                let angle = (cy - start.pivot.1).atan2(cx - start.pivot.0);
                self.rotation_degrees = start.rotation_degrees + (angle - start.angle).to_degrees();
                self.recompute(view_scale, start.pivot);
            }
        }
    }

    pub fn end_drag(&mut self) {
        self.interaction = InteractionMode::None;
        self.drag = None;
    }

    // -----------------------------------------------------------------------
    //  Programmatic transforms (centre stays fixed)
    // -----------------------------------------------------------------------

    pub fn set_scale_percent(&mut self, percent: f64, view_scale: f64) {
        let pivot = self.center(view_scale);
        self.scale_percent = clamp_scale(percent);
        self.recompute(view_scale, pivot);
    }

    pub fn scale_by(&mut self, ratio: f64, view_scale: f64) {
        self.set_scale_percent(self.scale_percent * ratio, view_scale);
    }

    pub fn set_rotation(&mut self, degrees: f64, view_scale: f64) {
        let pivot = self.center(view_scale);
        self.rotation_degrees = degrees;
        self.recompute(view_scale, pivot);
    }

    /// Swap in a processed base (background removal, feathering) and
    /// re-derive the current pixels around the same centre.
    pub fn replace_base_reference(&mut self, base: RgbaImage, view_scale: f64) {
        let pivot = self.center(view_scale);
        self.base_reference = base;
        self.recompute(view_scale, pivot);
    }

    fn recompute(&mut self, view_scale: f64, pivot: (f64, f64)) {
        let factor = self.scale_percent / 100.0;
        let w = (self.base_reference.width() as f64 * factor).round() as u32;
        let h = (self.base_reference.height() as f64 * factor).round() as u32;
        let scaled = resize_rgba(&self.base_reference, w, h, FilterType::Lanczos3);
        self.current = rotate_expand(&scaled, self.rotation_degrees);
        let (cw, ch) = self.canvas_size(view_scale);
        self.top_left = (pivot.0 - cw * 0.5, pivot.1 - ch * 0.5);
    }
}

fn clamp_scale(percent: f64) -> f64 {
    percent.clamp(MIN_SCALE_PERCENT, MAX_SCALE_PERCENT)
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}
