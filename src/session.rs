use std::fmt;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::{RasterImage, ViewTransform, ZoomDirection};
use crate::components::history::HistoryManager;
use crate::error::{LoadError, SaveError};
use crate::io::{self, LoadedImage, SaveFormat};
use crate::metadata::ExifRecord;
use crate::ops::ai::{Segmentation, SegmentationTarget, SegmentationTask};
use crate::ops::compositor::{self, CANVAS_BACKGROUND};
use crate::ops::filters::{self, AnalysisMode, ChannelMode, DisplayFilters, Histogram};
use crate::ops::floating::{FloatingLayer, InteractionMode};
use crate::ops::selection::{SelectionEngine, SelectionShape};
use crate::settings::EngineSettings;

/// Default canvas size until the host reports its own.
pub const DEFAULT_CANVAS_SIZE: (u32, u32) = (800, 600);

/// What a pointer drag on empty canvas does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Pan,
    Select(SelectionShape),
}

/// Pixel readout under a canvas point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeReadout {
    NoImage,
    Outside { x: i32, y: i32 },
    Pixel { x: u32, y: u32, rgba: [u8; 4] },
}

impl fmt::Display for ProbeReadout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeReadout::NoImage => write!(f, "No image"),
            ProbeReadout::Outside { x, y } => write!(f, "Outside (X: {} Y: {})", x, y),
            ProbeReadout::Pixel { x, y, rgba } => write!(
                f,
                "X: {} Y: {} | RGBA: ({}, {}, {}, {})",
                x, y, rgba[0], rgba[1], rgba[2], rgba[3]
            ),
        }
    }
}

/// Result of triggering background removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalStart {
    /// Applied synchronously.
    Applied,
    /// Dispatched to a worker; poll for completion.
    Pending,
    /// A job is already running; the control is disabled.
    Busy,
    /// Nothing to act on.
    NoTarget,
}

/// Result of polling a background-removal job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalPoll {
    Idle,
    Pending,
    Applied,
    /// The worker failed; the fallback result was applied instead.
    FellBack,
    /// The floating layer it was meant for no longer exists.
    Dropped,
}

/// One editing session: the base image and everything acting on it.
pub struct Session {
    pub id: Uuid,
    settings: EngineSettings,
    base: Option<RasterImage>,
    /// Bumped on every change to `base`.
    base_generation: u64,
    path: Option<PathBuf>,
    exif: Option<ExifRecord>,
    history: HistoryManager,
    view: ViewTransform,
    canvas_size: (u32, u32),
    tool: Tool,
    selection: SelectionEngine,
    floating: Option<FloatingLayer>,
    filters: DisplayFilters,
    show_grid: bool,
    segmentation: Segmentation,
    pending: Option<SegmentationTask>,
    notice: Option<String>,
    filtered_cache: Option<RgbaImage>,
    pan_anchor: Option<(f64, f64)>,
    is_dirty: bool,
}

impl Session {
    /// Start a session, selecting the segmentation strategy once.
    pub fn new(settings: EngineSettings) -> Self {
        let segmentation =
            Segmentation::select(&settings.segmentation_plugin, settings.background_tolerance);
        Self::with_segmentation(settings, segmentation)
    }

    pub fn with_segmentation(settings: EngineSettings, segmentation: Segmentation) -> Self {
        let view = ViewTransform::with_limits(settings.min_zoom, settings.max_zoom, settings.zoom_step);
        let filters = DisplayFilters { ela_quality: settings.ela_quality, ..Default::default() };
        let mut notice = None;
        if let Some(reason) = segmentation.unavailable_reason() {
            notice = Some(format!(
                "Background segmentation unavailable ({}); corner sampling will be used",
                reason
            ));
        }
        Self {
            id: Uuid::new_v4(),
            history: HistoryManager::new(settings.max_undo_steps),
            settings,
            base: None,
            base_generation: 0,
            path: None,
            exif: None,
            view,
            canvas_size: DEFAULT_CANVAS_SIZE,
            tool: Tool::default(),
            selection: SelectionEngine::new(),
            floating: None,
            filters,
            show_grid: false,
            segmentation,
            pending: None,
            notice,
            filtered_cache: None,
            pan_anchor: None,
            is_dirty: false,
        }
    }

    // ------------------------------------------------------------------
    //  Accessors
    // ------------------------------------------------------------------

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn base(&self) -> Option<&RasterImage> {
        self.base.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn exif(&self) -> Option<&ExifRecord> {
        self.exif.as_ref()
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn view(&self) -> &ViewTransform {
        &self.view
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        self.canvas_size
    }

    pub fn floating(&self) -> Option<&FloatingLayer> {
        self.floating.as_ref()
    }

    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    pub fn filters(&self) -> &DisplayFilters {
        &self.filters
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.tool = tool;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Latest user-visible notice, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    /// Whether a segmentation job is running (progress shown, control
    /// disabled).
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn can_remove_background(&self) -> bool {
        !self.is_busy() && (self.floating.is_some() || self.base.is_some())
    }

    pub fn set_canvas_size(&mut self, width: u32, height: u32) {
        self.canvas_size = (width.max(1), height.max(1));
    }

    // ------------------------------------------------------------------
    //  Load / save
    // ------------------------------------------------------------------

    /// Load a new base image. On failure the session is left untouched.
    pub fn load_image(&mut self, path: &Path) -> Result<(), LoadError> {
        let loaded = io::load_image_sync(path).inspect_err(|e| {
            log_err!("load failed: {}", e);
        })?;
        let exif = ExifRecord::for_image(&loaded);
        let LoadedImage { image, path, .. } = loaded;
        self.open_raster(image);
        self.exif = Some(exif);
        self.path = Some(path);
        Ok(())
    }

    /// Install an in-memory image as the base. History is reset, any
    /// floating layer or running job is discarded, and the view is fitted.
    pub fn open_raster(&mut self, image: RasterImage) {
        self.base = Some(image);
        self.base_generation += 1;
        self.path = None;
        self.exif = None;
        self.history.clear();
        self.floating = None;
        self.selection.cancel();
        self.pending = None;
        self.pan_anchor = None;
        self.is_dirty = false;
        self.invalidate();
        self.fit_to_screen();
    }

    /// Load an image file directly as the floating layer, centred on the
    /// canvas. Replaces any existing floating layer.
    pub fn load_asset(&mut self, path: &Path) -> Result<(), LoadError> {
        let loaded = io::load_image_sync(path).inspect_err(|e| {
            log_err!("asset load failed: {}", e);
        })?;
        self.floating = Some(FloatingLayer::centered(
            loaded.image.to_rgba8(),
            self.canvas_size,
            self.view.scale(),
        ));
        Ok(())
    }

    /// Write the filtered base, with any floating layer over it, at full
    /// resolution.
    pub fn save(&mut self, path: &Path, format: Option<SaveFormat>, quality: u8) -> Result<(), SaveError> {
        let format = SaveFormat::resolve(path, format)?;
        if self.base.is_none() {
            return Err(SaveError::NoImage);
        }
        self.ensure_filtered();
        let Some(filtered) = self.filtered_cache.as_ref() else {
            return Err(SaveError::NoImage);
        };
        let composed = compositor::compose_full_resolution(filtered, &self.view, self.floating.as_ref());
        io::encode_and_write(&composed, path, format, quality)
            .inspect_err(|e| {
                log_err!("save failed: {}", e);
            })?;
        self.is_dirty = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    //  Pointer routing
    // ------------------------------------------------------------------

    /// A hit on the floating layer wins; otherwise the active tool decides.
    pub fn pointer_down(&mut self, cx: f64, cy: f64) {
        let scale = self.view.scale();
        if let Some(layer) = self.floating.as_mut()
            && layer.begin_drag(cx, cy, scale)
        {
            return;
        }
        match self.tool {
            Tool::Pan => self.pan_anchor = Some((cx, cy)),
            Tool::Select(shape) => {
                if self.base.is_none() {
                    return;
                }
                if self.floating.take().is_some() {
                    log_debug!("new capture discarded the uncommitted floating layer");
                }
                self.selection.begin(shape, cx, cy);
            }
        }
    }

    pub fn pointer_move(&mut self, cx: f64, cy: f64) {
        let scale = self.view.scale();
        if let Some(layer) = self.floating.as_mut()
            && layer.interaction() != InteractionMode::None
        {
            layer.drag_to(cx, cy, scale);
            return;
        }
        if self.selection.is_capturing() {
            self.selection.update(cx, cy);
            return;
        }
        if let Some((ax, ay)) = self.pan_anchor {
            let (dx, dy) = ((cx - ax).round() as i32, (cy - ay).round() as i32);
            if dx != 0 || dy != 0 {
                self.pan_by(dx, dy);
                self.pan_anchor = Some((ax + dx as f64, ay + dy as f64));
            }
        }
    }

    pub fn pointer_up(&mut self, cx: f64, cy: f64) {
        self.pointer_move(cx, cy);
        self.pan_anchor = None;
        if let Some(layer) = self.floating.as_mut()
            && layer.interaction() != InteractionMode::None
        {
            layer.end_drag();
            return;
        }
        if self.selection.is_capturing() {
            let capture = match self.base.as_ref() {
                Some(base) => self.selection.finish(base, &self.view),
                None => {
                    self.selection.cancel();
                    None
                }
            };
            if let Some(capture) = capture {
                self.floating = Some(FloatingLayer::from_capture(capture));
            }
        }
    }

    // ------------------------------------------------------------------
    //  Floating layer
    // ------------------------------------------------------------------

    /// Commit the floating layer into the base. Returns whether anything was
    /// pasted.
    pub fn paste(&mut self) -> bool {
        let (Some(base), Some(layer)) = (self.base.as_mut(), self.floating.take()) else {
            return false;
        };
        compositor::paste(&mut self.history, base, layer, &self.view);
        self.base_generation += 1;
        self.is_dirty = true;
        self.invalidate();
        true
    }

    /// Discard the floating layer without committing.
    pub fn clear_floating(&mut self) -> bool {
        self.floating.take().is_some()
    }

    pub fn set_floating_scale(&mut self, percent: f64) {
        let scale = self.view.scale();
        if let Some(layer) = self.floating.as_mut() {
            layer.set_scale_percent(percent, scale);
        }
    }

    pub fn set_floating_rotation(&mut self, degrees: f64) {
        let scale = self.view.scale();
        if let Some(layer) = self.floating.as_mut() {
            layer.set_rotation(degrees, scale);
        }
    }

    // ------------------------------------------------------------------
    //  History
    // ------------------------------------------------------------------

    pub fn undo(&mut self) -> bool {
        match self.history.undo(self.base.as_ref()) {
            Some(previous) => {
                self.base = Some(previous);
                self.base_generation += 1;
                self.is_dirty = true;
                self.invalidate();
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo(self.base.as_ref()) {
            Some(next) => {
                self.base = Some(next);
                self.base_generation += 1;
                self.is_dirty = true;
                self.invalidate();
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    //  Background removal and feathering
    // ------------------------------------------------------------------

    /// Acts on the floating layer's base reference when one exists,
    /// otherwise on the base image.
    pub fn trigger_background_removal(&mut self) -> RemovalStart {
        if self.pending.is_some() {
            return RemovalStart::Busy;
        }
        let Some((target, input)) = self.removal_target() else {
            return RemovalStart::NoTarget;
        };
        match self.segmentation.primary().cloned() {
            Some(remover) if remover.runs_in_background() => {
                log_info!("background removal dispatched to worker ({})", remover.name());
                self.pending = Some(SegmentationTask::spawn(remover, input, target));
                RemovalStart::Pending
            }
            Some(remover) => {
                let out = remover.remove_background(&input).unwrap_or_else(|e| {
                    log_warn!("segmentation failed, using corner sampling: {}", e);
                    self.segmentation.run_fallback(&input)
                });
                self.apply_removal(target, out);
                RemovalStart::Applied
            }
            None => {
                if let Some(reason) = self.segmentation.unavailable_reason() {
                    self.notice = Some(format!(
                        "Background segmentation unavailable ({}); used corner sampling",
                        reason
                    ));
                }
                let out = self.segmentation.run_fallback(&input);
                self.apply_removal(target, out);
                RemovalStart::Applied
            }
        }
    }

    /// Collect a finished worker result, if any. Always re-enables the
    /// control once the worker has reported.
    pub fn poll_background_removal(&mut self) -> RemovalPoll {
        let Some(task) = self.pending.as_ref() else {
            return RemovalPoll::Idle;
        };
        let Some(outcome) = task.poll() else {
            return RemovalPoll::Pending;
        };
        self.finish_removal(outcome)
    }

    /// Block until the running job reports, then apply it.
    pub fn wait_background_removal(&mut self) -> RemovalPoll {
        let Some(task) = self.pending.as_ref() else {
            return RemovalPoll::Idle;
        };
        let outcome = task.wait();
        self.finish_removal(outcome)
    }

    fn finish_removal(
        &mut self,
        outcome: Result<RgbaImage, crate::error::SegmentationError>,
    ) -> RemovalPoll {
        let Some(task) = self.pending.take() else {
            return RemovalPoll::Idle;
        };
        let (pixels, fell_back) = match outcome {
            Ok(pixels) => (pixels, false),
            Err(e) => {
                log_warn!("segmentation worker failed, using corner sampling: {}", e);
                self.notice = Some(format!("Segmentation failed ({}); used corner sampling", e));
                (self.segmentation.run_fallback(task.input()), true)
            }
        };
        if !self.apply_removal(task.target(), pixels) {
            return RemovalPoll::Dropped;
        }
        if fell_back { RemovalPoll::FellBack } else { RemovalPoll::Applied }
    }

    /// Erode then blur alpha, same targeting as background removal.
    pub fn feather(&mut self) -> bool {
        let Some((target, input)) = self.removal_target() else {
            return false;
        };
        let out = filters::feather(
            &input,
            self.settings.feather_erode_radius,
            self.settings.feather_blur_radius,
        );
        self.apply_removal(target, out)
    }

    pub fn set_background_tolerance(&mut self, tolerance: f32) {
        self.settings.background_tolerance = tolerance.max(0.0);
        self.segmentation.set_tolerance(self.settings.background_tolerance);
    }

    pub fn set_feather_radii(&mut self, erode: u32, blur: f32) {
        self.settings.feather_erode_radius = erode;
        self.settings.feather_blur_radius = blur.max(0.0);
    }

    fn removal_target(&self) -> Option<(SegmentationTarget, RgbaImage)> {
        if let Some(layer) = self.floating.as_ref() {
            return Some((SegmentationTarget::Floating(layer.id()), layer.base_reference().clone()));
        }
        let generation = self.base_generation;
        self.base.as_ref().map(|b| (SegmentationTarget::Base { generation }, b.to_rgba8()))
    }

    /// Returns false when the target no longer exists.
    fn apply_removal(&mut self, target: SegmentationTarget, pixels: RgbaImage) -> bool {
        match target {
            SegmentationTarget::Base { generation } => {
                if self.base.is_none() {
                    return false;
                }
                if generation != self.base_generation {
                    log_debug!(
                        "segmentation result dropped: base changed (generation {} -> {})",
                        generation,
                        self.base_generation
                    );
                    return false;
                }
                self.history.push(self.base.as_ref());
                self.base = Some(RasterImage::from_rgba(pixels));
                self.base_generation += 1;
                self.is_dirty = true;
                self.invalidate();
                true
            }
            SegmentationTarget::Floating(id) => {
                let scale = self.view.scale();
                match self.floating.as_mut() {
                    Some(layer) if layer.id() == id => {
                        layer.replace_base_reference(pixels, scale);
                        true
                    }
                    _ => {
                        log_debug!("segmentation result dropped: floating layer {} is gone", id);
                        false
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    //  Display settings
    // ------------------------------------------------------------------

    pub fn set_channel(&mut self, channel: ChannelMode) {
        if self.filters.channel != channel {
            self.filters.channel = channel;
            self.invalidate();
        }
    }

    pub fn set_invert(&mut self, invert: bool) {
        if self.filters.invert != invert {
            self.filters.invert = invert;
            self.invalidate();
        }
    }

    pub fn toggle_invert(&mut self) {
        self.set_invert(!self.filters.invert);
    }

    pub fn set_analysis(&mut self, analysis: AnalysisMode) {
        if self.filters.analysis != analysis {
            self.filters.analysis = analysis;
            self.invalidate();
        }
    }

    pub fn set_ela_quality(&mut self, quality: u8) {
        let quality = quality.clamp(1, 100);
        if self.filters.ela_quality != quality {
            self.filters.ela_quality = quality;
            self.settings.ela_quality = quality;
            self.invalidate();
        }
    }

    pub fn set_show_grid(&mut self, show: bool) {
        self.show_grid = show;
    }

    // ------------------------------------------------------------------
    //  View
    // ------------------------------------------------------------------

    pub fn fit_to_screen(&mut self) {
        let Some(dims) = self.base.as_ref().map(RasterImage::dimensions) else { return };
        let canvas = self.canvas_size;
        self.change_view(|view| view.fit_to_screen(canvas, dims));
    }

    pub fn zoom_1to1(&mut self) {
        let Some(dims) = self.base.as_ref().map(RasterImage::dimensions) else { return };
        let canvas = self.canvas_size;
        self.change_view(|view| view.set_zoom_1to1(canvas, dims));
    }

    pub fn zoom(&mut self, direction: ZoomDirection) {
        if self.base.is_none() {
            return;
        }
        self.change_view(|view| view.zoom(direction));
    }

    pub fn pan_by(&mut self, dx: i32, dy: i32) {
        self.change_view(|view| view.pan_by(dx, dy));
    }

    /// Apply a view change, keeping the floating layer pinned to the same
    /// image position.
    fn change_view<F: FnOnce(&mut ViewTransform)>(&mut self, f: F) {
        let anchor = self
            .floating
            .as_ref()
            .map(|l| self.view.canvas_to_image_f(l.top_left.0, l.top_left.1));
        f(&mut self.view);
        if let (Some(layer), Some((ix, iy))) = (self.floating.as_mut(), anchor) {
            layer.top_left = self.view.image_to_canvas(ix, iy);
        }
    }

    pub fn probe(&self, cx: f64, cy: f64) -> ProbeReadout {
        let Some(base) = self.base.as_ref() else {
            return ProbeReadout::NoImage;
        };
        let (x, y) = self.view.canvas_to_image(cx, cy);
        if x < 0 || y < 0 {
            return ProbeReadout::Outside { x, y };
        }
        match base.pixel_rgba(x as u32, y as u32) {
            Some(rgba) => ProbeReadout::Pixel { x: x as u32, y: y as u32, rgba },
            None => ProbeReadout::Outside { x, y },
        }
    }

    // ------------------------------------------------------------------
    //  Rendering
    // ------------------------------------------------------------------

    /// The canvas-sized view as it should be displayed.
    pub fn render(&mut self) -> RgbaImage {
        self.ensure_filtered();
        match self.filtered_cache.as_ref() {
            Some(filtered) => compositor::render_view(
                filtered,
                &self.view,
                self.canvas_size,
                self.floating.as_ref(),
                self.show_grid,
            ),
            None => RgbaImage::from_pixel(self.canvas_size.0, self.canvas_size.1, CANVAS_BACKGROUND),
        }
    }

    /// Base image after the display filters.
    pub fn filtered(&mut self) -> Option<&RgbaImage> {
        self.ensure_filtered();
        self.filtered_cache.as_ref()
    }

    /// Histogram of the unfiltered base, or of the filtered view.
    pub fn histogram(&mut self, filtered: bool) -> Option<Histogram> {
        if filtered {
            self.filtered().map(Histogram::of)
        } else {
            self.base.as_ref().map(|b| Histogram::of(&b.to_rgba8()))
        }
    }

    fn ensure_filtered(&mut self) {
        if self.filtered_cache.is_some() {
            return;
        }
        if let Some(base) = self.base.as_ref() {
            self.filtered_cache = Some(self.filters.apply(&base.to_rgba8()));
        }
    }

    fn invalidate(&mut self) {
        self.filtered_cache = None;
    }
}
