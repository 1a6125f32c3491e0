use std::sync::Arc;

use frg::error::SegmentationError;
use frg::ops::ai::{BackgroundRemover, Segmentation};
use frg::{
    EngineSettings, HistoryManager, PixelFormat, RasterImage, RemovalPoll, RemovalStart, SelectionShape,
    Session, Tool,
};
use image::{Rgb, RgbImage, Rgba, RgbaImage};

fn session() -> Session {
    let mut s = Session::with_segmentation(EngineSettings::default(), Segmentation::fallback_only(30.0));
    s.set_canvas_size(800, 600);
    s
}

fn solid(w: u32, h: u32, px: [u8; 3]) -> RasterImage {
    RasterImage::from_rgb(RgbImage::from_pixel(w, h, Rgb(px)))
}

/// Makes every pixel transparent, off the interaction thread.
struct ClearAll;

impl BackgroundRemover for ClearAll {
    fn name(&self) -> &str {
        "clear all"
    }

    fn runs_in_background(&self) -> bool {
        true
    }

    fn remove_background(&self, input: &RgbaImage) -> Result<RgbaImage, SegmentationError> {
        let mut out = input.clone();
        out.pixels_mut().for_each(|p| p[3] = 0);
        Ok(out)
    }
}

struct AlwaysFails;

impl BackgroundRemover for AlwaysFails {
    fn name(&self) -> &str {
        "always fails"
    }

    fn runs_in_background(&self) -> bool {
        true
    }

    fn remove_background(&self, _input: &RgbaImage) -> Result<RgbaImage, SegmentationError> {
        Err(SegmentationError::PluginFailed(-1))
    }
}

#[test]
fn fit_to_screen_centres_scaled_image() {
    let mut s = session();
    s.open_raster(solid(100, 100, [0, 0, 0]));
    assert!((s.view().scale() - 5.4).abs() < 1e-9);
    assert_eq!(s.view().pan(), (130, 30));
}

#[test]
fn corner_sampling_clears_uniform_border() {
    let mut img = RgbaImage::from_pixel(3, 3, Rgba([255, 255, 255, 255]));
    img.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
    let mut s = session();
    s.open_raster(RasterImage::from_rgba(img));
    assert_eq!(s.trigger_background_removal(), RemovalStart::Applied);

    let base = s.base().unwrap();
    for y in 0..3 {
        for x in 0..3 {
            let expected = if (x, y) == (1, 1) { 255 } else { 0 };
            assert_eq!(base.pixel_rgba(x, y).unwrap()[3], expected, "alpha at ({x}, {y})");
        }
    }
}

#[test]
fn undo_walks_back_two_edits_then_stops() {
    let i0 = solid(2, 2, [0, 0, 0]);
    let i1 = solid(2, 2, [1, 1, 1]);
    let i2 = solid(2, 2, [2, 2, 2]);
    let mut history = HistoryManager::default();
    history.push(Some(&i0));
    history.push(Some(&i1));

    let back = history.undo(Some(&i2)).unwrap();
    assert_eq!(back, i1);
    assert_eq!(history.redo_count(), 1);
    let back = history.undo(Some(&back)).unwrap();
    assert_eq!(back, i0);
    assert!(history.undo(Some(&back)).is_none());
}

#[test]
fn capture_paste_undo_redo() {
    let mut s = session();
    s.open_raster(RasterImage::from_rgb(RgbImage::from_fn(100, 100, |x, _| Rgb([x as u8 * 2, 0, 0]))));
    let original = s.base().cloned().unwrap();

    s.set_tool(Tool::Select(SelectionShape::Rect));
    s.pointer_down(184.0, 84.0);
    s.pointer_move(238.0, 138.0);
    s.pointer_up(238.0, 138.0);
    assert!(s.floating().is_some());

    // drag the layer's body 54 canvas units right (10 image pixels)
    s.set_tool(Tool::Pan);
    s.pointer_down(200.0, 100.0);
    s.pointer_up(254.0, 100.0);
    assert!(s.paste());
    assert_eq!(s.history().undo_count(), 1);
    assert_eq!(s.base().unwrap().format(), PixelFormat::Rgb);

    let edited = s.base().cloned().unwrap();
    assert_ne!(edited, original);
    assert!(s.undo());
    assert_eq!(s.base(), Some(&original));
    assert!(s.redo());
    assert_eq!(s.base(), Some(&edited));
    assert!(!s.redo());
}

#[test]
fn tiny_selection_is_discarded() {
    let mut s = session();
    s.open_raster(solid(100, 100, [10, 20, 30]));
    s.set_tool(Tool::Select(SelectionShape::Freehand));
    s.pointer_down(200.0, 200.0);
    s.pointer_move(202.0, 201.0);
    s.pointer_up(203.0, 202.0);
    assert!(s.floating().is_none());
}

#[test]
fn worker_result_is_applied_on_poll() {
    let mut s = Session::with_segmentation(
        EngineSettings::default(),
        Segmentation::with_primary(Arc::new(ClearAll), 30.0),
    );
    s.open_raster(solid(4, 4, [9, 9, 9]));
    assert_eq!(s.trigger_background_removal(), RemovalStart::Pending);
    assert!(s.is_busy());
    assert!(!s.can_remove_background());
    assert_eq!(s.trigger_background_removal(), RemovalStart::Busy);

    assert_eq!(s.wait_background_removal(), RemovalPoll::Applied);
    assert!(!s.is_busy());
    assert_eq!(s.poll_background_removal(), RemovalPoll::Idle);
    assert_eq!(s.base().unwrap().pixel_rgba(0, 0).unwrap()[3], 0);
    assert_eq!(s.history().undo_count(), 1);
}

#[test]
fn failed_worker_falls_back_to_corner_sampling() {
    let mut s = Session::with_segmentation(
        EngineSettings::default(),
        Segmentation::with_primary(Arc::new(AlwaysFails), 30.0),
    );
    let mut img = RgbaImage::from_pixel(3, 3, Rgba([255, 255, 255, 255]));
    img.put_pixel(1, 1, Rgba([0, 0, 0, 255]));
    s.open_raster(RasterImage::from_rgba(img));

    assert_eq!(s.trigger_background_removal(), RemovalStart::Pending);
    assert_eq!(s.wait_background_removal(), RemovalPoll::FellBack);
    assert!(s.notice().is_some());
    let base = s.base().unwrap();
    assert_eq!(base.pixel_rgba(0, 0).unwrap()[3], 0);
    assert_eq!(base.pixel_rgba(1, 1).unwrap()[3], 255);
}

#[test]
fn result_for_discarded_layer_is_dropped() {
    let mut s = Session::with_segmentation(
        EngineSettings::default(),
        Segmentation::with_primary(Arc::new(ClearAll), 30.0),
    );
    s.open_raster(solid(100, 100, [10, 20, 30]));
    s.set_tool(Tool::Select(SelectionShape::Rect));
    s.pointer_down(184.0, 84.0);
    s.pointer_up(238.0, 138.0);
    assert!(s.floating().is_some());

    assert_eq!(s.trigger_background_removal(), RemovalStart::Pending);
    assert!(s.clear_floating());
    assert_eq!(s.wait_background_removal(), RemovalPoll::Dropped);
    assert_eq!(s.history().undo_count(), 0);
    assert_eq!(s.base().unwrap().pixel_rgba(50, 50), Some([10, 20, 30, 255]));
}

#[test]
fn base_result_is_dropped_after_paste() {
    let mut s = Session::with_segmentation(
        EngineSettings::default(),
        Segmentation::with_primary(Arc::new(ClearAll), 30.0),
    );
    s.open_raster(RasterImage::from_rgb(RgbImage::from_fn(100, 100, |x, _| Rgb([x as u8 * 2, 0, 0]))));
    assert_eq!(s.trigger_background_removal(), RemovalStart::Pending);

    s.set_tool(Tool::Select(SelectionShape::Rect));
    s.pointer_down(184.0, 84.0);
    s.pointer_up(238.0, 138.0);
    s.set_tool(Tool::Pan);
    s.pointer_down(200.0, 100.0);
    s.pointer_up(254.0, 100.0);
    assert!(s.paste());
    let pasted = s.base().cloned().unwrap();

    assert_eq!(s.wait_background_removal(), RemovalPoll::Dropped);
    assert_eq!(s.base(), Some(&pasted));
    assert_eq!(s.history().undo_count(), 1);
    assert_eq!(s.base().unwrap().pixel_rgba(0, 0).unwrap()[3], 255);
}

#[test]
fn base_result_is_dropped_after_undo() {
    let mut s = Session::with_segmentation(
        EngineSettings::default(),
        Segmentation::with_primary(Arc::new(ClearAll), 30.0),
    );
    s.open_raster(solid(4, 4, [9, 9, 9]));
    assert_eq!(s.trigger_background_removal(), RemovalStart::Pending);
    assert_eq!(s.wait_background_removal(), RemovalPoll::Applied);

    assert_eq!(s.trigger_background_removal(), RemovalStart::Pending);
    assert!(s.undo());
    assert_eq!(s.wait_background_removal(), RemovalPoll::Dropped);
    assert_eq!(s.base(), Some(&solid(4, 4, [9, 9, 9])));
    assert_eq!(s.history().redo_count(), 1);
}

#[test]
fn load_and_save_round_trip_with_exif() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.png");
    RgbImage::from_pixel(6, 4, Rgb([100, 150, 200])).save(&input).unwrap();

    let mut s = session();
    s.load_image(&input).unwrap();
    let exif = s.exif().unwrap();
    assert_eq!(exif.get("Format"), Some("PNG"));
    assert_eq!(exif.get("Size"), Some("6x4"));
    assert_eq!(exif.get("Mode"), Some("RGB"));

    s.set_channel(frg::ChannelMode::R);
    let out = dir.path().join("out.png");
    s.save(&out, None, 90).unwrap();
    let written = image::open(&out).unwrap().to_rgba8();
    assert_eq!(written.dimensions(), (6, 4));
    assert_eq!(written.get_pixel(0, 0).0, [100, 0, 0, 255]);
}

#[test]
fn missing_file_is_a_load_error() {
    let mut s = session();
    assert!(s.load_image(std::path::Path::new("/nonexistent/frg/missing.jpg")).is_err());
    assert!(s.base().is_none());
}
