// ============================================================================
// SEGMENTATION — pluggable background removal and worker hand-off
// ============================================================================
//
// The primary strategy is an optional shared library loaded at runtime with
// `libloading`, so the binary has no compile-time dependency on any model
// runtime. The library must export:
//
//     int32_t frg_remove_background(uint32_t width, uint32_t height,
//                                   const uint8_t *rgba_in, uint8_t *rgba_out);
//
// returning 0 on success. Buffers are tightly packed RGBA8, `width*height*4`
// bytes each. When no plugin is configured or it cannot be loaded, the
// corner-sampling fallback is used instead.

use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Once};
use std::panic::{AssertUnwindSafe, catch_unwind};

use image::RgbaImage;
use uuid::Uuid;

use crate::error::SegmentationError;
use crate::ops::filters::{panic_message, remove_background_by_corners};

/// Exported entry point of a segmentation plugin.
pub const PLUGIN_SYMBOL: &str = "frg_remove_background";

type RemoveBackgroundFn =
    unsafe extern "C" fn(width: u32, height: u32, input: *const u8, output: *mut u8) -> i32;

static UNAVAILABLE_LOGGED: Once = Once::new();

/// A background-removal strategy: RGBA in, RGBA with background made
/// transparent out.
pub trait BackgroundRemover: Send + Sync {
    fn name(&self) -> &str;

    /// Slow strategies are dispatched to a worker instead of blocking the
    /// interaction thread.
    fn runs_in_background(&self) -> bool;

    fn remove_background(&self, input: &RgbaImage) -> Result<RgbaImage, SegmentationError>;
}

// ---------------------------------------------------------------------------
//  Fallback: corner sampling
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CornerSamplingSegmenter {
    pub tolerance: f32,
}

impl BackgroundRemover for CornerSamplingSegmenter {
    fn name(&self) -> &str {
        "corner sampling"
    }

    fn runs_in_background(&self) -> bool {
        false
    }

    fn remove_background(&self, input: &RgbaImage) -> Result<RgbaImage, SegmentationError> {
        Ok(remove_background_by_corners(input, self.tolerance))
    }
}

// ---------------------------------------------------------------------------
//  Primary: dynamically loaded plugin
// ---------------------------------------------------------------------------

pub struct PluginSegmenter {
    path: PathBuf,
    library: libloading::Library,
}

impl std::fmt::Debug for PluginSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSegmenter").field("path", &self.path).finish()
    }
}

/// Reject plugin paths that are relative, contain `..`, or do not carry a
/// shared-library extension.
pub fn validate_plugin_path(path: &Path) -> Result<(), SegmentationError> {
    if path.as_os_str().is_empty() {
        return Err(SegmentationError::NotConfigured);
    }
    if !path.is_absolute() {
        return Err(SegmentationError::PluginLoadFailed(format!(
            "plugin path must be absolute: {}",
            path.display()
        )));
    }
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(SegmentationError::PluginLoadFailed(
            "plugin path must not contain '..' components".to_string(),
        ));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !["dll", "so", "dylib"].contains(&ext.as_str()) {
        return Err(SegmentationError::PluginLoadFailed(format!(
            "expected a .dll/.so/.dylib file, got '.{}'",
            ext
        )));
    }
    Ok(())
}

impl PluginSegmenter {
    pub fn load(path: &Path) -> Result<Self, SegmentationError> {
        validate_plugin_path(path)?;
        if !path.exists() {
            return Err(SegmentationError::PluginNotFound(path.to_path_buf()));
        }
        // SAFETY: loading runs the library's initialisers; the path has been
        // validated and is supplied by the user's own configuration.
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| SegmentationError::PluginLoadFailed(e.to_string()))?;
        // SAFETY: only checks that the symbol resolves; it is not called here.
        unsafe { library.get::<RemoveBackgroundFn>(PLUGIN_SYMBOL.as_bytes()) }
            .map_err(|_| SegmentationError::SymbolMissing(PLUGIN_SYMBOL.to_string()))?;
        log_info!("segmentation plugin loaded: {}", path.display());
        Ok(Self { path: path.to_path_buf(), library })
    }
}

impl BackgroundRemover for PluginSegmenter {
    fn name(&self) -> &str {
        "plugin"
    }

    fn runs_in_background(&self) -> bool {
        true
    }

    fn remove_background(&self, input: &RgbaImage) -> Result<RgbaImage, SegmentationError> {
        let (w, h) = input.dimensions();
        let mut output = vec![0u8; input.as_raw().len()];
        // SAFETY: the symbol has the documented signature; both buffers are
        // exactly width*height*4 bytes and outlive the call.
        let status = unsafe {
            let func = self
                .library
                .get::<RemoveBackgroundFn>(PLUGIN_SYMBOL.as_bytes())
                .map_err(|_| SegmentationError::SymbolMissing(PLUGIN_SYMBOL.to_string()))?;
            func(w, h, input.as_raw().as_ptr(), output.as_mut_ptr())
        };
        if status != 0 {
            return Err(SegmentationError::PluginFailed(status));
        }
        RgbaImage::from_raw(w, h, output).ok_or(SegmentationError::PluginFailed(-1))
    }
}

// ---------------------------------------------------------------------------
//  Strategy selection
// ---------------------------------------------------------------------------

/// The segmentation capability, selected once when the session starts.
#[derive(Clone)]
pub struct Segmentation {
    primary: Option<Arc<dyn BackgroundRemover>>,
    fallback: Arc<CornerSamplingSegmenter>,
    unavailable: Option<String>,
}

impl Segmentation {
    /// Try the configured plugin; otherwise fall back to corner sampling.
    pub fn select(plugin_path: &str, tolerance: f32) -> Self {
        let fallback = Arc::new(CornerSamplingSegmenter { tolerance });
        let path = plugin_path.trim();
        let loaded = if path.is_empty() {
            Err(SegmentationError::NotConfigured)
        } else {
            PluginSegmenter::load(Path::new(path))
        };
        match loaded {
            Ok(plugin) => Self { primary: Some(Arc::new(plugin)), fallback, unavailable: None },
            Err(e) => {
                UNAVAILABLE_LOGGED.call_once(|| {
                    log_warn!("background segmentation unavailable, using corner sampling: {}", e);
                });
                Self { primary: None, fallback, unavailable: Some(e.to_string()) }
            }
        }
    }

    /// Fallback only, with no notice. Used where the primary path is
    /// deliberately not wanted.
    pub fn fallback_only(tolerance: f32) -> Self {
        Self {
            primary: None,
            fallback: Arc::new(CornerSamplingSegmenter { tolerance }),
            unavailable: None,
        }
    }

    /// Install a specific primary strategy.
    pub fn with_primary(remover: Arc<dyn BackgroundRemover>, tolerance: f32) -> Self {
        Self {
            primary: Some(remover),
            fallback: Arc::new(CornerSamplingSegmenter { tolerance }),
            unavailable: None,
        }
    }

    pub fn primary(&self) -> Option<&Arc<dyn BackgroundRemover>> {
        self.primary.as_ref()
    }

    /// Why the primary strategy is missing, when it is.
    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable.as_deref()
    }

    pub fn set_tolerance(&mut self, tolerance: f32) {
        self.fallback = Arc::new(CornerSamplingSegmenter { tolerance });
    }

    /// Run the fallback synchronously.
    pub fn run_fallback(&self, input: &RgbaImage) -> RgbaImage {
        remove_background_by_corners(input, self.fallback.tolerance)
    }
}

// ---------------------------------------------------------------------------
//  Worker hand-off
// ---------------------------------------------------------------------------

/// What a segmentation result should be applied to. `generation` is the
/// base edit counter at spawn time; a result for an older base is stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentationTarget {
    Base { generation: u64 },
    Floating(Uuid),
}

/// A segmentation job running on the rayon pool. The worker owns a copy of
/// its input and only ever sends back an immutable result; the interaction
/// thread applies it.
pub struct SegmentationTask {
    target: SegmentationTarget,
    input: RgbaImage,
    receiver: Receiver<Result<RgbaImage, SegmentationError>>,
}

impl SegmentationTask {
    pub fn spawn(remover: Arc<dyn BackgroundRemover>, input: RgbaImage, target: SegmentationTarget) -> Self {
        let (sender, receiver) = mpsc::channel();
        let job_input = input.clone();
        rayon::spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| remover.remove_background(&job_input)))
                .unwrap_or_else(|payload| {
                    Err(SegmentationError::WorkerPanicked(panic_message(payload.as_ref())))
                });
            let _ = sender.send(outcome);
        });
        Self { target, input, receiver }
    }

    pub fn target(&self) -> SegmentationTarget {
        self.target
    }

    /// The pixels the worker was given.
    pub fn input(&self) -> &RgbaImage {
        &self.input
    }

    /// Non-blocking check. `None` while the worker is still running.
    pub fn poll(&self) -> Option<Result<RgbaImage, SegmentationError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SegmentationError::WorkerLost)),
        }
    }

    /// Block until the worker reports.
    pub fn wait(&self) -> Result<RgbaImage, SegmentationError> {
        self.receiver.recv().unwrap_or(Err(SegmentationError::WorkerLost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    struct Failing;

    impl BackgroundRemover for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn runs_in_background(&self) -> bool {
            true
        }
        fn remove_background(&self, _: &RgbaImage) -> Result<RgbaImage, SegmentationError> {
            Err(SegmentationError::PluginFailed(3))
        }
    }

    struct Panicking;

    impl BackgroundRemover for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn runs_in_background(&self) -> bool {
            true
        }
        fn remove_background(&self, _: &RgbaImage) -> Result<RgbaImage, SegmentationError> {
            panic!("model blew up")
        }
    }

    #[test]
    fn missing_plugin_selects_fallback_with_notice() {
        let seg = Segmentation::select("", 30.0);
        assert!(seg.primary().is_none());
        assert!(seg.unavailable_reason().is_some());

        let seg = Segmentation::select("/definitely/not/here/libseg.so", 30.0);
        assert!(seg.primary().is_none());
        assert!(seg.unavailable_reason().unwrap().contains("not found"));
    }

    #[test]
    fn plugin_path_validation() {
        assert!(validate_plugin_path(Path::new("relative/libseg.so")).is_err());
        assert!(validate_plugin_path(Path::new("/opt/../etc/libseg.so")).is_err());
        assert!(validate_plugin_path(Path::new("/opt/seg/model.onnx")).is_err());
        assert!(validate_plugin_path(Path::new("/opt/seg/libseg.so")).is_ok());
    }

    #[test]
    fn worker_delivers_result() {
        let remover: Arc<dyn BackgroundRemover> = Arc::new(CornerSamplingSegmenter { tolerance: 30.0 });
        let input = RgbaImage::from_pixel(3, 3, Rgba([255, 255, 255, 255]));
        let task = SegmentationTask::spawn(remover, input, SegmentationTarget::Base { generation: 0 });
        let out = task.wait().unwrap();
        assert!(out.pixels().all(|p| p[3] == 0));
        assert_eq!(task.target(), SegmentationTarget::Base { generation: 0 });
    }

    #[test]
    fn worker_failure_is_reported() {
        let task = SegmentationTask::spawn(Arc::new(Failing), RgbaImage::new(2, 2), SegmentationTarget::Base { generation: 0 });
        assert!(matches!(task.wait(), Err(SegmentationError::PluginFailed(3))));
    }

    #[test]
    fn worker_panic_becomes_error() {
        let task = SegmentationTask::spawn(Arc::new(Panicking), RgbaImage::new(2, 2), SegmentationTarget::Base { generation: 0 });
        match task.wait() {
            Err(SegmentationError::WorkerPanicked(msg)) => assert!(msg.contains("blew up")),
            other => panic!("unexpected outcome: {:?}", other.map(|i| i.dimensions())),
        }
    }
}
