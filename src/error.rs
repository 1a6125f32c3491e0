use std::path::PathBuf;

use image::ImageError;
use thiserror::Error;

/// Failure to bring an image into the session. The only condition surfaced
/// to the user as a visible error.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("image file not found: {0}")]
    NotFound(PathBuf),

    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("{path} has zero width or height")]
    Empty { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("nothing to save: no image is loaded")]
    NoImage,

    #[error("unsupported output format '{0}' (expected png or jpeg)")]
    UnsupportedFormat(String),

    #[error("encode failed: {0}")]
    Encode(#[from] ImageError),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Internal failure of a filter stage. Never escapes the display pipeline:
/// the stage degrades to returning its input unchanged.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("codec round-trip failed: {0}")]
    Codec(#[from] ImageError),

    #[error("filter '{stage}' panicked: {message}")]
    Panicked { stage: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("no segmentation plugin configured")]
    NotConfigured,

    #[error("segmentation plugin not found: {0}")]
    PluginNotFound(PathBuf),

    #[error("failed to load segmentation plugin: {0}")]
    PluginLoadFailed(String),

    #[error("segmentation plugin is missing symbol '{0}'")]
    SymbolMissing(String),

    #[error("segmentation plugin returned status {0}")]
    PluginFailed(i32),

    #[error("segmentation worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("segmentation worker disconnected before reporting a result")]
    WorkerLost,
}
