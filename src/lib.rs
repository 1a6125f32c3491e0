//! frg: forensic raster viewer engine.
//!
//! A [`Session`] owns one base image and everything acting on it: the view
//! transform, undo history, region capture, the floating layer, the display
//! filter pipeline and the background-segmentation job. The binary in
//! `main.rs` drives the same session headlessly.

#[macro_use]
pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod io;
pub mod metadata;
pub mod ops;
pub mod session;
pub mod settings;

pub use canvas::{PixelFormat, RasterImage, ViewTransform, ZoomDirection};
pub use components::history::HistoryManager;
pub use error::{FilterError, LoadError, SaveError, SegmentationError};
pub use io::SaveFormat;
pub use metadata::ExifRecord;
pub use ops::filters::{AnalysisMode, ChannelMode, DisplayFilters, Histogram};
pub use ops::floating::{FloatingLayer, InteractionMode};
pub use ops::selection::SelectionShape;
pub use session::{ProbeReadout, RemovalPoll, RemovalStart, Session, Tool};
pub use settings::EngineSettings;
