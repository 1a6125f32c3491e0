// ============================================================================
// frg CLI — headless batch processing via command-line arguments
// ============================================================================
//
// Usage examples:
//   frg --input photo.jpg --analysis ela --output ela.png
//   frg -i shot.png --channel L --invert -o out.jpg --quality 85
//   frg -i *.jpg --remove-background --feather --output-dir cutouts/
//   frg -i photo.jpg --exif
//
// Every file goes through the same Session the interactive shell drives, so
// the display pipeline, segmentation fallback and export match exactly.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::io::{DEFAULT_JPEG_QUALITY, SaveFormat};
use crate::ops::filters::{AnalysisMode, ChannelMode};
use crate::session::{RemovalPoll, RemovalStart, Session};
use crate::settings::EngineSettings;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// frg headless forensic image processor.
#[derive(Parser, Debug)]
#[command(
    name = "frg",
    about = "Headless forensic image viewer: channel/analysis filters, background removal, EXIF",
    long_about = "Apply the forensic display pipeline to image files and export the\n\
                  result at full resolution, without an interactive shell.\n\n\
                  Example:\n  \
                  frg --input photo.jpg --analysis ela --output ela.png\n  \
                  frg -i *.jpg --remove-background --output-dir out/ --format png"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png or jpeg. Inferred from --output when omitted,
    /// defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<SaveFormat>,

    /// JPEG quality (1-100).
    #[arg(short, long, default_value_t = DEFAULT_JPEG_QUALITY, value_name = "1-100")]
    pub quality: u8,

    /// Channel projection: RGB, R, G, B, H, S, V, HSV, Y, Cb, Cr, YCbCr, L.
    #[arg(long, default_value = "RGB", value_name = "CHANNEL")]
    pub channel: ChannelMode,

    /// Invert colours after channel projection.
    #[arg(long)]
    pub invert: bool,

    /// Analysis stage: none, equalize, edges, ela.
    #[arg(long, default_value = "none", value_name = "MODE")]
    pub analysis: AnalysisMode,

    /// JPEG quality used for the ELA re-encode.
    #[arg(long, value_name = "1-100")]
    pub ela_quality: Option<u8>,

    /// Remove the background before filtering and export.
    #[arg(long)]
    pub remove_background: bool,

    /// Corner-sampling tolerance (RGB distance) for background removal.
    #[arg(long, value_name = "DIST")]
    pub tolerance: Option<f32>,

    /// Feather the alpha edge; optional blur radius.
    #[arg(long, value_name = "RADIUS", num_args = 0..=1)]
    pub feather: Option<Option<f32>>,

    /// Print the EXIF record as `key: value` lines.
    #[arg(long)]
    pub exif: bool,

    /// Segmentation plugin (absolute path to a shared library).
    #[arg(long, value_name = "PATH")]
    pub plugin: Option<String>,

    /// Mirror the session log to stderr and print per-file timing.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Persisted settings with the flags applied on top.
    pub fn settings(&self, mut base: EngineSettings) -> EngineSettings {
        if let Some(q) = self.ela_quality {
            base.ela_quality = q.clamp(1, 100);
        }
        if let Some(t) = self.tolerance {
            base.background_tolerance = t.max(0.0);
        }
        if let Some(Some(r)) = self.feather {
            base.feather_blur_radius = r.max(0.0);
        }
        if let Some(p) = &self.plugin {
            base.segmentation_plugin = p.clone();
        }
        base
    }

    /// Whether any file is written at all. `--exif` alone only prints.
    fn wants_output(&self) -> bool {
        self.output.is_some() || self.output_dir.is_some() || !self.exif
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    crate::logger::set_mirror_stderr(args.verbose);

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let save_format = match resolve_format(args.format, args.output.as_deref()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let settings = args.settings(EngineSettings::load());
    let mut session = Session::new(settings);
    if let Some(notice) = session.take_notice()
        && args.remove_background
    {
        eprintln!("note: {}", notice);
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let output_path = if args.wants_output() {
            match build_output_path(
                input_path,
                args.output.as_deref(),
                args.output_dir.as_deref(),
                save_format,
            ) {
                Some(p) => Some(p),
                None => {
                    eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
                    any_failure = true;
                    continue;
                }
            }
        } else {
            None
        };

        match run_one(&mut session, &args, input_path, output_path.as_deref(), save_format) {
            Ok(()) => {
                if let Some(out) = &output_path
                    && (args.verbose || multi)
                {
                    println!(
                        "  -> {} ({:.0}ms)",
                        out.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(
    session: &mut Session,
    args: &CliArgs,
    input: &Path,
    output: Option<&Path>,
    format: SaveFormat,
) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    session
        .load_image(input)
        .map_err(|e| format!("load failed: {}", e))?;

    if args.exif
        && let Some(record) = session.exif()
    {
        print!("{}", record.to_text());
    }

    // -- Step 2: Edits on the base image ---------------------------------
    if args.remove_background {
        match session.trigger_background_removal() {
            RemovalStart::Pending => {
                if session.wait_background_removal() == RemovalPoll::FellBack
                    && let Some(notice) = session.take_notice()
                {
                    eprintln!("  note: {}", notice);
                }
            }
            RemovalStart::Applied | RemovalStart::Busy | RemovalStart::NoTarget => {}
        }
    }
    if args.feather.is_some() {
        session.feather();
    }

    // -- Step 3: Display pipeline ----------------------------------------
    session.set_channel(args.channel);
    session.set_invert(args.invert);
    session.set_analysis(args.analysis);

    // -- Step 4: Save ----------------------------------------------------
    if let Some(out) = output {
        session
            .save(out, Some(format), args.quality)
            .map_err(|e| format!("save failed: {}", e))?;
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
pub fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// `--format` wins; otherwise `--output`'s extension; otherwise PNG.
fn resolve_format(
    explicit: Option<SaveFormat>,
    output: Option<&Path>,
) -> Result<SaveFormat, crate::error::SaveError> {
    match (explicit, output) {
        (Some(f), _) => Ok(f),
        (None, Some(out)) => SaveFormat::resolve(out, None),
        (None, None) => Ok(SaveFormat::Png),
    }
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: same directory as input, same stem, new extension
///    (appends `_out` to stem if it would collide with the input path)
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: SaveFormat,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = format.extension();
    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.{}", stem, ext));

    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, ext)))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_into_typed_values() {
        let args = CliArgs::try_parse_from([
            "frg", "-i", "a.jpg", "--channel", "ycbcr", "--analysis", "ELA",
            "--feather", "--format", "jpeg",
        ])
        .unwrap();
        assert_eq!(args.channel, ChannelMode::YCbCr);
        assert_eq!(args.analysis, AnalysisMode::Ela);
        assert_eq!(args.feather, Some(None));
        assert_eq!(args.format, Some(SaveFormat::Jpeg));
        assert_eq!(args.quality, DEFAULT_JPEG_QUALITY);
    }

    #[test]
    fn flags_override_settings() {
        let args = CliArgs::try_parse_from([
            "frg", "-i", "a.png", "--tolerance", "12", "--feather", "4", "--ela-quality", "150",
        ])
        .unwrap();
        let s = args.settings(EngineSettings::default());
        assert_eq!(s.background_tolerance, 12.0);
        assert_eq!(s.feather_blur_radius, 4.0);
        assert_eq!(s.ela_quality, 100);
        assert_eq!(s.max_undo_steps, 20);
    }

    #[test]
    fn unknown_channel_is_rejected() {
        assert!(CliArgs::try_parse_from(["frg", "-i", "a.png", "--channel", "Q"]).is_err());
    }

    #[test]
    fn output_path_never_overwrites_input() {
        let p = build_output_path(Path::new("shots/a.png"), None, None, SaveFormat::Png).unwrap();
        assert_eq!(p, PathBuf::from("shots/a_out.png"));
        let p = build_output_path(Path::new("shots/a.png"), None, Some(Path::new("out")), SaveFormat::Jpeg)
            .unwrap();
        assert_eq!(p, PathBuf::from("out/a.jpg"));
    }

    #[test]
    fn format_falls_back_to_png() {
        assert_eq!(resolve_format(None, None).unwrap(), SaveFormat::Png);
        assert_eq!(resolve_format(None, Some(Path::new("x.jpeg"))).unwrap(), SaveFormat::Jpeg);
        assert!(resolve_format(None, Some(Path::new("x.gif"))).is_err());
    }

    #[test]
    fn batch_run_writes_filtered_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]))
            .save(&input)
            .unwrap();
        let out = dir.path().join("out.png");
        let args = CliArgs::try_parse_from([
            "frg",
            "-i",
            input.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--invert",
        ])
        .unwrap();
        assert_eq!(run(args), ExitCode::SUCCESS);
        let written = image::open(&out).unwrap().to_rgba8();
        assert_eq!(written.get_pixel(0, 0).0, [245, 235, 225, 255]);
    }
}
