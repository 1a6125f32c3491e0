use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, ImageEncoder, ImageFormat, RgbaImage};

use crate::canvas::RasterImage;
use crate::error::{LoadError, SaveError};

/// Default JPEG quality for exports.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Formats the engine writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
}

impl SaveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            _ => None,
        }
    }

    /// Explicit choice wins; otherwise the path's extension decides.
    pub fn resolve(path: &Path, explicit: Option<SaveFormat>) -> Result<Self, SaveError> {
        if let Some(format) = explicit {
            return Ok(format);
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_extension(ext).ok_or_else(|| SaveError::UnsupportedFormat(ext.to_string()))
    }
}

impl FromStr for SaveFormat {
    type Err = SaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| SaveError::UnsupportedFormat(s.to_string()))
    }
}

/// A decoded file plus what the codec reported about it.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub image: RasterImage,
    pub path: PathBuf,
    pub format: Option<ImageFormat>,
}

impl LoadedImage {
    /// Codec name as shown in metadata ("JPEG", "PNG", ...).
    pub fn format_name(&self) -> String {
        self.format.map_or_else(|| "UNKNOWN".to_string(), format_name)
    }
}

pub fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::Bmp => "BMP".to_string(),
        ImageFormat::WebP => "WEBP".to_string(),
        other => format!("{:?}", other).to_uppercase(),
    }
}

/// Decode an image file. The format is sniffed from the content, not the
/// extension.
pub fn load_image_sync(path: &Path) -> Result<LoadedImage, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let io_err = |source| LoadError::Io { path: path.to_path_buf(), source };
    let reader = image::io::Reader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?;
    let format = reader.format();
    let decoded = reader.decode().map_err(|source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(LoadError::Empty { path: path.to_path_buf() });
    }
    log_info!(
        "loaded {} ({}x{}, {:?})",
        path.display(),
        decoded.width(),
        decoded.height(),
        format
    );
    Ok(LoadedImage {
        image: RasterImage::from_dynamic(decoded),
        path: path.to_path_buf(),
        format,
    })
}

pub fn encode_and_write(
    image: &RgbaImage,
    path: &Path,
    format: SaveFormat,
    quality: u8,
) -> Result<(), SaveError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    match format {
        SaveFormat::Png => {
            PngEncoder::new(&mut writer).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ColorType::Rgba8,
            )?;
        }
        SaveFormat::Jpeg => {
            let rgb_image = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
            encoder.encode(
                rgb_image.as_raw(),
                rgb_image.width(),
                rgb_image.height(),
                ColorType::Rgb8,
            )?;
        }
    }
    writer.flush()?;
    log_info!("saved {} as {:?}", path.display(), format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn png_round_trip_keeps_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 128]));
        encode_and_write(&img, &path, SaveFormat::Png, DEFAULT_JPEG_QUALITY).unwrap();
        let loaded = load_image_sync(&path).unwrap();
        assert_eq!(loaded.format, Some(ImageFormat::Png));
        assert_eq!(loaded.format_name(), "PNG");
        assert_eq!(loaded.image.to_rgba8(), img);
    }

    #[test]
    fn jpeg_is_sniffed_regardless_of_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mislabelled.png");
        let img = RgbaImage::from_pixel(8, 8, Rgba([200, 10, 10, 255]));
        encode_and_write(&img, &path, SaveFormat::Jpeg, 80).unwrap();
        let loaded = load_image_sync(&path).unwrap();
        assert_eq!(loaded.format, Some(ImageFormat::Jpeg));
        assert_eq!(loaded.image.format(), crate::canvas::PixelFormat::Rgb);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_image_sync(&dir.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(_)));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.png");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert!(load_image_sync(&path).is_err());
    }

    #[test]
    fn save_format_resolution() {
        assert_eq!(SaveFormat::resolve(Path::new("a.JPEG"), None).unwrap(), SaveFormat::Jpeg);
        assert_eq!(
            SaveFormat::resolve(Path::new("a.bmp"), Some(SaveFormat::Png)).unwrap(),
            SaveFormat::Png
        );
        assert!(matches!(
            SaveFormat::resolve(Path::new("a.bmp"), None),
            Err(SaveError::UnsupportedFormat(_))
        ));
        assert_eq!("jpg".parse::<SaveFormat>().unwrap(), SaveFormat::Jpeg);
    }
}
