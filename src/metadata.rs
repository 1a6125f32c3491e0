// ============================================================================
// METADATA — EXIF record merged from two independent readers
// ============================================================================

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::canvas::RasterImage;
use crate::io::LoadedImage;

/// Tag name → value. Keys are unique; iteration is sorted by key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExifRecord {
    entries: BTreeMap<String, String>,
}

impl ExifRecord {
    /// Read both sources for a loaded image and merge them.
    pub fn for_image(loaded: &LoadedImage) -> Self {
        let detailed = read_detailed(&loaded.path);
        let embedded = read_embedded(&loaded.path);
        Self::merge(detailed, embedded, &loaded.format_name(), &loaded.image)
    }

    /// The detailed reader wins; the embedded reader is only consulted when
    /// the first yields nothing. `Format`, `Size` and `Mode` are always set.
    pub fn merge(
        detailed: BTreeMap<String, String>,
        embedded: BTreeMap<String, String>,
        format_name: &str,
        image: &RasterImage,
    ) -> Self {
        let mut entries = if detailed.is_empty() { embedded } else { detailed };
        entries.insert("Format".to_string(), format_name.to_string());
        entries.insert("Size".to_string(), format!("{}x{}", image.width(), image.height()));
        entries.insert("Mode".to_string(), image.format().mode_name().to_string());
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `key: value` lines.
    pub fn to_text(&self) -> String {
        self.iter().map(|(k, v)| format!("{}: {}\n", k, v)).collect()
    }
}

/// EXIF tags via `kamadak-exif`. The primary IFD wins over the thumbnail IFD
/// for duplicated tags. Any failure yields an empty map.
pub fn read_detailed(path: &Path) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Ok(file) = File::open(path) else { return out };
    let mut reader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(e) => {
            log_debug!("no EXIF in {}: {}", path.display(), e);
            return out;
        }
    };
    for field in exif.fields() {
        out.entry(field.tag.to_string())
            .or_insert_with(|| field.display_value().with_unit(&exif).to_string());
    }
    out
}

/// Metadata embedded by the container itself: PNG tEXt, zTXt and iTXt
/// chunks ahead of the image data. Non-PNG files yield an empty map.
pub fn read_embedded(path: &Path) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Ok(file) = File::open(path) else { return out };
    let decoder = png::Decoder::new(BufReader::new(file));
    let reader = match decoder.read_info() {
        Ok(reader) => reader,
        Err(_) => return out,
    };
    let info = reader.info();
    for chunk in &info.uncompressed_latin1_text {
        out.entry(chunk.keyword.clone()).or_insert_with(|| chunk.text.clone());
    }
    for chunk in &info.compressed_latin1_text {
        if let Ok(text) = chunk.get_text() {
            out.entry(chunk.keyword.clone()).or_insert(text);
        }
    }
    for chunk in &info.utf8_text {
        if let Ok(text) = chunk.get_text() {
            out.entry(chunk.keyword.clone()).or_insert(text);
        }
    }
    if let Some(dpi) = info.pixel_dims
        && dpi.unit == png::Unit::Meter
    {
        out.entry("dpi".to_string()).or_insert_with(|| {
            format!(
                "({}, {})",
                (dpi.xppu as f64 * 0.0254).round(),
                (dpi.yppu as f64 * 0.0254).round()
            )
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png_with_text(path: &Path) {
        let file = File::create(path).unwrap();
        let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), 1, 1);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.add_text_chunk("Author".to_string(), "J. Doe".to_string()).unwrap();
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[1, 2, 3, 255]).unwrap();
    }

    #[test]
    fn png_text_chunks_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagged.png");
        write_png_with_text(&path);
        let embedded = read_embedded(&path);
        assert_eq!(embedded.get("Author").map(String::as_str), Some("J. Doe"));
        assert!(read_detailed(&path).is_empty());
    }

    #[test]
    fn synthetic_keys_always_present() {
        let image = RasterImage::from_rgb(RgbImage::from_pixel(7, 5, Rgb([0, 0, 0])));
        let record = ExifRecord::merge(BTreeMap::new(), BTreeMap::new(), "JPEG", &image);
        assert_eq!(record.len(), 3);
        assert_eq!(record.get("Format"), Some("JPEG"));
        assert_eq!(record.get("Size"), Some("7x5"));
        assert_eq!(record.get("Mode"), Some("RGB"));
    }

    #[test]
    fn detailed_reader_takes_precedence() {
        let image = RasterImage::from_rgb(RgbImage::new(1, 1));
        let detailed = BTreeMap::from([("Make".to_string(), "Acme".to_string())]);
        let embedded = BTreeMap::from([("Software".to_string(), "Editor".to_string())]);
        let record = ExifRecord::merge(detailed, embedded.clone(), "JPEG", &image);
        assert_eq!(record.get("Make"), Some("Acme"));
        assert_eq!(record.get("Software"), None);

        let record = ExifRecord::merge(BTreeMap::new(), embedded, "PNG", &image);
        assert_eq!(record.get("Software"), Some("Editor"));
    }

    #[test]
    fn text_output_is_sorted_lines() {
        let image = RasterImage::from_rgb(RgbImage::new(2, 3));
        let record = ExifRecord::merge(BTreeMap::new(), BTreeMap::new(), "PNG", &image);
        assert_eq!(record.to_text(), "Format: PNG\nMode: RGB\nSize: 2x3\n");
    }

    #[test]
    fn unreadable_paths_yield_nothing() {
        let missing = Path::new("/nonexistent/frg/none.jpg");
        assert!(read_detailed(missing).is_empty());
        assert!(read_embedded(missing).is_empty());
    }
}
