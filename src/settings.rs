// ============================================================================
// ENGINE SETTINGS — persisted key=value configuration
// ============================================================================

use std::path::PathBuf;

/// Settings that persist across sessions.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    /// Maximum number of undo snapshots kept.
    pub max_undo_steps: usize,
    /// JPEG quality used for the ELA re-encode (1–100).
    pub ela_quality: u8,
    /// RGB distance below which a pixel counts as background in the
    /// corner-sampling fallback.
    pub background_tolerance: f32,
    /// Minimum-filter radius applied to alpha before feathering blur.
    pub feather_erode_radius: u32,
    /// Gaussian radius of the feathering blur.
    pub feather_blur_radius: f32,
    /// Per-tick wheel zoom factor.
    pub zoom_step: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Path to the optional segmentation plugin (shared library).
    /// Empty = fallback algorithm only.
    pub segmentation_plugin: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: 20,
            ela_quality: 90,
            background_tolerance: 30.0,
            feather_erode_radius: 3,
            feather_blur_radius: 2.5,
            zoom_step: 1.1,
            min_zoom: 0.05,
            max_zoom: 40.0,
            segmentation_plugin: String::new(),
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/frg/frg_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\frg\frg_settings.cfg
    /// On macOS:   ~/Library/Application Support/frg/frg_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("frg").join("frg_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("frg")
                    .join("frg_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = match std::env::var("XDG_CONFIG_HOME") {
                Ok(dir) => PathBuf::from(dir),
                Err(_) => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
            };
            Some(config_dir.join("frg").join("frg_settings.cfg"))
        }
    }

    /// Load settings from disk (defaults if the file is missing or unreadable).
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_config_str(&content),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to disk. Failures are logged, never fatal.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Err(e) = std::fs::write(&path, self.to_config_string()) {
            log_warn!("could not write settings to {}: {}", path.display(), e);
        }
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_undo_steps={}\n\
             ela_quality={}\n\
             background_tolerance={}\n\
             feather_erode_radius={}\n\
             feather_blur_radius={}\n\
             zoom_step={}\n\
             min_zoom={}\n\
             max_zoom={}\n\
             segmentation_plugin={}\n",
            self.max_undo_steps,
            self.ela_quality,
            self.background_tolerance,
            self.feather_erode_radius,
            self.feather_blur_radius,
            self.zoom_step,
            self.min_zoom,
            self.max_zoom,
            self.segmentation_plugin,
        )
    }

    /// Parse `key=value` lines. Unknown keys and unparsable values are
    /// ignored; parsed values are clamped to sane ranges.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "max_undo_steps" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_undo_steps = v.max(1);
                    }
                }
                "ela_quality" => {
                    if let Ok(v) = val.parse::<u8>() {
                        s.ela_quality = v.clamp(1, 100);
                    }
                }
                "background_tolerance" => {
                    if let Ok(v) = val.parse::<f32>() {
                        s.background_tolerance = v.max(0.0);
                    }
                }
                "feather_erode_radius" => {
                    if let Ok(v) = val.parse::<u32>() {
                        s.feather_erode_radius = v.min(64);
                    }
                }
                "feather_blur_radius" => {
                    if let Ok(v) = val.parse::<f32>() {
                        s.feather_blur_radius = v.clamp(0.0, 64.0);
                    }
                }
                "zoom_step" => {
                    if let Ok(v) = val.parse::<f64>() {
                        s.zoom_step = v.clamp(1.01, 2.0);
                    }
                }
                "min_zoom" => {
                    if let Ok(v) = val.parse::<f64>()
                        && v > 0.0
                    {
                        s.min_zoom = v;
                    }
                }
                "max_zoom" => {
                    if let Ok(v) = val.parse::<f64>()
                        && v > 0.0
                    {
                        s.max_zoom = v;
                    }
                }
                "segmentation_plugin" => {
                    s.segmentation_plugin = val.to_string();
                }
                _ => {}
            }
        }
        if s.min_zoom > s.max_zoom {
            std::mem::swap(&mut s.min_zoom, &mut s.max_zoom);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let s = EngineSettings::from_config_str("ela_quality=75\n");
        assert_eq!(s.ela_quality, 75);
        assert_eq!(s.max_undo_steps, 20);
        assert_eq!(s.background_tolerance, 30.0);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let s = EngineSettings::from_config_str(
            "ela_quality=0\nmax_undo_steps=0\nzoom_step=9\n",
        );
        assert_eq!(s.ela_quality, 1);
        assert_eq!(s.max_undo_steps, 1);
        assert_eq!(s.zoom_step, 2.0);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let s = EngineSettings::from_config_str("nonsense\nmax_zoom=abc\nfoo=bar\n");
        assert_eq!(s, EngineSettings::default());
    }

    #[test]
    fn config_string_parses_back() {
        let mut s = EngineSettings::default();
        s.segmentation_plugin = "/opt/seg/libseg.so".to_string();
        s.feather_blur_radius = 1.5;
        assert_eq!(EngineSettings::from_config_str(&s.to_config_string()), s);
    }
}
