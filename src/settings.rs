use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::components::history::DEFAULT_MAX_HISTORY;
use crate::components::tools::{DEFAULT_BRUSH_SIZE, MAX_BRUSH_SIZE, MIN_BRUSH_SIZE, Tool};
use crate::compositor::BackgroundMode;
use crate::{log_info, log_warn};

/// Per-side margin left around the image by fit-to-viewport.
pub const DEFAULT_FIT_MARGIN: f32 = 20.0;

const SETTINGS_FILE_NAME: &str = "stickerfe_settings.cfg";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("no settings directory is available on this platform")]
    NoSettingsDir,
    #[error("could not write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Persisted editor preferences.
#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    pub brush_size: u32,
    pub tool: Tool,
    pub background: BackgroundMode,
    /// Max history entries, including the current state.
    pub max_history: usize,
    pub fit_margin: f32,
    pub stroke_interpolation: bool,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            brush_size: DEFAULT_BRUSH_SIZE,
            tool: Tool::default(),
            background: BackgroundMode::default(),
            max_history: DEFAULT_MAX_HISTORY,
            fit_margin: DEFAULT_FIT_MARGIN,
            stroke_interpolation: true,
        }
    }
}

impl EditorSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/stickerfe/stickerfe_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\StickerFE\stickerfe_settings.cfg
    /// On macOS:   ~/Library/Application Support/StickerFE/stickerfe_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("stickerfe");
            return Some(config_dir.join(SETTINGS_FILE_NAME));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("StickerFE").join(SETTINGS_FILE_NAME));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("StickerFE")
                    .join(SETTINGS_FILE_NAME),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE_NAME)))
        }
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::load_from_str(&content),
            Err(_) => Self::default(),
        }
    }

    /// Parse `key=value` lines.  Unknown keys are skipped and values that
    /// don't parse leave the default in place.
    pub fn load_from_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "brush_size" => {
                    if let Ok(size) = val.parse::<u32>() {
                        s.brush_size = size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
                    }
                }
                "tool" => {
                    if let Some(tool) = Tool::from_config_name(val) {
                        s.tool = tool;
                    }
                }
                "background" => {
                    if let Some(bg) = BackgroundMode::from_config_name(val) {
                        s.background = bg;
                    }
                }
                "max_history" => {
                    if let Ok(n) = val.parse::<usize>() {
                        s.max_history = n.max(1);
                    }
                }
                "fit_margin" => {
                    if let Ok(m) = val.parse::<f32>()
                        && m.is_finite()
                        && m >= 0.0
                    {
                        s.fit_margin = m;
                    }
                }
                "stroke_interpolation" => match val {
                    "true" => s.stroke_interpolation = true,
                    "false" => s.stroke_interpolation = false,
                    _ => {}
                },
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "brush_size={}\n\
             tool={}\n\
             background={}\n\
             max_history={}\n\
             fit_margin={}\n\
             stroke_interpolation={}\n",
            self.brush_size,
            self.tool.config_name(),
            self.background.config_name(),
            self.max_history,
            self.fit_margin,
            self.stroke_interpolation,
        )
    }

    /// Save settings to the default location.
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::settings_path().ok_or(SettingsError::NoSettingsDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, self.to_config_string())
        };
        match write() {
            Ok(()) => {
                log_info!("Saved settings to {}", path.display());
                Ok(())
            }
            Err(source) => {
                log_warn!("Failed to save settings to {}: {}", path.display(), source);
                Err(SettingsError::Write {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}
