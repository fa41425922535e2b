// src/config.rs
//
// Two configuration documents:
//
//   config.yaml     — how this tool runs (folders, which exports, rendering).
//   settings.json   — the grid itself (shape, pose, line thickness). Written by
//                     whoever positioned the grid and shared by every video of
//                     a batch, so it is versioned separately from config.yaml.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::grid::{GridConfig, GridPose};

// ============================================================================
// APPLICATION CONFIG (YAML)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub batch: BatchConfig,
    pub outputs: OutputConfig,
    pub render: RenderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Folder scanned for videos when none are given on the command line
    pub input_dir: String,
    /// Optional folder holding detection CSVs, searched before each video's own folder
    pub csv_dir: Option<String>,
    pub output_dir: String,
    pub settings_file: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_dir: "videos".to_string(),
            csv_dir: None,
            output_dir: "output".to_string(),
            settings_file: "settings.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub annotated_video: bool,
    /// Legend and timeline panels around the annotated video
    pub draw_overlays: bool,
    pub draw_grid: bool,
    pub enriched_csv: bool,
    pub centroid_csv: bool,
    pub workbook: bool,
    pub trajectory_image: bool,
    /// Trajectory lines break when consecutive points are further apart than this
    pub time_gap_seconds: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            annotated_video: true,
            draw_overlays: true,
            draw_grid: false,
            enriched_csv: true,
            centroid_csv: true,
            workbook: true,
            trajectory_image: true,
            time_gap_seconds: 1.0,
        }
    }
}

impl OutputConfig {
    pub fn any_selected(&self) -> bool {
        self.annotated_video
            || self.enriched_csv
            || self.centroid_csv
            || self.workbook
            || self.trajectory_image
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// TTF/OTF font for labels; the bundled DejaVu Sans when unset
    pub font_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "ethogrid=info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.batch.output_dir)
    }
}

// ============================================================================
// GRID SETTINGS BUNDLE (JSON)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridTransformSettings {
    pub center_x: f64,
    pub center_y: f64,
    pub angle: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl From<GridPose> for GridTransformSettings {
    fn from(pose: GridPose) -> Self {
        Self {
            center_x: pose.center.0,
            center_y: pose.center.1,
            angle: pose.angle_degrees,
            scale_x: pose.scale_x,
            scale_y: pose.scale_y,
        }
    }
}

impl From<GridTransformSettings> for GridPose {
    fn from(s: GridTransformSettings) -> Self {
        GridPose {
            center: (s.center_x, s.center_y),
            angle_degrees: s.angle,
            scale_x: s.scale_x,
            scale_y: s.scale_y,
        }
    }
}

/// Shared grid placement for a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettingsBundle {
    pub grid_settings: GridConfig,
    pub line_thickness: u32,
    pub grid_transform: GridTransformSettings,
}

impl Default for SettingsBundle {
    fn default() -> Self {
        Self::new(GridConfig::default(), GridPose::default(), 2)
    }
}

impl SettingsBundle {
    pub fn new(grid: GridConfig, pose: GridPose, line_thickness: u32) -> Self {
        Self {
            grid_settings: grid,
            line_thickness,
            grid_transform: pose.into(),
        }
    }

    pub fn grid(&self) -> GridConfig {
        self.grid_settings
    }

    pub fn pose(&self) -> GridPose {
        self.grid_transform.into()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let bundle: SettingsBundle =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                path: path.display().to_string(),
                source,
            })?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Json {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Shape, thickness and pose sanity. Invertibility is checked per video,
    /// once the pixel size is known.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid_settings
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.line_thickness == 0 {
            return Err(ConfigError::Invalid("line_thickness must be at least 1".into()));
        }

        let t = &self.grid_transform;
        let values = [t.center_x, t.center_y, t.angle, t.scale_x, t.scale_y];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::Invalid("grid_transform contains a non-finite value".into()));
        }
        if t.scale_x == 0.0 || t.scale_y == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "grid_transform scale must be non-zero (got {} x {})",
                t.scale_x, t.scale_y
            )));
        }

        Ok(())
    }
}
