use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{AnimaError, AnimaResult, Color};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Canvas clear color as `#RRGGBB[AA]`.
    pub background: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "untitled".to_string(),
            width: 1280,
            height: 720,
            fps: 30.0,
            background: "#000000".to_string(),
        }
    }
}

impl ProjectConfig {
    pub fn background_color(&self) -> AnimaResult<Color> {
        Color::from_hex(&self.background).map_err(|e| {
            AnimaError::InvalidArgument(format!("background '{}': {}", self.background, e))
        })
    }
}

/// Which GPU capability implementation renders the frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CPU rasterizer; always available, bit-reproducible.
    Software,
    /// Headless wgpu device.
    Wgpu,
}

/// How the scheduler paces simulated time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PacingKind {
    /// Advance exactly one frame interval per tick, never sleep.
    FixedStep,
    /// Advance one frame interval per tick and sleep until the next deadline.
    WallClock,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    pub backend: BackendKind,
    /// Frames allowed between "submitted" and "read back".
    pub max_in_flight: usize,
    pub pacing: PacingKind,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Software,
            max_in_flight: 2,
            pacing: PacingKind::FixedStep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Mp4,
    Png,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowKind {
    /// Suspend the producer until the encoder catches up.
    Block,
    /// Drop frames that do not fit in the encoder queue.
    Drop,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    pub format: ExportFormat,
    pub output: String,
    pub queue_capacity: usize,
    pub overflow: OverflowKind,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: ExportFormat::Mp4,
            output: "output/animation.mp4".to_string(),
            queue_capacity: 8,
            overflow: OverflowKind::Block,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `animanode_render=debug`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Contents of `animanode.toml`. Every section is optional.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AnimaConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AnimaConfig {
    pub fn from_toml_str(contents: &str) -> AnimaResult<Self> {
        let config: AnimaConfig = toml::from_str(contents)
            .map_err(|e| AnimaError::config(e.to_string(), "<inline>"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> AnimaResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AnimaConfig =
            toml::from_str(&contents).map_err(|e| AnimaError::config(e.to_string(), path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> AnimaResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| AnimaError::config(e.to_string(), path))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the renderer cannot honour.
    pub fn validate(&self) -> AnimaResult<()> {
        if self.project.width == 0 || self.project.height == 0 {
            return Err(AnimaError::InvalidArgument(
                "project resolution must be non-zero".into(),
            ));
        }
        if !self.project.fps.is_finite() || self.project.fps <= 0.0 {
            return Err(AnimaError::InvalidArgument(
                "project fps must be positive".into(),
            ));
        }
        if self.render.max_in_flight == 0 {
            return Err(AnimaError::InvalidArgument(
                "render.max_in_flight must be at least 1".into(),
            ));
        }
        if self.export.queue_capacity == 0 {
            return Err(AnimaError::InvalidArgument(
                "export.queue_capacity must be at least 1".into(),
            ));
        }
        self.project.background_color()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sections_default() {
        let config = AnimaConfig::from_toml_str("[project]\nname = \"demo\"\nwidth = 320\nheight = 240\nfps = 24.0\nbackground = \"#102030\"\n").unwrap();
        assert_eq!(config.project.name, "demo");
        assert_eq!(config.render.backend, BackendKind::Software);
        assert_eq!(config.render.max_in_flight, 2);
        assert_eq!(config.export.overflow, OverflowKind::Block);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_enum_spellings() {
        let config = AnimaConfig::from_toml_str(
            "[render]\nbackend = \"wgpu\"\nmax_in_flight = 3\npacing = \"wall-clock\"\n\n[export]\nformat = \"png\"\noutput = \"frames\"\nqueue_capacity = 4\noverflow = \"drop\"\n",
        )
        .unwrap();
        assert_eq!(config.render.backend, BackendKind::Wgpu);
        assert_eq!(config.render.pacing, PacingKind::WallClock);
        assert_eq!(config.export.format, ExportFormat::Png);
        assert_eq!(config.export.overflow, OverflowKind::Drop);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(AnimaConfig::from_toml_str("[render]\nbackend = \"software\"\nmax_in_flight = 0\npacing = \"fixed-step\"\n").is_err());
        let mut config = AnimaConfig::default();
        config.project.fps = 0.0;
        assert!(config.validate().is_err());
        config.project.fps = 30.0;
        config.project.background = "nope".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("animanode-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("animanode.toml");

        let mut config = AnimaConfig::default();
        config.project.name = "round-trip".into();
        config.export.format = ExportFormat::None;
        config.save_to_file(&path).unwrap();

        let loaded = AnimaConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.project.name, "round-trip");
        assert_eq!(loaded.export.format, ExportFormat::None);
        std::fs::remove_dir_all(&dir).ok();
    }
}
