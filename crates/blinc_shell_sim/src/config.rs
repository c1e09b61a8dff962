//! Simulation configuration file handling

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default config file name looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "shell-sim.toml";

/// Headless shell simulation configuration (shell-sim.toml)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SimConfig {
    /// Engines sharing the platform/raster pair
    #[serde(default = "default_engines")]
    pub engines: usize,
    /// Frames to rasterize
    #[serde(default = "default_frames")]
    pub frames: u32,
    /// Lease requested whenever a platform view appears
    #[serde(default = "default_lease_term")]
    pub lease_term: usize,
    /// Pause between frames
    #[serde(default)]
    pub frame_interval_ms: u64,
    /// Frames on which the raster thread sees a platform view
    #[serde(default = "default_platform_view_frames")]
    pub platform_view_frames: Vec<u32>,
    /// Frame on which engine 0 gives up its merge immediately
    #[serde(default)]
    pub release_engine_on_frame: Option<u32>,
}

fn default_engines() -> usize {
    2
}

fn default_frames() -> u32 {
    12
}

fn default_lease_term() -> usize {
    3
}

fn default_platform_view_frames() -> Vec<u32> {
    vec![2, 7]
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            engines: default_engines(),
            frames: default_frames(),
            lease_term: default_lease_term(),
            frame_interval_ms: 0,
            platform_view_frames: default_platform_view_frames(),
            release_engine_on_frame: None,
        }
    }
}

impl SimConfig {
    /// Load configuration from a file, or from `shell-sim.toml` inside a directory
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config_path = if path.is_dir() {
            path.join(CONFIG_FILE_NAME)
        } else {
            path.to_path_buf()
        };

        if !config_path.exists() {
            bail!("No {} found at {}", CONFIG_FILE_NAME, config_path.display());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the simulation cannot run
    pub fn validate(&self) -> Result<()> {
        if self.engines == 0 {
            bail!("engines must be > 0");
        }
        if self.frames == 0 {
            bail!("frames must be > 0");
        }
        if self.lease_term == 0 {
            bail!("lease_term must be > 0");
        }
        Ok(())
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    pub fn has_platform_view(&self, frame: u32) -> bool {
        self.platform_view_frames.contains(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SimConfig::from_toml("").unwrap();
        assert_eq!(config, SimConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = SimConfig::from_toml(
            r#"
            engines = 4
            platform_view_frames = [0]
            release_engine_on_frame = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.engines, 4);
        assert_eq!(config.frames, 12);
        assert_eq!(config.platform_view_frames, vec![0]);
        assert_eq!(config.release_engine_on_frame, Some(1));
        assert!(config.has_platform_view(0));
        assert!(!config.has_platform_view(1));
    }

    #[test]
    fn test_rejects_empty_lease() {
        let err = SimConfig::from_toml("lease_term = 0").unwrap_err();
        assert!(err.to_string().contains("lease_term"));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = SimConfig {
            release_engine_on_frame: Some(5),
            ..Default::default()
        };
        let parsed = SimConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = SimConfig::load_from_path(Path::new("/nonexistent/shell-sim.toml")).unwrap_err();
        assert!(err.to_string().contains("No shell-sim.toml found"));
    }
}
