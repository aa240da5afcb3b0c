use anyhow::{Context, Result};
use rollcall_core::PipelineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Terminal configuration: an optional TOML file overlaid with `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// SQLite database file (default: $XDG_DATA_HOME/rollcall/attendance.db).
    pub db_path: Option<PathBuf>,
    /// Where stranger crops are written (default: `strangers/` next to the database).
    pub strangers_dir: Option<PathBuf>,
    /// Device or frame directory used by `run` when no source is given.
    pub camera_device: String,
    /// Frame rate assumed for frame-directory playback.
    pub playback_fps: f32,
    /// External TTS program; the greeting is appended as its last argument.
    pub speech_command: Option<String>,
    pub pipeline: PipelineConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            strangers_dir: None,
            camera_device: "/dev/video0".to_string(),
            playback_fps: 25.0,
            speech_command: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl CliConfig {
    /// Read `path` if given, else the default config file if it exists, else
    /// defaults. Environment variables are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Some(config_dir().join("config.toml")).filter(|p| p.exists()),
        };

        let config = match file {
            Some(p) => {
                let text = std::fs::read_to_string(&p)
                    .with_context(|| format!("reading config file {}", p.display()))?;
                let config = Self::parse(&text).with_context(|| format!("parsing {}", p.display()))?;
                tracing::debug!(path = %p.display(), "config file loaded");
                config
            }
            None => Self::default(),
        };
        Ok(config.with_env())
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn with_env(mut self) -> Self {
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ROLLCALL_STRANGERS_DIR") {
            self.strangers_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_SPEECH_COMMAND") {
            self.speech_command = Some(v).filter(|s| !s.trim().is_empty());
        }
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| data_dir().join("attendance.db"))
    }

    pub fn strangers_dir(&self) -> PathBuf {
        self.strangers_dir.clone().unwrap_or_else(|| {
            self.db_path()
                .parent()
                .map(|p| p.join("strangers"))
                .unwrap_or_else(|| PathBuf::from("strangers"))
        })
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(fallback)
        })
        .join("rollcall")
}

fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_pipeline_table() {
        let c = CliConfig::parse(
            r#"
            db_path = "/var/lib/rollcall/att.db"
            camera_device = "/dev/video2"
            speech_command = "espeak -s 140"

            [pipeline]
            tolerance = 0.5
            liveness_enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(c.camera_device, "/dev/video2");
        assert_eq!(c.speech_command.as_deref(), Some("espeak -s 140"));
        assert!((c.pipeline.tolerance - 0.5).abs() < 1e-6);
        assert!(!c.pipeline.liveness_enabled);
        assert_eq!(c.pipeline.skip_frames, 5);
        assert_eq!(c.strangers_dir(), PathBuf::from("/var/lib/rollcall/strangers"));
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let c = CliConfig::parse("").unwrap();
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_unknown_pipeline_value_type_is_error() {
        assert!(CliConfig::parse("[pipeline]\ntolerance = \"high\"\n").is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "playback_fps = 10.0\n").unwrap();
        let c = CliConfig::load(Some(&path)).unwrap();
        assert!((c.playback_fps - 10.0).abs() < 1e-6);

        assert!(CliConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
