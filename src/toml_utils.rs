// -- imports
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::annotate::AnnotateConfigs;
use crate::error::{AppError, Result};
use crate::model::ModelArgs;
use crate::peer::RelayConfig;
use crate::source::SourceConfig;

// -- config

/// Application configuration, resolved once at startup and passed explicitly.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Image shown on the help page
    pub help_image: Option<PathBuf>,

    pub model: ModelArgs,

    pub annotate: AnnotateConfigs,

    pub source: SourceConfig,

    pub relay: RelayConfig,
}

impl AppConfig {
    /// Parse TOML config file with explicit project root for path resolution.
    ///
    /// # Arguments
    ///
    /// * `toml_path` - Path to the TOML config file
    /// * `project_root` - Base directory for resolving relative paths
    ///
    /// # Errors
    ///
    /// Returns `AppError` if:
    /// - The path is not a valid toml file
    /// - File read fails
    /// - TOML parsing fails
    /// - A threshold lies outside [0, 1]
    pub fn from_toml(toml_path: &Path, project_root: &Path) -> Result<Self> {
        if !toml_path.is_file() || toml_path.extension().is_none_or(|ext| ext != "toml") {
            return Err(AppError::Config(format!(
                "TOML config path is not a valid .toml file: {:?}",
                toml_path
            )));
        }

        let content = std::fs::read_to_string(toml_path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.validate()?;
        config.resolve_paths(project_root);

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("model.conf", self.model.conf),
            ("model.floor_conf", self.model.floor_conf),
            ("model.iou", self.model.iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Config(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Resolve relative paths against project root
    fn resolve_paths(&mut self, project_root: &Path) {
        let resolve = |p: &mut PathBuf| {
            if !p.as_os_str().is_empty() && !p.is_absolute() {
                *p = project_root.join(p.as_path());
            }
        };

        resolve(&mut self.model.model);
        for path in self.source.videos.values_mut() {
            resolve(path);
        }
        if let Some(ref mut help_image) = self.help_image {
            resolve(help_image);
        }
    }
}

// -- public API

/// Parse TOML config file and return the resolved AppConfig.
///
/// # Errors
///
/// Returns `AppError` if TOML parsing, validation or path resolution fails.
pub fn parse_toml(toml_path: &Path, project_root: &Path) -> Result<AppConfig> {
    AppConfig::from_toml(toml_path, project_root)
}

// -- tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_toml_with_custom_values() {
        let temp_dir = TempDir::new().unwrap();
        let toml_path = temp_dir.path().join("config.toml");
        let toml_content = r#"
help_image = "images/help.png"

[model]
model = "weights/best.onnx"
conf = 0.6
iou = 0.5
max_det = 100
half = true

[annotate]
show_box = true
show_label = false
show_conf = false

[source.webcam]
device = "/dev/video2"

[source.videos]
"Video 1" = "videos/video_1.mp4"
"Video 2" = "/data/video_2.mp4"

[source.remote]
height = 480

[source.tools]
ffmpeg = "/usr/local/bin/ffmpeg"

[relay]
endpoint = "https://relay.example/ice"
api_key_env = "SOLAR_RELAY_KEY"
timeout_secs = 3
"#;
        fs::write(&toml_path, toml_content).unwrap();

        let config = AppConfig::from_toml(&toml_path, temp_dir.path()).unwrap();

        assert_eq!(config.model.conf, 0.6);
        assert_eq!(config.model.iou, 0.5);
        assert_eq!(config.model.max_det, 100);
        assert!(config.model.half);
        assert_eq!(config.model.model, temp_dir.path().join("weights/best.onnx"));

        assert!(!config.annotate.show_label);
        assert!(!config.annotate.show_conf);

        assert_eq!(config.source.webcam.device, "/dev/video2");
        assert_eq!(config.source.webcam.input_format, "video4linux2");
        assert_eq!(
            config.source.videos["Video 1"],
            temp_dir.path().join("videos/video_1.mp4")
        );
        assert_eq!(config.source.videos["Video 2"], PathBuf::from("/data/video_2.mp4"));
        assert_eq!(config.source.remote.height, 480);
        assert_eq!(config.source.remote.ext, "mp4");
        assert_eq!(config.source.tools.ffmpeg, PathBuf::from("/usr/local/bin/ffmpeg"));
        assert_eq!(config.source.tools.ffprobe, PathBuf::from("ffprobe"));

        assert_eq!(config.relay.endpoint.as_deref(), Some("https://relay.example/ice"));
        assert_eq!(config.relay.api_key_env, "SOLAR_RELAY_KEY");
        assert_eq!(config.relay.timeout_secs, 3);
        assert_eq!(config.help_image, Some(temp_dir.path().join("images/help.png")));
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let temp_dir = TempDir::new().unwrap();
        let toml_path = temp_dir.path().join("config.toml");
        fs::write(&toml_path, "[model]\nmodel = \"best.onnx\"\n").unwrap();

        let config = parse_toml(&toml_path, temp_dir.path()).unwrap();

        assert_eq!(config.model.conf, 0.4);
        assert_eq!(config.source.webcam.device, "0");
        assert_eq!(config.source.remote.height, 720);
        assert!(config.source.videos.is_empty());
        assert!(config.relay.endpoint.is_none());
        assert!(config.annotate.show_box);
    }

    #[test]
    fn test_static_relay_servers() {
        let temp_dir = TempDir::new().unwrap();
        let toml_path = temp_dir.path().join("config.toml");
        let toml_content = r#"
[[relay.servers]]
urls = ["turn:relay.example:3478"]
username = "user"
credential = "pass"
"#;
        fs::write(&toml_path, toml_content).unwrap();

        let config = parse_toml(&toml_path, temp_dir.path()).unwrap();
        let servers = config.relay.provider().fetch().unwrap();
        assert_eq!(servers.len(), 1);
        assert!(servers[0].is_relay());
    }

    #[test]
    fn test_out_of_range_conf_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let toml_path = temp_dir.path().join("config.toml");
        fs::write(&toml_path, "[model]\nconf = 1.5\n").unwrap();
        assert!(matches!(
            parse_toml(&toml_path, temp_dir.path()),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_from_toml_invalid_path() {
        let invalid_path = PathBuf::from("/nonexistent/config.toml");
        let project_root = PathBuf::from("/tmp");
        assert!(AppConfig::from_toml(&invalid_path, &project_root).is_err());
    }

    #[test]
    fn test_from_toml_invalid_extension() {
        let temp_dir = TempDir::new().unwrap();
        let invalid_path = temp_dir.path().join("config.txt");
        fs::write(&invalid_path, "[model]\nmodel = \"test.onnx\"\n").unwrap();
        assert!(AppConfig::from_toml(&invalid_path, temp_dir.path()).is_err());
    }

    #[test]
    fn test_parse_toml_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let invalid_toml_path = temp_dir.path().join("invalid.toml");
        fs::write(&invalid_toml_path, "invalid toml [[[").unwrap();
        assert!(parse_toml(&invalid_toml_path, temp_dir.path()).is_err());
    }
}
