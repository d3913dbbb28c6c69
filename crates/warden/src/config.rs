use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use warden_hw::link::is_supported_baud;
use warden_hw::LinkConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Appliance configuration.
///
/// Loaded from the TOML file named by `WARDEN_CONFIG` (if set), then
/// overridden field by field from `WARDEN_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// One sub-directory of images per authorized person.
    pub enrollment_root: PathBuf,
    /// Where the trained model, labels and manifest live.
    pub model_dir: PathBuf,
    /// SCRFD ONNX model file.
    pub detector_model: PathBuf,
    pub camera_device: String,
    pub link_device: PathBuf,
    pub link_baud: u32,
    /// Wait after opening the link before the first command.
    pub link_settle_ms: u64,
    /// Predictions must be strictly below this to count as a match.
    pub confidence_threshold: f64,
    pub deactivate_after_secs: u64,
    /// Frames saved per add-person run.
    pub capture_count: u32,
    pub link_test_hold_secs: u64,
    pub min_face_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enrollment_root: PathBuf::from("authorized_faces"),
            model_dir: PathBuf::from("model"),
            detector_model: PathBuf::from("models/det_10g.onnx"),
            camera_device: "/dev/video0".to_string(),
            link_device: PathBuf::from("/dev/ttyACM0"),
            link_baud: 9600,
            link_settle_ms: 2000,
            confidence_threshold: warden_core::session::DEFAULT_CONFIDENCE_THRESHOLD,
            deactivate_after_secs: warden_hw::DEFAULT_DEACTIVATE_AFTER.as_secs(),
            capture_count: 10,
            link_test_hold_secs: 2,
            min_face_size: 24,
        }
    }
}

impl Config {
    /// Load from `WARDEN_CONFIG` and the environment, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("WARDEN_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(toml::from_str(&contents)?)
    }

    /// Override fields from `WARDEN_*` variables. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("WARDEN_ENROLLMENT_ROOT") {
            self.enrollment_root = v.into();
        }
        if let Some(v) = lookup("WARDEN_MODEL_DIR") {
            self.model_dir = v.into();
        }
        if let Some(v) = lookup("WARDEN_DETECTOR_MODEL") {
            self.detector_model = v.into();
        }
        if let Some(v) = lookup("WARDEN_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("WARDEN_LINK_DEVICE") {
            self.link_device = v.into();
        }
        parse_into(&lookup, "WARDEN_LINK_BAUD", &mut self.link_baud);
        parse_into(&lookup, "WARDEN_LINK_SETTLE_MS", &mut self.link_settle_ms);
        parse_into(&lookup, "WARDEN_CONFIDENCE_THRESHOLD", &mut self.confidence_threshold);
        parse_into(&lookup, "WARDEN_DEACTIVATE_AFTER_SECS", &mut self.deactivate_after_secs);
        parse_into(&lookup, "WARDEN_CAPTURE_COUNT", &mut self.capture_count);
        parse_into(&lookup, "WARDEN_LINK_TEST_HOLD_SECS", &mut self.link_test_hold_secs);
        parse_into(&lookup, "WARDEN_MIN_FACE_SIZE", &mut self.min_face_size);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.confidence_threshold.is_finite() && self.confidence_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "confidence_threshold must be positive, got {}",
                self.confidence_threshold
            )));
        }
        if self.deactivate_after_secs == 0 {
            return Err(ConfigError::Invalid("deactivate_after_secs must be at least 1".into()));
        }
        if self.capture_count == 0 {
            return Err(ConfigError::Invalid("capture_count must be at least 1".into()));
        }
        if !is_supported_baud(self.link_baud) {
            return Err(ConfigError::Invalid(format!("unsupported link_baud {}", self.link_baud)));
        }
        Ok(())
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            device: self.link_device.clone(),
            baud: self.link_baud,
            settle: Duration::from_millis(self.link_settle_ms),
        }
    }

    pub fn deactivate_after(&self) -> Duration {
        Duration::from_secs(self.deactivate_after_secs)
    }

    pub fn link_test_hold(&self) -> Duration {
        Duration::from_secs(self.link_test_hold_secs)
    }
}

fn parse_into<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = var(key) else { return };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.confidence_threshold, 70.0);
        assert_eq!(config.deactivate_after(), Duration::from_secs(10));
        assert_eq!(config.link_baud, 9600);
        assert_eq!(config.link_config().settle, Duration::from_millis(2000));
        assert_eq!(config.capture_count, 10);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = "confidence_threshold = 55.5\nlink_device = \"/dev/ttyUSB0\"\n";
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.confidence_threshold, 55.5);
        assert_eq!(config.link_device, PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(config.model_dir, PathBuf::from("model"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<Config>("threshhold = 3").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.toml");
        std::fs::write(&path, "capture_count = 3\n").unwrap();
        assert_eq!(Config::from_file(&path).unwrap().capture_count, 3);
        assert!(matches!(
            Config::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("WARDEN_CONFIDENCE_THRESHOLD", "60"),
            ("WARDEN_DEACTIVATE_AFTER_SECS", "3"),
            ("WARDEN_ENROLLMENT_ROOT", "/srv/faces"),
            ("WARDEN_LINK_BAUD", "fast"),
        ]));
        assert_eq!(config.confidence_threshold, 60.0);
        assert_eq!(config.deactivate_after(), Duration::from_secs(3));
        assert_eq!(config.enrollment_root, PathBuf::from("/srv/faces"));
        assert_eq!(config.link_baud, 9600);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            Config {
                confidence_threshold: 0.0,
                ..Config::default()
            },
            Config {
                confidence_threshold: f64::NAN,
                ..Config::default()
            },
            Config {
                capture_count: 0,
                ..Config::default()
            },
            Config {
                deactivate_after_secs: 0,
                ..Config::default()
            },
            Config {
                link_baud: 1234,
                ..Config::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{config:?}");
        }
    }
}
