use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Capacity of the frame channel between the camera and the capture loop.
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_confirm_delay_ms")]
    pub confirm_delay_ms: u64,
    #[serde(default = "default_error_display_ms")]
    pub error_display_ms: u64,
    /// Frames whose long edge exceeds this are downscaled before detection.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_preview_quality")]
    pub preview_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            confirm_delay_ms: default_confirm_delay_ms(),
            error_display_ms: default_error_display_ms(),
            max_dimension: default_max_dimension(),
            preview_quality: default_preview_quality(),
        }
    }
}

impl ScannerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    pub fn error_display(&self) -> Duration {
        Duration::from_millis(self.error_display_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), camera = config.camera.url, "config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.camera.mode.as_str() {
            "mjpeg" | "polling" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown camera mode '{other}', expected 'mjpeg' or 'polling'"
                )))
            }
        }
        if self.camera.fps <= 0.0 {
            return Err(ConfigError::Invalid("camera.fps must be positive".into()));
        }
        if self.camera.frame_buffer == 0 {
            return Err(ConfigError::Invalid(
                "camera.frame_buffer must be at least 1".into(),
            ));
        }
        if self.scanner.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scanner.poll_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_mode() -> String {
    "mjpeg".into()
}
fn default_quality() -> u32 {
    80
}
fn default_fps() -> f64 {
    10.0
}
fn default_frame_buffer() -> usize {
    2
}
fn default_poll_interval_ms() -> u64 {
    200
}
fn default_confirm_delay_ms() -> u64 {
    1500
}
fn default_error_display_ms() -> u64 {
    3000
}
fn default_max_dimension() -> u32 {
    640
}
fn default_preview_quality() -> u8 {
    75
}
fn default_db_path() -> String {
    "members.db".into()
}
fn default_api_port() -> u16 {
    8090
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse(
            r#"
            [camera]
            url = "http://127.0.0.1:8080/stream"
            "#,
        )
        .unwrap();
        assert_eq!(config.camera.mode, "mjpeg");
        assert_eq!(config.camera.frame_buffer, 2);
        assert_eq!(config.scanner.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.scanner.confirm_delay(), Duration::from_millis(1500));
        assert_eq!(config.scanner.error_display(), Duration::from_secs(3));
        assert_eq!(config.database.path, "members.db");
        assert_eq!(config.api.port, 8090);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::parse(
            r#"
            [camera]
            url = "http://cam.local/stream"
            mode = "polling"
            fps = 4.0

            [scanner]
            poll_interval_ms = 50
            error_display_ms = 500

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.camera.mode, "polling");
        assert_eq!(config.scanner.poll_interval_ms, 50);
        assert_eq!(config.scanner.error_display_ms, 500);
        assert_eq!(config.scanner.confirm_delay_ms, 1500);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn missing_camera_section_is_a_parse_error() {
        let err = Config::parse("[logging]\nlevel = \"info\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = Config::parse(
            r#"
            [camera]
            url = "http://cam.local/stream"
            mode = "rtsp"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("rtsp")));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = Config::parse(
            r#"
            [camera]
            url = "http://cam.local/stream"

            [scanner]
            poll_interval_ms = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
