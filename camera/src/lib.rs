//! Live video sources for the member scanner.
//!
//! A camera produces a [`CameraSession`]: an ordered stream of RGB frames
//! plus a status channel reporting whether the session is still active.

pub mod mjpeg;
mod session;

use member_scan_common::config::CameraConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use session::{
    session_channel, Camera, CameraFeed, CameraSession, CameraStatus, FrameDelivery,
};

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("camera fps must be a positive number, got {0}")]
    InvalidFps(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpMode {
    Mjpeg,
    Polling,
}

/// Network camera speaking either MJPEG-over-HTTP or single-JPEG snapshots.
pub struct HttpCamera {
    client: reqwest::Client,
    mode: HttpMode,
    url: String,
    frame_interval: Duration,
    frame_buffer: usize,
}

impl HttpCamera {
    pub fn from_config(config: &CameraConfig) -> Result<Self, CameraError> {
        let frame_interval = (config.fps > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / config.fps).ok())
            .flatten()
            .ok_or(CameraError::InvalidFps(config.fps))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(CameraError::Client)?;

        let (mode, url) = match config.mode.as_str() {
            "polling" => (
                HttpMode::Polling,
                format!(
                    "{}?quality={}",
                    config.url.replace("/stream", "/frame"),
                    config.quality
                ),
            ),
            _ => (
                HttpMode::Mjpeg,
                format!(
                    "{}?quality={}&fps={}",
                    config.url, config.quality, config.fps
                ),
            ),
        };

        Ok(Self {
            client,
            mode,
            url,
            frame_interval,
            frame_buffer: config.frame_buffer,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Camera for HttpCamera {
    fn start(&self, cancel: CancellationToken) -> CameraSession {
        let (feed, session) = session_channel(self.frame_buffer);
        let client = self.client.clone();
        let url = self.url.clone();
        let mode = self.mode;
        let interval = self.frame_interval;

        tokio::spawn(async move {
            let result = match mode {
                HttpMode::Mjpeg => mjpeg::run_mjpeg_camera(&client, &url, &feed, &cancel).await,
                HttpMode::Polling => {
                    mjpeg::run_polling_camera(&client, &url, interval, &feed, &cancel).await
                }
            };
            match result {
                Ok(()) => {
                    info!(url, "camera session stopped");
                    feed.set_status(CameraStatus::Stopped);
                }
                Err(e) => {
                    warn!(error = %e, url, "camera session failed");
                    feed.set_status(CameraStatus::Failed(e.to_string()));
                }
            }
        });

        session
    }

    fn name(&self) -> &str {
        match self.mode {
            HttpMode::Mjpeg => "mjpeg",
            HttpMode::Polling => "polling",
        }
    }
}
