use member_scan_common::frame::VideoFrame;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle of a camera session as seen by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraStatus {
    /// Connection is being established; no frames yet.
    Starting,
    /// Frames are flowing.
    Active,
    /// The stream ended or capture was stopped.
    Stopped,
    /// Permission denied, connection refused, stream dropped mid-session.
    Failed(String),
}

impl CameraStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, CameraStatus::Active)
    }

    /// True once the session can no longer produce frames.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CameraStatus::Stopped | CameraStatus::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            CameraStatus::Starting => "starting",
            CameraStatus::Active => "active",
            CameraStatus::Stopped => "stopped",
            CameraStatus::Failed(_) => "failed",
        }
    }
}

/// Consuming half of a camera session: the ordered frame stream plus status.
pub struct CameraSession {
    pub frames: mpsc::Receiver<VideoFrame>,
    pub status: watch::Receiver<CameraStatus>,
}

/// Producing half of a camera session, held by the camera implementation.
#[derive(Clone)]
pub struct CameraFeed {
    frames: mpsc::Sender<VideoFrame>,
    status: watch::Sender<CameraStatus>,
}

/// Outcome of a non-blocking frame hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDelivery {
    Delivered,
    /// The consumer is behind; the frame was discarded.
    Dropped,
    /// The consumer is gone; the camera should stop.
    Closed,
}

/// Build a connected feed/session pair with room for `capacity` frames.
pub fn session_channel(capacity: usize) -> (CameraFeed, CameraSession) {
    let (frame_tx, frame_rx) = mpsc::channel(capacity.max(1));
    let (status_tx, status_rx) = watch::channel(CameraStatus::Starting);
    (
        CameraFeed {
            frames: frame_tx,
            status: status_tx,
        },
        CameraSession {
            frames: frame_rx,
            status: status_rx,
        },
    )
}

impl CameraFeed {
    /// Hand a frame over without waiting. Live video prefers dropping a frame
    /// to building a backlog.
    pub fn offer_frame(&self, frame: VideoFrame) -> FrameDelivery {
        match self.frames.try_send(frame) {
            Ok(()) => FrameDelivery::Delivered,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                debug!(seq = frame.seq, "capture loop busy, dropping frame");
                FrameDelivery::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => FrameDelivery::Closed,
        }
    }

    /// Hand a frame over, waiting for room. Returns `false` if the consumer is gone.
    pub async fn send_frame(&self, frame: VideoFrame) -> bool {
        self.frames.send(frame).await.is_ok()
    }

    pub fn set_status(&self, status: CameraStatus) {
        debug!(status = status.label(), "camera status changed");
        self.status.send_replace(status);
    }

    /// Flip to `Active` unless already there, without waking watchers needlessly.
    pub fn mark_active(&self) {
        self.status.send_if_modified(|status| {
            if status.is_active() {
                return false;
            }
            debug!("camera status changed to active");
            *status = CameraStatus::Active;
            true
        });
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}

/// A source of live video for one scan session at a time.
pub trait Camera: Send + Sync {
    /// Begin producing frames. The session ends when `cancel` fires, the
    /// source runs dry, or the consumer drops the returned receiver.
    fn start(&self, cancel: CancellationToken) -> CameraSession;

    fn name(&self) -> &str {
        "unnamed"
    }
}
