use member_scan_common::frame::VideoFrame;
use serde::Serialize;

/// A pixel position in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Corner {
    pub x: i32,
    pub y: i32,
}

impl Corner {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// The primary code found in a frame: its decoded text and outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub content: String,
    /// Outline in drawing order, starting at the code's top-left.
    pub corners: [Corner; 4],
}

/// Optical code detector run against every frame of a scan session.
///
/// Implementations return at most one detection per frame. A frame without a
/// decodable code is the normal case and yields `None`, never an error.
pub trait CodeDetector: Send + Sync {
    fn detect(&self, frame: &VideoFrame) -> Option<Detection>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
