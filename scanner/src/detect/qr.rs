use image::imageops::{self, FilterType};
use image::GrayImage;
use member_scan_common::frame::VideoFrame;
use tracing::{debug, trace};

use super::traits::{CodeDetector, Corner, Detection};

/// QR detector backed by `rqrr`.
///
/// Frames are converted to grayscale and downscaled so the long edge is at
/// most `max_dimension` before grid detection; corners are mapped back to
/// full-frame coordinates.
pub struct RqrrDetector {
    max_dimension: u32,
}

impl Default for RqrrDetector {
    fn default() -> Self {
        Self::new(640)
    }
}

impl RqrrDetector {
    pub fn new(max_dimension: u32) -> Self {
        Self {
            max_dimension: max_dimension.max(64),
        }
    }

    /// Grayscale working image plus the factor mapping it back to the frame.
    fn prepare(&self, frame: &VideoFrame) -> (GrayImage, f32) {
        let gray = imageops::grayscale(&frame.image);
        let (w, h) = gray.dimensions();
        let long_edge = w.max(h);
        if long_edge <= self.max_dimension {
            return (gray, 1.0);
        }
        let scale = long_edge as f32 / self.max_dimension as f32;
        let new_w = ((w as f32 / scale) as u32).max(1);
        let new_h = ((h as f32 / scale) as u32).max(1);
        trace!(w, h, new_w, new_h, scale, "downscaling frame for detection");
        (imageops::resize(&gray, new_w, new_h, FilterType::Triangle), scale)
    }
}

impl CodeDetector for RqrrDetector {
    fn detect(&self, frame: &VideoFrame) -> Option<Detection> {
        if frame.width() == 0 || frame.height() == 0 {
            return None;
        }
        let (gray, scale) = self.prepare(frame);
        let (w, h) = gray.dimensions();
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            w as usize,
            h as usize,
            |x, y| gray.get_pixel(x as u32, y as u32).0[0],
        );

        let grids = prepared.detect_grids();
        trace!(seq = frame.seq, grids = grids.len(), "QR grid detection complete");

        // First grid that decodes wins; further codes in the frame are ignored.
        for grid in grids {
            match grid.decode() {
                Ok((_meta, content)) => {
                    let corners = grid
                        .bounds
                        .map(|p| Corner::new(scale_coord(p.x, scale), scale_coord(p.y, scale)));
                    debug!(seq = frame.seq, content = %content, "decoded QR code");
                    return Some(Detection { content, corners });
                }
                Err(e) => {
                    trace!(seq = frame.seq, error = %e, "QR grid failed to decode");
                }
            }
        }
        None
    }

    fn name(&self) -> &str {
        "rqrr"
    }
}

fn scale_coord(v: i32, scale: f32) -> i32 {
    (v as f32 * scale).round() as i32
}
