use member_scan_common::frame::VideoFrame;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::detect::{FrameDecoder, Verdict};
use crate::slot::ScanSlot;

/// Last frame shown in the video panel, with its overlay already drawn.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame: VideoFrame,
    pub verdict: Verdict,
}

/// Receiving end of the video panel feed.
pub type PreviewReceiver = watch::Receiver<Option<Arc<AnnotatedFrame>>>;
pub type PreviewSender = watch::Sender<Option<Arc<AnnotatedFrame>>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub member_codes: u64,
    pub invalid_codes: u64,
    pub failed_frames: u64,
}

/// Pull frames until the camera closes the channel or `cancel` fires.
///
/// Each frame is decoded on the blocking pool. Member ids go into `slot`,
/// the annotated frame goes to `preview`. A decode that panics costs one
/// frame, not the loop.
pub async fn run_capture_loop(
    decoder: Arc<FrameDecoder>,
    mut frames: mpsc::Receiver<VideoFrame>,
    slot: ScanSlot,
    preview: PreviewSender,
    cancel: CancellationToken,
) -> CaptureStats {
    let mut stats = CaptureStats::default();
    info!(detector = decoder.detector_name(), "capture loop started");

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("capture loop cancelled");
                break;
            }
            next = frames.recv() => match next {
                Some(f) => f,
                None => {
                    debug!("camera closed the frame channel");
                    break;
                }
            },
        };

        let seq = frame.seq;
        let worker = Arc::clone(&decoder);
        let decoded = match tokio::task::spawn_blocking(move || worker.decode(frame)).await {
            Ok(d) => d,
            Err(e) => {
                stats.failed_frames += 1;
                warn!(seq, error = %e, "frame decode failed, skipping frame");
                continue;
            }
        };

        stats.frames += 1;
        match decoded.verdict {
            Verdict::Member => stats.member_codes += 1,
            Verdict::Invalid => stats.invalid_codes += 1,
            Verdict::NoCode => {}
        }
        if let Some(id) = decoded.payload {
            debug!(seq, member_id = %id, "member id handed to poller");
            slot.write(id);
        }

        preview.send_replace(Some(Arc::new(AnnotatedFrame {
            frame: decoded.frame,
            verdict: decoded.verdict,
        })));

        if stats.frames % 100 == 0 {
            debug!(frames = stats.frames, "frames processed");
        }
    }

    info!(
        frames = stats.frames,
        member_codes = stats.member_codes,
        invalid_codes = stats.invalid_codes,
        failed_frames = stats.failed_frames,
        "capture loop stopped"
    );
    stats
}
