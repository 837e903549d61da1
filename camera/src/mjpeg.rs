use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::StreamExt;
use member_scan_common::frame::VideoFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{CameraFeed, FrameDelivery};
use crate::CameraError;

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
/// Part headers longer than this are treated as a corrupt part.
const MAX_HEADER_LEN: usize = 8 * 1024;

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` MJPEG streams.
///
/// Chunks may cut anywhere, including through a boundary marker; a part is
/// only emitted once the boundary that terminates it has been seen.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed one network chunk, returning every JPEG part it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut parts = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else if self.buffer.len() > MAX_HEADER_LEN {
                        warn!(
                            buffered = self.buffer.len(),
                            "MJPEG part headers never ended, resyncing"
                        );
                        self.state = ParseState::SeekingBoundary;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        // Resume the scan near the tail next time
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if jpeg_end >= 2 && &self.buffer[jpeg_end - 2..jpeg_end] == b"\r\n"
                    {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };

                    let mut part = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    part.truncate(end);
                    if !part.is_empty() {
                        parts.push(part.freeze());
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        parts
    }
}

/// Consume an MJPEG stream until it ends, fails, or `cancel` fires.
pub(crate) async fn run_mjpeg_camera(
    client: &reqwest::Client,
    stream_url: &str,
    feed: &CameraFeed,
    cancel: &CancellationToken,
) -> Result<(), CameraError> {
    info!(url = stream_url, "connecting to MJPEG stream");
    let response = client
        .get(stream_url)
        .send()
        .await
        .map_err(CameraError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(CameraError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), "connected to MJPEG stream");
    feed.mark_active();

    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = byte_stream.next() => chunk,
        };
        let Some(chunk) = chunk else {
            info!("MJPEG stream ended");
            return Ok(());
        };
        let chunk = chunk.map_err(CameraError::HttpStream)?;

        for jpeg in parser.push(&chunk) {
            if !deliver_jpeg(&jpeg, feed) {
                return Ok(());
            }
        }
    }
}

/// Snapshot fallback: fetch single JPEG frames at a fixed interval.
pub(crate) async fn run_polling_camera(
    client: &reqwest::Client,
    frame_url: &str,
    interval: Duration,
    feed: &CameraFeed,
    cancel: &CancellationToken,
) -> Result<(), CameraError> {
    info!(url = frame_url, interval_ms = interval.as_millis() as u64, "polling camera snapshots");
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let resp = client
            .get(frame_url)
            .send()
            .await
            .map_err(CameraError::HttpConnect)?;
        if !resp.status().is_success() {
            return Err(CameraError::HttpStatus(resp.status().as_u16()));
        }
        let jpeg = resp.bytes().await.map_err(CameraError::HttpStream)?;
        feed.mark_active();
        if !deliver_jpeg(&jpeg, feed) {
            return Ok(());
        }
    }
}

/// Decode and hand over one JPEG. Returns `false` once the consumer is gone.
fn deliver_jpeg(jpeg: &[u8], feed: &CameraFeed) -> bool {
    let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
    let now_ms = Utc::now().timestamp_millis();
    let frame = match VideoFrame::from_jpeg(jpeg, now_ms, seq) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, seq, bytes = jpeg.len(), "undecodable camera frame, skipping");
            return true;
        }
    };
    debug!(seq, width = frame.width(), height = frame.height(), "camera frame");
    feed.offer_frame(frame) != FrameDelivery::Closed
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(BOUNDARY);
        out.extend_from_slice(b"Content-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n");
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn splits_parts_on_boundaries() {
        let mut stream = Vec::new();
        stream.extend(part(b"AAAA"));
        stream.extend(part(b"BBBB"));
        stream.extend_from_slice(BOUNDARY);

        let mut parser = MjpegParser::new();
        let parts = parser.push(&stream);
        assert_eq!(parts, vec![Bytes::from_static(b"AAAA"), Bytes::from_static(b"BBBB")]);
    }

    #[test]
    fn runaway_headers_resync_on_next_boundary() {
        let mut parser = MjpegParser::new();
        assert!(parser.push(BOUNDARY).is_empty());
        for _ in 0..32 {
            assert!(parser.push(&[b'x'; 1024]).is_empty());
            assert!(parser.buffer.len() <= MAX_HEADER_LEN + 1024);
        }
        assert_eq!(parser.state, ParseState::SeekingBoundary);

        let mut stream = part(b"GOOD");
        stream.extend_from_slice(BOUNDARY);
        assert_eq!(parser.push(&stream), vec![Bytes::from_static(b"GOOD")]);
    }

    #[test]
    fn handles_chunks_cut_through_boundary() {
        let mut stream = Vec::new();
        stream.extend(part(b"JPEG-ONE"));
        stream.extend(part(b"JPEG-TWO"));
        stream.extend_from_slice(BOUNDARY);

        let mut parser = MjpegParser::new();
        let mut parts = Vec::new();
        for chunk in stream.chunks(3) {
            parts.extend(parser.push(chunk));
        }
        assert_eq!(
            parts,
            vec![Bytes::from_static(b"JPEG-ONE"), Bytes::from_static(b"JPEG-TWO")]
        );
    }

    #[test]
    fn incomplete_part_is_held_back() {
        let mut parser = MjpegParser::new();
        assert!(parser.push(&part(b"PARTIAL")).is_empty());
        assert_eq!(parser.push(BOUNDARY), vec![Bytes::from_static(b"PARTIAL")]);
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let mut stream = b"HTTP preamble noise".to_vec();
        stream.extend(part(b"DATA"));
        stream.extend_from_slice(BOUNDARY);
        let mut parser = MjpegParser::new();
        assert_eq!(parser.push(&stream), vec![Bytes::from_static(b"DATA")]);
    }

    #[test]
    fn undecodable_jpeg_is_skipped_not_fatal() {
        let (feed, mut session) = crate::session_channel(1);
        assert!(deliver_jpeg(b"not a jpeg", &feed));
        assert!(session.frames.try_recv().is_err());
    }
}
