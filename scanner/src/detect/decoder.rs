use member_scan_common::frame::VideoFrame;
use member_scan_common::member_id::MemberId;
use serde::Serialize;
use tracing::debug;

use super::overlay::{self, INVALID_COLOR, INVALID_LABEL, VALID_COLOR, VALID_LABEL};
use super::traits::CodeDetector;

/// How a frame was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    NoCode,
    Member,
    Invalid,
}

#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// The input frame, annotated when a code was found.
    pub frame: VideoFrame,
    /// Set only for codes shaped like a member id.
    pub payload: Option<MemberId>,
    pub verdict: Verdict,
}

/// Turns raw frames into annotated frames plus an optional member id.
///
/// Holds no reference to the scan slot; callers decide what to do with the
/// payload.
pub struct FrameDecoder {
    detector: Box<dyn CodeDetector>,
}

impl FrameDecoder {
    pub fn new(detector: Box<dyn CodeDetector>) -> Self {
        Self { detector }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn decode(&self, mut frame: VideoFrame) -> DecodedFrame {
        let Some(detection) = self.detector.detect(&frame) else {
            return DecodedFrame {
                frame,
                payload: None,
                verdict: Verdict::NoCode,
            };
        };

        match MemberId::parse(&detection.content) {
            Ok(id) => {
                overlay::annotate(&mut frame.image, &detection.corners, VALID_LABEL, VALID_COLOR);
                debug!(seq = frame.seq, member_id = %id, "member code in frame");
                DecodedFrame {
                    frame,
                    payload: Some(id),
                    verdict: Verdict::Member,
                }
            }
            Err(e) => {
                overlay::annotate(&mut frame.image, &detection.corners, INVALID_LABEL, INVALID_COLOR);
                debug!(seq = frame.seq, content = %detection.content, reason = %e, "rejected code in frame");
                DecodedFrame {
                    frame,
                    payload: None,
                    verdict: Verdict::Invalid,
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::detect::traits::{Corner, Detection};
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    /// Detector that reports a fixed sequence of contents, one per call.
    /// `None` entries and an exhausted script mean "no code".
    pub(crate) struct ScriptedDetector {
        script: Mutex<std::collections::VecDeque<Option<String>>>,
    }

    impl ScriptedDetector {
        pub(crate) fn new<I, S>(contents: I) -> Self
        where
            I: IntoIterator<Item = Option<S>>,
            S: Into<String>,
        {
            Self {
                script: Mutex::new(contents.into_iter().map(|c| c.map(Into::into)).collect()),
            }
        }
    }

    impl CodeDetector for ScriptedDetector {
        fn detect(&self, _frame: &VideoFrame) -> Option<Detection> {
            let content = self.script.lock().unwrap().pop_front().flatten()?;
            Some(Detection {
                content,
                corners: [
                    Corner::new(40, 60),
                    Corner::new(120, 60),
                    Corner::new(120, 140),
                    Corner::new(40, 140),
                ],
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    pub(crate) fn grey_frame(seq: u64) -> VideoFrame {
        VideoFrame::new(RgbImage::from_pixel(200, 180, Rgb([90, 90, 90])), 0, seq)
    }

    fn decoder(contents: &[&str]) -> FrameDecoder {
        FrameDecoder::new(Box::new(ScriptedDetector::new(
            contents.iter().map(|c| Some(*c)),
        )))
    }

    #[test]
    fn frame_without_code_is_returned_untouched() {
        let decoder = FrameDecoder::new(Box::new(ScriptedDetector::new(Vec::<Option<&str>>::new())));
        let input = grey_frame(1);
        let out = decoder.decode(input.clone());
        assert_eq!(out.verdict, Verdict::NoCode);
        assert!(out.payload.is_none());
        assert_eq!(out.frame.image, input.image);
        assert_eq!(out.frame.seq, 1);
    }

    #[test]
    fn member_code_yields_payload_and_green_outline() {
        let out = decoder(&["MEM-12AB34CD"]).decode(grey_frame(2));
        assert_eq!(out.verdict, Verdict::Member);
        assert_eq!(out.payload.unwrap().as_str(), "MEM-12AB34CD");
        assert_eq!(*out.frame.image.get_pixel(80, 60), VALID_COLOR);
    }

    #[test]
    fn non_member_code_is_rejected_with_red_outline() {
        let out = decoder(&["INVALID-CODE"]).decode(grey_frame(3));
        assert_eq!(out.verdict, Verdict::Invalid);
        assert!(out.payload.is_none());
        assert_eq!(*out.frame.image.get_pixel(80, 60), INVALID_COLOR);
    }

    #[test]
    fn prefix_alone_is_not_enough() {
        for content in ["MEM-abcdef12", "MEM-12AB34C", "mem-12AB34CD", "MEM-12AB34CDE"] {
            let out = decoder(&[content]).decode(grey_frame(4));
            assert_eq!(out.verdict, Verdict::Invalid, "{content}");
            assert!(out.payload.is_none());
        }
    }
}
