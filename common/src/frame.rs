use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;

/// A camera frame in the fixed RGB24 layout, with capture metadata.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: RgbImage,
    /// Unix millis at which the frame arrived from the camera.
    pub captured_at_ms: i64,
    /// Per-process sequence number assigned by the camera source.
    pub seq: u64,
}

impl VideoFrame {
    pub fn new(image: RgbImage, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            image,
            captured_at_ms,
            seq,
        }
    }

    /// Decode a JPEG (as delivered by MJPEG or snapshot cameras) into a frame.
    pub fn from_jpeg(jpeg_data: &[u8], captured_at_ms: i64, seq: u64) -> Result<Self, FrameError> {
        if jpeg_data.is_empty() {
            return Err(FrameError::Empty);
        }
        let image = ImageReader::with_format(Cursor::new(jpeg_data), ImageFormat::Jpeg)
            .decode()
            .map_err(FrameError::Decode)?
            .to_rgb8();
        Ok(Self::new(image, captured_at_ms, seq))
    }

    /// Encode the frame as JPEG for the live video panel.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::with_capacity(self.image.as_raw().len() / 8);
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .encode_image(&self.image)
            .map_err(FrameError::Encode)?;
        Ok(buf)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn captured_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame payload is empty")]
    Empty,
    #[error("failed to decode frame: {0}")]
    Decode(image::ImageError),
    #[error("failed to encode frame: {0}")]
    Encode(image::ImageError),
}
