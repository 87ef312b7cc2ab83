use thiserror::Error;

use crate::capture::Frame;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
}

/// Compresses a decoded frame for the wire
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError>;
}

/// Baseline JPEG via the `image` crate
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(70)
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
        let expected = frame.step() as usize * frame.height as usize;
        if frame.data.len() != expected {
            return Err(EncodeError::BufferSize {
                width: frame.width,
                height: frame.height,
                expected,
                actual: frame.data.len(),
            });
        }

        let mut jpeg = Vec::with_capacity(expected / 8);
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        encoder.encode(
            &frame.data,
            frame.width,
            frame.height,
            image::ExtendedColorType::Rgb8,
        )?;
        Ok(jpeg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> Frame {
        Frame {
            data: (0..width * height * 3).map(|i| (i % 251) as u8).collect(),
            width,
            height,
            pts: 0,
            sequence: 0,
        }
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let jpeg = JpegEncoder::default().encode(&frame(32, 24)).unwrap();
        // SOI and EOI markers
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let mut f = frame(8, 8);
        f.data.truncate(10);
        let err = JpegEncoder::default().encode(&f).unwrap_err();
        assert!(matches!(err, EncodeError::BufferSize { expected: 192, actual: 10, .. }));
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(JpegEncoder::new(0).quality(), 1);
        assert_eq!(JpegEncoder::new(150).quality(), 100);
    }
}
