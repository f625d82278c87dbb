//! RGB frames: YUYV/GREY conversion, dark-frame detection and JPEG encoding.

use std::io::Cursor;

/// A captured RGB8 camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// True when the frame is too dark to identify anyone in.
    pub fn is_dark(&self) -> bool {
        is_dark_frame(&rgb_to_luma(&self.data), 0.95)
    }

    /// Encode as baseline JPEG.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let img = image::RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or(FrameError::InvalidLength {
                expected: (self.width * self.height * 3) as usize,
                actual: self.data.len(),
            })?;
        let mut out = Cursor::new(Vec::new());
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        img.write_with_encoder(encoder)
            .map_err(|e| FrameError::Encode(e.to_string()))?;
        Ok(out.into_inner())
    }
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 coefficients.
///
/// Each 4-byte group `[Y0, U, Y1, V]` yields two pixels sharing U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push((y + 1.402 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y - 0.344_136 * u - 0.714_136 * v).round().clamp(0.0, 255.0) as u8);
            rgb.push((y + 1.772 * u).round().clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale to RGB8.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].iter().flat_map(|&p| [p, p, p]).collect())
}

/// Integer BT.601 luma of packed RGB8.
pub fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|p| ((p[0] as u32 * 299 + p[1] as u32 * 587 + p[2] as u32 * 114) / 1000) as u8)
        .collect()
}

/// True if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
///
/// Catches frames grabbed before auto-exposure settles or with a covered lens.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg encoding failed: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_neutral_chroma_is_gray() {
        // Neutral chroma (U = V = 128) leaves only luma.
        let rgb = yuyv_to_rgb(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_chroma() {
        // Strong V pushes red up and green down.
        let rgb = yuyv_to_rgb(&[128, 128, 128, 240], 2, 1).unwrap();
        assert!(rgb[0] > 250);
        assert!(rgb[1] < 60);
    }

    #[test]
    fn test_yuyv_short_buffer_rejected() {
        assert!(yuyv_to_rgb(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        assert_eq!(grey_to_rgb(&[7, 9], 2, 1).unwrap(), vec![7, 7, 7, 9, 9, 9]);
        assert!(grey_to_rgb(&[7], 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_threshold() {
        assert!(is_dark_frame(&[0u8; 500], 0.95));
        assert!(!is_dark_frame(&[128u8; 500], 0.95));
        // No pixels means nothing usable was captured.
        assert!(is_dark_frame(&[], 0.95));

        // Covered lens with a lit corner: 97% dark still counts as dark,
        // 90% does not.
        let mostly_dark: Vec<u8> = (0..100).map(|i| if i < 97 { 5 } else { 200 }).collect();
        assert!(is_dark_frame(&mostly_dark, 0.95));
        let lit: Vec<u8> = (0..100).map(|i| if i < 90 { 5 } else { 200 }).collect();
        assert!(!is_dark_frame(&lit, 0.95));
    }

    #[test]
    fn test_frame_encodes_decodable_jpeg() {
        let frame = Frame {
            data: vec![120u8; 16 * 8 * 3],
            width: 16,
            height: 8,
            sequence: 0,
        };
        assert!(!frame.is_dark());
        let jpeg = frame.encode_jpeg(90).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), image::ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_frame_with_short_buffer_fails_to_encode() {
        let frame = Frame {
            data: vec![0u8; 10],
            width: 16,
            height: 8,
            sequence: 0,
        };
        assert!(matches!(
            frame.encode_jpeg(90),
            Err(FrameError::InvalidLength { .. })
        ));
    }
}
