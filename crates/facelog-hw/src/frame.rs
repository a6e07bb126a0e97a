//! Grayscale frame type and pixel format conversion.

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Share of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_FRACTION: f32 = 0.95;

/// Extract the Y channel from packed YUYV 4:2:2 (`[Y0, U, Y1, V]` per two pixels).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert packed 24-bit RGB to grayscale with integer BT.601 luma weights.
pub fn rgb_to_grayscale(rgb: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 3;
    if rgb.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: rgb.len(),
        });
    }
    Ok(rgb[..expected]
        .chunks_exact(3)
        .map(|px| ((77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32) >> 8) as u8)
        .collect())
}

/// True if more than `threshold_pct` of pixels are below 32 (lens covered,
/// lights off). An empty buffer is dark.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv = vec![100, 128, 200, 128];
        assert_eq!(yuyv_to_grayscale(&yuyv, 2, 1).unwrap(), vec![100, 200]);
    }

    #[test]
    fn test_yuyv_ignores_trailing_bytes() {
        let yuyv: Vec<u8> = (0..20).collect();
        assert_eq!(yuyv_to_grayscale(&yuyv, 2, 2).unwrap(), vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_rgb_to_grayscale() {
        let rgb = vec![255, 255, 255, 0, 0, 0, 255, 0, 0];
        let gray = rgb_to_grayscale(&rgb, 3, 1).unwrap();
        assert_eq!(gray[0], 255);
        assert_eq!(gray[1], 0);
        assert_eq!(gray[2], 76);
        assert!(rgb_to_grayscale(&rgb, 2, 2).is_err());
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&[0u8; 1000], DARK_FRAME_FRACTION));
        assert!(!is_dark_frame(&[128u8; 1000], DARK_FRAME_FRACTION));
        assert!(is_dark_frame(&[], DARK_FRAME_FRACTION));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, DARK_FRAME_FRACTION));

        let mut borderline = vec![10u8; 940];
        borderline.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&borderline, DARK_FRAME_FRACTION));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame {
            data: vec![100, 200, 0, 100],
            width: 2,
            height: 2,
            timestamp: std::time::Instant::now(),
            sequence: 1,
            is_dark: false,
        };
        assert_eq!(frame.avg_brightness(), 100.0);
        let empty = Frame { data: Vec::new(), ..frame };
        assert_eq!(empty.avg_brightness(), 0.0);
    }
}
