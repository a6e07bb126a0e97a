//! Face crops for the embedding and emotion models.
//!
//! The embedding model sees a 112x112 crop warped so the five detected
//! landmarks land on the ArcFace reference positions.

use crate::types::FaceBox;
use image::{GrayImage, Luma};

pub const ALIGNED_SIZE: u32 = 112;

/// Eyes, nose tip and mouth corners for a 112x112 ArcFace input.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Rotation, uniform scale and translation: `d = [a -b; b a] * s + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst`. `None` when the source
    /// points are coincident.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let (mut num_a, mut num_b, mut denom) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
            denom += sx * sx + sy * sy;
        }
        if denom < 1e-6 {
            return None;
        }

        let (a, b) = (num_a / denom, num_b / denom);
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Source position that maps onto `(x, y)`.
    fn invert(&self, (x, y): (f32, f32)) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (x, y) = (x - self.tx, y - self.ty);
        (
            (self.a * x + self.b * y) / det,
            (self.a * y - self.b * x) / det,
        )
    }
}

/// Warp `frame` so `landmarks` line up with the reference layout.
pub fn align_face(frame: &GrayImage, landmarks: &[(f32, f32); 5]) -> Option<GrayImage> {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS)?;
    Some(GrayImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |u, v| {
        let (x, y) = transform.invert((u as f32, v as f32));
        Luma([sample_bilinear(frame, x, y)])
    }))
}

/// The detection box clamped to the frame. `None` if nothing is left.
pub fn face_crop(frame: &GrayImage, face: &FaceBox) -> Option<GrayImage> {
    let (fw, fh) = (frame.width() as f32, frame.height() as f32);
    let x0 = face.x.max(0.0).floor();
    let y0 = face.y.max(0.0).floor();
    let x1 = (face.x + face.width).min(fw).ceil();
    let y1 = (face.y + face.height).min(fh).ceil();
    if !(x1 > x0 && y1 > y0) {
        return None;
    }
    let (x, y) = (x0 as u32, y0 as u32);
    let width = (x1 as u32).min(frame.width()).saturating_sub(x);
    let height = (y1 as u32).min(frame.height()).saturating_sub(y);
    if width == 0 || height == 0 {
        return None;
    }
    Some(image::imageops::crop_imm(frame, x, y, width, height).to_image())
}

/// Pixels outside the frame read as black.
fn sample_bilinear(frame: &GrayImage, x: f32, y: f32) -> u8 {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let pixel = |px: i64, py: i64| -> f32 {
        if px < 0 || py < 0 || px >= w || py >= h {
            0.0
        } else {
            frame.get_pixel(px as u32, py as u32).0[0] as f32
        }
    };

    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (ix, iy) = (x0 as i64, y0 as i64);

    let top = pixel(ix, iy) * (1.0 - fx) + pixel(ix + 1, iy) * fx;
    let bottom = pixel(ix, iy + 1) * (1.0 - fx) + pixel(ix + 1, iy + 1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-3 && (a.1 - b.1).abs() < 1e-3
    }

    #[test]
    fn test_identity_transform() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4);
        assert!(t.b.abs() < 1e-4);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_scaled_and_shifted_landmarks() {
        // Face twice the reference size, offset by (100, 40).
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (x * 2.0 + 100.0, y * 2.0 + 40.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS).unwrap();
        assert!((t.a - 0.5).abs() < 1e-4);
        assert!(t.b.abs() < 1e-4);
        for (s, d) in src.iter().zip(REFERENCE_LANDMARKS.iter()) {
            assert!(close(t.apply(*s), *d));
            assert!(close(t.invert(*d), *s));
        }
    }

    #[test]
    fn test_rotation_round_trip() {
        let (sin, cos) = 0.3f32.sin_cos();
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (cos * x - sin * y + 20.0, sin * x + cos * y + 5.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS).unwrap();
        for (s, d) in src.iter().zip(REFERENCE_LANDMARKS.iter()) {
            assert!(close(t.apply(*s), *d));
        }
    }

    #[test]
    fn test_coincident_landmarks_rejected() {
        assert!(Similarity::estimate(&[(5.0, 5.0); 5], &REFERENCE_LANDMARKS).is_none());
        let frame = GrayImage::new(200, 200);
        assert!(align_face(&frame, &[(5.0, 5.0); 5]).is_none());
    }

    #[test]
    fn test_align_face_moves_nose_patch() {
        // Bright patch at the nose of a face drawn at 2x scale, offset (100, 40).
        let src = REFERENCE_LANDMARKS.map(|(x, y)| (x * 2.0 + 100.0, y * 2.0 + 40.0));
        let mut frame = GrayImage::new(400, 400);
        let (nx, ny) = (src[2].0 as u32, src[2].1 as u32);
        for y in ny - 6..=ny + 6 {
            for x in nx - 6..=nx + 6 {
                frame.put_pixel(x, y, Luma([250]));
            }
        }

        let aligned = align_face(&frame, &src).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        let (rx, ry) = REFERENCE_LANDMARKS[2];
        assert!(aligned.get_pixel(rx as u32, ry as u32).0[0] > 200);
        assert_eq!(aligned.get_pixel(5, 5).0[0], 0);
    }

    #[test]
    fn test_sampling_outside_frame_is_black() {
        let frame = GrayImage::from_pixel(4, 4, Luma([100]));
        assert_eq!(sample_bilinear(&frame, 1.0, 1.0), 100);
        assert_eq!(sample_bilinear(&frame, -5.0, 1.0), 0);
        assert_eq!(sample_bilinear(&frame, 1.5, 1.5), 100);
    }

    #[test]
    fn test_face_crop_clamps_to_frame() {
        let frame = GrayImage::from_pixel(100, 80, Luma([9]));
        let face = FaceBox {
            x: -10.0,
            y: 50.0,
            width: 40.0,
            height: 60.0,
            confidence: 0.9,
            landmarks: None,
        };
        assert_eq!(face_crop(&frame, &face).unwrap().dimensions(), (30, 30));

        let outside = FaceBox { x: 120.0, ..face };
        assert!(face_crop(&frame, &outside).is_none());
    }
}
