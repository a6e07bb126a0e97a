//! SCRFD face detection.
//!
//! The frame is letterboxed into a 640x640 input; each of the three strides
//! emits per-anchor scores, box distances and five landmarks, which are
//! mapped back to frame coordinates and merged with NMS.

use crate::analyzer::{load_session, AnalyzerError};
use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

const INPUT_SIZE: u32 = 640;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Scale and padding applied when fitting the frame into the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
    width: u32,
    height: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let fitted_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let fitted_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        Self {
            scale,
            pad_x: (INPUT_SIZE - fitted_w) / 2,
            pad_y: (INPUT_SIZE - fitted_h) / 2,
            width: fitted_w,
            height: fitted_h,
        }
    }

    /// Map a point in model input space back onto the frame.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &str) -> Result<Self, AnalyzerError> {
        let session = load_session(model_path)?;
        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(AnalyzerError::InferenceFailed(format!(
                "face detector needs 9 outputs (score/bbox/kps per stride), {model_path} has {}",
                names.len()
            )));
        }
        let outputs = output_layout(&names);
        tracing::debug!(?outputs, "detector output layout");
        Ok(Self { session, outputs })
    }

    /// Faces in `frame`, most confident first.
    pub fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceBox>, AnalyzerError> {
        let (input, letterbox) = preprocess(frame);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (layout, &stride) in self.outputs.iter().zip(STRIDES.iter()) {
            let (_, scores) = outputs[layout.score]
                .try_extract_tensor::<f32>()
                .map_err(|e| AnalyzerError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[layout.bbox]
                .try_extract_tensor::<f32>()
                .map_err(|e| AnalyzerError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[layout.kps]
                .try_extract_tensor::<f32>()
                .map_err(|e| AnalyzerError::InferenceFailed(format!("landmarks stride {stride}: {e}")))?;
            candidates.extend(decode_stride(
                scores,
                boxes,
                kps,
                stride,
                &letterbox,
                SCORE_THRESHOLD,
            ));
        }

        Ok(nms(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Letterbox into a normalised 1x3x640x640 tensor. Padding is zero, which
/// is the normalised value of a mid-grey pixel.
fn preprocess(frame: &GrayImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(frame.width(), frame.height());
    let resized = imageops::resize(frame, letterbox.width, letterbox.height, FilterType::Triangle);
    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = (pixel.0[0] as f32 - INPUT_MEAN) / INPUT_STD;
        let (tx, ty) = ((x + letterbox.pad_x) as usize, (y + letterbox.pad_y) as usize);
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = value;
        }
    }

    (tensor, letterbox)
}

/// Find score/bbox/kps tensors by name (`score_8`, `bbox_16`, ...), falling
/// back to the usual export order: three score, three bbox, three kps.
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut layout = [StrideOutputs {
        score: 0,
        bbox: 0,
        kps: 0,
    }; 3];
    for (slot, &stride) in STRIDES.iter().enumerate() {
        match (
            position("score", stride),
            position("bbox", stride),
            position("kps", stride),
        ) {
            (Some(score), Some(bbox), Some(kps)) => layout[slot] = StrideOutputs { score, bbox, kps },
            _ => {
                return std::array::from_fn(|i| StrideOutputs {
                    score: i,
                    bbox: i + 3,
                    kps: i + 6,
                })
            }
        }
    }
    layout
}

fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceBox> {
    let grid = INPUT_SIZE as usize / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut faces = Vec::new();
    for (idx, &score) in scores.iter().enumerate().take(anchors) {
        if score <= threshold {
            continue;
        }
        let Some(dist) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * step;
        let cy = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.to_frame(cx - dist[0] * step, cy - dist[1] * step);
        let (x2, y2) = letterbox.to_frame(cx + dist[2] * step, cy + dist[3] * step);

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|points| {
            std::array::from_fn(|i| {
                letterbox.to_frame(cx + points[i * 2] * step, cy + points[i * 2 + 1] * step)
            })
        });

        faces.push(FaceBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    faces
}

/// Greedy non-maximum suppression; the result is sorted by confidence.
fn nms(mut faces: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<FaceBox> = Vec::new();
    for face in faces {
        if kept.iter().all(|k| k.iou(&face) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}
