//! Frame analysis via externally supplied ONNX models.
//!
//! An SCRFD detector finds faces first. The most confident face with
//! landmarks is aligned to 112x112 for the embedding model; its box crop
//! goes to an optional FER+ style emotion classifier (64x64, eight logits).

use crate::alignment::{align_face, face_crop};
use crate::detector::FaceDetector;
use crate::types::{Embedding, FaceBox, Observation};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBED_INPUT_SIZE: usize = 112;
const EMBED_MEAN: f32 = 127.5;
const EMBED_STD: f32 = 127.5;
const EMOTION_INPUT_SIZE: usize = 64;

/// Emotion labels in the classifier's output order.
pub const EMOTION_LABELS: [&str; 8] = [
    "neutral", "happy", "surprise", "sad", "angry", "disgust", "fear", "contempt",
];

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("frame buffer has {actual} bytes, {width}x{height} needs {expected}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns one grayscale frame into an [`Observation`].
pub trait Analyzer {
    fn try_analyze(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Observation, AnalyzerError>;

    /// Like [`try_analyze`](Self::try_analyze), but a failure becomes an
    /// empty observation so the frame loop keeps running.
    fn analyze(&mut self, gray: &[u8], width: u32, height: u32) -> Observation {
        match self.try_analyze(gray, width, height) {
            Ok(observation) => observation,
            Err(err) => {
                tracing::warn!(error = %err, "analysis failed; no observation for this frame");
                Observation::none()
            }
        }
    }
}

/// Detection, embedding and emotion analyzer backed by ONNX Runtime.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    embedder: Session,
    classifier: Option<Session>,
    model_version: String,
}

impl OnnxAnalyzer {
    /// Load the models from disk. Without an emotion model every
    /// observation carries no label.
    pub fn load(
        detector_model: &str,
        embedding_model: &str,
        emotion_model: Option<&str>,
    ) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(detector_model)?;
        let embedder = load_session(embedding_model)?;
        let classifier = emotion_model.map(load_session).transpose()?;

        let model_version = Path::new(embedding_model)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| embedding_model.to_string());

        Ok(Self {
            detector,
            embedder,
            classifier,
            model_version,
        })
    }

    fn embed(&mut self, face: &GrayImage) -> Result<Embedding, AnalyzerError> {
        let input = preprocess_embedding(face);
        let outputs = self
            .embedder
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AnalyzerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.is_empty() {
            return Err(AnalyzerError::InferenceFailed("empty embedding".into()));
        }

        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Embedding {
            values,
            model_version: Some(self.model_version.clone()),
        })
    }
}

fn classify(classifier: &mut Session, face: &GrayImage) -> Result<&'static str, AnalyzerError> {
    let input = preprocess_emotion(face);
    let outputs = classifier.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

    let (_, logits) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| AnalyzerError::InferenceFailed(format!("emotion logits: {e}")))?;

    if logits.len() != EMOTION_LABELS.len() {
        return Err(AnalyzerError::InferenceFailed(format!(
            "expected {} emotion logits, got {}",
            EMOTION_LABELS.len(),
            logits.len()
        )));
    }

    argmax(logits)
        .map(|i| EMOTION_LABELS[i])
        .ok_or_else(|| AnalyzerError::InferenceFailed("emotion logits are NaN".into()))
}

impl Analyzer for OnnxAnalyzer {
    fn try_analyze(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Observation, AnalyzerError> {
        let frame = to_image(gray, width, height)?;
        let faces = self.detector.detect(&frame)?;
        let Some((face, landmarks)) = primary_face(&faces) else {
            tracing::trace!(candidates = faces.len(), "no usable face in frame");
            return Ok(Observation::none());
        };

        let Some(aligned) = align_face(&frame, landmarks) else {
            tracing::debug!("degenerate landmarks; frame skipped");
            return Ok(Observation::none());
        };
        let embedding = self.embed(&aligned)?;

        // A missing label still leaves a usable embedding.
        let emotion = match (self.classifier.as_mut(), face_crop(&frame, face)) {
            (Some(classifier), Some(crop)) => match classify(classifier, &crop) {
                Ok(label) => Some(label.to_string()),
                Err(err) => {
                    tracing::debug!(error = %err, "emotion classification failed");
                    None
                }
            },
            _ => None,
        };

        Ok(Observation {
            embedding: Some(embedding),
            emotion,
        })
    }
}

/// The most confident detection that has landmarks and a non-empty box.
/// `faces` is expected in descending confidence order.
fn primary_face(faces: &[FaceBox]) -> Option<(&FaceBox, &[(f32, f32); 5])> {
    faces
        .iter()
        .filter(|f| f.area() > 0.0)
        .find_map(|f| f.landmarks.as_ref().map(|l| (f, l)))
}

pub(crate) fn load_session(model_path: &str) -> Result<Session, AnalyzerError> {
    if !Path::new(model_path).exists() {
        return Err(AnalyzerError::ModelNotFound(model_path.to_string()));
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = model_path,
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded ONNX model"
    );
    Ok(session)
}

fn to_image(gray: &[u8], width: u32, height: u32) -> Result<GrayImage, AnalyzerError> {
    let expected = width as usize * height as usize;
    if gray.len() < expected || expected == 0 {
        return Err(AnalyzerError::InvalidFrame {
            width,
            height,
            expected,
            actual: gray.len(),
        });
    }
    GrayImage::from_raw(width, height, gray[..expected].to_vec()).ok_or(AnalyzerError::InvalidFrame {
        width,
        height,
        expected,
        actual: gray.len(),
    })
}

/// Resize to 112x112 (a no-op for aligned crops) and normalise into a
/// 3-channel NCHW tensor.
fn preprocess_embedding(frame: &GrayImage) -> Array4<f32> {
    let size = EMBED_INPUT_SIZE;
    let resized = imageops::resize(frame, size as u32, size as u32, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let normalized = (pixel.0[0] as f32 - EMBED_MEAN) / EMBED_STD;
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = normalized;
        tensor[[0, 1, y, x]] = normalized;
        tensor[[0, 2, y, x]] = normalized;
    }

    tensor
}

/// Resize to 64x64 single-channel; FER+ expects raw 0-255 intensities.
fn preprocess_emotion(frame: &GrayImage) -> Array4<f32> {
    let size = EMOTION_INPUT_SIZE;
    let resized = imageops::resize(frame, size as u32, size as u32, FilterType::Triangle);
    let mut tensor = Array4::<f32>::zeros((1, 1, size, size));

    for (x, y, pixel) in resized.enumerate_pixels() {
        tensor[[0, 0, y as usize, x as usize]] = pixel.0[0] as f32;
    }

    tensor
}

/// Index of the largest finite value; the first one wins ties.
fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
