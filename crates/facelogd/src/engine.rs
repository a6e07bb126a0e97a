use crate::config::Config;
use facelog_core::{Analyzer, Observation, OnnxAnalyzer};
use facelog_hw::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Observations buffered between capture and the tracker. Kept small so the
/// tracker always sees recent frames.
const OBSERVATION_QUEUE: usize = 2;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] facelog_hw::CameraError),
    #[error("analyzer error: {0}")]
    Analyzer(#[from] facelog_core::AnalyzerError),
}

/// Handle to the running capture thread.
pub struct CaptureHandle {
    pub observations: mpsc::Receiver<Observation>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Ask the capture thread to stop after its current frame and wait for it.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.observations.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("capture thread panicked");
            }
        }
    }
}

/// Spawn capture and analysis on a dedicated OS thread.
///
/// Opens the camera and loads the ONNX models first, so a missing device
/// or model fails startup instead of the thread. Warmup frames are
/// discarded before the thread starts.
pub fn spawn_capture(config: &Config) -> Result<CaptureHandle, EngineError> {
    let camera = Camera::open(
        &config.camera_device,
        config.capture_width,
        config.capture_height,
    )?;

    let detector_path = config.detector_model_path();
    let embedding_path = config.embedding_model_path();
    let emotion_path = config.emotion_model_path();
    let analyzer = OnnxAnalyzer::load(&detector_path, &embedding_path, Some(emotion_path.as_str()))?;
    tracing::info!(
        detector = %detector_path,
        embedding = %embedding_path,
        emotion = %emotion_path,
        "analyzer loaded"
    );

    // Discard warmup frames for camera AGC/AE stabilization
    if config.warmup_frames > 0 {
        tracing::info!(count = config.warmup_frames, "discarding warmup frames");
        for _ in 0..config.warmup_frames {
            if let Err(err) = camera.capture_frame() {
                tracing::debug!(error = %err, "warmup frame failed");
            }
        }
    }

    let (tx, rx) = mpsc::channel::<Observation>(OBSERVATION_QUEUE);
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);

    let thread = std::thread::Builder::new()
        .name("facelog-capture".into())
        .spawn(move || run_capture(camera, analyzer, tx, thread_stop))
        .expect("failed to spawn capture thread");

    Ok(CaptureHandle {
        observations: rx,
        stop,
        thread: Some(thread),
    })
}

fn run_capture<A: Analyzer>(
    camera: Camera,
    mut analyzer: A,
    tx: mpsc::Sender<Observation>,
    stop: Arc<AtomicBool>,
) {
    tracing::info!("capture thread started");

    let frames = match camera.frames() {
        Ok(frames) => frames,
        Err(err) => {
            tracing::error!(error = %err, "failed to start streaming");
            return;
        }
    };

    let mut dark_skipped = 0u64;
    let mut dropped = 0u64;

    for frame in frames {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        if frame.is_dark {
            dark_skipped += 1;
            tracing::trace!(sequence = frame.sequence, "dark frame skipped");
            continue;
        }

        let observation = analyzer.analyze(&frame.data, frame.width, frame.height);
        match tx.try_send(observation) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                tracing::trace!(sequence = frame.sequence, "tracker busy; frame dropped");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    tracing::info!(dark_skipped, dropped, "capture thread exiting");
}
