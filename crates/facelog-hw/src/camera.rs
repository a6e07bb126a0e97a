//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame, DARK_FRAME_FRACTION};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Consecutive failed dequeues after which the stream is treated as closed.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, Y channel extracted).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// Packed 24-bit RGB.
    Rgb24,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 capture device (e.g. "/dev/video0") and negotiate a
    /// format close to `width`x`height`.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or RGB3)"
            )));
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "opened camera"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Start streaming. The returned iterator is lazy and endless until the
    /// device stops delivering buffers; it cannot be restarted.
    pub fn frames(&self) -> Result<FrameStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        Ok(FrameStream {
            camera: self,
            stream,
            failures: 0,
            closed: false,
        })
    }

    /// Capture a single frame.
    pub fn capture_frame(&self) -> Result<Frame, CameraError> {
        self.frames()?
            .next()
            .ok_or_else(|| CameraError::CaptureFailed("stream closed before first frame".into()))
    }

    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;

        match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
            PixelFormat::Rgb24 => frame::rgb_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("RGB conversion failed: {e}"))),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Live frames from a [`Camera`].
///
/// Transient dequeue or conversion errors are logged and skipped; after
/// several in a row the stream is considered closed and yields `None`
/// from then on.
pub struct FrameStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
    failures: u32,
    closed: bool,
}

impl Iterator for FrameStream<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        while !self.closed {
            let captured = match CaptureStream::next(&mut self.stream) {
                Ok((buf, meta)) => self
                    .camera
                    .buf_to_grayscale(buf)
                    .map(|gray| (gray, meta.sequence)),
                Err(e) => Err(CameraError::CaptureFailed(format!(
                    "failed to dequeue buffer: {e}"
                ))),
            };

            match captured {
                Ok((data, sequence)) => {
                    self.failures = 0;
                    let is_dark = frame::is_dark_frame(&data, DARK_FRAME_FRACTION);
                    return Some(Frame {
                        data,
                        width: self.camera.width,
                        height: self.camera.height,
                        timestamp: std::time::Instant::now(),
                        sequence,
                        is_dark,
                    });
                }
                Err(err) => {
                    self.failures += 1;
                    tracing::warn!(
                        device = %self.camera.device_path,
                        error = %err,
                        failures = self.failures,
                        "frame capture failed"
                    );
                    if self.failures >= MAX_CONSECUTIVE_FAILURES {
                        tracing::error!(device = %self.camera.device_path, "camera stopped delivering frames");
                        self.closed = true;
                    }
                }
            }
        }
        None
    }
}
