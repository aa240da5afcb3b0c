//! V4L2 live capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::{SourceError, SourceKind, VideoSource};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

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
    /// YUYV 4:2:2 packed.
    Yuyv,
    /// 8-bit grayscale, replicated into all three channels.
    Grey,
    /// Packed RGB24.
    Rgb3,
    /// Motion-JPEG, decoded per frame.
    Mjpg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"RGB3" => Some(Self::Rgb3),
            b"MJPG" => Some(Self::Mjpg),
            _ => None,
        }
    }
}

/// Streaming V4L2 camera. The mmap stream stays open between reads.
pub struct Camera {
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
    read_timeout: Duration,
}

impl Camera {
    /// Open a V4L2 device (e.g. "/dev/video0") and start streaming.
    pub fn open(device_path: &str, read_timeout: Duration) -> Result<Self, SourceError> {
        if !Path::new(device_path).exists() {
            return Err(SourceError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                SourceError::DeviceBusy
            } else {
                SourceError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            SourceError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;
        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(SourceError::StreamingNotSupported);
        }

        // Ask for YUYV; accept whatever of the supported formats the driver picks.
        let mut fmt = device.format().map_err(|e| {
            SourceError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            SourceError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;
        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            SourceError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV, GREY, RGB3 or MJPG)",
                negotiated.fourcc
            ))
        })?;
        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        let mut stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| SourceError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
        stream.set_timeout(read_timeout);

        Ok(Self {
            stream: Some(stream),
            device: Some(device),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
            read_timeout,
        })
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

impl VideoSource for Camera {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn read(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        let (buf, meta) = stream.next().map_err(|e| {
            if e.kind() == ErrorKind::TimedOut {
                SourceError::Timeout(self.read_timeout)
            } else {
                SourceError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            }
        })?;

        let rgb = buf_to_rgb(self.pixel_format, buf, self.width, self.height)?;
        Frame::new(rgb, self.width, self.height, meta.sequence)
            .map(Some)
            .map_err(|e| SourceError::CaptureFailed(e.to_string()))
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
        self.device = None;
    }
}

/// Convert a raw driver buffer to packed RGB8 based on the negotiated format.
fn buf_to_rgb(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, SourceError> {
    let pixels = width as usize * height as usize;

    match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map_err(|e| SourceError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(SourceError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            Ok(frame::grey_to_rgb(&buf[..pixels]))
        }
        PixelFormat::Rgb3 => {
            let expected = pixels * 3;
            if buf.len() < expected {
                return Err(SourceError::CaptureFailed(format!(
                    "RGB3 buffer too short: expected {expected}, got {}",
                    buf.len()
                )));
            }
            Ok(buf[..expected].to_vec())
        }
        PixelFormat::Mjpg => {
            let img = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                .map_err(|e| SourceError::CaptureFailed(format!("MJPG decode failed: {e}")))?
                .to_rgb8();
            if img.dimensions() != (width, height) {
                return Err(SourceError::CaptureFailed(format!(
                    "MJPG frame is {:?}, expected {width}x{height}",
                    img.dimensions()
                )));
            }
            Ok(img.into_raw())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"H264")), None);
    }

    #[test]
    fn test_grey_buffer_expands() {
        let rgb = buf_to_rgb(PixelFormat::Grey, &[7, 9], 2, 1).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn test_short_rgb_buffer_rejected() {
        assert!(buf_to_rgb(PixelFormat::Rgb3, &[0; 5], 2, 1).is_err());
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/video-does-not-exist", Duration::from_millis(10));
        assert!(matches!(err, Err(SourceError::DeviceNotFound(_))));
    }
}
