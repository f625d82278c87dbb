//! Single-photo capture from a V4L2 webcam via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const JPEG_QUALITY: u8 = 90;
/// Frames inspected per photo before settling for a dark one.
const MAX_CAPTURE_ATTEMPTS: usize = 10;
/// `/dev/videoN` nodes probed during enumeration.
const MAX_VIDEO_NODES: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    DeviceNotFound(String),
    #[error("camera {0} is in use")]
    DeviceBusy(String),
    #[error("{0} is not a video capture device")]
    NotCaptureDevice(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// A capture-capable V4L2 node.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

impl DeviceInfo {
    /// Query `path`; `None` unless it exists and supports video capture.
    ///
    /// UVC webcams expose a metadata-only node next to each capture node,
    /// which this filters out.
    fn probe(path: &str) -> Option<Self> {
        let caps = Device::with_path(path).ok()?.query_caps().ok()?;
        caps.capabilities
            .contains(Flags::VIDEO_CAPTURE)
            .then(|| Self {
                path: path.to_string(),
                name: caps.card,
                driver: caps.driver,
                bus: caps.bus,
            })
    }
}

/// Pixel layouts this module can turn into a JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// Motion-JPEG: every buffer already is a JPEG.
    Mjpeg,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

/// An opened webcam with a negotiated capture format.
pub struct Camera {
    device: Device,
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path` and negotiate 640x480 YUYV, GREY or MJPG.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        let device = open_device(device_path)?;
        let (width, height, pixel_format) = negotiate(&device)?;

        tracing::debug!(
            device = device_path,
            width,
            height,
            format = ?pixel_format,
            "camera ready"
        );

        Ok(Self {
            device,
            device_path: device_path.to_string(),
            width,
            height,
            pixel_format,
        })
    }

    /// Capture one photo as JPEG bytes.
    ///
    /// The first `warmup` frames are thrown away while auto-exposure
    /// settles. After that the first frame that is not dark wins; if all
    /// attempts are dark the last one is returned.
    pub fn capture_jpeg(&self, warmup: usize) -> Result<Vec<u8>, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("mmap stream: {e}")))?;

        let mut last = None;
        for attempt in 0..warmup + MAX_CAPTURE_ATTEMPTS {
            let (buf, meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("dequeue: {e}")))?;
            if attempt < warmup {
                continue;
            }

            let used = (meta.bytesused as usize).min(buf.len());
            let (jpeg, dark) = self.to_jpeg(&buf[..used], meta.sequence)?;
            if !dark {
                return Ok(jpeg);
            }
            tracing::debug!(device = %self.device_path, seq = meta.sequence, "dark frame");
            last = Some(jpeg);
        }

        last.ok_or_else(|| CameraError::CaptureFailed("no frame captured".to_string()))
    }

    /// Encode a raw buffer, reporting whether it is too dark to use.
    fn to_jpeg(&self, buf: &[u8], sequence: u32) -> Result<(Vec<u8>, bool), CameraError> {
        let conversion_failed = |e: frame::FrameError| CameraError::CaptureFailed(e.to_string());

        let rgb = match self.pixel_format {
            PixelFormat::Mjpeg => {
                let luma = image::load_from_memory(buf)
                    .map_err(|e| CameraError::CaptureFailed(format!("corrupt MJPG frame: {e}")))?
                    .to_luma8();
                return Ok((buf.to_vec(), frame::is_dark_frame(luma.as_raw(), 0.95)));
            }
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height),
        }
        .map_err(conversion_failed)?;

        let frame = Frame {
            data: rgb,
            width: self.width,
            height: self.height,
            sequence,
        };
        let jpeg = frame.encode_jpeg(JPEG_QUALITY).map_err(conversion_failed)?;
        Ok((jpeg, frame.is_dark()))
    }

    /// Capture-capable devices, ordered by node number.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_VIDEO_NODES)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| DeviceInfo::probe(&path))
            .collect()
    }
}

fn open_device(path: &str) -> Result<Device, CameraError> {
    if !Path::new(path).exists() {
        return Err(CameraError::DeviceNotFound(path.to_string()));
    }
    let device = Device::with_path(path).map_err(|e| match e.raw_os_error() {
        Some(16) => CameraError::DeviceBusy(path.to_string()),
        _ => CameraError::DeviceNotFound(format!("{path}: {e}")),
    })?;

    let caps = device
        .query_caps()
        .map_err(|e| CameraError::CaptureFailed(format!("query capabilities: {e}")))?;
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Err(CameraError::NotCaptureDevice(path.to_string()));
    }
    Ok(device)
}

/// Ask for YUYV; webcams that only stream compressed video answer MJPG.
fn negotiate(device: &Device) -> Result<(u32, u32, PixelFormat), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("get format: {e}")))?;
    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = CAPTURE_WIDTH;
    fmt.height = CAPTURE_HEIGHT;

    let got = device
        .set_format(&fmt)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(got.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!("driver offered {}", got.fourcc))
    })?;
    Ok((got.width, got.height, pixel_format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::new(b"YUYV")),
            Some(PixelFormat::Yuyv)
        );
        assert_eq!(
            PixelFormat::from_fourcc(FourCC::new(b"MJPG")),
            Some(PixelFormat::Mjpeg)
        );
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"H264")), None);
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/rollcall-no-such-camera"),
            Err(CameraError::DeviceNotFound(_))
        ));
    }
}
