// src/capture.rs
//
// Frame sources and the owned camera handle.
//
// The camera is a single physical resource. Instead of a process-wide
// global, the caller owns a `CameraHandle`: opening is idempotent, and
// at most one `SourceLease` (the thing the acquisition loop reads from)
// exists at a time.

use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open frame source: {0}")]
    Open(String),
    #[error("frame read failed: {0}")]
    Read(String),
    #[error("frame source is already leased")]
    AlreadyLeased,
    #[error("frame source is not open")]
    NotOpen,
}

pub trait FrameSource: Send {
    fn describe(&self) -> String;

    /// `Ok(Some)` is a frame, `Ok(None)` is end of stream and `Err` is a
    /// transient failure the caller may retry.
    fn read(&mut self) -> Result<Option<RgbImage>, CaptureError>;
}

// ============================================================================
// IMAGE DIRECTORY REPLAY
// ============================================================================

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Replays the still images of a directory tree in file-name order
pub struct ImageDirSource {
    root: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl ImageDirSource {
    pub fn open(root: &Path) -> Result<Self, CaptureError> {
        if !root.is_dir() {
            return Err(CaptureError::Open(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::Open(format!(
                "no images found in {}",
                root.display()
            )));
        }

        info!("Found {} image(s) in {}", files.len(), root.display());
        Ok(Self {
            root: root.to_path_buf(),
            files,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn describe(&self) -> String {
        format!("image directory {}", self.root.display())
    }

    fn read(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;

        debug!("Reading {}", path.display());
        image::open(path)
            .map(|img| Some(img.to_rgb8()))
            .map_err(|e| CaptureError::Read(format!("{}: {}", path.display(), e)))
    }
}

// ============================================================================
// LIVE CAMERA
// ============================================================================

#[cfg(feature = "camera")]
pub use camera::CameraSource;

#[cfg(feature = "camera")]
mod camera {
    use super::{CaptureError, FrameSource};
    use crate::types::CameraConfig;
    use image::RgbImage;
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture},
    };
    use tracing::info;

    pub struct CameraSource {
        cap: VideoCapture,
        device: i32,
    }

    impl CameraSource {
        pub fn open(config: &CameraConfig) -> Result<Self, CaptureError> {
            let open_err = |e: opencv::Error| CaptureError::Open(e.to_string());

            let mut cap = VideoCapture::new(config.device, videoio::CAP_ANY).map_err(open_err)?;
            if !cap.is_opened().map_err(open_err)? {
                return Err(CaptureError::Open(format!(
                    "camera device {} could not be opened",
                    config.device
                )));
            }
            cap.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64)
                .map_err(open_err)?;
            cap.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64)
                .map_err(open_err)?;

            info!(
                "Camera {} opened ({}x{} requested)",
                config.device, config.width, config.height
            );
            Ok(Self {
                cap,
                device: config.device,
            })
        }
    }

    impl FrameSource for CameraSource {
        fn describe(&self) -> String {
            format!("camera device {}", self.device)
        }

        fn read(&mut self) -> Result<Option<RgbImage>, CaptureError> {
            let read_err = |e: opencv::Error| CaptureError::Read(e.to_string());

            let mut mat = Mat::default();
            if !self.cap.read(&mut mat).map_err(read_err)? || mat.empty() {
                return Err(CaptureError::Read("empty frame".to_string()));
            }

            let mut rgb = Mat::default();
            imgproc::cvt_color(&mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0).map_err(read_err)?;

            let (w, h) = (rgb.cols() as u32, rgb.rows() as u32);
            let data = rgb.data_bytes().map_err(read_err)?.to_vec();
            RgbImage::from_raw(w, h, data)
                .map(Some)
                .ok_or_else(|| CaptureError::Read(format!("bad frame buffer for {}x{}", w, h)))
        }
    }
}

// ============================================================================
// OWNED CAMERA HANDLE
// ============================================================================

/// Exclusive use of the opened source, handed to the acquisition loop
pub struct SourceLease {
    source: Box<dyn FrameSource>,
}

impl SourceLease {
    pub fn describe(&self) -> String {
        self.source.describe()
    }

    pub fn read(&mut self) -> Result<Option<RgbImage>, CaptureError> {
        self.source.read()
    }
}

#[derive(Default)]
pub struct CameraHandle {
    source: Option<Box<dyn FrameSource>>,
    leased: bool,
}

impl CameraHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the source unless it is already open. Re-opening is a no-op
    /// that keeps the existing source.
    pub fn open_or_get<F>(&mut self, open: F) -> Result<&mut Self, CaptureError>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>, CaptureError>,
    {
        if self.is_open() {
            debug!("Frame source already open, reusing it");
            return Ok(self);
        }
        let source = open()?;
        info!("✓ Frame source ready: {}", source.describe());
        self.source = Some(source);
        Ok(self)
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some() || self.leased
    }

    pub fn is_leased(&self) -> bool {
        self.leased
    }

    pub fn lease(&mut self) -> Result<SourceLease, CaptureError> {
        if self.leased {
            return Err(CaptureError::AlreadyLeased);
        }
        let source = self.source.take().ok_or(CaptureError::NotOpen)?;
        self.leased = true;
        Ok(SourceLease { source })
    }

    pub fn release(&mut self, lease: SourceLease) {
        self.source = Some(lease.source);
        self.leased = false;
    }

    /// Drop the source. Fails while a lease is outstanding.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        if self.leased {
            return Err(CaptureError::AlreadyLeased);
        }
        if let Some(source) = self.source.take() {
            info!("Frame source closed: {}", source.describe());
        }
        Ok(())
    }
}
