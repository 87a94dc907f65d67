// src/frame_source.rs
//
// Frame acquisition behind a trait so the session controller can be
// driven by a camera, a directory of stills, or a synthetic source in
// tests. Frames come out as raw RGB in source pixel space; JPEG
// encoding happens at capture time, right before submission.

use crate::error::ScanError;
use crate::types::Frame;
use std::path::PathBuf;
use tracing::{info, warn};
use walkdir::WalkDir;

pub trait FrameSource: Send {
    /// Intrinsic pixel resolution of the source.
    fn dimensions(&self) -> (u32, u32);

    /// Grab the next frame. `Ok(None)` once the source is exhausted.
    fn grab(&mut self) -> Result<Option<Frame>, ScanError>;
}

/// Replays a directory of still images as a frame stream, stamped with
/// a synthetic timeline derived from the capture rate.
#[derive(Debug)]
pub struct DirectoryFrameSource {
    files: Vec<PathBuf>,
    cursor: usize,
    dimensions: (u32, u32),
    frame_interval_ms: f64,
}

impl DirectoryFrameSource {
    pub fn open(dir: &str, rate_fps: u32) -> Result<Self, ScanError> {
        let image_extensions = ["jpg", "jpeg", "png", "JPG", "JPEG", "PNG"];

        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if let Some(ext) = path.extension() {
                if image_extensions.contains(&ext.to_str().unwrap_or("")) {
                    files.push(path.to_path_buf());
                }
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(ScanError::Permission(format!(
                "no image frames found in '{}'",
                dir
            )));
        }

        let dimensions = image::image_dimensions(&files[0])
            .map_err(|e| ScanError::Permission(format!("cannot read '{}': {}", files[0].display(), e)))?;

        info!(
            "Found {} frame file(s) in {} ({}x{})",
            files.len(),
            dir,
            dimensions.0,
            dimensions.1
        );

        Ok(Self {
            files,
            cursor: 0,
            dimensions,
            frame_interval_ms: 1000.0 / rate_fps.max(1) as f64,
        })
    }
}

impl FrameSource for DirectoryFrameSource {
    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn grab(&mut self) -> Result<Option<Frame>, ScanError> {
        while self.cursor < self.files.len() {
            let path = &self.files[self.cursor];
            let timestamp_ms = self.cursor as f64 * self.frame_interval_ms;
            self.cursor += 1;

            match image::open(path) {
                Ok(decoded) => {
                    let rgb = decoded.to_rgb8();
                    let (width, height) = rgb.dimensions();
                    return Ok(Some(Frame {
                        data: rgb.into_raw(),
                        width,
                        height,
                        timestamp_ms,
                    }));
                }
                Err(e) => {
                    // One unreadable file must not end the stream.
                    warn!("Skipping unreadable frame {}: {}", path.display(), e);
                }
            }
        }
        Ok(None)
    }
}

/// Encode a raw RGB frame to JPEG for network transfer. Quality 80
/// balances size against match accuracy.
pub fn encode_rgb_to_jpeg(rgb: &[u8], width: u32, height: u32) -> Option<Vec<u8>> {
    use image::{ImageBuffer, RgbImage};

    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb.to_vec())?;

    let mut buf = std::io::Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 80);
    img.write_with_encoder(encoder).ok()?;

    Some(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn write_frames(dir: &std::path::Path, count: u32) {
        for i in 0..count {
            let img = RgbImage::from_pixel(32, 24, image::Rgb([i as u8 * 40, 10, 200]));
            img.save(dir.join(format!("frame_{:03}.png", i))).unwrap();
        }
    }

    #[test]
    fn test_directory_source_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);

        let mut source = DirectoryFrameSource::open(dir.path().to_str().unwrap(), 2).unwrap();
        assert_eq!(source.dimensions(), (32, 24));

        let first = source.grab().unwrap().unwrap();
        assert_eq!((first.width, first.height), (32, 24));
        assert_eq!(first.timestamp_ms, 0.0);
        assert_eq!(first.data.len(), 32 * 24 * 3);

        let second = source.grab().unwrap().unwrap();
        assert_eq!(second.timestamp_ms, 500.0);

        assert!(source.grab().unwrap().is_some());
        assert!(source.grab().unwrap().is_none(), "source must report exhaustion");
    }

    #[test]
    fn test_empty_directory_is_a_permission_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectoryFrameSource::open(dir.path().to_str().unwrap(), 2).unwrap_err();
        assert!(matches!(err, ScanError::Permission(_)));
    }

    #[test]
    fn test_unreadable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 1);
        std::fs::write(dir.path().join("frame_000a.png"), b"not an image").unwrap();

        let mut source = DirectoryFrameSource::open(dir.path().to_str().unwrap(), 1).unwrap();
        let mut frames = 0;
        while source.grab().unwrap().is_some() {
            frames += 1;
        }
        assert_eq!(frames, 1);
    }

    #[test]
    fn test_jpeg_encode_roundtrip_keeps_dimensions() {
        let rgb = vec![128u8; 16 * 8 * 3];
        let jpeg = encode_rgb_to_jpeg(&rgb, 16, 8).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }
}
