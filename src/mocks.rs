use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use image::{imageops, imageops::FilterType, DynamicImage, Luma, RgbImage};

use crate::errors::Result;
use crate::traits::{FrameSource, MaskModel, SoftMask, Upscaler};

/// Test mask model: the mask is the image's brightness.
#[derive(Debug, Default)]
pub struct MockMaskModel {
    calls: AtomicUsize,
}

impl MockMaskModel {
    pub const fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `predict_mask` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MaskModel for MockMaskModel {
    fn predict_mask(&self, img: &DynamicImage) -> Result<SoftMask> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let luma = img.to_luma8();
        Ok(SoftMask::from_fn(luma.width(), luma.height(), |x, y| {
            Luma([f32::from(luma.get_pixel(x, y)[0]) / 255.0])
        }))
    }
}

/// Test upscaler: nearest-neighbour enlargement by a fixed factor.
#[derive(Debug, Clone)]
pub struct MockUpscaler {
    pub scale: u32,
}

impl MockUpscaler {
    pub const fn new(scale: u32) -> Self {
        Self { scale }
    }
}

impl Upscaler for MockUpscaler {
    fn upscale(&self, img: &RgbImage) -> Result<RgbImage> {
        Ok(imageops::resize(
            img,
            img.width() * self.scale,
            img.height() * self.scale,
            FilterType::Nearest,
        ))
    }
}

/// In-memory frame source that records whether it was closed.
#[derive(Debug)]
pub struct MockFrameSource {
    frames: VecDeque<RgbImage>,
    frame_rate: f64,
    closed: Arc<AtomicBool>,
}

impl MockFrameSource {
    pub fn new(frames: Vec<RgbImage>, frame_rate: f64) -> Self {
        Self {
            frames: frames.into(),
            frame_rate,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that flips to true once the source is closed, readable after the
    /// source has been moved or dropped.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl FrameSource for MockFrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.frames.pop_front())
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn close(&mut self) {
        self.frames.clear();
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(all(test, unix))]
const FAKE_TOOLS: [(&str, &str); 6] = [
    ("ffprobe", "printf 'width=2\\nheight=2\\nr_frame_rate=1/1\\n'"),
    (
        "decoder_ok",
        "case \" $* \" in *\" -noautorotate \"*) ;; *) echo 'autorotate is on' >&2; exit 3;; esac\nhead -c 24 /dev/zero",
    ),
    ("decoder_fails", "head -c 12 /dev/zero\necho 'decoder crashed' >&2\nexit 1"),
    ("encoder_ok", "for out; do :; done\ncat > \"$out\""),
    ("encoder_noisy", "head -c 200000 /dev/zero >&2\ncat > /dev/null"),
    ("encoder_fails", "cat > /dev/null\necho 'encoder crashed' >&2\nexit 1"),
];

/// Shell scripts standing in for ffmpeg and ffprobe. The fake ffprobe reports a
/// 2x2 stream at 1 fps; `encoder_ok` copies its raw input to the output path.
///
/// All scripts are written before the first one is returned, so no test spawns a
/// process while another still has a script open for writing.
#[cfg(all(test, unix))]
pub(crate) fn fake_tool(name: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;
    use std::sync::OnceLock;
    use tempfile::TempDir;

    static TOOLS: OnceLock<TempDir> = OnceLock::new();
    let dir = TOOLS.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        for (tool, body) in FAKE_TOOLS {
            let path = dir.path().join(tool);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    });
    dir.path().join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb};

    #[test]
    fn test_mock_mask_follows_brightness() -> Result<()> {
        let model = MockMaskModel::new();
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 2, Rgb([255, 255, 255])));

        let mask = model.predict_mask(&img)?;
        assert_eq!(mask.dimensions(), img.dimensions());
        assert_eq!(mask.get_pixel(0, 0)[0], 1.0);
        assert_eq!(model.calls(), 1);
        Ok(())
    }

    #[test]
    fn test_mock_frame_source_close() -> Result<()> {
        let mut source = MockFrameSource::new(vec![RgbImage::new(1, 1); 3], 30.0);
        let closed = source.closed_flag();

        assert!(source.next_frame()?.is_some());
        source.close();
        assert!(closed.load(Ordering::SeqCst));
        assert!(source.next_frame()?.is_none());
        Ok(())
    }
}
