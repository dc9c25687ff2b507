use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use image::{buffer::ConvertBuffer, DynamicImage, GrayImage, ImageFormat, RgbImage};
use tracing::debug;

use crate::errors::{CollagerError, Result};
use crate::video::VideoWriter;

/// Output container written by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    Mp4,
}

impl OutputFormat {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Mp4 => "mp4",
        }
    }

    const fn image_format(self) -> Option<ImageFormat> {
        match self {
            Self::Jpeg => Some(ImageFormat::Jpeg),
            Self::Png => Some(ImageFormat::Png),
            Self::Mp4 => None,
        }
    }
}

/// Writes command results as `dir/fname.<ext>`.
#[derive(Debug, Clone)]
pub struct Save {
    dir: PathBuf,
    fname: String,
}

impl Save {
    pub fn new(dir: impl Into<PathBuf>, fname: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            fname: fname.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, format: OutputFormat) -> PathBuf {
        self.dir
            .join(format!("{}.{}", self.fname, format.extension()))
    }

    pub fn indexed_path_for(&self, index: usize, format: OutputFormat) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", self.fname, index, format.extension()))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| CollagerError::FileSystem {
            path: self.dir.clone(),
            operation: "output directory creation".to_string(),
            source: e,
        })
    }

    pub fn one(&self, image: &DynamicImage, format: OutputFormat) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.path_for(format);
        write_image(image, &path, format)?;
        Ok(path)
    }

    pub fn many(&self, images: &[DynamicImage], format: OutputFormat) -> Result<Vec<PathBuf>> {
        self.ensure_dir()?;
        images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                let path = self.indexed_path_for(index, format);
                write_image(image, &path, format)?;
                Ok(path)
            })
            .collect()
    }

    /// Starts `dir/fname.mp4` at `frame_rate`; frames are encoded as they are pushed.
    pub fn video(&self, frame_rate: f64) -> VideoSink {
        self.video_with(OsStr::new("ffmpeg"), frame_rate)
    }

    pub(crate) fn video_with(&self, ffmpeg: &OsStr, frame_rate: f64) -> VideoSink {
        VideoSink {
            save: self.clone(),
            path: self.path_for(OutputFormat::Mp4),
            ffmpeg: ffmpeg.to_os_string(),
            frame_rate,
            writer: None,
        }
    }
}

/// Matte frames streamed into an MP4.
///
/// The encoder starts on the first frame, whose size is the video size. A sink
/// dropped before `finish` deletes what it wrote.
pub struct VideoSink {
    save: Save,
    path: PathBuf,
    ffmpeg: OsString,
    frame_rate: f64,
    writer: Option<VideoWriter>,
}

impl VideoSink {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push(&mut self, frame: &GrayImage) -> Result<()> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => {
                self.save.ensure_dir()?;
                VideoWriter::create_with(
                    &self.ffmpeg,
                    &self.path,
                    frame.width(),
                    frame.height(),
                    self.frame_rate,
                )?
            }
        };
        let rgb: RgbImage = frame.convert();
        self.writer.insert(writer).write_frame(&rgb)
    }

    /// Waits for the encoder. A sink that never received a frame is an error.
    pub fn finish(mut self) -> Result<PathBuf> {
        let Some(writer) = self.writer.take() else {
            return Err(CollagerError::validation("video", "has no frames to write"));
        };
        writer.finish().map_err(|e| {
            let _ = fs::remove_file(&self.path);
            e
        })
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            drop(writer);
            let _ = fs::remove_file(&self.path);
            debug!(path = %self.path.display(), "discarded unfinished video");
        }
    }
}

fn write_image(image: &DynamicImage, path: &Path, format: OutputFormat) -> Result<()> {
    let Some(image_format) = format.image_format() else {
        return Err(CollagerError::validation(
            "format",
            format!("{} is not an image format", format.extension()),
        ));
    };

    // JPEG has no alpha channel.
    let result = match format {
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()).save_with_format(path, image_format),
        _ => image.save_with_format(path, image_format),
    };
    result.map_err(|e| CollagerError::ImageProcessing {
        path: path.display().to_string(),
        operation: "image saving".to_string(),
        source: Box::new(e),
    })?;
    debug!(path = %path.display(), "saved image");
    Ok(())
}
