use std::ffi::OsStr;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use image::RgbImage;
use tracing::debug;

use crate::errors::{CollagerError, Result};
use crate::traits::FrameSource;

/// Stream properties read with ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

pub fn parse_frame_rate(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            num / den
        }
        None => value.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

fn parse_stream_info(path: &Path, data: &str) -> Result<VideoInfo> {
    let mut width = None;
    let mut height = None;
    let mut frame_rate = None;

    for line in data.lines() {
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "width" => width = value.trim().parse().ok(),
                "height" => height = value.trim().parse().ok(),
                "r_frame_rate" => frame_rate = parse_frame_rate(value),
                _ => {}
            }
        }
    }

    match (width, height, frame_rate) {
        (Some(width), Some(height), Some(frame_rate)) if width > 0 && height > 0 => Ok(VideoInfo {
            width,
            height,
            frame_rate,
        }),
        _ => Err(CollagerError::video(
            path,
            "reading stream info",
            format!("no usable video stream in ffprobe output: {data:?}"),
        )),
    }
}

/// Collects a child's stderr on its own thread so a chatty ffmpeg never blocks on a
/// full pipe.
fn drain_stderr(stderr: Option<ChildStderr>) -> Option<JoinHandle<String>> {
    stderr.map(|mut stderr| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stderr.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).trim().to_string()
        })
    })
}

fn exit_message(status: ExitStatus, stderr: Option<JoinHandle<String>>) -> String {
    let stderr = stderr
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default();
    if stderr.is_empty() {
        format!("ffmpeg exited with {status}")
    } else {
        stderr
    }
}

/// Width, height and frame rate of the first video stream, via `ffprobe`.
fn stream_info(ffprobe: &OsStr, path: &Path) -> Result<VideoInfo> {
    let output = Command::new(ffprobe)
        .args(["-hide_banner", "-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height,r_frame_rate"])
        .args(["-of", "default=noprint_wrappers=1"])
        .arg(path)
        .output()
        .map_err(|e| CollagerError::video(path, "running ffprobe", e))?;

    if !output.status.success() {
        return Err(CollagerError::video(
            path,
            "reading stream info",
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }
    let data = String::from_utf8(output.stdout)
        .map_err(|e| CollagerError::video(path, "reading ffprobe output", e))?;
    parse_stream_info(path, &data)
}

/// Decodes a video file into RGB frames through an ffmpeg subprocess.
///
/// Frames come out in coded orientation: display rotation is ignored so the frame
/// size always matches what ffprobe reports.
#[derive(Debug)]
pub struct VideoReader {
    path: PathBuf,
    info: VideoInfo,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
}

impl VideoReader {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(OsStr::new("ffprobe"), OsStr::new("ffmpeg"), path)
    }

    pub(crate) fn open_with(ffprobe: &OsStr, ffmpeg: &OsStr, path: &Path) -> Result<Self> {
        let info = stream_info(ffprobe, path)?;
        let mut child = Command::new(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-noautorotate", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CollagerError::video(path, "spawning ffmpeg decoder", e))?;
        let stdout = child.stdout.take();
        let stderr = drain_stderr(child.stderr.take());
        debug!(path = %path.display(), ?info, "opened video");

        Ok(Self {
            path: path.to_path_buf(),
            info,
            child: Some(child),
            stdout,
            stderr,
        })
    }

    pub const fn info(&self) -> VideoInfo {
        self.info
    }

    pub fn is_closed(&self) -> bool {
        self.child.is_none()
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    /// Reaps the decoder once its output is exhausted. A non-zero exit means the
    /// stream ended early, not cleanly.
    fn finish_decoding(&mut self) -> Result<()> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| CollagerError::video(&self.path, "waiting for ffmpeg decoder", e))?;
        let stderr = self.stderr.take();
        if status.success() {
            debug!(path = %self.path.display(), "decoder finished");
            return Ok(());
        }
        Err(CollagerError::video(
            &self.path,
            "decoding",
            exit_message(status, stderr),
        ))
    }
}

impl FrameSource for VideoReader {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let len = self.frame_len();
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match stdout.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(CollagerError::video(&self.path, "reading frame", e)),
            }
        }

        match filled {
            0 => self.finish_decoding().map(|()| None),
            n if n < len => Err(CollagerError::video(
                &self.path,
                "reading frame",
                format!("truncated frame: {n} of {len} bytes"),
            )),
            _ => Ok(RgbImage::from_raw(self.info.width, self.info.height, buffer)),
        }
    }

    fn frame_rate(&self) -> f64 {
        self.info.frame_rate
    }

    fn close(&mut self) {
        self.stdout = None;
        self.stderr = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
            debug!(path = %self.path.display(), "closed video");
        }
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Encodes RGB frames to an H.264 MP4 through an ffmpeg subprocess.
pub struct VideoWriter {
    path: PathBuf,
    width: u32,
    height: u32,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
}

impl VideoWriter {
    /// Starts `ffmpeg` encoding `width`x`height` rgb24 frames into `path`.
    pub fn create_with(
        ffmpeg: &OsStr,
        path: &Path,
        width: u32,
        height: u32,
        frame_rate: f64,
    ) -> Result<Self> {
        let mut child = Command::new(ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{width}x{height}")])
            .args(["-r", &frame_rate.to_string()])
            .args(["-i", "pipe:0"])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
            // yuv420p needs even dimensions
            .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CollagerError::video(path, "spawning ffmpeg encoder", e))?;
        let stdin = child.stdin.take();
        let stderr = drain_stderr(child.stderr.take());

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            child: Some(child),
            stdin,
            stderr,
        })
    }

    pub fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(CollagerError::video(
                &self.path,
                "writing frame",
                format!(
                    "frame is {}x{} but the video is {}x{}",
                    frame.width(),
                    frame.height(),
                    self.width,
                    self.height
                ),
            ));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CollagerError::video(&self.path, "writing frame", "encoder closed"))?;
        stdin
            .write_all(frame.as_raw())
            .map_err(|e| CollagerError::video(&self.path, "writing frame", e))
    }

    /// Closes the encoder input and waits for ffmpeg to finish the file.
    pub fn finish(mut self) -> Result<PathBuf> {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(self.path.clone());
        };

        let status = child
            .wait()
            .map_err(|e| CollagerError::video(&self.path, "waiting for ffmpeg encoder", e))?;
        if !status.success() {
            return Err(CollagerError::video(
                &self.path,
                "encoding",
                exit_message(status, self.stderr.take()),
            ));
        }
        Ok(self.path.clone())
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        self.stdin = None;
        self.stderr = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use crate::mocks::fake_tool;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_parse_stream_info() -> Result<()> {
        let info = parse_stream_info(
            Path::new("clip.mp4"),
            "width=640\nheight=360\nr_frame_rate=24000/1001\n",
        )?;
        assert_eq!((info.width, info.height), (640, 360));
        assert!((info.frame_rate - 23.976).abs() < 0.001);
        Ok(())
    }

    #[test]
    fn test_parse_stream_info_without_stream() {
        let err = parse_stream_info(Path::new("audio.mp3"), "").unwrap_err();
        assert!(matches!(err, CollagerError::Video { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_reader_reads_frames_until_clean_exit() -> Result<()> {
        let ffprobe = fake_tool("ffprobe");
        let ffmpeg = fake_tool("decoder_ok");
        let mut reader =
            VideoReader::open_with(ffprobe.as_os_str(), ffmpeg.as_os_str(), Path::new("clip.mp4"))?;
        assert_eq!(reader.info().frame_rate, 1.0);

        let mut frames = 0;
        while let Some(frame) = reader.next_frame()? {
            assert_eq!(frame.dimensions(), (2, 2));
            frames += 1;
        }
        assert_eq!(frames, 2);
        assert!(reader.is_closed());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_reader_reports_decoder_failure() -> Result<()> {
        let ffprobe = fake_tool("ffprobe");
        let ffmpeg = fake_tool("decoder_fails");
        let mut reader =
            VideoReader::open_with(ffprobe.as_os_str(), ffmpeg.as_os_str(), Path::new("clip.mp4"))?;

        // the failure lands on a frame boundary, after one whole frame
        assert!(reader.next_frame()?.is_some());
        let err = reader.next_frame().unwrap_err();
        assert!(matches!(err, CollagerError::Video { .. }));
        assert!(err.to_string().contains("decoder crashed"), "{err}");
        assert!(reader.is_closed());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_reader_close_is_idempotent() -> Result<()> {
        let ffprobe = fake_tool("ffprobe");
        let ffmpeg = fake_tool("decoder_ok");
        let mut reader =
            VideoReader::open_with(ffprobe.as_os_str(), ffmpeg.as_os_str(), Path::new("clip.mp4"))?;

        assert!(!reader.is_closed());
        reader.close();
        reader.close();
        assert!(reader.is_closed());
        assert!(reader.next_frame()?.is_none());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_writer_survives_noisy_encoder() -> Result<()> {
        let ffmpeg = fake_tool("encoder_noisy");
        let frame = RgbImage::new(200, 200);
        let mut writer =
            VideoWriter::create_with(ffmpeg.as_os_str(), Path::new("out.mp4"), 200, 200, 25.0)?;
        for _ in 0..3 {
            writer.write_frame(&frame)?;
        }
        assert_eq!(writer.finish()?, PathBuf::from("out.mp4"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_writer_reports_encoder_failure() -> Result<()> {
        let ffmpeg = fake_tool("encoder_fails");
        let mut writer =
            VideoWriter::create_with(ffmpeg.as_os_str(), Path::new("out.mp4"), 2, 2, 25.0)?;
        writer.write_frame(&RgbImage::new(2, 2))?;
        assert!(writer.write_frame(&RgbImage::new(3, 2)).is_err());

        let err = writer.finish().unwrap_err();
        assert!(err.to_string().contains("encoder crashed"), "{err}");
        Ok(())
    }
}
