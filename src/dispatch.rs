use std::path::PathBuf;

use tracing::info;

use crate::adapter::Adapter;
use crate::app::App;
use crate::cli::Command;
use crate::config::{
    AbstractOptions, AlphaMatteOptions, CollageOptions, MaskOptions, OutputArgs, SegmentOptions,
    SuperResolutionOptions,
};
use crate::errors::Result;
use crate::save::{OutputFormat, Save, VideoSink};
use crate::traits::FrameSource;

/// Runs one command as load, process, save.
///
/// Failures are returned as they are; nothing is retried and partial results are
/// not written.
pub struct Dispatcher<A: App> {
    app: A,
    dump_dir: PathBuf,
}

impl<A: App> Dispatcher<A> {
    pub fn new(app: A, dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            app,
            dump_dir: dump_dir.into(),
        }
    }

    pub const fn app(&self) -> &A {
        &self.app
    }

    /// Runs `command` and returns the paths it wrote.
    pub fn run(&self, command: &Command) -> Result<Vec<PathBuf>> {
        info!(command = command.name(), "starting");
        let paths = match command {
            Command::Collage(args) => {
                vec![self.collage(&args.inputs, &args.output, &args.options)?]
            }
            Command::Segment(args) => self.segment(&args.inputs, &args.output, &args.options)?,
            Command::Masks(args) => self.masks(&args.inputs, &args.output, &args.options)?,
            Command::AlphaMatte(args) => {
                vec![self.alpha_matte(&args.input, &args.output, &args.options)?]
            }
            Command::SuperResolution(args) => {
                self.super_resolution(&args.inputs, &args.output, &args.options)?
            }
            Command::Abstract(args) => {
                vec![self.abstract_composition(&args.inputs, &args.output, &args.options)?]
            }
        };
        info!(command = command.name(), files = paths.len(), "done");
        Ok(paths)
    }

    fn save(&self, output: &OutputArgs) -> Save {
        let (dir, fname) = output.resolve(&self.dump_dir);
        Save::new(dir, fname)
    }

    pub fn collage(
        &self,
        inputs: &[String],
        output: &OutputArgs,
        options: &CollageOptions,
    ) -> Result<PathBuf> {
        let images = Adapter::load(inputs)?;
        info!("loaded {} images", images.len());

        let collage = self.app.collage(&images, options)?;
        let path = self.save(output).one(&collage, OutputFormat::Jpeg)?;
        info!("saved to {}", path.display());
        Ok(path)
    }

    pub fn segment(
        &self,
        inputs: &[String],
        output: &OutputArgs,
        options: &SegmentOptions,
    ) -> Result<Vec<PathBuf>> {
        let images = Adapter::load(inputs)?;
        info!("loaded {} images", images.len());

        let segments = self.app.segment(&images, options)?;
        info!("found {} segments in {} URIs", segments.len(), images.len());

        let save = self.save(output);
        let paths = save.many(&segments, OutputFormat::Png)?;
        info!("saved to {}", save.dir().display());
        Ok(paths)
    }

    pub fn masks(
        &self,
        inputs: &[String],
        output: &OutputArgs,
        options: &MaskOptions,
    ) -> Result<Vec<PathBuf>> {
        let images = Adapter::load(inputs)?;
        info!("loaded {} images", images.len());

        let masks = self.app.masks(&images, options)?;
        let save = self.save(output);
        let paths = save.many(&masks, OutputFormat::Png)?;
        info!("saved to {}", save.dir().display());
        Ok(paths)
    }

    pub fn alpha_matte(
        &self,
        input: &str,
        output: &OutputArgs,
        options: &AlphaMatteOptions,
    ) -> Result<PathBuf> {
        let video = Adapter::load_video(input)?;
        let info = video.info();
        info!(
            "loaded {} ({}x{} at {:.3} fps)",
            input, info.width, info.height, info.frame_rate
        );
        self.alpha_matte_from(video, output, options)
    }

    /// Mattes every frame of `source` and streams the result to an MP4 at the
    /// source frame rate. `source` is closed on every path.
    pub fn alpha_matte_from<S: FrameSource>(
        &self,
        source: S,
        output: &OutputArgs,
        options: &AlphaMatteOptions,
    ) -> Result<PathBuf> {
        let frame_rate = source.frame_rate();
        let video = self.save(output).video(frame_rate);
        self.matte_into(source, video, options)
    }

    fn matte_into<S: FrameSource>(
        &self,
        mut source: S,
        mut video: VideoSink,
        options: &AlphaMatteOptions,
    ) -> Result<PathBuf> {
        let frame_rate = source.frame_rate();
        let frames = self
            .app
            .alpha_matte(&mut source, options, &mut |matte| video.push(&matte));
        source.close();
        let frames = frames?;
        info!("computed {} matte frames at {:.3} fps", frames, frame_rate);

        let path = video.finish()?;
        info!("saved to {}", path.display());
        Ok(path)
    }

    pub fn super_resolution(
        &self,
        inputs: &[String],
        output: &OutputArgs,
        options: &SuperResolutionOptions,
    ) -> Result<Vec<PathBuf>> {
        let images = Adapter::load(inputs)?;
        info!("loaded {} images", images.len());

        let upscaled = self.app.super_resolution(&images, options)?;
        let save = self.save(output);
        let paths = match upscaled.as_slice() {
            [single] => vec![save.one(single, OutputFormat::Jpeg)?],
            many => save.many(many, OutputFormat::Jpeg)?,
        };
        info!("saved to {}", save.dir().display());
        Ok(paths)
    }

    pub fn abstract_composition(
        &self,
        inputs: &[String],
        output: &OutputArgs,
        options: &AbstractOptions,
    ) -> Result<PathBuf> {
        let images = Adapter::load(inputs)?;
        info!("loaded {} images", images.len());

        let composition = self.app.abstract_composition(&images, options)?;
        let path = self.save(output).one(&composition, OutputFormat::Jpeg)?;
        info!("saved to {}", path.display());
        Ok(path)
    }
}
