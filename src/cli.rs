use std::{path::PathBuf, thread};

use clap::{Args, Parser, Subcommand};

use crate::config::{
    default_dump_dir, AbstractOptions, AlphaMatteOptions, CollageOptions, MaskOptions,
    OutputArgs, SegmentOptions, SuperResolutionOptions,
};

/// Collages, segments, masks, alpha mattes and super-resolution.
///
/// Inputs may be urls, image files or directories of images.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// ONNX segmentation model used by segment, masks, alpha_matte and abstract
    #[arg(short, long, global = true, env = "SUPERCOLLAGER_MODEL")]
    pub model_path: Option<PathBuf>,

    /// GPU device id for the segmentation model
    #[arg(short, long, global = true, default_value_t = 0)]
    pub device_id: i32,

    /// Worker threads for loading and per-image processing
    #[arg(
        short, long, global = true, default_value_t = thread::available_parallelism().map_or(1, |n| n.get())
    )]
    pub num_threads: usize,

    /// Root of the dated default output directories
    #[arg(long, global = true, env = "SUPERCOLLAGER_DUMP_DIR", default_value_os_t = default_dump_dir())]
    pub dump_dir: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Arrange images into a collage (JPEG)
    Collage(CollageArgs),

    /// Cut the objects out of images (PNG)
    Segment(SegmentArgs),

    /// Foreground masks of images (PNG)
    Masks(MasksArgs),

    /// Per-frame foreground matte of a video (MP4 at the source frame rate)
    #[command(name = "alpha_matte", visible_alias = "alpha-matte")]
    AlphaMatte(AlphaMatteArgs),

    /// Upscale images (JPEG)
    #[command(name = "super_resolution", visible_alias = "super-resolution")]
    SuperResolution(SuperResolutionArgs),

    /// Scatter segments of images over a canvas (JPEG)
    Abstract(AbstractArgs),
}

impl Command {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Collage(_) => "collage",
            Self::Segment(_) => "segment",
            Self::Masks(_) => "masks",
            Self::AlphaMatte(_) => "alpha_matte",
            Self::SuperResolution(_) => "super_resolution",
            Self::Abstract(_) => "abstract",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CollageArgs {
    /// Image urls, files or directories
    #[arg(required = true)]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub options: CollageOptions,
}

#[derive(Args, Debug, Clone)]
pub struct SegmentArgs {
    /// Image urls, files or directories
    #[arg(required = true)]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub options: SegmentOptions,
}

#[derive(Args, Debug, Clone)]
pub struct MasksArgs {
    /// Image urls, files or directories
    #[arg(required = true)]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub options: MaskOptions,
}

#[derive(Args, Debug, Clone)]
pub struct AlphaMatteArgs {
    /// Video file
    pub input: String,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub options: AlphaMatteOptions,
}

#[derive(Args, Debug, Clone)]
pub struct SuperResolutionArgs {
    /// Image urls, files or directories
    #[arg(required = true)]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub options: SuperResolutionOptions,
}

#[derive(Args, Debug, Clone)]
pub struct AbstractArgs {
    /// Image urls, files or directories
    #[arg(required = true)]
    pub inputs: Vec<String>,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub options: AbstractOptions,
}
