use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Local, TimeZone};
use clap::Args;
use image::Rgba;

/// Options that a command does not know about, kept in the order they were given.
pub type ExtraOptions = Vec<(String, String)>;

const DEFAULT_DUMP_DIR: &str = "dump";

/// Where a command writes its results.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputArgs {
    /// Directory to save to [default: <dump-dir>/<today>]
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// File name (without extension) to save as [default: current timestamp]
    #[arg(long)]
    pub fname: Option<String>,
}

impl OutputArgs {
    /// Fills in the dated directory and timestamp file name where none were given.
    pub fn resolve(&self, dump_dir: &Path) -> (PathBuf, String) {
        let now = Local::now();
        let dir = self
            .dir
            .clone()
            .unwrap_or_else(|| default_dir(dump_dir, &now));
        let fname = self.fname.clone().unwrap_or_else(default_fname);
        (dir, fname)
    }
}

pub fn default_dump_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DUMP_DIR)
}

pub fn default_dir<Tz: TimeZone>(dump_dir: &Path, now: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: fmt::Display,
{
    dump_dir.join(now.format("%Y-%m-%d").to_string())
}

static LAST_FNAME_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Timestamp file name with microsecond precision.
///
/// Two calls inside one process never return the same name: if the clock has not
/// advanced, the timestamp is bumped by one microsecond past the previous value.
pub fn default_fname() -> String {
    let now = Local::now().timestamp_micros();
    let previous = LAST_FNAME_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last.saturating_add(1)))
        })
        .unwrap_or(now);
    let micros = now.max(previous.saturating_add(1));

    match Local.timestamp_micros(micros).single() {
        Some(time) => time.format("%Y-%m-%d_%H-%M-%S-%6f").to_string(),
        None => micros.to_string(),
    }
}

/// Target size in pixels, written `WIDTHxHEIGHT` on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dsize {
    pub width: u32,
    pub height: u32,
}

impl Dsize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dsize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Dsize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X', ','])
            .ok_or_else(|| format!("`{s}` is not a size, expected WIDTHxHEIGHT"))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| format!("invalid width `{w}`"))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| format!("invalid height `{h}`"))?;
        if width == 0 || height == 0 {
            return Err(format!("`{s}` must have a non-zero width and height"));
        }
        Ok(Self { width, height })
    }
}

pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn parse_color(s: &str) -> Result<Rgba<u8>, String> {
    let named = match s.to_lowercase().as_str() {
        "white" => Some([255, 255, 255, 255]),
        "black" => Some([0, 0, 0, 255]),
        "red" => Some([255, 0, 0, 255]),
        "green" => Some([0, 255, 0, 255]),
        "blue" => Some([0, 0, 255, 255]),
        "gray" | "grey" => Some([128, 128, 128, 255]),
        "transparent" => Some([0, 0, 0, 0]),
        _ => None,
    };
    if let Some(rgba) = named {
        return Ok(Rgba(rgba));
    }

    let hex = s.strip_prefix('#').unwrap_or(s);
    if !matches!(hex.len(), 6 | 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!(
            "`{s}` is not a colour. Use #rrggbb, #rrggbbaa or a name (white, black, red, green, blue, gray, transparent)"
        ));
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
    let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

fn parse_unit_interval(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{value} is outside 0.0..=1.0"));
    }
    Ok(value)
}

fn parse_non_negative(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{value} must be a finite, non-negative number"));
    }
    Ok(value)
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CollageOptions {
    /// Background image (url or path); covers the whole canvas
    #[arg(long)]
    pub background: Option<String>,

    /// Canvas colour when no background image is given
    #[arg(long, default_value = "white", value_parser = parse_color)]
    pub color: Rgba<u8>,

    /// Contrast adjustment applied to the finished collage
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub contrast: f32,

    /// Maximum random rotation of each tile, in degrees
    #[arg(long, default_value_t = 0.0, value_parser = parse_non_negative)]
    pub rotate: f32,

    /// Shuffle the order of the tiles
    #[arg(long)]
    pub shuffle: bool,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Extra KEY=VALUE option handed to the processing layer
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub extra: ExtraOptions,
}

impl Default for CollageOptions {
    fn default() -> Self {
        Self {
            background: None,
            color: Rgba([255, 255, 255, 255]),
            contrast: 0.0,
            rotate: 0.0,
            shuffle: false,
            seed: None,
            extra: Vec::new(),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SegmentOptions {
    /// Maximum random rotation of each segment, in degrees
    #[arg(long, default_value_t = 0.0, value_parser = parse_non_negative)]
    pub rotate: f32,

    /// Shuffle the order of the segments
    #[arg(long)]
    pub shuffle: bool,

    /// Mask value above which a pixel belongs to an object
    #[arg(long, default_value_t = 0.5, value_parser = parse_unit_interval)]
    pub threshold: f32,

    /// Smallest segment kept, in pixels
    #[arg(long, alias = "min_area", default_value_t = 64)]
    pub min_area: u32,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Extra KEY=VALUE option handed to the processing layer
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub extra: ExtraOptions,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            rotate: 0.0,
            shuffle: false,
            threshold: 0.5,
            min_area: 64,
            seed: None,
            extra: Vec::new(),
        }
    }
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct MaskOptions {
    /// Extra KEY=VALUE option handed to the processing layer
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub extra: ExtraOptions,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct AlphaMatteOptions {
    /// Gaussian blur sigma applied to each matte (0 disables)
    #[arg(long, default_value_t = 0.0, value_parser = parse_non_negative)]
    pub blur: f32,

    /// Mask values below this are cleared
    #[arg(
        long,
        alias = "confidence_threshold",
        default_value_t = 0.1,
        value_parser = parse_unit_interval
    )]
    pub confidence_threshold: f32,

    /// Multiplier applied to mask values before clamping
    #[arg(long, default_value_t = 1.0, value_parser = parse_non_negative)]
    pub gain: f32,

    /// Run the model on every n-th frame and reuse the mask in between
    #[arg(
        long,
        alias = "keyframe_interval",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub keyframe_interval: u32,

    /// Extra KEY=VALUE option handed to the processing layer
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub extra: ExtraOptions,
}

impl Default for AlphaMatteOptions {
    fn default() -> Self {
        Self {
            blur: 0.0,
            confidence_threshold: 0.1,
            gain: 1.0,
            keyframe_interval: 1,
            extra: Vec::new(),
        }
    }
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct SuperResolutionOptions {
    /// GPU device id for the upscaling model
    #[arg(long, default_value_t = 0)]
    pub device: i32,

    /// Final size, WIDTHxHEIGHT
    #[arg(long)]
    pub dsize: Option<Dsize>,

    /// ONNX upscaling model; without one images are resized 2x with Lanczos3
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Extra KEY=VALUE option handed to the processing layer
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub extra: ExtraOptions,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct AbstractOptions {
    /// Canvas colour
    #[arg(long, default_value = "black", value_parser = parse_color)]
    pub color: Rgba<u8>,

    /// Contrast adjustment applied to the finished composition
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub contrast: f32,

    /// Canvas size, WIDTHxHEIGHT
    #[arg(long, default_value = "1920x1080")]
    pub dsize: Dsize,

    /// Maximum number of segments placed on the canvas
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Largest segments taken from each image
    #[arg(long, alias = "n_segments", default_value_t = 10)]
    pub n_segments: usize,

    /// Maximum random rotation of each segment, in degrees
    #[arg(long, default_value_t = 0.0, value_parser = parse_non_negative)]
    pub rotate: f32,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Extra KEY=VALUE option handed to the processing layer
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub extra: ExtraOptions,
}

impl Default for AbstractOptions {
    fn default() -> Self {
        Self {
            color: Rgba([0, 0, 0, 255]),
            contrast: 0.0,
            dsize: Dsize::new(1920, 1080),
            limit: 50,
            n_segments: 10,
            rotate: 0.0,
            seed: None,
            extra: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("mode=fast"),
            Ok(("mode".to_string(), "fast".to_string()))
        );
        assert_eq!(
            parse_key_val("expr=a=b"),
            Ok(("expr".to_string(), "a=b".to_string()))
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_parse_dsize() {
        assert_eq!("640x480".parse::<Dsize>(), Ok(Dsize::new(640, 480)));
        assert_eq!("640,480".parse::<Dsize>(), Ok(Dsize::new(640, 480)));
        assert!("640".parse::<Dsize>().is_err());
        assert!("0x480".parse::<Dsize>().is_err());
        assert!("axb".parse::<Dsize>().is_err());
        assert_eq!(Dsize::new(3, 4).to_string(), "3x4");
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#ff8000"), Ok(Rgba([255, 128, 0, 255])));
        assert_eq!(parse_color("00000080"), Ok(Rgba([0, 0, 0, 128])));
        assert_eq!(parse_color("White"), Ok(Rgba([255, 255, 255, 255])));
        assert!(parse_color("#12345").is_err());
        assert!(parse_color("#gggggg").is_err());
    }

    #[test]
    fn test_unit_interval() {
        assert_eq!(parse_unit_interval("0.25"), Ok(0.25));
        assert!(parse_unit_interval("1.5").is_err());
        assert!(parse_non_negative("-1").is_err());
    }

    #[test]
    fn test_default_fnames_do_not_collide() {
        let names: Vec<_> = (0..1000).map(|_| default_fname()).collect();
        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
        // Lexicographic order follows generation order.
        assert_eq!(unique, names);
    }

    #[test]
    fn test_default_dir_is_dated() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(
            default_dir(Path::new("dump"), &now),
            PathBuf::from("dump/2024-03-09")
        );
    }

    #[test]
    fn test_resolve_keeps_explicit_values() {
        let output = OutputArgs {
            dir: Some(PathBuf::from("out")),
            fname: Some("name".to_string()),
        };
        assert_eq!(
            output.resolve(Path::new("dump")),
            (PathBuf::from("out"), "name".to_string())
        );

        let (dir, fname) = OutputArgs::default().resolve(Path::new("dump"));
        assert!(dir.starts_with("dump"));
        assert!(!fname.is_empty());
    }
}
