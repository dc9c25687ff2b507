//! The processing layer: every command's media transformation.

mod collage;
mod composition;
mod matte;
mod segment;
mod upscale;

use std::path::Path;

use image::{imageops, DynamicImage, GrayImage, Rgba, RgbaImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::adapter::Adapter;
use crate::cli::Command;
use crate::config::{
    AbstractOptions, AlphaMatteOptions, CollageOptions, ExtraOptions, MaskOptions, SegmentOptions,
    SuperResolutionOptions,
};
use crate::errors::{CollagerError, Result};
use crate::imageops_ai::quantize;
use crate::model::{OnnxMaskModel, OnnxUpscaler};
use crate::traits::{FrameSource, MaskModel, Upscaler};

pub use collage::grid;
pub use matte::refine;
pub use segment::{extract_segments, Segment};

/// Media transformations behind the command line, one per command.
///
/// Options arrive exactly as parsed, including any extra `KEY=VALUE` pairs.
pub trait App {
    fn collage(&self, images: &[DynamicImage], options: &CollageOptions) -> Result<DynamicImage>;

    fn segment(
        &self,
        images: &[DynamicImage],
        options: &SegmentOptions,
    ) -> Result<Vec<DynamicImage>>;

    fn masks(&self, images: &[DynamicImage], options: &MaskOptions) -> Result<Vec<DynamicImage>>;

    /// Hands one matte per frame read from `frames` to `sink`, in order, and
    /// returns how many were produced. Does not close the source.
    fn alpha_matte(
        &self,
        frames: &mut dyn FrameSource,
        options: &AlphaMatteOptions,
        sink: &mut dyn FnMut(GrayImage) -> Result<()>,
    ) -> Result<usize>;

    fn super_resolution(
        &self,
        images: &[DynamicImage],
        options: &SuperResolutionOptions,
    ) -> Result<Vec<DynamicImage>>;

    fn abstract_composition(
        &self,
        images: &[DynamicImage],
        options: &AbstractOptions,
    ) -> Result<DynamicImage>;
}

/// Default [`App`]: image operations plus an optional mask model and upscaler.
pub struct Studio<M = OnnxMaskModel, U = OnnxUpscaler> {
    masker: Option<M>,
    upscaler: Option<U>,
}

impl<M: MaskModel, U: Upscaler> Studio<M, U> {
    pub const fn new(masker: Option<M>, upscaler: Option<U>) -> Self {
        Self { masker, upscaler }
    }

    fn masker(&self) -> Result<&M> {
        self.masker
            .as_ref()
            .ok_or_else(|| CollagerError::Configuration {
                message: "this command needs a mask model; pass --model-path or set SUPERCOLLAGER_MODEL"
                    .to_string(),
            })
    }

    fn segments_per_image(
        &self,
        images: &[DynamicImage],
        threshold: f32,
        min_area: u32,
    ) -> Result<Vec<Vec<Segment>>> {
        let masker = self.masker()?;
        let progress_bar = progress_bar(images.len(), "segmenting")?;
        let segments = images
            .par_iter()
            .map(|image| {
                let mask = masker.predict_mask(image)?;
                let segments = extract_segments(image, &mask, threshold, min_area);
                progress_bar.inc(1);
                segments
            })
            .collect::<Result<Vec<_>>>()?;
        progress_bar.finish_and_clear();
        Ok(segments)
    }
}

impl Studio<OnnxMaskModel, OnnxUpscaler> {
    /// Loads only the models `command` uses.
    pub fn for_command(command: &Command, model_path: Option<&Path>, device_id: i32) -> Result<Self> {
        let needs_masker = matches!(
            command,
            Command::Segment(_) | Command::Masks(_) | Command::AlphaMatte(_) | Command::Abstract(_)
        );
        let masker = match model_path {
            Some(path) if needs_masker => Some(OnnxMaskModel::new(path, device_id)?),
            _ => None,
        };
        let upscaler = match command {
            Command::SuperResolution(args) => args
                .options
                .model
                .as_deref()
                .map(|path| OnnxUpscaler::new(path, args.options.device))
                .transpose()?,
            _ => None,
        };
        Ok(Self::new(masker, upscaler))
    }
}

impl<M: MaskModel, U: Upscaler> App for Studio<M, U> {
    fn collage(&self, images: &[DynamicImage], options: &CollageOptions) -> Result<DynamicImage> {
        log_extra("collage", &options.extra);
        let background = options
            .background
            .as_deref()
            .map(Adapter::load_one)
            .transpose()?;
        let mut rng = rng(options.seed);
        collage::collage(images, background.as_ref(), options, &mut rng)
    }

    fn segment(
        &self,
        images: &[DynamicImage],
        options: &SegmentOptions,
    ) -> Result<Vec<DynamicImage>> {
        log_extra("segment", &options.extra);
        let mut rng = rng(options.seed);
        let mut segments: Vec<DynamicImage> = self
            .segments_per_image(images, options.threshold, options.min_area)?
            .into_iter()
            .flatten()
            .map(|segment| {
                DynamicImage::ImageRgba8(rotate_randomly(&segment.image, options.rotate, &mut rng))
            })
            .collect();
        if options.shuffle {
            use rand::seq::SliceRandom;
            segments.shuffle(&mut rng);
        }
        Ok(segments)
    }

    fn masks(&self, images: &[DynamicImage], options: &MaskOptions) -> Result<Vec<DynamicImage>> {
        log_extra("masks", &options.extra);
        let masker = self.masker()?;
        let progress_bar = progress_bar(images.len(), "masking")?;
        let masks = images
            .par_iter()
            .map(|image| {
                let mask = masker.predict_mask(image)?;
                progress_bar.inc(1);
                Ok(DynamicImage::ImageLuma8(quantize(&mask)))
            })
            .collect::<Result<Vec<_>>>()?;
        progress_bar.finish_and_clear();
        Ok(masks)
    }

    fn alpha_matte(
        &self,
        frames: &mut dyn FrameSource,
        options: &AlphaMatteOptions,
        sink: &mut dyn FnMut(GrayImage) -> Result<()>,
    ) -> Result<usize> {
        log_extra("alpha_matte", &options.extra);
        matte::alpha_matte(self.masker()?, frames, options, sink)
    }

    fn super_resolution(
        &self,
        images: &[DynamicImage],
        options: &SuperResolutionOptions,
    ) -> Result<Vec<DynamicImage>> {
        log_extra("super_resolution", &options.extra);
        if self.upscaler.is_none() {
            info!("no upscaling model configured, resizing with Lanczos3");
        }
        let progress_bar = progress_bar(images.len(), "upscaling")?;
        let upscaled = images
            .par_iter()
            .map(|image| {
                let upscaled = upscale::super_resolve(self.upscaler.as_ref(), image, options.dsize);
                progress_bar.inc(1);
                upscaled
            })
            .collect::<Result<Vec<_>>>()?;
        progress_bar.finish_and_clear();
        Ok(upscaled)
    }

    fn abstract_composition(
        &self,
        images: &[DynamicImage],
        options: &AbstractOptions,
    ) -> Result<DynamicImage> {
        log_extra("abstract", &options.extra);
        let defaults = SegmentOptions::default();
        let pool: Vec<Segment> = self
            .segments_per_image(images, defaults.threshold, defaults.min_area)?
            .into_iter()
            .flat_map(|mut segments| {
                segments.sort_by(|a, b| b.area.cmp(&a.area));
                segments.truncate(options.n_segments);
                segments
            })
            .collect();
        let mut rng = rng(options.seed);
        composition::compose(pool, options, &mut rng)
    }
}

fn log_extra(command: &str, extra: &ExtraOptions) {
    for (key, value) in extra {
        debug!(command, key = %key, value = %value, "extra option");
    }
}

fn rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
}

fn progress_bar(len: usize, label: &str) -> Result<ProgressBar> {
    let progress_bar = ProgressBar::new(len as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(&format!(
            "{{spinner:.green}} [{{elapsed}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {label}"
        ))
        .map_err(|e| CollagerError::Configuration {
            message: e.to_string(),
        })?
        .progress_chars("#>-"),
    );
    Ok(progress_bar)
}

/// Rotates by a random angle in `[-max_degrees, max_degrees]` on a canvas large
/// enough to keep the corners; the new area is transparent.
pub(crate) fn rotate_randomly<R: Rng>(image: &RgbaImage, max_degrees: f32, rng: &mut R) -> RgbaImage {
    if max_degrees <= 0.0 {
        return image.clone();
    }
    let degrees = rng.gen_range(-max_degrees..=max_degrees);

    let (width, height) = image.dimensions();
    let side = f64::from(width).hypot(f64::from(height)).ceil() as u32;
    let mut canvas = RgbaImage::from_pixel(side, side, Rgba([0, 0, 0, 0]));
    imageops::overlay(
        &mut canvas,
        image,
        i64::from((side - width) / 2),
        i64::from((side - height) / 2),
    );
    rotate_about_center(
        &canvas,
        degrees.to_radians(),
        Interpolation::Bilinear,
        Rgba([0, 0, 0, 0]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockMaskModel, MockUpscaler};
    use image::{GenericImageView, Rgb, RgbImage};

    fn studio() -> Studio<MockMaskModel, MockUpscaler> {
        Studio::new(Some(MockMaskModel::new()), None)
    }

    fn two_blobs() -> DynamicImage {
        let mut img = RgbImage::from_pixel(40, 20, Rgb([0, 0, 0]));
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            if (2..12).contains(&x) && (2..12).contains(&y) {
                *pixel = Rgb([255, 255, 255]);
            }
            if (20..38).contains(&x) && (5..15).contains(&y) {
                *pixel = Rgb([255, 255, 255]);
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_rotate_randomly_without_angle_is_identity() {
        let image = RgbaImage::from_pixel(3, 5, Rgba([1, 2, 3, 255]));
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(rotate_randomly(&image, 0.0, &mut rng), image);
    }

    #[test]
    fn test_rotate_randomly_expands_canvas() {
        let image = RgbaImage::from_pixel(30, 40, Rgba([1, 2, 3, 255]));
        let mut rng = StdRng::seed_from_u64(1);
        let rotated = rotate_randomly(&image, 45.0, &mut rng);
        assert_eq!(rotated.dimensions(), (50, 50));
    }

    #[test]
    fn test_mask_commands_need_a_model() {
        let studio: Studio<MockMaskModel, MockUpscaler> = Studio::new(None, None);
        let err = studio
            .masks(&[two_blobs()], &MaskOptions::default())
            .unwrap_err();
        assert!(matches!(err, CollagerError::Configuration { .. }));
    }

    #[test]
    fn test_masks_match_input_size() -> Result<()> {
        let masks = studio().masks(&[two_blobs()], &MaskOptions::default())?;
        assert_eq!(masks.len(), 1);
        assert_eq!(masks[0].dimensions(), (40, 20));
        assert_eq!(masks[0].as_luma8().map(|m| m.get_pixel(5, 5)[0]), Some(255));
        Ok(())
    }

    #[test]
    fn test_segment_finds_each_blob() -> Result<()> {
        let options = SegmentOptions {
            min_area: 10,
            ..SegmentOptions::default()
        };
        let segments = studio().segment(&[two_blobs()], &options)?;
        let sizes: Vec<_> = segments.iter().map(|s| s.dimensions()).collect();
        assert_eq!(sizes, vec![(10, 10), (18, 10)]);
        Ok(())
    }

    #[test]
    fn test_segment_shuffle_is_seeded() -> Result<()> {
        let options = SegmentOptions {
            min_area: 1,
            shuffle: true,
            seed: Some(7),
            ..SegmentOptions::default()
        };
        let first = studio().segment(&[two_blobs(), two_blobs()], &options)?;
        let second = studio().segment(&[two_blobs(), two_blobs()], &options)?;
        let sizes = |v: &[DynamicImage]| v.iter().map(|s| s.dimensions()).collect::<Vec<_>>();
        assert_eq!(first.len(), 4);
        assert_eq!(sizes(&first), sizes(&second));
        Ok(())
    }

    #[test]
    fn test_abstract_uses_canvas_size() -> Result<()> {
        let options = AbstractOptions {
            dsize: crate::config::Dsize::new(64, 48),
            seed: Some(3),
            ..AbstractOptions::default()
        };
        let composition = studio().abstract_composition(&[two_blobs()], &options)?;
        assert_eq!(composition.dimensions(), (64, 48));
        Ok(())
    }

    #[test]
    fn test_super_resolution_falls_back_to_resize() -> Result<()> {
        let images = [DynamicImage::new_rgb8(10, 6)];
        let upscaled = studio().super_resolution(&images, &SuperResolutionOptions::default())?;
        assert_eq!(upscaled[0].dimensions(), (20, 12));
        Ok(())
    }

    #[test]
    fn test_super_resolution_uses_upscaler() -> Result<()> {
        let studio = Studio::new(Some(MockMaskModel::new()), Some(MockUpscaler::new(3)));
        let images = [DynamicImage::new_rgb8(10, 6)];
        let upscaled = studio.super_resolution(&images, &SuperResolutionOptions::default())?;
        assert_eq!(upscaled[0].dimensions(), (30, 18));
        Ok(())
    }
}
