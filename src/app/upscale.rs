use image::{imageops, imageops::FilterType, DynamicImage};

use crate::config::Dsize;
use crate::errors::Result;
use crate::traits::Upscaler;

/// Enlargement used when no upscaling model is configured.
const FALLBACK_SCALE: u32 = 2;

pub(super) fn super_resolve<U: Upscaler>(
    upscaler: Option<&U>,
    image: &DynamicImage,
    dsize: Option<Dsize>,
) -> Result<DynamicImage> {
    let rgb = image.to_rgb8();
    let upscaled = match upscaler {
        Some(upscaler) => upscaler.upscale(&rgb)?,
        None => imageops::resize(
            &rgb,
            rgb.width() * FALLBACK_SCALE,
            rgb.height() * FALLBACK_SCALE,
            FilterType::Lanczos3,
        ),
    };

    let resized = match dsize {
        Some(Dsize { width, height }) if (width, height) != upscaled.dimensions() => {
            imageops::resize(&upscaled, width, height, FilterType::Lanczos3)
        }
        _ => upscaled,
    };
    Ok(DynamicImage::ImageRgb8(resized))
}
