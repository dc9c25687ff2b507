use image::{GenericImageView, GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

use crate::errors::{CollagerError, Result};
use crate::traits::SoftMask;

/// Converts a soft mask to 8-bit grayscale.
pub fn quantize(mask: &SoftMask) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let Luma([value]) = *mask.get_pixel(x, y);
        Luma([(value.clamp(0.0, 1.0) * 255.0).round() as u8])
    })
}

/// Cuts the `[x, y, w, h]` region out of `image` as RGBA, using the mask as alpha.
///
/// Pixels for which `keep` returns false become fully transparent. `keep` receives
/// coordinates in the full image.
pub fn cut_out<F>(
    image: &RgbImage,
    mask: &SoftMask,
    region: [u32; 4],
    keep: F,
) -> Result<RgbaImage>
where
    F: Fn(u32, u32) -> bool,
{
    if image.dimensions() != mask.dimensions() {
        let (iw, ih) = image.dimensions();
        let (mw, mh) = mask.dimensions();
        return Err(CollagerError::validation(
            "mask",
            format!("is {mw}x{mh} but the image is {iw}x{ih}"),
        ));
    }

    let [x0, y0, w, h] = region;
    if x0.saturating_add(w) > image.width() || y0.saturating_add(h) > image.height() {
        return Err(CollagerError::validation(
            "region",
            format!("{w}x{h}+{x0}+{y0} lies outside the image"),
        ));
    }

    let view = image.view(x0, y0, w, h);
    Ok(RgbaImage::from_fn(w, h, |x, y| {
        let Rgb([red, green, blue]) = view.get_pixel(x, y);
        let (gx, gy) = (x0 + x, y0 + y);
        let alpha = if keep(gx, gy) {
            let Luma([value]) = *mask.get_pixel(gx, gy);
            (value.clamp(0.0, 1.0) * 255.0).round() as u8
        } else {
            0
        };
        Rgba([red, green, blue, alpha])
    }))
}
