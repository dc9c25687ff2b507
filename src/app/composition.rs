use image::{imageops, imageops::FilterType, DynamicImage, RgbaImage};
use rand::{seq::SliceRandom, Rng};
use tracing::debug;

use super::{rotate_randomly, Segment};
use crate::config::AbstractOptions;
use crate::errors::{CollagerError, Result};
use crate::imageops_ai::fit_within;

/// Scatters segments over a plain canvas.
///
/// The pool is shuffled and cut to `limit`. Segments larger than half the canvas
/// are shrunk first, then rotated and placed at random.
pub(super) fn compose<R: Rng>(
    mut pool: Vec<Segment>,
    options: &AbstractOptions,
    rng: &mut R,
) -> Result<DynamicImage> {
    if pool.is_empty() || options.limit == 0 || options.n_segments == 0 {
        return Err(CollagerError::validation(
            "segments",
            "none were found to compose",
        ));
    }
    pool.shuffle(rng);
    pool.truncate(options.limit);

    let (width, height) = (options.dsize.width, options.dsize.height);
    let (max_width, max_height) = ((width / 2).max(1), (height / 2).max(1));
    let mut canvas = RgbaImage::from_pixel(width, height, options.color);
    debug!(segments = pool.len(), dsize = %options.dsize, "composing");

    for segment in &pool {
        let piece = &segment.image;
        let piece = if piece.width() > max_width || piece.height() > max_height {
            let (w, h) = fit_within(piece.width(), piece.height(), max_width, max_height);
            imageops::resize(piece, w, h, FilterType::Lanczos3)
        } else {
            piece.clone()
        };
        let piece = rotate_randomly(&piece, options.rotate, rng);

        let x = rng.gen_range(0..=width.saturating_sub(piece.width()));
        let y = rng.gen_range(0..=height.saturating_sub(piece.height()));
        imageops::overlay(&mut canvas, &piece, i64::from(x), i64::from(y));
    }

    if options.contrast != 0.0 {
        canvas = imageops::contrast(&canvas, options.contrast);
    }
    Ok(DynamicImage::ImageRgba8(canvas))
}
