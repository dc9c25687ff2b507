use image::{imageops, imageops::FilterType, DynamicImage, RgbaImage};
use rand::{seq::SliceRandom, Rng};
use tracing::debug;

use super::rotate_randomly;
use crate::config::CollageOptions;
use crate::errors::{CollagerError, Result};
use crate::imageops_ai::fit_within;

/// Upper bound for one grid cell, in pixels per side.
const MAX_CELL_SIZE: u32 = 1024;

/// Columns and rows of the smallest near-square grid holding `count` tiles.
pub fn grid(count: usize) -> (u32, u32) {
    if count == 0 {
        return (0, 0);
    }
    let cols = (count as f64).sqrt().ceil() as usize;
    let rows = count.div_ceil(cols);
    (cols as u32, rows as u32)
}

pub(super) fn collage<R: Rng>(
    images: &[DynamicImage],
    background: Option<&DynamicImage>,
    options: &CollageOptions,
    rng: &mut R,
) -> Result<DynamicImage> {
    if images.is_empty() {
        return Err(CollagerError::validation(
            "inputs",
            "must contain at least one image",
        ));
    }

    let mut tiles: Vec<RgbaImage> = images.iter().map(DynamicImage::to_rgba8).collect();
    if options.shuffle {
        tiles.shuffle(rng);
    }
    let tiles: Vec<RgbaImage> = tiles
        .iter()
        .map(|tile| rotate_randomly(tile, options.rotate, rng))
        .collect();

    let cell_width = tiles.iter().map(RgbaImage::width).max().unwrap_or(1);
    let cell_height = tiles.iter().map(RgbaImage::height).max().unwrap_or(1);
    let (cell_width, cell_height) = if cell_width > MAX_CELL_SIZE || cell_height > MAX_CELL_SIZE {
        fit_within(cell_width, cell_height, MAX_CELL_SIZE, MAX_CELL_SIZE)
    } else {
        (cell_width, cell_height)
    };

    let (cols, rows) = grid(tiles.len());
    let (width, height) = (cols * cell_width, rows * cell_height);
    debug!(cols, rows, cell_width, cell_height, "collage layout");

    let mut canvas = match background {
        Some(background) => background
            .resize_to_fill(width, height, FilterType::Lanczos3)
            .to_rgba8(),
        None => RgbaImage::from_pixel(width, height, options.color),
    };

    for (index, tile) in tiles.iter().enumerate() {
        let (tile_width, tile_height) =
            fit_within(tile.width(), tile.height(), cell_width, cell_height);
        let fitted;
        let tile = if (tile_width, tile_height) == tile.dimensions() {
            tile
        } else {
            fitted = imageops::resize(tile, tile_width, tile_height, FilterType::Lanczos3);
            &fitted
        };

        let col = index as u32 % cols;
        let row = index as u32 / cols;
        let x = col * cell_width + (cell_width - tile_width) / 2;
        let y = row * cell_height + (cell_height - tile_height) / 2;
        imageops::overlay(&mut canvas, tile, i64::from(x), i64::from(y));
    }

    if options.contrast != 0.0 {
        canvas = imageops::contrast(&canvas, options.contrast);
    }
    Ok(DynamicImage::ImageRgba8(canvas))
}
