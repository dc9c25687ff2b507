use image::{DynamicImage, GenericImageView, GrayImage, Luma, RgbaImage};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::errors::{CollagerError, Result};
use crate::imageops_ai::cut_out;
use crate::traits::SoftMask;

/// One object cut out of an image.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Bounding-box crop with the mask as alpha.
    pub image: RgbaImage,
    /// Number of pixels belonging to the object.
    pub area: u32,
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: u32,
}

impl Bounds {
    const fn new(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            area: 0,
        }
    }

    fn include(&mut self, x: u32, y: u32) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.area += 1;
    }

    const fn region(&self) -> [u32; 4] {
        [
            self.min_x,
            self.min_y,
            self.max_x - self.min_x + 1,
            self.max_y - self.min_y + 1,
        ]
    }
}

/// Splits an image into its 8-connected foreground objects.
///
/// Pixels whose mask value is above `threshold` are foreground. Objects smaller than
/// `min_area` pixels are dropped. Segments come out in scan order of their first
/// pixel.
pub fn extract_segments(
    image: &DynamicImage,
    mask: &SoftMask,
    threshold: f32,
    min_area: u32,
) -> Result<Vec<Segment>> {
    if image.dimensions() != mask.dimensions() {
        return Err(CollagerError::validation(
            "mask",
            "does not match the image dimensions",
        ));
    }

    let binary = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y)[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    let mut bounds: Vec<Option<Bounds>> = Vec::new();
    for (x, y, Luma([label])) in labels.enumerate_pixels() {
        if *label == 0 {
            continue;
        }
        let index = *label as usize;
        if bounds.len() <= index {
            bounds.resize(index + 1, None);
        }
        bounds[index]
            .get_or_insert_with(|| Bounds::new(x, y))
            .include(x, y);
    }

    let rgb = image.to_rgb8();
    bounds
        .iter()
        .enumerate()
        .filter_map(|(label, b)| b.map(|b| (label as u32, b)))
        .filter(|(_, b)| b.area >= min_area)
        .map(|(label, b)| {
            let image = cut_out(&rgb, mask, b.region(), |x, y| {
                labels.get_pixel(x, y)[0] == label
            })?;
            Ok(Segment {
                image,
                area: b.area,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn mask_from(rows: &[&str]) -> SoftMask {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        SoftMask::from_fn(width, height, |x, y| {
            let on = rows[y as usize].as_bytes()[x as usize] == b'#';
            Luma([if on { 0.9 } else { 0.1 }])
        })
    }

    #[test]
    fn test_extract_segments_splits_objects() -> Result<()> {
        let mask = mask_from(&[
            "##....",
            "##...#",
            ".....#",
            ".#...#",
        ]);
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 4, Rgb([7, 8, 9])));

        let segments = extract_segments(&image, &mask, 0.5, 1)?;
        let summary: Vec<_> = segments
            .iter()
            .map(|s| (s.image.dimensions(), s.area))
            .collect();
        assert_eq!(summary, vec![((2, 2), 4), ((1, 3), 3), ((1, 1), 1)]);

        let first = &segments[0].image;
        assert_eq!(first.get_pixel(0, 0)[3], (0.9f32 * 255.0).round() as u8);
        Ok(())
    }

    #[test]
    fn test_extract_segments_applies_min_area() -> Result<()> {
        let mask = mask_from(&["##..", "##.#"]);
        let image = DynamicImage::new_rgb8(4, 2);

        let segments = extract_segments(&image, &mask, 0.5, 2)?;
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].area, 4);
        Ok(())
    }

    #[test]
    fn test_diagonal_pixels_are_connected() -> Result<()> {
        let mask = mask_from(&["#.", ".#"]);
        let image = DynamicImage::new_rgb8(2, 2);

        let segments = extract_segments(&image, &mask, 0.5, 1)?;
        assert_eq!(segments.len(), 1);
        // the off-diagonal pixels are outside the object
        assert_eq!(segments[0].image.get_pixel(1, 0)[3], 0);
        Ok(())
    }
}
