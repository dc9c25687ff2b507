use image::{imageops, GenericImageView, ImageBuffer, Pixel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    TopLeft,
    Center,
}

/// Offset of a `width`x`height` image inside a `pad_width`x`pad_height` canvas.
pub fn to_position(
    width: u32,
    height: u32,
    pad_width: u32,
    pad_height: u32,
    position: Position,
) -> Option<(u32, u32)> {
    if width > pad_width || height > pad_height {
        return None;
    }

    Some(match position {
        Position::TopLeft => (0, 0),
        Position::Center => ((pad_width - width) / 2, (pad_height - height) / 2),
    })
}

/// Pads an image to a square canvas filled with `color`.
///
/// Returns the padded image and the offset of the original inside it.
pub fn pad_to_square<I, P>(
    image: &I,
    position: Position,
    color: P,
) -> (ImageBuffer<P, Vec<P::Subpixel>>, (u32, u32))
where
    I: GenericImageView<Pixel = P>,
    P: Pixel,
{
    let (width, height) = image.dimensions();
    let side = width.max(height);
    // A square of the longest side always holds the image.
    let (x, y) = to_position(width, height, side, side, position).unwrap_or((0, 0));

    let mut canvas = ImageBuffer::from_pixel(side, side, color);
    imageops::overlay(&mut canvas, image, i64::from(x), i64::from(y));
    (canvas, (x, y))
}

/// Largest size with the aspect ratio of `width`x`height` that fits in the bounds.
/// Never returns a zero dimension.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (max_width.max(1), max_height.max(1));
    }
    let scale = f64::min(
        f64::from(max_width) / f64::from(width),
        f64::from(max_height) / f64::from(height),
    );
    let fitted = |v: u32| ((f64::from(v) * scale).round() as u32).max(1);
    (fitted(width), fitted(height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_to_position() {
        assert_eq!(to_position(2, 4, 4, 4, Position::Center), Some((1, 0)));
        assert_eq!(to_position(2, 4, 4, 4, Position::TopLeft), Some((0, 0)));
        assert_eq!(to_position(5, 4, 4, 4, Position::Center), None);
    }

    #[test]
    fn test_pad_to_square_centers_image() {
        let image = RgbImage::from_pixel(2, 4, Rgb([255, 255, 255]));
        let (padded, offset) = pad_to_square(&image, Position::Center, Rgb([0, 0, 0]));

        assert_eq!(padded.dimensions(), (4, 4));
        assert_eq!(offset, (1, 0));
        assert_eq!(*padded.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*padded.get_pixel(1, 0), Rgb([255, 255, 255]));
        assert_eq!(*padded.get_pixel(3, 3), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_fit_within_keeps_aspect_ratio() {
        assert_eq!(fit_within(200, 100, 100, 100), (100, 50));
        assert_eq!(fit_within(100, 200, 100, 100), (50, 100));
        assert_eq!(fit_within(10, 10, 40, 20), (20, 20));
        assert_eq!(fit_within(1000, 1, 10, 10), (10, 1));
    }
}
