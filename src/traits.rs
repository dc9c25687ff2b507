use crate::errors::Result;
use image::{DynamicImage, ImageBuffer, Luma, RgbImage};

/// Soft foreground mask, one `f32` in `0.0..=1.0` per pixel.
pub type SoftMask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Predicts a foreground mask for an image.
///
/// The processing layer depends on this trait instead of a concrete ONNX session,
/// so tests can run it with a deterministic model.
pub trait MaskModel: Send + Sync {
    /// Mask with the same dimensions as `img`.
    fn predict_mask(&self, img: &DynamicImage) -> Result<SoftMask>;
}

/// Model-based image enlargement.
pub trait Upscaler: Send + Sync {
    fn upscale(&self, img: &RgbImage) -> Result<RgbImage>;
}

/// A sequence of decoded video frames that holds an external resource.
///
/// `close` must be safe to call more than once; implementations also release the
/// resource on drop.
pub trait FrameSource {
    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Frames per second of the source.
    fn frame_rate(&self) -> f64;

    fn close(&mut self);
}

