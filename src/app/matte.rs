use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use tracing::info;

use crate::config::AlphaMatteOptions;
use crate::errors::Result;
use crate::traits::{FrameSource, MaskModel, SoftMask};

/// Turns a soft mask into an 8-bit matte: values under the confidence threshold are
/// cleared, the rest scaled by `gain`, then the matte is optionally blurred.
pub fn refine(mask: &SoftMask, options: &AlphaMatteOptions) -> GrayImage {
    let matte = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let value = mask.get_pixel(x, y)[0];
        let value = if value < options.confidence_threshold {
            0.0
        } else {
            (value * options.gain).clamp(0.0, 1.0)
        };
        Luma([(value * 255.0).round() as u8])
    });

    if options.blur > 0.0 {
        gaussian_blur_f32(&matte, options.blur)
    } else {
        matte
    }
}

pub(super) fn alpha_matte<M: MaskModel>(
    masker: &M,
    frames: &mut dyn FrameSource,
    options: &AlphaMatteOptions,
    sink: &mut dyn FnMut(GrayImage) -> Result<()>,
) -> Result<usize> {
    let interval = options.keyframe_interval.max(1) as usize;
    let mut count = 0;
    let mut last: Option<GrayImage> = None;

    while let Some(frame) = frames.next_frame()? {
        let index = count;
        let stale = last
            .as_ref()
            .map_or(true, |matte| matte.dimensions() != frame.dimensions());

        let matte = match last.take() {
            Some(matte) if !stale && index % interval != 0 => matte,
            _ => {
                let mask = masker.predict_mask(&DynamicImage::ImageRgb8(frame))?;
                refine(&mask, options)
            }
        };
        sink(matte.clone())?;
        last = Some(matte);
        count += 1;

        if (index + 1) % 100 == 0 {
            info!("processed {} frames", index + 1);
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockFrameSource, MockMaskModel};
    use image::{Rgb, RgbImage};

    fn options() -> AlphaMatteOptions {
        AlphaMatteOptions::default()
    }

    fn collect<M: MaskModel>(
        model: &M,
        source: &mut MockFrameSource,
        options: &AlphaMatteOptions,
    ) -> Result<Vec<GrayImage>> {
        let mut mattes = Vec::new();
        let count = alpha_matte(model, source, options, &mut |m| {
            mattes.push(m);
            Ok(())
        })?;
        assert_eq!(count, mattes.len());
        Ok(mattes)
    }

    #[test]
    fn test_refine_threshold_and_gain() {
        let mask = SoftMask::from_raw(4, 1, vec![0.05, 0.2, 0.5, 0.9]).unwrap();
        let options = AlphaMatteOptions {
            confidence_threshold: 0.1,
            gain: 2.0,
            ..options()
        };
        assert_eq!(refine(&mask, &options).into_raw(), vec![0, 102, 255, 255]);
    }

    #[test]
    fn test_refine_blur_softens_edges() {
        let mut mask = SoftMask::new(9, 9);
        mask.put_pixel(4, 4, Luma([1.0]));
        let options = AlphaMatteOptions {
            blur: 1.0,
            ..options()
        };
        let matte = refine(&mask, &options);
        assert!(matte.get_pixel(4, 4)[0] < 255);
        assert!(matte.get_pixel(5, 4)[0] > 0);
    }

    #[test]
    fn test_keyframe_interval_reuses_masks() -> Result<()> {
        let model = MockMaskModel::new();
        let frames = (0..7)
            .map(|i| RgbImage::from_pixel(4, 4, Rgb([i * 30, i * 30, i * 30])))
            .collect();
        let mut source = MockFrameSource::new(frames, 25.0);
        let options = AlphaMatteOptions {
            keyframe_interval: 3,
            confidence_threshold: 0.0,
            ..options()
        };

        let mattes = collect(&model, &mut source, &options)?;
        assert_eq!(mattes.len(), 7);
        // frames 0, 3 and 6 go through the model
        assert_eq!(model.calls(), 3);
        let values: Vec<u8> = mattes
            .iter()
            .map(|m| m.get_pixel(0, 0)[0])
            .collect();
        assert_eq!(values, vec![0, 0, 0, 90, 90, 90, 180]);
        Ok(())
    }

    #[test]
    fn test_size_change_forces_prediction() -> Result<()> {
        let model = MockMaskModel::new();
        let frames = vec![RgbImage::new(4, 4), RgbImage::new(6, 6)];
        let mut source = MockFrameSource::new(frames, 25.0);
        let options = AlphaMatteOptions {
            keyframe_interval: 10,
            ..options()
        };

        let mattes = collect(&model, &mut source, &options)?;
        assert_eq!(model.calls(), 2);
        assert_eq!(mattes[1].width(), 6);
        Ok(())
    }

    #[test]
    fn test_sink_error_stops_reading() {
        let model = MockMaskModel::new();
        let frames = vec![RgbImage::new(2, 2); 5];
        let mut source = MockFrameSource::new(frames, 25.0);

        let mut seen = 0;
        let result = alpha_matte(&model, &mut source, &options(), &mut |_| {
            seen += 1;
            Err(crate::errors::CollagerError::validation("video", "encoder gone"))
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
        assert_eq!(model.calls(), 1);
    }
}
