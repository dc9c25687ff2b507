use std::path::Path;

use crate::{
    errors::{CollagerError, Result},
    imageops_ai::{fit_within, pad_to_square, Position},
    traits::{MaskModel, SoftMask, Upscaler},
};
use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::debug;

/// Model size used when the network declares a dynamic spatial dimension.
const DEFAULT_MASK_SIZE: u32 = 1024;

fn model_error(operation: impl Into<String>, err: impl std::fmt::Display) -> CollagerError {
    CollagerError::Model {
        operation: operation.into(),
        source: err.to_string().into(),
    }
}

fn build_session(model_path: &Path, device_id: i32) -> Result<Session> {
    if !model_path.exists() {
        return Err(CollagerError::FileSystem {
            path: model_path.to_path_buf(),
            operation: "model lookup".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "model file not found"),
        });
    }

    SessionBuilder::new()
        .map_err(|e| model_error("session builder init", e))?
        .with_execution_providers([
            TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        ])
        .map_err(|e| model_error("execution provider setup", e))?
        .with_memory_pattern(true)
        .map_err(|e| model_error("memory pattern setup", e))?
        .commit_from_file(model_path)
        .map_err(|e| model_error(format!("loading {}", model_path.display()), e))
}

/// Name of the first input of a session. Results are always read from the first
/// output.
fn input_name(session: &Session) -> Result<String> {
    if session.outputs.is_empty() {
        return Err(model_error("output lookup", "model declares no outputs"));
    }
    session
        .inputs
        .first()
        .map(|input| input.name.clone())
        .ok_or_else(|| model_error("input lookup", "model declares no inputs"))
}

/// Foreground segmentation network run through ONNX Runtime.
pub struct OnnxMaskModel {
    pub image_size: u32,
    input_name: String,
    session: Mutex<Session>,
}

impl OnnxMaskModel {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        let mut session = build_session(model_path, device_id)?;
        let input_name = input_name(&session)?;

        let image_size = session.inputs[0]
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.get(2).copied())
            .filter(|&side| side > 0)
            .map_or(DEFAULT_MASK_SIZE, |side| side as u32);
        debug!(
            model = %model_path.display(),
            input = %input_name,
            image_size,
            "loaded mask model"
        );

        // warm up
        let data = Array4::<f32>::zeros((1, 3, image_size as usize, image_size as usize));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)?])
            .map_err(|e| model_error("warm-up run", e))?;

        Ok(Self {
            image_size,
            input_name,
            session: Mutex::new(session),
        })
    }

    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[0]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

impl MaskModel for OnnxMaskModel {
    fn predict_mask(&self, img: &DynamicImage) -> Result<SoftMask> {
        let (tensor, crop) = preprocess(img, self.image_size);
        let mask = self.predict(tensor.view())?;
        let (width, height) = img.dimensions();
        postprocess_mask(mask.view(), crop, width, height)
    }
}

/// Letterboxes an image into a `image_size` square NCHW tensor with values in 0..1.
///
/// Returns the tensor and the `[x, y, w, h]` region the image occupies in it.
pub fn preprocess(img: &DynamicImage, image_size: u32) -> (Array4<f32>, [u32; 4]) {
    let rgb = img.to_rgb8();
    let (w, h) = fit_within(rgb.width(), rgb.height(), image_size, image_size);
    let resized = imageops::resize(&rgb, w, h, FilterType::Triangle);
    let (square, (x, y)) = pad_to_square(&resized, Position::Center, Rgb([0, 0, 0]));
    let square = if square.width() == image_size {
        square
    } else {
        imageops::resize(&square, image_size, image_size, FilterType::Triangle)
    };

    let square = DynamicImage::ImageRgb8(square).into_rgb32f();
    let tensor = square
        .as_ndarray3()
        .insert_axis(Axis(0))
        .as_standard_layout()
        .into_owned();
    (tensor, [x, y, w, h])
}

/// Crops the letterboxed mask back to the image region and resizes it to the source size.
pub fn postprocess_mask(
    mask: ArrayView4<f32>,
    crop: [u32; 4],
    width: u32,
    height: u32,
) -> Result<SoftMask> {
    let (mask_h, mask_w) = (mask.shape()[2] as u32, mask.shape()[3] as u32);
    let plane = mask.slice(s![0, 0, .., ..]);
    let mask: SoftMask = ImageBuffer::from_raw(mask_w, mask_h, plane.iter().copied().collect())
        .ok_or_else(|| model_error("mask conversion", "mask buffer has the wrong length"))?;

    let [x, y, w, h] = crop;
    let x = x.min(mask_w.saturating_sub(1));
    let y = y.min(mask_h.saturating_sub(1));
    let w = w.clamp(1, mask_w - x);
    let h = h.clamp(1, mask_h - y);
    let cropped = mask.view(x, y, w, h).to_image();

    let mut resized = imageops::resize(&cropped, width, height, FilterType::Triangle);
    for pixel in resized.pixels_mut() {
        pixel[0] = pixel[0].clamp(0.0, 1.0);
    }
    Ok(resized)
}

/// Super-resolution network run through ONNX Runtime on whole images.
pub struct OnnxUpscaler {
    input_name: String,
    session: Mutex<Session>,
}

impl OnnxUpscaler {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        let session = build_session(model_path, device_id)?;
        let input_name = input_name(&session)?;
        debug!(model = %model_path.display(), input = %input_name, "loaded upscaling model");

        Ok(Self {
            input_name,
            session: Mutex::new(session),
        })
    }
}

impl Upscaler for OnnxUpscaler {
    fn upscale(&self, img: &RgbImage) -> Result<RgbImage> {
        let input = DynamicImage::ImageRgb8(img.clone()).into_rgb32f();
        let tensor = input
            .as_ndarray3()
            .insert_axis(Axis(0))
            .as_standard_layout()
            .into_owned();

        let output = {
            let mut binding = self.session.lock();
            let outputs = binding.run(ort::inputs![
                self.input_name.as_str() => TensorRef::from_array_view(&tensor)?
            ])?;
            outputs[0]
                .try_extract_array::<f32>()?
                .into_dimensionality::<Ix4>()?
                .to_owned()
        };

        if output.shape()[1] < 3 {
            return Err(model_error(
                "upscale output",
                format!("expected 3 channels, got shape {:?}", output.shape()),
            ));
        }
        let (out_h, out_w) = (output.shape()[2] as u32, output.shape()[3] as u32);
        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Ok(RgbImage::from_fn(out_w, out_h, |x, y| {
            let (x, y) = (x as usize, y as usize);
            Rgb([
                to_u8(output[[0, 0, y, x]]),
                to_u8(output[[0, 1, y, x]]),
                to_u8(output[[0, 2, y, x]]),
            ])
        }))
    }
}
