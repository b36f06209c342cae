use std::io::Cursor;

use image::{imageops::FilterType, io::Reader as ImageReader};
use ndarray::Array4;

use crate::error::AppError;

/// Side length used when the model does not declare its spatial input size.
pub const DEFAULT_SIDE: u32 = 224;

/// Target (height, width) for a model whose input is declared as
/// `[batch, height, width, channels]`. Unknown rank or any dynamic spatial
/// dimension falls back to 224x224.
pub fn target_size(input_shape: Option<&[Option<i64>]>) -> (u32, u32) {
    let fallback = (DEFAULT_SIDE, DEFAULT_SIDE);
    let Some(dims) = input_shape else {
        return fallback;
    };
    if dims.len() != 4 {
        return fallback;
    }

    let side = |dim: Option<i64>| dim.filter(|&d| d > 0).and_then(|d| u32::try_from(d).ok());
    match (side(dims[1]), side(dims[2])) {
        (Some(height), Some(width)) => (height, width),
        _ => fallback,
    }
}

/// Decodes `image_data` and turns it into a `(1, height, width, 3)` tensor with
/// values scaled to [0, 1].
pub fn preprocess(image_data: &[u8], height: u32, width: u32) -> Result<Array4<f32>, AppError> {
    if image_data.is_empty() {
        return Err(AppError::client("Image file is empty"));
    }

    let img = ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| AppError::client(format!("Failed to read image: {}", e)))?
        .decode()
        .map_err(|e| AppError::client(format!("Image preprocessing failed: {}", e)))?;

    // Palette, grayscale and alpha images all end up as plain RGB.
    let rgb = img.to_rgb8();
    let resized = image::imageops::resize(&rgb, width, height, FilterType::Triangle);

    let values: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect();

    Array4::from_shape_vec((1, height as usize, width as usize, 3), values)
        .map_err(|e| AppError::Inference(format!("Failed to build input tensor: {}", e)))
}
