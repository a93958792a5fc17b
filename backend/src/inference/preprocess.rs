use image::imageops::FilterType;
use image::{ImageFormat, ImageReader};
use ndarray::Array4;
use std::io::Cursor;

/// Batched NHWC tensor, `(1, size, size, 3)`, values in `[0, 1]`.
pub type ImageTensor = Array4<f32>;

pub const DEFAULT_TARGET_SIZE: u32 = 224;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Could not decode image: {0}")]
    DecodeError(String),
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
}

/// Pixel dimensions and container format, read without decoding the pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

fn supported_format(raw: &[u8]) -> Result<ImageFormat, PreprocessError> {
    let format =
        image::guess_format(raw).map_err(|e| PreprocessError::DecodeError(e.to_string()))?;
    match format {
        ImageFormat::Jpeg | ImageFormat::Png => Ok(format),
        other => Err(PreprocessError::UnsupportedFormat(format!("{:?}", other))),
    }
}

pub fn read_metadata(raw: &[u8]) -> Result<ImageMetadata, PreprocessError> {
    let format = supported_format(raw)?;
    let (width, height) = ImageReader::with_format(Cursor::new(raw), format)
        .into_dimensions()
        .map_err(|e| PreprocessError::DecodeError(e.to_string()))?;
    Ok(ImageMetadata {
        width,
        height,
        format: format!("{:?}", format).to_uppercase(),
    })
}

/// Decode, force RGB, stretch to `target_size` square with a bilinear filter,
/// scale to [0, 1] and add the batch axis.
pub fn preprocess(raw: &[u8], target_size: u32) -> Result<ImageTensor, PreprocessError> {
    let format = supported_format(raw)?;
    let decoded = image::load_from_memory_with_format(raw, format)
        .map_err(|e| PreprocessError::DecodeError(e.to_string()))?;

    let rgb = decoded.to_rgb8();
    let resized = image::imageops::resize(&rgb, target_size, target_size, FilterType::Triangle);

    let size = target_size as usize;
    let tensor = Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });
    Ok(tensor)
}
