use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageError, ImageReader};
use ndarray::Array4;
use std::io::Cursor;

use super::InferenceError;

/// Decodes an uploaded image into a `1 x size x size x 3` RGB batch in [0, 1].
///
/// The image is resized directly to `size x size` with bilinear filtering,
/// ignoring aspect ratio. Decoding goes through `image`, which already yields
/// RGB channel order, so no channel swap is applied. EXIF orientation is
/// applied before resizing, so camera uploads are upright.
pub fn preprocess(bytes: &[u8], size: u32) -> Result<Array4<f32>, InferenceError> {
    if bytes.is_empty() {
        return Err(InferenceError::EmptyImage);
    }

    let decoded = decode_upright(bytes)?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(InferenceError::EmptyImage);
    }

    let rgb = decoded
        .resize_exact(size, size, FilterType::Triangle)
        .into_rgb8();

    let side = size as usize;
    let pixels: Vec<f32> = rgb
        .into_raw()
        .into_iter()
        .map(|v| f32::from(v) / 255.0)
        .collect();

    Array4::from_shape_vec((1, side, side, 3), pixels)
        .map_err(|e| InferenceError::Preprocessing(e.to_string()))
}

fn decode_upright(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::IoError)?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut decoded = DynamicImage::from_decoder(decoder)?;
    decoded.apply_orientation(orientation);
    Ok(decoded)
}
