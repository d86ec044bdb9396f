use image::ImageFormat;
use std::io::Cursor;

use crate::shared::domain::errors::AppError;

/// Re-encode an uploaded image, dropping every metadata segment (GPS, camera,
/// timestamps). The caller replaces the original bytes with the result.
pub fn strip_image_metadata(bytes: &[u8]) -> Result<Vec<u8>, AppError> {
    let format = image::guess_format(bytes)
        .map_err(|_| AppError::Validation("unsupported image format".to_string()))?;

    let format = match format {
        ImageFormat::Jpeg | ImageFormat::Png => format,
        other => {
            return Err(AppError::Validation(format!(
                "unsupported image format: {other:?}"
            )))
        }
    };

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AppError::Validation(format!("invalid image: {e}")))?;

    let mut out = Cursor::new(Vec::with_capacity(bytes.len()));
    decoded
        .write_to(&mut out, format)
        .map_err(|e| AppError::Internal(format!("image re-encode failed: {e}")))?;
    Ok(out.into_inner())
}
