//! On-disk image encoding for the disk tier.
//!
//! # Design Decisions
//!
//! - **Lossless**: entries are stored as PNG so an image read back from disk is
//!   pixel-equal to the one that was stored. A lossy format would make the
//!   disk tier disagree with the memory tier after eviction.
//!
//! - **Color types**: 8 and 16 bit luma, luma-alpha, RGB and RGBA images are
//!   stored as-is. Floating point images have no PNG representation and are
//!   stored as 16 bit RGBA.

use std::io::Cursor;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageReader};

use crate::error::CacheError;

/// Encode an image as PNG.
///
/// # Errors
///
/// Returns [`CacheError::Encode`] if the encoder rejects the image.
pub fn encode_png(image: &DynamicImage) -> Result<Bytes, CacheError> {
    let converted;
    let image = match image {
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
            converted = DynamicImage::ImageRgba16(image.to_rgba16());
            &converted
        }
        other => other,
    };

    let mut output = Cursor::new(Vec::new());
    image
        .write_to(&mut output, ImageFormat::Png)
        .map_err(|e| CacheError::Encode(e.to_string()))?;

    Ok(Bytes::from(output.into_inner()))
}

/// Decode PNG bytes.
///
/// # Errors
///
/// Returns [`CacheError::Decode`] for truncated or otherwise invalid data.
pub fn decode_png(data: &[u8]) -> Result<DynamicImage, CacheError> {
    let reader = ImageReader::with_format(Cursor::new(data), ImageFormat::Png);
    reader
        .decode()
        .map_err(|e| CacheError::Decode(e.to_string()))
}
