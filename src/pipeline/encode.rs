//! Raster helpers: JPEG encoding and image dimension probing.
//!
//! Rendered pages travel as JPEG. Tables and scanned text survive quality 80
//! at 2× scale well, and the payload stays far below the request size limit
//! even with twenty pages in one request.

use crate::error::DocMorphError;
use crate::types::EncodedImage;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::debug;

pub const JPEG_MIME: &str = "image/jpeg";

/// Encode an image as baseline JPEG at `quality` (1–100). Alpha is dropped.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<EncodedImage, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(&rgb)?;
    debug!(
        "Encoded {}x{} image → {} bytes JPEG (q={})",
        rgb.width(),
        rgb.height(),
        buf.len(),
        quality
    );
    Ok(EncodedImage::new(buf, JPEG_MIME))
}

/// Pixel dimensions and format of an encoded image, read from its header.
pub fn probe(data: &[u8]) -> Result<(u32, u32, Option<ImageFormat>), image::ImageError> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    let format = reader.format();
    let (w, h) = reader.into_dimensions()?;
    Ok((w, h, format))
}

/// Probe on the blocking pool; decoding headers of large TIFFs can be slow.
pub async fn probe_async(name: String, data: Vec<u8>) -> Result<(u32, u32), DocMorphError> {
    tokio::task::spawn_blocking(move || {
        probe(&data)
            .map(|(w, h, _)| (w, h))
            .map_err(|e| DocMorphError::UnsupportedFormat {
                file: name,
                reason: format!("unreadable image: {e}"),
            })
    })
    .await
    .map_err(|e| DocMorphError::Internal(format!("Probe task panicked: {}", e)))?
}

/// Decode any supported raster format.
pub fn decode(data: &[u8]) -> Result<DynamicImage, image::ImageError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_small_image() {
        let data = encode_jpeg(&red(10, 6), 80).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/jpeg");
        assert_eq!(&data.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn lower_quality_is_smaller() {
        let mut img = RgbaImage::new(64, 64);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgba([(x * 4) as u8, (y * 4) as u8, ((x ^ y) * 8) as u8, 255]);
        }
        let img = DynamicImage::ImageRgba8(img);
        let hi = encode_jpeg(&img, 95).unwrap();
        let lo = encode_jpeg(&img, 20).unwrap();
        assert!(lo.data.len() < hi.data.len());
    }

    #[test]
    fn probe_reads_dimensions() {
        let jpeg = encode_jpeg(&red(31, 17), 80).unwrap();
        let (w, h, fmt) = probe(&jpeg.data).unwrap();
        assert_eq!((w, h), (31, 17));
        assert_eq!(fmt, Some(ImageFormat::Jpeg));
    }

    #[tokio::test]
    async fn probe_async_rejects_garbage() {
        let err = probe_async("x.png".into(), b"not an image".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, DocMorphError::UnsupportedFormat { .. }));
    }
}
