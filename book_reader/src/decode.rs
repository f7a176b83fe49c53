//! Turning extracted page bytes into display-oriented pixels.

use std::io::Cursor;
use std::time::Instant;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};

use crate::config::DecodeLimits;
use crate::error::DecodeError;

/// A decoded page, ready for display. Shared read-only once built.
#[derive(Debug, Clone)]
pub struct DecodedPage {
    pub index: usize,
    /// Pixels already rotated/flipped into display orientation.
    pub image: DynamicImage,
    pub width: u32,
    pub height: u32,
    /// False when orientation metadata asked for a transform.
    pub natural_orientation: bool,
    pub decoded_at: Instant,
    /// Bytes the pixel buffer occupies; what the page cache accounts.
    pub byte_size: u64,
    pub format: ImageFormat,
}

/// Format hint for an entry name, from its extension.
pub fn format_hint(name: &str) -> Option<ImageFormat> {
    let (_, ext) = name.rsplit_once('.')?;
    ImageFormat::from_extension(ext)
}

/// Decode `raw` as page `index`.
///
/// The format is sniffed from the bytes; `hint` is only used when sniffing fails.
/// Limits are enforced before pixels are allocated.
pub fn decode(
    index: usize,
    raw: &[u8],
    hint: Option<ImageFormat>,
    limits: &DecodeLimits,
) -> Result<DecodedPage, DecodeError> {
    let mut reader = ImageReader::new(Cursor::new(raw))
        .with_guessed_format()
        .map_err(|e| DecodeError::Corrupt(e.to_string()))?;
    let format = match reader.format().or(hint) {
        Some(format) => format,
        None => {
            return Err(DecodeError::UnsupportedCodec(
                "unrecognised image data".to_string(),
            ));
        }
    };
    reader.set_format(format);
    reader.limits(limits.to_image_limits());

    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation().unwrap_or_else(|e| {
        log::debug!("Ignoring unreadable orientation of page {}: {}", index, e);
        Orientation::NoTransforms
    });
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);

    let page = DecodedPage {
        index,
        width: image.width(),
        height: image.height(),
        natural_orientation: orientation == Orientation::NoTransforms,
        decoded_at: Instant::now(),
        byte_size: image.as_bytes().len() as u64,
        format,
        image,
    };
    log::debug!(
        "Decoded page {} ({:?}, {}x{}, {} bytes)",
        index,
        format,
        page.width,
        page.height,
        page.byte_size
    );
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};

    fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x * 40) as u8, (y * 40) as u8, 128])
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    /// Splice an APP1 Exif segment (orientation 6, rotate 90°) right after SOI.
    fn with_exif_rotation(jpeg: &[u8]) -> Vec<u8> {
        let app1: &[u8] = &[
            0xFF, 0xE1, 0x00, 0x22, b'E', b'x', b'i', b'f', 0, 0, // header
            b'I', b'I', 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, // TIFF, IFD at 8
            0x01, 0x00, // one tag
            0x12, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, // no next IFD
        ];
        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_decode_png() {
        let raw = encode(4, 2, ImageFormat::Png);
        let page = decode(3, &raw, None, &DecodeLimits::default()).unwrap();
        assert_eq!(page.index, 3);
        assert_eq!((page.width, page.height), (4, 2));
        assert_eq!(page.byte_size, 4 * 2 * 3);
        assert_eq!(page.format, ImageFormat::Png);
        assert!(page.natural_orientation);
    }

    #[test]
    fn test_exif_orientation_is_applied() {
        let raw = with_exif_rotation(&encode(4, 2, ImageFormat::Jpeg));
        let page = decode(0, &raw, Some(ImageFormat::Jpeg), &DecodeLimits::default()).unwrap();
        assert_eq!((page.width, page.height), (2, 4));
        assert!(!page.natural_orientation);
    }

    #[test]
    fn test_unrecognised_bytes() {
        let err = decode(0, b"definitely not pixels", None, &DecodeLimits::default())
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedCodec(_)));
    }

    #[test]
    fn test_truncated_png_is_corrupt() {
        let raw = encode(16, 16, ImageFormat::Png);
        let err = decode(0, &raw[..raw.len() / 2], None, &DecodeLimits::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt(_)), "{err:?}");
    }

    #[test]
    fn test_limits() {
        let raw = encode(64, 8, ImageFormat::Png);
        let limits = DecodeLimits {
            max_width: 32,
            ..Default::default()
        };
        let err = decode(0, &raw, None, &limits).unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge(_)), "{err:?}");
    }

    #[test]
    fn test_format_hint() {
        assert_eq!(format_hint("ch1/01.JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(format_hint("noext"), None);
    }
}
