use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbaImage};
use thiserror::Error;

use crate::canvas::MaskBuffer;
use crate::ops::ai::RemoveBgError;
use crate::{log_info, log_warn};

/// File name offered when the result is exported.
pub const DEFAULT_EXPORT_NAME: &str = "sticker.png";

// ============================================================================
// ERRORS
// ============================================================================

/// An image could not be decoded.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl From<image::ImageError> for DecodeError {
    fn from(e: image::ImageError) -> Self {
        DecodeError(e.to_string())
    }
}

/// Which of the two session images a load error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadTarget {
    Source,
    Mask,
}

impl fmt::Display for LoadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadTarget::Source => write!(f, "source image"),
            LoadTarget::Mask => write!(f, "mask"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to decode {target}: {source}")]
    Decode {
        target: LoadTarget,
        source: DecodeError,
    },
    #[error("{target} has no pixels")]
    EmptyImage { target: LoadTarget },
    #[error(
        "mask is {mask_width}x{mask_height} but the source image is {source_width}x{source_height}"
    )]
    DimensionMismatch {
        source_width: u32,
        source_height: u32,
        mask_width: u32,
        mask_height: u32,
    },
    #[error("background removal failed: {0}")]
    BackgroundRemoval(#[from] RemoveBgError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("load was interrupted before it completed")]
    Aborted,
    #[error("another load is still pending")]
    Busy,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// DECODING
// ============================================================================

/// Turns encoded image bytes into RGBA pixels.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, DecodeError>;
}

/// Decoder backed by the `image` crate (PNG, JPEG, WEBP).
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, DecodeError> {
        Ok(image::load_from_memory(bytes)?.to_rgba8())
    }
}

/// Source pixels plus the mask built from the processed image's alpha.
pub struct LoadedImages {
    pub source: RgbaImage,
    pub mask: MaskBuffer,
}

fn decode_target(
    decoder: &dyn ImageDecoder,
    bytes: &[u8],
    target: LoadTarget,
) -> Result<RgbaImage, LoadError> {
    let img = decoder
        .decode(bytes)
        .map_err(|source| LoadError::Decode { target, source })?;
    if img.width() == 0 || img.height() == 0 {
        return Err(LoadError::EmptyImage { target });
    }
    Ok(img)
}

/// Decode the source image and the processed image, and check they line up.
///
/// The mask is the processed image itself; only its alpha channel matters
/// for compositing.
pub fn decode_pair(
    decoder: &dyn ImageDecoder,
    source_bytes: &[u8],
    mask_bytes: &[u8],
) -> Result<LoadedImages, LoadError> {
    let source = decode_target(decoder, source_bytes, LoadTarget::Source)?;
    let mask = decode_target(decoder, mask_bytes, LoadTarget::Mask)?;

    if source.dimensions() != mask.dimensions() {
        log_warn!(
            "Rejecting mask {}x{} for source {}x{}",
            mask.width(),
            mask.height(),
            source.width(),
            source.height()
        );
        return Err(LoadError::DimensionMismatch {
            source_width: source.width(),
            source_height: source.height(),
            mask_width: mask.width(),
            mask_height: mask.height(),
        });
    }

    log_info!("Decoded session images: {}x{}", source.width(), source.height());
    Ok(LoadedImages {
        source,
        mask: MaskBuffer::from_image(mask),
    })
}

/// Read a whole file for decoding.
pub fn read_image_bytes(path: &Path) -> Result<Vec<u8>, LoadError> {
    Ok(fs::read(path)?)
}

// ============================================================================
// EXPORT
// ============================================================================

fn write_png_to<W: Write>(image: &RgbaImage, writer: W) -> Result<(), ExportError> {
    PngEncoder::new(writer).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    Ok(())
}

/// Encode an RGBA image as PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ExportError> {
    let mut buf = Cursor::new(Vec::new());
    write_png_to(image, &mut buf)?;
    Ok(buf.into_inner())
}

/// Encode and write a PNG file.
/// Standalone (no `&self`) so it can run on a `rayon::spawn` worker.
pub fn write_png(image: &RgbaImage, path: &Path) -> Result<(), ExportError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_png_to(image, &mut writer)?;
    writer.flush()?;
    log_info!(
        "Exported {}x{} PNG to {}",
        image.width(),
        image.height(),
        path.display()
    );
    Ok(())
}
