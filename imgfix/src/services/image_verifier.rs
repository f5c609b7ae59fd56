//! Structural image verification
//!
//! Cheap integrity pass: sniff the format, decode the header through the
//! `image` crate, then walk the container to catch truncation and corruption
//! markers. Pixel data is never decoded.
//!
//! Container checks:
//! - PNG: signature, every chunk's CRC-32, `IEND` present
//! - JPEG: SOI at start, EOI somewhere after the first scan (trailing data tolerated)
//! - WebP: RIFF size field matches the file length
//! - GIF: trailer byte at end
//! - Other formats the header decoder accepts: header only
//!
//! Failures are split in two classes. [`VerifyError::Corrupt`] covers everything
//! a damaged or missing file produces (I/O errors, unknown format, header decode
//! failures, container damage). [`VerifyError::Unrecognized`] covers failure
//! modes that do not indicate damage (decoder limits, parameter errors) and must
//! not be silently treated as "corrupt".

use image::error::ImageError;
use image::{ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Why a file counts as corrupt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptionKind {
    /// File does not exist
    Missing,
    /// Any other I/O failure while reading
    Io,
    /// Content does not look like a known image format
    UnknownFormat,
    /// Header could not be decoded
    Header,
    /// Container structure damaged (truncation, checksum, markers)
    Container,
}

/// Verification failure
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Recognized damage: the file should be repaired
    #[error("{kind:?}: {detail}")]
    Corrupt { kind: CorruptionKind, detail: String },

    /// Failure that does not indicate damage
    #[error("unrecognized verification failure: {0}")]
    Unrecognized(String),
}

impl VerifyError {
    fn corrupt(kind: CorruptionKind, detail: impl Into<String>) -> Self {
        VerifyError::Corrupt {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, VerifyError::Corrupt { .. })
    }
}

/// Verify the image stored at `path`
pub fn verify_image(path: &Path) -> Result<ImageFormat, VerifyError> {
    let bytes = std::fs::read(path).map_err(|e| {
        let kind = if e.kind() == std::io::ErrorKind::NotFound {
            CorruptionKind::Missing
        } else {
            CorruptionKind::Io
        };
        VerifyError::corrupt(kind, e.to_string())
    })?;
    verify_bytes(&bytes)
}

/// Verify an in-memory image
pub fn verify_bytes(bytes: &[u8]) -> Result<ImageFormat, VerifyError> {
    if bytes.is_empty() {
        return Err(VerifyError::corrupt(CorruptionKind::Container, "empty file"));
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| VerifyError::corrupt(CorruptionKind::Io, e.to_string()))?;

    let format = reader.format().ok_or_else(|| {
        VerifyError::corrupt(CorruptionKind::UnknownFormat, "unrecognized image signature")
    })?;

    reader.into_dimensions().map_err(classify_image_error)?;

    match format {
        ImageFormat::Png => check_png(bytes)?,
        ImageFormat::Jpeg => check_jpeg(bytes)?,
        ImageFormat::WebP => check_webp(bytes)?,
        ImageFormat::Gif => check_gif(bytes)?,
        _ => {}
    }

    Ok(format)
}

fn classify_image_error(err: ImageError) -> VerifyError {
    match err {
        ImageError::Decoding(e) => VerifyError::corrupt(CorruptionKind::Header, e.to_string()),
        ImageError::Unsupported(e) => {
            VerifyError::corrupt(CorruptionKind::UnknownFormat, e.to_string())
        }
        ImageError::IoError(e) => VerifyError::corrupt(CorruptionKind::Io, e.to_string()),
        ImageError::Limits(e) => VerifyError::Unrecognized(e.to_string()),
        ImageError::Parameter(e) => VerifyError::Unrecognized(e.to_string()),
        ImageError::Encoding(e) => VerifyError::Unrecognized(e.to_string()),
    }
}

fn check_png(bytes: &[u8]) -> Result<(), VerifyError> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..8] != PNG_SIGNATURE {
        return Err(VerifyError::corrupt(CorruptionKind::Container, "bad PNG signature"));
    }

    let mut offset = PNG_SIGNATURE.len();
    loop {
        if offset + 12 > bytes.len() {
            return Err(VerifyError::corrupt(
                CorruptionKind::Container,
                format!("PNG truncated at byte {} (no IEND)", offset),
            ));
        }

        let length = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let chunk_type = &bytes[offset + 4..offset + 8];
        let data_end = offset + 8 + length;
        if data_end + 4 > bytes.len() {
            return Err(VerifyError::corrupt(
                CorruptionKind::Container,
                format!(
                    "PNG chunk {} truncated at byte {}",
                    String::from_utf8_lossy(chunk_type),
                    offset
                ),
            ));
        }

        let stored_crc = u32::from_be_bytes([
            bytes[data_end],
            bytes[data_end + 1],
            bytes[data_end + 2],
            bytes[data_end + 3],
        ]);
        let computed_crc = crc32fast::hash(&bytes[offset + 4..data_end]);
        if stored_crc != computed_crc {
            return Err(VerifyError::corrupt(
                CorruptionKind::Container,
                format!(
                    "PNG chunk {} CRC mismatch at byte {}",
                    String::from_utf8_lossy(chunk_type),
                    offset
                ),
            ));
        }

        if chunk_type == b"IEND" {
            return Ok(());
        }
        offset = data_end + 4;
    }
}

fn check_jpeg(bytes: &[u8]) -> Result<(), VerifyError> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return Err(VerifyError::corrupt(CorruptionKind::Container, "missing JPEG SOI marker"));
    }

    let scan_start = first_scan_offset(bytes).ok_or_else(|| {
        VerifyError::corrupt(CorruptionKind::Container, "JPEG has no scan (SOS) segment")
    })?;

    // Entropy-coded data stuffs 0xFF as FF 00, so FF D9 past the scan header is a real EOI
    if !bytes[scan_start..].windows(2).any(|w| w == [0xFF, 0xD9]) {
        return Err(VerifyError::corrupt(
            CorruptionKind::Container,
            "JPEG truncated (no EOI marker)",
        ));
    }
    Ok(())
}

/// Walk the marker segments after SOI and return the offset just past the
/// first SOS header. Segments are skipped by length, so markers embedded in
/// APPn payloads (EXIF thumbnails) are never mistaken for the main image's.
fn first_scan_offset(bytes: &[u8]) -> Option<usize> {
    let mut offset = 2;
    while offset + 1 < bytes.len() {
        if bytes[offset] != 0xFF {
            return None;
        }
        let marker = bytes[offset + 1];
        match marker {
            // Fill byte
            0xFF => offset += 1,
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD7 => offset += 2,
            0xD9 => return None,
            _ => {
                if offset + 4 > bytes.len() {
                    return None;
                }
                let length = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;
                if length < 2 {
                    return None;
                }
                let end = offset + 2 + length;
                if end > bytes.len() {
                    return None;
                }
                if marker == 0xDA {
                    return Some(end);
                }
                offset = end;
            }
        }
    }
    None
}

fn check_webp(bytes: &[u8]) -> Result<(), VerifyError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WEBP" {
        return Err(VerifyError::corrupt(CorruptionKind::Container, "bad RIFF/WEBP header"));
    }

    let riff_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    // RIFF size excludes the 8-byte "RIFF" + size prefix; odd sizes carry one pad byte.
    let expected = riff_size + 8;
    if bytes.len() < expected {
        return Err(VerifyError::corrupt(
            CorruptionKind::Container,
            format!("WebP truncated: {} of {} bytes", bytes.len(), expected),
        ));
    }
    Ok(())
}

fn check_gif(bytes: &[u8]) -> Result<(), VerifyError> {
    match bytes.last() {
        Some(0x3B) => Ok(()),
        _ => Err(VerifyError::corrupt(
            CorruptionKind::Container,
            "GIF truncated (no trailer)",
        )),
    }
}
