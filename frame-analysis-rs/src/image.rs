//! Image input validation.
//!
//! Accepts raw base64 or a `data:<mime>;base64,` URI and checks size,
//! encoding and magic bytes once per frame. The resulting [`ImageInput`]
//! carries everything later stages need, so no task decodes the image again.

use std::borrow::Cow;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::{AnalysisError, Result};

/// Image formats accepted by the reasoning service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    /// Detect the format from the leading bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(ImageFormat::Gif)
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(ImageFormat::Webp)
        } else if bytes.starts_with(b"BM") {
            Some(ImageFormat::Bmp)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
            ImageFormat::Bmp => "image/bmp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// A validated image, ready to be sent to the reasoning service
#[derive(Clone, PartialEq, Eq)]
pub struct ImageInput {
    data_uri: String,
    body_offset: usize,
    format: ImageFormat,
    byte_len: usize,
    digest: String,
}

impl ImageInput {
    /// Validate `raw` against the size limit and the accepted formats
    pub fn parse(raw: &str, max_bytes: usize) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AnalysisError::validation("image data is empty"));
        }

        let body = match raw.strip_prefix("data:") {
            Some(rest) => {
                let (header, body) = rest
                    .split_once(',')
                    .ok_or_else(|| AnalysisError::validation("malformed data URI: missing ','"))?;
                if !header.ends_with(";base64") {
                    return Err(AnalysisError::validation("data URI must be base64 encoded"));
                }
                body
            }
            None => raw,
        };

        // MIME-style encoders wrap lines; the digest and the forwarded URI
        // are built from the unwrapped body.
        let body: Cow<'_, str> = if body.bytes().any(|b| b.is_ascii_whitespace()) {
            Cow::Owned(body.chars().filter(|c| !c.is_ascii_whitespace()).collect())
        } else {
            Cow::Borrowed(body)
        };

        if body.is_empty() {
            return Err(AnalysisError::validation("image data is empty"));
        }

        // Reject oversized payloads before paying for the decode.
        let estimated = body.len() / 4 * 3;
        if estimated > max_bytes.saturating_add(3) {
            return Err(AnalysisError::validation(format!(
                "image exceeds the {} byte limit",
                max_bytes
            )));
        }

        let bytes = STANDARD
            .decode(body.as_bytes())
            .map_err(|e| AnalysisError::validation(format!("image is not valid base64: {}", e)))?;

        if bytes.len() > max_bytes {
            return Err(AnalysisError::validation(format!(
                "image of {} bytes exceeds the {} byte limit",
                bytes.len(),
                max_bytes
            )));
        }

        let format = ImageFormat::sniff(&bytes).ok_or_else(|| {
            AnalysisError::validation("unsupported image format (expected PNG, JPEG, GIF, WEBP or BMP)")
        })?;

        let digest = format!("{:x}", Sha256::digest(body.as_bytes()));
        let prefix = format!("data:{};base64,", format.mime_type());

        Ok(Self {
            body_offset: prefix.len(),
            data_uri: prefix + body.as_ref(),
            format,
            byte_len: bytes.len(),
            digest,
        })
    }

    /// Normalized data URI using the detected MIME type
    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }

    /// Base64 body without the data URI prefix
    pub fn base64_body(&self) -> &str {
        &self.data_uri[self.body_offset..]
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Decoded size in bytes
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Hex SHA-256 of the base64 body
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageInput")
            .field("format", &self.format)
            .field("byte_len", &self.byte_len)
            .field("digest", &self.digest)
            .finish()
    }
}
