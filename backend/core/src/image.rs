//! Image blobs, MIME resolution and content hashing.

use std::fmt;

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LlmError;

pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";
pub const MIME_WEBP: &str = "image/webp";

/// MIME types the engines accept for page images.
pub const ACCEPTED_MIMES: [&str; 3] = [MIME_JPEG, MIME_PNG, MIME_WEBP];

/// Raw image bytes plus their MIME type.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBlob")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImageBlob {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }

    /// Decode a base64 payload or `data:` URL, resolving the MIME type.
    pub fn from_base64(input: &str, explicit_mime: Option<&str>) -> Result<Self, LlmError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LlmError::InvalidRequest("image_b64 is empty".into()));
        }
        let (hint, payload) = split_data_url(trimmed);
        let bytes = decode_base64(payload)?;
        if bytes.is_empty() {
            return Err(LlmError::InvalidRequest("image_b64 decodes to zero bytes".into()));
        }

        let mime = pick_mime(explicit_mime.unwrap_or(""), hint.unwrap_or(""), &bytes);
        if !ACCEPTED_MIMES.contains(&mime.as_str()) {
            return Err(LlmError::InvalidRequest(format!(
                "unsupported image MIME {mime}; expected one of {}",
                ACCEPTED_MIMES.join(", ")
            )));
        }
        Ok(Self { bytes, mime })
    }

    pub fn base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// `data:<mime>;base64,<payload>` form used by OpenAI-style endpoints.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64())
    }

    pub fn hash(&self) -> ImageHash {
        ImageHash::of(&self.bytes)
    }
}

/// Lowercase hex SHA-256 of the image bytes. Cache key for parse and hint rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHash(String);

impl ImageHash {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Accept a caller-supplied hash; must be 64 hex digits.
    pub fn parse(s: &str) -> Result<Self, LlmError> {
        let s = s.trim().to_ascii_lowercase();
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s))
        } else {
            Err(LlmError::InvalidRequest(format!("malformed image hash {s:?}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve a MIME type: explicit, then `data:` URL hint, then magic bytes, then JPEG.
pub fn pick_mime(explicit: &str, hint: &str, bytes: &[u8]) -> String {
    let explicit = canonical_mime(explicit);
    if !explicit.is_empty() {
        return explicit;
    }
    let hint = canonical_mime(hint);
    if !hint.is_empty() {
        return hint;
    }
    sniff_mime(bytes).unwrap_or(MIME_JPEG).to_string()
}

/// Detect JPEG, PNG and WebP from their signatures.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(MIME_JPEG)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(MIME_PNG)
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(MIME_WEBP)
    } else {
        None
    }
}

fn canonical_mime(raw: &str) -> String {
    let mime = raw
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "image/jpg" | "image/pjpeg" => MIME_JPEG.to_string(),
        _ => mime,
    }
}

/// Split `data:<mime>;base64,<payload>` into the MIME hint and the payload.
fn split_data_url(input: &str) -> (Option<&str>, &str) {
    let Some(rest) = input.strip_prefix("data:") else {
        return (None, input);
    };
    match rest.split_once(',') {
        Some((header, payload)) => {
            let mime = header.split(';').next().filter(|m| !m.is_empty());
            (mime, payload)
        }
        None => (None, rest),
    }
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, LlmError> {
    if let Ok(bytes) = STANDARD.decode(payload) {
        return Ok(bytes);
    }
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(&compact)
        .or_else(|_| STANDARD_NO_PAD.decode(compact.trim_end_matches('=')))
        .map_err(|e| LlmError::InvalidRequest(format!("image_b64 is not valid base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn webp_bytes() -> Vec<u8> {
        let mut v = b"RIFF".to_vec();
        v.extend_from_slice(&[0, 0, 0, 0]);
        v.extend_from_slice(b"WEBPVP8 ");
        v
    }

    #[test]
    fn mime_precedence() {
        let png = PNG_HEADER.to_vec();
        assert_eq!(pick_mime("image/webp", "image/jpeg", &png), MIME_WEBP);
        assert_eq!(pick_mime("", "image/jpeg", &png), MIME_JPEG);
        assert_eq!(pick_mime("", "", &png), MIME_PNG);
        assert_eq!(pick_mime("", "", b"garbage"), MIME_JPEG);
        assert_eq!(pick_mime("", "", &webp_bytes()), MIME_WEBP);
        assert_eq!(pick_mime("IMAGE/JPG", "", &png), MIME_JPEG);
    }

    #[test]
    fn decodes_data_url_and_uses_its_mime() {
        let payload = STANDARD.encode(PNG_HEADER);
        let blob = ImageBlob::from_base64(&format!("data:image/webp;base64,{payload}"), None).unwrap();
        assert_eq!(blob.mime, MIME_WEBP);
        assert_eq!(blob.bytes, PNG_HEADER.to_vec());
    }

    #[test]
    fn sniffs_plain_base64() {
        let payload = STANDARD.encode([0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3]);
        let blob = ImageBlob::from_base64(&payload, None).unwrap();
        assert_eq!(blob.mime, MIME_JPEG);
        assert!(blob.data_url().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn tolerates_line_wrapped_base64() {
        let payload = STANDARD.encode(PNG_HEADER.repeat(20));
        let wrapped: String = payload
            .as_bytes()
            .chunks(40)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        let blob = ImageBlob::from_base64(&wrapped, None).unwrap();
        assert_eq!(blob.mime, MIME_PNG);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            ImageBlob::from_base64("", None),
            Err(LlmError::InvalidRequest(_))
        ));
        assert!(matches!(
            ImageBlob::from_base64("@@not base64@@", None),
            Err(LlmError::InvalidRequest(_))
        ));
        let payload = STANDARD.encode(PNG_HEADER);
        assert!(matches!(
            ImageBlob::from_base64(&payload, Some("image/gif")),
            Err(LlmError::InvalidRequest(_))
        ));
    }

    #[test]
    fn hash_is_deterministic_lowercase_hex() {
        let a = ImageHash::of(b"page one");
        let b = ImageHash::of(b"page one");
        let c = ImageHash::of(b"page two");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch)));
        assert_eq!(ImageHash::parse(&a.as_str().to_uppercase()).unwrap(), a);
        assert!(ImageHash::parse("xyz").is_err());
    }
}
