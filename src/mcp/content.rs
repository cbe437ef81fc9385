//! Extraction of usable values from tool results
//!
//! Tool results are loosely typed: text parts usually hold JSON documents and
//! screenshots arrive as base64 PNG parts. The helpers here turn them into
//! concrete values and fail with a specific error instead of defaulting,
//! except where a default is documented on the helper.

use base64::Engine;
use serde_json::{Map, Value};

use crate::common::{Error, Result};

use super::types::ContentPart;

/// PNG file signature
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Signature, IHDR length and type, then width and height (big-endian u32 each)
const PNG_HEADER_LEN: usize = 24;
const PNG_WIDTH_OFFSET: usize = 16;
const PNG_HEIGHT_OFFSET: usize = 20;

/// Base64 characters covering exactly the first `PNG_HEADER_LEN` bytes
const PNG_HEADER_B64_LEN: usize = PNG_HEADER_LEN / 3 * 4;

/// Concatenate the non-empty text parts, one per line
pub fn text_of(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } if !text.is_empty() => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether any part is an image
pub fn has_image(parts: &[ContentPart]) -> bool {
    parts
        .iter()
        .any(|part| matches!(part, ContentPart::Image { .. }))
}

/// Parse tool text as JSON
pub fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|_| Error::malformed_payload(text))
}

/// Width and height of the first image part, read from its PNG header
///
/// Only the header is decoded; pixel data is never touched.
pub fn image_dimensions(parts: &[ContentPart]) -> Result<(u32, u32)> {
    let data = parts
        .iter()
        .find_map(|part| match part {
            ContentPart::Image { data, .. } => Some(data.as_deref().unwrap_or("")),
            _ => None,
        })
        .ok_or(Error::NoImageContent)?;

    if data.is_empty() {
        return Err(Error::MissingPayload);
    }

    let prefix = data.get(..PNG_HEADER_B64_LEN).unwrap_or(data);
    let header = base64::engine::general_purpose::STANDARD
        .decode(prefix)
        .map_err(|e| Error::InvalidImageFormat(format!("invalid base64: {}", e)))?;

    png_dimensions(&header)
}

/// Read width and height from raw PNG bytes
pub fn png_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    if bytes.len() < PNG_HEADER_LEN {
        return Err(Error::InvalidImageFormat(format!(
            "{} bytes is shorter than a PNG header",
            bytes.len()
        )));
    }
    if bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(Error::InvalidImageFormat("missing PNG signature".to_string()));
    }

    let width = read_u32_be(bytes, PNG_WIDTH_OFFSET);
    let height = read_u32_be(bytes, PNG_HEIGHT_OFFSET);
    Ok((width, height))
}

fn read_u32_be(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_be_bytes(word)
}

// === Typed JSON accessors ===

/// Require a JSON object
pub fn require_object(value: &Value) -> Result<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::malformed_payload(&value.to_string()))
}

/// Boolean field; absent or non-boolean reads as false
pub fn flag(object: &Map<String, Value>, key: &str) -> bool {
    object.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Numeric telemetry field (fps, frame time); absent or non-numeric reads as 0.0
pub fn metric(object: &Map<String, Value>, key: &str) -> f64 {
    object.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

/// String field, failing when absent
pub fn require_str<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed_payload(&format!("missing string field '{key}'")))
}

/// 2D vector given as `{"x":..,"y":..}` or `[x, y]`; anything else reads as (0, 0)
pub fn vec2(value: &Value) -> (f64, f64) {
    match value {
        Value::Object(map) => (metric(map, "x"), metric(map, "y")),
        Value::Array(items) if items.len() >= 2 => (
            items[0].as_f64().unwrap_or(0.0),
            items[1].as_f64().unwrap_or(0.0),
        ),
        _ => (0.0, 0.0),
    }
}
