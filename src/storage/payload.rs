//! Decoding of transfer-encoded image payloads.
//!
//! Clients send images either as data URIs (`data:image/png;base64,...`) or as bare
//! base64 text. Both forms are accepted; embedded whitespace is ignored and padding
//! is optional.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::error_handling::types::StorageError;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Returns the base64 body of `payload`, dropping a data URI header if present.
pub fn strip_data_uri(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((header, body)) if header.starts_with("data:") => body,
        _ => payload,
    }
}

pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, StorageError> {
    let body: String = strip_data_uri(payload.trim())
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if body.is_empty() {
        return Err(StorageError::InvalidPayload("empty image payload".to_string()));
    }
    LENIENT
        .decode(body.as_bytes())
        .map_err(|e| StorageError::InvalidPayload(e.to_string()))
}
