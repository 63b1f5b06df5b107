//! Decoding of base64 data URLs.

use crate::types::Result;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};

const MARKER: &str = "base64,";

/// Decode the payload following `base64,` in `value`.
///
/// Returns `Ok(None)` when `value` is not a base64 data URL. Padding is
/// optional and invalid UTF-8 is replaced.
pub fn decode_data_url(value: &str) -> Result<Option<String>> {
    let Some(at) = value.find(MARKER) else {
        return Ok(None);
    };

    let payload: String = value[at + MARKER.len()..]
        .chars()
        .take_while(|c| !matches!(c, '"' | '\'' | ')' | '<' | '>'))
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = STANDARD_NO_PAD.decode(payload.trim_end_matches('='))?;

    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_padded_and_unpadded() {
        // "https://cdn/a.m3u8"
        let padded = "data:text/plain;base64,aHR0cHM6Ly9jZG4vYS5tM3U4";
        assert_eq!(
            decode_data_url(padded).unwrap().as_deref(),
            Some("https://cdn/a.m3u8")
        );

        // "/x.m3u8"
        assert_eq!(
            decode_data_url("data:;base64,L3gubTN1OA==").unwrap().as_deref(),
            Some("/x.m3u8")
        );
        assert_eq!(
            decode_data_url("data:;base64,L3gubTN1OA").unwrap().as_deref(),
            Some("/x.m3u8")
        );
    }

    #[test]
    fn test_not_a_data_url() {
        assert!(decode_data_url("https://cdn/a.m3u8").unwrap().is_none());
    }

    #[test]
    fn test_invalid_payload() {
        assert!(decode_data_url("data:;base64,!!!").is_err());
    }
}
