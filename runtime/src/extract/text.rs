use crate::error::ExtractError;

/// UTF-8 decode with the sanity checks applied to plain-text uploads.
pub(super) fn extract(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let text = std::str::from_utf8(bytes).map_err(|source| ExtractError::Decode {
        filename: filename.to_string(),
        source,
    })?;

    if text.trim().is_empty() {
        return Err(ExtractError::EmptyContent {
            filename: filename.to_string(),
        });
    }

    // text produced by printing a byte string instead of decoding it
    if text.starts_with("b'") || text.starts_with("b\"") {
        return Err(ExtractError::BinaryMisdetection {
            filename: filename.to_string(),
        });
    }

    Ok(text.to_string())
}
