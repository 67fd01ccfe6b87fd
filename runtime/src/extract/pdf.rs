use std::panic::{self, AssertUnwindSafe};

use crate::error::ExtractError;

pub(super) fn extract(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(bytes)
    }));

    match result {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(err)) => Err(ExtractError::extraction(filename, err)),
        Err(_) => Err(ExtractError::extraction(filename, "pdf parser panicked")),
    }
}
