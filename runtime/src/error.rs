use thiserror::Error;

/// Per-file extraction failures. Non-fatal to a batch.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {filename}")]
    UnsupportedFormat { filename: String },

    #[error("file {filename} is not valid UTF-8: {source}")]
    Decode {
        filename: String,
        #[source]
        source: std::str::Utf8Error,
    },

    #[error("file {filename} contains no text")]
    EmptyContent { filename: String },

    #[error("file {filename} looks like a stringified binary blob")]
    BinaryMisdetection { filename: String },

    #[error("failed to parse {filename}: {message}")]
    Extraction { filename: String, message: String },
}

impl ExtractError {
    pub fn extraction(filename: impl Into<String>, message: impl ToString) -> Self {
        Self::Extraction {
            filename: filename.into(),
            message: message.to_string(),
        }
    }

    /// Short machine-readable tag, stored on error documents.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::UnsupportedFormat { .. } => "unsupported_format",
            ExtractError::Decode { .. } => "decode_error",
            ExtractError::EmptyContent { .. } => "empty_content",
            ExtractError::BinaryMisdetection { .. } => "binary_misdetection",
            ExtractError::Extraction { .. } => "extraction_error",
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("engine call {operation} failed: {source}")]
    Engine {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("all storage backends failed to drop: {}", .errors.join("; "))]
    AllBackendsFailed { errors: Vec<String> },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid cache mode(s): {}", .invalid.join(", "))]
    InvalidCacheMode { invalid: Vec<String> },

    #[error("pipeline is busy")]
    Busy,

    #[error("filesystem error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn engine(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Engine { operation, source }
    }

    pub fn io(path: impl AsRef<std::path::Path>, source: impl Into<anyhow::Error>) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source: source.into(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_keeps_cause_chain() {
        let err = PipelineError::engine(
            "enqueue",
            anyhow::anyhow!("disk full").context("failed to write doc status"),
        );
        let chain: Vec<String> = anyhow::Error::new(err)
            .chain()
            .map(|cause| cause.to_string())
            .collect();
        assert_eq!(chain.len(), 3);
        assert!(chain[0].contains("enqueue"));
        assert_eq!(chain[2], "disk full");
    }
}
