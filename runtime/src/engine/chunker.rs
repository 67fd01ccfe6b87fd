use std::sync::Arc;

use anyhow::{Result, bail};

use super::tokenizer::Tokenizer;
use crate::utils::compute_mdhash_id;

#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub order: usize,
    pub token_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1200,
            overlap_tokens: 100,
        }
    }
}

pub trait Chunker: Send + Sync {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<Chunk>>;
}

#[derive(Clone)]
pub struct TokenizerChunker {
    tokenizer: Arc<dyn Tokenizer>,
}

impl TokenizerChunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { tokenizer }
    }
}

impl Chunker for TokenizerChunker {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<Chunk>> {
        if config.overlap_tokens >= config.max_tokens {
            bail!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                config.overlap_tokens,
                config.max_tokens
            );
        }

        let tokens = self.tokenizer.encode(content);
        let step = config.max_tokens - config.overlap_tokens;
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < tokens.len() {
            let end = (start + config.max_tokens).min(tokens.len());
            let text = self.tokenizer.decode(&tokens[start..end])?;
            let text = text.trim();
            if !text.is_empty() {
                chunks.push(Chunk {
                    id: compute_mdhash_id(text, "chunk-"),
                    content: text.to_string(),
                    order: chunks.len(),
                    token_count: end - start,
                });
            }
            if end == tokens.len() {
                break;
            }
            start += step;
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per char.
    struct CharTokenizer;

    impl Tokenizer for CharTokenizer {
        fn encode(&self, text: &str) -> Vec<u32> {
            text.chars().map(u32::from).collect()
        }

        fn decode(&self, tokens: &[u32]) -> Result<String> {
            Ok(tokens.iter().filter_map(|t| char::from_u32(*t)).collect())
        }
    }

    fn chunker() -> TokenizerChunker {
        TokenizerChunker::new(Arc::new(CharTokenizer))
    }

    #[test]
    fn windows_overlap() {
        let config = ChunkConfig {
            max_tokens: 4,
            overlap_tokens: 1,
        };
        let chunks = chunker().chunk("abcdefghij", &config).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
        assert_eq!(chunks[2].order, 2);
    }

    #[test]
    fn empty_content_has_no_chunks() {
        let chunks = chunker().chunk("", &ChunkConfig::default()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_window() {
        let config = ChunkConfig {
            max_tokens: 4,
            overlap_tokens: 4,
        };
        assert!(chunker().chunk("abc", &config).is_err());
    }
}
