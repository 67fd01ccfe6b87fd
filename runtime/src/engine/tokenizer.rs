use anyhow::{Result, anyhow};
use tiktoken_rs::{CoreBPE, o200k_base};

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, tokens: &[u32]) -> Result<String>;
}

pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = o200k_base().map_err(|err| anyhow!("failed to load o200k_base: {err}"))?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_with_special_tokens(text)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        self.bpe
            .decode(tokens.to_vec())
            .map_err(|err| anyhow!("failed to decode tokens: {err}"))
    }
}
