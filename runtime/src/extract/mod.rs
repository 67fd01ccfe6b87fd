//! File content extraction.
//!
//! Every supported extension maps to exactly one [`Format`] through [`FORMAT_TABLE`];
//! each format has one handler. The configured extension list is checked against the
//! table when a [`ContentExtractor`] is built.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Result, bail};

use crate::error::ExtractError;

mod office;
mod pdf;
mod text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Text,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
}

impl Format {
    fn handler(self) -> fn(&str, &[u8]) -> Result<String, ExtractError> {
        match self {
            Format::Text => text::extract,
            Format::Pdf => pdf::extract,
            Format::Docx => office::extract_docx,
            Format::Pptx => office::extract_pptx,
            Format::Xlsx => office::extract_xlsx,
        }
    }
}

pub const FORMAT_TABLE: &[(&str, Format)] = &[
    (".txt", Format::Text),
    (".md", Format::Text),
    (".html", Format::Text),
    (".htm", Format::Text),
    (".tex", Format::Text),
    (".json", Format::Text),
    (".xml", Format::Text),
    (".yaml", Format::Text),
    (".yml", Format::Text),
    (".rtf", Format::Text),
    (".odt", Format::Text),
    (".epub", Format::Text),
    (".csv", Format::Text),
    (".log", Format::Text),
    (".conf", Format::Text),
    (".ini", Format::Text),
    (".properties", Format::Text),
    (".sql", Format::Text),
    (".bat", Format::Text),
    (".sh", Format::Text),
    (".c", Format::Text),
    (".cpp", Format::Text),
    (".py", Format::Text),
    (".java", Format::Text),
    (".js", Format::Text),
    (".ts", Format::Text),
    (".swift", Format::Text),
    (".go", Format::Text),
    (".rb", Format::Text),
    (".php", Format::Text),
    (".css", Format::Text),
    (".scss", Format::Text),
    (".less", Format::Text),
    (".pdf", Format::Pdf),
    (".docx", Format::Docx),
    (".pptx", Format::Pptx),
    (".xlsx", Format::Xlsx),
];

/// Lower-cased extension with a leading dot, e.g. `"PDF"` -> `".pdf"`.
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.');
    format!(".{}", trimmed.to_ascii_lowercase())
}

pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(normalize_extension)
}

fn lookup(ext: &str) -> Option<Format> {
    FORMAT_TABLE
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, format)| *format)
}

pub fn default_extensions() -> Vec<String> {
    FORMAT_TABLE.iter().map(|(ext, _)| ext.to_string()).collect()
}

/// Extension dispatch restricted to the enabled extensions.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    formats: BTreeMap<String, Format>,
}

impl ContentExtractor {
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Result<Self> {
        let mut formats = BTreeMap::new();
        for ext in extensions {
            let ext = normalize_extension(ext.as_ref());
            let Some(format) = lookup(&ext) else {
                bail!("no extractor registered for extension {ext}");
            };
            formats.insert(ext, format);
        }
        if formats.is_empty() {
            bail!("at least one supported extension is required");
        }
        Ok(Self { formats })
    }

    pub fn with_all_formats() -> Self {
        Self {
            formats: FORMAT_TABLE
                .iter()
                .map(|(ext, format)| (ext.to_string(), *format))
                .collect(),
        }
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    pub fn format_of(&self, filename: &str) -> Option<Format> {
        extension_of(filename).and_then(|ext| self.formats.get(&ext).copied())
    }

    pub fn is_supported(&self, filename: &str) -> bool {
        self.format_of(filename).is_some()
    }

    /// Converts a file blob into plain text. CPU-bound for structured documents.
    pub fn extract(&self, filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
        let format = self
            .format_of(filename)
            .ok_or_else(|| ExtractError::UnsupportedFormat {
                filename: filename.to_string(),
            })?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ExtractError::EmptyContent {
                filename: filename.to_string(),
            });
        }

        let text = (format.handler())(filename, bytes)?;
        if text.trim().is_empty() {
            return Err(ExtractError::EmptyContent {
                filename: filename.to_string(),
            });
        }
        Ok(text)
    }
}
