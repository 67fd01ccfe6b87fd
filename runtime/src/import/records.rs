use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::engine::NewDocument;

const IDENTIFIER_MAX: usize = 30;
const TITLE_MAX: usize = 510;
const AUTHORITY_MAX: usize = 255;

/// One entry of the scraped rules data file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub authority: String,
    #[serde(default)]
    pub link: String,
}

impl RawRule {
    /// Identifier used in result buckets, even when the rule fails validation.
    pub fn label(&self) -> String {
        let id = self.id.trim();
        if id.is_empty() {
            "UNKNOWN_ID".to_string()
        } else {
            id.to_string()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Regulation {
    pub identifier: String,
    pub title: String,
    pub date: NaiveDate,
    pub authority: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ValidationError {
    #[error("{field}: this field may not be blank")]
    Blank { field: &'static str },

    #[error("{field}: ensure this field has no more than {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("date: {value:?} is not a valid yyyy-mm-dd date")]
    InvalidDate { value: String },

    #[error("link: {value:?} is not a valid URL")]
    InvalidLink { value: String },
}

/// Every field problem found on one rule.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{}", .errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
pub struct RecordValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl Regulation {
    pub fn from_rule(rule: &RawRule) -> Result<Self, RecordValidationErrors> {
        let mut errors = Vec::new();

        let identifier = required(&rule.id, "identifier", IDENTIFIER_MAX, &mut errors);
        let title = required(&rule.title, "title", TITLE_MAX, &mut errors);
        let authority = required(&rule.authority, "authority", AUTHORITY_MAX, &mut errors);

        let date = match parse_date(&rule.date) {
            Ok(date) => Some(date),
            Err(err) => {
                errors.push(err);
                None
            }
        };

        let link = rule.link.trim().to_string();
        if !link.is_empty() && !is_http_url(&link) {
            errors.push(ValidationError::InvalidLink { value: link.clone() });
        }

        match (identifier, title, authority, date) {
            (Some(identifier), Some(title), Some(authority), Some(date)) if errors.is_empty() => {
                Ok(Self {
                    identifier,
                    title,
                    date,
                    authority,
                    link,
                    text: rule.text.clone(),
                })
            }
            _ => Err(RecordValidationErrors { errors }),
        }
    }

    pub fn has_content(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Engine document: a small JSON envelope keyed by the identifier, sourced from the link.
    pub fn to_document(&self) -> NewDocument {
        let content = serde_json::json!({
            "title": self.title,
            "text": self.text,
            "authority": self.authority,
            "date": self.date.format("%Y-%m-%d").to_string(),
        });
        NewDocument {
            id: Some(self.identifier.clone()),
            content: content.to_string(),
            file_path: self.link.clone(),
            track_id: None,
        }
    }
}

fn required(
    value: &str,
    field: &'static str,
    max: usize,
    errors: &mut Vec<ValidationError>,
) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        errors.push(ValidationError::Blank { field });
        return None;
    }
    if value.chars().count() > max {
        errors.push(ValidationError::TooLong { field, max });
        return None;
    }
    Some(value.to_string())
}

fn parse_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::Blank { field: "date" });
    }
    let normalized = raw.replace('/', "-");
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate {
        value: raw.to_string(),
    })
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value).is_ok_and(|url| {
        matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
    })
}
