use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use super::records::RawRule;

/// Which slice of the data file to import.
#[derive(Debug, Clone, Default)]
pub struct ImportSelection {
    pub start: usize,
    pub limit: Option<usize>,
    /// Empty accepts every authority.
    pub allowed_authorities: Vec<String>,
}

pub async fn load_rules(path: &Path, selection: &ImportSelection) -> Result<Vec<RawRule>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read rules file {}", path.display()))?;
    let rules: Vec<RawRule> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse rules file {}", path.display()))?;
    info!(count = rules.len(), file = %path.display(), "loaded rules");
    select_rules(rules, selection)
}

pub fn select_rules(rules: Vec<RawRule>, selection: &ImportSelection) -> Result<Vec<RawRule>> {
    if selection.limit == Some(0) {
        bail!("limit must be a positive number");
    }

    let allowed: Vec<&str> = selection
        .allowed_authorities
        .iter()
        .map(|authority| authority.trim())
        .filter(|authority| !authority.is_empty())
        .collect();

    let filtered: Vec<RawRule> = if allowed.is_empty() {
        rules
    } else {
        let before = rules.len();
        let kept: Vec<RawRule> = rules
            .into_iter()
            .filter(|rule| allowed.contains(&rule.authority.trim()))
            .collect();
        info!(
            kept = kept.len(),
            dropped = before - kept.len(),
            "filtered rules by authority"
        );
        kept
    };

    if selection.start >= filtered.len() {
        if !filtered.is_empty() || selection.start > 0 {
            warn!(
                start = selection.start,
                available = filtered.len(),
                "start index is beyond the available rules"
            );
        }
        return Ok(Vec::new());
    }

    let end = match selection.limit {
        Some(limit) => (selection.start + limit).min(filtered.len()),
        None => filtered.len(),
    };
    Ok(filtered
        .into_iter()
        .skip(selection.start)
        .take(end - selection.start)
        .collect())
}
