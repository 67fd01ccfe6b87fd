use std::path::{Path, PathBuf};

use feruca::Collator;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const SUMMARY_MAX_CHARS: usize = 200;

pub fn compute_mdhash_id(content: &str, prefix: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{prefix}{digest:x}")
}

pub fn generate_track_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

pub fn sanitize_text(input: &str) -> String {
    input.replace('\r', "").trim().to_string()
}

/// First 200 characters of the trimmed content, with an ellipsis when cut.
pub fn summarize_content(content: &str) -> String {
    let trimmed = content.trim();
    match trimmed.char_indices().nth(SUMMARY_MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Sorts paths by Unicode collation of their string form, so the order does not
/// depend on the platform's directory listing or byte order.
pub fn sort_paths_collated(paths: &mut [PathBuf]) {
    sort_collated_by(paths, |path| path.as_path());
}

pub fn sort_collated_by<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> &Path,
{
    let mut collator = Collator::default();
    items.sort_by(|a, b| {
        let a = key(a).to_string_lossy();
        let b = key(b).to_string_lossy();
        collator.collate(&*a, &*b)
    });
}
