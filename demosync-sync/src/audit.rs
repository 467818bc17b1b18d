//! Append-only audit log of discovered replays.
//!
//! One line per descriptor: `RFC3339 \t category \t locator`. Write failures
//! are logged and otherwise ignored.

use std::path::Path;

use chrono::SecondsFormat;
use tokio::io::AsyncWriteExt;

use demosync_core::MatchDescriptor;

pub const AUDIT_FILE: &str = "demo-log.tsv";

pub fn format_line(descriptor: &MatchDescriptor) -> String {
    format!(
        "{}\t{}\t{}\n",
        descriptor
            .played_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        descriptor.category,
        descriptor.locator
    )
}

/// Append one line per descriptor to `path`.
pub async fn append(path: &Path, descriptors: &[MatchDescriptor]) {
    if descriptors.is_empty() {
        return;
    }
    if let Err(error) = try_append(path, descriptors).await {
        tracing::warn!(path = %path.display(), %error, "could not write audit log");
    }
}

async fn try_append(path: &Path, descriptors: &[MatchDescriptor]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let lines: String = descriptors.iter().map(format_line).collect();
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(lines.as_bytes()).await?;
    file.flush().await
}
