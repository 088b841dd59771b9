//! Archive-wide index files, rebuilt from whatever days are on disk.
//!
//! - **index.json**: one entry per present day, newest first
//! - **index.md**: the same list as Markdown for browsing
//! - **model_releases.json**: cross-day release ledger, one entry per model
//!
//! Rebuilding replaces all three files and depends only on disk contents, so
//! reruns are byte-identical.

use super::store::ArchiveStore;
use crate::models::ModelRelease;
use crate::utils::{BoxError, write_atomic};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::{info, instrument, warn};

pub const INDEX_JSON: &str = "index.json";
pub const INDEX_MD: &str = "index.md";
pub const RELEASE_LEDGER: &str = "model_releases.json";

/// One present day in `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub date: NaiveDate,
    pub path: String,
    pub placeholder: bool,
    pub story_count: usize,
    pub lead_headline: Option<String>,
    pub emphasis: Option<String>,
}

/// What a rebuild produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RebuiltIndexes {
    pub entries: Vec<IndexEntry>,
    pub releases: Vec<ModelRelease>,
}

/// Keep the earliest sighting of each model (case-insensitive), newest first.
pub fn merge_releases(releases: impl IntoIterator<Item = ModelRelease>) -> Vec<ModelRelease> {
    let mut earliest: BTreeMap<String, ModelRelease> = BTreeMap::new();
    for release in releases {
        let key = release.model.trim().to_lowercase();
        match earliest.get(&key) {
            Some(seen) if seen.date <= release.date => {}
            _ => {
                earliest.insert(key, release);
            }
        }
    }
    let mut merged: Vec<ModelRelease> = earliest.into_values().collect();
    merged.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.model.to_lowercase().cmp(&b.model.to_lowercase()))
    });
    merged
}

/// Markdown listing of the archive.
pub fn render_index_markdown(entries: &[IndexEntry]) -> String {
    let mut md = String::from("# The Daily Token Archive\n\n");
    if entries.is_empty() {
        md.push_str("_No editions yet._\n");
        return md;
    }
    for entry in entries {
        let label = if entry.placeholder {
            "Archive placeholder".to_string()
        } else {
            let headline = entry.lead_headline.as_deref().unwrap_or("Edition");
            format!("{headline} ({} stories)", entry.story_count)
        };
        // Writing to a String cannot fail.
        let _ = writeln!(md, "- [{}]({}): {}", entry.date, entry.path, label);
    }
    md
}

async fn index_entry(store: &ArchiveStore, date: NaiveDate) -> IndexEntry {
    let path = ArchiveStore::relative_edition_path(date);
    match store.read_edition(date).await {
        Ok(edition) => IndexEntry {
            date,
            path,
            placeholder: edition.placeholder,
            story_count: edition.story_count(),
            lead_headline: edition.lead_headline().map(String::from),
            emphasis: Some(edition.editorial.emphasis.clone()),
        },
        Err(e) => {
            warn!(%date, error = %e, "Unreadable edition; indexing without details");
            IndexEntry {
                date,
                path,
                placeholder: false,
                story_count: 0,
                lead_headline: None,
                emphasis: None,
            }
        }
    }
}

/// Rewrite `index.json`, `index.md` and `model_releases.json` at the root.
#[instrument(level = "info", skip_all, fields(root = %store.root().display()))]
pub async fn rebuild_indexes(store: &ArchiveStore) -> Result<RebuiltIndexes, BoxError> {
    let mut days = store.existing_days().await?;
    days.sort_by_key(|d| Reverse(*d));

    let mut entries = Vec::with_capacity(days.len());
    let mut sightings = Vec::new();
    for date in days {
        entries.push(index_entry(store, date).await);
        match store.read_releases(date).await {
            Ok(releases) => sightings.extend(releases),
            Err(e) => warn!(%date, error = %e, "Unreadable release list; skipping"),
        }
    }
    let releases = merge_releases(sightings);

    tokio::fs::create_dir_all(store.root()).await?;
    write_atomic(
        &store.root().join(INDEX_JSON),
        &serde_json::to_vec_pretty(&entries)?,
    )
    .await?;
    write_atomic(
        &store.root().join(INDEX_MD),
        render_index_markdown(&entries).as_bytes(),
    )
    .await?;
    write_atomic(
        &store.root().join(RELEASE_LEDGER),
        &serde_json::to_vec_pretty(&releases)?,
    )
    .await?;

    info!(
        days = entries.len(),
        releases = releases.len(),
        "Rebuilt archive indexes"
    );
    Ok(RebuiltIndexes { entries, releases })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(model: &str, day: u32) -> ModelRelease {
        ModelRelease {
            date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            model: model.to_string(),
            headline: format!("{model} launches"),
            url: format!("https://a.io/{day}"),
            source: "lab".to_string(),
        }
    }

    #[test]
    fn test_merge_keeps_earliest_and_sorts_newest_first() {
        let merged = merge_releases(vec![
            release("Gemma 3", 10),
            release("Llama 4", 12),
            release("gemma 3", 8),
            release("Gemma 3", 11),
            release("Alpha", 12),
        ]);
        let got: Vec<(&str, u32)> = merged
            .iter()
            .map(|r| (r.model.as_str(), chrono::Datelike::day(&r.date)))
            .collect();
        assert_eq!(got, vec![("Alpha", 12), ("Llama 4", 12), ("gemma 3", 8)]);
    }

    #[test]
    fn test_render_markdown() {
        let entries = vec![
            IndexEntry {
                date: NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
                path: "2025/03/02/newspaper.json".to_string(),
                placeholder: false,
                story_count: 4,
                lead_headline: Some("Big model day".to_string()),
                emphasis: Some("Open Models".to_string()),
            },
            IndexEntry {
                date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                path: "2025/03/01/newspaper.json".to_string(),
                placeholder: true,
                story_count: 1,
                lead_headline: None,
                emphasis: None,
            },
        ];
        let md = render_index_markdown(&entries);
        assert!(md.starts_with("# The Daily Token Archive\n\n"));
        assert!(md.contains("- [2025-03-02](2025/03/02/newspaper.json): Big model day (4 stories)\n"));
        assert!(md.contains("- [2025-03-01](2025/03/01/newspaper.json): Archive placeholder\n"));
        assert!(render_index_markdown(&[]).contains("No editions yet"));
    }

    #[tokio::test]
    async fn test_rebuild_on_empty_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(tmp.path());
        let rebuilt = rebuild_indexes(&store).await.unwrap();
        assert!(rebuilt.entries.is_empty());
        let json = std::fs::read_to_string(tmp.path().join(INDEX_JSON)).unwrap();
        assert_eq!(json, "[]");
    }
}
