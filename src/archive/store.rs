//! On-disk layout of the edition archive.
//!
//! ```text
//! archive_root/
//! ├── index.json
//! ├── index.md
//! ├── model_releases.json
//! ├── llm_usage.json
//! └── 2025/
//!     └── 03/
//!         └── 14/
//!             ├── metadata.json
//!             ├── model_releases.json
//!             └── newspaper.json      # completion marker, written last
//! ```
//!
//! A day is present iff its `newspaper.json` exists. Every artifact is written
//! through a temp file and a rename, and the marker goes last, so an
//! interrupted write leaves the day absent rather than half-present.

use crate::models::{Edition, EditionMetadata, ModelRelease, StoryRecord};
use crate::utils::{BoxError, write_atomic};
use chrono::NaiveDate;
use itertools::Itertools;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

pub const EDITION_FILE: &str = "newspaper.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const RELEASES_FILE: &str = "model_releases.json";

/// Handle on an archive root directory.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `root/YYYY/MM/DD`
    pub fn day_dir(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(date.format("%Y").to_string())
            .join(date.format("%m").to_string())
            .join(date.format("%d").to_string())
    }

    pub fn marker_path(&self, date: NaiveDate) -> PathBuf {
        self.day_dir(date).join(EDITION_FILE)
    }

    /// Marker path relative to the root, with forward slashes.
    pub fn relative_edition_path(date: NaiveDate) -> String {
        format!("{}/{EDITION_FILE}", date.format("%Y/%m/%d"))
    }

    pub async fn is_present(&self, date: NaiveDate) -> bool {
        fs::metadata(self.marker_path(date))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Persist a day. The marker is written only after the side-cars.
    #[instrument(level = "info", skip_all, fields(date = %edition.date))]
    pub async fn write_edition(
        &self,
        edition: &Edition,
        metadata: &EditionMetadata,
        releases: &[ModelRelease],
    ) -> Result<PathBuf, BoxError> {
        let dir = self.day_dir(edition.date);
        fs::create_dir_all(&dir).await?;

        write_atomic(&dir.join(METADATA_FILE), &serde_json::to_vec_pretty(metadata)?).await?;
        write_atomic(&dir.join(RELEASES_FILE), &serde_json::to_vec_pretty(releases)?).await?;

        let marker = dir.join(EDITION_FILE);
        write_atomic(&marker, &serde_json::to_vec_pretty(edition)?).await?;
        info!(
            path = %marker.display(),
            stories = edition.story_count(),
            placeholder = edition.placeholder,
            "Wrote edition"
        );
        Ok(marker)
    }

    pub async fn read_edition(&self, date: NaiveDate) -> Result<Edition, BoxError> {
        let bytes = fs::read(self.marker_path(date)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// A day's release list; a missing file means no releases.
    pub async fn read_releases(&self, date: NaiveDate) -> Result<Vec<ModelRelease>, BoxError> {
        match fs::read(self.day_dir(date).join(RELEASES_FILE)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every day whose completion marker exists, ascending.
    pub async fn existing_days(&self) -> Result<Vec<NaiveDate>, BoxError> {
        let mut days = Vec::new();
        for (year, year_dir) in numbered_dirs(&self.root).await? {
            for (month, month_dir) in numbered_dirs(&year_dir).await? {
                for (day, _) in numbered_dirs(&month_dir).await? {
                    let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) else {
                        continue;
                    };
                    if self.is_present(date).await {
                        days.push(date);
                    }
                }
            }
        }
        days.sort();
        debug!(count = days.len(), "Scanned archive");
        Ok(days)
    }
}

/// Numerically named sub-directories of `path`, sorted. A missing `path`
/// has none.
async fn numbered_dirs(path: &Path) -> Result<Vec<(u32, PathBuf)>, BoxError> {
    let mut entries = match fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) {
            dirs.push((n, entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Model launches among a day's stories: release-category stories that name
/// a model, one entry per model.
pub fn extract_model_releases(
    date: NaiveDate,
    stories: &[StoryRecord],
    release_category: u8,
) -> Vec<ModelRelease> {
    stories
        .iter()
        .filter(|s| s.category_id == release_category)
        .filter_map(|s| {
            let model = s.detected_model.as_deref()?.trim();
            (!model.is_empty()).then(|| ModelRelease {
                date,
                model: model.to_string(),
                headline: s.generated_headline.clone(),
                url: s.url.clone(),
                source: s.source.clone(),
            })
        })
        .unique_by(|r| r.model.to_lowercase())
        .collect()
}
