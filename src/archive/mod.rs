//! Day-by-day archive generation with a continuity guarantee.
//!
//! For each date of a closed range, in ascending order, [`ArchiveOrchestrator`]
//! either skips a day that already has an edition, writes a placeholder
//! edition when the source returned nothing, or processes and persists a
//! full edition. A failing day is logged and the range continues. After the
//! range, the archive indexes are rebuilt from disk and the usage log saved.

pub mod indexes;
pub mod store;

use crate::config::PipelineConfig;
use crate::editorial::{EditorialAggregator, select_top_candidates};
use crate::models::{
    Edition, EditionMetadata, EditorialDecision, ImageLayout, StoryRecord, UsageStats,
};
use crate::processor::{StoryProcessor, organize_by_category};
use crate::router::ledger::UsageLedger;
use crate::sources::RawItemSource;
use crate::utils::{BoxError, iter_dates};
use chrono::{NaiveDate, NaiveTime, Utc};
use futures::FutureExt;
use indexes::rebuild_indexes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use store::{ArchiveStore, extract_model_releases};
use tracing::{error, info, instrument, warn};

pub const USAGE_LOG_FILE: &str = "llm_usage.json";
pub const PLACEHOLDER_NOTE: &str = "Signal unavailable today; archive entry retained for continuity.";
pub const PLACEHOLDER_EMPHASIS: &str = "Continuity";
const PLACEHOLDER_SUMMARY: &str = "Source fetch returned nothing for this date. This placeholder preserves archive continuity until a backfill succeeds.";

/// Archive knobs taken from [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub categories: BTreeMap<u8, String>,
    pub release_category: u8,
    pub placeholder_category: u8,
    pub editorial_top_k: usize,
    pub max_stories_per_day: usize,
}

impl From<&PipelineConfig> for ArchiveSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            categories: config.categories.clone(),
            release_category: config.release_category,
            placeholder_category: config.placeholder_category,
            editorial_top_k: config.editorial_top_k,
            max_stories_per_day: config.max_stories_per_day,
        }
    }
}

/// What happened to one requested day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOutcome {
    Skipped,
    Generated,
    Placeholder,
}

/// Per-range summary, dates ascending within each list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RangeReport {
    pub skipped: Vec<NaiveDate>,
    pub generated: Vec<NaiveDate>,
    pub placeholders: Vec<NaiveDate>,
    pub failed: Vec<NaiveDate>,
}

impl RangeReport {
    pub fn total(&self) -> usize {
        self.skipped.len() + self.generated.len() + self.placeholders.len() + self.failed.len()
    }

    fn record(&mut self, date: NaiveDate, outcome: DayOutcome) {
        match outcome {
            DayOutcome::Skipped => self.skipped.push(date),
            DayOutcome::Generated => self.generated.push(date),
            DayOutcome::Placeholder => self.placeholders.push(date),
        }
    }
}

/// `YYYY-MM-DDT00:00:00`
fn edition_timestamp(date: NaiveDate) -> String {
    date.and_time(NaiveTime::MIN)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// The single-entry edition written when a day has no source items.
pub fn placeholder_edition(date: NaiveDate, settings: &ArchiveSettings) -> Edition {
    let category_id = settings.placeholder_category;
    let story = StoryRecord {
        original_title: format!("Archive Placeholder for {date}"),
        url: String::new(),
        hn_url: String::new(),
        source: "Daily Token".to_string(),
        score: 0,
        published: None,
        generated_headline: format!("Archive Record Pending: {date}"),
        summary: PLACEHOLDER_SUMMARY.to_string(),
        significance_score: 1,
        category_id,
        category: settings
            .categories
            .get(&category_id)
            .cloned()
            .unwrap_or_default(),
        confidence: 1.0,
        selected_image_url: None,
        worth_showing_image: false,
        image_layout: ImageLayout::Square,
        detected_model: None,
        model_used: "none".to_string(),
        cost: 0.0,
    };
    let mut organized = organize_by_category(&settings.categories, Vec::new());
    organized.insert(category_id, vec![story]);
    Edition {
        date,
        timestamp: edition_timestamp(date),
        placeholder: true,
        organized,
        top_candidates: Vec::new(),
        editorial: EditorialDecision {
            main_lead_index: 0,
            supporting_lead_indices: Vec::new(),
            editors_note: PLACEHOLDER_NOTE.to_string(),
            emphasis: PLACEHOLDER_EMPHASIS.to_string(),
        },
        usage: UsageStats::default(),
    }
}

pub struct ArchiveOrchestrator {
    store: ArchiveStore,
    source: Arc<dyn RawItemSource>,
    processor: StoryProcessor,
    editorial: EditorialAggregator,
    ledger: UsageLedger,
    settings: ArchiveSettings,
}

impl ArchiveOrchestrator {
    pub fn new(
        store: ArchiveStore,
        source: Arc<dyn RawItemSource>,
        processor: StoryProcessor,
        editorial: EditorialAggregator,
        ledger: UsageLedger,
        settings: ArchiveSettings,
    ) -> Self {
        Self {
            store,
            source,
            processor,
            editorial,
            ledger,
            settings,
        }
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// Walk `start..=end`. Never fails; per-day problems land in
    /// [`RangeReport::failed`].
    #[instrument(level = "info", skip_all, fields(%start, %end, overwrite = overwrite))]
    pub async fn run(&self, start: NaiveDate, end: NaiveDate, overwrite: bool) -> RangeReport {
        let mut report = RangeReport::default();
        let ledger_offset = self.ledger.len();

        for date in iter_dates(start, end) {
            let outcome = AssertUnwindSafe(self.run_day(date, overwrite))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(outcome)) => report.record(date, outcome),
                Ok(Err(e)) => {
                    error!(%date, error = %e, "Day failed; continuing with next date");
                    report.failed.push(date);
                }
                Err(_) => {
                    error!(%date, "Day panicked; continuing with next date");
                    report.failed.push(date);
                }
            }
        }

        if let Err(e) = rebuild_indexes(&self.store).await {
            error!(error = %e, "Failed to rebuild archive indexes");
        }
        // A run that made no calls leaves the previous usage log in place.
        if self.ledger.len() > ledger_offset {
            if let Err(e) = self.ledger.save(&self.store.root().join(USAGE_LOG_FILE)).await {
                warn!(error = %e, "Failed to save usage log");
            }
        }

        info!(
            skipped = report.skipped.len(),
            generated = report.generated.len(),
            placeholders = report.placeholders.len(),
            failed = report.failed.len(),
            "Archive range complete"
        );
        report
    }

    /// Handle one date: skip, placeholder or full edition.
    #[instrument(level = "info", skip_all, fields(%date))]
    pub async fn run_day(&self, date: NaiveDate, overwrite: bool) -> Result<DayOutcome, BoxError> {
        if !overwrite && self.store.is_present(date).await {
            info!("Edition exists; skipping");
            return Ok(DayOutcome::Skipped);
        }

        let items = self.source.fetch_day(date).await?;
        if items.is_empty() {
            warn!("No stories found; writing placeholder edition");
            let edition = placeholder_edition(date, &self.settings);
            let metadata = EditionMetadata {
                timestamp: edition.timestamp.clone(),
                generated_at: Utc::now(),
                total_stories: 0,
                processed_stories: edition.story_count(),
                model_releases: 0,
                placeholder: true,
            };
            self.store.write_edition(&edition, &metadata, &[]).await?;
            return Ok(DayOutcome::Placeholder);
        }

        let usage_offset = self.ledger.len();
        let total_stories = items.len();
        let items = items
            .into_iter()
            .take(self.settings.max_stories_per_day)
            .collect();

        let processed = self.processor.process(items).await;
        let top_candidates = select_top_candidates(&processed, self.settings.editorial_top_k);
        let editorial = self.editorial.decide(&top_candidates).await;
        let releases = extract_model_releases(date, &processed, self.settings.release_category);
        let processed_stories = processed.len();

        let edition = Edition {
            date,
            timestamp: edition_timestamp(date),
            placeholder: false,
            organized: organize_by_category(&self.settings.categories, processed),
            top_candidates,
            editorial,
            usage: UsageStats::from_entries(&self.ledger.entries_since(usage_offset)),
        };
        let metadata = EditionMetadata {
            timestamp: edition.timestamp.clone(),
            generated_at: Utc::now(),
            total_stories,
            processed_stories,
            model_releases: releases.len(),
            placeholder: false,
        };
        self.store.write_edition(&edition, &metadata, &releases).await?;
        info!(
            total_stories,
            processed_stories,
            releases = releases.len(),
            day_cost = edition.usage.total_cost,
            "Edition generated"
        );
        Ok(DayOutcome::Generated)
    }
}

#[cfg(test)]
mod tests {
    use super::indexes::{INDEX_JSON, IndexEntry, RELEASE_LEDGER};
    use super::*;
    use crate::models::{ModelRelease, RawItem};
    use crate::processor::ProcessorSettings;
    use crate::router::LlmRouter;
    use crate::router::catalog::{ModelCatalog, default_models};
    use crate::router::providers::ProviderReply;
    use crate::router::testing::FakeProvider;
    use crate::sources::NoImages;
    use crate::sources::testing::{StaticSource, item};
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn title_of(prompt: &str) -> String {
        prompt
            .lines()
            .find_map(|l| l.strip_prefix("Title: "))
            .unwrap_or_default()
            .to_string()
    }

    fn scripted() -> Arc<FakeProvider> {
        Arc::new(FakeProvider::new(|_, prompt| {
            let title = title_of(prompt);
            let text = if prompt.contains("Categorize this story") {
                if title.contains("Gemma") {
                    json!({"category_id": 7, "confidence": 0.9, "detected_model": "Gemma 3"})
                        .to_string()
                } else {
                    "2 | 0.6".to_string()
                }
            } else if prompt.contains("Chief Editor") {
                json!({"main_lead_index": 0, "supporting_lead_indices": [1],
                       "editors_note": "Steady.", "emphasis": "Open Models"})
                .to_string()
            } else {
                json!({"headline": format!("{title}!"), "summary": "S.", "significance_score": 60})
                    .to_string()
            };
            Ok(ProviderReply::from_text(&text))
        }))
    }

    fn orchestrator(root: &Path, source: Arc<StaticSource>) -> ArchiveOrchestrator {
        let config = PipelineConfig::default();
        let provider = scripted();
        let (models, weights) = default_models().into_iter().unzip();
        let router = Arc::new(
            LlmRouter::new(ModelCatalog::new(models, weights).unwrap())
                .with_client("huggingface", provider.clone())
                .with_client("openrouter", provider)
                .with_seed(11),
        );
        let processor = StoryProcessor::new(
            Arc::clone(&router),
            Arc::new(NoImages),
            ProcessorSettings {
                item_delay: Duration::ZERO,
                ..ProcessorSettings::from(&config)
            },
        );
        ArchiveOrchestrator::new(
            ArchiveStore::new(root),
            source,
            processor,
            EditorialAggregator::new(Arc::clone(&router), true),
            router.ledger().clone(),
            ArchiveSettings::from(&config),
        )
    }

    fn two_items() -> Vec<RawItem> {
        vec![
            item("Gemma 3 released", "https://a.io/gemma", 300),
            item("LLM serving tricks", "https://a.io/serving", 120),
        ]
    }

    /// Every file under `root` with its bytes.
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    files.insert(path.clone(), std::fs::read(&path).unwrap());
                }
            }
        }
        files
    }

    fn index_dates(root: &Path) -> Vec<NaiveDate> {
        let raw = std::fs::read_to_string(root.join(INDEX_JSON)).unwrap();
        let entries: Vec<IndexEntry> = serde_json::from_str(&raw).unwrap();
        entries.into_iter().map(|e| e.date).collect()
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(StaticSource::new().with_day(date(14), two_items()));
        let orch = orchestrator(tmp.path(), source.clone());

        let first = orch.run(date(14), date(14), false).await;
        assert_eq!(first.generated, vec![date(14)]);
        assert_eq!(source.fetches(), 1);
        let before = snapshot(tmp.path());

        let second = orch.run(date(14), date(14), false).await;
        assert_eq!(second.skipped, vec![date(14)]);
        assert!(second.generated.is_empty());
        assert_eq!(source.fetches(), 1);
        assert_eq!(snapshot(tmp.path()), before);
    }

    #[tokio::test]
    async fn test_rerun_from_fresh_process_keeps_disk_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(StaticSource::new().with_day(date(14), two_items()));
        let first = orchestrator(tmp.path(), source.clone()).run(date(14), date(14), false).await;
        assert_eq!(first.generated, vec![date(14)]);
        let before = snapshot(tmp.path());
        let usage: serde_json::Value = serde_json::from_slice(
            &std::fs::read(tmp.path().join(USAGE_LOG_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(usage["stats"]["total_calls"], 5);

        // New router and ledger over the same archive root.
        let second = orchestrator(tmp.path(), source.clone()).run(date(14), date(14), false).await;
        assert_eq!(second.skipped, vec![date(14)]);
        assert_eq!(source.fetches(), 1);
        assert_eq!(snapshot(tmp.path()), before);
    }

    #[tokio::test]
    async fn test_full_edition_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(StaticSource::new().with_day(date(14), two_items()));
        let orch = orchestrator(tmp.path(), source);
        orch.run(date(14), date(14), false).await;

        let edition = orch.store().read_edition(date(14)).await.unwrap();
        assert!(!edition.placeholder);
        assert_eq!(edition.timestamp, "2025-03-14T00:00:00");
        assert_eq!(edition.story_count(), 2);
        assert_eq!(edition.organized[&7].len(), 1);
        assert_eq!(edition.organized[&2].len(), 1);
        assert_eq!(edition.organized.len(), 9);
        assert_eq!(edition.editorial.emphasis, "Open Models");
        assert_eq!(edition.top_candidates.len(), 2);
        // Two calls per story plus the editorial pass.
        assert_eq!(edition.usage.total_calls, 5);

        let releases: Vec<ModelRelease> = serde_json::from_str(
            &std::fs::read_to_string(tmp.path().join(RELEASE_LEDGER)).unwrap(),
        )
        .unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].model, "Gemma 3");
        assert!(tmp.path().join(USAGE_LOG_FILE).is_file());
    }

    #[tokio::test]
    async fn test_empty_day_gets_one_placeholder_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(StaticSource::new());
        let orch = orchestrator(tmp.path(), source);
        let report = orch.run(date(1), date(1), false).await;
        assert_eq!(report.placeholders, vec![date(1)]);

        let edition = orch.store().read_edition(date(1)).await.unwrap();
        assert!(edition.placeholder);
        assert_eq!(edition.story_count(), 1);
        assert_eq!(edition.organized[&6].len(), 1);
        assert_eq!(
            edition.organized[&6][0].generated_headline,
            "Archive Record Pending: 2025-03-01"
        );
        assert_eq!(edition.editorial.editors_note, PLACEHOLDER_NOTE);
        assert_eq!(index_dates(tmp.path()), vec![date(1)]);
    }

    #[tokio::test]
    async fn test_failing_day_does_not_abort_range() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(
            StaticSource::new()
                .with_day(date(1), two_items())
                .failing_on(date(2))
                .with_day(date(3), two_items()),
        );
        let orch = orchestrator(tmp.path(), source.clone());
        let report = orch.run(date(1), date(3), false).await;
        assert_eq!(report.generated, vec![date(1), date(3)]);
        assert_eq!(report.failed, vec![date(2)]);
        assert_eq!(report.total(), 3);
        assert!(!orch.store().is_present(date(2)).await);
        assert_eq!(index_dates(tmp.path()), vec![date(3), date(1)]);
    }

    #[tokio::test]
    async fn test_index_reflects_only_marked_days() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(
            StaticSource::new()
                .with_day(date(5), two_items())
                .with_day(date(6), two_items()),
        );
        let orch = orchestrator(tmp.path(), source);
        orch.run(date(5), date(7), false).await;
        assert_eq!(index_dates(tmp.path()), vec![date(7), date(6), date(5)]);

        // Simulate an interrupted write and a stray partial directory.
        std::fs::remove_file(orch.store().marker_path(date(6))).unwrap();
        std::fs::create_dir_all(orch.store().day_dir(date(9))).unwrap();
        std::fs::write(orch.store().day_dir(date(9)).join("metadata.json"), "{}").unwrap();

        let rebuilt = rebuild_indexes(orch.store()).await.unwrap();
        let present = orch.store().existing_days().await.unwrap();
        assert_eq!(present, vec![date(5), date(7)]);
        assert_eq!(index_dates(tmp.path()), vec![date(7), date(5)]);
        assert_eq!(rebuilt.entries.len(), present.len());
    }

    #[tokio::test]
    async fn test_overwrite_regenerates() {
        let tmp = tempfile::tempdir().unwrap();
        let source = Arc::new(StaticSource::new().with_day(date(14), two_items()));
        let orch = orchestrator(tmp.path(), source.clone());
        orch.run(date(14), date(14), false).await;
        let report = orch.run(date(14), date(14), true).await;
        assert_eq!(report.generated, vec![date(14)]);
        assert_eq!(source.fetches(), 2);
    }

    #[test]
    fn test_placeholder_edition_shape() {
        let settings = ArchiveSettings::from(&PipelineConfig::default());
        let edition = placeholder_edition(date(2), &settings);
        assert_eq!(edition.organized.len(), settings.categories.len());
        assert_eq!(edition.story_count(), 1);
        assert_eq!(edition.organized[&6][0].category, "AI & LLM Overview");
        assert_eq!(edition.lead_headline(), Some("Archive Record Pending: 2025-03-02"));
    }
}
