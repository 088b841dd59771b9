//! Per-story enrichment: image lookup, categorization, filtering, summarization.
//!
//! [`StoryProcessor::process`] runs every item through a bounded worker pool.
//! Each item is its own spawned task, so an error or a panic while handling
//! one story drops only that story. Survivors are re-sorted by their original
//! index before being returned.

use crate::config::{IRRELEVANT_CATEGORY_ID, PipelineConfig};
use crate::extract::{self, Fields};
use crate::models::{ImageLayout, RawItem, StoryRecord};
use crate::router::LlmRouter;
use crate::sources::ImageSource;
use crate::utils::{BoxError, truncate_chars, truncate_for_log};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_SIGNIFICANCE: u8 = 50;
const DEFAULT_SUMMARY_CHARS: usize = 100;

/// Knobs the processor reads from [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub categories: BTreeMap<u8, String>,
    pub release_category: u8,
    pub workers: usize,
    pub item_delay: Duration,
    pub prefer_cheap: bool,
}

impl From<&PipelineConfig> for ProcessorSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            categories: config.categories.clone(),
            release_category: config.release_category,
            workers: config.workers,
            item_delay: Duration::from_millis(config.item_delay_ms),
            prefer_cheap: config.prefer_cheap,
        }
    }
}

/// Outcome of a successful categorization.
#[derive(Debug, Clone, PartialEq)]
pub struct Categorization {
    pub category_id: u8,
    pub category: String,
    pub confidence: f64,
    pub detected_model: Option<String>,
    pub model_used: String,
    pub cost: f64,
}

/// Summarization fields, defaults already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub headline: String,
    pub summary: String,
    pub significance_score: u8,
    pub selected_image_url: Option<String>,
    pub worth_showing_image: bool,
    pub image_layout: ImageLayout,
    pub model_used: Option<String>,
    pub cost: f64,
}

impl Summary {
    fn defaults(item: &RawItem) -> Self {
        Self {
            headline: item.title.clone(),
            summary: truncate_chars(item.summary.as_deref().unwrap_or_default(), DEFAULT_SUMMARY_CHARS),
            significance_score: DEFAULT_SIGNIFICANCE,
            selected_image_url: None,
            worth_showing_image: false,
            image_layout: ImageLayout::Square,
            model_used: None,
            cost: 0.0,
        }
    }
}

fn categorization_prompt(settings: &ProcessorSettings, item: &RawItem) -> String {
    let categories = settings
        .categories
        .iter()
        .map(|(id, name)| {
            if *id == settings.release_category {
                format!("{id}: {name} (ONLY specific model launches like 'Gemma 3' or 'Llama 4')")
            } else {
                format!("{id}: {name}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"[SYSTEM: RESPOND ONLY WITH JSON]
You are a high-end AI news curator. Categorize this story.

CATEGORIES:
{IRRELEVANT_CATEGORY_ID}: Irrelevant (not about AI, machine learning or language models)
{categories}

STORY:
Title: {title}
Summary: {summary}

REQUIRED JSON FORMAT:
{{
  "category_id": [number],
  "confidence": [0.0-1.0],
  "detected_model": "[Model name if category {release}, else null]"
}}
"#,
        title = item.title,
        summary = item.summary.as_deref().unwrap_or_default(),
        release = settings.release_category,
    )
}

fn summarization_prompt(item: &RawItem, category: &str, images: &[String]) -> String {
    let image_list = if images.is_empty() {
        "NONE FOUND".to_string()
    } else {
        images.join("\n")
    };
    format!(
        r#"[SYSTEM: RESPOND ONLY WITH JSON]
Summarize this AI story. Decide if the cover image is high-quality enough to feature.

STORY:
Title: {title}
Category: {category}
Summary: {summary}

IMAGE CANDIDATES:
{image_list}

REQUIRED JSON FORMAT:
{{
  "headline": "[Professional Headline]",
  "summary": "[1-2 sentence distillation]",
  "significance_score": [1-100],
  "selected_image_url": "[Chosen URL or 'NONE']",
  "worth_showing_image": [true/false],
  "image_layout": "WIDE|TALL|SQUARE"
}}
"#,
        title = item.title,
        summary = item.summary.as_deref().unwrap_or_default(),
    )
}

/// A usable image URL, or `None` for blanks and the `NONE` sentinel.
fn image_url(raw: Option<String>) -> Option<String> {
    raw.map(|u| u.trim().to_string())
        .filter(|u| !u.eq_ignore_ascii_case("none") && u.starts_with("http"))
}

fn non_null(value: Option<String>) -> Option<String> {
    value.filter(|v| !matches!(v.to_ascii_lowercase().as_str(), "null" | "none" | "n/a" | ""))
}

/// Category id and confidence from the extracted fields, falling back to the
/// `"3 | 0.8"` shorthand anywhere in the raw text.
fn category_fields(fields: Option<Fields>, text: &str) -> Option<Fields> {
    match fields {
        Some(f) if f.contains_key("category_id") => Some(f),
        _ => extract::parse_pipe_category(text),
    }
}

/// Apply field-level defaults over whatever the summarization reply yielded.
fn summary_from_reply(item: &RawItem, text: &str) -> Summary {
    let defaults = Summary::defaults(item);
    let fields = extract::extract(text).unwrap_or_default();
    let selected = extract::field_str(&fields, "selected_image_url")
        .or_else(|| extract::labeled_field(text, "selected_image_url"));
    Summary {
        headline: extract::field_str(&fields, "headline").unwrap_or(defaults.headline),
        summary: extract::field_str(&fields, "summary").unwrap_or(defaults.summary),
        significance_score: extract::field_i64(&fields, "significance_score")
            .map(|s| s.clamp(1, 100) as u8)
            .unwrap_or(defaults.significance_score),
        selected_image_url: image_url(selected),
        worth_showing_image: extract::field_bool(&fields, "worth_showing_image")
            .unwrap_or(defaults.worth_showing_image),
        image_layout: extract::field_str(&fields, "image_layout")
            .and_then(|tag| ImageLayout::parse(&tag))
            .unwrap_or(defaults.image_layout),
        model_used: None,
        cost: 0.0,
    }
}

/// Map every configured category to its stories, most confident first, ties
/// broken by raw score.
pub fn organize_by_category(
    categories: &BTreeMap<u8, String>,
    stories: Vec<StoryRecord>,
) -> BTreeMap<u8, Vec<StoryRecord>> {
    let mut organized: BTreeMap<u8, Vec<StoryRecord>> =
        categories.keys().map(|id| (*id, Vec::new())).collect();
    for story in stories {
        if let Some(bucket) = organized.get_mut(&story.category_id) {
            bucket.push(story);
        }
    }
    for bucket in organized.values_mut() {
        bucket.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.score.cmp(&a.score))
        });
    }
    organized
}

/// Enriches raw items through the router. Cheap to clone.
#[derive(Clone)]
pub struct StoryProcessor {
    router: Arc<LlmRouter>,
    images: Arc<dyn ImageSource>,
    settings: Arc<ProcessorSettings>,
}

impl StoryProcessor {
    pub fn new(
        router: Arc<LlmRouter>,
        images: Arc<dyn ImageSource>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            router,
            images,
            settings: Arc::new(settings),
        }
    }

    /// Categorize one item. `None` means the item must be dropped: the
    /// router was exhausted, nothing was extractable, or the category is
    /// irrelevant or unknown.
    #[instrument(level = "debug", skip_all, fields(title = %truncate_for_log(&item.title, 60)))]
    pub async fn categorize(&self, item: &RawItem) -> Option<Categorization> {
        let prompt = categorization_prompt(&self.settings, item);
        let reply = match self
            .router
            .call_llm(&prompt, self.settings.prefer_cheap, true)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Categorization failed; dropping story");
                return None;
            }
        };

        let Some(fields) = category_fields(extract::extract(&reply.response), &reply.response)
        else {
            debug!(
                response = %truncate_for_log(&reply.response, 200),
                "Unparseable categorization; treating as irrelevant"
            );
            return None;
        };

        let id = extract::field_i64(&fields, "category_id")
            .and_then(|id| u8::try_from(id).ok())
            .unwrap_or(IRRELEVANT_CATEGORY_ID);
        if id == IRRELEVANT_CATEGORY_ID {
            debug!("Filtered as irrelevant");
            return None;
        }
        let Some(name) = self.settings.categories.get(&id) else {
            debug!(category_id = id, "Unknown category id; treating as irrelevant");
            return None;
        };

        Some(Categorization {
            category_id: id,
            category: name.clone(),
            confidence: extract::field_f64(&fields, "confidence")
                .unwrap_or(0.0)
                .clamp(0.0, 1.0),
            detected_model: non_null(extract::field_str(&fields, "detected_model")),
            model_used: reply.model,
            cost: reply.cost,
        })
    }

    /// Summarize one item. Router exhaustion and unparseable replies both
    /// fall back to field defaults.
    #[instrument(level = "debug", skip_all, fields(title = %truncate_for_log(&item.title, 60)))]
    pub async fn summarize(&self, item: &RawItem, category: &str, images: &[String]) -> Summary {
        let prompt = summarization_prompt(item, category, images);
        match self
            .router
            .call_llm(&prompt, self.settings.prefer_cheap, true)
            .await
        {
            Ok(reply) => Summary {
                model_used: Some(reply.model),
                cost: reply.cost,
                ..summary_from_reply(item, &reply.response)
            },
            Err(e) => {
                warn!(error = %e, "Summarization failed; using defaults");
                Summary::defaults(item)
            }
        }
    }

    /// Full pipeline for one item. `Ok(None)` when the item is filtered out.
    #[instrument(level = "info", skip_all, fields(index = index))]
    pub async fn process_one(
        &self,
        index: usize,
        item: RawItem,
    ) -> Result<Option<StoryRecord>, BoxError> {
        let candidates = self.images.candidate_images(&item.url).await?;

        let Some(cat) = self.categorize(&item).await else {
            info!(title = %truncate_for_log(&item.title, 60), "Story filtered");
            return Ok(None);
        };

        let sum = self.summarize(&item, &cat.category, &candidates).await;
        let selected_image_url = sum
            .selected_image_url
            .or_else(|| candidates.first().cloned());

        info!(
            category = %cat.category,
            cat_model = %cat.model_used,
            "Story enriched"
        );

        Ok(Some(StoryRecord {
            original_title: item.title,
            url: item.url,
            hn_url: item.hn_url.unwrap_or_default(),
            source: item.source.unwrap_or_else(|| "Unknown".to_string()),
            score: item.score.unwrap_or(0),
            published: item.published,
            generated_headline: sum.headline,
            summary: sum.summary,
            significance_score: sum.significance_score,
            category_id: cat.category_id,
            category: cat.category,
            confidence: cat.confidence,
            selected_image_url,
            worth_showing_image: sum.worth_showing_image,
            image_layout: sum.image_layout,
            detected_model: cat.detected_model,
            model_used: format!(
                "Cat: {}, Sum: {}",
                cat.model_used,
                sum.model_used.as_deref().unwrap_or("none")
            ),
            cost: cat.cost + sum.cost,
        }))
    }

    /// Enrich a batch. Output keeps the input order of the surviving items.
    #[instrument(level = "info", skip_all, fields(total = items.len(), workers = self.settings.workers))]
    pub async fn process(&self, items: Vec<RawItem>) -> Vec<StoryRecord> {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }
        let cost_before = self.router.ledger().total_cost();

        let mut survivors: Vec<(usize, StoryRecord)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let this = self.clone();
                async move {
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(this.settings.item_delay).await;
                        this.process_one(index, item).await
                    });
                    match task.await {
                        Ok(Ok(Some(record))) => Some((index, record)),
                        Ok(Ok(None)) => None,
                        Ok(Err(e)) => {
                            warn!(index, error = %e, "Story failed; dropping");
                            None
                        }
                        Err(e) => {
                            error!(index, error = %e, "Story task aborted; dropping");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.settings.workers.max(1))
            .filter_map(std::future::ready)
            .collect()
            .await;

        survivors.sort_by_key(|(index, _)| *index);
        let processed: Vec<StoryRecord> = survivors.into_iter().map(|(_, s)| s).collect();

        info!(
            total,
            processed = processed.len(),
            dropped = total - processed.len(),
            batch_cost = self.router.ledger().total_cost() - cost_before,
            "Completed story processing"
        );
        processed
    }
}
