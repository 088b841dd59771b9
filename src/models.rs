//! Data models shared across the pipeline.
//!
//! This module defines the core data structures:
//! - [`RawItem`]: an unprocessed news item as delivered by a source
//! - [`StoryRecord`]: the working unit enriched by the processor
//! - [`EditorialDecision`]: the single cross-item layout decision per edition
//! - [`UsageLogEntry`] / [`UsageStats`]: the router's cost ledger
//! - [`Edition`] / [`EditionMetadata`] / [`ModelRelease`]: what is persisted per day

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A raw news item as delivered by the fetch collaborator.
///
/// Only `title` and `url` are guaranteed; everything else is best effort.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawItem {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub score: Option<i64>,
    /// Discussion thread URL (HackerNews item page).
    #[serde(default)]
    pub hn_url: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
}

/// Cover image layout tag chosen by the summarization model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageLayout {
    Wide,
    Tall,
    #[default]
    Square,
}

impl ImageLayout {
    /// Parse a model-provided tag, case-insensitively. Unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "WIDE" => Some(ImageLayout::Wide),
            "TALL" => Some(ImageLayout::Tall),
            "SQUARE" => Some(ImageLayout::Square),
            _ => None,
        }
    }
}

impl fmt::Display for ImageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageLayout::Wide => write!(f, "WIDE"),
            ImageLayout::Tall => write!(f, "TALL"),
            ImageLayout::Square => write!(f, "SQUARE"),
        }
    }
}

/// A story after enrichment.
///
/// Built by the processor from a [`RawItem`]; once placed into an edition's
/// category mapping it is no longer mutated.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoryRecord {
    pub original_title: String,
    pub url: String,
    pub hn_url: String,
    pub source: String,
    /// Raw popularity score from the source.
    pub score: i64,
    pub published: Option<String>,
    pub generated_headline: String,
    pub summary: String,
    /// Editorial significance, 1..=100.
    pub significance_score: u8,
    pub category_id: u8,
    pub category: String,
    /// Categorization confidence, 0.0..=1.0.
    pub confidence: f64,
    pub selected_image_url: Option<String>,
    pub worth_showing_image: bool,
    pub image_layout: ImageLayout,
    pub detected_model: Option<String>,
    /// Which model produced which field, e.g. `Cat: Qwen3, Sum: GPT-OSS`.
    pub model_used: String,
    /// Estimated cost in USD accumulated over every call for this story.
    pub cost: f64,
}

/// Front page layout decision made once per edition.
///
/// Indices refer to the edition's `top_candidates` list.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EditorialDecision {
    pub main_lead_index: usize,
    pub supporting_lead_indices: Vec<usize>,
    pub editors_note: String,
    pub emphasis: String,
}

/// One successful routed call.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UsageLogEntry {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub success: bool,
}

/// Per-model slice of [`UsageStats`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ModelUsage {
    pub count: u64,
    pub cost: f64,
}

/// Aggregate view over a set of [`UsageLogEntry`] values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct UsageStats {
    pub total_calls: u64,
    pub total_cost: f64,
    pub by_model: BTreeMap<String, ModelUsage>,
    pub avg_cost_per_call: f64,
}

impl UsageStats {
    pub fn from_entries(entries: &[UsageLogEntry]) -> Self {
        let mut stats = UsageStats::default();
        for entry in entries {
            stats.total_calls += 1;
            stats.total_cost += entry.cost;
            let usage = stats.by_model.entry(entry.model.clone()).or_default();
            usage.count += 1;
            usage.cost += entry.cost;
        }
        if stats.total_calls > 0 {
            stats.avg_cost_per_call = stats.total_cost / stats.total_calls as f64;
        }
        stats
    }
}

/// A model launch spotted in a day's stories.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelRelease {
    pub date: NaiveDate,
    pub model: String,
    pub headline: String,
    pub url: String,
    pub source: String,
}

/// The persisted unit for one calendar day.
///
/// `organized` maps every configured category id to its ordered stories.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Edition {
    pub date: NaiveDate,
    /// Edition timestamp: the day at midnight.
    pub timestamp: String,
    pub placeholder: bool,
    pub organized: BTreeMap<u8, Vec<StoryRecord>>,
    pub top_candidates: Vec<StoryRecord>,
    pub editorial: EditorialDecision,
    pub usage: UsageStats,
}

impl Edition {
    /// Total number of stories across all categories.
    pub fn story_count(&self) -> usize {
        self.organized.values().map(Vec::len).sum()
    }

    /// Headline of the chosen main lead, if there is one.
    pub fn lead_headline(&self) -> Option<&str> {
        self.top_candidates
            .get(self.editorial.main_lead_index)
            .or_else(|| self.organized.values().flatten().next())
            .map(|s| s.generated_headline.as_str())
    }
}

/// Side-car summary written next to each edition.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EditionMetadata {
    pub timestamp: String,
    pub generated_at: DateTime<Utc>,
    pub total_stories: usize,
    pub processed_stories: usize,
    pub model_releases: usize,
    pub placeholder: bool,
}
