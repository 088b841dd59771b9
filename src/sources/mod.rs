//! Raw news item sources and cover image lookup.
//!
//! Every source implements [`RawItemSource`] and answers one question: what
//! was published on a given UTC day. [`NewsAggregator`] fans out over a set of
//! sources and applies the shared filtering:
//!
//! 1. a failing source is logged and skipped, never failing the day,
//! 2. items must mention one of the configured AI keywords,
//! 3. items are de-duplicated by URL, first occurrence wins,
//! 4. the list is ordered by popularity score and capped.
//!
//! | Source | Module | Method |
//! |--------|--------|--------|
//! | HackerNews | [`hackernews`] | Algolia `search_by_date` API |
//! | RSS 2.0 feeds | [`rss`] | `quick-xml` serde |
//! | Cover images | [`images`] | HTML meta tags via `scraper` |

pub mod hackernews;
pub mod images;
pub mod rss;

use crate::models::RawItem;
use crate::utils::BoxError;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;
use itertools::Itertools;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Browser-like user agent; several publishers reject bare HTTP clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Supplies the raw items published on one calendar day.
#[async_trait]
pub trait RawItemSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_day(&self, date: NaiveDate) -> Result<Vec<RawItem>, BoxError>;
}

/// Supplies candidate cover image URLs for an article.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn candidate_images(&self, url: &str) -> Result<Vec<String>, BoxError>;
}

/// Image source that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImages;

#[async_trait]
impl ImageSource for NoImages {
    async fn candidate_images(&self, _url: &str) -> Result<Vec<String>, BoxError> {
        Ok(Vec::new())
    }
}

/// Case-insensitive keyword match on title or URL.
pub fn is_relevant(item: &RawItem, keywords: &[String]) -> bool {
    let title = item.title.to_lowercase();
    let url = item.url.to_lowercase();
    keywords.iter().any(|k| {
        let k = k.to_lowercase();
        title.contains(&k) || url.contains(&k)
    })
}

/// Combines several sources into one filtered, de-duplicated day feed.
pub struct NewsAggregator {
    sources: Vec<Arc<dyn RawItemSource>>,
    keywords: Vec<String>,
    max_items: usize,
}

impl NewsAggregator {
    pub fn new(keywords: Vec<String>, max_items: usize) -> Self {
        Self {
            sources: Vec::new(),
            keywords,
            max_items,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn RawItemSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Keyword filter, URL de-duplication, score ordering and cap.
    fn refine(&self, items: Vec<RawItem>) -> Vec<RawItem> {
        let mut items: Vec<RawItem> = items
            .into_iter()
            .filter(|item| !item.title.trim().is_empty() && !item.url.trim().is_empty())
            .filter(|item| self.keywords.is_empty() || is_relevant(item, &self.keywords))
            .unique_by(|item| item.url.trim_end_matches('/').to_string())
            .collect();
        items.sort_by_key(|item| Reverse(item.score.unwrap_or(0)));
        items.truncate(self.max_items);
        items
    }
}

#[async_trait]
impl RawItemSource for NewsAggregator {
    fn name(&self) -> &str {
        "aggregator"
    }

    #[instrument(level = "info", skip_all, fields(%date, sources = self.sources.len()))]
    async fn fetch_day(&self, date: NaiveDate) -> Result<Vec<RawItem>, BoxError> {
        let results = join_all(self.sources.iter().map(|s| s.fetch_day(date))).await;

        let mut items = Vec::new();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(batch) => {
                    info!(source = source.name(), count = batch.len(), "Fetched raw items");
                    items.extend(batch);
                }
                Err(e) => warn!(source = source.name(), error = %e, "Source failed; skipping"),
            }
        }

        let fetched = items.len();
        let items = self.refine(items);
        info!(fetched, kept = items.len(), "Aggregated day feed");
        Ok(items)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory sources for tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned items per date; unknown dates yield nothing.
    #[derive(Default)]
    pub struct StaticSource {
        pub days: HashMap<NaiveDate, Vec<RawItem>>,
        pub failing: Vec<NaiveDate>,
        fetches: AtomicUsize,
    }

    impl StaticSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_day(mut self, date: NaiveDate, items: Vec<RawItem>) -> Self {
            self.days.insert(date, items);
            self
        }

        pub fn failing_on(mut self, date: NaiveDate) -> Self {
            self.failing.push(date);
            self
        }

        pub fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RawItemSource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch_day(&self, date: NaiveDate) -> Result<Vec<RawItem>, BoxError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&date) {
                return Err(format!("upstream unavailable for {date}").into());
            }
            Ok(self.days.get(&date).cloned().unwrap_or_default())
        }
    }

    /// Fixed image candidates per article URL.
    #[derive(Default)]
    pub struct StaticImages {
        pub by_url: HashMap<String, Vec<String>>,
        pub lookups: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageSource for StaticImages {
        async fn candidate_images(&self, url: &str) -> Result<Vec<String>, BoxError> {
            self.lookups.lock().unwrap().push(url.to_string());
            Ok(self.by_url.get(url).cloned().unwrap_or_default())
        }
    }

    pub fn item(title: &str, url: &str, score: i64) -> RawItem {
        RawItem {
            title: title.to_string(),
            url: url.to_string(),
            summary: Some(format!("About {title}")),
            source: Some("HackerNews".to_string()),
            score: Some(score),
            ..Default::default()
        }
    }
}
