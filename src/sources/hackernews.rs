//! HackerNews stories via the Algolia search API.
//!
//! `search_by_date` with a `created_at_i` window returns the stories submitted
//! during one UTC day, which makes historical backfill possible.

use super::{RawItemSource, USER_AGENT};
use crate::models::RawItem;
use crate::utils::BoxError;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

pub const ALGOLIA_SEARCH_URL: &str = "https://hn.algolia.com/api/v1/search_by_date";
pub const HN_ITEM_URL: &str = "https://news.ycombinator.com/item?id=";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "objectID")]
    object_id: String,
    title: Option<String>,
    url: Option<String>,
    points: Option<i64>,
    created_at: Option<String>,
    story_text: Option<String>,
}

impl Hit {
    fn into_raw_item(self) -> Option<RawItem> {
        let title = self.title.filter(|t| !t.trim().is_empty())?;
        let hn_url = format!("{HN_ITEM_URL}{}", self.object_id);
        // Ask/Show HN posts have no external link; the thread is the story.
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| hn_url.clone());
        Some(RawItem {
            title,
            url,
            summary: self.story_text,
            source: Some("HackerNews".to_string()),
            score: self.points,
            hn_url: Some(hn_url),
            published: self.created_at,
        })
    }
}

/// Unix second bounds `[start, end)` of a UTC calendar day.
pub fn day_bounds(date: NaiveDate) -> (i64, i64) {
    let start = date.and_time(NaiveTime::MIN).and_utc().timestamp();
    (start, start + 86_400)
}

/// Parse an Algolia search response into raw items.
pub fn parse_search_response(body: &str) -> Result<Vec<RawItem>, BoxError> {
    let response: SearchResponse = serde_json::from_str(body)?;
    Ok(response
        .hits
        .into_iter()
        .filter_map(Hit::into_raw_item)
        .collect())
}

pub struct HackerNewsSource {
    base_url: String,
    limit: usize,
    http: reqwest::Client,
}

impl HackerNewsSource {
    pub fn new(limit: usize) -> Self {
        Self::with_base_url(ALGOLIA_SEARCH_URL, limit)
    }

    pub fn with_base_url(base_url: &str, limit: usize) -> Self {
        Self {
            base_url: base_url.to_string(),
            limit,
            http: reqwest::Client::new(),
        }
    }

    /// Query URL for the stories of `date`.
    pub fn search_url(&self, date: NaiveDate) -> Result<Url, BoxError> {
        let (start, end) = day_bounds(date);
        let filters = format!("created_at_i>={start},created_at_i<{end}");
        let limit = self.limit.to_string();
        let url = Url::parse_with_params(
            &self.base_url,
            &[
                ("tags", "story"),
                ("numericFilters", filters.as_str()),
                ("hitsPerPage", limit.as_str()),
            ],
        )?;
        Ok(url)
    }
}

#[async_trait]
impl RawItemSource for HackerNewsSource {
    fn name(&self) -> &str {
        "hackernews"
    }

    #[instrument(level = "info", skip_all, fields(%date))]
    async fn fetch_day(&self, date: NaiveDate) -> Result<Vec<RawItem>, BoxError> {
        let url = self.search_url(date)?;
        let body = self
            .http
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(Duration::from_secs(15))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let items = parse_search_response(&body)?;
        debug!(count = items.len(), "Parsed HackerNews hits");
        Ok(items)
    }
}
