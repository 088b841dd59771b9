//! RSS 2.0 feed source.

use super::{RawItemSource, USER_AGENT};
use crate::models::RawItem;
use crate::utils::{BoxError, truncate_chars};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// Replace HTML entities that are not valid XML.
fn scrub_html_entities(xml: &str) -> String {
    xml.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Plain text of an HTML-bearing description, whitespace collapsed.
fn plain_text(html: &str) -> String {
    TAG_RE
        .replace_all(html, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn published_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a feed document, keeping only items published on `date` (UTC).
pub fn parse_feed(xml: &str, source: &str, date: NaiveDate) -> Result<Vec<RawItem>, BoxError> {
    let rss: Rss = from_str(&scrub_html_entities(xml))?;
    let items = rss
        .channel
        .items
        .into_iter()
        .filter_map(|it| {
            let published = published_at(it.pub_date.as_deref()?)?;
            if published.date_naive() != date {
                return None;
            }
            let title = plain_text(it.title.as_deref()?);
            let url = it.link?.trim().to_string();
            if title.is_empty() || url.is_empty() {
                return None;
            }
            Some(RawItem {
                title,
                url,
                summary: it
                    .description
                    .map(|d| truncate_chars(&plain_text(&d), 500))
                    .filter(|d| !d.is_empty()),
                source: Some(source.to_string()),
                score: None,
                hn_url: None,
                published: Some(published.to_rfc3339()),
            })
        })
        .collect();
    Ok(items)
}

/// One configured RSS feed.
pub struct RssSource {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl RssSource {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RawItemSource for RssSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "debug", skip_all, fields(feed = %self.name, %date))]
    async fn fetch_day(&self, date: NaiveDate) -> Result<Vec<RawItem>, BoxError> {
        let body = self
            .http
            .get(&self.url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(Duration::from_secs(15))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let items = parse_feed(&body, &self.name, date)?;
        debug!(count = items.len(), "Parsed feed items");
        Ok(items)
    }
}
