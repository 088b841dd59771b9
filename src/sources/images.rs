//! Cover image candidates scraped from an article page.

use super::{ImageSource, USER_AGENT};
use crate::utils::BoxError;
use async_trait::async_trait;
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Upper bound on candidates handed to the summarization prompt.
pub const MAX_CANDIDATES: usize = 15;

const JUNK_MARKERS: &[&str] = &[
    "icon", "logo", "avatar", "sprite", "pixel", "tracker", "btn", "nav", "badge",
];
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".webp"];

static META_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"meta[property="og:image"], meta[property="og:image:url"], meta[property="og:image:secure_url"], meta[name="twitter:image"], meta[name="twitter:image:src"], meta[itemprop="image"]"#,
    )
    .unwrap()
});
static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"link[rel="image_src"], link[rel="thumbnail"]"#).unwrap());
static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

fn looks_like_content_image(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    !JUNK_MARKERS.iter().any(|m| path.contains(m))
        && IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Candidate images in priority order: OpenGraph, Twitter card and
/// schema.org meta tags, `image_src` links, then content `<img>` tags that
/// look like photos. Absolute, de-duplicated, at most [`MAX_CANDIDATES`].
pub fn extract_candidate_images(html: &str, page_url: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let resolve = |raw: &str| page_url.join(raw.trim()).ok();

    let meta = document
        .select(&META_SELECTOR)
        .filter_map(|el| el.value().attr("content"))
        .filter_map(resolve);
    let links = document
        .select(&LINK_SELECTOR)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(resolve);
    let imgs = document
        .select(&IMG_SELECTOR)
        .filter_map(|el| {
            let attrs = el.value();
            attrs
                .attr("src")
                .or_else(|| attrs.attr("data-src"))
                .or_else(|| attrs.attr("data-original-src"))
        })
        .filter_map(resolve)
        .filter(looks_like_content_image);

    meta.chain(links)
        .chain(imgs)
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(String::from)
        .unique()
        .take(MAX_CANDIDATES)
        .collect()
}

/// Fetches the article page and scrapes candidates from it.
///
/// Any HTTP or parse failure yields an empty list.
pub struct HtmlImageFetcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl Default for HtmlImageFetcher {
    fn default() -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl HtmlImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch_html(&self, url: &Url) -> Result<String, BoxError> {
        let body = self
            .http
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }
}

#[async_trait]
impl ImageSource for HtmlImageFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn candidate_images(&self, url: &str) -> Result<Vec<String>, BoxError> {
        let Ok(page_url) = Url::parse(url) else {
            return Ok(Vec::new());
        };
        if !matches!(page_url.scheme(), "http" | "https") {
            return Ok(Vec::new());
        }
        match self.fetch_html(&page_url).await {
            Ok(html) => {
                let candidates = extract_candidate_images(&html, &page_url);
                debug!(count = candidates.len(), "Found image candidates");
                Ok(candidates)
            }
            Err(e) => {
                debug!(error = %e, "Image lookup failed");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <meta property="og:image" content="/media/cover.jpg">
        <meta property="og:image:width" content="1200">
        <meta name="twitter:image" content="https://cdn.lab.ai/card.png">
        <meta itemprop="image" content="https://cdn.lab.ai/card.png">
        <link rel="image_src" href="https://cdn.lab.ai/thumb.webp">
        <link rel="icon" href="/favicon.png">
      </head><body>
        <img src="/static/logo.png">
        <img src="/img/site-icon-32.png">
        <img data-src="/media/chart.jpeg?w=800">
        <img src="/media/diagram.svg">
        <img src="/media/cover.jpg">
      </body></html>"#;

    #[test]
    fn test_extracts_in_priority_order() {
        let base = Url::parse("https://lab.ai/blog/post").unwrap();
        let candidates = extract_candidate_images(PAGE, &base);
        assert_eq!(
            candidates,
            vec![
                "https://lab.ai/media/cover.jpg",
                "https://cdn.lab.ai/card.png",
                "https://cdn.lab.ai/thumb.webp",
                "https://lab.ai/media/chart.jpeg?w=800",
            ]
        );
    }

    #[test]
    fn test_caps_candidates() {
        let imgs: String = (0..40)
            .map(|i| format!(r#"<img src="/p/{i}.jpg">"#))
            .collect();
        let html = format!("<html><body>{imgs}</body></html>");
        let base = Url::parse("https://a.io/").unwrap();
        assert_eq!(extract_candidate_images(&html, &base).len(), MAX_CANDIDATES);
    }

    #[tokio::test]
    async fn test_non_http_urls_yield_nothing() {
        let fetcher = HtmlImageFetcher::new();
        assert!(fetcher.candidate_images("not a url").await.unwrap().is_empty());
        assert!(
            fetcher
                .candidate_images("ftp://files.example.com/a")
                .await
                .unwrap()
                .is_empty()
        );
    }
}
