//! Pipeline configuration loaded from YAML.
//!
//! Every field has a default, so an absent or partial `config.yaml` still
//! yields a runnable pipeline. The model catalog and its routing weights are
//! turned into an immutable [`ModelCatalog`] and injected into the router.

use crate::router::catalog::{ModelCatalog, ModelDescriptor, default_models};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{info, instrument};

/// Reserved category id meaning "not relevant, drop the story".
pub const IRRELEVANT_CATEGORY_ID: u8 = 0;

/// Why a configuration was rejected.
#[derive(Debug)]
pub enum ConfigError {
    EmptyCatalog,
    WeightCount { models: usize, weights: usize },
    InvalidWeight(f64),
    ZeroWeights,
    Invalid(String),
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EmptyCatalog => write!(f, "model catalog is empty"),
            ConfigError::WeightCount { models, weights } => {
                write!(f, "{models} models but {weights} routing weights")
            }
            ConfigError::InvalidWeight(w) => write!(f, "invalid routing weight {w}"),
            ConfigError::ZeroWeights => write!(f, "routing weights sum to zero"),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
            ConfigError::Io(e) => write!(f, "reading configuration: {e}"),
            ConfigError::Yaml(e) => write!(f, "parsing configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Yaml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e)
    }
}

/// A catalog row: the model plus its "prefer cheap" weight.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub model: ModelDescriptor,
    pub weight: f64,
}

/// All tunables of the enrichment pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub catalog: Vec<CatalogEntry>,
    /// Category id to display name. Id 0 is reserved for "irrelevant".
    pub categories: BTreeMap<u8, String>,
    /// Category whose stories feed the model release ledger.
    pub release_category: u8,
    /// Category that receives the single placeholder entry.
    pub placeholder_category: u8,
    pub prefer_cheap: bool,
    /// How many extra models follow the primary pick in a fallback chain.
    pub fallback_extra_models: usize,
    /// Worker pool width per processor batch.
    pub workers: usize,
    /// Fixed delay before each item, in milliseconds.
    pub item_delay_ms: u64,
    pub editorial_top_k: usize,
    pub max_stories_per_day: usize,
    pub hackernews_story_limit: usize,
    pub ai_keywords: Vec<String>,
    /// Feed name to RSS URL.
    pub rss_feeds: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let categories = [
            (1, "Breaking Vectors"),
            (2, "Model Architectures"),
            (3, "Neural Horizons"),
            (4, "Lab Outputs"),
            (5, "Inference Corner"),
            (6, "AI & LLM Overview"),
            (7, "Model Release History"),
            (8, "Top Insights & Advice"),
            (9, "Lab Updates & Dark Side"),
        ]
        .into_iter()
        .map(|(id, name)| (id, name.to_string()))
        .collect();

        let ai_keywords = [
            "ai", "llm", "language model", "transformer", "neural", "machine learning",
            "deep learning", "gpt", "claude", "gemini", "llama", "nlp", "robotics",
            "world model", "diffusion", "generative", "inference", "gpu", "quantization",
            "alignment", "prompt", "embeddings", "multimodal", "agent", "reasoning",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let rss_feeds = [
            ("openai", "https://openai.com/news/rss.xml"),
            ("deepmind", "https://deepmind.google/blog/rss.xml"),
            ("huggingface", "https://huggingface.co/blog/feed.xml"),
            (
                "techcrunch_ai",
                "https://techcrunch.com/category/artificial-intelligence/feed/",
            ),
            ("arxiv_ai", "https://rss.arxiv.org/rss/cs.AI"),
            ("bair", "https://bair.berkeley.edu/blog/feed.xml"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            catalog: default_models()
                .into_iter()
                .map(|(model, weight)| CatalogEntry { model, weight })
                .collect(),
            categories,
            release_category: 7,
            placeholder_category: 6,
            prefer_cheap: true,
            fallback_extra_models: 2,
            workers: 5,
            item_delay_ms: 1_000,
            editorial_top_k: 10,
            max_stories_per_day: 30,
            hackernews_story_limit: 50,
            ai_keywords,
            rss_feeds,
        }
    }
}

impl PipelineConfig {
    /// Build the immutable catalog the router is constructed with.
    pub fn model_catalog(&self) -> Result<ModelCatalog, ConfigError> {
        let (models, weights) = self
            .catalog
            .iter()
            .map(|entry| (entry.model.clone(), entry.weight))
            .unzip();
        ModelCatalog::new(models, weights)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model_catalog()?;
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.categories.contains_key(&IRRELEVANT_CATEGORY_ID) {
            return Err(ConfigError::Invalid(format!(
                "category id {IRRELEVANT_CATEGORY_ID} is reserved"
            )));
        }
        for (what, id) in [
            ("release_category", self.release_category),
            ("placeholder_category", self.placeholder_category),
        ] {
            if !self.categories.contains_key(&id) {
                return Err(ConfigError::Invalid(format!(
                    "{what} {id} is not a configured category"
                )));
            }
        }
        Ok(())
    }
}

/// Parse and validate a YAML configuration document.
pub fn parse_config(yaml: &str) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration file at `path`, or the defaults when `path` is `None`.
#[instrument(level = "info", skip_all)]
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    match path {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)?;
            let config = parse_config(&yaml)?;
            info!(path = %path.display(), models = config.catalog.len(), "Loaded configuration");
            Ok(config)
        }
        None => {
            let config = PipelineConfig::default();
            config.validate()?;
            info!(models = config.catalog.len(), "Using built-in configuration");
            Ok(config)
        }
    }
}
