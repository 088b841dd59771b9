//! Static model catalog and weighted model selection.

use crate::config::ConfigError;
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Characters per token used for cost estimation.
pub const CHARS_PER_TOKEN: usize = 4;

/// Completion budget requested from every provider; also caps the output estimate.
pub const MAX_OUTPUT_TOKENS: u64 = 800;

/// One routable model. Defined once at startup, never mutated.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelDescriptor {
    /// Display name used in logs and attribution.
    pub name: String,
    /// Provider identifier, e.g. `huggingface` or `openrouter`.
    pub provider: String,
    /// Provider-specific model id.
    pub model_id: String,
    /// USD per 1M input tokens.
    pub input_cost: f64,
    /// USD per 1M output tokens.
    pub output_cost: f64,
    pub context_window: u32,
    /// Ordinal quality, 1..=5.
    pub quality_score: u8,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl ModelDescriptor {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Estimated cost in USD for the given token counts.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_cost + output_tokens as f64 * self.output_cost)
            / 1_000_000.0
    }
}

/// Estimate `(input, output)` token counts from the prompt alone.
///
/// Output is assumed to be half the input, capped at [`MAX_OUTPUT_TOKENS`].
pub fn estimate_tokens(prompt: &str) -> (u64, u64) {
    let chars = prompt.chars().count();
    let input = chars.div_ceil(CHARS_PER_TOKEN) as u64;
    let output = (input / 2).min(MAX_OUTPUT_TOKENS);
    (input, output)
}

/// Immutable catalog of models plus their "prefer cheap" routing weights.
///
/// Invariants checked at construction: at least one model, exactly one
/// weight per model, every weight finite and non-negative, positive total.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    weights: Vec<f64>,
    sampler: WeightedIndex<f64>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>, weights: Vec<f64>) -> Result<Self, ConfigError> {
        if models.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }
        if models.len() != weights.len() {
            return Err(ConfigError::WeightCount {
                models: models.len(),
                weights: weights.len(),
            });
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(ConfigError::InvalidWeight(*bad));
        }
        let sampler =
            WeightedIndex::new(weights.iter().copied()).map_err(|_| ConfigError::ZeroWeights)?;
        Ok(Self {
            models,
            weights,
            sampler,
        })
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Weighted draw when `prefer_cheap`, uniform otherwise. Returns an index.
    pub fn pick_index<R: Rng>(&self, rng: &mut R, prefer_cheap: bool) -> usize {
        if prefer_cheap {
            self.sampler.sample(rng)
        } else {
            rng.random_range(0..self.models.len())
        }
    }

    /// Primary pick followed, when `fallback_chain` is set, by up to `extra`
    /// other models drawn without replacement in random order.
    pub fn chain_indices<R: Rng>(
        &self,
        rng: &mut R,
        prefer_cheap: bool,
        fallback_chain: bool,
        extra: usize,
    ) -> Vec<usize> {
        let primary = self.pick_index(rng, prefer_cheap);
        let mut chain = vec![primary];
        if fallback_chain {
            let others: Vec<usize> = (0..self.models.len()).filter(|i| *i != primary).collect();
            chain.extend(others.choose_multiple(rng, extra).copied());
        }
        chain
    }
}

/// The catalog shipped with the binary.
pub fn default_models() -> Vec<(ModelDescriptor, f64)> {
    let model = |name: &str,
                 provider: &str,
                 model_id: &str,
                 input_cost: f64,
                 output_cost: f64,
                 context_window: u32,
                 quality_score: u8,
                 timeout_secs: u64| ModelDescriptor {
        name: name.to_string(),
        provider: provider.to_string(),
        model_id: model_id.to_string(),
        input_cost,
        output_cost,
        context_window,
        quality_score,
        timeout_secs,
    };
    vec![
        (
            model(
                "Qwen3-235B-A22B",
                "huggingface",
                "Qwen/Qwen3-235B-A22B-Instruct-2507",
                0.09,
                0.58,
                131_072,
                5,
                30,
            ),
            0.35,
        ),
        (
            model(
                "GPT-OSS-120B",
                "huggingface",
                "openai/gpt-oss-120b",
                0.05,
                0.25,
                131_072,
                4,
                30,
            ),
            0.30,
        ),
        (
            model(
                "DeepSeek-V3.2",
                "huggingface",
                "deepseek-ai/DeepSeek-V3.2-Exp",
                0.27,
                0.41,
                163_840,
                5,
                30,
            ),
            0.15,
        ),
        (
            model(
                "OpenRouter-DeepSeek-R1",
                "openrouter",
                "deepseek/deepseek-r1:free",
                0.0,
                0.0,
                128_000,
                5,
                60,
            ),
            0.10,
        ),
        (
            model(
                "OpenRouter-Llama-3.3-70B",
                "openrouter",
                "meta-llama/llama-3.3-70b-instruct:free",
                0.0,
                0.0,
                131_072,
                4,
                60,
            ),
            0.10,
        ),
    ]
}

/// The credential-free model tried after a chain is exhausted.
pub fn emergency_model() -> ModelDescriptor {
    ModelDescriptor {
        name: "Pollinations-Emergency".to_string(),
        provider: "pollinations".to_string(),
        model_id: "openai".to_string(),
        input_cost: 0.0,
        output_cost: 0.0,
        context_window: 8_192,
        quality_score: 2,
        timeout_secs: 60,
    }
}
