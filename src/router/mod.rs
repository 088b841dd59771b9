//! Multi-provider LLM routing with weighted selection and ordered fallback.
//!
//! The router owns an immutable [`ModelCatalog`], one [`ProviderClient`] per
//! provider id, and an optional credential-free emergency provider. A call:
//!
//! 1. rejects empty prompts without touching any provider,
//! 2. picks a primary model (weighted when `prefer_cheap`, uniform otherwise),
//! 3. with `fallback_chain`, appends up to `fallback_extra` other models in
//!    random order,
//! 4. tries each candidate once; the first success is logged to the
//!    [`UsageLedger`] and returned,
//! 5. after the chain, tries the emergency provider,
//! 6. otherwise returns [`RouterError::Exhausted`] naming every model tried.
//!
//! Individual provider failures never reach the caller.

pub mod catalog;
pub mod ledger;
pub mod providers;

use catalog::{ModelCatalog, ModelDescriptor, estimate_tokens};
use chrono::Utc;
use ledger::UsageLedger;
use providers::{ProviderClient, parse_chat_body};

use crate::models::UsageLogEntry;
use crate::utils::truncate_for_log;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Default number of extra models appended after the primary pick.
pub const DEFAULT_FALLBACK_EXTRA: usize = 2;

/// A successful routed call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub response: String,
    pub model: String,
    pub provider: String,
    pub cost: f64,
    pub quality_score: u8,
}

/// Why a routed call produced no text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    EmptyPrompt,
    /// Every candidate, emergency included, failed.
    Exhausted { attempted: Vec<String> },
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::EmptyPrompt => write!(f, "Empty prompt"),
            RouterError::Exhausted { attempted } => {
                write!(f, "All providers failed (tried: {})", attempted.join(", "))
            }
        }
    }
}

impl std::error::Error for RouterError {}

struct EmergencyProvider {
    model: ModelDescriptor,
    client: Arc<dyn ProviderClient>,
}

/// Routes prompts across the catalog. Share it behind an `Arc`.
pub struct LlmRouter {
    catalog: ModelCatalog,
    clients: HashMap<String, Arc<dyn ProviderClient>>,
    emergency: Option<EmergencyProvider>,
    fallback_extra: usize,
    ledger: UsageLedger,
    rng: Mutex<StdRng>,
}

impl fmt::Debug for LlmRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<&String> = self.clients.keys().collect();
        providers.sort();
        f.debug_struct("LlmRouter")
            .field("models", &self.catalog.len())
            .field("providers", &providers)
            .field(
                "emergency",
                &self.emergency.as_ref().map(|e| e.model.name.as_str()),
            )
            .field("fallback_extra", &self.fallback_extra)
            .finish()
    }
}

impl LlmRouter {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self {
            catalog,
            clients: HashMap::new(),
            emergency: None,
            fallback_extra: DEFAULT_FALLBACK_EXTRA,
            ledger: UsageLedger::new(),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Register the client serving every catalog model of `provider`.
    ///
    /// Models whose provider has no client are skipped at call time.
    pub fn with_client(mut self, provider: &str, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(provider.to_string(), client);
        self
    }

    pub fn with_emergency(mut self, model: ModelDescriptor, client: Arc<dyn ProviderClient>) -> Self {
        self.emergency = Some(EmergencyProvider { model, client });
        self
    }

    pub fn with_fallback_extra(mut self, extra: usize) -> Self {
        self.fallback_extra = extra;
        self
    }

    /// Make model selection reproducible.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Weighted draw over the catalog when `prefer_cheap`, uniform otherwise.
    pub fn pick_model(&self, prefer_cheap: bool) -> &ModelDescriptor {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let idx = self.catalog.pick_index(&mut *rng, prefer_cheap);
        &self.catalog.models()[idx]
    }

    fn plan_chain(&self, prefer_cheap: bool, fallback_chain: bool) -> Vec<usize> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        self.catalog
            .chain_indices(&mut *rng, prefer_cheap, fallback_chain, self.fallback_extra)
    }

    /// Route `prompt` through the fallback chain and the emergency provider.
    #[instrument(level = "info", skip_all, fields(prompt_chars = prompt.len(), prefer_cheap = prefer_cheap, fallback_chain = fallback_chain))]
    pub async fn call_llm(
        &self,
        prompt: &str,
        prefer_cheap: bool,
        fallback_chain: bool,
    ) -> Result<LlmResponse, RouterError> {
        if prompt.trim().is_empty() {
            return Err(RouterError::EmptyPrompt);
        }

        let chain = self.plan_chain(prefer_cheap, fallback_chain);
        let mut attempted = Vec::with_capacity(chain.len() + 1);

        for idx in chain {
            let model = &self.catalog.models()[idx];
            let Some(client) = self.clients.get(&model.provider) else {
                debug!(model = %model.name, provider = %model.provider, "No client for provider; skipping");
                continue;
            };
            attempted.push(model.name.clone());
            if let Some(text) = self.attempt(client.as_ref(), model, prompt).await {
                return Ok(self.succeed(model, prompt, text));
            }
        }

        if let Some(emergency) = &self.emergency {
            attempted.push(emergency.model.name.clone());
            info!(model = %emergency.model.name, "Chain exhausted; trying emergency provider");
            if let Some(text) = self
                .attempt(emergency.client.as_ref(), &emergency.model, prompt)
                .await
            {
                return Ok(self.succeed(&emergency.model, prompt, text));
            }
        }

        warn!(attempted = ?attempted, "All providers failed");
        Err(RouterError::Exhausted { attempted })
    }

    /// One bounded call. `None` on timeout, transport error, non-200 status
    /// or an unparseable body.
    async fn attempt(
        &self,
        client: &dyn ProviderClient,
        model: &ModelDescriptor,
        prompt: &str,
    ) -> Option<String> {
        let t0 = Instant::now();
        let timeout = model.timeout();
        let outcome =
            tokio::time::timeout(timeout, client.invoke(&model.model_id, prompt, timeout)).await;
        let elapsed_ms = t0.elapsed().as_millis() as u64;

        let reply = match outcome {
            Err(_) => {
                warn!(model = %model.name, elapsed_ms, "Provider call timed out");
                return None;
            }
            Ok(Err(e)) => {
                warn!(model = %model.name, elapsed_ms, error = %e, "Provider call failed");
                return None;
            }
            Ok(Ok(reply)) => reply,
        };

        match reply.status {
            200 => match parse_chat_body(&reply.body) {
                Some(text) => {
                    debug!(model = %model.name, elapsed_ms, "Provider call succeeded");
                    Some(text)
                }
                None => {
                    warn!(
                        model = %model.name,
                        body = %truncate_for_log(&reply.body, 200),
                        "Provider returned an unparseable body"
                    );
                    None
                }
            },
            429 => {
                warn!(model = %model.name, "Rate limited; advancing fallback chain");
                None
            }
            status => {
                warn!(model = %model.name, status, elapsed_ms, "Provider returned error status");
                None
            }
        }
    }

    fn succeed(&self, model: &ModelDescriptor, prompt: &str, text: String) -> LlmResponse {
        let (input_tokens, output_tokens) = estimate_tokens(prompt);
        let cost = model.estimate_cost(input_tokens, output_tokens);
        self.ledger.record(UsageLogEntry {
            timestamp: Utc::now(),
            model: model.name.clone(),
            input_tokens,
            output_tokens,
            cost,
            success: true,
        });
        LlmResponse {
            response: text,
            model: model.name.clone(),
            provider: model.provider.clone(),
            cost,
            quality_score: model.quality_score,
        }
    }
}
