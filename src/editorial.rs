//! The single front-page decision made once per edition.

use crate::extract::{self, Fields};
use crate::models::{EditorialDecision, StoryRecord};
use crate::router::LlmRouter;
use crate::utils::truncate_for_log;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_EDITORS_NOTE: &str = "A busy day in the latent space.";
pub const DEFAULT_EMPHASIS: &str = "AI Landscape";
pub const MAX_SUPPORTING_LEADS: usize = 2;

/// Decision used whenever the model cannot produce one.
pub fn default_decision() -> EditorialDecision {
    EditorialDecision {
        main_lead_index: 0,
        supporting_lead_indices: Vec::new(),
        editors_note: DEFAULT_EDITORS_NOTE.to_string(),
        emphasis: DEFAULT_EMPHASIS.to_string(),
    }
}

/// The `k` most significant stories, ties kept in input order.
pub fn select_top_candidates(stories: &[StoryRecord], k: usize) -> Vec<StoryRecord> {
    let mut ranked = stories.to_vec();
    ranked.sort_by(|a, b| b.significance_score.cmp(&a.significance_score));
    ranked.truncate(k);
    ranked
}

fn editorial_prompt(candidates: &[StoryRecord]) -> String {
    let briefs = candidates
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[{i}] {} (Score: {})",
                s.generated_headline, s.significance_score
            )
        })
        .join("\n");
    format!(
        r#"[SYSTEM: RESPOND ONLY WITH JSON]
You are the Chief Editor of 'The Daily Token'. Review today's top stories and decide the layout.

STORIES FOR REVIEW:
{briefs}

TASK:
1. Select the ABSOLUTE #1 LEAD STORY.
2. Select two supporting leads.
3. Write a 1-sentence 'Editor's Note' setting the tone for today (e.g. bullish, cautious, visionary).

REQUIRED JSON FORMAT:
{{
  "main_lead_index": [index of story],
  "supporting_lead_indices": [idx1, idx2],
  "editors_note": "[The daily vibe/note]",
  "emphasis": "[Which tech trend is dominating today]"
}}
"#
    )
}

/// Turn extracted fields into a decision valid for `n` candidates.
///
/// The main lead is clamped into range; supporting leads are de-duplicated,
/// in range, distinct from the main lead and capped at
/// [`MAX_SUPPORTING_LEADS`].
pub fn sanitize_decision(fields: &Fields, n: usize) -> EditorialDecision {
    let last = n.saturating_sub(1) as i64;
    let main = extract::field_i64(fields, "main_lead_index")
        .unwrap_or(0)
        .clamp(0, last) as usize;
    let supporting = extract::field_index_list(fields, "supporting_lead_indices")
        .into_iter()
        .filter(|&i| i < n && i != main)
        .unique()
        .take(MAX_SUPPORTING_LEADS)
        .collect();
    EditorialDecision {
        main_lead_index: main,
        supporting_lead_indices: supporting,
        editors_note: extract::field_str(fields, "editors_note")
            .unwrap_or_else(|| DEFAULT_EDITORS_NOTE.to_string()),
        emphasis: extract::field_str(fields, "emphasis")
            .unwrap_or_else(|| DEFAULT_EMPHASIS.to_string()),
    }
}

/// Asks one model to lay out the front page.
pub struct EditorialAggregator {
    router: Arc<LlmRouter>,
    prefer_cheap: bool,
}

impl EditorialAggregator {
    pub fn new(router: Arc<LlmRouter>, prefer_cheap: bool) -> Self {
        Self {
            router,
            prefer_cheap,
        }
    }

    /// Never fails; any problem yields [`default_decision`].
    #[instrument(level = "info", skip_all, fields(candidates = candidates.len()))]
    pub async fn decide(&self, candidates: &[StoryRecord]) -> EditorialDecision {
        if candidates.is_empty() {
            debug!("No candidates; using default decision");
            return default_decision();
        }

        let reply = match self
            .router
            .call_llm(&editorial_prompt(candidates), self.prefer_cheap, true)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Editorial pass failed; using default decision");
                return default_decision();
            }
        };

        match extract::extract(&reply.response) {
            Some(fields) => {
                let decision = sanitize_decision(&fields, candidates.len());
                info!(
                    model = %reply.model,
                    main_lead = decision.main_lead_index,
                    emphasis = %decision.emphasis,
                    "Editorial decision made"
                );
                decision
            }
            None => {
                warn!(
                    response = %truncate_for_log(&reply.response, 200),
                    "Unparseable editorial reply; using default decision"
                );
                default_decision()
            }
        }
    }
}
