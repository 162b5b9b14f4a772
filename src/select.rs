//! Result selection (AI layer 2).
//!
//! Given a ranked list of search candidates and the original request
//! text, picks the single best match. The provider sees the top ten
//! candidates and a priority-ordered rule set; it replies with a rank
//! and a short justification.
//!
//! Every failure path resolves to a deterministic choice before the
//! function returns: a provider or parse failure selects rank 1 with
//! "Auto-selected highest scoring result", an out-of-range rank is
//! corrected to rank 1 with "Defaulted to highest scoring result". The
//! chosen candidate is always one of the input candidates.

use serde::Deserialize;
use serde_json::Value;

use crate::completion::{CompletionOptions, CompletionProvider};
use crate::models::RankedCandidate;
use crate::search::SearchOutcome;

const SELECT_TEMPERATURE: f64 = 0.2;
const SELECT_MAX_TOKENS: u32 = 150;
const REVIEW_LIMIT: usize = 10;

/// Fallback justification when the provider call or its reply failed.
pub const FALLBACK_AUTO: &str = "Auto-selected highest scoring result";
/// Fallback justification when the provider chose an impossible rank.
pub const FALLBACK_RANGE: &str = "Defaulted to highest scoring result";

/// Resolved selection: either the provider's validated choice or an
/// explicit fallback carrying the reason it was taken.
#[derive(Debug, Clone, PartialEq)]
enum Decision {
    Chosen { rank: usize, reasoning: String },
    Fallback { reason: &'static str },
}

/// Shape of the provider's JSON reply.
#[derive(Debug, Deserialize)]
struct SelectionReply {
    best_rank: i64,
    #[serde(default)]
    reasoning: String,
}

/// Review `outcome`'s candidates and attach the best match.
///
/// Failed or empty outcomes pass through unchanged. Otherwise the
/// outcome gains `best_match` and `selection_reasoning`; the candidate
/// list itself is never modified.
pub async fn review_and_select(
    provider: &dyn CompletionProvider,
    user_query: &str,
    mut outcome: SearchOutcome,
) -> SearchOutcome {
    if !outcome.success || outcome.results.is_empty() {
        return outcome;
    }

    let ranked: Vec<RankedCandidate> = outcome
        .results
        .iter()
        .take(REVIEW_LIMIT)
        .enumerate()
        .map(|(i, c)| RankedCandidate::from_candidate(i + 1, c))
        .collect();

    let decision = ask_provider(provider, user_query, &ranked).await;

    let (rank, reasoning) = match decision {
        Decision::Chosen { rank, reasoning } => {
            tracing::debug!(rank, "selection accepted");
            (rank, reasoning)
        }
        Decision::Fallback { reason } => {
            tracing::warn!("selection fell back to rank 1: {}", reason);
            (1, reason.to_string())
        }
    };

    outcome.best_match = Some(ranked[rank - 1].clone());
    outcome.selection_reasoning = Some(reasoning);
    outcome
}

/// Call the provider and validate its reply into a [`Decision`].
async fn ask_provider(
    provider: &dyn CompletionProvider,
    user_query: &str,
    ranked: &[RankedCandidate],
) -> Decision {
    let prompt = match review_prompt(user_query, ranked) {
        Ok(prompt) => prompt,
        Err(_) => return Decision::Fallback { reason: FALLBACK_AUTO },
    };

    let opts = CompletionOptions {
        temperature: Some(SELECT_TEMPERATURE),
        max_tokens: Some(SELECT_MAX_TOKENS),
        json_object: true,
    };

    let reply = match provider.complete(&prompt, &opts).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("selection call failed: {:#}", e);
            return Decision::Fallback { reason: FALLBACK_AUTO };
        }
    };

    validate_reply(&reply, ranked.len())
}

/// Parse the reply JSON and range-check the rank.
fn validate_reply(reply: &str, candidate_count: usize) -> Decision {
    let parsed: SelectionReply = match serde_json::from_str(reply.trim()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("malformed selection reply: {}", e);
            return Decision::Fallback { reason: FALLBACK_AUTO };
        }
    };

    if parsed.best_rank < 1 || parsed.best_rank as usize > candidate_count {
        return Decision::Fallback { reason: FALLBACK_RANGE };
    }

    Decision::Chosen {
        rank: parsed.best_rank as usize,
        reasoning: parsed.reasoning,
    }
}

fn review_prompt(user_query: &str, ranked: &[RankedCandidate]) -> anyhow::Result<String> {
    let listing = serde_json::to_string_pretty(&ranked.iter().map(candidate_row).collect::<Vec<_>>())?;

    Ok(format!(
        r#"Review these statistical database search results and select the BEST match.

User Query: "{user_query}"

Search Results:
{listing}

Selection Criteria (in priority order):
1. **Relevance to user query** - Does it answer what they're asking?
2. **Prefer aggregates** - Choose "total" or aggregate indicators over demographic breakdowns (unless the user specified gender/age)
3. **Higher search scores** - The API's scoring is generally reliable
4. **Avoid over-specificity** - Don't pick age/gender breakdowns unless explicitly requested
5. **Common databases** - WB_WDI is usually most comprehensive

Return ONLY valid JSON:
{{
  "best_rank": <number>,
  "reasoning": "<brief explanation why this is the best match, max 50 words>"
}}"#
    ))
}

fn candidate_row(c: &RankedCandidate) -> Value {
    serde_json::json!({
        "rank": c.rank,
        "name": c.name,
        "idno": c.indicator,
        "database_id": c.database,
        "score": c.score,
    })
}
