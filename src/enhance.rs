//! Query enhancement (AI layer 1).
//!
//! Rewrites free-text requests into search strings tuned for the lexical
//! scoring backend. The rules live in the prompt: drop punctuation, expand
//! abbreviations, add "total" unless a demographic breakdown was asked
//! for, lowercase, strip filler words, aim for two to three content
//! tokens.
//!
//! Enhancement is strictly best-effort. Any provider failure, or an empty
//! reply, returns the original text unchanged — a degraded search beats
//! no search.

use crate::completion::{CompletionOptions, CompletionProvider};

const ENHANCE_TEMPERATURE: f64 = 0.1;
const ENHANCE_MAX_TOKENS: u32 = 80;

/// Rewrite `user_query` for the search backend.
///
/// Returns the enhanced string, or the original text when the provider
/// is unavailable or misbehaves.
pub async fn enhance_query(provider: &dyn CompletionProvider, user_query: &str) -> String {
    let prompt = enhancement_prompt(user_query);
    let opts = CompletionOptions {
        temperature: Some(ENHANCE_TEMPERATURE),
        max_tokens: Some(ENHANCE_MAX_TOKENS),
        json_object: false,
    };

    match provider.complete(&prompt, &opts).await {
        Ok(reply) => {
            let enhanced = clean_reply(&reply);
            if enhanced.is_empty() {
                tracing::warn!("enhancement returned empty reply, using original query");
                return user_query.to_string();
            }
            tracing::debug!(original = user_query, enhanced = %enhanced, "query enhanced");
            enhanced
        }
        Err(e) => {
            tracing::warn!("enhancement failed, using original query: {:#}", e);
            user_query.to_string()
        }
    }
}

/// Trim whitespace and one layer of surrounding quotes from the reply.
fn clean_reply(reply: &str) -> String {
    reply
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}

fn enhancement_prompt(user_query: &str) -> String {
    format!(
        r#"Enhance this statistical data search query for better API results using proven search optimization patterns.

User Query: "{user_query}"

Enhancement Rules (based on API scoring patterns):

1. REMOVE ALL PUNCTUATION (punctuation hurts scores):
   - "Population, total" → "population total"
   - "GDP (current US$)" → "GDP current US dollars"
   - Remove: commas, periods, parentheses, hyphens (except in age ranges like "0-14")

2. CONVERT ABBREVIATIONS to full text (increases token matching):
   - GDP → Gross Domestic Product
   - GNI → Gross National Income
   - HDI → Human Development Index
   - FDI → Foreign Direct Investment
   - CO2 → Carbon Dioxide
   - GHG → Greenhouse Gas
   - PPP → Purchasing Power Parity

3. ADD "TOTAL" keyword when appropriate (powerful scoring keyword):
   - "population" → "population total"
   - "employment" → "employment total"
   - UNLESS the user asks for: male, female, age groups, urban, rural, etc.

4. KEEP SPECIFIC TERMS (rare terms score higher):
   - Age ranges: "0-14", "65 and above"
   - Gender: "female", "male"
   - Domain terms: "labor force", "participation rate"

5. LOWERCASE everything (the API normalizes case anyway).

6. REMOVE FILLER WORDS (improve token efficiency):
   - Remove: "data", "statistics", "information", "about", "of the", "for the"

7. OPTIMAL TOKEN COUNT: 2-3 content tokens work best; more dilutes relevance.

Enhancement Examples:
- "GDP 2024" → "gross domestic product total"
- "population world" → "population total"
- "female employment rate" → "labor force female participation rate"
- "CO2 emissions per capita" → "carbon dioxide emissions total per capita"

Return ONLY the enhanced query in lowercase, no punctuation, no explanation.

Enhanced Query:"#
    )
}
