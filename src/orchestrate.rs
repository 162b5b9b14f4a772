//! Search orchestration.
//!
//! Chains the pipeline stages into one operation: enhance the query,
//! run the remote search, have the selection layer pick a best match,
//! then extract filter parameters from the original request text. Each
//! AI stage is best-effort; the orchestrator always returns whatever
//! the search itself produced.

use crate::client::StatApiClient;
use crate::completion::CompletionProvider;
use crate::enhance::enhance_query;
use crate::models::ExtractedParams;
use crate::search::{search_datasets, SearchOutcome};
use crate::select::review_and_select;

/// Pulls structured filter parameters out of free-form request text.
///
/// The data endpoint takes `REF_AREA`, `SEX`, `AGE`, and year bounds;
/// an extractor maps phrases like "for Kenya in 2020" onto them. The
/// default [`NullExtractor`] extracts nothing.
pub trait ParamExtractor: Send + Sync {
    fn extract(&self, text: &str) -> ExtractedParams;
}

/// Extractor that never finds any parameters.
pub struct NullExtractor;

impl ParamExtractor for NullExtractor {
    fn extract(&self, _text: &str) -> ExtractedParams {
        ExtractedParams::new()
    }
}

/// Run the full search pipeline for one user request.
///
/// The enhanced query is recorded on the outcome only when it differs
/// from the original text; extracted parameters only when the extractor
/// found any.
pub async fn orchestrated_search(
    client: &StatApiClient,
    provider: &dyn CompletionProvider,
    extractor: &dyn ParamExtractor,
    user_query: &str,
    top: i64,
) -> SearchOutcome {
    let enhanced = enhance_query(provider, user_query).await;

    let mut outcome = search_datasets(client, &enhanced, top).await;
    if enhanced != user_query {
        outcome.enhanced_query = Some(enhanced);
    }

    outcome = review_and_select(provider, user_query, outcome).await;

    let params = extractor.extract(user_query);
    if !params.is_empty() {
        outcome.extracted_params = Some(params);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_extractor_is_empty() {
        let params = NullExtractor.extract("population of Kenya in 2020");
        assert!(params.is_empty());
    }
}
