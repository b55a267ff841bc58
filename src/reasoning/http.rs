// =============================================================================
// HTTP reasoner adapter — posts the context packet to an external service
// =============================================================================
//
// The remote service receives the serialized `DecisionContext` and answers
// with one tagged `Decision`. Every failure mode (connect, non-2xx,
// malformed body) collapses into `ReasonerUnavailable`; the engine's
// fallback path handles the rest. The hard per-cycle deadline is enforced by
// the scheduler around `decide`, not here.
// =============================================================================

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::errors::EngineError;
use crate::reasoning::{Decision, DecisionContext, ReasoningPort};

/// Reasoning port backed by a remote HTTP endpoint.
pub struct HttpReasoner {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpReasoner {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }
}

#[async_trait]
impl ReasoningPort for HttpReasoner {
    #[instrument(skip(self, context), name = "reasoner::decide")]
    async fn decide(&self, context: &DecisionContext) -> Result<Decision, EngineError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(context)
            .send()
            .await
            .map_err(|e| EngineError::ReasonerUnavailable(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "reasoner rejected context");
            return Err(EngineError::ReasonerUnavailable(format!(
                "{status}: {body}"
            )));
        }

        let decision: Decision = resp
            .json()
            .await
            .map_err(|e| EngineError::ReasonerUnavailable(format!("malformed decision: {e}")))?;

        debug!(?decision, "reasoner decision received");
        Ok(decision)
    }
}

impl std::fmt::Debug for HttpReasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReasoner")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
