use async_trait::async_trait;
use callflow_eval::{EngineError, InferenceRequest, InferenceResponse, Orchestrator, SessionState};

/// The engine as the batch runner sees it: the request/response contract
/// the telephony platform uses, plus a read of the durable session state
/// for end-of-call assertions.
///
/// Implemented for [`Orchestrator`]; tests substitute scripted fakes.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, EngineError>;

    async fn session_state(&self, session_id: &str) -> Result<SessionState, EngineError>;
}

#[async_trait]
impl InferenceService for Orchestrator {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, EngineError> {
        Orchestrator::invoke(self, request).await
    }

    async fn session_state(&self, session_id: &str) -> Result<SessionState, EngineError> {
        Orchestrator::session_state(self, session_id).await
    }
}
