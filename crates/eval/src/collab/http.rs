//! HTTP collaborators.
//!
//! Uses `ureq` (sync) wrapped in `tokio::task::spawn_blocking` to avoid
//! blocking the async runtime.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{CollaboratorError, Intent, IntentClassifier, PlatformClient};

/// Map a ureq failure onto the transient/permanent split. Server errors,
/// throttling and I/O are worth retrying; everything else is not.
fn classify_ureq(err: ureq::Error) -> CollaboratorError {
    match err {
        ureq::Error::StatusCode(code) if code == 429 || code >= 500 => {
            CollaboratorError::Transient(format!("HTTP {}", code))
        }
        ureq::Error::StatusCode(code) => CollaboratorError::Permanent(format!("HTTP {}", code)),
        ureq::Error::Io(e) => CollaboratorError::Transient(e.to_string()),
        ureq::Error::Timeout(_) => CollaboratorError::Transient("timed out".to_string()),
        other => CollaboratorError::Permanent(other.to_string()),
    }
}

fn join_error(e: tokio::task::JoinError) -> CollaboratorError {
    CollaboratorError::Permanent(format!("task join error: {}", e))
}

/// Intent classifier backed by a JSON endpoint.
///
/// POSTs `{"session_id", "text"}` to `url` and expects
/// `{"intent": "<name>", "confidence": <0..1>}` or `{"intent": null}`.
pub struct HttpIntentClassifier {
    url: String,
    auth_token: Option<String>,
}

impl HttpIntentClassifier {
    /// `auth_token` is sent as a bearer token when present.
    pub fn new(url: &str, auth_token: Option<String>) -> Self {
        HttpIntentClassifier {
            url: url.to_string(),
            auth_token,
        }
    }
}

#[derive(serde::Deserialize)]
struct ClassifyResponse {
    intent: Option<String>,
    #[serde(default)]
    confidence: f64,
}

#[async_trait]
impl IntentClassifier for HttpIntentClassifier {
    async fn classify(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<Option<Intent>, CollaboratorError> {
        let url = self.url.clone();
        let token = self.auth_token.clone();
        let body = serde_json::json!({ "session_id": session_id, "text": text });

        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let mut request = agent.post(&url);
            if let Some(ref token) = token {
                request = request.header("Authorization", &format!("Bearer {}", token));
            }
            let response = request.send_json(&body).map_err(classify_ureq)?;
            let parsed: ClassifyResponse = response
                .into_body()
                .read_json()
                .map_err(|e| CollaboratorError::Permanent(format!("bad classifier response: {}", e)))?;
            Ok(parsed.intent.map(|name| Intent {
                name,
                confidence: parsed.confidence,
            }))
        })
        .await
        .map_err(join_error)?
    }
}

/// Platform client reading contact attributes from
/// `GET {base_url}/contacts/{session_id}/attributes`.
pub struct HttpPlatformClient {
    base_url: String,
}

impl HttpPlatformClient {
    pub fn new(base_url: &str) -> Self {
        HttpPlatformClient {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn attributes_url(&self, session_id: &str) -> String {
        format!("{}/contacts/{}/attributes", self.base_url, session_id)
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn get_contact_attributes(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, String>, CollaboratorError> {
        let url = self.attributes_url(session_id);
        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let response = agent.get(&url).call().map_err(classify_ureq)?;
            response
                .into_body()
                .read_json::<BTreeMap<String, String>>()
                .map_err(|e| CollaboratorError::Permanent(format!("bad attribute response: {}", e)))
        })
        .await
        .map_err(join_error)?
    }
}
