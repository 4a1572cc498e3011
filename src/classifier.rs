use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

use crate::config::ClassifierConfig;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Classifier returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("Classifier response malformed: {0}")]
    Malformed(String),
}

/// Judges whether a provider's stated capabilities cover a requested service.
///
/// Implementations may be slow or fail; callers bound every call with a
/// timeout and treat errors as "could not judge", not as "incompatible".
#[async_trait]
pub trait CapabilityClassifier: Send + Sync {
    async fn is_compatible(
        &self,
        service: &str,
        capabilities: &str,
    ) -> Result<bool, ClassifierError>;
}

/// Classifier backed by a chat-completions style LLM endpoint.
#[derive(Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpClassifier {
    pub fn new(url: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            api_key,
            model: model.to_string(),
        }
    }

    fn prompt(service: &str, capabilities: &str) -> String {
        format!(
            "Determine if a service provider can fulfill a service request.\n\n\
             Service Requested: {service}\n\
             Provider Capabilities: {capabilities}\n\n\
             Respond with only 'YES' if the provider can definitely fulfill this request, \
             or 'NO' if they cannot or if it's unclear.\n\
             Consider partial matches as NO. The provider must be able to fully complete \
             the requested service.\n\nAnswer:"
        )
    }
}

/// Read a YES/NO verdict out of a chat-completions response body.
fn parse_verdict(body: &serde_json::Value) -> Result<bool, ClassifierError> {
    let answer = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ClassifierError::Malformed("missing choices[0].message.content".into()))?;

    let answer = answer.trim().to_uppercase();
    if answer.starts_with("YES") {
        Ok(true)
    } else if answer.starts_with("NO") {
        Ok(false)
    } else {
        Err(ClassifierError::Malformed(format!("unexpected answer {answer:?}")))
    }
}

#[async_trait]
impl CapabilityClassifier for HttpClassifier {
    async fn is_compatible(
        &self,
        service: &str,
        capabilities: &str,
    ) -> Result<bool, ClassifierError> {
        let payload = serde_json::json!({
            "model": self.model,
            "max_tokens": 10,
            "temperature": 0,
            "messages": [{ "role": "user", "content": Self::prompt(service, capabilities) }],
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClassifierError::Status(status));
        }

        let body: serde_json::Value = response.json().await?;
        let verdict = parse_verdict(&body)?;
        debug!("Classifier verdict {verdict} for {service:?}");
        Ok(verdict)
    }
}

/// Offline classifier: compatible when enough words are shared.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    min_shared_words: usize,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self { min_shared_words: 2 }
    }
}

impl KeywordClassifier {
    fn words(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    }
}

#[async_trait]
impl CapabilityClassifier for KeywordClassifier {
    async fn is_compatible(
        &self,
        service: &str,
        capabilities: &str,
    ) -> Result<bool, ClassifierError> {
        let service_words = Self::words(service);
        let shared = Self::words(capabilities)
            .intersection(&service_words)
            .count();
        Ok(shared >= self.min_shared_words)
    }
}

/// Pick the classifier the configuration asks for.
pub fn from_config(config: &ClassifierConfig) -> std::sync::Arc<dyn CapabilityClassifier> {
    match &config.url {
        Some(url) => std::sync::Arc::new(HttpClassifier::new(
            url,
            config.api_key.clone(),
            &config.model,
        )),
        None => std::sync::Arc::new(KeywordClassifier::default()),
    }
}
