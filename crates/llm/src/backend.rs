use std::time::Duration;

use tracing::info;

use crate::{ChatBackend, ChatReply, ChatRequest, LlmError, OfflineBackend, OpenAiCompatibleBackend};

#[derive(Debug, Clone)]
pub enum Backend {
    OpenAi(OpenAiCompatibleBackend),
    Offline(OfflineBackend),
}

impl Backend {
    pub fn offline() -> Self {
        Self::Offline(OfflineBackend::new())
    }

    /// Remote backend when an API key is present or the endpoint is local,
    /// offline quoting otherwise.
    pub fn from_settings(
        base_url: &str,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.filter(|key| !key.trim().is_empty());
        let local = is_local_endpoint(base_url);

        if api_key.is_none() && !local {
            info!(base_url, "no chat API key configured; using offline backend");
            return Ok(Self::offline());
        }

        Ok(Self::OpenAi(OpenAiCompatibleBackend::new(
            base_url,
            api_key,
            connect_timeout,
        )?))
    }
}

fn is_local_endpoint(base_url: &str) -> bool {
    let lower = base_url.to_lowercase();
    ["://localhost", "://127.0.0.1", "://[::1]", "://0.0.0.0"]
        .iter()
        .any(|needle| lower.contains(needle))
}

impl ChatBackend for Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::OpenAi(backend) => backend.name(),
            Backend::Offline(backend) => backend.name(),
        }
    }

    async fn send(&self, request: ChatRequest) -> Result<ChatReply, LlmError> {
        match self {
            Backend::OpenAi(backend) => backend.send(request).await,
            Backend::Offline(backend) => backend.send(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_BASE_URL;

    #[test]
    fn picks_backend_from_settings() {
        let timeout = Duration::from_secs(2);

        let remote = Backend::from_settings(DEFAULT_BASE_URL, Some("gsk_test".to_string()), timeout).unwrap();
        assert_eq!(remote.name(), "openai-compatible");

        let keyless = Backend::from_settings(DEFAULT_BASE_URL, Some("  ".to_string()), timeout).unwrap();
        assert_eq!(keyless.name(), "offline");

        let local = Backend::from_settings("http://localhost:11434/v1", None, timeout).unwrap();
        assert_eq!(local.name(), "openai-compatible");
    }
}
