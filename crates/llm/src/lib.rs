mod backend;
mod offline;
mod openai;
mod sse;

use std::pin::Pin;

use futures::{Stream, StreamExt};
use mirgpt_core::{accumulate, ChatMessage};
use serde::Serialize;

pub use backend::Backend;
pub use offline::OfflineBackend;
pub use openai::{OpenAiCompatibleBackend, DEFAULT_BASE_URL, DEFAULT_MODEL};

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Either the whole answer at once or the answer as incremental fragments.
pub enum ChatReply {
    Complete(String),
    Stream(FragmentStream),
}

impl std::fmt::Debug for ChatReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(text) => f.debug_tuple("Complete").field(text).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("backend returned an empty answer")]
    EmptyReply,
    #[error("backend did not answer within {seconds}s")]
    Timeout { seconds: u64 },
}

/// A chat-completion service.
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, request: ChatRequest) -> Result<ChatReply, LlmError>;
}

/// Reduces a reply to its full text, reporting the visible-so-far answer after
/// every fragment. Streamed and complete replies end in the same string.
pub async fn collect_reply<F>(reply: ChatReply, mut on_progress: F) -> Result<String, LlmError>
where
    F: FnMut(&str) + Send,
{
    match reply {
        ChatReply::Complete(text) => {
            on_progress(&text);
            Ok(text)
        }
        ChatReply::Stream(mut fragments) => {
            let mut answer = String::new();
            while let Some(fragment) = fragments.next().await {
                let fragment = fragment?;
                if fragment.is_empty() {
                    continue;
                }
                answer = accumulate(answer, &fragment);
                on_progress(&answer);
            }
            Ok(answer)
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn fragments(parts: &[&str]) -> ChatReply {
        let items = parts
            .iter()
            .map(|part| Ok(part.to_string()))
            .collect::<Vec<Result<String, LlmError>>>();
        ChatReply::Stream(Box::pin(stream::iter(items)))
    }

    #[tokio::test]
    async fn streamed_and_complete_replies_match() {
        let mut seen = Vec::new();
        let streamed = collect_reply(fragments(&["GPA below ", "", "1.70 ", "triggers probation."]), |so_far| {
            seen.push(so_far.to_string())
        })
        .await
        .unwrap();
        let complete = collect_reply(
            ChatReply::Complete("GPA below 1.70 triggers probation.".to_string()),
            |_| {},
        )
        .await
        .unwrap();

        assert_eq!(streamed, complete);
        assert_eq!(
            seen,
            vec![
                "GPA below ".to_string(),
                "GPA below 1.70 ".to_string(),
                "GPA below 1.70 triggers probation.".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn stream_errors_propagate() {
        let items: Vec<Result<String, LlmError>> = vec![
            Ok("partial".to_string()),
            Err(LlmError::Stream("connection reset".to_string())),
        ];
        let result = collect_reply(ChatReply::Stream(Box::pin(stream::iter(items))), |_| {}).await;
        assert!(matches!(result, Err(LlmError::Stream(_))));
    }
}
