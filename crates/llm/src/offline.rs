use futures::stream;
use mirgpt_core::prompt::extract_context;
use mirgpt_core::Role;

use crate::{ChatBackend, ChatReply, ChatRequest, LlmError};

const NOT_FOUND: &str = "I could not find this in the policy manual. Live answers are disabled because no chat backend is configured, so please consult the official manual or the registrar.";

/// Answers without a model by quoting the retrieved manual excerpts.
///
/// Used when no API key is configured, and by tests that need a
/// deterministic backend.
#[derive(Debug, Clone, Default)]
pub struct OfflineBackend;

impl OfflineBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn answer_for(request: &ChatRequest) -> String {
        let context = request
            .messages
            .iter()
            .find(|message| message.role == Role::System)
            .and_then(|message| extract_context(&message.content))
            .filter(|context| !context.trim().is_empty());

        match context {
            Some(context) => format!("Here is what the policy manual says:\n\n{context}"),
            None => NOT_FOUND.to_string(),
        }
    }
}

impl ChatBackend for OfflineBackend {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn send(&self, request: ChatRequest) -> Result<ChatReply, LlmError> {
        let answer = Self::answer_for(&request);
        if !request.stream {
            return Ok(ChatReply::Complete(answer));
        }

        let fragments = answer
            .split_inclusive(' ')
            .map(|fragment| Ok(fragment.to_string()))
            .collect::<Vec<_>>();
        Ok(ChatReply::Stream(Box::pin(stream::iter(fragments))))
    }
}
