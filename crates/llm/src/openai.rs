use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use crate::sse::{SseDecoder, SseEvent};
use crate::{ChatBackend, ChatReply, ChatRequest, FragmentStream, LlmError};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format
/// (Groq, OpenAI, Ollama, vLLM, llama.cpp server).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleBackend {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl ChatBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn send(&self, request: ChatRequest) -> Result<ChatReply, LlmError> {
        let url = self.endpoint();
        let body = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": request.stream,
        });

        debug!(url = %url, model = %request.model, stream = request.stream, "chat completion request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(api_key) = self.api_key.as_deref() {
            builder = builder.bearer_auth(api_key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        if request.stream {
            return Ok(ChatReply::Stream(fragment_stream(response.bytes_stream())));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|err| LlmError::Parse(err.to_string()))?;
        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(|text| ChatReply::Complete(text.to_string()))
            .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".to_string()))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

struct StreamState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

fn fragment_stream<S, B>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + 'static,
{
    let bytes: ByteStream = Box::pin(bytes.map(|chunk| chunk.map(|b| b.as_ref().to_vec())));
    let state = StreamState {
        bytes,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                match event {
                    SseEvent::Fragment(text) => return Some((Ok(text), state)),
                    SseEvent::Error(message) => {
                        state.finished = true;
                        state.pending.clear();
                        return Some((Err(LlmError::Stream(message)), state));
                    }
                    SseEvent::Done => return None,
                }
            }

            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(LlmError::Stream(err.to_string())), state));
                }
                None => {
                    state.finished = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    }))
}
