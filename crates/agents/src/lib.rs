mod config;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use mirgpt_core::persona::BACKEND_FALLBACK;
use mirgpt_core::{build_prompt, normalize_text, ChatMessage, ConversationSession};
use mirgpt_llm::{collect_reply, Backend, ChatBackend, ChatRequest, LlmError};
use mirgpt_observability::AppMetrics;
use mirgpt_retrieval::{
    join_context, source_for_path, ChunkCorpus, CorpusCache, LexicalRetriever, RetrievalStats,
    ScoredChunk,
};
use mirgpt_storage::{Store, TranscriptRepository};
use serde::Serialize;
use tracing::{info, instrument, warn};

pub use config::{AssistantConfig, DEFAULT_MANUAL_PATH};

/// Result of one user turn. The assistant message has already been appended
/// to the session and persisted.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub answer: String,
    pub degraded: bool,
    pub context_used: bool,
    pub matched_chunks: Vec<ScoredChunk>,
    pub knowledge_available: bool,
}

pub struct PolicyAssistant<S, B>
where
    S: TranscriptRepository,
    B: ChatBackend,
{
    retriever: LexicalRetriever,
    backend: Arc<B>,
    store: Arc<S>,
    metrics: Arc<AppMetrics>,
    config: Arc<AssistantConfig>,
}

impl<S, B> Clone for PolicyAssistant<S, B>
where
    S: TranscriptRepository,
    B: ChatBackend,
{
    fn clone(&self) -> Self {
        Self {
            retriever: self.retriever.clone(),
            backend: self.backend.clone(),
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S, B> PolicyAssistant<S, B>
where
    S: TranscriptRepository,
    B: ChatBackend,
{
    pub fn new(
        retriever: LexicalRetriever,
        backend: Arc<B>,
        store: Arc<S>,
        metrics: Arc<AppMetrics>,
        config: AssistantConfig,
    ) -> Self {
        Self {
            retriever,
            backend,
            store,
            metrics,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn knowledge_available(&self) -> bool {
        self.retriever.corpus().source_available()
    }

    pub fn corpus(&self) -> Arc<ChunkCorpus> {
        self.retriever.corpus()
    }

    pub fn retrieval_stats(&self) -> RetrievalStats {
        self.retriever.stats()
    }

    pub fn kb_search(&self, query: &str, limit: usize) -> Vec<ScoredChunk> {
        self.retriever.search(query, limit)
    }

    pub async fn start_session(&self) -> Result<ConversationSession> {
        let session = ConversationSession::new();
        self.store.upsert_session(&session).await?;
        Ok(session)
    }

    /// Resumes `session_id` when it is known, otherwise starts a new session
    /// (under that id when one was given).
    pub async fn load_or_start(&self, session_id: Option<&str>) -> Result<ConversationSession> {
        let Some(session_id) = session_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return self.start_session().await;
        };

        if let Some(session) = self.store.load_session(session_id).await? {
            return Ok(session);
        }

        let session = ConversationSession::with_id(session_id);
        self.store.upsert_session(&session).await?;
        Ok(session)
    }

    pub async fn history(&self, session_id: &str) -> Result<Option<ConversationSession>> {
        self.store.load_session(session_id).await
    }

    pub async fn clear_session(&self, session: &mut ConversationSession) -> Result<()> {
        session.clear();
        self.store.upsert_session(session).await?;
        info!(session_id = %session.session_id, "session cleared");
        Ok(())
    }

    pub async fn purge_idle_sessions(&self, max_idle: chrono::Duration) -> Result<u64> {
        self.store.purge_idle(chrono::Utc::now() - max_idle).await
    }

    /// Answers `user_text` within `session`.
    ///
    /// Exactly one user and one assistant message are appended. When the
    /// backend fails or times out the assistant message is the fallback text
    /// and the outcome is marked degraded.
    #[instrument(skip(self, session, user_text, on_progress), fields(session_id = %session.session_id))]
    pub async fn handle_turn<F>(
        &self,
        session: &mut ConversationSession,
        user_text: &str,
        mut on_progress: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&str) + Send,
    {
        let started = Instant::now();
        let question = user_text.trim();
        let normalized = normalize_text(question);
        if normalized.is_empty() {
            bail!("message text must not be empty");
        }
        self.metrics.inc_turn();

        let corpus = self.retriever.corpus();
        let matched_chunks = self.retriever.search(&normalized, self.retriever.top_k());
        let context = join_context(&matched_chunks);
        self.metrics.add_retrieval_hits(matched_chunks.len());

        let messages = build_prompt(
            session.messages(),
            &context,
            question,
            self.config.history_window,
        );
        session.append(ChatMessage::user(question));

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: self.config.stream,
        };

        let (answer, degraded) = match self.ask(request, &mut on_progress).await {
            Ok(answer) => (answer, false),
            Err(err) => {
                warn!(error = %err, backend = self.backend.name(), "chat backend failed; answering with fallback");
                self.metrics.inc_fallback();
                (BACKEND_FALLBACK.to_string(), true)
            }
        };

        session.append(ChatMessage::assistant(answer.as_str()));
        if session.len() > self.config.max_transcript_messages {
            session.truncate_to_trailing(self.config.max_transcript_messages);
        }
        self.store
            .upsert_session(session)
            .await
            .context("failed to persist transcript")?;

        self.metrics.observe_latency(started.elapsed());
        info!(
            matched = matched_chunks.len(),
            context_chars = context.len(),
            degraded,
            knowledge_available = corpus.source_available(),
            "turn handled"
        );

        Ok(TurnOutcome {
            answer,
            degraded,
            context_used: !context.is_empty(),
            matched_chunks,
            knowledge_available: corpus.source_available(),
        })
    }

    async fn ask<F>(&self, request: ChatRequest, on_progress: &mut F) -> Result<String, LlmError>
    where
        F: FnMut(&str) + Send,
    {
        let timeout = self.config.request_timeout;
        let metrics = self.metrics.clone();

        let round_trip = async {
            let reply = self.backend.send(request).await?;
            collect_reply(reply, |so_far| {
                metrics.inc_fragment();
                on_progress(so_far);
            })
            .await
        };

        let answer = tokio::time::timeout(timeout, round_trip)
            .await
            .map_err(|_| LlmError::Timeout {
                seconds: timeout.as_secs(),
            })??;

        if answer.trim().is_empty() {
            return Err(LlmError::EmptyReply);
        }
        Ok(answer)
    }
}

/// Wires the default stack: manual on disk, memory or SQLite transcripts,
/// remote or offline chat backend.
pub async fn build_default_assistant(
    config: AssistantConfig,
    metrics: Arc<AppMetrics>,
) -> Result<PolicyAssistant<Store, Backend>> {
    config.validate()?;

    let source = source_for_path(&config.manual_path, config.max_pages);
    let cache = CorpusCache::new(source, config.max_chunk_chars)
        .context("invalid chunking configuration")?;
    let retriever = LexicalRetriever::new(Arc::new(cache), config.top_k);

    let store = match config.database_url.as_deref() {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };

    let backend = Backend::from_settings(
        &config.base_url,
        config.api_key.clone(),
        config.connect_timeout,
    )
    .context("failed to build chat backend")?;

    info!(
        manual = %config.manual_path.display(),
        store = store.backend_name(),
        backend = backend.name(),
        model = %config.model,
        "policy assistant configured"
    );

    Ok(PolicyAssistant::new(
        retriever,
        Arc::new(backend),
        Arc::new(store),
        metrics,
        config,
    ))
}
