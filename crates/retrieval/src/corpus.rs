use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::chunking::pack_lines;
use crate::source::{KnowledgeSource, SourceFingerprint};
use crate::RetrievalError;

/// Ordered chunks of the manual. Never contains blank entries.
#[derive(Debug, Clone, Default)]
pub struct ChunkCorpus {
    chunks: Vec<String>,
    source_available: bool,
}

impl ChunkCorpus {
    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn source_available(&self) -> bool {
        self.source_available
    }
}

struct CachedCorpus {
    fingerprint: Option<SourceFingerprint>,
    corpus: Arc<ChunkCorpus>,
}

/// Process-wide memo of the chunked manual.
///
/// The corpus is built on first access and rebuilt only when the source
/// fingerprint changes or after [`CorpusCache::invalidate`].
pub struct CorpusCache {
    source: Arc<dyn KnowledgeSource>,
    max_chunk_chars: NonZeroUsize,
    state: RwLock<Option<CachedCorpus>>,
}

impl CorpusCache {
    pub fn new(
        source: Arc<dyn KnowledgeSource>,
        max_chunk_chars: usize,
    ) -> Result<Self, RetrievalError> {
        let max_chunk_chars = NonZeroUsize::new(max_chunk_chars).ok_or_else(|| {
            RetrievalError::InvalidArgument(
                "max_chunk_chars must be greater than zero".to_string(),
            )
        })?;

        Ok(Self {
            source,
            max_chunk_chars,
            state: RwLock::new(None),
        })
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    pub fn get_or_build_corpus(&self) -> Arc<ChunkCorpus> {
        let fingerprint = self.source.fingerprint();

        if let Some(cached) = self.state.read().as_ref() {
            if cached.fingerprint == fingerprint {
                return cached.corpus.clone();
            }
        }

        let mut guard = self.state.write();
        if let Some(cached) = guard.as_ref() {
            if cached.fingerprint == fingerprint {
                return cached.corpus.clone();
            }
        }

        let corpus = Arc::new(self.build());
        *guard = Some(CachedCorpus {
            fingerprint,
            corpus: corpus.clone(),
        });
        corpus
    }

    pub fn invalidate(&self) {
        self.state.write().take();
    }

    fn build(&self) -> ChunkCorpus {
        let Some(raw) = self.source.load() else {
            warn!(source = %self.source.describe(), "no knowledge base; answering without manual context");
            return ChunkCorpus::default();
        };

        let chunks = pack_lines(&raw, self.max_chunk_chars);
        info!(
            source = %self.source.describe(),
            chunks = chunks.len(),
            max_chunk_chars = self.max_chunk_chars.get(),
            "policy corpus built"
        );

        ChunkCorpus {
            chunks,
            source_available: true,
        }
    }
}
