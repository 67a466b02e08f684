mod chunking;
mod corpus;
mod source;
mod tokenize;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

pub use chunking::chunk_document;
pub use corpus::{ChunkCorpus, CorpusCache};
pub use source::{
    source_for_path, InlineKnowledgeSource, KnowledgeSource, PdfKnowledgeSource,
    SourceFingerprint, TextKnowledgeSource, DEFAULT_MAX_PAGES,
};
pub use tokenize::token_set;

pub const CONTEXT_SEPARATOR: &str = "\n\n";

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// A corpus chunk paired with its token-overlap score for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredChunk {
    pub index: usize,
    pub score: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalStats {
    pub source: String,
    pub source_available: bool,
    pub chunks_loaded: usize,
}

/// Ranks `corpus` against `query` by unique-token overlap.
///
/// Zero-score chunks are dropped. Equal scores keep corpus order.
pub fn rank(corpus: &[String], query: &str, top_k: usize) -> Vec<ScoredChunk> {
    let query_tokens = token_set(query);
    if query_tokens.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let mut scored = corpus
        .iter()
        .enumerate()
        .map(|(index, chunk)| (index, overlap(&query_tokens, &token_set(chunk))))
        .filter(|(_, score)| *score > 0)
        .collect::<Vec<_>>();

    // stable: ties stay in corpus order
    scored.sort_by(|(_, a), (_, b)| b.cmp(a));

    scored
        .into_iter()
        .take(top_k)
        .map(|(index, score)| ScoredChunk {
            index,
            score,
            text: corpus[index].clone(),
        })
        .collect()
}

pub fn join_context(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|hit| hit.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Top `top_k` chunks for `query`, best first, separated by a blank line.
/// Empty when nothing overlaps.
pub fn retrieve(corpus: &[String], query: &str, top_k: usize) -> String {
    join_context(&rank(corpus, query, top_k))
}

fn overlap(query_tokens: &HashSet<String>, chunk_tokens: &HashSet<String>) -> usize {
    query_tokens
        .iter()
        .filter(|token| chunk_tokens.contains(*token))
        .count()
}

#[derive(Clone)]
pub struct LexicalRetriever {
    cache: Arc<CorpusCache>,
    top_k: usize,
}

impl LexicalRetriever {
    pub fn new(cache: Arc<CorpusCache>, top_k: usize) -> Self {
        Self { cache, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn corpus(&self) -> Arc<ChunkCorpus> {
        self.cache.get_or_build_corpus()
    }

    pub fn search(&self, query: &str, limit: usize) -> Vec<ScoredChunk> {
        rank(self.corpus().chunks(), query, limit)
    }

    pub fn context_for(&self, query: &str) -> String {
        join_context(&self.search(query, self.top_k))
    }

    pub fn stats(&self) -> RetrievalStats {
        let corpus = self.corpus();
        RetrievalStats {
            source: self.cache.source_description(),
            source_available: corpus.source_available(),
            chunks_loaded: corpus.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(chunks: &[&str]) -> Vec<String> {
        chunks.iter().map(|chunk| chunk.to_string()).collect()
    }

    #[test]
    fn excludes_zero_score_chunks() {
        let corpus = corpus(&["attendance policy covers 80 percent", "grading scheme spring"]);
        assert_eq!(
            retrieve(&corpus, "attendance", 3),
            "attendance policy covers 80 percent"
        );
    }

    #[test]
    fn ties_keep_corpus_order() {
        let corpus = corpus(&["alpha beta", "beta alpha", "gamma"]);
        assert_eq!(
            retrieve(&corpus, "alpha beta", 2),
            "alpha beta\n\nbeta alpha"
        );

        let hits = rank(&corpus, "alpha beta", 2);
        assert_eq!(hits[0].index, 0);
        assert_eq!(hits[1].index, 1);
        assert!(hits.iter().all(|hit| hit.score == 2));
    }

    #[test]
    fn ranks_by_score_descending() {
        let corpus = corpus(&["probation", "gpa probation rules", "gpa"]);
        let hits = rank(&corpus, "GPA probation rules", 3);
        assert_eq!(
            hits.iter().map(|hit| hit.index).collect::<Vec<_>>(),
            vec![1, 0, 2]
        );
        assert_eq!(hits[0].score, 3);
    }

    #[test]
    fn duplicate_query_tokens_count_once() {
        let corpus = corpus(&["gpa gpa gpa", "gpa probation"]);
        let hits = rank(&corpus, "gpa GPA gpa probation", 2);
        assert_eq!(hits[0].index, 1);
        assert_eq!(hits[0].score, 2);
        assert_eq!(hits[1].score, 1);
    }

    #[test]
    fn empty_inputs_yield_empty_context() {
        let corpus = corpus(&["attendance policy"]);
        assert_eq!(retrieve(&corpus, "", 3), "");
        assert_eq!(retrieve(&corpus, "   ", 3), "");
        assert_eq!(retrieve(&[], "attendance", 3), "");
        assert_eq!(retrieve(&corpus, "attendance", 0), "");
        assert_eq!(retrieve(&corpus, "unrelated words", 3), "");
    }

    #[test]
    fn retrieval_is_repeatable() {
        let corpus = corpus(&["alpha beta", "beta gamma", "gamma alpha"]);
        let snapshot = corpus.clone();
        let first = retrieve(&corpus, "alpha gamma", 2);
        let second = retrieve(&corpus, "alpha gamma", 2);
        assert_eq!(first, second);
        assert_eq!(corpus, snapshot);
    }

    #[test]
    fn answers_gpa_question_end_to_end() {
        let raw = "Attendance must be 80 percent.\nGPA below 1.70 triggers probation.\nWithdrawal deadline is week 10.";
        let chunks = chunk_document(raw, 50).unwrap();
        assert_eq!(chunks.len(), 3);

        assert_eq!(
            retrieve(&chunks, "What GPA triggers probation?", 1),
            "GPA below 1.70 triggers probation."
        );
    }

    #[test]
    fn retriever_reports_stats_and_context() {
        let source = Arc::new(InlineKnowledgeSource::new(
            "Attendance must be 80 percent.\nGPA below 1.70 triggers probation.",
        ));
        let cache = Arc::new(CorpusCache::new(source, 40).unwrap());
        let retriever = LexicalRetriever::new(cache, 2);

        let stats = retriever.stats();
        assert!(stats.source_available);
        assert_eq!(stats.chunks_loaded, 2);
        assert_eq!(stats.source, "inline");
        assert_eq!(
            retriever.context_for("attendance percent"),
            "Attendance must be 80 percent."
        );
    }
}
