use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

pub const DEFAULT_MAX_PAGES: usize = 25;

static INLINE_SPACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{00A0}]+").expect("valid whitespace regex"));

/// Identity of a source document, used to decide when a cached corpus is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFingerprint {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Producer of the raw manual text.
///
/// `load` returns `None` when the document is missing or unreadable.
pub trait KnowledgeSource: Send + Sync {
    fn describe(&self) -> String;
    fn load(&self) -> Option<String>;
    fn fingerprint(&self) -> Option<SourceFingerprint>;
}

#[derive(Debug, Clone)]
pub struct PdfKnowledgeSource {
    path: PathBuf,
    max_pages: usize,
}

impl PdfKnowledgeSource {
    pub fn new(path: impl Into<PathBuf>, max_pages: usize) -> Self {
        Self {
            path: path.into(),
            max_pages: max_pages.max(1),
        }
    }
}

impl KnowledgeSource for PdfKnowledgeSource {
    fn describe(&self) -> String {
        format!("pdf:{}", self.path.display())
    }

    fn load(&self) -> Option<String> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "policy manual not found");
            return None;
        }

        let text = match pdf_extract::extract_text(&self.path) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "pdf text extraction failed");
                return None;
            }
        };

        debug!(path = %self.path.display(), bytes = text.len(), "extracted policy manual");
        first_pages(&text, self.max_pages)
    }

    fn fingerprint(&self) -> Option<SourceFingerprint> {
        file_fingerprint(&self.path)
    }
}

#[derive(Debug, Clone)]
pub struct TextKnowledgeSource {
    path: PathBuf,
}

impl TextKnowledgeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KnowledgeSource for TextKnowledgeSource {
    fn describe(&self) -> String {
        format!("text:{}", self.path.display())
    }

    fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => non_blank(raw.lines().map(clean_page).collect::<Vec<_>>().join("\n")),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "policy manual unreadable");
                None
            }
        }
    }

    fn fingerprint(&self) -> Option<SourceFingerprint> {
        file_fingerprint(&self.path)
    }
}

/// Manual text held in memory, or an explicitly absent manual.
#[derive(Debug, Clone, Default)]
pub struct InlineKnowledgeSource {
    text: Option<String>,
}

impl InlineKnowledgeSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }

    pub fn missing() -> Self {
        Self { text: None }
    }
}

impl KnowledgeSource for InlineKnowledgeSource {
    fn describe(&self) -> String {
        "inline".to_string()
    }

    fn load(&self) -> Option<String> {
        self.text.clone().and_then(non_blank)
    }

    fn fingerprint(&self) -> Option<SourceFingerprint> {
        None
    }
}

/// Picks the PDF extractor for `.pdf` files and the plain-text reader otherwise.
pub fn source_for_path(path: impl AsRef<Path>, max_pages: usize) -> Arc<dyn KnowledgeSource> {
    let path = path.as_ref();
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if is_pdf {
        Arc::new(PdfKnowledgeSource::new(path, max_pages))
    } else {
        Arc::new(TextKnowledgeSource::new(path))
    }
}

fn file_fingerprint(path: &Path) -> Option<SourceFingerprint> {
    let metadata = std::fs::metadata(path).ok()?;
    Some(SourceFingerprint {
        len: metadata.len(),
        modified: metadata.modified().ok(),
    })
}

fn clean_page(page: &str) -> String {
    page.lines()
        .map(|line| INLINE_SPACES.replace_all(line.trim(), " ").into_owned())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Keeps the first `max_pages` physical pages of form-feed separated text,
/// then drops the blank ones.
pub(crate) fn first_pages(text: &str, max_pages: usize) -> Option<String> {
    let pages = text
        .split('\x0C')
        .take(max_pages)
        .map(clean_page)
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>();

    non_blank(pages.join("\n"))
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
