use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Result};
use mirgpt_llm::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use mirgpt_retrieval::DEFAULT_MAX_PAGES;
use serde::Serialize;

pub const DEFAULT_MANUAL_PATH: &str = "Academic-Policy-Manual-for-Students3.pdf";

/// Runtime settings, read from `MIRGPT_*` variables with defaults.
#[derive(Debug, Clone, Serialize)]
pub struct AssistantConfig {
    pub manual_path: PathBuf,
    pub max_pages: usize,
    pub max_chunk_chars: usize,
    pub top_k: usize,
    pub history_window: usize,
    pub max_transcript_messages: usize,
    pub model: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub database_url: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            manual_path: PathBuf::from(DEFAULT_MANUAL_PATH),
            max_pages: DEFAULT_MAX_PAGES,
            max_chunk_chars: 500,
            top_k: 3,
            history_window: 6,
            max_transcript_messages: 200,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 1024,
            stream: true,
            request_timeout: Duration::from_secs(45),
            connect_timeout: Duration::from_secs(6),
            database_url: None,
        }
    }
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            manual_path: env::var("MIRGPT_MANUAL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.manual_path),
            max_pages: parsed_var("MIRGPT_MAX_PAGES").unwrap_or(defaults.max_pages),
            max_chunk_chars: parsed_var("MIRGPT_MAX_CHUNK_CHARS")
                .unwrap_or(defaults.max_chunk_chars),
            top_k: parsed_var("MIRGPT_TOP_K").unwrap_or(defaults.top_k),
            history_window: parsed_var("MIRGPT_HISTORY_WINDOW")
                .unwrap_or(defaults.history_window),
            max_transcript_messages: parsed_var("MIRGPT_MAX_TRANSCRIPT_MESSAGES")
                .unwrap_or(defaults.max_transcript_messages),
            model: env::var("MIRGPT_MODEL").unwrap_or(defaults.model),
            base_url: env::var("MIRGPT_BASE_URL").unwrap_or(defaults.base_url),
            api_key: env::var("MIRGPT_API_KEY")
                .or_else(|_| env::var("GROQ_API_KEY"))
                .ok()
                .filter(|key| !key.trim().is_empty()),
            temperature: parsed_var("MIRGPT_TEMPERATURE").unwrap_or(defaults.temperature),
            max_tokens: parsed_var("MIRGPT_MAX_TOKENS").unwrap_or(defaults.max_tokens),
            stream: parsed_var("MIRGPT_STREAM").unwrap_or(defaults.stream),
            request_timeout: parsed_var("MIRGPT_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            connect_timeout: parsed_var("MIRGPT_CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            database_url: env::var("MIRGPT_DATABASE_URL").ok(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_chunk_chars > 0, "max_chunk_chars must be greater than zero");
        ensure!(self.max_pages > 0, "max_pages must be greater than zero");
        ensure!(
            !self.request_timeout.is_zero(),
            "request_timeout must be greater than zero"
        );
        ensure!(
            (0.0..=2.0).contains(&self.temperature),
            "temperature must be within 0.0..=2.0"
        );
        ensure!(!self.model.trim().is_empty(), "model must not be empty");
        Ok(())
    }
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.trim().parse::<T>().ok())
}
