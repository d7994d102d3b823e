//! Root-cause summarization collaborator.
//!
//! Production code uses `OpenAiSummarizer` against an OpenAI-compatible chat
//! completions endpoint. Test code uses `FakeSummarizer` with a canned reply.

use async_trait::async_trait;
use incident_shared::{IncidentError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

use crate::config::SummarizerConfig;

pub const SYSTEM_PROMPT: &str =
    "You are an expert Site Reliability Engineer analysing container logs.";

/// Three-sentence root-cause prompt over a flattened log stream.
pub fn build_prompt(log_dump: &str) -> String {
    format!(
        "You are performing root-cause analysis on a multi-container system.\n\
         In exactly three sentences, please include:\n\
         1. When and where the failure first appeared (with timestamp and service name).\n\
         2. What went wrong (including the lifecycle stage, e.g. \"startup\", and the specific error).\n\
         3. How it impacted other services and one actionable recommendation for remediation.\n\
         \n\
         Here is the log stream:\n\
         ---\n\
         {}\n\
         ---\n",
        log_dump
    )
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

// ============================================================================
// OpenAI-compatible client
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

pub struct OpenAiSummarizer {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key_env: String,
}

impl OpenAiSummarizer {
    pub fn from_config(config: &SummarizerConfig) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
        }
    }

    /// Key read at call time so it never lives in the config file.
    fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                IncidentError::Misconfiguration(format!("{} not found", self.api_key_env))
            })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let api_key = self.api_key()?;
        let url = format!("{}/chat/completions", self.endpoint);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        info!("Summarizer call [{}] ({} prompt chars)", self.model, user_prompt.len());

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| IncidentError::Summarizer(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Summarizer error {}: {}", status, error_text);
            return Err(IncidentError::Summarizer(format!(
                "endpoint returned {}: {}",
                status, error_text
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| IncidentError::Summarizer(format!("unreadable response: {}", e)))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| IncidentError::Summarizer("response had no content".to_string()))
    }
}

// ============================================================================
// Fake Summarizer (Testing)
// ============================================================================

/// Summarizer returning a fixed reply and recording every prompt it receives
#[derive(Debug, Clone)]
pub struct FakeSummarizer {
    reply: std::result::Result<String, String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl FakeSummarizer {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fails every call as a summarizer with no credentials would
    pub fn unauthenticated() -> Self {
        Self {
            reply: Err("OPENAI_API_KEY not found".to_string()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().ok().and_then(|p| p.last().cloned())
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn complete(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(user_prompt.to_string());
        }
        self.reply
            .clone()
            .map_err(IncidentError::Misconfiguration)
    }
}
