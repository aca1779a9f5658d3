//! AI provider client
//!
//! The provider is treated as an opaque text-in, text-out service behind the
//! [`CompletionClient`] trait. [`OpenRouterClient`] speaks the
//! OpenAI-compatible chat-completions API; [`ScriptedClient`] replays canned
//! answers for tests and offline use.

use crate::config::Config;
use crate::error::{OrcliError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, instrument};

/// Sampling parameters for one completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    /// Optional system message sent before the prompt
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            system: None,
            temperature: 0.7,
            max_tokens: 4000,
        }
    }
}

impl CompletionParams {
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Text completion against a remote model
pub trait CompletionClient: Send + Sync {
    /// Send `prompt` to `model_id` and return the reply text
    ///
    /// Unreachable provider, timeout, non-2xx status or a reply without text
    /// are all [`OrcliError::RemoteCall`].
    fn complete(&self, prompt: &str, model_id: &str, params: &CompletionParams) -> Result<String>;
}

/// Client for OpenRouter and other OpenAI-compatible endpoints
pub struct OpenRouterClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("base_url", &self.base_url)
            .field("api_key", &crate::config::mask_secret(&self.api_key))
            .finish()
    }
}

impl OpenRouterClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("orcli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OrcliError::remote(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Build a client from configuration; fails when no key is available
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            OrcliError::config(format!(
                "no API key configured; run 'orcli config init --api-key ...' or set {}",
                crate::config::API_KEY_ENV
            ))
        })?;
        Self::new(
            &config.api.base_url,
            &api_key,
            Duration::from_secs(config.api.timeout_secs),
        )
    }

    /// Cheap authenticated request used by `doctor`
    pub fn probe(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()?;
        if !response.status().is_success() {
            return Err(OrcliError::remote(format!(
                "HTTP {} from {}/models",
                response.status(),
                self.base_url
            )));
        }
        Ok(())
    }
}

impl CompletionClient for OpenRouterClient {
    #[instrument(skip(self, prompt, params), fields(prompt_len = prompt.len()))]
    fn complete(&self, prompt: &str, model_id: &str, params: &CompletionParams) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = request_body(prompt, model_id, params);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(OrcliError::remote(format!(
                "HTTP {} from {}: {}",
                status,
                url,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let reply: Value = response
            .json()
            .map_err(|e| OrcliError::remote(format!("invalid JSON from provider: {}", e)))?;
        let text = extract_content(&reply)?;
        debug!("Completion received ({} chars)", text.len());
        Ok(text)
    }
}

/// Chat-completions request body
pub fn request_body(prompt: &str, model_id: &str, params: &CompletionParams) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = params.system.as_deref().filter(|s| !s.trim().is_empty()) {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    json!({
        "model": model_id,
        "messages": messages,
        "temperature": params.temperature,
        "max_tokens": params.max_tokens,
    })
}

/// Pull `choices[0].message.content` out of a reply
pub fn extract_content(reply: &Value) -> Result<String> {
    if let Some(message) = reply.get("error").and_then(|e| e.get("message")).and_then(Value::as_str) {
        return Err(OrcliError::remote(format!("provider error: {}", message)));
    }
    reply
        .get("choices")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("message"))
        .and_then(|v| v.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| OrcliError::remote("reply has no message content"))
}

/// Client replaying queued replies
///
/// When one reply is left it is returned for every further call.
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: impl Into<String>) -> Self {
        Self::new(vec![Ok(reply.into())])
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

impl CompletionClient for ScriptedClient {
    fn complete(&self, prompt: &str, _model_id: &str, _params: &CompletionParams) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());

        let mut replies = self.replies.lock();
        let next = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().map(|reply| match reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(OrcliError::remote(e.to_string())),
            })
        };
        next.unwrap_or_else(|| Err(OrcliError::remote("no scripted reply left")))
    }
}

/// Prompt builders for the code, tool and debug commands
pub mod prompts {
    /// System message for `code modify`
    pub fn modify_system(language: &str) -> String {
        format!(
            "You are an expert programmer. You will be given a source file and a modification \
             request. Make the requested change, preserve existing behavior unless told otherwise \
             and follow the file's existing style.\nFile language: {}",
            language
        )
    }

    /// User prompt for `code modify`
    pub fn modify(path: &str, language: &str, content: &str, request: &str) -> String {
        format!(
            "Here is the current file '{path}':\n\n```{language}\n{content}\n```\n\n\
             Modification request: {request}\n\n\
             Return ONLY the complete modified file, without explanations."
        )
    }

    /// System message for `code review`
    pub fn review_system() -> &'static str {
        "You are an expert code reviewer. Give specific, actionable feedback on code quality, \
         likely bugs, performance, security and maintainability."
    }

    /// System message for generated files
    pub fn create_system(file_type: &str) -> String {
        format!("You are an expert {} developer.", file_type)
    }

    /// User prompt for a generated file
    pub fn create(file_type: &str, request: &str) -> String {
        format!(
            "Create a {file_type} file based on this request: {request}\n\n\
             Provide complete, well-structured content that is functional and ready to use, \
             well commented and follows current best practices for {file_type}.\n\n\
             Only provide the file content, no additional explanations."
        )
    }

    /// System message for summaries
    pub fn summarize_system() -> &'static str {
        "You are an expert at creating clear, concise summaries."
    }

    /// User prompt for a summary
    pub fn summarize(instruction: &str, content: &str) -> String {
        format!("{instruction} of the following content:\n\n{content}")
    }

    /// System message for the debug commands
    pub fn debug_system(language: &str) -> String {
        format!(
            "You are an expert {} developer and debugging specialist with deep knowledge of \
             common issues, best practices and optimization techniques.",
            language
        )
    }

    /// User prompt for `debug file`
    pub fn debug_file(language: &str, focus: &str, findings: &str, content: &str) -> String {
        format!(
            "Analyze this {language} code for debugging purposes. {focus}.\n\n\
             Static analysis results:\n{findings}\n\n\
             Code to analyze:\n```{language}\n{content}\n```\n\n\
             Provide a detailed analysis including:\n\
             1. Issues found (with line numbers if possible)\n\
             2. Severity level (critical, high, medium, low)\n\
             3. Impact description\n\
             4. Root cause analysis\n\
             5. Recommended solutions"
        )
    }

    /// System message for fix suggestions
    pub fn fix_system() -> &'static str {
        "You are an expert code reviewer specializing in providing clear, actionable fix suggestions."
    }

    /// User prompt for fix suggestions following a debug analysis
    pub fn fix_suggestions(content: &str, analysis: &str) -> String {
        format!(
            "Based on the debugging analysis, provide specific fix suggestions for this code.\n\n\
             Original code:\n{content}\n\n\
             Issues identified:\n{analysis}\n\n\
             Provide specific code fixes with before/after examples, step-by-step \
             instructions and ways to prevent similar issues."
        )
    }

    /// User prompt for `debug analyze` and `debug project`
    pub fn codebase_insights(summary: &str) -> String {
        format!(
            "Here is a summary of a codebase produced by static scanning:\n\n{summary}\n\n\
             Give an assessment of its code quality, likely security risks and performance \
             concerns. End with a prioritized list of recommendations."
        )
    }

    /// User prompt for `code review`
    pub fn review(language: &str, content: &str, focus: &str) -> String {
        format!(
            "Please review this {language} code. {focus}.\n\n```{language}\n{content}\n```\n\n\
             Provide a review with concrete suggestions."
        )
    }
}
