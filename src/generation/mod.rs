//! Answer generation through an OpenAI-compatible chat completion endpoint.


use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::Config;
use crate::http::{HttpClient, join_url};

pub const SYSTEM_PROMPT: &str = "You are a knowledge base assistant. Answer the user's question \
accurately, concisely and in a well-organized way, using only the knowledge base content \
provided. If that content does not contain the answer, say so instead of guessing.";

pub const GENERATION_FAILED_ANSWER: &str =
    "Sorry, an error occurred while generating the answer, please try again later.";

/// A single system + user chat completion. Implementations block on the network.
pub trait ChatCompleter: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient {
    #[inline]
    pub fn new(config: &Config) -> Self {
        let http = HttpClient::new(config.http.chat_timeout())
            .with_retry_attempts(config.http.retry_attempts)
            .with_bearer_token(&config.chat.api_key);

        Self {
            base_url: config.chat.base_url.clone(),
            model: config.chat.model.clone(),
            temperature: config.chat.temperature,
            max_tokens: config.chat.max_tokens,
            http,
        }
    }

    #[inline]
    pub fn with_http_client(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }
}

impl ChatCompleter for ChatClient {
    #[inline]
    fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let url = join_url(&self.base_url, "chat/completions");

        debug!("Requesting chat completion from {} ({})", url, self.model);

        let response_text = self
            .http
            .post_json(&url, &request)
            .context("Failed to call chat completion service")?;

        let response: ChatResponse = serde_json::from_str(&response_text)
            .context("Failed to parse chat completion response")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("Chat completion returned no choices"))
    }
}

/// Turns a question and retrieved context into a natural-language answer.
#[derive(Clone)]
pub struct AnswerGenerator {
    completer: Arc<dyn ChatCompleter>,
}

impl AnswerGenerator {
    #[inline]
    pub fn new(completer: Arc<dyn ChatCompleter>) -> Self {
        Self { completer }
    }

    /// Never fails: any service error becomes [`GENERATION_FAILED_ANSWER`].
    #[inline]
    pub fn generate(&self, question: &str, context: &str) -> String {
        let prompt = build_user_prompt(question, context);
        match self.completer.complete(SYSTEM_PROMPT, &prompt) {
            Ok(answer) => answer,
            Err(e) => {
                error!("Answer generation failed: {:#}", e);
                GENERATION_FAILED_ANSWER.to_string()
            }
        }
    }
}

#[inline]
pub fn build_user_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer based on the following context retrieved from the knowledge base:\n\n\
         [Knowledge base content]\n{}\n\n[User question]\n{}",
        context, question
    )
}
