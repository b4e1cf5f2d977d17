use crate::error::ManualError;
use crate::manual::util::truncate_with_ellipsis;
use crate::manual::warn;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use std::env;
use std::thread;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 45;
const AZURE_API_VERSION: &str = "2024-02-01";
const LOCAL_SUMMARY_CHARS: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// The text-generation capability. Implementations must be safe to retry.
pub trait Generator {
    fn label(&self) -> &str;
    fn generate(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;
}

/// Offline generator: answers with the first non-empty line of the last user
/// segment. Summaries become extractive and list-shaped selection prompts
/// never parse, so retrieval runs entirely on its deterministic fallbacks.
pub struct LocalGenerator;

impl Generator for LocalGenerator {
    fn label(&self) -> &str {
        "local"
    }

    fn generate(&self, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        let source = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .or_else(|| messages.last())
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let line = source
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        Ok(truncate_with_ellipsis(line, LOCAL_SUMMARY_CHARS))
    }
}

pub struct OpenAiCompatGenerator {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

pub struct AzureOpenAiGenerator {
    pub api_key: String,
    pub endpoint: String,
    pub deployment: String,
}

pub struct AnthropicGenerator {
    pub api_key: String,
    pub model: String,
}

pub struct GeminiGenerator {
    pub api_key: String,
    pub model: String,
}

fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()?)
}

fn extract_chat_completions_text(json: &Value) -> Option<String> {
    let choices = json.get("choices").and_then(Value::as_array)?;
    let first = choices.first()?;
    let content = first.get("message")?.get("content")?;
    match content {
        Value::String(s) => Some(s.to_string()),
        Value::Array(parts) => {
            let chunks: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            if chunks.is_empty() {
                None
            } else {
                Some(chunks.join("\n"))
            }
        }
        _ => None,
    }
}

fn extract_anthropic_text(json: &Value) -> Option<String> {
    let content = json.get("content").and_then(Value::as_array)?;
    let chunks: Vec<&str> = content
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n"))
    }
}

fn extract_gemini_text(json: &Value) -> Option<String> {
    json.get("candidates")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("content"))
        .and_then(|v| v.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|v| v.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let rest: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();
    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, rest)
}

impl Generator for OpenAiCompatGenerator {
    fn label(&self) -> &str {
        "openai-compatible"
    }

    fn generate(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{base}/v1/chat/completions");
        let payload = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature
        });

        let response = http_client()?
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()?;
        if !response.status().is_success() {
            anyhow::bail!(
                "openai-compatible call failed with status {}",
                response.status()
            );
        }
        let json: Value = response.json()?;
        extract_chat_completions_text(&json)
            .context("openai-compatible response missing text content")
    }
}

impl Generator for AzureOpenAiGenerator {
    fn label(&self) -> &str {
        "azure"
    }

    fn generate(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let base = self.endpoint.trim_end_matches('/');
        let url = format!(
            "{base}/openai/deployments/{}/chat/completions?api-version={AZURE_API_VERSION}",
            self.deployment
        );
        let payload = serde_json::json!({
            "messages": messages,
            "temperature": temperature
        });

        let response = http_client()?
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&payload)
            .send()?;
        if !response.status().is_success() {
            anyhow::bail!("azure call failed with status {}", response.status());
        }
        let json: Value = response.json()?;
        extract_chat_completions_text(&json).context("azure response missing text content")
    }
}

impl Generator for AnthropicGenerator {
    fn label(&self) -> &str {
        "anthropic"
    }

    fn generate(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let (system, turns) = split_system(messages);
        let mut payload = serde_json::json!({
            "model": self.model,
            "max_tokens": 1200,
            "temperature": temperature,
        });
        // the messages endpoint rejects an empty conversation
        if turns.is_empty() {
            payload["messages"] =
                serde_json::json!([{"role": "user", "content": system.unwrap_or_default()}]);
        } else {
            payload["messages"] = serde_json::to_value(&turns)?;
            if let Some(text) = system {
                payload["system"] = Value::String(text);
            }
        }

        let response = http_client()?
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()?;
        if !response.status().is_success() {
            anyhow::bail!("anthropic call failed with status {}", response.status());
        }
        let json: Value = response.json()?;
        extract_anthropic_text(&json).context("anthropic response missing text content")
    }
}

impl Generator for GeminiGenerator {
    fn label(&self) -> &str {
        "gemini"
    }

    fn generate(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let (system, rest) = split_system(messages);
        let mut contents: Vec<Value> = rest
            .iter()
            .map(|m| serde_json::json!({"role": "user", "parts": [{"text": m.content}]}))
            .collect();
        let mut payload = serde_json::json!({
            "generationConfig": {"temperature": temperature}
        });
        match system {
            Some(text) if contents.is_empty() => {
                contents.push(serde_json::json!({"role": "user", "parts": [{"text": text}]}));
            }
            Some(text) => {
                payload["systemInstruction"] = serde_json::json!({"parts": [{"text": text}]});
            }
            None => {}
        }
        payload["contents"] = Value::Array(contents);

        let response = http_client()?.post(&url).json(&payload).send()?;
        if !response.status().is_success() {
            anyhow::bail!("gemini call failed with status {}", response.status());
        }
        let json: Value = response.json()?;
        extract_gemini_text(&json).context("gemini response missing text content")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    Local,
    OpenAi,
    OpenAiCompatible,
    Azure,
    Anthropic,
    Gemini,
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn parse_provider_alias(raw: &str) -> Option<Provider> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "local" | "offline" => Some(Provider::Local),
        "openai" => Some(Provider::OpenAi),
        "openai-compatible" | "compatible" | "deepseek" => Some(Provider::OpenAiCompatible),
        "azure" | "azure-openai" => Some(Provider::Azure),
        "anthropic" | "claude" => Some(Provider::Anthropic),
        "gemini" | "google" => Some(Provider::Gemini),
        _ => None,
    }
}

fn infer_provider_from_model(model: &str) -> Option<Provider> {
    let lower = model.trim().to_ascii_lowercase();
    if lower.starts_with("deepseek-") {
        return Some(Provider::OpenAiCompatible);
    }
    if lower.starts_with("claude-") {
        return Some(Provider::Anthropic);
    }
    if lower.starts_with("gemini-") {
        return Some(Provider::Gemini);
    }
    if lower.starts_with("gpt-") || lower.starts_with("o3") || lower.starts_with("o4") {
        return Some(Provider::OpenAi);
    }
    None
}

fn first_available_provider() -> Provider {
    if env_non_empty("OPENAI_KEY").is_some() && env_non_empty("LLM_ENDPOINT").is_some() {
        return Provider::Azure;
    }
    if env_non_empty("AI_API_KEY").is_some() {
        return Provider::OpenAiCompatible;
    }
    if env_non_empty("OPENAI_API_KEY").is_some() {
        return Provider::OpenAi;
    }
    if env_non_empty("ANTHROPIC_API_KEY").is_some() {
        return Provider::Anthropic;
    }
    if env_non_empty("GEMINI_API_KEY").is_some() {
        return Provider::Gemini;
    }
    Provider::Local
}

fn default_model_for_provider(provider: Provider) -> &'static str {
    match provider {
        Provider::Local => "extractive",
        Provider::OpenAi => "gpt-4.1-mini",
        Provider::OpenAiCompatible => "deepseek-chat",
        Provider::Azure => "gpt-4o-mini",
        Provider::Anthropic => "claude-3-5-haiku-latest",
        Provider::Gemini => "gemini-2.5-flash-lite",
    }
}

fn require_env(vars: &[&str], provider: &str) -> Result<String, ManualError> {
    vars.iter()
        .find_map(|var| env_non_empty(var))
        .ok_or_else(|| {
            ManualError::ProviderConfig(format!(
                "{provider} selected but none of {} is set",
                vars.join(", ")
            ))
        })
}

/// Resolve the generation provider from the environment. With nothing
/// configured the offline [`LocalGenerator`] is returned.
pub fn resolve_generator() -> Result<Box<dyn Generator>, ManualError> {
    let explicit = env_non_empty("MANUAL_LLM_PROVIDER");
    let explicit_provider = match explicit.as_deref() {
        Some(raw) => Some(parse_provider_alias(raw).ok_or_else(|| {
            ManualError::ProviderConfig(format!("unknown provider `{raw}`"))
        })?),
        None => None,
    };
    let configured_model = env_non_empty("MANUAL_LLM_MODEL").or_else(|| env_non_empty("AI_MODEL"));

    let provider = explicit_provider
        .or_else(|| configured_model.as_deref().and_then(infer_provider_from_model))
        .unwrap_or_else(first_available_provider);
    let model = configured_model
        .unwrap_or_else(|| default_model_for_provider(provider).to_string());

    let generator: Box<dyn Generator> = match provider {
        Provider::Local => Box::new(LocalGenerator),
        Provider::OpenAi => Box::new(OpenAiCompatGenerator {
            api_key: require_env(&["OPENAI_API_KEY", "AI_API_KEY"], "openai")?,
            model,
            base_url: "https://api.openai.com".to_string(),
        }),
        Provider::OpenAiCompatible => {
            let base_url = env_non_empty("AI_BASE_URL").unwrap_or_else(|| {
                if model.to_ascii_lowercase().starts_with("deepseek-") {
                    "https://api.deepseek.com".to_string()
                } else {
                    "https://api.openai.com".to_string()
                }
            });
            Box::new(OpenAiCompatGenerator {
                api_key: require_env(
                    &["AI_API_KEY", "DEEPSEEK_API_KEY", "OPENAI_API_KEY"],
                    "openai-compatible",
                )?,
                model,
                base_url,
            })
        }
        Provider::Azure => Box::new(AzureOpenAiGenerator {
            api_key: require_env(&["OPENAI_KEY", "AZURE_OPENAI_API_KEY"], "azure")?,
            endpoint: require_env(&["LLM_ENDPOINT", "AZURE_OPENAI_ENDPOINT"], "azure")?,
            deployment: env_non_empty("MODEL_NAME").unwrap_or(model),
        }),
        Provider::Anthropic => Box::new(AnthropicGenerator {
            api_key: require_env(&["ANTHROPIC_API_KEY", "AI_API_KEY"], "anthropic")?,
            model,
        }),
        Provider::Gemini => Box::new(GeminiGenerator {
            api_key: require_env(&["GEMINI_API_KEY", "AI_API_KEY"], "gemini")?,
            model,
        }),
    };
    Ok(generator)
}

/// Retries the wrapped generator with a fixed delay until it succeeds and
/// counts the successful calls. There is no attempt limit.
pub struct RetryingGenerator {
    inner: Box<dyn Generator>,
    retry_delay: Duration,
    calls: usize,
}

impl RetryingGenerator {
    pub fn new(inner: Box<dyn Generator>, retry_delay: Duration) -> Self {
        Self {
            inner,
            retry_delay,
            calls: 0,
        }
    }

    pub fn label(&self) -> &str {
        self.inner.label()
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn reset_calls(&mut self) {
        self.calls = 0;
    }

    pub fn generate(&mut self, messages: &[ChatMessage], temperature: f32) -> String {
        loop {
            match self.inner.generate(messages, temperature) {
                Ok(text) => {
                    self.calls += 1;
                    return text;
                }
                Err(err) => {
                    warn::emit(
                        "W001",
                        "generate",
                        "retry",
                        self.inner.label(),
                        &format!("retrying in {}ms", self.retry_delay.as_millis()),
                        &format!("{err:#}"),
                    );
                    thread::sleep(self.retry_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual::mock::ScriptedGenerator;
    use serde_json::json;

    #[test]
    fn local_generator_echoes_first_user_line() {
        let out = LocalGenerator
            .generate(
                &[
                    ChatMessage::system("You summarize."),
                    ChatMessage::user("\n  Question 1a: compute the mean.\nMore text"),
                ],
                0.1,
            )
            .expect("local");
        assert_eq!(out, "Question 1a: compute the mean.");
    }

    #[test]
    fn chat_messages_serialize_with_lowercase_roles() {
        let value = serde_json::to_value(ChatMessage::system("x")).expect("json");
        assert_eq!(value, json!({"role": "system", "content": "x"}));
    }

    #[test]
    fn extract_chat_completions_text_reads_string_and_part_content() {
        let plain = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_chat_completions_text(&plain).as_deref(), Some("hello"));

        let parts = json!({"choices": [{"message": {"content": [{"text": "a"}, {"text": "b"}]}}]});
        assert_eq!(extract_chat_completions_text(&parts).as_deref(), Some("a\nb"));
    }

    #[test]
    fn extract_anthropic_and_gemini_text() {
        let anthropic = json!({"content": [{"type": "text", "text": "line"}]});
        assert_eq!(extract_anthropic_text(&anthropic).as_deref(), Some("line"));

        let gemini = json!({"candidates": [{"content": {"parts": [{"text": "g"}]}}]});
        assert_eq!(extract_gemini_text(&gemini).as_deref(), Some("g"));
    }

    #[test]
    fn provider_aliases_and_model_inference() {
        assert_eq!(parse_provider_alias("Claude"), Some(Provider::Anthropic));
        assert_eq!(parse_provider_alias("azure-openai"), Some(Provider::Azure));
        assert_eq!(parse_provider_alias("bogus"), None);
        assert_eq!(infer_provider_from_model("gpt-4o"), Some(Provider::OpenAi));
        assert_eq!(
            infer_provider_from_model("deepseek-chat"),
            Some(Provider::OpenAiCompatible)
        );
        assert_eq!(infer_provider_from_model("mistral"), None);
    }

    #[test]
    fn split_system_joins_system_segments() {
        let msgs = [
            ChatMessage::system("a"),
            ChatMessage::user("u"),
            ChatMessage::system("b"),
        ];
        let (system, rest) = split_system(&msgs);
        assert_eq!(system.as_deref(), Some("a\n\nb"));
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn retrying_generator_retries_failures_and_counts_successes_only() {
        let scripted = ScriptedGenerator::new(vec![Err("boom"), Err("boom"), Ok("done")]);
        let probe = scripted.clone();
        let mut llm = RetryingGenerator::new(Box::new(scripted), Duration::ZERO);

        let out = llm.generate(&[ChatMessage::user("q")], 0.1);
        assert_eq!(out, "done");
        assert_eq!(llm.calls(), 1);
        assert_eq!(probe.attempts(), 3);

        llm.reset_calls();
        assert_eq!(llm.calls(), 0);
    }
}
