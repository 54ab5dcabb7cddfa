// Provider-agnostic LLM gateway. Sessions hold a boxed capability; the HTTP
// implementation talks to OpenAI-compatible chat-completions endpoints.

use serde_json::json;

use crate::sys_debug;
use crate::web::error::AppError;
use crate::web::models::{Message, TokenUsage};

/// The ask capability a conversation session holds. Providers differ only in
/// how they implement this; switching provider never touches history.
pub trait ChatBackend: Send {
    /// Send a question with prior history and optional codebase context,
    /// returning the assistant text. `history` excludes the current user
    /// message; the system framing is provider-specific.
    fn ask(
        &mut self,
        question: &str,
        history: &[Message],
        codebase_content: &str,
        model: &str,
    ) -> Result<String, AppError>;

    fn set_api_key(&mut self, api_key: &str);
    fn set_provider(&mut self, provider: &str);
    fn has_api_key(&self) -> bool;
    /// Token accounting from the most recent call; zeros when the provider
    /// did not report usage.
    fn last_usage(&self) -> TokenUsage;
}

pub struct HttpChatClient {
    provider: String,
    api_key: String,
    base_url: String,
    last_usage: TokenUsage,
    agent: ureq::Agent,
}

impl HttpChatClient {
    pub fn new(api_key: &str, provider: &str, base_url: &str) -> Self {
        HttpChatClient {
            provider: provider.to_string(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            last_usage: TokenUsage::default(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    fn endpoint(&self) -> Result<String, AppError> {
        match self.provider.as_str() {
            "openrouter" => Ok("https://openrouter.ai/api/v1/chat/completions".to_string()),
            "openai" => Ok("https://api.openai.com/v1/chat/completions".to_string()),
            "custom" => {
                if self.base_url.is_empty() {
                    Err(AppError::Config(
                        "Custom provider requires BASE_URL".to_string(),
                    ))
                } else {
                    Ok(format!("{}/chat/completions", self.base_url))
                }
            }
            other => Err(AppError::Config(format!("Unknown provider: {}", other))),
        }
    }

    fn build_messages(
        question: &str,
        history: &[Message],
        codebase_content: &str,
    ) -> Vec<serde_json::Value> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !codebase_content.is_empty() {
            messages.push(json!({
                "role": "system",
                "content": format!(
                    "The user has provided the following codebase:\n\n{}",
                    codebase_content
                ),
            }));
        }
        for message in history {
            messages.push(json!({ "role": message.role, "content": message.content }));
        }
        messages.push(json!({ "role": "user", "content": question }));
        messages
    }

    fn parse_usage(payload: &serde_json::Value) -> TokenUsage {
        let usage = &payload["usage"];
        TokenUsage {
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            cached_tokens: usage["prompt_tokens_details"]["cached_tokens"]
                .as_u64()
                .unwrap_or(0),
        }
    }
}

impl ChatBackend for HttpChatClient {
    fn ask(
        &mut self,
        question: &str,
        history: &[Message],
        codebase_content: &str,
        model: &str,
    ) -> Result<String, AppError> {
        if self.api_key.trim().is_empty() {
            return Err(AppError::Config("API key is not configured".to_string()));
        }

        let url = self.endpoint()?;
        let body = json!({
            "model": model,
            "messages": Self::build_messages(question, history, codebase_content),
        });

        sys_debug!(
            "[LLM] POST {} model={} history_len={} context_len={}",
            url,
            model,
            history.len(),
            codebase_content.len()
        );

        let response = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("Content-Type", "application/json")
            .send_string(&body.to_string());

        let response = match response {
            Ok(r) => r,
            Err(ureq::Error::Status(code, r)) => {
                let detail = r.into_string().unwrap_or_default();
                return Err(AppError::Upstream(format!(
                    "Provider returned HTTP {}: {}",
                    code,
                    detail.chars().take(500).collect::<String>()
                )));
            }
            Err(e) => {
                return Err(AppError::Upstream(format!("Provider request failed: {}", e)));
            }
        };

        let text = response
            .into_string()
            .map_err(|e| AppError::Upstream(format!("Failed to read provider response: {}", e)))?;
        let payload: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| AppError::Upstream(format!("Malformed provider response: {}", e)))?;

        self.last_usage = Self::parse_usage(&payload);

        match payload["choices"][0]["message"]["content"].as_str() {
            Some(content) => Ok(content.to_string()),
            None => Err(AppError::Upstream(
                "Provider response missing message content".to_string(),
            )),
        }
    }

    fn set_api_key(&mut self, api_key: &str) {
        self.api_key = api_key.to_string();
    }

    fn set_provider(&mut self, provider: &str) {
        self.provider = provider.to_string();
    }

    fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn last_usage(&self) -> TokenUsage {
        self.last_usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_is_config_error() {
        let mut client = HttpChatClient::new("", "openrouter", "");
        let err = client.ask("hi", &[], "", "model-x").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_custom_provider_requires_base_url() {
        let client = HttpChatClient::new("k", "custom", "");
        assert!(matches!(client.endpoint(), Err(AppError::Config(_))));

        let client = HttpChatClient::new("k", "custom", "http://localhost:9999/v1/");
        assert_eq!(
            client.endpoint().unwrap(),
            "http://localhost:9999/v1/chat/completions"
        );
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let client = HttpChatClient::new("k", "sparrow", "");
        assert!(matches!(client.endpoint(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_build_messages_orders_context_history_question() {
        let history = vec![
            Message::new("user", "first"),
            Message::new("assistant", "reply"),
        ];
        let messages = HttpChatClient::build_messages("second", &history, "code here");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert!(messages[0]["content"]
            .as_str()
            .unwrap()
            .contains("code here"));
        assert_eq!(messages[1]["content"], "first");
        assert_eq!(messages[3]["content"], "second");
    }

    #[test]
    fn test_build_messages_without_context_has_no_system_entry() {
        let messages = HttpChatClient::build_messages("q", &[], "");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_parse_usage_defaults_to_zero() {
        let usage = HttpChatClient::parse_usage(&serde_json::json!({}));
        assert_eq!(usage.total_tokens, 0);
        assert_eq!(usage.cached_tokens, 0);
    }

    #[test]
    fn test_parse_usage_reads_detailed_counts() {
        let payload = serde_json::json!({
            "usage": {
                "total_tokens": 120,
                "prompt_tokens": 100,
                "completion_tokens": 20,
                "prompt_tokens_details": { "cached_tokens": 64 }
            }
        });
        let usage = HttpChatClient::parse_usage(&payload);
        assert_eq!(usage.total_tokens, 120);
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 20);
        assert_eq!(usage.cached_tokens, 64);
    }
}
