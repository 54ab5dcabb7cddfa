use serde::{Deserialize, Serialize};

/// One entry of a conversation history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String, // "system", "user", "assistant"
    pub content: String,
}

impl Message {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Message {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Detailed token accounting from the last provider call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Pending,
    Completed,
    Failed,
}

/// Per-question record kept alongside the conversation history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question: String,
    pub status: QuestionStatus,
    pub response: String,
    pub tokens_used: u64,
    pub processing_time: f64,
    pub model_used: String,
    pub timestamp: String,
}

/// Serializable snapshot of a conversation session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub conversation_id: String,
    pub provider: String,
    pub selected_model: String,
    pub selected_directory: String,
    pub selected_files: Vec<String>,
    pub persistent_files: Vec<String>,
    pub question_history: Vec<QuestionRecord>,
    pub conversation_history: Vec<Message>,
}

/// Result of one completed ask turn.
#[derive(Clone, Debug, Serialize)]
pub struct AskResult {
    pub response: String, // HTML for the frontend
    #[serde(rename = "rawMarkdown")]
    pub raw_markdown: String,
    pub processing_time: f64,
    pub tokens_used: u64,
    pub token_usage: TokenUsage,
    pub question_index: usize,
    pub model_used: String,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Chat endpoint payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatSettings {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<String>,
    pub settings: Option<ChatSettings>,
    #[serde(rename = "contextFiles")]
    pub context_files: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationCreateRequest {
    pub api_key: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateModelRequest {
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateApiKeyRequest {
    pub api_key: String,
}

// ---------------------------------------------------------------------------
// File endpoint payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DirectoryScanRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct FileContentRequest {
    pub files: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FileEntry {
    pub path: String,
    pub relative_path: String,
    pub size: u64,
    pub extension: String,
    pub is_special: bool,
}

// ---------------------------------------------------------------------------
// Shell endpoint payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ShellCreateRequest {
    pub working_directory: Option<String>,
    pub shell_type: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ShellSessionInfo {
    pub id: String,
    pub working_directory: String,
    pub shell_type: String,
    pub created_at: f64,
    pub last_activity: f64,
    pub is_active: bool,
    pub command_count: u64,
    pub has_running_process: bool,
}

// ---------------------------------------------------------------------------
// Tool-call surface payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResponse {
    pub fn text(text: String) -> Self {
        ToolResponse {
            content: vec![ToolContent {
                kind: "text".to_string(),
                text,
            }],
            is_error: false,
        }
    }

    pub fn error(text: String) -> Self {
        ToolResponse {
            content: vec![ToolContent {
                kind: "text".to_string(),
                text,
            }],
            is_error: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Diagram event logging payload
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DiagramEventRequest {
    pub event_type: String, // detection | render_start | render_success | render_error
    pub diagram_type: String, // mermaid | d2 | c4
    pub code_preview: Option<String>,
    pub code_length: Option<u64>,
    pub error_message: Option<String>,
    pub detection_method: Option<String>,
    pub conversation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_accepts_frontend_field_names() {
        let json = r#"{
            "message": "hi",
            "conversationId": "abc",
            "settings": {"apiKey": "k", "model": "m"},
            "contextFiles": ["a.py"]
        }"#;
        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.conversation_id.as_deref(), Some("abc"));
        assert_eq!(req.settings.as_ref().unwrap().api_key.as_deref(), Some("k"));
        assert_eq!(req.context_files.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_question_status_serializes_lowercase() {
        let s = serde_json::to_string(&QuestionStatus::Completed).unwrap();
        assert_eq!(s, "\"completed\"");
    }

    #[test]
    fn test_tool_response_wraps_text_content() {
        let resp = ToolResponse::text("{\"ok\":true}".to_string());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["isError"], false);
    }
}
