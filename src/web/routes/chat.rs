// Chat and conversation management route handlers

use std::convert::Infallible;

use hyper::{Body, Request, Response, StatusCode};
use serde_json::json;

use crate::web::error::AppError;
use crate::web::models::{
    ChatRequest, ConversationCreateRequest, SessionSummary, UpdateApiKeyRequest,
    UpdateModelRequest,
};
use crate::web::request_parsing::parse_json_body;
use crate::web::response_helpers::{app_error_response, json_error, json_response};
use crate::web::SharedState;
use crate::{log_error, sys_info};

/// Primary chat endpoint used by the frontend. Creates or reuses a
/// conversation session, runs the ask and persists the history snapshot.
pub async fn handle_post_chat(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: ChatRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };

    if request.message.trim().is_empty() {
        return Ok(json_error(StatusCode::BAD_REQUEST, "message is required"));
    }

    let settings = request.settings.as_ref();
    let api_key = settings
        .and_then(|s| s.api_key.clone())
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| state.config.api_key.clone());
    let provider = settings
        .and_then(|s| s.provider.clone())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| state.config.provider.clone());
    let model = settings
        .and_then(|s| s.model.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| state.config.default_model.clone());

    if api_key.is_empty() {
        return Ok(json_error(StatusCode::BAD_REQUEST, "API key is required"));
    }

    // Get or create the session for the supplied conversation id
    let session = match request
        .conversation_id
        .as_deref()
        .and_then(|id| state.registry.get_session(id).ok())
    {
        Some(session) => session,
        None => state.registry.create_session(
            &api_key,
            &provider,
            state.config.models.clone(),
            Some(&model),
            request.conversation_id.as_deref(),
        ),
    };

    let message = request.message.clone();
    let context_files = request.context_files.clone();
    let session_for_ask = session.clone();

    // The ask holds the session lock for its full duration, serialising
    // concurrent asks on the same conversation.
    let ask_outcome = tokio::task::spawn_blocking(move || {
        let mut guard = session_for_ask.lock().unwrap();
        guard.set_api_key(&api_key);
        guard.set_provider(&provider);
        guard.set_model(&model);
        if let Some(files) = context_files {
            if !files.is_empty() {
                guard.update_files(&files, true);
            }
        }
        let result = guard.ask_question(&message);
        (result, guard.id.clone(), guard.get_summary())
    })
    .await;

    let (result, session_id, summary) = match ask_outcome {
        Ok(parts) => parts,
        Err(_) => {
            return Ok(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Chat task failed",
            ))
        }
    };

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            log_error!(&session_id, "Chat request failed: {}", e);
            return Ok(app_error_response(&e));
        }
    };

    // Persist the snapshot after every completed turn
    let metadata = json!({
        "provider": summary.provider,
        "model": summary.selected_model,
    });
    if let Err(e) = state
        .history
        .save(&session_id, history_snapshot(&summary), Some(metadata))
    {
        log_error!(&session_id, "Failed to persist history: {}", e);
    }

    let assistant_message = json!({
        "id": format!("msg-{}-{}", session_id, result.question_index),
        "role": "assistant",
        "content": result.response,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "metadata": {
            "rawMarkdown": result.raw_markdown,
            "tokens": result.tokens_used,
            "processing_time": result.processing_time,
            "question_index": result.question_index,
        },
    });

    let body = json!({
        "success": true,
        "data": {
            "message": assistant_message,
            "usage": {
                "completionTokens": result.token_usage.output_tokens,
                "promptTokens": result.token_usage.input_tokens,
                "totalTokens": result.token_usage.total_tokens,
            },
            "conversationId": session_id,
        },
    });
    Ok(json_response(StatusCode::OK, &body))
}

pub async fn handle_post_conversations(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: ConversationCreateRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };

    let api_key = request
        .api_key
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| state.config.api_key.clone());
    if api_key.is_empty() {
        return Ok(json_error(StatusCode::BAD_REQUEST, "API key is required"));
    }
    let provider = request
        .provider
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| state.config.provider.clone());
    let model = request
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| state.config.default_model.clone());

    let session = state.registry.create_session(
        &api_key,
        &provider,
        state.config.models.clone(),
        Some(&model),
        None,
    );
    let guard = session.lock().unwrap();
    sys_info!("[CHAT] Created conversation: {}", guard.id);
    Ok(json_response(StatusCode::OK, &conversation_state(&guard)))
}

pub async fn handle_get_conversations(state: SharedState) -> Result<Response<Body>, Infallible> {
    let body = json!({ "conversations": state.registry.list_ids() });
    Ok(json_response(StatusCode::OK, &body))
}

pub async fn handle_get_summary(
    conversation_id: &str,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    match state.registry.get_session(conversation_id) {
        Ok(session) => {
            let guard = session.lock().unwrap();
            Ok(json_response(StatusCode::OK, &guard.get_summary()))
        }
        Err(e) => Ok(app_error_response(&e)),
    }
}

pub async fn handle_put_model(
    conversation_id: &str,
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: UpdateModelRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };
    match state.registry.get_session(conversation_id) {
        Ok(session) => {
            let mut guard = session.lock().unwrap();
            guard.set_model(&request.model);
            Ok(json_response(StatusCode::OK, &conversation_state(&guard)))
        }
        Err(e) => Ok(app_error_response(&e)),
    }
}

pub async fn handle_put_api_key(
    conversation_id: &str,
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: UpdateApiKeyRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };
    match state.registry.get_session(conversation_id) {
        Ok(session) => {
            let mut guard = session.lock().unwrap();
            guard.set_api_key(&request.api_key);
            Ok(json_response(StatusCode::OK, &conversation_state(&guard)))
        }
        Err(e) => Ok(app_error_response(&e)),
    }
}

#[derive(serde::Deserialize)]
struct SetDirectoryRequest {
    path: String,
}

/// Set the workspace directory for a conversation; returns the initial scan.
pub async fn handle_post_directory(
    conversation_id: &str,
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: SetDirectoryRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };
    let session = match state.registry.get_session(conversation_id) {
        Ok(session) => session,
        Err(e) => return Ok(app_error_response(&e)),
    };

    let path = std::path::PathBuf::from(&request.path);
    let outcome = tokio::task::spawn_blocking(move || {
        let mut guard = session.lock().unwrap();
        let files = guard.set_workspace(&path)?;
        Ok::<_, AppError>((files, guard.get_summary()))
    })
    .await;

    match outcome {
        Ok(Ok((files, summary))) => {
            let entries: Vec<serde_json::Value> = files
                .iter()
                .map(|f| {
                    json!({
                        "path": f.path.display().to_string(),
                        "relative_path": f.relative_path,
                        "size": f.size,
                    })
                })
                .collect();
            let body = json!({
                "directory": request.path,
                "files": entries,
                "message": "Directory scanned successfully",
                "summary": summary,
            });
            Ok(json_response(StatusCode::OK, &body))
        }
        Ok(Err(e)) => Ok(app_error_response(&e)),
        Err(_) => Ok(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Scan task failed",
        )),
    }
}

#[derive(serde::Deserialize)]
struct UpdateFilesRequest {
    files: Vec<String>,
    #[serde(default)]
    make_persistent: bool,
}

/// Replace the selected file set for a conversation.
pub async fn handle_post_files(
    conversation_id: &str,
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: UpdateFilesRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };
    match state.registry.get_session(conversation_id) {
        Ok(session) => {
            let mut guard = session.lock().unwrap();
            guard.update_files(&request.files, request.make_persistent);
            Ok(json_response(StatusCode::OK, &guard.get_summary()))
        }
        Err(e) => Ok(app_error_response(&e)),
    }
}

/// Truncate history and the question log; configuration is preserved.
pub async fn handle_post_clear(
    conversation_id: &str,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    match state.registry.get_session(conversation_id) {
        Ok(session) => {
            let mut guard = session.lock().unwrap();
            guard.clear_conversation();
            Ok(json_response(StatusCode::OK, &guard.get_summary()))
        }
        Err(e) => Ok(app_error_response(&e)),
    }
}

pub async fn handle_delete_conversation(
    conversation_id: &str,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    if state.registry.drop_session(conversation_id) {
        Ok(json_response(
            StatusCode::OK,
            &json!({ "success": true, "conversationId": conversation_id }),
        ))
    } else {
        Ok(app_error_response(&AppError::NotFound(format!(
            "Conversation {} not found",
            conversation_id
        ))))
    }
}

fn conversation_state(session: &crate::web::session::Session) -> serde_json::Value {
    let summary = session.get_summary();
    json!({
        "conversationId": session.id,
        "provider": session.provider,
        "model": summary.selected_model,
        "availableModels": session.available_models,
        "summary": summary,
    })
}

/// History-file snapshot: every message plus per-turn metadata for assistant
/// entries, matched through the question log.
fn history_snapshot(summary: &SessionSummary) -> Vec<serde_json::Value> {
    let mut completed = summary
        .question_history
        .iter()
        .filter(|q| q.status == crate::web::models::QuestionStatus::Completed);

    summary
        .conversation_history
        .iter()
        .map(|message| {
            let mut entry = json!({
                "role": message.role,
                "content": message.content,
            });
            if message.role == "assistant" {
                if let Some(record) = completed.next() {
                    entry["metadata"] = json!({
                        "tokens": record.tokens_used,
                        "processing_time": record.processing_time,
                        "model_used": record.model_used,
                        "timestamp": record.timestamp,
                    });
                }
            }
            entry
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::models::{Message, QuestionRecord, QuestionStatus};

    #[test]
    fn test_history_snapshot_attaches_turn_metadata() {
        let summary = SessionSummary {
            conversation_id: "c".into(),
            provider: "openrouter".into(),
            selected_model: "m".into(),
            selected_directory: String::new(),
            selected_files: vec![],
            persistent_files: vec![],
            question_history: vec![QuestionRecord {
                question: "q".into(),
                status: QuestionStatus::Completed,
                response: "a".into(),
                tokens_used: 7,
                processing_time: 0.5,
                model_used: "m".into(),
                timestamp: "t".into(),
            }],
            conversation_history: vec![
                Message::new("system", "s"),
                Message::new("user", "q"),
                Message::new("assistant", "a"),
            ],
        };

        let snapshot = history_snapshot(&summary);
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot[0].get("metadata").is_none());
        assert_eq!(snapshot[2]["metadata"]["tokens"], 7);
    }
}
