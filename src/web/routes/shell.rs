// Shell session REST handlers and the shell WebSocket upgrade

use std::convert::Infallible;

use hyper::{Body, Request, Response, StatusCode};
use serde_json::json;

use crate::web::models::ShellCreateRequest;
use crate::web::request_parsing::parse_json_body;
use crate::web::response_helpers::{json_error, json_response};
use crate::web::shell::{is_command_safe, ALLOWED_COMMANDS, BLOCKED_COMMANDS, DANGEROUS_PATTERNS};
use crate::web::websocket::handle_shell_ws;
use crate::web::websocket_utils::{
    build_websocket_upgrade_response, calculate_websocket_accept_key, get_websocket_key,
    is_websocket_upgrade,
};
use crate::web::SharedState;
use crate::{sys_error, sys_info};

pub async fn handle_post_create(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    // An empty body means all defaults
    let body_bytes = hyper::body::to_bytes(req.into_body())
        .await
        .unwrap_or_default();
    let request: ShellCreateRequest = if body_bytes.is_empty() {
        ShellCreateRequest::default()
    } else {
        match serde_json::from_slice(&body_bytes) {
            Ok(request) => request,
            Err(_) => return Ok(json_error(StatusCode::BAD_REQUEST, "Invalid JSON format")),
        }
    };

    let info = state.shell.create_session(
        request.working_directory.as_deref(),
        request.shell_type.as_deref().unwrap_or("auto"),
    );

    let body = json!({
        "success": true,
        "data": {
            "session_id": info.id,
            "session_info": info,
        },
    });
    Ok(json_response(StatusCode::OK, &body))
}

pub async fn handle_get_list(state: SharedState) -> Result<Response<Body>, Infallible> {
    let body = json!({
        "success": true,
        "data": state.shell.list_sessions(),
    });
    Ok(json_response(StatusCode::OK, &body))
}

pub async fn handle_get_info(
    session_id: &str,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    match state.shell.session_info(session_id) {
        Some(info) => Ok(json_response(
            StatusCode::OK,
            &json!({ "success": true, "data": info }),
        )),
        None => Ok(json_error(StatusCode::NOT_FOUND, "Session not found")),
    }
}

pub async fn handle_delete(
    session_id: &str,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    if state.shell.close_session(session_id) {
        Ok(json_response(
            StatusCode::OK,
            &json!({ "success": true, "message": "Session closed successfully" }),
        ))
    } else {
        Ok(json_error(StatusCode::NOT_FOUND, "Session not found"))
    }
}

pub async fn handle_get_security_info() -> Result<Response<Body>, Infallible> {
    let body = json!({
        "success": true,
        "data": {
            "allowed_commands": ALLOWED_COMMANDS,
            "blocked_commands": BLOCKED_COMMANDS,
            "dangerous_patterns": DANGEROUS_PATTERNS,
        },
    });
    Ok(json_response(StatusCode::OK, &body))
}

#[derive(serde::Deserialize)]
struct ValidateCommandRequest {
    command: String,
}

pub async fn handle_post_validate_command(
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let request: ValidateCommandRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };

    let (is_safe, reason) = match is_command_safe(&request.command) {
        Ok(()) => (true, "Command approved".to_string()),
        Err(reason) => (false, reason),
    };

    let body = json!({
        "success": true,
        "data": {
            "command": request.command,
            "is_safe": is_safe,
            "reason": reason,
        },
    });
    Ok(json_response(StatusCode::OK, &body))
}

/// Upgrade `/shell/ws/{id}` to a WebSocket and hand the connection to the
/// shell streaming loop.
pub async fn handle_ws_upgrade(
    mut req: Request<Body>,
    session_id: String,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    if !is_websocket_upgrade(&req) {
        return Ok(json_error(
            StatusCode::BAD_REQUEST,
            "WebSocket upgrade required",
        ));
    }
    if state.shell.session_info(&session_id).is_none() {
        return Ok(json_error(StatusCode::NOT_FOUND, "Session not found"));
    }
    let key = match get_websocket_key(&req) {
        Some(key) => key,
        None => {
            return Ok(json_error(
                StatusCode::BAD_REQUEST,
                "Missing sec-websocket-key",
            ))
        }
    };

    let accept_key = calculate_websocket_accept_key(&key);
    let shell = state.shell.clone();

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                sys_info!("[SHELL_WS] Connection upgraded for session {}", session_id);
                if let Err(e) = handle_shell_ws(upgraded, session_id.clone(), shell).await {
                    sys_error!("[SHELL_WS] Error in session {}: {}", session_id, e);
                }
            }
            Err(e) => {
                sys_error!("[SHELL_WS] Upgrade failed: {}", e);
            }
        }
    });

    Ok(build_websocket_upgrade_response(&accept_key))
}
