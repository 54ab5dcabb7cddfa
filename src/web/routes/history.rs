// Conversation history file route handlers

use std::convert::Infallible;

use hyper::{Body, Response, StatusCode};
use serde_json::json;

use crate::web::response_helpers::{app_error_response, json_response};
use crate::web::SharedState;

pub async fn handle_get_list(state: SharedState) -> Result<Response<Body>, Infallible> {
    let body = json!({ "histories": state.history.list() });
    Ok(json_response(StatusCode::OK, &body))
}

pub async fn handle_get_one(
    conversation_id: &str,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    match state.history.load(conversation_id) {
        Ok(data) => Ok(json_response(StatusCode::OK, &data)),
        Err(e) => Ok(app_error_response(&e)),
    }
}

pub async fn handle_delete(
    conversation_id: &str,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    match state.history.delete(conversation_id) {
        Ok(()) => Ok(json_response(
            StatusCode::OK,
            &json!({ "success": true, "conversationId": conversation_id }),
        )),
        Err(e) => Ok(app_error_response(&e)),
    }
}
