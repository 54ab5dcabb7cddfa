// Agent prompt listing route handler

use hyper::{Body, Response, StatusCode};
use std::convert::Infallible;

use crate::web::response_helpers::json_response;
use crate::web::SharedState;

pub async fn handle_get_list(state: SharedState) -> Result<Response<Body>, Infallible> {
    let body = serde_json::json!({ "agent_prompts": state.prompts.list_agent_prompts() });
    Ok(json_response(StatusCode::OK, &body))
}
