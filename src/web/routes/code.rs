// Code block extraction route handler

use hyper::{Body, Request, Response, StatusCode};
use std::convert::Infallible;

use crate::web::extract::extract_code_blocks;
use crate::web::request_parsing::parse_json_body;
use crate::web::response_helpers::json_response;

#[derive(serde::Deserialize)]
struct ExtractRequest {
    #[serde(rename = "messageId")]
    message_id: String,
    #[serde(default)]
    content: String,
}

pub async fn handle_post_extract(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let request: ExtractRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };

    let blocks = extract_code_blocks(&request.content, &request.message_id);
    let body = serde_json::json!({
        "messageId": request.message_id,
        "count": blocks.len(),
        "code_blocks": blocks,
    });
    Ok(json_response(StatusCode::OK, &body))
}
