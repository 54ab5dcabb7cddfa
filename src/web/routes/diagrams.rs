// Diagram event logging route handler. The frontend reports detection and
// render outcomes here so they land in the backend logs.

use hyper::{Body, Request, Response, StatusCode};
use std::convert::Infallible;

use crate::web::models::DiagramEventRequest;
use crate::web::request_parsing::parse_json_body;
use crate::web::response_helpers::{json_error, json_response};
use crate::{log_error, log_info};

const EVENT_TYPES: &[&str] = &["detection", "render_start", "render_success", "render_error"];
const DIAGRAM_TYPES: &[&str] = &["mermaid", "d2", "c4"];

pub async fn handle_post_event(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let event: DiagramEventRequest = match parse_json_body(req.into_body()).await {
        Ok(event) => event,
        Err(error_response) => return Ok(error_response),
    };

    if !EVENT_TYPES.contains(&event.event_type.as_str()) {
        return Ok(json_error(StatusCode::BAD_REQUEST, "Unknown event_type"));
    }
    if !DIAGRAM_TYPES.contains(&event.diagram_type.as_str()) {
        return Ok(json_error(StatusCode::BAD_REQUEST, "Unknown diagram_type"));
    }

    let conversation_id = event
        .conversation_id
        .clone()
        .unwrap_or_else(|| "system".to_string());
    let kind = event.diagram_type.to_uppercase();

    match event.event_type.as_str() {
        "detection" => {
            log_info!(
                &conversation_id,
                "Diagram detected: {} (method: {}, length: {})",
                kind,
                event.detection_method.as_deref().unwrap_or("unknown"),
                event.code_length.unwrap_or(0)
            );
        }
        "render_start" => {
            log_info!(&conversation_id, "Rendering {} diagram...", kind);
        }
        "render_success" => {
            log_info!(
                &conversation_id,
                "Successfully rendered {} diagram ({} chars)",
                kind,
                event.code_length.unwrap_or(0)
            );
        }
        _ => {
            log_error!(
                &conversation_id,
                "Error rendering {} diagram: {}",
                kind,
                event.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }

    let body = serde_json::json!({
        "status": "logged",
        "event_type": event.event_type,
        "diagram_type": event.diagram_type,
    });
    Ok(json_response(StatusCode::OK, &body))
}
