// D2 rendering and validation route handlers

use std::convert::Infallible;

use hyper::{Body, Request, Response, StatusCode};
use serde_json::json;

use crate::web::diagram::{DiagramKind, DiagramService, MAX_DIAGRAM_SOURCE_LEN};
use crate::web::request_parsing::parse_json_body;
use crate::web::response_helpers::{app_error_response, json_error, json_response};
use crate::web::SharedState;
use crate::sys_info;

#[derive(serde::Deserialize)]
struct RenderRequest {
    code: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    return_svg: bool,
    #[serde(default)]
    save_to_file: bool,
}

#[derive(serde::Deserialize)]
struct ValidateRequest {
    code: String,
}

fn default_true() -> bool {
    true
}

pub async fn handle_post_render(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: RenderRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };
    if request.code.trim().is_empty() {
        return Ok(json_error(StatusCode::BAD_REQUEST, "code is required"));
    }
    if let Err(e) = DiagramService::check_source_size(&request.code) {
        return Ok(app_error_response(&e));
    }

    sys_info!("[D2 RENDER] Received render request ({} chars)", request.code.len());
    let start = std::time::Instant::now();

    let diagrams = state.diagrams.clone();
    let code = request.code.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let validation = diagrams.validate_d2(&code);
        let render = match &validation {
            Ok(()) => Some(diagrams.render_d2_svg(&code)),
            Err(_) => None,
        };
        (validation, render)
    })
    .await;

    let (validation, render) = match outcome {
        Ok(parts) => parts,
        Err(_) => {
            return Ok(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Render task failed",
            ))
        }
    };

    let mut metadata = request.metadata.unwrap_or_else(|| json!({}));
    if let Some(object) = metadata.as_object_mut() {
        object.insert(
            "render_time_seconds".to_string(),
            json!(start.elapsed().as_secs_f64()),
        );
        object.insert("code_length".to_string(), json!(request.code.len()));
    }

    let validation_json = match &validation {
        Ok(()) => json!({ "is_valid": true, "error": null }),
        Err(error) => json!({ "is_valid": false, "error": error }),
    };

    let body = match render {
        Some(Ok(svg)) => {
            let file_path = if request.save_to_file {
                match state
                    .diagrams
                    .save_diagram_svg(DiagramKind::D2, &request.code, &svg)
                {
                    Ok(filename) => Some(format!("static/d2_diagrams/{}", filename)),
                    Err(_) => None,
                }
            } else {
                None
            };
            json!({
                "success": true,
                "svg_content": if request.return_svg { Some(svg) } else { None },
                "validation": validation_json,
                "metadata": metadata,
                "error": null,
                "file_path": file_path,
            })
        }
        Some(Err(error)) => json!({
            "success": false,
            "svg_content": null,
            "validation": validation_json,
            "metadata": metadata,
            "error": error,
            "file_path": null,
        }),
        None => json!({
            "success": false,
            "svg_content": null,
            "validation": validation_json,
            "metadata": metadata,
            "error": validation.err(),
            "file_path": null,
        }),
    };

    Ok(json_response(StatusCode::OK, &body))
}

pub async fn handle_post_validate(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: ValidateRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };
    if request.code.len() > MAX_DIAGRAM_SOURCE_LEN {
        return Ok(app_error_response(
            &crate::web::error::AppError::InputTooLarge(format!(
                "Diagram source too large ({} bytes)",
                request.code.len()
            )),
        ));
    }

    let diagrams = state.diagrams.clone();
    let code = request.code.clone();
    let validation = tokio::task::spawn_blocking(move || diagrams.validate_d2(&code))
        .await
        .unwrap_or_else(|_| Err("Validation task failed".to_string()));

    let body = match validation {
        Ok(()) => json!({
            "is_valid": true,
            "error": null,
            "code_length": request.code.len(),
        }),
        Err(error) => json!({
            "is_valid": false,
            "error": error,
            "code_length": request.code.len(),
        }),
    };
    Ok(json_response(StatusCode::OK, &body))
}

pub async fn handle_get_download(
    filename: &str,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    serve_saved_svg(filename, DiagramKind::D2, state)
}

pub async fn handle_get_info(state: SharedState) -> Result<Response<Body>, Infallible> {
    let info = state.diagrams.tool_info(DiagramKind::D2);
    Ok(json_response(StatusCode::OK, &info))
}

/// Shared by the D2 and Mermaid download endpoints.
pub fn serve_saved_svg(
    filename: &str,
    kind: DiagramKind,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let path = match state.diagrams.saved_svg_path(kind, filename) {
        Ok(path) => path,
        Err(e) => return Ok(app_error_response(&e)),
    };
    match std::fs::read_to_string(&path) {
        Ok(svg) => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "image/svg+xml")
            .header(
                "content-disposition",
                format!("attachment; filename=\"{}\"", filename),
            )
            .header("access-control-allow-origin", "*")
            .body(Body::from(svg))
            .unwrap()),
        Err(_) => Ok(json_error(StatusCode::NOT_FOUND, "File not found")),
    }
}
