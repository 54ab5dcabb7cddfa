// Mermaid rendering and validation route handlers

use std::convert::Infallible;

use hyper::{Body, Request, Response, StatusCode};
use serde_json::json;

use crate::web::diagram::{DiagramKind, DiagramService, OutputFormat};
use crate::web::request_parsing::parse_json_body;
use crate::web::response_helpers::{app_error_response, json_error, json_response};
use crate::web::routes::d2::serve_saved_svg;
use crate::web::SharedState;
use crate::sys_info;

#[derive(serde::Deserialize)]
struct RenderRequest {
    code: String,
    #[serde(default = "default_svg")]
    output_format: String,
    #[serde(default = "default_true")]
    return_svg: bool,
    #[serde(default)]
    save_to_file: bool,
}

#[derive(serde::Deserialize)]
struct ValidateRequest {
    code: String,
    #[serde(default = "default_true")]
    auto_fix: bool,
}

fn default_svg() -> String {
    "svg".to_string()
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
    let format = match OutputFormat::parse(&request.output_format) {
        Ok(format) => format,
        Err(e) => return Ok(app_error_response(&e)),
    };
    if let Err(e) = DiagramService::check_source_size(&request.code) {
        return Ok(app_error_response(&e));
    }

    sys_info!(
        "[MERMAID RENDER] Received render request for {} ({} chars)",
        request.output_format.to_uppercase(),
        request.code.len()
    );

    let diagrams = state.diagrams.clone();
    let code = request.code.clone();
    let rendered = tokio::task::spawn_blocking(move || diagrams.render_mermaid(&code, format))
        .await
        .unwrap_or_else(|_| Err("Render task failed".to_string()));

    let body = match rendered {
        Ok(output) => {
            let is_svg = format == OutputFormat::Svg;
            let file_path = if request.save_to_file && is_svg {
                match state
                    .diagrams
                    .save_diagram_svg(DiagramKind::Mermaid, &request.code, &output)
                {
                    Ok(filename) => Some(format!("static/mermaid_diagrams/{}", filename)),
                    Err(_) => None,
                }
            } else {
                None
            };
            json!({
                "success": true,
                "svg_content": if is_svg && request.return_svg { Some(&output) } else { None },
                "png_content": if is_svg { None } else { Some(&output) },
                "validation": { "is_valid": true, "error": null },
                "metadata": {
                    "output_format": request.output_format,
                    "code_length": request.code.len(),
                },
                "error": null,
                "file_path": file_path,
            })
        }
        Err(error) => json!({
            "success": false,
            "svg_content": null,
            "png_content": null,
            "validation": { "is_valid": false, "error": error },
            "metadata": {
                "output_format": request.output_format,
                "code_length": request.code.len(),
            },
            "error": error,
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
    if let Err(e) = DiagramService::check_source_size(&request.code) {
        return Ok(app_error_response(&e));
    }

    let diagrams = state.diagrams.clone();
    let code = request.code.clone();
    let auto_fix = request.auto_fix;
    let outcome = tokio::task::spawn_blocking(move || {
        match diagrams.validate_mermaid(&code) {
            Ok(()) => (true, None, false, None),
            Err(error) => {
                if auto_fix {
                    let cleaned = mechanical_cleanup(&code);
                    if cleaned != code && diagrams.validate_mermaid(&cleaned).is_ok() {
                        return (true, None, true, Some(cleaned));
                    }
                }
                (false, Some(error), false, None)
            }
        }
    })
    .await
    .unwrap_or((false, Some("Validation task failed".to_string()), false, None));

    let (is_valid, error, auto_fixed, fixed_code) = outcome;
    let body = json!({
        "is_valid": is_valid,
        "error": error,
        "auto_fixed": auto_fixed,
        "fixed_code": fixed_code,
    });
    Ok(json_response(StatusCode::OK, &body))
}

pub async fn handle_get_download(
    filename: &str,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    serve_saved_svg(filename, DiagramKind::Mermaid, state)
}

pub async fn handle_get_info(state: SharedState) -> Result<Response<Body>, Infallible> {
    let info = state.diagrams.tool_info(DiagramKind::Mermaid);
    Ok(json_response(StatusCode::OK, &info))
}

/// Mechanical cleanups applied before re-validating: stray markdown fences
/// and trailing whitespace are the usual copy-paste artifacts.
fn mechanical_cleanup(code: &str) -> String {
    let mut lines: Vec<&str> = code.lines().collect();
    while let Some(first) = lines.first() {
        if first.trim().starts_with("```") {
            lines.remove(0);
        } else {
            break;
        }
    }
    while let Some(last) = lines.last() {
        if last.trim().starts_with("```") || last.trim().is_empty() {
            lines.pop();
        } else {
            break;
        }
    }
    lines
        .iter()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mechanical_cleanup_strips_fences() {
        let wrapped = "```mermaid\ngraph TD\n    A --> B\n```";
        assert_eq!(mechanical_cleanup(wrapped), "graph TD\n    A --> B");
    }

    #[test]
    fn test_mechanical_cleanup_trims_trailing_whitespace() {
        let code = "graph TD   \n    A --> B  ";
        assert_eq!(mechanical_cleanup(code), "graph TD\n    A --> B");
    }

    #[test]
    fn test_mechanical_cleanup_leaves_clean_code_alone() {
        let code = "graph TD\n    A --> B";
        assert_eq!(mechanical_cleanup(code), code);
    }
}
