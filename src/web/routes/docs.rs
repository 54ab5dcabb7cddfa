// Documentation generation route handlers

use std::convert::Infallible;

use hyper::{Body, Request, Response, StatusCode};
use serde_json::json;

use crate::web::docs::{template_list, DocRequest, EXPORT_FORMATS};
use crate::web::request_parsing::parse_json_body;
use crate::web::response_helpers::{app_error_response, json_error, json_response};
use crate::web::SharedState;
use crate::sys_info;

pub async fn handle_post_generate(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: DocRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };
    generate_and_respond(request, state).await
}

/// `POST /docs/api-docs`: fixed API-reference settings over the given files.
pub async fn handle_post_api_docs(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let body: serde_json::Value = match parse_json_body(req.into_body()).await {
        Ok(body) => body,
        Err(error_response) => return Ok(error_response),
    };
    let request = DocRequest {
        file_paths: string_list(&body, "file_paths"),
        documentation_type: "api".to_string(),
        output_format: body
            .get("output_format")
            .and_then(|v| v.as_str())
            .unwrap_or("markdown")
            .to_string(),
        template: Some("api_documentation".to_string()),
        include_examples: true,
        include_diagrams: true,
        target_audience: body
            .get("target_audience")
            .and_then(|v| v.as_str())
            .unwrap_or("developers")
            .to_string(),
    };
    generate_and_respond(request, state).await
}

/// `POST /docs/readme`: fixed README settings over the given files.
pub async fn handle_post_readme(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let body: serde_json::Value = match parse_json_body(req.into_body()).await {
        Ok(body) => body,
        Err(error_response) => return Ok(error_response),
    };
    let request = DocRequest {
        file_paths: string_list(&body, "file_paths"),
        documentation_type: "readme".to_string(),
        output_format: body
            .get("output_format")
            .and_then(|v| v.as_str())
            .unwrap_or("markdown")
            .to_string(),
        template: Some("readme_template".to_string()),
        include_examples: true,
        include_diagrams: false,
        target_audience: "mixed".to_string(),
    };
    generate_and_respond(request, state).await
}

async fn generate_and_respond(
    request: DocRequest,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let docs = state.docs.clone();
    let outcome = tokio::task::spawn_blocking(move || docs.generate(&request)).await;
    match outcome {
        Ok(Ok(result)) => Ok(json_response(StatusCode::OK, &result)),
        Ok(Err(e)) => Ok(app_error_response(&e)),
        Err(_) => Ok(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Documentation task failed",
        )),
    }
}

pub async fn handle_get_templates() -> Result<Response<Body>, Infallible> {
    let templates = template_list();
    let body = json!({
        "templates": templates,
        "count": templates.len(),
    });
    Ok(json_response(StatusCode::OK, &body))
}

#[derive(serde::Deserialize)]
struct ExportRequest {
    content: String,
    export_format: String,
    #[serde(default)]
    filename: Option<String>,
}

pub async fn handle_post_export(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: ExportRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };

    sys_info!("[DOCS] Exporting documentation to {}", request.export_format);
    let filename = request
        .filename
        .clone()
        .unwrap_or_else(|| format!("documentation.{}", export_extension(&request.export_format)));

    match state
        .docs
        .export(&request.content, &request.export_format, &filename)
    {
        Ok((content, content_type)) => {
            let body = json!({
                "content": content,
                "format": request.export_format,
                "filename": filename,
                "content_type": content_type,
            });
            Ok(json_response(StatusCode::OK, &body))
        }
        Err(e) => Ok(app_error_response(&e)),
    }
}

pub async fn handle_get_export_formats() -> Result<Response<Body>, Infallible> {
    let body = json!({
        "formats": EXPORT_FORMATS,
        "options": {
            "markdown": { "content_type": "text/markdown" },
            "html": { "content_type": "text/html", "styled": true },
        },
    });
    Ok(json_response(StatusCode::OK, &body))
}

#[derive(serde::Deserialize)]
struct PackageRequest {
    file_paths: Vec<String>,
    #[serde(default = "default_doc_type")]
    documentation_type: String,
    #[serde(default = "default_true")]
    include_source_files: bool,
}

fn default_doc_type() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

/// `POST /docs/package`: generate documentation and return a ZIP archive of
/// the content, metadata, file listing and (optionally) the sources.
pub async fn handle_post_package(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: PackageRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };

    let docs = state.docs.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let doc_request = DocRequest {
            file_paths: request.file_paths.clone(),
            documentation_type: request.documentation_type.clone(),
            output_format: "markdown".to_string(),
            template: None,
            include_examples: true,
            include_diagrams: true,
            target_audience: "developers".to_string(),
        };
        let result = docs.generate(&doc_request)?;
        let bytes = docs.create_package(&result, &request.file_paths, request.include_source_files)?;
        Ok::<_, crate::web::error::AppError>((result.id, bytes))
    })
    .await;

    match outcome {
        Ok(Ok((id, bytes))) => {
            let filename = format!("documentation_{}.zip", id.chars().take(8).collect::<String>());
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/zip")
                .header(
                    "content-disposition",
                    format!("attachment; filename=\"{}\"", filename),
                )
                .header("access-control-allow-origin", "*")
                .body(Body::from(bytes))
                .unwrap())
        }
        Ok(Err(e)) => Ok(app_error_response(&e)),
        Err(_) => Ok(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Packaging task failed",
        )),
    }
}

fn string_list(body: &serde_json::Value, key: &str) -> Vec<String> {
    body.get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn export_extension(format: &str) -> &str {
    match format {
        "html" => "html",
        _ => "md",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_list_extraction() {
        let body = json!({ "file_paths": ["a.rs", 42, "b.rs"] });
        assert_eq!(string_list(&body, "file_paths"), vec!["a.rs", "b.rs"]);
        assert!(string_list(&body, "missing").is_empty());
    }

    #[test]
    fn test_export_extension() {
        assert_eq!(export_extension("html"), "html");
        assert_eq!(export_extension("markdown"), "md");
    }
}
