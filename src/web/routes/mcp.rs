// Tool-call surface: REST endpoints and the tool implementations shared with
// the JSON-RPC WebSocket channel. Three tools are exposed: generate_diagram,
// render_diagram and generate_and_render.

use std::convert::Infallible;

use hyper::{Body, Request, Response, StatusCode};
use serde_json::{json, Value};

use crate::web::c4::{convert_c4_to_d2, looks_like_c4};
use crate::web::diagram::{DiagramKind, OutputFormat};
use crate::web::extract::extract_code_blocks;
use crate::web::llm::{ChatBackend, HttpChatClient};
use crate::web::models::{Message, ToolCallRequest, ToolResponse};
use crate::web::request_parsing::parse_json_body;
use crate::web::response_helpers::{json_error, json_response};
use crate::web::websocket::handle_mcp_ws;
use crate::web::websocket_utils::{
    build_websocket_upgrade_response, calculate_websocket_accept_key, get_websocket_key,
    is_websocket_upgrade,
};
use crate::web::SharedState;
use crate::{sys_error, sys_info, sys_warn};

pub const TOOL_NAMES: &[&str] = &["generate_diagram", "render_diagram", "generate_and_render"];

/// Tool descriptors with their JSON schemas, as served by `GET /mcp/tools`
/// and `tools/list`.
pub fn tool_list() -> Value {
    json!([
        {
            "name": "generate_diagram",
            "description": "Generate diagram code from a natural language prompt.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "Natural language description of the diagram"
                    },
                    "diagram_type": {
                        "type": "string",
                        "enum": ["mermaid", "d2", "c4"],
                        "description": "Type of diagram to generate"
                    }
                },
                "required": ["prompt", "diagram_type"]
            }
        },
        {
            "name": "render_diagram",
            "description": "Render diagram code to SVG or PNG format.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "The diagram source code to render"
                    },
                    "diagram_type": {
                        "type": "string",
                        "enum": ["mermaid", "d2", "c4"],
                        "description": "Type of diagram"
                    },
                    "output_format": {
                        "type": "string",
                        "enum": ["svg", "png"],
                        "description": "Output format",
                        "default": "svg"
                    }
                },
                "required": ["code", "diagram_type"]
            }
        },
        {
            "name": "generate_and_render",
            "description": "Generate and render a diagram in one step.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "Natural language description of the diagram"
                    },
                    "diagram_type": {
                        "type": "string",
                        "enum": ["mermaid", "d2", "c4"],
                        "description": "Type of diagram to generate"
                    },
                    "output_format": {
                        "type": "string",
                        "enum": ["svg", "png"],
                        "description": "Output format",
                        "default": "svg"
                    }
                },
                "required": ["prompt", "diagram_type"]
            }
        }
    ])
}

/// Dispatch a tool call by name. The returned value is the tool's JSON
/// payload; protocol framing is added by the REST/WS wrappers.
pub async fn call_tool(state: &SharedState, name: &str, arguments: &Value) -> Result<Value, String> {
    match name {
        "generate_diagram" => {
            let (prompt, kind) = generate_args(arguments)?;
            Ok(generate_diagram(state, prompt, kind).await)
        }
        "render_diagram" => {
            let code = required_str(arguments, "code")?;
            let kind = required_str(arguments, "diagram_type")?;
            let format = arguments
                .get("output_format")
                .and_then(|v| v.as_str())
                .unwrap_or("svg");
            render_diagram(state, code, kind, format).await
        }
        "generate_and_render" => {
            let (prompt, kind) = generate_args(arguments)?;
            let format = arguments
                .get("output_format")
                .and_then(|v| v.as_str())
                .unwrap_or("svg");

            let generated = generate_diagram(state, prompt, kind).await;
            let diagram_code = generated["diagram_code"]
                .as_str()
                .ok_or_else(|| "Diagram generation produced no code".to_string())?
                .to_string();

            let rendered = render_diagram(state, &diagram_code, kind, format).await?;
            Ok(json!({
                "diagram_code": diagram_code,
                "image_data": rendered["image_data"],
                "output_format": format,
                "diagram_type": kind,
                "prompt": prompt,
                "ai_generated": generated["ai_generated"],
            }))
        }
        other => Err(format!("Unknown tool: {}", other)),
    }
}

fn generate_args(arguments: &Value) -> Result<(&str, &str), String> {
    let prompt = required_str(arguments, "prompt")?;
    let kind = required_str(arguments, "diagram_type")?;
    if !["mermaid", "d2", "c4"].contains(&kind) {
        return Err(format!("Unsupported diagram type: {}", kind));
    }
    Ok((prompt, kind))
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, String> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required argument: {}", key))
}

/// Ask the model for diagram code using the per-kind agent prompt; on any
/// failure fall back to a static placeholder and report why. The repair loop
/// is deliberately not involved here.
async fn generate_diagram(state: &SharedState, prompt: &str, kind: &str) -> Value {
    sys_info!("[MCP] Generating {} diagram from prompt", kind);

    let agent_prompt = state.prompts.agent_prompt(kind);
    let api_key = state.config.api_key.clone();
    let provider = state.config.provider.clone();
    let base_url = state.config.base_url.clone();
    let model = state.config.default_model.clone();
    let question = prompt.to_string();

    let attempt = tokio::task::spawn_blocking(move || -> Result<String, String> {
        let mut client = HttpChatClient::new(&api_key, &provider, &base_url);
        let history = vec![Message::new("system", agent_prompt)];
        let response = client
            .ask(&question, &history, "", &model)
            .map_err(|e| e.to_string())?;

        let blocks = extract_code_blocks(&response, "diagram_generation");
        match blocks.into_iter().next() {
            Some(block) => Ok(block.code),
            None => Err("No code blocks found in the AI response".to_string()),
        }
    })
    .await
    .unwrap_or_else(|_| Err("Generation task failed".to_string()));

    match attempt {
        Ok(diagram_code) => {
            sys_info!("[MCP] Successfully generated {} diagram using AI", kind);
            json!({
                "diagram_code": diagram_code,
                "diagram_type": kind,
                "prompt": prompt,
                "ai_generated": true,
            })
        }
        Err(reason) => {
            sys_warn!(
                "[MCP] AI generation failed, falling back to placeholder: {}",
                reason
            );
            json!({
                "diagram_code": placeholder_diagram(kind, prompt),
                "diagram_type": kind,
                "prompt": prompt,
                "ai_generated": false,
                "fallback_reason": reason,
            })
        }
    }
}

fn placeholder_diagram(kind: &str, prompt: &str) -> String {
    match kind {
        "mermaid" => format!("flowchart TD\n    A[Start] --> B[{}]\n    B --> C[End]", prompt),
        "d2" => format!("# {}\nA -> B -> C", prompt),
        _ => format!("# {}\nSystem_1 -> System_2", prompt),
    }
}

/// Render diagram source to SVG or PNG. C4 source is converted to D2 first.
async fn render_diagram(
    state: &SharedState,
    code: &str,
    kind: &str,
    format: &str,
) -> Result<Value, String> {
    sys_info!("[MCP] Rendering {} diagram to {}", kind, format);
    let output_format = OutputFormat::parse(format).map_err(|e| e.to_string())?;

    let (effective_code, effective_kind) = match kind {
        "c4" => {
            let converted = if looks_like_c4(code) {
                convert_c4_to_d2(code)
            } else {
                code.to_string()
            };
            (converted, DiagramKind::D2)
        }
        "d2" => (code.to_string(), DiagramKind::D2),
        "mermaid" => (code.to_string(), DiagramKind::Mermaid),
        other => return Err(format!("Unsupported diagram type: {}", other)),
    };

    if effective_kind == DiagramKind::D2 && output_format == OutputFormat::Png {
        return Err("PNG output is only supported for mermaid diagrams".to_string());
    }

    let diagrams = state.diagrams.clone();
    let image_data = tokio::task::spawn_blocking(move || match effective_kind {
        DiagramKind::D2 => diagrams.render_d2_svg(&effective_code),
        DiagramKind::Mermaid => diagrams.render_mermaid(&effective_code, output_format),
    })
    .await
    .unwrap_or_else(|_| Err("Render task failed".to_string()))?;

    Ok(json!({
        "image_data": image_data,
        "output_format": format,
        "diagram_type": kind,
    }))
}

// ---------------------------------------------------------------------------
// REST wrappers
// ---------------------------------------------------------------------------

pub async fn handle_get_tools(_state: SharedState) -> Result<Response<Body>, Infallible> {
    Ok(json_response(
        StatusCode::OK,
        &json!({ "tools": tool_list() }),
    ))
}

/// `POST /mcp/tools/{name}`: the body is the tool's argument object.
pub async fn handle_post_tool(
    tool_name: &str,
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    if !TOOL_NAMES.contains(&tool_name) {
        return Ok(json_error(StatusCode::NOT_FOUND, "Unknown tool"));
    }
    let arguments: Value = match parse_json_body(req.into_body()).await {
        Ok(arguments) => arguments,
        Err(error_response) => return Ok(error_response),
    };

    let response = match call_tool(&state, tool_name, &arguments).await {
        Ok(result) => ToolResponse::text(pretty(&result)),
        Err(error) => {
            sys_error!("[MCP] Tool {} failed: {}", tool_name, error);
            ToolResponse::error(pretty(&json!({ "error": error, "tool": tool_name })))
        }
    };
    Ok(json_response(StatusCode::OK, &response))
}

/// `POST /mcp/call_tool`: generic `{name, arguments}` invocation.
pub async fn handle_post_call_tool(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: ToolCallRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };

    let response = match call_tool(&state, &request.name, &request.arguments).await {
        Ok(result) => ToolResponse::text(pretty(&result)),
        Err(error) => ToolResponse::error(pretty(&json!({ "error": error, "tool": request.name }))),
    };
    Ok(json_response(StatusCode::OK, &response))
}

/// Upgrade `/mcp/ws` to the JSON-RPC 2.0 channel.
pub async fn handle_ws_upgrade(
    mut req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    if !is_websocket_upgrade(&req) {
        return Ok(json_error(
            StatusCode::BAD_REQUEST,
            "WebSocket upgrade required",
        ));
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
    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                sys_info!("[MCP_WS] Connection established");
                if let Err(e) = handle_mcp_ws(upgraded, state).await {
                    sys_error!("[MCP_WS] Error: {}", e);
                }
            }
            Err(e) => {
                sys_error!("[MCP_WS] Upgrade failed: {}", e);
            }
        }
    });

    Ok(build_websocket_upgrade_response(&accept_key))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
