// Web server for the AI code-analysis and diagram-generation backend

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use codeatlas::sys_info;
use codeatlas::web::config::AppConfig;
use codeatlas::web::response_helpers::cors_preflight;
use codeatlas::web::{routes, AppState, SharedState};

async fn handle_request(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let raw_path = req.uri().path().to_string();
    // Normalise the /api/v1 prefix so both spellings resolve
    let path = raw_path
        .strip_prefix("/api/v1")
        .unwrap_or(&raw_path)
        .to_string();
    let path = if path.is_empty() { "/".to_string() } else { path };

    let response = match (&method, path.as_str()) {
        // Health check
        (&Method::GET, "/health") => routes::health::handle().await?,

        // Chat and conversation management
        (&Method::POST, "/chat") => routes::chat::handle_post_chat(req, state).await?,

        (&Method::POST, "/conversations") => {
            routes::chat::handle_post_conversations(req, state).await?
        }

        (&Method::GET, "/conversations") => {
            routes::chat::handle_get_conversations(state).await?
        }

        (&Method::GET, p) if p.starts_with("/conversations/") && p.ends_with("/summary") => {
            let id = p
                .trim_start_matches("/conversations/")
                .trim_end_matches("/summary");
            routes::chat::handle_get_summary(id, state).await?
        }

        (&Method::PUT, p) if p.starts_with("/conversations/") && p.ends_with("/model") => {
            let id = p
                .trim_start_matches("/conversations/")
                .trim_end_matches("/model")
                .to_string();
            routes::chat::handle_put_model(&id, req, state).await?
        }

        (&Method::PUT, p) if p.starts_with("/conversations/") && p.ends_with("/api-key") => {
            let id = p
                .trim_start_matches("/conversations/")
                .trim_end_matches("/api-key")
                .to_string();
            routes::chat::handle_put_api_key(&id, req, state).await?
        }

        (&Method::POST, p) if p.starts_with("/conversations/") && p.ends_with("/directory") => {
            let id = p
                .trim_start_matches("/conversations/")
                .trim_end_matches("/directory")
                .to_string();
            routes::chat::handle_post_directory(&id, req, state).await?
        }

        (&Method::POST, p) if p.starts_with("/conversations/") && p.ends_with("/files") => {
            let id = p
                .trim_start_matches("/conversations/")
                .trim_end_matches("/files")
                .to_string();
            routes::chat::handle_post_files(&id, req, state).await?
        }

        (&Method::POST, p) if p.starts_with("/conversations/") && p.ends_with("/clear") => {
            let id = p
                .trim_start_matches("/conversations/")
                .trim_end_matches("/clear");
            routes::chat::handle_post_clear(id, state).await?
        }

        (&Method::DELETE, p) if p.starts_with("/conversations/") => {
            let id = p.trim_start_matches("/conversations/");
            routes::chat::handle_delete_conversation(id, state).await?
        }

        // File operations
        (&Method::POST, "/files/scan") => routes::files::handle_post_scan(req, state).await?,

        (&Method::POST, "/files/content") => {
            routes::files::handle_post_content(req, state).await?
        }

        (&Method::GET, "/files/stats") => routes::files::handle_get_stats(state).await?,

        (&Method::GET, "/prompts") => routes::prompts::handle_get_list(state).await?,

        // Code extraction
        (&Method::POST, "/code/extract") => routes::code::handle_post_extract(req).await?,

        // D2 rendering
        (&Method::POST, "/d2/render") => routes::d2::handle_post_render(req, state).await?,

        (&Method::POST, "/d2/validate") => routes::d2::handle_post_validate(req, state).await?,

        (&Method::GET, "/d2/info") => routes::d2::handle_get_info(state).await?,

        (&Method::GET, p) if p.starts_with("/d2/download/") => {
            let filename = p.trim_start_matches("/d2/download/");
            routes::d2::handle_get_download(filename, state).await?
        }

        // Mermaid rendering
        (&Method::POST, "/mermaid/render") => {
            routes::mermaid::handle_post_render(req, state).await?
        }

        (&Method::POST, "/mermaid/validate") => {
            routes::mermaid::handle_post_validate(req, state).await?
        }

        (&Method::GET, "/mermaid/info") => routes::mermaid::handle_get_info(state).await?,

        (&Method::GET, p) if p.starts_with("/mermaid/download/") => {
            let filename = p.trim_start_matches("/mermaid/download/");
            routes::mermaid::handle_get_download(filename, state).await?
        }

        // Shell sessions
        (&Method::POST, "/shell/sessions") => {
            routes::shell::handle_post_create(req, state).await?
        }

        (&Method::GET, "/shell/sessions") => routes::shell::handle_get_list(state).await?,

        (&Method::GET, "/shell/security/allowed-commands") => {
            routes::shell::handle_get_security_info().await?
        }

        (&Method::POST, "/shell/security/validate-command") => {
            routes::shell::handle_post_validate_command(req).await?
        }

        (&Method::GET, p) if p.starts_with("/shell/ws/") => {
            let session_id = p.trim_start_matches("/shell/ws/").to_string();
            routes::shell::handle_ws_upgrade(req, session_id, state).await?
        }

        (&Method::GET, p) if p.starts_with("/shell/sessions/") => {
            let session_id = p.trim_start_matches("/shell/sessions/");
            routes::shell::handle_get_info(session_id, state).await?
        }

        (&Method::DELETE, p) if p.starts_with("/shell/sessions/") => {
            let session_id = p.trim_start_matches("/shell/sessions/");
            routes::shell::handle_delete(session_id, state).await?
        }

        // Tool-call surface
        (&Method::GET, "/mcp/tools") => routes::mcp::handle_get_tools(state).await?,

        (&Method::POST, p) if p.starts_with("/mcp/tools/") => {
            let tool_name = p.trim_start_matches("/mcp/tools/").to_string();
            routes::mcp::handle_post_tool(&tool_name, req, state).await?
        }

        (&Method::POST, "/mcp/call_tool") => {
            routes::mcp::handle_post_call_tool(req, state).await?
        }

        (&Method::GET, "/mcp/ws") => routes::mcp::handle_ws_upgrade(req, state).await?,

        // Documentation generation
        (&Method::POST, "/docs/generate") => {
            routes::docs::handle_post_generate(req, state).await?
        }

        (&Method::POST, "/docs/api-docs") => {
            routes::docs::handle_post_api_docs(req, state).await?
        }

        (&Method::POST, "/docs/readme") => routes::docs::handle_post_readme(req, state).await?,

        (&Method::GET, "/docs/templates") => routes::docs::handle_get_templates().await?,

        (&Method::POST, "/docs/export") => routes::docs::handle_post_export(req, state).await?,

        (&Method::GET, "/docs/export/formats") => {
            routes::docs::handle_get_export_formats().await?
        }

        (&Method::POST, "/docs/package") => {
            routes::docs::handle_post_package(req, state).await?
        }

        // Diagram event logging
        (&Method::POST, "/diagrams/log-diagram-event") => {
            routes::diagrams::handle_post_event(req).await?
        }

        // Conversation history files
        (&Method::GET, "/history") => routes::history::handle_get_list(state).await?,

        (&Method::GET, p) if p.starts_with("/history/") => {
            let id = p.trim_start_matches("/history/");
            routes::history::handle_get_one(id, state).await?
        }

        (&Method::DELETE, p) if p.starts_with("/history/") => {
            let id = p.trim_start_matches("/history/");
            routes::history::handle_delete(id, state).await?
        }

        // CORS preflight
        (&Method::OPTIONS, _) => cors_preflight(),

        // 404 Not Found
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not Found"))
            .unwrap(),
    };

    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let state: SharedState = Arc::new(AppState::new(config));

    // Background idle-session eviction for the shell manager
    tokio::spawn(state.shell.clone().run_eviction_loop());

    let make_svc = make_service_fn({
        let state = state.clone();
        move |_conn| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle_request(req, state.clone())))
            }
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], 8001));
    let server = Server::bind(&addr).serve(make_svc);

    sys_info!("Server starting on http://{}", addr);
    println!("Code analysis backend starting on http://{}", addr);
    println!("Available endpoints:");
    println!("  GET  /health                      - Health check");
    println!("  POST /chat                        - Chat with codebase context");
    println!("  POST /conversations               - Create conversation session");
    println!("  GET  /conversations/:id/summary   - Conversation snapshot");
    println!("  POST /files/scan                  - Scan workspace directory");
    println!("  POST /files/content               - Combined file content");
    println!("  POST /code/extract                - Extract code blocks");
    println!("  POST /d2/render                   - Render D2 to SVG");
    println!("  POST /d2/validate                 - Validate D2 source");
    println!("  POST /mermaid/render              - Render Mermaid to SVG/PNG");
    println!("  POST /mermaid/validate            - Validate Mermaid source");
    println!("  POST /docs/generate               - Generate documentation");
    println!("  POST /docs/export                 - Export documentation");
    println!("  POST /docs/package                - Download documentation ZIP");
    println!("  POST /shell/sessions              - Create shell session");
    println!("  WS   /shell/ws/:id                - Stream shell commands");
    println!("  GET  /mcp/tools                   - List diagram tools");
    println!("  POST /mcp/tools/:name             - Invoke a diagram tool");
    println!("  WS   /mcp/ws                      - JSON-RPC tool channel");

    server.await?;

    Ok(())
}
