// WebSocket loops for shell sessions and the JSON-RPC tool channel, running
// over connections upgraded from the hyper router.

use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::web::routes::mcp::{call_tool, tool_list};
use crate::web::shell::ShellManager;
use crate::web::SharedState;
use crate::{sys_debug, sys_info, sys_warn};

type WsResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Shell session WebSocket: accepts command/ping frames, streams child output
/// as it is produced and reports a terminal status per command.
pub async fn handle_shell_ws(
    upgraded: Upgraded,
    session_id: String,
    shell: Arc<ShellManager>,
) -> WsResult {
    let ws_stream = WebSocketStream::from_raw_socket(
        upgraded,
        tokio_tungstenite::tungstenite::protocol::Role::Server,
        None,
    )
    .await;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Welcome frame with the current session info
    let session_info = shell.session_info(&session_id);
    let welcome = serde_json::json!({
        "type": "status",
        "data": "connected",
        "session_info": session_info,
    });
    let _ = ws_sender.send(WsMessage::Text(welcome.to_string())).await;

    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                let parsed: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(_) => {
                        send_frame(
                            &mut ws_sender,
                            serde_json::json!({ "type": "error", "data": "Invalid JSON message" }),
                        )
                        .await;
                        continue;
                    }
                };

                match parsed.get("type").and_then(|t| t.as_str()) {
                    Some("command") => {
                        let command = parsed
                            .get("data")
                            .and_then(|d| d.as_str())
                            .unwrap_or("")
                            .trim()
                            .to_string();
                        if command.is_empty() {
                            send_frame(
                                &mut ws_sender,
                                serde_json::json!({ "type": "error", "data": "Empty command" }),
                            )
                            .await;
                            continue;
                        }

                        // Echo the command back to the client
                        send_frame(
                            &mut ws_sender,
                            serde_json::json!({ "type": "echo", "data": command }),
                        )
                        .await;

                        run_command(&mut ws_sender, &shell, &session_id, &command).await;
                    }
                    Some("ping") => {
                        let data = parsed.get("data").cloned().unwrap_or(serde_json::Value::Null);
                        send_frame(
                            &mut ws_sender,
                            serde_json::json!({ "type": "pong", "data": data }),
                        )
                        .await;
                    }
                    other => {
                        send_frame(
                            &mut ws_sender,
                            serde_json::json!({
                                "type": "error",
                                "data": format!("Unknown message type: {}", other.unwrap_or("none")),
                            }),
                        )
                        .await;
                    }
                }
            }
            Ok(WsMessage::Ping(data)) => {
                let _ = ws_sender.send(WsMessage::Pong(data)).await;
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    // Disconnect does not kill the session; the client may reconnect
    sys_info!("[SHELL_WS] Connection closed for session {}", session_id);
    Ok(())
}

async fn run_command<S>(
    ws_sender: &mut S,
    shell: &Arc<ShellManager>,
    session_id: &str,
    command: &str,
) where
    S: SinkExt<WsMessage> + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let exec = shell.execute(session_id, command, tx);
    tokio::pin!(exec);

    let mut outcome = None;
    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(chunk) => {
                    send_frame(
                        ws_sender,
                        serde_json::json!({
                            "type": "output",
                            "stream": chunk.stream,
                            "data": chunk.data,
                        }),
                    )
                    .await;
                }
                // All senders dropped: execution finished streaming
                None => break,
            },
            result = &mut exec, if outcome.is_none() => {
                outcome = Some(result);
            }
        }
    }
    let outcome = match outcome {
        Some(outcome) => outcome,
        None => exec.await,
    };

    match outcome {
        Ok(status) => {
            send_frame(
                ws_sender,
                serde_json::json!({ "type": "status", "data": status.as_str() }),
            )
            .await;
        }
        Err(e) => {
            sys_warn!("[SHELL_WS] Execute rejected in {}: {}", session_id, e);
            send_frame(
                ws_sender,
                serde_json::json!({ "type": "error", "data": e.to_string() }),
            )
            .await;
            send_frame(
                ws_sender,
                serde_json::json!({ "type": "status", "data": "failed" }),
            )
            .await;
        }
    }
}

async fn send_frame<S>(ws_sender: &mut S, frame: serde_json::Value)
where
    S: SinkExt<WsMessage> + Unpin,
{
    let _ = ws_sender.send(WsMessage::Text(frame.to_string())).await;
}

/// JSON-RPC 2.0 channel for the tool-call surface: `tools/list` and
/// `tools/call`; anything else is answered with -32601.
pub async fn handle_mcp_ws(upgraded: Upgraded, state: SharedState) -> WsResult {
    let ws_stream = WebSocketStream::from_raw_socket(
        upgraded,
        tokio_tungstenite::tungstenite::protocol::Role::Server,
        None,
    )
    .await;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                let request: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(_) => {
                        sys_debug!("[MCP_WS] Ignoring malformed frame");
                        continue;
                    }
                };
                let id = request.get("id").cloned().unwrap_or(serde_json::Value::Null);

                let response = match request.get("method").and_then(|m| m.as_str()) {
                    Some("tools/list") => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": { "tools": tool_list() },
                    }),
                    Some("tools/call") => {
                        let params = request.get("params").cloned().unwrap_or_default();
                        let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
                        let arguments = params
                            .get("arguments")
                            .cloned()
                            .unwrap_or(serde_json::json!({}));

                        let text = match call_tool(&state, name, &arguments).await {
                            Ok(result) => serde_json::to_string_pretty(&result)
                                .unwrap_or_else(|_| result.to_string()),
                            Err(error) => serde_json::json!({ "error": error, "tool": name })
                                .to_string(),
                        };
                        serde_json::json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {
                                "content": [{ "type": "text", "text": text }],
                            },
                        })
                    }
                    _ => serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": -32601, "message": "Method not found" },
                    }),
                };

                let _ = ws_sender.send(WsMessage::Text(response.to_string())).await;
            }
            Ok(WsMessage::Ping(data)) => {
                let _ = ws_sender.send(WsMessage::Pong(data)).await;
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    sys_info!("[MCP_WS] Connection closed");
    Ok(())
}
