// File and directory route handlers: workspace scanning and combined content.

use std::convert::Infallible;
use std::path::PathBuf;

use hyper::{Body, Request, Response, StatusCode};
use serde_json::json;

use crate::web::models::{DirectoryScanRequest, FileContentRequest, FileEntry};
use crate::web::request_parsing::parse_json_body;
use crate::web::response_helpers::{app_error_response, json_response};
use crate::web::scanner::{FileInfo, MAX_CONTEXT_BYTES};
use crate::web::SharedState;
use crate::sys_info;

pub async fn handle_post_scan(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: DirectoryScanRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };

    sys_info!("[FILES] Scanning directory: {}", request.path);
    let directory = PathBuf::from(&request.path);

    let scanner = state.scanner.clone();
    let scan_result =
        tokio::task::spawn_blocking(move || scanner.scan_directory(&directory)).await;

    let files = match scan_result {
        Ok(Ok(files)) => files,
        Ok(Err(e)) => return Ok(app_error_response(&e)),
        Err(_) => {
            return Ok(crate::web::response_helpers::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Scan task failed",
            ))
        }
    };

    let entries: Vec<FileEntry> = files.iter().map(file_entry).collect();
    let body = json!({
        "directory": request.path,
        "files": entries,
        "tree": build_tree(&files),
    });
    Ok(json_response(StatusCode::OK, &body))
}

pub async fn handle_post_content(
    req: Request<Body>,
    state: SharedState,
) -> Result<Response<Body>, Infallible> {
    let request: FileContentRequest = match parse_json_body(req.into_body()).await {
        Ok(request) => request,
        Err(error_response) => return Ok(error_response),
    };

    let paths: Vec<PathBuf> = request.files.iter().map(PathBuf::from).collect();
    let scanner = state.scanner.clone();
    let combined =
        tokio::task::spawn_blocking(move || scanner.concat_files(&paths, MAX_CONTEXT_BYTES))
            .await
            .unwrap_or_default();

    let body = json!({ "combinedContent": combined });
    Ok(json_response(StatusCode::OK, &body))
}

pub async fn handle_get_stats(state: SharedState) -> Result<Response<Body>, Infallible> {
    Ok(json_response(StatusCode::OK, &state.scanner.stats()))
}

fn file_entry(info: &FileInfo) -> FileEntry {
    FileEntry {
        path: info.path.display().to_string(),
        relative_path: info.relative_path.clone(),
        size: info.size,
        extension: info.extension.clone(),
        is_special: info.is_special,
    }
}

/// Nested directory tree built from relative paths.
fn build_tree(files: &[FileInfo]) -> serde_json::Value {
    let mut root = TreeNode::default();
    for info in files {
        let components: Vec<&str> = info
            .relative_path
            .split(['/', '\\'])
            .filter(|c| !c.is_empty())
            .collect();
        root.insert(&components, info);
    }
    root.to_json("")
}

#[derive(Default)]
struct TreeNode {
    directories: std::collections::BTreeMap<String, TreeNode>,
    files: Vec<(String, u64)>,
}

impl TreeNode {
    fn insert(&mut self, components: &[&str], info: &FileInfo) {
        match components {
            [] => {}
            [file_name] => self.files.push((file_name.to_string(), info.size)),
            [directory, rest @ ..] => self
                .directories
                .entry(directory.to_string())
                .or_default()
                .insert(rest, info),
        }
    }

    fn to_json(&self, name: &str) -> serde_json::Value {
        let mut children: Vec<serde_json::Value> = self
            .directories
            .iter()
            .map(|(child_name, node)| node.to_json(child_name))
            .collect();
        for (file_name, size) in &self.files {
            children.push(json!({
                "name": file_name,
                "type": "file",
                "size": size,
            }));
        }
        json!({
            "name": name,
            "type": "directory",
            "children": children,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::SystemTime;

    fn info(relative: &str, size: u64) -> FileInfo {
        FileInfo {
            path: Path::new("/ws").join(relative),
            relative_path: relative.to_string(),
            size,
            modified: Some(SystemTime::now()),
            extension: ".rs".to_string(),
            is_special: false,
        }
    }

    #[test]
    fn test_build_tree_nests_directories() {
        let files = vec![info("src/main.rs", 10), info("src/web/mod.rs", 5), info("README.md", 3)];
        let tree = build_tree(&files);
        assert_eq!(tree["type"], "directory");
        let children = tree["children"].as_array().unwrap();
        // One "src" directory plus one top-level file
        assert_eq!(children.len(), 2);
        let src = &children[0];
        assert_eq!(src["name"], "src");
        let src_children = src["children"].as_array().unwrap();
        assert!(src_children.iter().any(|c| c["name"] == "web"));
        assert!(src_children.iter().any(|c| c["name"] == "main.rs"));
    }

    #[test]
    fn test_build_tree_empty() {
        let tree = build_tree(&[]);
        assert_eq!(tree["children"].as_array().unwrap().len(), 0);
    }
}
