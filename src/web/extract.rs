// Fenced code block extraction from assistant message content.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"```(\w+)?\n([\s\S]*?)\n```").unwrap();
}

#[derive(Clone, Debug, Serialize)]
pub struct CodeBlock {
    pub id: String,
    pub language: String,
    pub code: String,
    pub filename: String,
    pub preview: String,
    #[serde(rename = "extractedAt")]
    pub extracted_at: String,
    #[serde(rename = "lineCount")]
    pub line_count: usize,
}

/// Extract fenced code blocks from message content. Blocks without a language
/// marker get a keyword-based guess; empty blocks are dropped.
pub fn extract_code_blocks(content: &str, message_id: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();

    for (i, caps) in FENCED_BLOCK.captures_iter(content).enumerate() {
        let code = caps.get(2).map(|m| m.as_str()).unwrap_or("").trim();
        if code.is_empty() {
            continue;
        }

        let language = caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| detect_language(code).to_string());

        let lines: Vec<&str> = code.lines().collect();
        let mut preview = lines.iter().take(3).cloned().collect::<Vec<_>>().join("\n");
        if lines.len() > 3 {
            preview.push_str("\n...");
        }

        blocks.push(CodeBlock {
            id: format!("code-{}-{}", message_id, i + 1),
            language: language.clone(),
            code: code.to_string(),
            filename: generate_filename(&language, i + 1),
            preview,
            extracted_at: chrono::Local::now().to_rfc3339(),
            line_count: lines.len(),
        });
    }

    blocks
}

/// Keyword-based language guess for unlabeled blocks.
fn detect_language(code: &str) -> &'static str {
    if code.contains("fn main") || code.contains("let mut ") || code.contains("impl ") {
        "rust"
    } else if code.contains("def ") || (code.contains("import ") && code.contains(':')) {
        "python"
    } else if code.contains("function ") || code.contains("const ") || code.contains("=>") {
        "javascript"
    } else if code.starts_with('{') && code.trim_end().ends_with('}') {
        "json"
    } else if code.contains("SELECT ") || (code.contains("select ") && code.contains(" from ")) {
        "sql"
    } else {
        "text"
    }
}

fn generate_filename(language: &str, index: usize) -> String {
    let ext = match language {
        "rust" => "rs",
        "python" => "py",
        "javascript" => "js",
        "typescript" => "ts",
        "java" => "java",
        "go" => "go",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "sql" => "sql",
        "html" => "html",
        "css" => "css",
        "bash" | "sh" | "shell" => "sh",
        "mermaid" => "mmd",
        "d2" => "d2",
        _ => "txt",
    };
    format!("code_block_{}.{}", index, ext)
}
