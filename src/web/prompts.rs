// Prompt library: reusable agent instruction texts, loadable from a prompts
// directory with compiled-in fallbacks.

use std::path::PathBuf;

use crate::sys_debug;

/// Hard formatting directive prefixed to every system message. The frontend
/// renders markdown only, so HTML output from the model breaks the client.
pub const MARKDOWN_DIRECTIVE: &str = "CRITICAL FORMATTING REQUIREMENT: You MUST respond EXCLUSIVELY in pure markdown format.\n\n\
ABSOLUTELY REQUIRED:\n\
- Use ONLY markdown syntax for ALL formatting\n\
- For headers: Use # ## ### (NOT <h1> <h2> <h3>)\n\
- For code blocks: Use ```language syntax (NOT <pre><code>)\n\
- For lists: Use - or 1. syntax (NOT <ul><li>)\n\
- For emphasis: Use **bold** and *italic* (NOT <strong><em>)\n\
- For links: Use [text](url) syntax (NOT <a href>)\n\n\
STRICTLY FORBIDDEN:\n\
- NO HTML tags whatsoever\n\
- NO HTML entities\n\
- NO HTML attributes or styling\n\n\
If you include mermaid diagrams, use this EXACT format:\n\
```mermaid\n\
graph TD\n\
    A --> B\n\
```\n\n\
VIOLATION OF THIS RULE WILL BREAK THE APPLICATION. Respond in pure markdown only.\n\n";

pub const DEFAULT_ASSISTANT_PROMPT: &str =
    "You are a helpful AI assistant that helps with code analysis and development.";

const MERMAID_AGENT_PROMPT: &str = "You are an expert software architect producing Mermaid diagrams.\n\
Analyse the request and produce a single fenced ```mermaid code block.\n\
Prefer flowchart TD for structure, sequenceDiagram for interactions.\n\
Keep node labels short, quote labels containing special characters, and\n\
never emit HTML. Return the diagram followed by a brief explanation.";

const D2_AGENT_PROMPT: &str = "You are an expert software architect producing D2 diagrams.\n\
Analyse the request and produce a single fenced ```d2 code block.\n\
Use shape: cylinder for databases, shape: person for users, shape: cloud for\n\
cloud services and shape: rectangle for applications. Always close quoted\n\
strings. Return the diagram followed by a brief explanation.";

const C4_AGENT_PROMPT: &str = "You are an expert software architect producing C4 model diagrams.\n\
Analyse the request and produce a single fenced ```c4 code block using\n\
Person/System/Container/Component entity definitions, Rel(from, to, \"label\")\n\
relationships and System_Boundary groupings. Return the diagram followed by a\n\
brief explanation.";

pub struct PromptLibrary {
    prompts_dir: Option<PathBuf>,
}

impl PromptLibrary {
    pub fn new(prompts_dir: Option<PathBuf>) -> Self {
        PromptLibrary { prompts_dir }
    }

    /// Agent prompt for a diagram kind ("mermaid" | "d2" | "c4"): the on-disk
    /// `<kind>-architecture.md` wins over the compiled-in default.
    pub fn agent_prompt(&self, kind: &str) -> String {
        if let Some(dir) = &self.prompts_dir {
            let path = dir.join(format!("{}-architecture.md", kind));
            if let Ok(content) = std::fs::read_to_string(&path) {
                if !content.trim().is_empty() {
                    sys_debug!("[PROMPTS] Loaded agent prompt from {}", path.display());
                    return content;
                }
            }
        }
        match kind {
            "mermaid" => MERMAID_AGENT_PROMPT.to_string(),
            "d2" => D2_AGENT_PROMPT.to_string(),
            "c4" => C4_AGENT_PROMPT.to_string(),
            _ => DEFAULT_ASSISTANT_PROMPT.to_string(),
        }
    }

    /// Compose the full system message: formatting directive, agent prompt and
    /// the codebase context. Prompts may carry a `{codebase_content}`
    /// placeholder; otherwise the context is appended.
    pub fn format_system_message(&self, agent_prompt: &str, codebase_content: &str) -> String {
        let formatted = if agent_prompt.contains("{codebase_content}") {
            agent_prompt.replace("{codebase_content}", codebase_content)
        } else {
            format!(
                "{}\n\nThe user has provided the following codebase:\n\n{}",
                agent_prompt, codebase_content
            )
        };
        format!("{}{}", MARKDOWN_DIRECTIVE, formatted)
    }

    /// Load an arbitrary prompt file from the prompts directory.
    pub fn named_prompt(&self, file_name: &str) -> Option<String> {
        let dir = self.prompts_dir.as_ref()?;
        let content = std::fs::read_to_string(dir.join(file_name)).ok()?;
        if content.trim().is_empty() {
            None
        } else {
            Some(content)
        }
    }

    /// Names of agent prompt files available on disk.
    pub fn list_agent_prompts(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Some(dir) = &self.prompts_dir {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if name.ends_with(".md") {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        names
    }
}
