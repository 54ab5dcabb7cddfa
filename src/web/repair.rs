// Diagram repair loop: validate fenced diagram blocks in an assistant answer
// against the external CLI, feed validator errors back to the model for a
// bounded number of attempts, then pre-render the surviving blocks to SVG.

use regex::Regex;

use crate::web::diagram::{DiagramKind, DiagramService};
use crate::web::llm::ChatBackend;
use crate::web::models::Message;
use crate::{log_info, log_warn};

const D2_MAX_ATTEMPTS: usize = 2;
const MERMAID_MAX_ATTEMPTS: usize = 5;

fn max_attempts(kind: DiagramKind) -> usize {
    match kind {
        DiagramKind::D2 => D2_MAX_ATTEMPTS,
        DiagramKind::Mermaid => MERMAID_MAX_ATTEMPTS,
    }
}

/// Fenced block pattern for one diagram kind, non-greedy across lines.
fn block_pattern(kind: DiagramKind) -> Regex {
    Regex::new(&format!(r"(?s)```{}[ \t]*\n?(.*?)```", kind.as_str())).unwrap()
}

pub fn extract_blocks(text: &str, kind: DiagramKind) -> Vec<String> {
    block_pattern(kind)
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn fix_rules(kind: DiagramKind) -> &'static str {
    match kind {
        DiagramKind::D2 => {
            "- Databases: shape: cylinder\n\
             - Web/Apps: shape: rectangle\n\
             - Users: shape: person\n\
             - Cloud: shape: cloud\n\
             - Strings: Always close quotes"
        }
        DiagramKind::Mermaid => {
            "- Start with a diagram type line (flowchart TD, sequenceDiagram, classDiagram)\n\
             - Quote labels containing special characters\n\
             - One statement per line\n\
             - Close every bracket and subgraph"
        }
    }
}

fn fix_hints(kind: DiagramKind) -> &'static str {
    match kind {
        DiagramKind::D2 => {
            "- Use `shape: cylinder` for databases\n\
             - Use `shape: rectangle` for web/app components\n\
             - Use `shape: person` for users\n\
             - Use `shape: cloud` for cloud services\n\
             - Ensure all strings are properly quoted\n\
             - Check for syntax errors in relationships (use `->` or `--`)"
        }
        DiagramKind::Mermaid => {
            "- Start the diagram with its type, e.g. `flowchart TD`\n\
             - Quote node labels containing spaces or punctuation\n\
             - Keep one edge or node definition per line\n\
             - Close every bracket, quote and subgraph"
        }
    }
}

/// Heuristic for a truncated correction: more `\`\`\`<kind>` openers than
/// closing fences means the model ran out of tokens mid-block.
pub fn looks_truncated(text: &str, kind: DiagramKind) -> bool {
    let opener = format!("```{}", kind.as_str());
    let openers = text.matches(&opener).count();
    let total_fences = text.matches("```").count();
    let closers = total_fences.saturating_sub(openers);
    openers > closers
}

/// Run the validate-fix-rerender loop over every diagram kind found in the
/// answer. Validator and provider failures inside the loop never surface;
/// they drive the next attempt or the final error report.
pub fn repair_diagrams(
    text: &str,
    llm: &mut dyn ChatBackend,
    outbound_history: &[Message],
    model: &str,
    diagrams: &DiagramService,
    conversation_id: &str,
) -> String {
    let mut current = text.to_string();
    for kind in [DiagramKind::D2, DiagramKind::Mermaid] {
        if extract_blocks(&current, kind).is_empty() {
            continue;
        }
        current = repair_kind(
            &current,
            kind,
            llm,
            outbound_history,
            model,
            diagrams,
            conversation_id,
        );
    }
    current
}

fn repair_kind(
    text: &str,
    kind: DiagramKind,
    llm: &mut dyn ChatBackend,
    outbound_history: &[Message],
    model: &str,
    diagrams: &DiagramService,
    conversation_id: &str,
) -> String {
    let mut current = text.to_string();
    let budget = max_attempts(kind);

    log_info!(
        conversation_id,
        "[REPAIR] Found {} {} block(s), validating",
        extract_blocks(&current, kind).len(),
        kind.as_str()
    );

    for attempt in 1..=budget {
        let validation_errors = collect_errors(&current, kind, diagrams);
        if validation_errors.is_empty() {
            log_info!(
                conversation_id,
                "[REPAIR] All {} blocks valid, pre-rendering",
                kind.as_str()
            );
            return pre_render(&current, kind, diagrams, conversation_id);
        }

        log_info!(
            conversation_id,
            "[REPAIR] Validation failed, requesting fix (attempt {}/{})",
            attempt,
            budget
        );

        let correction_prompt = format!(
            "FIX THESE {} SYNTAX ERRORS:\n\n{}\n\nRULES:\n{}\n\n\
             Return ONLY the corrected ```{} code block. Keep it SIMPLE and COMPLETE.",
            kind.as_str().to_uppercase(),
            validation_errors.join("\n\n"),
            fix_rules(kind),
            kind.as_str()
        );

        match llm.ask(&correction_prompt, outbound_history, "", model) {
            Ok(corrected) => {
                if looks_truncated(&corrected, kind) {
                    log_warn!(
                        conversation_id,
                        "[REPAIR] Corrected response may be truncated (model: {})",
                        model
                    );
                }
                current = corrected;
            }
            Err(e) => {
                // Provider failure inside the loop: keep the current text and
                // let the next validation pass (or exhaustion) decide.
                log_warn!(conversation_id, "[REPAIR] Correction call failed: {}", e);
            }
        }
    }

    // The final correction still gets a validation pass; a late success skips
    // the error report entirely.
    let validation_errors = collect_errors(&current, kind, diagrams);
    if validation_errors.is_empty() {
        return pre_render(&current, kind, diagrams, conversation_id);
    }

    log_warn!(
        conversation_id,
        "[REPAIR] {} validation failed after {} attempts",
        kind.as_str(),
        budget
    );

    // Retry budget exhausted: attach a visible error report and still try a
    // best-effort render of whatever survived.
    let mut report = String::from("\n\n---\n\n");
    report.push_str(&format!(
        "## ⚠️ {} Diagram Validation Failed\n\n",
        kind.as_str().to_uppercase()
    ));
    report.push_str(&format!(
        "The {} diagram could not be validated after {} auto-fix attempts.\n\n",
        kind.as_str(),
        budget
    ));
    report.push_str("**Validation Errors:**\n\n");
    for error in &validation_errors {
        report.push_str(&format!("```\n{}\n```\n\n", error));
    }
    report.push_str("**Common fixes:**\n");
    report.push_str(fix_hints(kind));
    report.push_str("\n\n**Source (Failed Validation):**\n\n");
    for block in extract_blocks(&current, kind) {
        report.push_str(&format!("```{}\n{}\n```\n\n", kind.as_str(), block));
    }

    let rendered = pre_render(&current, kind, diagrams, conversation_id);
    format!("{}{}", rendered, report)
}

fn collect_errors(text: &str, kind: DiagramKind, diagrams: &DiagramService) -> Vec<String> {
    extract_blocks(text, kind)
        .iter()
        .enumerate()
        .filter_map(|(i, block)| {
            diagrams.validate(kind, block).err().map(|error| {
                format!(
                    "{} Diagram #{} Error:\n{}",
                    kind.as_str().to_uppercase(),
                    i + 1,
                    error
                )
            })
        })
        .collect()
}

/// Replace each fenced block with an HTML snippet embedding the rendered SVG,
/// a download link and a collapsible section holding the source. Blocks that
/// fail to render stay as plain fenced code.
fn pre_render(
    text: &str,
    kind: DiagramKind,
    diagrams: &DiagramService,
    conversation_id: &str,
) -> String {
    let pattern = block_pattern(kind);
    let result = pattern.replace_all(text, |caps: &regex::Captures| {
        let source = caps[1].to_string();
        match diagrams.render_svg(kind, &source) {
            Ok(svg) => {
                let download_link = match diagrams.save_diagram_svg(kind, &source, &svg) {
                    Ok(filename) => format!(
                        "<p class=\"diagram-download\"><a href=\"/api/v1/{}/download/{}\" download=\"{}\">⬇️ Download SVG</a></p>\n",
                        kind.as_str(),
                        filename,
                        filename
                    ),
                    Err(e) => {
                        log_warn!(conversation_id, "[REPAIR] Failed to save SVG: {}", e);
                        String::new()
                    }
                };
                format!(
                    "<div class=\"{kind}-diagram-container\">\n\
                     <div class=\"diagram-status-badge\">✅ {kind_upper} Diagram Rendered Successfully</div>\n\
                     <div class=\"{kind}-rendered-diagram\">\n{svg}\n</div>\n\
                     {download_link}\
                     <details>\n\
                     <summary>📝 View {kind_upper} Source Code (click to expand/copy)</summary>\n\
                     <pre><code>{source}</code></pre>\n\
                     </details>\n\
                     </div>\n",
                    kind = kind.as_str(),
                    kind_upper = kind.as_str().to_uppercase(),
                    svg = svg,
                    download_link = download_link,
                    source = source,
                )
            }
            Err(e) => {
                log_warn!(conversation_id, "[REPAIR] Failed to pre-render: {}", e);
                caps[0].to_string()
            }
        }
    });
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::error::AppError;
    use crate::web::models::TokenUsage;
    use std::collections::VecDeque;

    struct ScriptedBackend {
        responses: VecDeque<Result<String, ()>>,
        pub calls: Vec<String>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<Result<String, ()>>) -> Self {
            ScriptedBackend {
                responses: responses.into(),
                calls: Vec::new(),
            }
        }
    }

    impl ChatBackend for ScriptedBackend {
        fn ask(
            &mut self,
            question: &str,
            _history: &[Message],
            _codebase_content: &str,
            _model: &str,
        ) -> Result<String, AppError> {
            self.calls.push(question.to_string());
            match self.responses.pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(())) => Err(AppError::Upstream("scripted failure".into())),
                None => Ok(String::new()),
            }
        }

        fn set_api_key(&mut self, _api_key: &str) {}
        fn set_provider(&mut self, _provider: &str) {}
        fn has_api_key(&self) -> bool {
            true
        }
        fn last_usage(&self) -> TokenUsage {
            TokenUsage::default()
        }
    }

    fn no_tool_service() -> DiagramService {
        DiagramService::with_executables(None, None, std::env::temp_dir())
    }

    #[test]
    fn test_extract_blocks_non_greedy() {
        let text = "```d2\na -> b\n```\ntext\n```d2\nc -> d\n```";
        let blocks = extract_blocks(text, DiagramKind::D2);
        assert_eq!(blocks, vec!["a -> b\n", "c -> d\n"]);
    }

    #[test]
    fn test_extract_blocks_ignores_other_kinds() {
        let text = "```mermaid\ngraph TD\n```";
        assert!(extract_blocks(text, DiagramKind::D2).is_empty());
        assert_eq!(extract_blocks(text, DiagramKind::Mermaid).len(), 1);
    }

    #[test]
    fn test_looks_truncated() {
        assert!(looks_truncated("```d2\na -> b", DiagramKind::D2));
        assert!(!looks_truncated("```d2\na -> b\n```", DiagramKind::D2));
        assert!(!looks_truncated("no fences at all", DiagramKind::D2));
    }

    #[test]
    fn test_text_without_blocks_returned_unchanged() {
        let mut backend = ScriptedBackend::new(vec![]);
        let diagrams = no_tool_service();
        let text = "Just prose, no diagrams.";
        let out = repair_diagrams(text, &mut backend, &[], "m", &diagrams, "test");
        assert_eq!(out, text);
        assert!(backend.calls.is_empty());
    }

    #[test]
    fn test_exhaustion_appends_error_report_and_keeps_source() {
        // No CLI available: every validation fails with "executable not
        // found", so the D2 budget (2) is spent and the report is attached.
        let mut backend = ScriptedBackend::new(vec![
            Ok("```d2\nstill broken\n```".to_string()),
            Ok("```d2\nstill broken\n```".to_string()),
        ]);
        let diagrams = no_tool_service();
        let text = "Here:\n```d2\nDB: database\n```";
        let out = repair_diagrams(text, &mut backend, &[], "m", &diagrams, "test");
        assert!(out.contains("Diagram Validation Failed"));
        assert!(out.contains("**Common fixes:**"));
        assert!(out.contains("```d2\nstill broken"));
        // One correction call per attempt within the D2 budget
        assert_eq!(backend.calls.len(), 2);
        assert!(backend.calls[0].contains("FIX THESE D2 SYNTAX ERRORS"));
        assert!(backend.calls[0].contains("Return ONLY the corrected ```d2 code block"));
    }

    #[test]
    fn test_correction_failure_drives_next_iteration() {
        let mut backend = ScriptedBackend::new(vec![
            Err(()),
            Ok("```d2\nstill bad\n```".to_string()),
        ]);
        let diagrams = no_tool_service();
        let text = "```d2\nDB: database\n```";
        let out = repair_diagrams(text, &mut backend, &[], "m", &diagrams, "test");
        // Provider error swallowed; the loop keeps going and the exhaustion
        // report is still produced for the final candidate
        assert_eq!(backend.calls.len(), 2);
        assert!(out.contains("Diagram Validation Failed"));
        assert!(out.contains("```d2\nstill bad"));
    }

    #[test]
    fn test_mermaid_budget_is_five() {
        let responses = (0..5)
            .map(|_| Ok("```mermaid\nbroken\n```".to_string()))
            .collect();
        let mut backend = ScriptedBackend::new(responses);
        let diagrams = no_tool_service();
        let text = "```mermaid\ngraph TD\n```";
        let _ = repair_diagrams(text, &mut backend, &[], "m", &diagrams, "test");
        assert_eq!(backend.calls.len(), 5);
    }
}
