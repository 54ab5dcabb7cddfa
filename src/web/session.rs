// Conversation sessions: per-session history, file context, question log and
// the ask orchestration, plus the process-wide registry that owns them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::web::config::AppConfig;
use crate::web::diagram::DiagramService;
use crate::web::error::AppError;
use crate::web::llm::{ChatBackend, HttpChatClient};
use crate::web::markdown::markdown_to_html;
use crate::web::models::{
    AskResult, Message, QuestionRecord, QuestionStatus, SessionSummary, TokenUsage,
};
use crate::web::prompts::{PromptLibrary, DEFAULT_ASSISTANT_PROMPT};
use crate::web::repair::repair_diagrams;
use crate::web::scanner::{FileInfo, FileScanner, MAX_CONTEXT_BYTES};
use crate::{log_error, log_info, log_warn};

pub struct Session {
    pub id: String,
    pub provider: String,
    pub available_models: Vec<String>,
    pub selected_model: String,
    pub workspace_root: Option<PathBuf>,
    pub selected_files: Vec<PathBuf>,
    pub persistent_files: Vec<PathBuf>,
    pub history: Vec<Message>,
    pub question_log: Vec<QuestionRecord>,
    pub last_token_usage: TokenUsage,
    llm: Box<dyn ChatBackend>,
    scanner: Arc<FileScanner>,
    prompts: Arc<PromptLibrary>,
    diagrams: Arc<DiagramService>,
    base_directory: PathBuf,
    tool_patterns: Vec<String>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        llm: Box<dyn ChatBackend>,
        provider: String,
        available_models: Vec<String>,
        default_model: String,
        scanner: Arc<FileScanner>,
        prompts: Arc<PromptLibrary>,
        diagrams: Arc<DiagramService>,
        base_directory: PathBuf,
        tool_patterns: Vec<String>,
    ) -> Self {
        log_info!(&id, "Created conversation session (provider: {})", provider);
        Session {
            id,
            provider,
            available_models,
            selected_model: default_model,
            workspace_root: None,
            selected_files: Vec::new(),
            persistent_files: Vec::new(),
            history: Vec::new(),
            question_log: Vec::new(),
            last_token_usage: TokenUsage::default(),
            llm,
            scanner,
            prompts,
            diagrams,
            base_directory,
            tool_patterns,
        }
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn set_api_key(&mut self, api_key: &str) {
        self.llm.set_api_key(api_key);
    }

    pub fn set_provider(&mut self, provider: &str) {
        if !provider.is_empty() && provider != self.provider {
            self.provider = provider.to_string();
            self.llm.set_provider(provider);
            log_info!(&self.id, "Provider changed to '{}'", provider);
        }
    }

    pub fn set_model(&mut self, model: &str) {
        if model.is_empty() {
            return;
        }
        if !self.available_models.iter().any(|m| m == model) {
            self.available_models.push(model.to_string());
        }
        self.selected_model = model.to_string();
        log_info!(&self.id, "Model changed to '{}'", model);
    }

    pub fn update_available_models(&mut self, models: &[String]) {
        if models.is_empty() {
            return;
        }
        self.available_models = models.to_vec();
        if !models.iter().any(|m| *m == self.selected_model) {
            self.selected_model = models[0].clone();
        }
    }

    // ------------------------------------------------------------------
    // Workspace and file selection
    // ------------------------------------------------------------------

    /// Validate and scan a workspace directory. Selections from the previous
    /// directory are reset.
    pub fn set_workspace(&mut self, directory: &Path) -> Result<Vec<FileInfo>, AppError> {
        self.scanner.validate_directory(directory)?;
        let files = self.scanner.scan_directory(directory)?;

        self.workspace_root = Some(directory.to_path_buf());
        self.selected_files.clear();
        self.persistent_files.clear();

        log_info!(
            &self.id,
            "Workspace set to '{}' ({} files)",
            directory.display(),
            files.len()
        );
        Ok(files)
    }

    /// Replace the selected file set, deduplicated in insertion order. With
    /// `make_persistent` the new selection also becomes the persistent set;
    /// otherwise the persistent set shrinks to stay a subset of the selection.
    pub fn update_files(&mut self, files: &[String], make_persistent: bool) {
        let mut unique: Vec<PathBuf> = Vec::new();
        for file in files {
            if let Some(resolved) = self.resolve_workspace_path(file) {
                if !unique.contains(&resolved) {
                    unique.push(resolved);
                }
            }
        }
        self.selected_files = unique;

        if make_persistent {
            self.persistent_files = self.selected_files.clone();
        } else {
            self.persistent_files
                .retain(|p| self.selected_files.contains(p));
        }

        log_info!(
            &self.id,
            "Updated file selection: {} selected, {} persistent",
            self.selected_files.len(),
            self.persistent_files.len()
        );
    }

    /// Add a single file to the selection after a traversal-safety check.
    pub fn add_file(&mut self, file: &str, make_persistent: bool) {
        let resolved = match self.resolve_workspace_path(file) {
            Some(path) => path,
            None => {
                log_error!(
                    &self.id,
                    "Path resolution failed for {} (missing or escapes the workspace)",
                    file
                );
                return;
            }
        };
        if !self.selected_files.contains(&resolved) {
            self.selected_files.push(resolved);
        }
        if make_persistent {
            self.persistent_files = self.selected_files.clone();
        }
    }

    pub fn clear_files(&mut self) {
        self.selected_files.clear();
        self.persistent_files.clear();
    }

    /// Resolve a path against the workspace root, rejecting escapes.
    fn resolve_workspace_path(&self, file: &str) -> Option<PathBuf> {
        let base = self
            .workspace_root
            .clone()
            .unwrap_or_else(|| self.base_directory.clone());
        let candidate = Path::new(file);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            base.join(candidate)
        };
        let canonical = joined.canonicalize().ok()?;
        let canonical_base = base.canonicalize().ok()?;
        if canonical.starts_with(&canonical_base) {
            Some(canonical)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Conversation operations
    // ------------------------------------------------------------------

    /// Process one user question end to end: context assembly, provider call,
    /// diagram repair, history bookkeeping, system-message refresh.
    pub fn ask_question(&mut self, question: &str) -> Result<AskResult, AppError> {
        if question.trim().is_empty() {
            return Err(AppError::Validation("Question cannot be empty".to_string()));
        }
        if !self.llm.has_api_key() {
            return Err(AppError::Config("API key is not configured".to_string()));
        }

        let is_first_message = self.history.is_empty();
        let question_index = self.question_log.len();
        self.question_log.push(QuestionRecord {
            question: question.to_string(),
            status: QuestionStatus::Pending,
            response: String::new(),
            tokens_used: 0,
            processing_time: 0.0,
            model_used: self.selected_model.clone(),
            timestamp: now_timestamp(),
        });

        let needs_context = is_first_message || self.is_tool_command(question);
        let agent_prompt = self.detect_diagram_request(question);

        log_info!(
            &self.id,
            "Processing question (first: {}, context: {}, diagram agent: {})",
            is_first_message,
            needs_context,
            agent_prompt.is_some()
        );

        self.history.push(Message::new("user", question));

        if is_first_message && self.persistent_files.is_empty() {
            self.persistent_files = self.selected_files.clone();
        }
        let context = if needs_context {
            self.scanner
                .concat_files(&self.context_file_set(), MAX_CONTEXT_BYTES)
        } else {
            String::new()
        };

        // History for the provider: everything before the current user
        // message, with the stored system entry filtered out (context is
        // framed separately per provider).
        let outbound_history = self.outbound_history();

        let start = Instant::now();
        let response_text = match self.llm.ask(
            question,
            &outbound_history,
            &context,
            &self.selected_model.clone(),
        ) {
            Ok(text) => text,
            Err(e) => {
                let record = &mut self.question_log[question_index];
                record.status = QuestionStatus::Failed;
                record.response = e.to_string();
                log_error!(&self.id, "Provider call failed: {}", e);
                return Err(e);
            }
        };
        let processing_time = start.elapsed().as_secs_f64();
        self.last_token_usage = self.llm.last_usage();

        let corrected = repair_diagrams(
            &response_text,
            self.llm.as_mut(),
            &outbound_history,
            &self.selected_model.clone(),
            &self.diagrams,
            &self.id,
        );

        self.history.push(Message::new("assistant", &corrected));
        self.sync_system_message(agent_prompt.as_deref());
        debug_assert!(self.system_message_invariant_holds());

        let tokens_used = self.last_token_usage.total_tokens;
        {
            let record = &mut self.question_log[question_index];
            record.status = QuestionStatus::Completed;
            record.response = corrected.clone();
            record.tokens_used = tokens_used;
            record.processing_time = processing_time;
            record.model_used = self.selected_model.clone();
        }

        log_info!(
            &self.id,
            "Question completed in {:.2}s using {} tokens",
            processing_time,
            tokens_used
        );

        Ok(AskResult {
            response: markdown_to_html(&corrected),
            raw_markdown: corrected,
            processing_time,
            tokens_used,
            token_usage: self.last_token_usage,
            question_index,
            model_used: self.selected_model.clone(),
            timestamp: now_timestamp(),
        })
    }

    pub fn clear_conversation(&mut self) {
        self.history.clear();
        self.question_log.clear();
        log_info!(&self.id, "Conversation cleared");
    }

    pub fn get_summary(&self) -> SessionSummary {
        SessionSummary {
            conversation_id: self.id.clone(),
            provider: self.provider.clone(),
            selected_model: self.selected_model.clone(),
            selected_directory: self
                .workspace_root
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            selected_files: self
                .selected_files
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            persistent_files: self
                .persistent_files
                .iter()
                .map(|p| p.display().to_string())
                .collect(),
            question_history: self.question_log.clone(),
            conversation_history: self.history.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Persistent files first, then selected files not already present.
    fn context_file_set(&self) -> Vec<PathBuf> {
        let mut files = self.persistent_files.clone();
        for file in &self.selected_files {
            if !files.contains(file) {
                files.push(file.clone());
            }
        }
        files
    }

    fn outbound_history(&self) -> Vec<Message> {
        let end = self.history.len().saturating_sub(1);
        self.history[..end]
            .iter()
            .filter(|m| m.role != "system")
            .cloned()
            .collect()
    }

    /// Overwrite-or-insert the system message at index 0 so it reflects the
    /// current file context and agent prompt. Runs after every successful
    /// turn; the overwrite path keeps the at-most-one invariant.
    fn sync_system_message(&mut self, agent_prompt: Option<&str>) {
        let context = self
            .scanner
            .concat_files(&self.context_file_set(), MAX_CONTEXT_BYTES);
        let prompt = agent_prompt.unwrap_or(DEFAULT_ASSISTANT_PROMPT);
        let content = self.prompts.format_system_message(prompt, &context);

        match self.history.first() {
            Some(first) if first.role == "system" => {
                self.history[0].content = content;
            }
            _ => {
                self.history.insert(0, Message::new("system", content));
            }
        }
    }

    /// At most one system message, and only ever at index 0.
    pub fn system_message_invariant_holds(&self) -> bool {
        let system_count = self.history.iter().filter(|m| m.role == "system").count();
        match system_count {
            0 => true,
            1 => self.history[0].role == "system",
            _ => false,
        }
    }

    /// Fuzzy match against the configured tool-command phrases: the share of
    /// a phrase's words present in the question must reach 0.5 for any one
    /// phrase.
    fn is_tool_command(&self, question: &str) -> bool {
        if self.tool_patterns.is_empty() {
            return false;
        }
        let question_words: Vec<String> = tokenize(question);
        for pattern in &self.tool_patterns {
            let pattern_words = tokenize(pattern);
            if pattern_words.is_empty() {
                continue;
            }
            let overlap = pattern_words
                .iter()
                .filter(|w| question_words.contains(w))
                .count();
            if overlap as f64 / pattern_words.len() as f64 >= 0.5 {
                return true;
            }
        }
        false
    }

    /// A question naming a diagram language together with a generation verb
    /// selects the matching agent prompt.
    fn detect_diagram_request(&self, question: &str) -> Option<String> {
        let lower = question.to_lowercase();
        let wants_generation = lower.contains("diagram")
            || lower.contains("generate")
            || lower.contains("create");
        if !wants_generation {
            return None;
        }
        if lower.contains("mermaid") {
            return Some(self.prompts.agent_prompt("mermaid"));
        }
        if lower.contains("d2") {
            return Some(self.prompts.agent_prompt("d2"));
        }
        None
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide map of conversation sessions. Sessions are wrapped in their
/// own mutex so concurrent asks serialise per session without blocking the
/// registry.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    scanner: Arc<FileScanner>,
    prompts: Arc<PromptLibrary>,
    diagrams: Arc<DiagramService>,
    base_directory: PathBuf,
    tool_patterns: Vec<String>,
    base_url: String,
}

impl SessionRegistry {
    pub fn new(
        config: &AppConfig,
        scanner: Arc<FileScanner>,
        prompts: Arc<PromptLibrary>,
        diagrams: Arc<DiagramService>,
    ) -> Self {
        SessionRegistry {
            sessions: Mutex::new(HashMap::new()),
            scanner,
            prompts,
            diagrams,
            base_directory: config.code_path.clone(),
            tool_patterns: config.tool_patterns.clone(),
            base_url: config.base_url.clone(),
        }
    }

    /// Create a session; a supplied id that already exists replaces the old
    /// session.
    pub fn create_session(
        &self,
        api_key: &str,
        provider: &str,
        models: Vec<String>,
        default_model: Option<&str>,
        session_id: Option<&str>,
    ) -> Arc<Mutex<Session>> {
        let id = session_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut sessions = self.sessions.lock().unwrap();
        if sessions.remove(&id).is_some() {
            log_warn!(&id, "Replacing existing session");
        }

        let default_model = default_model
            .map(|m| m.to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| models.first().cloned().unwrap_or_default());

        let llm = Box::new(HttpChatClient::new(api_key, provider, &self.base_url));
        let session = Arc::new(Mutex::new(Session::new(
            id.clone(),
            llm,
            provider.to_string(),
            models,
            default_model,
            self.scanner.clone(),
            self.prompts.clone(),
            self.diagrams.clone(),
            self.base_directory.clone(),
            self.tool_patterns.clone(),
        )));
        sessions.insert(id, session.clone());
        session
    }

    pub fn get_session(&self, session_id: &str) -> Result<Arc<Mutex<Session>>, AppError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", session_id)))
    }

    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn drop_session(&self, session_id: &str) -> bool {
        self.sessions.lock().unwrap().remove(session_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::models::TokenUsage;
    use std::collections::VecDeque;

    struct ScriptedBackend {
        responses: VecDeque<String>,
        usage: TokenUsage,
        api_key_set: bool,
        pub contexts_seen: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<&str>) -> Self {
            ScriptedBackend {
                responses: responses.into_iter().map(String::from).collect(),
                usage: TokenUsage {
                    total_tokens: 42,
                    input_tokens: 30,
                    output_tokens: 12,
                    cached_tokens: 0,
                },
                api_key_set: true,
                contexts_seen: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ChatBackend for ScriptedBackend {
        fn ask(
            &mut self,
            _question: &str,
            _history: &[Message],
            codebase_content: &str,
            _model: &str,
        ) -> Result<String, AppError> {
            self.contexts_seen
                .lock()
                .unwrap()
                .push(codebase_content.to_string());
            self.responses
                .pop_front()
                .ok_or_else(|| AppError::Upstream("script exhausted".into()))
        }

        fn set_api_key(&mut self, api_key: &str) {
            self.api_key_set = !api_key.is_empty();
        }
        fn set_provider(&mut self, _provider: &str) {}
        fn has_api_key(&self) -> bool {
            self.api_key_set
        }
        fn last_usage(&self) -> TokenUsage {
            self.usage
        }
    }

    fn test_session(responses: Vec<&str>, base: &Path) -> (Session, Arc<Mutex<Vec<String>>>) {
        let backend = ScriptedBackend::new(responses);
        let contexts = backend.contexts_seen.clone();
        let session = Session::new(
            "test-session".to_string(),
            Box::new(backend),
            "openrouter".to_string(),
            vec!["model-a".to_string()],
            "model-a".to_string(),
            Arc::new(FileScanner::new(&[])),
            Arc::new(PromptLibrary::new(None)),
            Arc::new(DiagramService::with_executables(
                None,
                None,
                std::env::temp_dir(),
            )),
            base.to_path_buf(),
            vec![],
        );
        (session, contexts)
    }

    #[test]
    fn test_first_turn_injects_context_and_system_message() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "print('hello')").unwrap();

        let (mut session, contexts) = test_session(vec!["The answer."], dir.path());
        session.update_files(&["a.py".to_string()], true);
        let result = session.ask_question("Explain this").unwrap();

        // history = [system, user, assistant]
        assert_eq!(session.history.len(), 3);
        assert_eq!(session.history[0].role, "system");
        assert!(session.history[0].content.contains("print('hello')"));
        assert_eq!(session.history[1].role, "user");
        assert_eq!(session.history[2].role, "assistant");
        assert_eq!(session.persistent_files.len(), 1);

        // The provider received the file content as context
        assert!(contexts.lock().unwrap()[0].contains("print('hello')"));
        assert_eq!(result.tokens_used, 42);
        assert_eq!(result.question_index, 0);
    }

    #[test]
    fn test_second_turn_updates_single_system_message() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "A_CONTENT").unwrap();
        std::fs::write(dir.path().join("b.py"), "B_CONTENT").unwrap();

        let (mut session, contexts) = test_session(vec!["first", "second"], dir.path());
        session.update_files(&["a.py".to_string()], true);
        session.ask_question("Explain this").unwrap();

        session.update_files(&["a.py".to_string(), "b.py".to_string()], true);
        session.ask_question("Now consider b.py").unwrap();

        let system_count = session
            .history
            .iter()
            .filter(|m| m.role == "system")
            .count();
        assert_eq!(system_count, 1);
        assert_eq!(session.history[0].role, "system");
        assert!(session.system_message_invariant_holds());
        assert!(session.history[0].content.contains("B_CONTENT"));
        assert_eq!(session.history.len(), 5);

        // Second turn is not a first message or tool command: empty context
        assert_eq!(contexts.lock().unwrap()[1], "");
    }

    #[test]
    fn test_empty_question_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = test_session(vec![], dir.path());
        assert!(matches!(
            session.ask_question("   "),
            Err(AppError::Validation(_))
        ));
        assert!(session.question_log.is_empty());
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = test_session(vec!["x"], dir.path());
        session.set_api_key("");
        assert!(matches!(
            session.ask_question("hello"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_provider_failure_marks_question_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = test_session(vec![], dir.path());
        let err = session.ask_question("hello").unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
        assert_eq!(session.question_log[0].status, QuestionStatus::Failed);
        assert!(session.question_log[0].response.contains("script exhausted"));
        // The user message stays in history; no assistant entry was added
        assert_eq!(session.history.len(), 1);
    }

    #[test]
    fn test_empty_response_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = test_session(vec![""], dir.path());
        let result = session.ask_question("hello").unwrap();
        assert_eq!(result.raw_markdown, "");
        assert_eq!(session.history.last().unwrap().content, "");
        assert_eq!(session.question_log[0].status, QuestionStatus::Completed);
    }

    #[test]
    fn test_update_files_idempotent_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x").unwrap();
        let (mut session, _) = test_session(vec![], dir.path());

        let files = vec!["a.py".to_string(), "a.py".to_string()];
        session.update_files(&files, true);
        let first_selected = session.selected_files.clone();
        let first_persistent = session.persistent_files.clone();

        session.update_files(&files, true);
        assert_eq!(session.selected_files, first_selected);
        assert_eq!(session.persistent_files, first_persistent);
        assert_eq!(session.selected_files.len(), 1);
    }

    #[test]
    fn test_persistent_files_stay_subset_of_selected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x").unwrap();
        std::fs::write(dir.path().join("b.py"), "y").unwrap();
        let (mut session, _) = test_session(vec![], dir.path());

        session.update_files(&["a.py".to_string(), "b.py".to_string()], true);
        session.update_files(&["b.py".to_string()], false);

        assert!(session
            .persistent_files
            .iter()
            .all(|p| session.selected_files.contains(p)));
        assert_eq!(session.persistent_files.len(), 1);
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = test_session(vec![], dir.path());
        session.add_file("../../etc/passwd", false);
        assert!(session.selected_files.is_empty());
    }

    #[test]
    fn test_set_model_appends_unknown_model() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = test_session(vec![], dir.path());
        session.set_model("model-b");
        assert_eq!(session.selected_model, "model-b");
        assert!(session.available_models.contains(&"model-b".to_string()));
    }

    #[test]
    fn test_switching_provider_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = test_session(vec!["reply"], dir.path());
        session.ask_question("hello").unwrap();
        let history_before = session.history.clone();
        session.set_provider("openai");
        assert_eq!(session.history, history_before);
        assert_eq!(session.provider, "openai");
    }

    #[test]
    fn test_diagram_intent_detection() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _) = test_session(vec![], dir.path());
        assert!(session
            .detect_diagram_request("Generate a mermaid diagram of the flow")
            .is_some());
        assert!(session
            .detect_diagram_request("create a d2 overview")
            .is_some());
        assert!(session.detect_diagram_request("what is mermaid?").is_none());
        assert!(session.detect_diagram_request("draw something").is_none());
    }

    #[test]
    fn test_tool_command_matching_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, _) = test_session(vec![], dir.path());
        session.tool_patterns = vec!["list project files".to_string()];
        assert!(session.is_tool_command("please list the files in this project"));
        assert!(!session.is_tool_command("what is the weather"));
    }

    #[test]
    fn test_clear_conversation_preserves_configuration() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x").unwrap();
        let (mut session, _) = test_session(vec!["reply"], dir.path());
        session.update_files(&["a.py".to_string()], true);
        session.ask_question("hello").unwrap();
        session.clear_conversation();
        assert!(session.history.is_empty());
        assert!(session.question_log.is_empty());
        assert_eq!(session.selected_files.len(), 1);
    }

    #[test]
    fn test_registry_create_get_drop() {
        let config = AppConfig {
            api_key: "k".into(),
            provider: "openrouter".into(),
            models: vec!["m".into()],
            default_model: "m".into(),
            base_url: String::new(),
            code_path: std::env::temp_dir(),
            d2_executable_path: None,
            mermaid_executable_path: None,
            ignore_folders: vec![],
            prompts_dir: None,
            history_dir: std::env::temp_dir().join("history"),
            static_dir: std::env::temp_dir().join("static"),
            tool_patterns: vec![],
        };
        let registry = SessionRegistry::new(
            &config,
            Arc::new(FileScanner::new(&[])),
            Arc::new(PromptLibrary::new(None)),
            Arc::new(DiagramService::with_executables(
                None,
                None,
                std::env::temp_dir(),
            )),
        );

        let session = registry.create_session("k", "openrouter", vec!["m".into()], None, None);
        let id = session.lock().unwrap().id.clone();
        assert!(registry.get_session(&id).is_ok());
        assert_eq!(registry.list_ids(), vec![id.clone()]);

        // Re-creating with the same id replaces the session
        registry.create_session("k", "openrouter", vec!["m".into()], None, Some(&id));
        assert_eq!(registry.list_ids().len(), 1);

        assert!(registry.drop_session(&id));
        assert!(matches!(
            registry.get_session(&id),
            Err(AppError::NotFound(_))
        ));
    }
}
