// Web server modules for the code-analysis and diagram backend

pub mod c4; // C4 model to D2 conversion
pub mod cli; // External CLI tool adapter
pub mod config;
pub mod diagram; // D2/Mermaid validation and rendering
pub mod docs; // Documentation generator
pub mod error;
pub mod extract; // Code block extraction
pub mod history; // Conversation history files
pub mod llm; // LLM provider gateway
pub mod logger;
pub mod markdown;
pub mod models;
pub mod prompts; // Agent prompt library
pub mod repair; // Diagram validate-and-fix loop
pub mod request_parsing; // Request body parsing utilities
pub mod response_helpers; // Reusable HTTP response builders
pub mod routes;
pub mod scanner; // Codebase file scanner and cache
pub mod session; // Conversation sessions and registry
pub mod shell; // Shell session manager
pub mod websocket;
pub mod websocket_utils; // WebSocket helper functions

use std::sync::Arc;

use self::config::AppConfig;
use self::diagram::DiagramService;
use self::docs::DocService;
use self::history::HistoryLogger;
use self::prompts::PromptLibrary;
use self::scanner::FileScanner;
use self::session::SessionRegistry;
use self::shell::ShellManager;

// Application state shared across all request handlers
pub struct AppState {
    pub config: AppConfig,
    pub registry: SessionRegistry,
    pub shell: Arc<ShellManager>,
    pub history: HistoryLogger,
    pub diagrams: Arc<DiagramService>,
    pub docs: Arc<DocService>,
    pub scanner: Arc<FileScanner>,
    pub prompts: Arc<PromptLibrary>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let scanner = Arc::new(FileScanner::new(&config.ignore_folders));
        let prompts = Arc::new(PromptLibrary::new(config.prompts_dir.clone()));
        let diagrams = Arc::new(DiagramService::new(&config));
        let docs = Arc::new(DocService::new(&config, scanner.clone(), prompts.clone()));
        let registry = SessionRegistry::new(
            &config,
            scanner.clone(),
            prompts.clone(),
            diagrams.clone(),
        );
        let shell = Arc::new(ShellManager::new(&config.code_path));
        let history = HistoryLogger::new(&config.history_dir);

        AppState {
            config,
            registry,
            shell,
            history,
            diagrams,
            docs,
            scanner,
            prompts,
        }
    }
}

pub type SharedState = Arc<AppState>;
