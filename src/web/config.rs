use std::env;
use std::path::PathBuf;

/// Runtime configuration resolved from environment variables once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_key: String,
    pub provider: String,
    pub models: Vec<String>,
    pub default_model: String,
    pub base_url: String,
    pub code_path: PathBuf,
    pub d2_executable_path: Option<String>,
    pub mermaid_executable_path: Option<String>,
    pub ignore_folders: Vec<String>,
    pub prompts_dir: Option<PathBuf>,
    pub history_dir: PathBuf,
    pub static_dir: PathBuf,
    /// Named command phrases (TOOL* environment entries) used for
    /// tool-command intent matching.
    pub tool_patterns: Vec<String>,
}

const DEFAULT_MODELS: &[&str] = &[
    "openai/gpt-4",
    "anthropic/claude-3-haiku",
    "anthropic/claude-3-sonnet",
    "meta-llama/llama-3.1-8b-instruct:free",
    "google/gemini-pro-1.5",
];

const DEFAULT_IGNORE_FOLDERS: &str = "venv,.venv,env,__pycache__,node_modules,dist,build,.git,\
.mypy_cache,.claude,.github,.vscode,.idea,.tox,.pytest_cache,logs,results,target";

impl AppConfig {
    pub fn from_env() -> Self {
        let models_str = env::var("MODELS").unwrap_or_default();
        let models: Vec<String> = if models_str.trim().is_empty() {
            DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
        } else {
            models_str
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect()
        };

        let default_model = env::var("DEFAULT_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| models.first().cloned().unwrap_or_default());

        let ignore_str =
            env::var("IGNORE_FOLDERS").unwrap_or_else(|_| DEFAULT_IGNORE_FOLDERS.to_string());
        let ignore_folders: Vec<String> = ignore_str
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();

        let code_path = env::var("CODE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let code_path = code_path.canonicalize().unwrap_or(code_path);

        // TOOL* entries name command phrases like "generate a diagram of"
        let mut tool_patterns: Vec<String> = env::vars()
            .filter(|(key, _)| key.starts_with("TOOL"))
            .map(|(_, value)| value)
            .filter(|v| !v.trim().is_empty())
            .collect();
        tool_patterns.sort();

        AppConfig {
            api_key: env::var("API_KEY").unwrap_or_default(),
            provider: env::var("PROVIDER").unwrap_or_else(|_| "openrouter".to_string()),
            models,
            default_model,
            base_url: env::var("BASE_URL").unwrap_or_default(),
            code_path,
            d2_executable_path: env::var("D2_EXECUTABLE_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty()),
            mermaid_executable_path: env::var("MERMAID_EXECUTABLE_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty()),
            ignore_folders,
            prompts_dir: env::var("PROMPTS_DIR").ok().map(PathBuf::from),
            history_dir: env::var("HISTORY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("history")),
            static_dir: PathBuf::from("static"),
            tool_patterns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_models_used_when_env_empty() {
        // Not using env mutation here to keep tests parallel-safe; exercise
        // the parsing paths directly instead.
        let models: Vec<String> = "a/b, c/d ,"
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        assert_eq!(models, vec!["a/b", "c/d"]);
    }

    #[test]
    fn test_default_ignore_folders_contain_common_entries() {
        assert!(DEFAULT_IGNORE_FOLDERS.contains("node_modules"));
        assert!(DEFAULT_IGNORE_FOLDERS.contains(".git"));
        assert!(DEFAULT_IGNORE_FOLDERS.contains("__pycache__"));
    }
}
