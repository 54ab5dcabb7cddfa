// Documentation generator: lightweight code-structure analysis over the
// selected files, AI-powered generation steered by a documentation agent
// prompt, with template-based fallback, derived Mermaid diagrams, usage
// examples and a downloadable ZIP package.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::web::config::AppConfig;
use crate::web::error::AppError;
use crate::web::llm::{ChatBackend, HttpChatClient};
use crate::web::markdown::markdown_to_html;
use crate::web::models::TokenUsage;
use crate::web::prompts::PromptLibrary;
use crate::web::scanner::FileScanner;
use crate::{sys_info, sys_warn};

pub const DOC_TYPES: &[&str] = &["api", "readme", "architecture", "examples", "all"];
pub const EXPORT_FORMATS: &[&str] = &["markdown", "html"];

const DEFAULT_DOC_AGENT_PROMPT: &str = "You are a technical documentation specialist. Generate comprehensive\n\
{documentation_type} documentation in {output_format} format for the codebase\n\
outlined below, aimed at {target_audience}. Cover public APIs, usage and\n\
architecture where relevant. Use clear, professional language and proper\n\
formatting.\n\n{template_instructions}\n\nCodebase outline:\n\n{codebase_content}";

lazy_static! {
    static ref RUST_USE: Regex = Regex::new(r"(?m)^\s*(?:pub\s+)?use\s+([^;]+);").unwrap();
    static ref RUST_STRUCT: Regex =
        Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait)\s+(\w+)").unwrap();
    static ref RUST_FN: Regex =
        Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(async\s+)?fn\s+(\w+)\s*\(([^)]*)").unwrap();
    static ref RUST_CONST: Regex =
        Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(\w+)\s*:").unwrap();
    static ref PY_IMPORT: Regex =
        Regex::new(r"(?m)^(?:import\s+([\w.]+)|from\s+([\w.]+)\s+import)").unwrap();
    static ref PY_CLASS: Regex = Regex::new(r"(?m)^class\s+(\w+)(?:\(([^)]*)\))?\s*:").unwrap();
    static ref PY_DEF: Regex = Regex::new(r"(?m)^(\s*)(?:async\s+)?def\s+(\w+)\s*\(([^)]*)").unwrap();
    static ref PY_CONST: Regex = Regex::new(r"(?m)^([A-Z][A-Z0-9_]+)\s*=").unwrap();
    static ref JS_IMPORT: Regex =
        Regex::new(r#"(?m)(?:import\s+.*?from\s+['"]([^'"]+)['"]|require\(['"]([^'"]+)['"]\))"#)
            .unwrap();
    static ref JS_CLASS: Regex =
        Regex::new(r"(?m)^\s*(?:export\s+)?class\s+(\w+)(?:\s+extends\s+(\w+))?").unwrap();
    static ref JS_FN: Regex = Regex::new(
        r"(?m)^\s*(?:export\s+)?(?:(async)\s+)?function\s+(\w+)\s*\(([^)]*)|^\s*(?:export\s+)?const\s+(\w+)\s*=\s*(?:async\s+)?\(([^)]*)\)\s*=>"
    )
    .unwrap();
    static ref JS_CONST: Regex = Regex::new(r"(?m)^\s*(?:export\s+)?const\s+([A-Z][A-Z0-9_]+)\s*=").unwrap();
    static ref GO_IMPORT: Regex = Regex::new(r#"(?m)^\s*(?:import\s+)?"([\w./-]+)"$"#).unwrap();
    static ref GO_FUNC: Regex =
        Regex::new(r"(?m)^func\s+(?:\([^)]*\)\s+)?(\w+)\s*\(([^)]*)").unwrap();
    static ref GO_TYPE: Regex = Regex::new(r"(?m)^type\s+(\w+)\s+(?:struct|interface)").unwrap();
    static ref GO_CONST: Regex = Regex::new(r"(?m)^const\s+(\w+)").unwrap();
}

#[derive(Clone, Debug, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub line_number: usize,
    pub is_async: bool,
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClassInfo {
    pub name: String,
    pub line_number: usize,
    pub base_classes: Vec<String>,
    pub methods: Vec<FunctionInfo>,
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ComplexityMetrics {
    pub lines_of_code: usize,
    pub functions: usize,
    pub classes: usize,
    pub complexity_score: usize,
}

/// Analyzed shape of one source file.
#[derive(Clone, Debug, Serialize)]
pub struct CodeStructure {
    pub file_path: String,
    pub language: String,
    pub imports: Vec<String>,
    pub classes: Vec<ClassInfo>,
    pub functions: Vec<FunctionInfo>,
    pub constants: Vec<String>,
    pub complexity: ComplexityMetrics,
}

#[derive(Debug, Deserialize)]
pub struct DocRequest {
    pub file_paths: Vec<String>,
    pub documentation_type: String, // api | readme | architecture | examples | all
    #[serde(default = "default_markdown")]
    pub output_format: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default = "default_true")]
    pub include_examples: bool,
    #[serde(default = "default_true")]
    pub include_diagrams: bool,
    #[serde(default = "default_audience")]
    pub target_audience: String, // developers | users | mixed
}

fn default_markdown() -> String {
    "markdown".to_string()
}

fn default_true() -> bool {
    true
}

fn default_audience() -> String {
    "developers".to_string()
}

#[derive(Clone, Debug, Serialize)]
pub struct DocDiagram {
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub code: String,
    pub title: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct UsageExample {
    pub language: String,
    pub title: String,
    pub code: String,
    pub description: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct DocResult {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub diagrams: Vec<DocDiagram>,
    pub examples: Vec<UsageExample>,
    pub references: Vec<String>,
    pub generated_at: String,
    pub processing_time: f64,
    pub token_usage: TokenUsage,
}

/// Built-in documentation templates: (name, title, description, instructions,
/// fallback content).
const TEMPLATES: &[(&str, &str, &str, &str, &str)] = &[
    (
        "api_documentation",
        "API Documentation",
        "Reference documentation for public APIs",
        "Document every public function, type and endpoint: signature, parameters, return values and error cases. Group by module.",
        "# API Documentation\n\nGenerated: {generation_date}\n\nLanguages: {languages}\n\nPublic surface: {total_functions} functions across {total_classes} types.\n",
    ),
    (
        "readme_template",
        "README",
        "Project README with overview, setup and usage",
        "Write a project README: a short overview, feature list, installation steps, quick-start usage and a configuration section.",
        "# {project_name}\n\nGenerated: {generation_date}\n\nA project written in {languages} with {total_functions} functions and {total_classes} types.\n",
    ),
    (
        "architecture_template",
        "Architecture Overview",
        "High-level architecture and module relationships",
        "Describe the system architecture: major modules, their responsibilities, how data flows between them, and notable design decisions.",
        "# Architecture Overview\n\nGenerated: {generation_date}\n\nLanguages: {languages}\n\nModules analyzed: {total_classes} types, {total_functions} functions.\n",
    ),
    (
        "examples_template",
        "Usage Examples",
        "Practical usage examples for the public API",
        "Produce practical, runnable usage examples for the most important public functions and types, with short explanations.",
        "# Usage Examples\n\nGenerated: {generation_date}\n\nExamples cover {total_functions} functions across {total_classes} types.\n",
    ),
    (
        "comprehensive_template",
        "Comprehensive Documentation",
        "Full documentation: overview, API reference, architecture and examples",
        "Produce complete documentation: project overview, architecture description, full API reference and usage examples, in that order.",
        "# Documentation\n\nGenerated: {generation_date}\n\nLanguages: {languages}\n\n{total_functions} functions, {total_classes} types.\n",
    ),
    (
        "default_template",
        "Documentation",
        "General documentation",
        "Document the provided codebase clearly and concisely.",
        "# {documentation_type} Documentation\n\nGenerated: {generation_date}\n\nLanguages: {languages}\n\n{total_functions} functions, {total_classes} types.\n",
    ),
];

pub struct DocService {
    scanner: Arc<FileScanner>,
    prompts: Arc<PromptLibrary>,
    code_path: PathBuf,
    api_key: String,
    provider: String,
    base_url: String,
    default_model: String,
}

impl DocService {
    pub fn new(config: &AppConfig, scanner: Arc<FileScanner>, prompts: Arc<PromptLibrary>) -> Self {
        DocService {
            scanner,
            prompts,
            code_path: config.code_path.clone(),
            api_key: config.api_key.clone(),
            provider: config.provider.clone(),
            base_url: config.base_url.clone(),
            default_model: config.default_model.clone(),
        }
    }

    /// Generate documentation for the requested files: analyze, ask the
    /// model (template fallback when the provider is unavailable), derive
    /// diagrams and examples.
    pub fn generate(&self, request: &DocRequest) -> Result<DocResult, AppError> {
        if !DOC_TYPES.contains(&request.documentation_type.as_str()) {
            return Err(AppError::Validation(format!(
                "Unknown documentation type: {}",
                request.documentation_type
            )));
        }
        let start = Instant::now();

        sys_info!(
            "[DOCS] Generating {} documentation for {} files",
            request.documentation_type,
            request.file_paths.len()
        );

        let structures = self.analyze(&request.file_paths);
        let outline = build_outline(&structures);
        let template = select_template(request);

        let mut token_usage = TokenUsage::default();
        let content = match self.generate_with_ai(&outline, request, template, &mut token_usage) {
            Ok(content) => content,
            Err(reason) => {
                sys_warn!("[DOCS] AI generation unavailable, using template: {}", reason);
                render_template_fallback(template, request, &structures)
            }
        };

        let diagrams = if request.include_diagrams {
            derive_diagrams(&structures)
        } else {
            Vec::new()
        };
        let examples = if request.include_examples {
            derive_examples(&structures)
        } else {
            Vec::new()
        };

        let mut languages: Vec<String> =
            structures.iter().map(|s| s.language.clone()).collect();
        languages.sort();
        languages.dedup();

        let processing_time = start.elapsed().as_secs_f64();
        sys_info!(
            "[DOCS] Documentation generation completed in {:.2}s",
            processing_time
        );

        Ok(DocResult {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            metadata: json!({
                "file_count": request.file_paths.len(),
                "documentation_type": request.documentation_type,
                "output_format": request.output_format,
                "template": template,
                "languages": languages,
                "total_functions": structures.iter().map(|s| s.functions.len()).sum::<usize>(),
                "total_classes": structures.iter().map(|s| s.classes.len()).sum::<usize>(),
            }),
            diagrams,
            examples,
            references: structures.iter().map(|s| s.file_path.clone()).collect(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            processing_time,
            token_usage,
        })
    }

    /// Analyze the structure of the provided files. Unsupported languages
    /// and unreadable paths are skipped.
    pub fn analyze(&self, file_paths: &[String]) -> Vec<CodeStructure> {
        let mut structures = Vec::new();
        for file_path in file_paths {
            let language = match detect_language(file_path) {
                Some(language) => language,
                None => {
                    sys_warn!("[DOCS] Unsupported language for file: {}", file_path);
                    continue;
                }
            };
            let resolved = match self.resolve_path(file_path) {
                Some(path) => path,
                None => {
                    sys_warn!("[DOCS] Path resolution failed for {}", file_path);
                    continue;
                }
            };
            let content = self.scanner.read_file(&resolved);
            if content.starts_with("Error reading file") {
                continue;
            }
            structures.push(analyze_source(file_path, language, &content));
        }
        structures
    }

    fn resolve_path(&self, file_path: &str) -> Option<PathBuf> {
        let candidate = std::path::Path::new(file_path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.code_path.join(candidate)
        };
        let canonical = joined.canonicalize().ok()?;
        let base = self.code_path.canonicalize().ok()?;
        if canonical.starts_with(&base) {
            Some(canonical)
        } else {
            None
        }
    }

    fn generate_with_ai(
        &self,
        outline: &str,
        request: &DocRequest,
        template: &str,
        token_usage: &mut TokenUsage,
    ) -> Result<String, String> {
        if self.api_key.trim().is_empty() {
            return Err("API key is not configured".to_string());
        }

        let agent_prompt = self
            .prompts
            .named_prompt("documentation-generator.md")
            .unwrap_or_else(|| DEFAULT_DOC_AGENT_PROMPT.to_string());
        let instructions = template_field(template, 3);

        let question = agent_prompt
            .replace("{codebase_content}", outline)
            .replace("{documentation_type}", &request.documentation_type)
            .replace("{output_format}", &request.output_format)
            .replace("{target_audience}", &request.target_audience)
            .replace("{template_instructions}", instructions);

        let mut client = HttpChatClient::new(&self.api_key, &self.provider, &self.base_url);
        let response = client
            .ask(&question, &[], "", &self.default_model)
            .map_err(|e| e.to_string())?;
        *token_usage = client.last_usage();
        Ok(response)
    }

    /// Convert generated documentation to an export format.
    pub fn export(&self, content: &str, format: &str, title: &str) -> Result<(String, &'static str), AppError> {
        match format {
            "markdown" => Ok((content.to_string(), "text/markdown")),
            "html" => Ok((wrap_html_document(title, &markdown_to_html(content)), "text/html")),
            other => Err(AppError::Validation(format!(
                "Unsupported export format: {}",
                other
            ))),
        }
    }

    /// Bundle a documentation result, its metadata, a file listing and
    /// (optionally) the analyzed source files into one ZIP archive.
    pub fn create_package(
        &self,
        result: &DocResult,
        file_paths: &[String],
        include_source_files: bool,
    ) -> Result<Vec<u8>, AppError> {
        let session_guid: String = result.id.chars().take(8).collect();
        sys_info!("[DOCS] Creating documentation package {}", session_guid);

        let doc_type = result.metadata["documentation_type"]
            .as_str()
            .unwrap_or("documentation")
            .to_string();

        let cursor = std::io::Cursor::new(Vec::new());
        let mut archive = zip::ZipWriter::new(cursor);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let zip_err = |e: zip::result::ZipError| AppError::Upstream(format!("ZIP error: {}", e));
        let io_err = |e: std::io::Error| AppError::Upstream(format!("ZIP write error: {}", e));

        archive
            .start_file(format!("{}-{}.md", session_guid, doc_type), options)
            .map_err(zip_err)?;
        archive.write_all(result.content.as_bytes()).map_err(io_err)?;

        let metadata = json!({
            "metadata": result.metadata,
            "generated_at": result.generated_at,
            "processing_time": result.processing_time,
            "token_usage": result.token_usage,
        });
        archive
            .start_file(
                format!("{}-{}.metadata.json", session_guid, doc_type),
                options,
            )
            .map_err(zip_err)?;
        archive
            .write_all(serde_json::to_string_pretty(&metadata).unwrap_or_default().as_bytes())
            .map_err(io_err)?;

        archive
            .start_file(format!("{}-file-listing.json", session_guid), options)
            .map_err(zip_err)?;
        archive
            .write_all(
                serde_json::to_string_pretty(&self.file_listing(file_paths, &session_guid))
                    .unwrap_or_default()
                    .as_bytes(),
            )
            .map_err(io_err)?;

        if include_source_files {
            for file_path in file_paths {
                let resolved = match self.resolve_path(file_path) {
                    Some(path) => path,
                    None => continue,
                };
                let name = resolved
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "source".to_string());
                archive
                    .start_file(format!("{}-source-{}", session_guid, name), options)
                    .map_err(zip_err)?;
                archive
                    .write_all(self.scanner.read_file(&resolved).as_bytes())
                    .map_err(io_err)?;
            }
        }

        archive
            .start_file("README.md", options)
            .map_err(zip_err)?;
        let readme = format!(
            "# Documentation Package\n\nGenerated: {}\nSession: {}\nTotal Files: {}\n\n\
             Contents: documentation, metadata, file listing{}.\n",
            result.generated_at,
            session_guid,
            file_paths.len(),
            if include_source_files {
                " and source files"
            } else {
                ""
            }
        );
        archive.write_all(readme.as_bytes()).map_err(io_err)?;

        let cursor = archive.finish().map_err(zip_err)?;
        Ok(cursor.into_inner())
    }

    fn file_listing(&self, file_paths: &[String], session_guid: &str) -> serde_json::Value {
        let files: Vec<serde_json::Value> = file_paths
            .iter()
            .map(|file_path| {
                let size = self
                    .resolve_path(file_path)
                    .and_then(|p| std::fs::metadata(p).ok())
                    .map(|m| m.len())
                    .unwrap_or(0);
                json!({
                    "path": file_path,
                    "name": std::path::Path::new(file_path)
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    "size": size,
                })
            })
            .collect();
        let total_size: u64 = files.iter().filter_map(|f| f["size"].as_u64()).sum();
        json!({
            "session_guid": session_guid,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "total_files": file_paths.len(),
            "total_size": total_size,
            "files": files,
        })
    }
}

/// Template descriptors as served by the templates endpoint.
pub fn template_list() -> Vec<serde_json::Value> {
    TEMPLATES
        .iter()
        .map(|entry| {
            json!({
                "name": entry.0,
                "title": entry.1,
                "description": entry.2,
                "supported_formats": EXPORT_FORMATS,
                "instructions": entry.3,
            })
        })
        .collect()
}

pub fn detect_language(file_path: &str) -> Option<&'static str> {
    let extension = std::path::Path::new(file_path)
        .extension()?
        .to_string_lossy()
        .to_lowercase();
    match extension.as_str() {
        "rs" => Some("rust"),
        "py" => Some("python"),
        "js" | "jsx" => Some("javascript"),
        "ts" | "tsx" => Some("typescript"),
        "go" => Some("go"),
        _ => None,
    }
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

/// Single-pass regex analysis of one file.
pub fn analyze_source(file_path: &str, language: &str, content: &str) -> CodeStructure {
    let (imports, mut classes, functions, constants) = match language {
        "rust" => analyze_rust(content),
        "python" => analyze_python(content),
        "javascript" | "typescript" => analyze_js(content),
        "go" => analyze_go(content),
        _ => (Vec::new(), Vec::new(), Vec::new(), Vec::new()),
    };
    classes.sort_by_key(|c| c.line_number);

    let complexity = complexity_of(content, language, functions.len(), classes.len());

    CodeStructure {
        file_path: file_path.to_string(),
        language: language.to_string(),
        imports,
        classes,
        functions,
        constants,
        complexity,
    }
}

type Analysis = (Vec<String>, Vec<ClassInfo>, Vec<FunctionInfo>, Vec<String>);

fn analyze_rust(content: &str) -> Analysis {
    let imports = RUST_USE
        .captures_iter(content)
        .map(|c| c[1].trim().to_string())
        .collect();
    let classes = RUST_STRUCT
        .captures_iter(content)
        .map(|c| ClassInfo {
            name: c[1].to_string(),
            line_number: line_of(content, c.get(0).unwrap().start()),
            base_classes: Vec::new(),
            methods: Vec::new(),
        })
        .collect();
    let functions = RUST_FN
        .captures_iter(content)
        .map(|c| FunctionInfo {
            name: c[2].to_string(),
            line_number: line_of(content, c.get(0).unwrap().start()),
            is_async: c.get(1).is_some(),
            args: split_args(&c[3]),
        })
        .collect();
    let constants = RUST_CONST
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect();
    (imports, classes, functions, constants)
}

fn analyze_python(content: &str) -> Analysis {
    let imports = PY_IMPORT
        .captures_iter(content)
        .filter_map(|c| {
            c.get(1)
                .or_else(|| c.get(2))
                .map(|m| m.as_str().to_string())
        })
        .collect();

    let mut classes: Vec<ClassInfo> = PY_CLASS
        .captures_iter(content)
        .map(|c| ClassInfo {
            name: c[1].to_string(),
            line_number: line_of(content, c.get(0).unwrap().start()),
            base_classes: c
                .get(2)
                .map(|b| split_args(b.as_str()))
                .unwrap_or_default(),
            methods: Vec::new(),
        })
        .collect();

    // Indented defs attach to the nearest preceding class; top-level defs
    // are free functions.
    let mut functions = Vec::new();
    for caps in PY_DEF.captures_iter(content) {
        let info = FunctionInfo {
            name: caps[2].to_string(),
            line_number: line_of(content, caps.get(0).unwrap().start()),
            is_async: caps.get(0).unwrap().as_str().contains("async "),
            args: split_args(&caps[3]),
        };
        if caps[1].is_empty() {
            functions.push(info);
        } else if let Some(class) = classes
            .iter_mut()
            .filter(|c| c.line_number < info.line_number)
            .last()
        {
            class.methods.push(info);
        }
    }

    let constants = PY_CONST
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect();
    (imports, classes, functions, constants)
}

fn analyze_js(content: &str) -> Analysis {
    let imports = JS_IMPORT
        .captures_iter(content)
        .filter_map(|c| {
            c.get(1)
                .or_else(|| c.get(2))
                .map(|m| m.as_str().to_string())
        })
        .collect();
    let classes = JS_CLASS
        .captures_iter(content)
        .map(|c| ClassInfo {
            name: c[1].to_string(),
            line_number: line_of(content, c.get(0).unwrap().start()),
            base_classes: c.get(2).map(|b| vec![b.as_str().to_string()]).unwrap_or_default(),
            methods: Vec::new(),
        })
        .collect();
    let functions = JS_FN
        .captures_iter(content)
        .filter_map(|c| {
            let (name, args) = match (c.get(2), c.get(4)) {
                (Some(name), _) => (name.as_str(), c.get(3).map(|a| a.as_str()).unwrap_or("")),
                (None, Some(name)) => (name.as_str(), c.get(5).map(|a| a.as_str()).unwrap_or("")),
                _ => return None,
            };
            Some(FunctionInfo {
                name: name.to_string(),
                line_number: line_of(content, c.get(0).unwrap().start()),
                is_async: c.get(0).unwrap().as_str().contains("async"),
                args: split_args(args),
            })
        })
        .collect();
    let constants = JS_CONST
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect();
    (imports, classes, functions, constants)
}

fn analyze_go(content: &str) -> Analysis {
    let imports = GO_IMPORT
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect();
    let classes = GO_TYPE
        .captures_iter(content)
        .map(|c| ClassInfo {
            name: c[1].to_string(),
            line_number: line_of(content, c.get(0).unwrap().start()),
            base_classes: Vec::new(),
            methods: Vec::new(),
        })
        .collect();
    let functions = GO_FUNC
        .captures_iter(content)
        .map(|c| FunctionInfo {
            name: c[1].to_string(),
            line_number: line_of(content, c.get(0).unwrap().start()),
            is_async: false,
            args: split_args(&c[2]),
        })
        .collect();
    let constants = GO_CONST
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect();
    (imports, classes, functions, constants)
}

fn complexity_of(
    content: &str,
    language: &str,
    functions: usize,
    classes: usize,
) -> ComplexityMetrics {
    let comment_marker = match language {
        "python" => "#",
        _ => "//",
    };
    let lines_of_code = content
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with(comment_marker)
        })
        .count();

    let control_keywords: &[&str] = match language {
        "rust" => &["if ", "for ", "while ", "match ", "loop "],
        "go" => &["if ", "for ", "switch ", "select ", "go ", "defer "],
        "python" => &["if ", "for ", "while ", "try:", "with "],
        _ => &["if ", "for ", "while ", "switch ", "try "],
    };
    let complexity_score = control_keywords
        .iter()
        .map(|keyword| content.matches(keyword).count())
        .sum();

    ComplexityMetrics {
        lines_of_code,
        functions,
        classes,
        complexity_score,
    }
}

/// Condensed per-file outline sent to the model instead of raw sources.
pub fn build_outline(structures: &[CodeStructure]) -> String {
    let mut parts = Vec::new();
    for structure in structures {
        parts.push(format!("## File: {}", structure.file_path));
        parts.push(format!("**Language:** {}", structure.language));

        if !structure.classes.is_empty() {
            parts.push("\n### Types:".to_string());
            for class in &structure.classes {
                parts.push(format!("- **{}** (line {})", class.name, class.line_number));
                for method in class.methods.iter().take(10) {
                    parts.push(format!("  - {}({})", method.name, method.args.join(", ")));
                }
            }
        }
        if !structure.functions.is_empty() {
            parts.push("\n### Functions:".to_string());
            for function in &structure.functions {
                parts.push(format!(
                    "- **{}({})** (line {})",
                    function.name,
                    function.args.join(", "),
                    function.line_number
                ));
            }
        }
        if !structure.imports.is_empty() {
            parts.push("\n### Imports:".to_string());
            for import in structure.imports.iter().take(10) {
                parts.push(format!("- {}", import));
            }
            if structure.imports.len() > 10 {
                parts.push(format!(
                    "- ... and {} more imports",
                    structure.imports.len() - 10
                ));
            }
        }
        parts.push(format!("\n{}\n", "-".repeat(50)));
    }
    parts.join("\n")
}

fn select_template(request: &DocRequest) -> &'static str {
    if let Some(requested) = request.template.as_deref() {
        if let Some(entry) = TEMPLATES.iter().find(|entry| entry.0 == requested) {
            return entry.0;
        }
    }
    match request.documentation_type.as_str() {
        "api" => "api_documentation",
        "readme" => "readme_template",
        "architecture" => "architecture_template",
        "examples" => "examples_template",
        "all" => "comprehensive_template",
        _ => "default_template",
    }
}

fn template_field(name: &str, index: usize) -> &'static str {
    let entry = TEMPLATES
        .iter()
        .find(|entry| entry.0 == name)
        .unwrap_or(&TEMPLATES[TEMPLATES.len() - 1]);
    match index {
        3 => entry.3,
        _ => entry.4,
    }
}

/// Offline fallback: fill the template with what the analysis found.
fn render_template_fallback(
    template: &str,
    request: &DocRequest,
    structures: &[CodeStructure],
) -> String {
    let mut languages: Vec<String> = structures.iter().map(|s| s.language.clone()).collect();
    languages.sort();
    languages.dedup();
    let languages = if languages.is_empty() {
        "Unknown".to_string()
    } else {
        languages.join(", ")
    };

    template_field(template, 4)
        .replace("{project_name}", "Generated Documentation")
        .replace("{documentation_type}", &request.documentation_type)
        .replace(
            "{generation_date}",
            &chrono::Local::now().format("%Y-%m-%d").to_string(),
        )
        .replace("{languages}", &languages)
        .replace(
            "{total_functions}",
            &structures
                .iter()
                .map(|s| s.functions.len())
                .sum::<usize>()
                .to_string(),
        )
        .replace(
            "{total_classes}",
            &structures
                .iter()
                .map(|s| s.classes.len())
                .sum::<usize>()
                .to_string(),
        )
}

/// Mermaid dependency and class diagrams derived from the analysis.
pub fn derive_diagrams(structures: &[CodeStructure]) -> Vec<DocDiagram> {
    let mut diagrams = Vec::new();

    let mut lines = vec!["graph TD".to_string()];
    let mut seen = std::collections::HashSet::new();
    for structure in structures {
        let file_node = node_id(&structure.file_path);
        if seen.insert(file_node.clone()) {
            lines.push(format!("    {}[{}]", file_node, structure.file_path));
        }
        for import in structure.imports.iter().take(10) {
            let import_node = node_id(import);
            if seen.insert(import_node.clone()) {
                lines.push(format!("    {}[{}]", import_node, import));
            }
            lines.push(format!("    {} --> {}", file_node, import_node));
        }
    }
    if lines.len() > 1 {
        diagrams.push(DocDiagram {
            kind: "dependency_diagram".to_string(),
            format: "mermaid".to_string(),
            code: lines.join("\n"),
            title: "Dependency Diagram".to_string(),
        });
    }

    if structures.iter().any(|s| !s.classes.is_empty()) {
        let mut lines = vec!["classDiagram".to_string()];
        for structure in structures {
            for class in &structure.classes {
                lines.push(format!("    class {} {{", class.name));
                for method in &class.methods {
                    let name = if method.is_async {
                        format!("async {}", method.name)
                    } else {
                        method.name.clone()
                    };
                    lines.push(format!("        +{}()", name));
                }
                lines.push("    }".to_string());
                for base in &class.base_classes {
                    lines.push(format!("    {} <|-- {}", base, class.name));
                }
            }
        }
        diagrams.push(DocDiagram {
            kind: "class_diagram".to_string(),
            format: "mermaid".to_string(),
            code: lines.join("\n"),
            title: "Class Diagram".to_string(),
        });
    }

    diagrams
}

fn node_id(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Synthesized usage snippets for public classes and functions.
pub fn derive_examples(structures: &[CodeStructure]) -> Vec<UsageExample> {
    let mut examples = Vec::new();
    for structure in structures {
        match structure.language.as_str() {
            "python" => {
                for class in &structure.classes {
                    if class.methods.is_empty() {
                        continue;
                    }
                    let mut code = format!("# Example: Using {}\n", class.name);
                    code.push_str(&format!("instance = {}()\n", class.name));
                    for method in class
                        .methods
                        .iter()
                        .filter(|m| !m.name.starts_with('_'))
                        .take(3)
                    {
                        code.push_str(&format!("result = instance.{}()\n", method.name));
                    }
                    examples.push(UsageExample {
                        language: "python".to_string(),
                        title: format!("Using {}", class.name),
                        code,
                        description: format!("Basic usage example for the {} class", class.name),
                    });
                }
                for function in structure
                    .functions
                    .iter()
                    .filter(|f| !f.name.starts_with('_'))
                {
                    examples.push(UsageExample {
                        language: "python".to_string(),
                        title: format!("Calling {}", function.name),
                        code: format!(
                            "# Example: Calling {}\nresult = {}({})\n",
                            function.name,
                            function.name,
                            function.args.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
                        ),
                        description: format!("Example usage of the {} function", function.name),
                    });
                }
            }
            "javascript" | "typescript" => {
                for class in &structure.classes {
                    if class.methods.is_empty() && class.base_classes.is_empty() {
                        continue;
                    }
                    examples.push(UsageExample {
                        language: structure.language.clone(),
                        title: format!("Using {}", class.name),
                        code: format!(
                            "// Example: Using {}\nconst instance = new {}();\n",
                            class.name, class.name
                        ),
                        description: format!("Basic usage example for the {} class", class.name),
                    });
                }
                for function in structure
                    .functions
                    .iter()
                    .filter(|f| !f.name.starts_with('_'))
                {
                    examples.push(UsageExample {
                        language: structure.language.clone(),
                        title: format!("Calling {}", function.name),
                        code: format!(
                            "// Example: Calling {}\nconst result = {}({});\n",
                            function.name,
                            function.name,
                            function.args.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
                        ),
                        description: format!("Example usage of the {} function", function.name),
                    });
                }
            }
            _ => {}
        }
    }
    examples
}

/// Full HTML document wrapper for exported documentation.
fn wrap_html_document(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
         <style>\nbody {{ font-family: sans-serif; max-width: 900px; margin: 2em auto; \
         line-height: 1.5; }}\npre {{ background: #f5f5f5; padding: 1em; overflow-x: auto; }}\n\
         code {{ font-family: monospace; }}\n</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        title = title,
        body = body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_workspace(dir: &std::path::Path) -> DocService {
        let config = AppConfig {
            api_key: String::new(), // no provider in tests: template fallback
            provider: "openrouter".to_string(),
            models: vec!["m".to_string()],
            default_model: "m".to_string(),
            base_url: String::new(),
            code_path: dir.to_path_buf(),
            d2_executable_path: None,
            mermaid_executable_path: None,
            ignore_folders: vec![],
            prompts_dir: None,
            history_dir: dir.join("history"),
            static_dir: dir.join("static"),
            tool_patterns: vec![],
        };
        DocService::new(
            &config,
            Arc::new(FileScanner::new(&[])),
            Arc::new(PromptLibrary::new(None)),
        )
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("src/main.rs"), Some("rust"));
        assert_eq!(detect_language("app.py"), Some("python"));
        assert_eq!(detect_language("ui.tsx"), Some("typescript"));
        assert_eq!(detect_language("server.go"), Some("go"));
        assert_eq!(detect_language("notes.txt"), None);
        assert_eq!(detect_language("Makefile"), None);
    }

    #[test]
    fn test_analyze_rust_source() {
        let content = "use std::fs;\n\npub struct Widget;\n\npub async fn fetch(url: &str) -> String {\n    if true { }\n    String::new()\n}\n\nconst LIMIT: usize = 10;\n";
        let structure = analyze_source("src/widget.rs", "rust", content);
        assert_eq!(structure.imports, vec!["std::fs"]);
        assert_eq!(structure.classes.len(), 1);
        assert_eq!(structure.classes[0].name, "Widget");
        assert_eq!(structure.functions.len(), 1);
        assert_eq!(structure.functions[0].name, "fetch");
        assert!(structure.functions[0].is_async);
        assert_eq!(structure.constants, vec!["LIMIT"]);
        assert!(structure.complexity.lines_of_code > 0);
    }

    #[test]
    fn test_analyze_python_methods_attach_to_class() {
        let content = "import os\nfrom json import loads\n\nclass Store(Base):\n    def save(self, item):\n        pass\n\n    def _private(self):\n        pass\n\ndef helper(a, b):\n    pass\n\nMAX_SIZE = 10\n";
        let structure = analyze_source("store.py", "python", content);
        assert_eq!(structure.imports, vec!["os", "json"]);
        assert_eq!(structure.classes.len(), 1);
        assert_eq!(structure.classes[0].base_classes, vec!["Base"]);
        let methods: Vec<&str> = structure.classes[0]
            .methods
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(methods, vec!["save", "_private"]);
        assert_eq!(structure.functions.len(), 1);
        assert_eq!(structure.functions[0].name, "helper");
        assert_eq!(structure.functions[0].args, vec!["a", "b"]);
        assert_eq!(structure.constants, vec!["MAX_SIZE"]);
    }

    #[test]
    fn test_analyze_js_functions_and_classes() {
        let content = "import { api } from './api';\nconst helper = require('./helper');\n\nexport class Client extends Base {\n}\n\nexport async function run(task) {\n}\n\nconst handle = (event) => {\n};\n\nexport const RETRY_LIMIT = 3;\n";
        let structure = analyze_source("client.js", "javascript", content);
        assert_eq!(structure.imports, vec!["./api", "./helper"]);
        assert_eq!(structure.classes[0].name, "Client");
        assert_eq!(structure.classes[0].base_classes, vec!["Base"]);
        let names: Vec<&str> = structure.functions.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"run"));
        assert!(names.contains(&"handle"));
        assert_eq!(structure.constants, vec!["RETRY_LIMIT"]);
    }

    #[test]
    fn test_outline_caps_imports() {
        let mut structure = analyze_source("a.rs", "rust", "pub fn one() {}\n");
        structure.imports = (0..15).map(|i| format!("dep{}", i)).collect();
        let outline = build_outline(&[structure]);
        assert!(outline.contains("## File: a.rs"));
        assert!(outline.contains("**one()**"));
        assert!(outline.contains("... and 5 more imports"));
    }

    #[test]
    fn test_dependency_and_class_diagrams() {
        let content = "use std::fs;\n\npub struct Thing;\n";
        let structure = analyze_source("src/thing.rs", "rust", content);
        let diagrams = derive_diagrams(&[structure]);
        assert_eq!(diagrams.len(), 2);
        assert_eq!(diagrams[0].kind, "dependency_diagram");
        assert!(diagrams[0].code.starts_with("graph TD"));
        assert!(diagrams[0].code.contains("src_thing_rs --> std__fs"));
        assert_eq!(diagrams[1].kind, "class_diagram");
        assert!(diagrams[1].code.contains("class Thing {"));
    }

    #[test]
    fn test_examples_skip_private_functions() {
        let content = "def visible():\n    pass\n\ndef _hidden():\n    pass\n";
        let structure = analyze_source("mod.py", "python", content);
        let examples = derive_examples(&[structure]);
        assert_eq!(examples.len(), 1);
        assert!(examples[0].code.contains("visible("));
    }

    #[test]
    fn test_generate_falls_back_to_template_without_provider() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn entry() {}\n").unwrap();
        let service = service_with_workspace(dir.path());

        let request = DocRequest {
            file_paths: vec!["lib.rs".to_string()],
            documentation_type: "readme".to_string(),
            output_format: "markdown".to_string(),
            template: None,
            include_examples: true,
            include_diagrams: true,
            target_audience: "developers".to_string(),
        };
        let result = service.generate(&request).unwrap();
        assert!(result.content.contains("Generated Documentation"));
        assert_eq!(result.metadata["total_functions"], 1);
        assert_eq!(result.metadata["template"], "readme_template");
        assert_eq!(result.references, vec!["lib.rs"]);
        assert!(!result.diagrams.is_empty());
    }

    #[test]
    fn test_generate_rejects_unknown_type() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_workspace(dir.path());
        let request = DocRequest {
            file_paths: vec![],
            documentation_type: "novel".to_string(),
            output_format: "markdown".to_string(),
            template: None,
            include_examples: false,
            include_diagrams: false,
            target_audience: "developers".to_string(),
        };
        assert!(matches!(
            service.generate(&request),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_analyze_skips_traversal_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.py"), "def f():\n    pass\n").unwrap();
        let service = service_with_workspace(dir.path());

        let structures = service.analyze(&[
            "ok.py".to_string(),
            "../../etc/passwd".to_string(),
            "image.png".to_string(),
        ]);
        assert_eq!(structures.len(), 1);
        assert_eq!(structures[0].file_path, "ok.py");
    }

    #[test]
    fn test_export_html_wraps_document() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_workspace(dir.path());
        let (html, content_type) = service
            .export("# Title\n\nBody text", "html", "Docs")
            .unwrap();
        assert_eq!(content_type, "text/html");
        assert!(html.contains("<!DOCTYPE html>"));
        assert!(html.contains("<h1>Title</h1>"));

        let (markdown, content_type) = service.export("# Title", "markdown", "Docs").unwrap();
        assert_eq!(content_type, "text/markdown");
        assert_eq!(markdown, "# Title");

        assert!(matches!(
            service.export("x", "pdf", "Docs"),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_package_produces_zip_archive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "pub fn entry() {}\n").unwrap();
        let service = service_with_workspace(dir.path());

        let request = DocRequest {
            file_paths: vec!["lib.rs".to_string()],
            documentation_type: "api".to_string(),
            output_format: "markdown".to_string(),
            template: None,
            include_examples: false,
            include_diagrams: false,
            target_audience: "developers".to_string(),
        };
        let result = service.generate(&request).unwrap();
        let bytes = service
            .create_package(&result, &request.file_paths, true)
            .unwrap();
        // ZIP local file header magic
        assert_eq!(&bytes[..2], b"PK");
        assert!(bytes.len() > 100);
    }

    #[test]
    fn test_template_list_names() {
        let templates = template_list();
        assert_eq!(templates.len(), TEMPLATES.len());
        assert!(templates.iter().any(|t| t["name"] == "api_documentation"));
        assert!(templates.iter().any(|t| t["name"] == "readme_template"));
    }
}
