// Diagram validation and rendering on top of the external D2 and Mermaid
// CLIs. Shared by the repair loop, the render endpoints and the tool-call
// surface.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::web::cli::{self, CliError};
use crate::web::config::AppConfig;
use crate::web::error::AppError;
use crate::{sys_error, sys_info, sys_warn};

/// Maximum accepted diagram source length (500 KiB).
pub const MAX_DIAGRAM_SOURCE_LEN: usize = 500 * 1024;

const D2_VALIDATE_TIMEOUT: Duration = Duration::from_secs(10);
const D2_RENDER_TIMEOUT: Duration = Duration::from_secs(30);
const MERMAID_TIMEOUT: Duration = Duration::from_secs(30);

lazy_static! {
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagramKind {
    D2,
    Mermaid,
}

impl DiagramKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramKind::D2 => "d2",
            DiagramKind::Mermaid => "mermaid",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Svg,
    Png,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "svg" => Ok(OutputFormat::Svg),
            "png" => Ok(OutputFormat::Png),
            other => Err(AppError::Validation(format!(
                "Unsupported output format: {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DiagramToolInfo {
    pub available: bool,
    pub executable: Option<String>,
    pub version: Option<String>,
    pub error: Option<String>,
}

pub struct DiagramService {
    d2_exe: Option<String>,
    mermaid_exe: Option<String>,
    static_dir: PathBuf,
}

impl DiagramService {
    pub fn new(config: &AppConfig) -> Self {
        let d2_exe = match cli::locate("d2", config.d2_executable_path.as_deref()) {
            Ok(path) => Some(path),
            Err(e) => {
                sys_warn!("[DIAGRAM] D2 CLI unavailable: {}", e);
                None
            }
        };
        let mermaid_exe = match cli::locate("mmdc", config.mermaid_executable_path.as_deref()) {
            Ok(path) => Some(path),
            Err(e) => {
                sys_warn!("[DIAGRAM] Mermaid CLI unavailable: {}", e);
                None
            }
        };
        DiagramService {
            d2_exe,
            mermaid_exe,
            static_dir: config.static_dir.clone(),
        }
    }

    /// Reject oversize sources before they reach a subprocess.
    pub fn check_source_size(code: &str) -> Result<(), AppError> {
        if code.len() > MAX_DIAGRAM_SOURCE_LEN {
            return Err(AppError::InputTooLarge(format!(
                "Diagram source too large ({} bytes). Maximum allowed: {} bytes",
                code.len(),
                MAX_DIAGRAM_SOURCE_LEN
            )));
        }
        Ok(())
    }

    pub fn validate(&self, kind: DiagramKind, code: &str) -> Result<(), String> {
        match kind {
            DiagramKind::D2 => self.validate_d2(code),
            DiagramKind::Mermaid => self.validate_mermaid(code),
        }
    }

    /// Validate D2 source by compiling it to stdout. Success is exit 0; the
    /// failure message is stderr stripped of ANSI escapes.
    pub fn validate_d2(&self, code: &str) -> Result<(), String> {
        if code.trim().is_empty() {
            return Err("D2 code is empty".to_string());
        }
        if let Err(e) = Self::check_source_size(code) {
            return Err(e.to_string());
        }
        let exe = match &self.d2_exe {
            Some(exe) => exe.clone(),
            None => return Err("D2 executable not found. Please install the D2 CLI.".to_string()),
        };

        let input = match write_temp_source(code, ".d2") {
            Ok(file) => file,
            Err(e) => return Err(format!("Failed to write temp file: {}", e)),
        };

        let args = vec![
            input.path().to_string_lossy().to_string(),
            "-".to_string(),
        ];
        match cli::run(&exe, &args, D2_VALIDATE_TIMEOUT) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => {
                let raw = if output.stderr.trim().is_empty() {
                    output.stdout
                } else {
                    output.stderr
                };
                Err(strip_ansi(&raw).trim_end().to_string())
            }
            Err(e) => Err(cli_error_text(&e)),
        }
    }

    /// Validate Mermaid source by rendering to a throwaway SVG. The raw CLI
    /// error is reduced to its most relevant non-stack-trace lines.
    pub fn validate_mermaid(&self, code: &str) -> Result<(), String> {
        if code.trim().is_empty() {
            return Err("Mermaid code is empty".to_string());
        }
        if let Err(e) = Self::check_source_size(code) {
            return Err(e.to_string());
        }
        let exe = match &self.mermaid_exe {
            Some(exe) => exe.clone(),
            None => {
                return Err(
                    "Mermaid CLI (mmdc) not found. Install with: npm install -g @mermaid-js/mermaid-cli"
                        .to_string(),
                )
            }
        };

        let input = match write_temp_source(code, ".mmd") {
            Ok(file) => file,
            Err(e) => return Err(format!("Failed to write temp file: {}", e)),
        };
        let output_path = input.path().with_extension("svg");

        let result = self.run_mermaid(&exe, input.path(), &output_path);
        let _ = std::fs::remove_file(&output_path);
        result.map(|_| ())
    }

    /// Render a diagram of either kind to SVG text.
    pub fn render_svg(&self, kind: DiagramKind, code: &str) -> Result<String, String> {
        match kind {
            DiagramKind::D2 => self.render_d2_svg(code),
            DiagramKind::Mermaid => self.render_mermaid(code, OutputFormat::Svg),
        }
    }

    /// Render D2 to SVG text.
    pub fn render_d2_svg(&self, code: &str) -> Result<String, String> {
        if code.trim().is_empty() {
            return Err("D2 code is empty".to_string());
        }
        if let Err(e) = Self::check_source_size(code) {
            return Err(e.to_string());
        }
        let exe = match &self.d2_exe {
            Some(exe) => exe.clone(),
            None => return Err("D2 executable not found. Please install the D2 CLI.".to_string()),
        };

        let input = match write_temp_source(code, ".d2") {
            Ok(file) => file,
            Err(e) => return Err(format!("Failed to write temp file: {}", e)),
        };
        let output_path = input.path().with_extension("svg");

        let args = vec![
            input.path().to_string_lossy().to_string(),
            output_path.to_string_lossy().to_string(),
        ];
        let run_result = cli::run(&exe, &args, D2_RENDER_TIMEOUT);
        let svg = match run_result {
            Ok(output) if output.success() => match std::fs::read_to_string(&output_path) {
                Ok(svg) if !svg.is_empty() => Ok(svg),
                _ => Err("D2 produced no output".to_string()),
            },
            Ok(output) => {
                let raw = if output.stderr.trim().is_empty() {
                    output.stdout
                } else {
                    output.stderr
                };
                Err(format!(
                    "D2 rendering error: {}",
                    strip_ansi(&raw).trim_end()
                ))
            }
            Err(e) => Err(cli_error_text(&e)),
        };
        let _ = std::fs::remove_file(&output_path);
        svg
    }

    /// Render Mermaid to SVG text or base64 PNG bytes.
    pub fn render_mermaid(&self, code: &str, format: OutputFormat) -> Result<String, String> {
        if code.trim().is_empty() {
            return Err("Mermaid code is empty".to_string());
        }
        if let Err(e) = Self::check_source_size(code) {
            return Err(e.to_string());
        }
        let exe = match &self.mermaid_exe {
            Some(exe) => exe.clone(),
            None => {
                return Err(
                    "Mermaid CLI (mmdc) not found. Install with: npm install -g @mermaid-js/mermaid-cli"
                        .to_string(),
                )
            }
        };

        let input = match write_temp_source(code, ".mmd") {
            Ok(file) => file,
            Err(e) => return Err(format!("Failed to write temp file: {}", e)),
        };
        let extension = match format {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
        };
        let output_path = input.path().with_extension(extension);

        let run_result = self.run_mermaid(&exe, input.path(), &output_path);
        let rendered = match run_result {
            Ok(()) => match format {
                OutputFormat::Svg => std::fs::read_to_string(&output_path)
                    .map_err(|e| format!("Failed to read rendered SVG: {}", e)),
                OutputFormat::Png => std::fs::read(&output_path)
                    .map(|bytes| general_purpose::STANDARD.encode(bytes))
                    .map_err(|e| format!("Failed to read rendered PNG: {}", e)),
            },
            Err(e) => Err(e),
        };
        let _ = std::fs::remove_file(&output_path);
        rendered
    }

    fn run_mermaid(&self, exe: &str, input: &Path, output: &Path) -> Result<(), String> {
        let args = vec![
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
        ];
        match cli::run(exe, &args, MERMAID_TIMEOUT) {
            Ok(run) if run.success() => Ok(()),
            Ok(run) => {
                let raw = if run.stderr.trim().is_empty() {
                    run.stdout
                } else {
                    run.stderr
                };
                Err(clean_mermaid_error(&raw))
            }
            Err(e) => Err(cli_error_text(&e)),
        }
    }

    /// Persist a rendered SVG under `static/<kind>_diagrams/` with a
    /// timestamp + content-hash filename; returns the filename.
    pub fn save_diagram_svg(
        &self,
        kind: DiagramKind,
        code: &str,
        svg: &str,
    ) -> std::io::Result<String> {
        let dir = self.static_dir.join(format!("{}_diagrams", kind.as_str()));
        std::fs::create_dir_all(&dir)?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!(
            "{}_diagram_{}_{}.svg",
            kind.as_str(),
            timestamp,
            content_hash8(code)
        );
        std::fs::write(dir.join(&filename), svg)?;
        sys_info!("[DIAGRAM] Saved {} diagram to {}", kind.as_str(), filename);
        Ok(filename)
    }

    /// Resolve a previously saved SVG for download. Rejects traversal
    /// attempts and non-SVG names.
    pub fn saved_svg_path(&self, kind: DiagramKind, filename: &str) -> Result<PathBuf, AppError> {
        if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
            return Err(AppError::Validation("Invalid filename".to_string()));
        }
        if !filename.ends_with(".svg") {
            return Err(AppError::Validation(
                "Only .svg downloads are supported".to_string(),
            ));
        }
        let path = self
            .static_dir
            .join(format!("{}_diagrams", kind.as_str()))
            .join(filename);
        if !path.is_file() {
            return Err(AppError::NotFound(format!("File not found: {}", filename)));
        }
        Ok(path)
    }

    pub fn tool_info(&self, kind: DiagramKind) -> DiagramToolInfo {
        let exe = match kind {
            DiagramKind::D2 => &self.d2_exe,
            DiagramKind::Mermaid => &self.mermaid_exe,
        };
        match exe {
            Some(exe) => DiagramToolInfo {
                available: true,
                executable: Some(exe.clone()),
                version: cli::probe_version(exe),
                error: None,
            },
            None => DiagramToolInfo {
                available: false,
                executable: None,
                version: None,
                error: Some(format!("{} CLI not found", kind.as_str())),
            },
        }
    }

    #[cfg(test)]
    pub fn with_executables(
        d2_exe: Option<String>,
        mermaid_exe: Option<String>,
        static_dir: PathBuf,
    ) -> Self {
        DiagramService {
            d2_exe,
            mermaid_exe,
            static_dir,
        }
    }
}

fn write_temp_source(code: &str, suffix: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile()?;
    file.write_all(code.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn cli_error_text(err: &CliError) -> String {
    match err {
        CliError::NotFound(tool) => format!("Executable not found: {}", tool),
        CliError::Timeout { tool, seconds } => {
            format!("{} timed out ({}s limit)", tool, seconds)
        }
        CliError::Io { tool, source } => {
            sys_error!("[DIAGRAM] I/O error running {}: {}", tool, source);
            format!("Unexpected error running {}: {}", tool, source)
        }
    }
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").to_string()
}

/// Reduce a Mermaid CLI error to its most useful lines: ANSI stripped,
/// stack-trace noise dropped, first ten relevant lines kept.
pub fn clean_mermaid_error(raw: &str) -> String {
    let cleaned = strip_ansi(raw);
    let relevant: Vec<&str> = cleaned
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return false;
            }
            if trimmed.contains("at Object.") || trimmed.contains("at Function.") {
                return false;
            }
            if trimmed.starts_with("at ") && trimmed.contains('(') {
                return false;
            }
            true
        })
        .take(10)
        .collect();

    if relevant.is_empty() {
        cleaned.trim_end().to_string()
    } else {
        relevant.join("\n")
    }
}

pub fn content_hash8(code: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(code.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_without_tools() -> DiagramService {
        DiagramService::with_executables(None, None, std::env::temp_dir())
    }

    #[test]
    fn test_oversize_source_rejected() {
        let big = "x".repeat(MAX_DIAGRAM_SOURCE_LEN + 1);
        assert!(matches!(
            DiagramService::check_source_size(&big),
            Err(AppError::InputTooLarge(_))
        ));
        assert!(DiagramService::check_source_size("a -> b").is_ok());
    }

    #[test]
    fn test_empty_source_rejected_before_subprocess() {
        let service = service_without_tools();
        assert_eq!(
            service.validate_d2("   ").unwrap_err(),
            "D2 code is empty".to_string()
        );
        assert!(service
            .validate_mermaid("")
            .unwrap_err()
            .contains("Mermaid code is empty"));
    }

    #[test]
    fn test_missing_executable_message() {
        let service = service_without_tools();
        assert!(service
            .validate_d2("a -> b")
            .unwrap_err()
            .contains("D2 executable not found"));
        assert!(service
            .render_mermaid("graph TD\nA-->B", OutputFormat::Svg)
            .unwrap_err()
            .contains("mmdc"));
    }

    #[test]
    fn test_strip_ansi_removes_color_codes() {
        let colored = "\x1b[31merror\x1b[0m: bad shape";
        assert_eq!(strip_ansi(colored), "error: bad shape");
    }

    #[test]
    fn test_clean_mermaid_error_drops_stack_frames() {
        let raw = "Parse error on line 2\n    at Object.parse (mermaid.js:1:1)\n    at Function.run (cli.js:2:2)\nExpecting 'NEWLINE'";
        let cleaned = clean_mermaid_error(raw);
        assert!(cleaned.contains("Parse error on line 2"));
        assert!(cleaned.contains("Expecting 'NEWLINE'"));
        assert!(!cleaned.contains("at Object."));
    }

    #[test]
    fn test_clean_mermaid_error_caps_line_count() {
        let raw = (0..30)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(clean_mermaid_error(&raw).lines().count(), 10);
    }

    #[test]
    fn test_content_hash8_is_stable_and_short() {
        let a = content_hash8("a -> b");
        let b = content_hash8("a -> b");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert_ne!(content_hash8("a -> c"), a);
    }

    #[test]
    fn test_saved_svg_path_rejects_traversal() {
        let service = service_without_tools();
        assert!(matches!(
            service.saved_svg_path(DiagramKind::D2, "../../etc/passwd"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.saved_svg_path(DiagramKind::D2, "diagram.png"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.saved_svg_path(DiagramKind::D2, "missing.svg"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_save_and_resolve_svg_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let service =
            DiagramService::with_executables(None, None, dir.path().to_path_buf());
        let filename = service
            .save_diagram_svg(DiagramKind::D2, "a -> b", "<svg></svg>")
            .unwrap();
        assert!(filename.starts_with("d2_diagram_"));
        assert!(filename.ends_with(".svg"));
        let path = service.saved_svg_path(DiagramKind::D2, &filename).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "<svg></svg>");
    }
}
