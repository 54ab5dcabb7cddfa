// Lazy codebase scanner with content caching for context assembly.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use ignore::WalkBuilder;

use crate::sys_warn;
use crate::web::error::AppError;

const CONTENT_CACHE_CAPACITY: usize = 100;
const MAX_CACHED_FILE_SIZE: u64 = 1024 * 1024; // 1 MiB per-file cache cap
const DIRECTORY_CACHE_TTL: Duration = Duration::from_secs(300);
pub const MAX_CONTEXT_BYTES: usize = 10 * 1024 * 1024;

const SUPPORTED_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".tsx", ".java", ".cpp", ".c", ".h", ".cs", ".rb", ".php", ".go", ".rs",
    ".kt", ".scala", ".html", ".css", ".sql", ".yaml", ".yml", ".json", ".xml", ".md", ".txt",
    ".sh", ".bat", ".ps1",
];

const SPECIAL_FILES: &[&str] = &[
    ".env",
    ".gitignore",
    "requirements.txt",
    "package.json",
    "Dockerfile",
    "docker-compose.yml",
    "Makefile",
    "README.md",
    "Cargo.toml",
];

#[derive(Clone, Debug)]
pub struct FileInfo {
    pub path: PathBuf,
    pub relative_path: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub extension: String,
    pub is_special: bool,
}

struct CachedContent {
    content: String,
    cached_at: SystemTime,
}

/// LRU over file contents: `order` front is least recently used.
struct ContentCache {
    entries: HashMap<PathBuf, CachedContent>,
    order: VecDeque<PathBuf>,
}

impl ContentCache {
    fn new() -> Self {
        ContentCache {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn touch(&mut self, path: &Path) {
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            self.order.remove(pos);
        }
        self.order.push_back(path.to_path_buf());
    }

    fn insert(&mut self, path: PathBuf, content: String) {
        if self.entries.contains_key(&path) {
            if let Some(pos) = self.order.iter().position(|p| *p == path) {
                self.order.remove(pos);
            }
        }
        while self.entries.len() >= CONTENT_CACHE_CAPACITY {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            } else {
                break;
            }
        }
        self.entries.insert(
            path.clone(),
            CachedContent {
                content,
                cached_at: SystemTime::now(),
            },
        );
        self.order.push_back(path);
    }

    fn remove(&mut self, path: &Path) {
        self.entries.remove(path);
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            self.order.remove(pos);
        }
    }
}

#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct ScannerStats {
    pub files_scanned: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub struct FileScanner {
    ignore_folders: HashSet<String>,
    content_cache: std::sync::Mutex<ContentCache>,
    directory_cache: std::sync::Mutex<HashMap<PathBuf, (Instant, Vec<FileInfo>)>>,
    stats: std::sync::Mutex<ScannerStats>,
}

impl FileScanner {
    pub fn new(ignore_folders: &[String]) -> Self {
        FileScanner {
            ignore_folders: ignore_folders.iter().cloned().collect(),
            content_cache: std::sync::Mutex::new(ContentCache::new()),
            directory_cache: std::sync::Mutex::new(HashMap::new()),
            stats: std::sync::Mutex::new(ScannerStats::default()),
        }
    }

    pub fn validate_directory(&self, directory: &Path) -> Result<(), AppError> {
        if directory.as_os_str().is_empty() {
            return Err(AppError::Validation("No directory specified".to_string()));
        }
        if !directory.exists() {
            return Err(AppError::Validation(format!(
                "Directory does not exist: {}",
                directory.display()
            )));
        }
        if !directory.is_dir() {
            return Err(AppError::Validation(format!(
                "Path is not a directory: {}",
                directory.display()
            )));
        }
        if std::fs::read_dir(directory).is_err() {
            return Err(AppError::Validation(format!(
                "Directory is not readable: {}",
                directory.display()
            )));
        }
        Ok(())
    }

    /// Walk a directory and collect supported files. Results are cached per
    /// root for a fixed TTL; an expired entry triggers a fresh walk.
    pub fn scan_directory(&self, directory: &Path) -> Result<Vec<FileInfo>, AppError> {
        self.validate_directory(directory)?;

        {
            let cache = self.directory_cache.lock().unwrap();
            if let Some((scanned_at, files)) = cache.get(directory) {
                if scanned_at.elapsed() < DIRECTORY_CACHE_TTL {
                    return Ok(files.clone());
                }
            }
        }

        // The gitignore folder set augments the walker's own .gitignore
        // handling with the configured ignore list.
        let mut extra_ignores = self.ignore_folders.clone();
        extra_ignores.extend(gitignore_directory_patterns(directory));

        let mut files = Vec::new();
        let walker = WalkBuilder::new(directory)
            .standard_filters(true)
            .require_git(false)
            .hidden(false)
            .filter_entry(move |entry| {
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    let name = entry.file_name().to_string_lossy();
                    !extra_ignores.contains(name.as_ref())
                } else {
                    true
                }
            })
            .build();

        for entry in walker.flatten() {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !is_supported_file(&file_name) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue, // Skip files we can't stat
            };
            if metadata.len() == 0 {
                continue;
            }

            let path = entry.path().to_path_buf();
            let relative_path = path
                .strip_prefix(directory)
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|_| file_name.clone());
            let extension = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default();

            files.push(FileInfo {
                path,
                relative_path,
                size: metadata.len(),
                modified: metadata.modified().ok(),
                extension,
                is_special: SPECIAL_FILES.contains(&file_name.as_str()),
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));

        {
            let mut stats = self.stats.lock().unwrap();
            stats.files_scanned += files.len() as u64;
        }
        self.directory_cache
            .lock()
            .unwrap()
            .insert(directory.to_path_buf(), (Instant::now(), files.clone()));

        Ok(files)
    }

    /// Read one file, through the content cache. An unreadable file yields a
    /// placeholder message instead of an error so a single bad file does not
    /// poison the whole context.
    pub fn read_file(&self, path: &Path) -> String {
        {
            let mut cache = self.content_cache.lock().unwrap();
            let fresh = match cache.entries.get(path) {
                Some(cached) => match std::fs::metadata(path).and_then(|m| m.modified()) {
                    Ok(mtime) => mtime <= cached.cached_at,
                    Err(_) => false,
                },
                None => false,
            };
            if fresh {
                cache.touch(path);
                self.stats.lock().unwrap().cache_hits += 1;
                return cache.entries.get(path).unwrap().content.clone();
            }
            cache.remove(path);
        }

        self.stats.lock().unwrap().cache_misses += 1;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        match std::fs::read(path) {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes).to_string();
                if bytes.len() as u64 <= MAX_CACHED_FILE_SIZE {
                    self.content_cache
                        .lock()
                        .unwrap()
                        .insert(path.to_path_buf(), content.clone());
                }
                content
            }
            Err(e) => format!("Error reading file {}: {}", file_name, e),
        }
    }

    /// Combine the contents of many files under a total size budget.
    /// Special files come first, then ascending size; a file that would push
    /// the total over the budget is skipped and reported in a summary line.
    pub fn concat_files(&self, paths: &[PathBuf], max_total_bytes: usize) -> String {
        let mut sorted: Vec<&PathBuf> = paths.iter().collect();
        sorted.sort_by_key(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let special_rank = if SPECIAL_FILES.contains(&name.as_str()) {
                1u8
            } else {
                2u8
            };
            let size = std::fs::metadata(p).map(|m| m.len()).unwrap_or(0);
            (special_rank, size)
        });

        let mut parts: Vec<String> = Vec::new();
        let mut total = 0usize;
        let mut included = 0usize;
        let mut skipped = 0usize;

        for path in sorted {
            let file_size = match std::fs::metadata(path) {
                Ok(m) => m.len() as usize,
                Err(_) => {
                    sys_warn!("Could not stat file, skipping: {}", path.display());
                    skipped += 1;
                    continue;
                }
            };
            if included > 0 && total + file_size > max_total_bytes {
                skipped += 1;
                continue;
            }

            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let content = self.read_file(path);

            parts.push(format!("\n\n=== File: {} ===", file_name));
            total += content.len();
            parts.push(content);
            included += 1;
        }

        if skipped > 0 {
            parts.push(format!(
                "\n\n=== Summary ===\nIncluded {} files, skipped {} files due to size limits.",
                included, skipped
            ));
        }

        parts.join("\n")
    }

    pub fn stats(&self) -> ScannerStats {
        *self.stats.lock().unwrap()
    }
}

fn is_supported_file(file_name: &str) -> bool {
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|ext| file_name.ends_with(ext))
        || SPECIAL_FILES.contains(&file_name)
}

/// Directory patterns (lines ending in '/') from a .gitignore at the root.
fn gitignore_directory_patterns(directory: &Path) -> HashSet<String> {
    let mut patterns = HashSet::new();
    let gitignore = directory.join(".gitignore");
    if let Ok(content) = std::fs::read_to_string(gitignore) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || !line.ends_with('/') {
                continue;
            }
            if let Some(name) = line.trim_end_matches('/').split('/').last() {
                if !name.is_empty() {
                    patterns.insert(name.to_string());
                }
            }
        }
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scanner() -> FileScanner {
        FileScanner::new(&["node_modules".to_string(), ".git".to_string()])
    }

    #[test]
    fn test_scan_filters_unsupported_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("image.bin"), [0u8; 8]).unwrap();
        fs::write(dir.path().join("empty.rs"), "").unwrap();

        let files = scanner().scan_directory(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.relative_path.clone()).collect();
        assert_eq!(names, vec!["main.rs"]);
    }

    #[test]
    fn test_scan_skips_ignored_folders() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules").join("dep.js"), "x").unwrap();
        fs::write(dir.path().join("app.js"), "let x = 1;").unwrap();

        let files = scanner().scan_directory(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, "app.js");
    }

    #[test]
    fn test_scan_honours_gitignore_directory_patterns() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "generated/\n").unwrap();
        fs::create_dir(dir.path().join("generated")).unwrap();
        fs::write(dir.path().join("generated").join("out.py"), "x = 1").unwrap();
        fs::write(dir.path().join("keep.py"), "y = 2").unwrap();

        let files = scanner().scan_directory(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.relative_path.clone()).collect();
        assert!(names.contains(&"keep.py".to_string()));
        assert!(!names.iter().any(|n| n.starts_with("generated")));
    }

    #[test]
    fn test_special_files_detected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Makefile"), "all:\n\ttrue").unwrap();
        let files = scanner().scan_directory(dir.path()).unwrap();
        assert!(files[0].is_special);
    }

    #[test]
    fn test_read_file_placeholder_on_missing() {
        let content = scanner().read_file(Path::new("/nonexistent/zzz.rs"));
        assert!(content.starts_with("Error reading file zzz.rs:"));
    }

    #[test]
    fn test_read_file_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        fs::write(&path, "fn a() {}").unwrap();

        let s = scanner();
        assert_eq!(s.read_file(&path), "fn a() {}");
        assert_eq!(s.read_file(&path), "fn a() {}");
        let stats = s.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[test]
    fn test_concat_orders_special_files_first() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("big.rs");
        let manifest = dir.path().join("Cargo.toml");
        fs::write(&big, "x".repeat(100)).unwrap();
        fs::write(&manifest, "[package]").unwrap();

        let combined = scanner().concat_files(&[big, manifest], MAX_CONTEXT_BYTES);
        let manifest_pos = combined.find("=== File: Cargo.toml ===").unwrap();
        let big_pos = combined.find("=== File: big.rs ===").unwrap();
        assert!(manifest_pos < big_pos);
    }

    #[test]
    fn test_concat_respects_size_budget_with_summary() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.rs");
        let large = dir.path().join("large.rs");
        fs::write(&small, "s".repeat(10)).unwrap();
        fs::write(&large, "l".repeat(5000)).unwrap();

        let combined = scanner().concat_files(&[small, large], 100);
        assert!(combined.contains("=== File: small.rs ==="));
        assert!(!combined.contains("=== File: large.rs ==="));
        assert!(combined.contains("Included 1 files, skipped 1 files"));
    }
}
