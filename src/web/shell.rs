// Shell session manager: per-session subprocesses under the workspace root,
// command filtering, chunked output streaming and idle eviction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::web::error::AppError;
use crate::web::models::ShellSessionInfo;
use crate::{sys_error, sys_info, sys_warn};

pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
pub const EVICTION_INTERVAL: Duration = Duration::from_secs(60);
pub const IDLE_TTL_SECS: f64 = 1800.0;

const OUTPUT_CHUNK_SIZE: usize = 1024;

/// Commands that are refused outright.
pub const BLOCKED_COMMANDS: &[&str] = &[
    "rm", "rmdir", "del", "format", "fdisk", "mkfs", "dd", "shutdown", "reboot", "halt",
    "poweroff", "init", "passwd", "su", "sudo", "chmod", "chown", "chgrp", "mount", "umount",
    "fsck", "killall", "pkill", "kill",
];

/// Commands considered safe. Documented on the security endpoint; not yet
/// enforced as an allow-list.
pub const ALLOWED_COMMANDS: &[&str] = &[
    "ls", "dir", "pwd", "cd", "cat", "type", "echo", "find", "grep", "head", "tail", "wc",
    "sort", "uniq", "cut", "git", "npm", "pip", "python", "node", "java", "mvn", "gradle",
    "make", "cargo", "go", "dotnet", "curl", "wget", "ping", "tar", "zip", "unzip", "gzip",
    "gunzip", "ps", "df", "du", "free", "uname", "which", "whoami", "date", "uptime",
];

/// Substrings that make a command unsafe regardless of its base command.
pub const DANGEROUS_PATTERNS: &[&str] = &[
    "-rf",
    "--force",
    "--no-preserve-root",
    ">",
    ">>",
    "|",
    "&&",
    "||",
    ";",
    "`",
    "$(",
    "eval",
    "exec",
    "source",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Completed,
    Failed,
    Timeout,
    Killed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Timeout => "timeout",
            CommandStatus::Killed => "killed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShellType {
    Cmd,
    Powershell,
    Bash,
}

impl ShellType {
    /// `auto` picks cmd on Windows and bash elsewhere.
    pub fn resolve(requested: &str) -> ShellType {
        match requested {
            "cmd" => ShellType::Cmd,
            "powershell" => ShellType::Powershell,
            "bash" => ShellType::Bash,
            _ => {
                if cfg!(target_os = "windows") {
                    ShellType::Cmd
                } else {
                    ShellType::Bash
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShellType::Cmd => "cmd",
            ShellType::Powershell => "powershell",
            ShellType::Bash => "bash",
        }
    }

    fn wrapper(&self, command: &str) -> (String, Vec<String>) {
        match self {
            ShellType::Cmd => ("cmd".to_string(), vec!["/c".to_string(), command.to_string()]),
            ShellType::Powershell => (
                "powershell".to_string(),
                vec!["-Command".to_string(), command.to_string()],
            ),
            ShellType::Bash => (
                "bash".to_string(),
                vec!["-c".to_string(), command.to_string()],
            ),
        }
    }
}

/// Check whether a command may be executed. Returns the refusal reason when
/// it may not.
pub fn is_command_safe(command: &str) -> Result<(), String> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err("Empty command".to_string());
    }

    let first_token = match trimmed.split_whitespace().next() {
        Some(token) => token,
        None => return Err("No command found".to_string()),
    };
    // Strip path components so /usr/bin/rm and ./rm are caught too
    let base_command = first_token
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(first_token)
        .to_lowercase();

    if BLOCKED_COMMANDS.contains(&base_command.as_str()) {
        return Err(format!("Command '{}' is blocked for security", base_command));
    }

    let command_lower = trimmed.to_lowercase();
    for pattern in DANGEROUS_PATTERNS {
        if command_lower.contains(pattern) {
            return Err(format!("Command contains dangerous pattern: '{}'", pattern));
        }
    }

    Ok(())
}

/// One streamed piece of child output.
#[derive(Clone, Debug)]
pub struct OutputChunk {
    pub data: String,
    pub stream: &'static str, // "stdout" | "stderr"
}

struct ShellSessionState {
    id: String,
    working_directory: PathBuf,
    shell_type: ShellType,
    created_at: f64,
    last_activity: Mutex<f64>,
    command_count: AtomicU64,
    // Occupied while a command runs; doubles as the busy flag.
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ShellSessionState {
    fn info(&self) -> ShellSessionInfo {
        ShellSessionInfo {
            id: self.id.clone(),
            working_directory: self.working_directory.display().to_string(),
            shell_type: self.shell_type.as_str().to_string(),
            created_at: self.created_at,
            last_activity: *self.last_activity.lock().unwrap(),
            is_active: true,
            command_count: self.command_count.load(Ordering::SeqCst),
            has_running_process: self.kill_tx.lock().unwrap().is_some(),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap() = now_secs();
    }
}

pub struct ShellManager {
    sessions: Mutex<HashMap<String, Arc<ShellSessionState>>>,
    base_directory: PathBuf,
}

impl ShellManager {
    pub fn new(base_directory: &Path) -> Self {
        sys_info!(
            "[SHELL] Manager initialized with base directory: {}",
            base_directory.display()
        );
        ShellManager {
            sessions: Mutex::new(HashMap::new()),
            base_directory: base_directory.to_path_buf(),
        }
    }

    /// Create a session. A working directory outside the base directory (or
    /// missing) is replaced with the base directory.
    pub fn create_session(
        &self,
        working_directory: Option<&str>,
        shell_type: &str,
    ) -> ShellSessionInfo {
        let cwd = match working_directory {
            Some(dir) if !dir.trim().is_empty() => {
                let requested = PathBuf::from(dir);
                match requested.canonicalize() {
                    Ok(absolute) if absolute.starts_with(&self.base_directory) => absolute,
                    _ => {
                        sys_warn!(
                            "[SHELL] Working directory outside base or missing, using {}",
                            self.base_directory.display()
                        );
                        self.base_directory.clone()
                    }
                }
            }
            _ => self.base_directory.clone(),
        };

        let now = now_secs();
        let state = Arc::new(ShellSessionState {
            id: uuid::Uuid::new_v4().to_string(),
            working_directory: cwd,
            shell_type: ShellType::resolve(shell_type),
            created_at: now,
            last_activity: Mutex::new(now),
            command_count: AtomicU64::new(0),
            kill_tx: Mutex::new(None),
        });
        let info = state.info();
        sys_info!(
            "[SHELL] Created session {} in {}",
            info.id,
            info.working_directory
        );
        self.sessions
            .lock()
            .unwrap()
            .insert(info.id.clone(), state);
        info
    }

    pub fn session_info(&self, session_id: &str) -> Option<ShellSessionInfo> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.info())
    }

    pub fn list_sessions(&self) -> HashMap<String, ShellSessionInfo> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, state)| (id.clone(), state.info()))
            .collect()
    }

    /// Execute a command, streaming output chunks through `sink`. At most one
    /// command runs per session; a second call while one is running is
    /// rejected with a policy error.
    pub async fn execute(
        &self,
        session_id: &str,
        command: &str,
        sink: mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<CommandStatus, AppError> {
        self.execute_with_timeout(session_id, command, sink, COMMAND_TIMEOUT)
            .await
    }

    pub async fn execute_with_timeout(
        &self,
        session_id: &str,
        command: &str,
        sink: mpsc::UnboundedSender<OutputChunk>,
        timeout: Duration,
    ) -> Result<CommandStatus, AppError> {
        let session = self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        session.touch();
        session.command_count.fetch_add(1, Ordering::SeqCst);

        if let Err(reason) = is_command_safe(command) {
            sys_warn!(
                "[SHELL] Blocked unsafe command in session {}: {}",
                session_id,
                command
            );
            return Err(AppError::Policy(format!("Command blocked: {}", reason)));
        }

        // Claim the single-command slot
        let (kill_tx, mut kill_rx) = oneshot::channel();
        {
            let mut slot = session.kill_tx.lock().unwrap();
            if slot.is_some() {
                return Err(AppError::Policy(
                    "A command is already running in this session".to_string(),
                ));
            }
            *slot = Some(kill_tx);
        }

        let (program, args) = session.shell_type.wrapper(command);
        sys_info!(
            "[SHELL] Executing command in session {}: {}",
            session_id,
            command
        );

        let spawned = Command::new(&program)
            .args(&args)
            .current_dir(&session.working_directory)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                *session.kill_tx.lock().unwrap() = None;
                let _ = sink.send(OutputChunk {
                    data: format!("Error executing command: {}\n", e),
                    stream: "stderr",
                });
                sys_error!(
                    "[SHELL] Failed to spawn command in session {}: {}",
                    session_id,
                    e
                );
                return Ok(CommandStatus::Failed);
            }
        };

        let stdout_task = child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(drain_stream(pipe, "stdout", sink.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(drain_stream(pipe, "stderr", sink.clone())));

        // Resolve the wait outcome first; the child is killed after the
        // select so its borrow is released.
        enum WaitOutcome {
            Exited(Result<std::process::ExitStatus, std::io::Error>),
            TimedOut,
            Killed,
        }

        let outcome = tokio::select! {
            waited = tokio::time::timeout(timeout, child.wait()) => match waited {
                Ok(result) => WaitOutcome::Exited(result),
                Err(_) => WaitOutcome::TimedOut,
            },
            _ = &mut kill_rx => WaitOutcome::Killed,
        };

        let mut timed_out = false;
        let status = match outcome {
            WaitOutcome::Exited(Ok(exit)) => {
                if exit.success() {
                    CommandStatus::Completed
                } else {
                    CommandStatus::Failed
                }
            }
            WaitOutcome::Exited(Err(e)) => {
                sys_error!("[SHELL] Wait failed in session {}: {}", session_id, e);
                CommandStatus::Failed
            }
            WaitOutcome::TimedOut => {
                sys_warn!(
                    "[SHELL] Command timeout in session {}: {}",
                    session_id,
                    command
                );
                let _ = child.kill().await;
                timed_out = true;
                CommandStatus::Timeout
            }
            WaitOutcome::Killed => {
                let _ = child.kill().await;
                CommandStatus::Killed
            }
        };

        // Drain remaining buffers before reporting the terminal status
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        if timed_out {
            let _ = sink.send(OutputChunk {
                data: "\nCommand timed out and was terminated.\n".to_string(),
                stream: "stderr",
            });
        }

        *session.kill_tx.lock().unwrap() = None;
        session.touch();
        Ok(status)
    }

    /// Kill any running command and remove the session.
    pub fn close_session(&self, session_id: &str) -> bool {
        let state = self.sessions.lock().unwrap().remove(session_id);
        match state {
            Some(state) => {
                if let Some(kill_tx) = state.kill_tx.lock().unwrap().take() {
                    let _ = kill_tx.send(());
                }
                sys_info!("[SHELL] Closed session {}", session_id);
                true
            }
            None => false,
        }
    }

    /// Close sessions idle longer than `max_idle_secs`. Returns the ids that
    /// were evicted.
    pub fn close_idle_sessions(&self, max_idle_secs: f64) -> Vec<String> {
        let now = now_secs();
        let stale: Vec<String> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .iter()
                .filter(|(_, state)| now - *state.last_activity.lock().unwrap() > max_idle_secs)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &stale {
            self.close_session(id);
            sys_info!("[SHELL] Cleaned up inactive session: {}", id);
        }
        stale
    }

    /// Background eviction: wake every minute and drop idle sessions.
    pub async fn run_eviction_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(EVICTION_INTERVAL).await;
            self.close_idle_sessions(IDLE_TTL_SECS);
        }
    }
}

async fn drain_stream<R>(mut pipe: R, stream: &'static str, sink: mpsc::UnboundedSender<OutputChunk>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = [0u8; OUTPUT_CHUNK_SIZE];
    loop {
        match pipe.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = OutputChunk {
                    data: String::from_utf8_lossy(&buffer[..n]).to_string(),
                    stream,
                };
                if sink.send(chunk).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ShellManager {
        ShellManager::new(&std::env::temp_dir().canonicalize().unwrap())
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<OutputChunk>) -> Vec<OutputChunk> {
        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn test_blocked_commands_rejected() {
        assert!(is_command_safe("rm -r things").is_err());
        assert!(is_command_safe("sudo apt install x").is_err());
        assert!(is_command_safe("/usr/bin/shutdown now").is_err());
        assert!(is_command_safe("./rm stuff").is_err());
    }

    #[test]
    fn test_dangerous_patterns_rejected() {
        for command in [
            "ls -rf",
            "echo hi > file",
            "cat a | grep b",
            "true && false",
            "true || false",
            "echo a; echo b",
            "echo `date`",
            "echo $(date)",
            "eval something",
        ] {
            assert!(is_command_safe(command).is_err(), "{} should be blocked", command);
        }
    }

    #[test]
    fn test_safe_commands_approved() {
        assert!(is_command_safe("ls -la").is_ok());
        assert!(is_command_safe("git status").is_ok());
        assert!(is_command_safe("cargo build --release").is_ok());
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(is_command_safe("   ").is_err());
    }

    #[test]
    fn test_shell_type_resolution() {
        assert_eq!(ShellType::resolve("bash"), ShellType::Bash);
        assert_eq!(ShellType::resolve("powershell"), ShellType::Powershell);
        let auto = ShellType::resolve("auto");
        if cfg!(target_os = "windows") {
            assert_eq!(auto, ShellType::Cmd);
        } else {
            assert_eq!(auto, ShellType::Bash);
        }
    }

    #[test]
    fn test_create_session_falls_back_on_escape() {
        let mgr = manager();
        let info = mgr.create_session(Some("/"), "auto");
        assert_eq!(
            info.working_directory,
            std::env::temp_dir()
                .canonicalize()
                .unwrap()
                .display()
                .to_string()
        );
    }

    #[tokio::test]
    async fn test_execute_streams_stdout_and_completes() {
        let mgr = manager();
        let info = mgr.create_session(None, "bash");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let status = mgr.execute(&info.id, "echo hello-stream", tx).await.unwrap();
        assert_eq!(status, CommandStatus::Completed);

        let chunks = collect(&mut rx);
        let stdout: String = chunks
            .iter()
            .filter(|c| c.stream == "stdout")
            .map(|c| c.data.clone())
            .collect();
        assert!(stdout.contains("hello-stream"));

        let updated = mgr.session_info(&info.id).unwrap();
        assert_eq!(updated.command_count, 1);
        assert!(!updated.has_running_process);
    }

    #[tokio::test]
    async fn test_blocked_command_reaches_no_child() {
        let mgr = manager();
        let info = mgr.create_session(None, "bash");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = mgr.execute(&info.id, "rm -r /tmp/x", tx).await.unwrap_err();
        assert!(matches!(err, AppError::Policy(_)));
        assert!(err.to_string().contains("Command blocked"));

        // Nothing was spawned, so nothing streamed
        assert!(collect(&mut rx).is_empty());
        // The refusal still counts as activity
        assert_eq!(mgr.session_info(&info.id).unwrap().command_count, 1);
    }

    #[tokio::test]
    async fn test_execute_unknown_session_not_found() {
        let mgr = manager();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = mgr.execute("missing", "ls", tx).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_execute_rejected_as_busy() {
        let mgr = Arc::new(manager());
        let info = mgr.create_session(None, "bash");
        let (tx, _rx) = mpsc::unbounded_channel();

        let mgr_clone = mgr.clone();
        let id = info.id.clone();
        let first = tokio::spawn(async move {
            let (tx2, _rx2) = mpsc::unbounded_channel();
            mgr_clone.execute(&id, "sleep 1", tx2).await
        });

        // Give the first command time to claim the slot
        tokio::time::sleep(Duration::from_millis(200)).await;
        let second = mgr.execute(&info.id, "echo fast", tx).await;
        assert!(matches!(second, Err(AppError::Policy(_))));

        let first_status = first.await.unwrap().unwrap();
        assert_eq!(first_status, CommandStatus::Completed);
    }

    #[tokio::test]
    async fn test_timeout_kills_child_and_notifies() {
        let mgr = manager();
        let info = mgr.create_session(None, "bash");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let status = mgr
            .execute_with_timeout(&info.id, "sleep 30", tx, Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(status, CommandStatus::Timeout);

        let chunks = collect(&mut rx);
        assert!(chunks
            .iter()
            .any(|c| c.data.contains("Command timed out and was terminated")));

        // The session remains usable afterwards
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let status = mgr.execute(&info.id, "echo again", tx2).await.unwrap();
        assert_eq!(status, CommandStatus::Completed);
        assert!(collect(&mut rx2)
            .iter()
            .any(|c| c.data.contains("again")));
    }

    #[tokio::test]
    async fn test_close_session_removes_it() {
        let mgr = manager();
        let info = mgr.create_session(None, "bash");
        assert!(mgr.close_session(&info.id));
        assert!(mgr.session_info(&info.id).is_none());
        assert!(!mgr.close_session(&info.id));
    }

    #[tokio::test]
    async fn test_idle_sessions_evicted() {
        let mgr = manager();
        let keep = mgr.create_session(None, "bash");
        let evict = mgr.create_session(None, "bash");

        // Backdate one session's activity past the TTL
        {
            let sessions = mgr.sessions.lock().unwrap();
            *sessions[&evict.id].last_activity.lock().unwrap() = now_secs() - 3600.0;
        }

        let evicted = mgr.close_idle_sessions(IDLE_TTL_SECS);
        assert_eq!(evicted, vec![evict.id.clone()]);
        assert!(mgr.session_info(&keep.id).is_some());
        assert!(mgr.session_info(&evict.id).is_none());
    }
}
