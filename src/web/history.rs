// Conversation history persistence: one JSON snapshot file per conversation,
// named by start timestamp and a stable GUID.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::web::error::AppError;
use crate::{sys_info, sys_warn};

#[derive(Clone, Debug)]
struct ConversationRecord {
    guid: String,
    created_at: String, // ISO timestamp
    prefix: String,     // YYYYMMDD-HHMMSS
}

#[derive(Clone, Debug, Serialize)]
pub struct HistorySummary {
    pub guid: Option<String>,
    pub conversation_id: Option<String>,
    pub created_at: Option<String>,
    pub last_updated: Option<String>,
    pub message_count: u64,
    pub filename: String,
}

pub struct HistoryLogger {
    history_dir: PathBuf,
    records: Mutex<HashMap<String, ConversationRecord>>,
}

impl HistoryLogger {
    pub fn new(history_dir: &Path) -> Self {
        if let Err(e) = std::fs::create_dir_all(history_dir) {
            sys_warn!(
                "[HISTORY] Failed to create history dir {}: {}",
                history_dir.display(),
                e
            );
        }
        sys_info!(
            "[HISTORY] History logger initialized with directory: {}",
            history_dir.display()
        );
        HistoryLogger {
            history_dir: history_dir.to_path_buf(),
            records: Mutex::new(HashMap::new()),
        }
    }

    /// GUID and start timestamp are assigned on first contact and reused for
    /// the lifetime of the process.
    fn ensure_record(&self, conversation_id: &str) -> ConversationRecord {
        let mut records = self.records.lock().unwrap();
        records
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                let now = chrono::Local::now();
                ConversationRecord {
                    guid: uuid::Uuid::new_v4().to_string(),
                    created_at: now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
                    prefix: now.format("%Y%m%d-%H%M%S").to_string(),
                }
            })
            .clone()
    }

    pub fn filepath(&self, conversation_id: &str) -> PathBuf {
        let record = self.ensure_record(conversation_id);
        self.history_dir
            .join(format!("{}_{}.json", record.prefix, record.guid))
    }

    /// Write the full snapshot, preserving an existing file's `created_at`.
    pub fn save(
        &self,
        conversation_id: &str,
        messages: Vec<Value>,
        metadata: Option<Value>,
    ) -> Result<(), AppError> {
        let record = self.ensure_record(conversation_id);
        let filepath = self.filepath(conversation_id);

        let mut created_at = record.created_at.clone();
        if filepath.exists() {
            if let Ok(content) = std::fs::read_to_string(&filepath) {
                if let Ok(existing) = serde_json::from_str::<Value>(&content) {
                    if let Some(existing_created) =
                        existing.get("created_at").and_then(|v| v.as_str())
                    {
                        created_at = existing_created.to_string();
                    }
                }
            }
        }

        let history_data = serde_json::json!({
            "conversation_guid": record.guid,
            "conversation_id": conversation_id,
            "created_at": created_at,
            "last_updated": chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            "message_count": messages.len(),
            "metadata": metadata.unwrap_or_else(|| serde_json::json!({})),
            "messages": messages,
        });

        let serialized = serde_json::to_string_pretty(&history_data)
            .map_err(|e| AppError::Upstream(format!("Failed to serialize history: {}", e)))?;
        std::fs::write(&filepath, serialized).map_err(|e| {
            AppError::Upstream(format!(
                "Failed to write history file {}: {}",
                filepath.display(),
                e
            ))
        })?;

        Ok(())
    }

    pub fn load(&self, conversation_id: &str) -> Result<Value, AppError> {
        let filepath = self.filepath(conversation_id);
        if !filepath.exists() {
            return Err(AppError::NotFound(format!(
                "No history for conversation {}",
                conversation_id
            )));
        }
        let content = std::fs::read_to_string(&filepath).map_err(|e| {
            AppError::Upstream(format!("Failed to read history file: {}", e))
        })?;
        let data: Value = serde_json::from_str(&content)
            .map_err(|e| AppError::Upstream(format!("Malformed history file: {}", e)))?;

        // Align in-memory tracking with persisted metadata
        if let Some(created_at) = data.get("created_at").and_then(|v| v.as_str()) {
            let mut records = self.records.lock().unwrap();
            if let Some(record) = records.get_mut(conversation_id) {
                record.created_at = created_at.to_string();
            }
        }

        Ok(data)
    }

    /// Summaries of all history files, sorted by `last_updated` descending.
    pub fn list(&self) -> Vec<HistorySummary> {
        let mut summaries = Vec::new();
        let entries = match std::fs::read_dir(&self.history_dir) {
            Ok(entries) => entries,
            Err(_) => return summaries,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let data: Value = match std::fs::read_to_string(&path)
                .ok()
                .and_then(|content| serde_json::from_str(&content).ok())
            {
                Some(data) => data,
                None => {
                    sys_warn!("[HISTORY] Could not read history file {}", path.display());
                    continue;
                }
            };
            summaries.push(HistorySummary {
                guid: data
                    .get("conversation_guid")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                conversation_id: data
                    .get("conversation_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                created_at: data
                    .get("created_at")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                last_updated: data
                    .get("last_updated")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                message_count: data
                    .get("message_count")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                filename: entry.file_name().to_string_lossy().to_string(),
            });
        }

        summaries.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        summaries
    }

    pub fn delete(&self, conversation_id: &str) -> Result<(), AppError> {
        let filepath = self.filepath(conversation_id);
        if !filepath.exists() {
            return Err(AppError::NotFound(format!(
                "No history for conversation {}",
                conversation_id
            )));
        }
        std::fs::remove_file(&filepath).map_err(|e| {
            AppError::Upstream(format!("Failed to delete history file: {}", e))
        })?;
        self.records.lock().unwrap().remove(conversation_id);
        sys_info!("[HISTORY] Deleted history for {}", conversation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filepath_is_stable_per_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path());
        let first = logger.filepath("conv-1");
        let second = logger.filepath("conv-1");
        assert_eq!(first, second);
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        // <YYYYMMDD-HHMMSS>_<guid>.json
        assert_eq!(name.len(), "20250101-010101".len() + 1 + 36 + 5);
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path());
        let messages = vec![
            serde_json::json!({"role": "user", "content": "hi"}),
            serde_json::json!({"role": "assistant", "content": "hello"}),
        ];
        logger
            .save("conv-1", messages, Some(serde_json::json!({"model": "m"})))
            .unwrap();

        let loaded = logger.load("conv-1").unwrap();
        assert_eq!(loaded["conversation_id"], "conv-1");
        assert_eq!(loaded["message_count"], 2);
        assert_eq!(loaded["messages"][1]["content"], "hello");
        assert_eq!(loaded["metadata"]["model"], "m");
    }

    #[test]
    fn test_save_preserves_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path());
        logger.save("conv-1", vec![], None).unwrap();
        let first = logger.load("conv-1").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        logger
            .save("conv-1", vec![serde_json::json!({"role": "user"})], None)
            .unwrap();
        let second = logger.load("conv-1").unwrap();

        assert_eq!(first["created_at"], second["created_at"]);
        assert_eq!(second["message_count"], 1);
    }

    #[test]
    fn test_list_sorted_by_last_updated_desc() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path());
        logger.save("older", vec![], None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        logger.save("newer", vec![], None).unwrap();

        let listed = logger.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].conversation_id.as_deref(), Some("newer"));
        assert_eq!(listed[1].conversation_id.as_deref(), Some("older"));
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path());
        logger.save("conv-1", vec![], None).unwrap();
        logger.delete("conv-1").unwrap();
        assert!(matches!(
            logger.load("conv-1"),
            Err(AppError::NotFound(_))
        ));
        assert!(logger.list().is_empty());
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path());
        assert!(matches!(logger.load("ghost"), Err(AppError::NotFound(_))));
    }
}
