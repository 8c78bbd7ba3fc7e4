//! JSON ledger of workflow runs, one record per instance.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::AutomationError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Recycled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub label: String,
    pub instance_origin: u32,
    pub status: RunStatus,
    pub created_at: String,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Ledger file shared by every worker in the process. Each mutation is a
/// read-modify-write under one lock, and the file is replaced atomically.
pub struct RunLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RunLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn records(&self) -> Result<Vec<RunRecord>, AutomationError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn find(&self, instance_origin: u32) -> Result<Option<RunRecord>, AutomationError> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .find(|r| r.instance_origin == instance_origin))
    }

    /// Inserts a fresh `Running` record for the instance, replacing any
    /// earlier record with the same origin.
    pub async fn register(&self, label: &str, instance_origin: u32) -> Result<RunRecord, AutomationError> {
        let record = RunRecord {
            label: label.to_string(),
            instance_origin,
            status: RunStatus::Running,
            created_at: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            completed: false,
            completed_at: None,
            detail: None,
        };
        let stored = record.clone();
        self.modify(move |records| {
            records.retain(|r| r.instance_origin != instance_origin);
            records.push(stored);
        })
        .await?;
        info!("Registered run '{label}' for instance {instance_origin}");
        Ok(record)
    }

    /// Sets the status of the record for `instance_origin`, creating it when
    /// absent. Never leaves two records for one origin.
    pub async fn update_status(
        &self,
        instance_origin: u32,
        status: RunStatus,
        detail: Option<String>,
    ) -> Result<(), AutomationError> {
        let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.modify(move |records| {
            let mut matching = records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.instance_origin == instance_origin)
                .map(|(i, _)| i);
            let keep = matching.next();
            let duplicates: Vec<usize> = matching.collect();
            for index in duplicates.into_iter().rev() {
                records.remove(index);
            }

            let record = match keep {
                Some(index) => &mut records[index],
                None => {
                    records.push(RunRecord {
                        label: format!("instance-{instance_origin}"),
                        instance_origin,
                        status,
                        created_at: now.clone(),
                        completed: false,
                        completed_at: None,
                        detail: None,
                    });
                    let last = records.len() - 1;
                    &mut records[last]
                }
            };
            record.status = status;
            if detail.is_some() {
                record.detail = detail;
            }
            if status == RunStatus::Completed {
                record.completed = true;
                record.completed_at = Some(now);
            }
        })
        .await?;
        debug!("Instance {instance_origin} -> {status:?}");
        Ok(())
    }

    async fn modify<F>(&self, change: F) -> Result<(), AutomationError>
    where
        F: FnOnce(&mut Vec<RunRecord>),
    {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        change(&mut records);
        self.write(&records).await
    }

    async fn read(&self) -> Result<Vec<RunRecord>, AutomationError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                AutomationError::Ledger(format!("corrupt ledger {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, records: &[RunRecord]) -> Result<(), AutomationError> {
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| AutomationError::Ledger(format!("failed to serialize ledger: {e}")))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), AutomationError> {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            std::fs::create_dir_all(&dir)?;
            let mut file = tempfile::NamedTempFile::new_in(&dir)?;
            file.write_all(&json)?;
            file.flush()?;
            file.persist(&path)
                .map_err(|e| AutomationError::Ledger(format!("failed to replace ledger: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| AutomationError::Internal(format!("Task join error: {e}")))?
    }
}
