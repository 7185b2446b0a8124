//! Background job registry.
//!
//! Process-local, no durability. A single exclusive lock guards the map;
//! critical sections only touch metadata, never I/O.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::memory::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// One background unit of work (indexing run, normalization, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    #[serde(default)]
    pub parameters: Payload,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 0-100.
    pub progress: u8,
    pub phase: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Partial update applied by [`JobRegistry::update`].
#[derive(Debug, Default, Clone)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub phase: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn phase(phase: impl Into<String>, progress: u8) -> Self {
        Self {
            phase: Some(phase.into()),
            progress: Some(progress),
            ..Default::default()
        }
    }
}

/// In-memory registry of jobs by id.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending job and return its id.
    pub fn create(&self, job_type: impl Into<String>, parameters: Payload) -> String {
        let job_type = job_type.into();
        let id = Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            job_type: job_type.clone(),
            status: JobStatus::Pending,
            parameters,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            phase: None,
            result: None,
            error: None,
        };
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), job);
        info!(job_id = %id, job_type = %job_type, "job created");
        id
    }

    /// Apply a partial update. Sets `started_at` on the first transition to
    /// running and `completed_at` on terminal states. Idempotent; returns
    /// false for unknown ids.
    pub fn update(&self, job_id: &str, update: JobUpdate) -> bool {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let Some(job) = jobs.get_mut(job_id) else {
            return false;
        };

        if let Some(status) = update.status {
            job.status = status;
            if status == JobStatus::Running && job.started_at.is_none() {
                job.started_at = Some(Utc::now());
            } else if status.is_terminal() && job.completed_at.is_none() {
                job.completed_at = Some(Utc::now());
            }
        }
        if let Some(progress) = update.progress {
            job.progress = progress.min(100);
        }
        if let Some(phase) = update.phase {
            job.phase = Some(phase);
        }
        if let Some(result) = update.result {
            job.result = Some(result);
        }
        if let Some(error) = update.error {
            job.error = Some(error);
        }
        true
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned()
    }

    /// List jobs, newest first, optionally filtered by type and status.
    pub fn list(
        &self,
        job_type: Option<&str>,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Vec<Job> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut selected: Vec<Job> = jobs
            .values()
            .filter(|job| job_type.map(|t| job.job_type == t).unwrap_or(true))
            .filter(|job| status.map(|s| job.status == s).unwrap_or(true))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        selected.truncate(limit);
        selected
    }

    /// Drop terminal jobs older than the cutoff. Returns the removed count.
    pub fn cleanup(&self, max_age_hours: i64) -> usize {
        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal()
                && job.completed_at.map(|t| t < cutoff).unwrap_or(false))
        });
        let removed = before - jobs.len();
        if removed > 0 {
            info!(removed, "old jobs cleaned up");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lifecycle_timestamps() {
        let registry = JobRegistry::new();
        let id = registry.create("index", Payload::new());

        let job = registry.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());

        registry.update(&id, JobUpdate::status(JobStatus::Running));
        let started = registry.get(&id).unwrap().started_at.unwrap();

        // Second transition to running must not move started_at.
        registry.update(&id, JobUpdate::status(JobStatus::Running));
        assert_eq!(registry.get(&id).unwrap().started_at.unwrap(), started);

        registry.update(
            &id,
            JobUpdate {
                status: Some(JobStatus::Completed),
                result: Some(json!({"files_processed": 3})),
                ..Default::default()
            },
        );
        let job = registry.get(&id).unwrap();
        assert!(job.completed_at.is_some());
        assert_eq!(job.result.unwrap()["files_processed"], json!(3));
    }

    #[test]
    fn test_unknown_id_is_false() {
        let registry = JobRegistry::new();
        assert!(!registry.update("missing", JobUpdate::progress(50)));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_list_sorted_and_filtered() {
        let registry = JobRegistry::new();
        let first = registry.create("index", Payload::new());
        let second = registry.create("normalize", Payload::new());
        registry.update(&second, JobUpdate::status(JobStatus::Running));

        let all = registry.list(None, None, 10);
        assert_eq!(all.len(), 2);

        let running = registry.list(None, Some(JobStatus::Running), 10);
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, second);

        let index_jobs = registry.list(Some("index"), None, 10);
        assert_eq!(index_jobs.len(), 1);
        assert_eq!(index_jobs[0].id, first);
    }

    #[test]
    fn test_cleanup_only_removes_old_terminal_jobs() {
        let registry = JobRegistry::new();
        let done = registry.create("index", Payload::new());
        let active = registry.create("index", Payload::new());
        registry.update(&done, JobUpdate::status(JobStatus::Completed));
        registry.update(&active, JobUpdate::status(JobStatus::Running));

        // Force the completed job into the past.
        {
            let mut jobs = registry.jobs.lock().unwrap();
            jobs.get_mut(&done).unwrap().completed_at =
                Some(Utc::now() - Duration::hours(48));
        }

        assert_eq!(registry.cleanup(24), 1);
        assert!(registry.get(&done).is_none());
        assert!(registry.get(&active).is_some());
    }

    #[test]
    fn test_progress_clamped() {
        let registry = JobRegistry::new();
        let id = registry.create("index", Payload::new());
        registry.update(&id, JobUpdate::progress(200));
        assert_eq!(registry.get(&id).unwrap().progress, 100);
    }
}
