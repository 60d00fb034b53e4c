//! Metrics for the orchestration engine.
//!
//! Provides structs for job metrics, system metrics, and engine snapshots
//! with JSON serialization support. The snapshot is shared behind an
//! `Arc<RwLock<_>>` and served by the status HTTP endpoint.

use crate::job::{Job, JobStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-job metrics row for the status surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    pub id: String,
    pub task: String,
    pub status: String,
    pub backend: Option<String>,
    pub attempts: u32,
    pub variants: usize,
    pub created_at_unix_ms: i64,
    /// Milliseconds from creation to the last mutation.
    pub elapsed_ms: i64,
    pub last_error: Option<String>,
}

impl From<&Job> for JobMetrics {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            task: job.task.to_string(),
            status: job.status.to_string(),
            backend: job.backend.map(|b| b.to_string()),
            attempts: job.attempts,
            variants: job.variant_ids.len(),
            created_at_unix_ms: job.created_at,
            elapsed_ms: job.updated_at.saturating_sub(job.created_at),
            last_error: job.last_error.clone(),
        }
    }
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 0.0,
            mem_usage_percent: 0.0,
            load_avg_1: 0.0,
            load_avg_5: 0.0,
            load_avg_15: 0.0,
        }
    }
}

/// Complete engine snapshot: jobs, system, and aggregate counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSnapshot {
    pub timestamp_unix_ms: i64,
    pub jobs: Vec<JobMetrics>,
    pub system: SystemMetrics,
    pub queued_jobs: usize,
    pub running_jobs: usize,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub variants_produced: u64,
    /// Jobs that succeeded only after falling back past the first backend.
    pub fallback_activations: u64,
    /// Stalled jobs recovered back into the queue.
    pub recovered_jobs: u64,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            timestamp_unix_ms: 0,
            jobs: Vec::new(),
            system: SystemMetrics::default(),
            queued_jobs: 0,
            running_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            variants_produced: 0,
            fallback_activations: 0,
            recovered_jobs: 0,
        }
    }
}

impl EngineSnapshot {
    /// Insert or replace the row for a job and refresh the active counts.
    pub fn upsert_job(&mut self, job: &Job) {
        let row = JobMetrics::from(job);
        if let Some(existing) = self.jobs.iter_mut().find(|j| j.id == row.id) {
            *existing = row;
        } else {
            self.jobs.push(row);
        }
        self.recount();
    }

    fn recount(&mut self) {
        self.queued_jobs = self
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Queued.to_string())
            .count();
        self.running_jobs = self
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running.to_string())
            .count();
    }
}

/// Shared metrics state for concurrent access across engine components
pub type SharedMetrics = Arc<RwLock<EngineSnapshot>>;

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(EngineSnapshot::default()))
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}
