use chrono::{DateTime, Utc};
use milvaion_common::model::{JobId, LogEntry, OccurrenceId, WorkerInstanceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub occurrence_id: OccurrenceId,
    pub correlation_id: OccurrenceId,
    pub job_id: JobId,
    pub job_version: i64,
    pub job_kind: String,
    pub job_data: Option<String>,
    pub worker_class: String,
    pub dispatched_at: DateTime<Utc>,
    pub execution_timeout_seconds: Option<i64>,
    pub retry_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateMessage {
    pub correlation_id: OccurrenceId,
    pub job_id: JobId,
    pub worker_instance_id: WorkerInstanceId,
    pub status: i32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<String>,
    pub exception: Option<String>,
    pub message_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub correlation_id: OccurrenceId,
    pub worker_instance_id: WorkerInstanceId,
    pub log: LogEntry,
    pub message_timestamp: DateTime<Utc>,
}
