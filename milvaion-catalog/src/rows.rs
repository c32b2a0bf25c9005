use chrono::{DateTime, Utc};
use milvaion_common::model::{
    AutoDisableConfig, AutoDisableState, ConcurrentPolicy, FailedOccurrence, Job, JobId, LogEntry,
    Occurrence, OccurrenceId, OccurrenceStatus, Schedule, StatusChange, WorkerInstanceId,
};
use std::collections::HashSet;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tags: serde_json::Value,
    pub owner_user: String,
    pub worker_class: String,
    pub job_kind: String,
    pub job_data: Option<String>,
    pub cron_expression: Option<String>,
    pub execute_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub concurrent_policy: i16,
    pub execution_timeout_seconds: Option<i64>,
    pub zombie_timeout_minutes: Option<i64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub auto_disable_enabled: bool,
    pub auto_disable_threshold: i32,
    pub auto_disable_window_minutes: i64,
    pub consecutive_failure_count: i32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let schedule = match (row.cron_expression, row.execute_at) {
            (Some(cron), None) => Schedule::Cron(cron),
            (None, Some(at)) => Schedule::Once(at),
            // The DB-level check constraint `jobs_schedule_exclusive` rules this out; a
            // row surviving that constraint with neither or both set is unreachable.
            _ => unreachable!("jobs_schedule_exclusive check constraint violated"),
        };
        let tags = serde_json::from_value::<Vec<String>>(row.tags)
            .unwrap_or_default()
            .into_iter()
            .collect::<HashSet<_>>();
        Job {
            id: JobId(row.id),
            name: row.name,
            description: row.description,
            tags,
            owner_user: row.owner_user,
            worker_class: row.worker_class,
            job_kind: row.job_kind,
            job_data: row.job_data,
            schedule,
            is_active: row.is_active,
            concurrent_policy: if row.concurrent_policy == 1 {
                ConcurrentPolicy::Queue
            } else {
                ConcurrentPolicy::Skip
            },
            execution_timeout_seconds: row.execution_timeout_seconds,
            zombie_timeout_minutes: row.zombie_timeout_minutes,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
            auto_disable_config: AutoDisableConfig {
                enabled: row.auto_disable_enabled,
                threshold: row.auto_disable_threshold as u32,
                window_minutes: row.auto_disable_window_minutes,
            },
            auto_disable_state: AutoDisableState {
                consecutive_failure_count: row.consecutive_failure_count as u32,
                last_failure_time: row.last_failure_time,
                disabled_at: row.disabled_at,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
pub struct OccurrenceRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub job_version: i64,
    pub job_name: String,
    pub worker_instance_id: Option<String>,
    pub status: i16,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<String>,
    pub exception: Option<String>,
    pub logs: serde_json::Value,
    pub status_change_log: serde_json::Value,
    pub retry_count: i32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub fn status_from_i16(value: i16) -> OccurrenceStatus {
    match value {
        0 => OccurrenceStatus::Queued,
        1 => OccurrenceStatus::Running,
        2 => OccurrenceStatus::Completed,
        3 => OccurrenceStatus::Failed,
        4 => OccurrenceStatus::Cancelled,
        5 => OccurrenceStatus::TimedOut,
        _ => OccurrenceStatus::Unknown,
    }
}

pub fn status_to_i16(status: OccurrenceStatus) -> i16 {
    status as i16
}

impl From<OccurrenceRow> for Occurrence {
    fn from(row: OccurrenceRow) -> Self {
        Occurrence {
            id: OccurrenceId(row.id),
            job_id: JobId(row.job_id),
            job_version: row.job_version,
            job_name: row.job_name,
            worker_instance_id: row.worker_instance_id.map(WorkerInstanceId),
            status: status_from_i16(row.status),
            start_time: row.start_time,
            end_time: row.end_time,
            duration_ms: row.duration_ms,
            result: row.result,
            exception: row.exception,
            logs: serde_json::from_value::<Vec<LogEntry>>(row.logs).unwrap_or_default(),
            status_change_log: serde_json::from_value::<Vec<StatusChange>>(row.status_change_log)
                .unwrap_or_default(),
            retry_count: row.retry_count,
            last_heartbeat: row.last_heartbeat,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub struct FailedOccurrenceRow {
    pub occurrence_id: Uuid,
    pub job_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub last_exception: Option<String>,
    pub worker_instance_id: Option<String>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<FailedOccurrenceRow> for FailedOccurrence {
    fn from(row: FailedOccurrenceRow) -> Self {
        FailedOccurrence {
            job_id: JobId(row.job_id),
            occurrence_id: OccurrenceId(row.occurrence_id),
            occurred_at: row.occurred_at,
            last_exception: row.last_exception,
            worker_instance_id: row.worker_instance_id.map(WorkerInstanceId),
            resolved: row.resolved,
            resolved_at: row.resolved_at,
        }
    }
}
