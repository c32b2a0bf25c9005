use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use strum::FromRepr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(JobId);
uuid_id!(OccurrenceId);

/// An `Occurrence`'s identity is deliberately the same value as its correlation id
/// (see the `Occurrence` invariants) so we use one newtype for both roles.
pub type CorrelationId = OccurrenceId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerInstanceId(pub String);

impl fmt::Display for WorkerInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum OccurrenceStatus {
    Queued = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
    TimedOut = 5,
    Unknown = 6,
}

impl OccurrenceStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OccurrenceStatus::Queued | OccurrenceStatus::Running)
    }

    /// Whether `self -> next` is an allowed occurrence lifecycle transition.
    ///
    /// `Unknown -> {Completed, Failed, Cancelled, TimedOut}` is the one terminal->terminal
    /// transition allowed: a worker's authoritative report arriving after ZombieDetector
    /// already closed the occurrence out from under it (see DESIGN.md open question #1).
    pub fn can_transition_to(self, next: OccurrenceStatus) -> bool {
        use OccurrenceStatus::*;
        match (self, next) {
            (Queued, Running | Cancelled | Unknown | Failed | TimedOut) => true,
            (Running, Completed | Failed | Cancelled | TimedOut | Unknown) => true,
            (Unknown, Completed | Failed | Cancelled | TimedOut) => true,
            (a, b) if a == b => false,
            _ => false,
        }
    }
}

impl fmt::Display for OccurrenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OccurrenceStatus::Queued => "Queued",
            OccurrenceStatus::Running => "Running",
            OccurrenceStatus::Completed => "Completed",
            OccurrenceStatus::Failed => "Failed",
            OccurrenceStatus::Cancelled => "Cancelled",
            OccurrenceStatus::TimedOut => "TimedOut",
            OccurrenceStatus::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRepr)]
#[repr(i32)]
pub enum ConcurrentPolicy {
    Skip = 0,
    Queue = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub category: String,
    pub data: Option<serde_json::Value>,
    pub exception_type: Option<String>,
}

impl LogEntry {
    pub fn dispatcher(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.into(),
            category: "Dispatcher".to_string(),
            data: None,
            exception_type: None,
        }
    }

    pub fn zombie_detector(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Error,
            message: message.into(),
            category: "ZombieDetector".to_string(),
            data: None,
            exception_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: Option<OccurrenceStatus>,
    pub to: OccurrenceStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoDisableConfig {
    pub enabled: bool,
    pub threshold: u32,
    pub window_minutes: i64,
}

impl Default for AutoDisableConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            window_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoDisableState {
    pub consecutive_failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
}

/// Either a recurring job (`cron`) or a one-shot job (`execute_at`). Exactly one is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Schedule {
    Cron(String),
    Once(DateTime<Utc>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub description: Option<String>,
    pub tags: HashSet<String>,
    pub owner_user: String,
    pub worker_class: String,
    pub job_kind: String,
    pub job_data: Option<String>,
    pub schedule: Schedule,
    pub is_active: bool,
    pub concurrent_policy: ConcurrentPolicy,
    pub execution_timeout_seconds: Option<i64>,
    pub zombie_timeout_minutes: Option<i64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub auto_disable_config: AutoDisableConfig,
    pub auto_disable_state: AutoDisableState,
}

impl Job {
    pub fn routing_key(&self) -> String {
        format!("job.{}.{}", self.worker_class, self.job_kind)
    }

    pub fn is_schedulable(&self) -> bool {
        self.is_active && self.auto_disable_state.disabled_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OccurrenceResult {
    Success(String),
    Failure(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Occurrence {
    pub id: OccurrenceId,
    pub job_id: JobId,
    pub job_version: i64,
    pub job_name: String,
    pub worker_instance_id: Option<WorkerInstanceId>,
    pub status: OccurrenceStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<String>,
    pub exception: Option<String>,
    pub logs: Vec<LogEntry>,
    pub status_change_log: Vec<StatusChange>,
    pub retry_count: i32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Occurrence {
    /// `correlationId` and `occurrenceId` are the same value by invariant; this accessor
    /// exists so call sites that think in terms of "correlation" read naturally.
    pub fn correlation_id(&self) -> CorrelationId {
        self.id
    }

    pub fn push_log(&mut self, entry: LogEntry, max_count: usize) {
        self.logs.push(entry);
        while self.logs.len() > max_count {
            self.logs.remove(0);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedOccurrence {
    pub job_id: JobId,
    pub occurrence_id: OccurrenceId,
    pub occurred_at: DateTime<Utc>,
    pub last_exception: Option<String>,
    pub worker_instance_id: Option<WorkerInstanceId>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobKindSpec {
    pub job_kind: String,
    pub job_data_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerClass {
    pub name: String,
    pub routing_patterns: Vec<String>,
    pub supported_job_kinds: Vec<JobKindSpec>,
    pub max_parallel_jobs: u32,
    pub version: i64,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInstance {
    pub worker_class: String,
    pub instance_id: WorkerInstanceId,
    pub hostname: String,
    pub ip_address: String,
    pub current_job_count: u32,
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occurrence_lifecycle_allows_unknown_override_but_not_other_terminal_to_terminal() {
        use OccurrenceStatus::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Unknown.can_transition_to(Completed));
        assert!(Unknown.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn log_cap_drops_oldest() {
        let mut occ = Occurrence {
            id: OccurrenceId::new(),
            job_id: JobId::new(),
            job_version: 1,
            job_name: "job".to_string(),
            worker_instance_id: None,
            status: OccurrenceStatus::Queued,
            start_time: None,
            end_time: None,
            duration_ms: None,
            result: None,
            exception: None,
            logs: vec![],
            status_change_log: vec![],
            retry_count: 0,
            last_heartbeat: None,
            created_at: Utc::now(),
        };
        for i in 0..5 {
            occ.push_log(LogEntry::dispatcher(format!("line {i}")), 3);
        }
        assert_eq!(occ.logs.len(), 3);
        assert_eq!(occ.logs[0].message, "line 2");
        assert_eq!(occ.logs[2].message, "line 4");
    }
}
