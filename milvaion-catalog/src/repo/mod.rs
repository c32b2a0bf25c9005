pub mod failed_occurrence;
pub mod job;
pub mod occurrence;

pub use failed_occurrence::{FailedOccurrenceRepo, PostgresFailedOccurrenceRepo};
pub use job::{JobEdit, JobRepo, PostgresJobRepo};
pub use occurrence::{OccurrenceRepo, PostgresOccurrenceRepo, StatusReport};
