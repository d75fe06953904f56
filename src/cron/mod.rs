pub mod schedule;
pub mod service;
pub mod types;

pub use service::{AlertRepository, CronService};
pub use types::{Alert, AlertCondition, CronJob, CronPayload, JobId, JobStatus, Schedule};
