//! Read-side services over the coordinator's stores.

pub mod job_status;

pub use job_status::{ComponentStatus, JobStatus, JobStatusService};
