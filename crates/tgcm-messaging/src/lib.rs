pub mod config;
pub mod coordinator;
pub mod job;
pub mod pacer;
pub mod types;

pub use config::DispatchConfig;
pub use coordinator::BulkMessageCoordinator;
pub use types::{
    BulkMessageRequest, DirectSendResult, FailureKind, FailureRecord, JobSnapshot, JobStatus,
    SubmittedJob,
};
