//! Service lifecycle management.
//!
//! - `job`: one lifecycle state machine per service
//! - `supervisor`: the set of jobs for the configuration in effect
//! - `shell`: the session loop reacting to restart and quit requests

mod job;
mod shell;
mod supervisor;

pub use job::{JobState, JobStatus, ProcessJob};
pub use shell::{run, ShellSignal};
pub use supervisor::{ServiceOp, Supervisor};
