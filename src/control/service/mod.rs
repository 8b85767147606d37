//! Service commands:
//! - `service.start` / `service.stop` / `service.restart`
//! - `service.status` - state of one job
//! - `service.list` - state of every job

mod lifecycle;
mod status;

pub use lifecycle::ServiceLifecycleCommand;
pub use status::{ListServicesCommand, ServiceStatusCommand};
