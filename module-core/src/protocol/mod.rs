//! Pack controller protocol: registration, inbound commands, and status reports.

pub mod payload;
pub mod registration;
pub mod report;

pub use registration::{Address, Announcer, Command, Decoded};
pub use report::{ReportContext, ReportRun, StatusReportPipeline};
