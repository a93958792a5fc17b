pub mod content;
pub mod data;
pub mod fetch;
pub mod render;
pub mod service;

pub use service::{GeneratedReport, ReportError, ReportService};
