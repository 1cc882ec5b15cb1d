pub mod types;

pub use types::{ExecutionRequest, ExecutionResult, Language, ReportDetails};
