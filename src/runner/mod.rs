//! Test-execution backends.
//!
//! A single capability interface with two implementations selected by
//! configuration at construction time: a fast local validator and a real
//! runner that shells out to the AppWright CLI.

pub mod appwright;
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::RunnerKind;
use crate::error::AppResult;
use crate::models::TargetType;

pub use appwright::AppwrightRunner;
pub use mock::MockRunner;

/// Results of one test execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    /// Test file that was executed.
    pub test_file: String,
    /// App build the test ran against.
    pub app_version_id: String,
    /// Execution target.
    pub target: TargetType,
    /// Wall-clock execution time in seconds.
    pub execution_time_secs: f64,
    pub tests_run: i32,
    pub tests_passed: i32,
    pub tests_failed: i32,
    /// Backend-specific detail payload.
    pub details: JsonValue,
}

/// Test execution capability. Failures are returned as
/// `AppError::Execution`; the coordinator resolves them to a terminal job
/// status without aborting sibling batch members.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(&self, test_path: &str, app_version_id: &str) -> AppResult<TestResults>;
}

/// Build the configured runner for a target.
pub fn build_runner(kind: RunnerKind, target: TargetType) -> Arc<dyn TestRunner> {
    match kind {
        RunnerKind::Mock => Arc::new(MockRunner::new(target)),
        RunnerKind::Appwright => Arc::new(AppwrightRunner::new(target)),
    }
}

/// Shared test-file validation: the artifact must exist and carry a
/// recognized extension.
pub(crate) fn validate_test_file(test_path: &str) -> Result<(), String> {
    if !std::path::Path::new(test_path).exists() {
        return Err(format!("Test file not found: {}", test_path));
    }

    const VALID_EXTENSIONS: &[&str] = &[".js", ".ts", ".spec.js", ".spec.ts"];
    if !VALID_EXTENSIONS.iter().any(|ext| test_path.ends_with(ext)) {
        return Err(format!("Invalid test file format: {}", test_path));
    }

    Ok(())
}
