//! Real device-automation runner.
//!
//! Shells out to the AppWright CLI and maps the subprocess outcome onto the
//! runner contract. Target-specific configuration (APK lookup, BrowserStack
//! credentials) is assembled before the run.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::TargetType;

use super::{validate_test_file, TestResults, TestRunner};

/// Subprocess timeout for one test invocation.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Runner that executes AppWright tests on real targets.
pub struct AppwrightRunner {
    target: TargetType,
    workspace_dir: PathBuf,
}

impl AppwrightRunner {
    pub fn new(target: TargetType) -> Self {
        Self {
            target,
            workspace_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Build the device/provider configuration for this target.
    fn target_config(&self, app_version_id: &str) -> AppResult<JsonValue> {
        match self.target {
            TargetType::Emulator => Ok(serde_json::json!({
                "platform": "ANDROID",
                "device": {"provider": "emulator"},
                "buildPath": self.find_apk(app_version_id),
                "automationName": "uiautomator2",
            })),
            TargetType::Device => Ok(serde_json::json!({
                "platform": "ANDROID",
                "device": {"provider": "device"},
                "buildPath": self.find_apk(app_version_id),
                "automationName": "uiautomator2",
            })),
            TargetType::Browserstack => {
                let username = std::env::var("BROWSERSTACK_USERNAME").ok();
                let access_key = std::env::var("BROWSERSTACK_ACCESS_KEY").ok();

                let device = match (username, access_key) {
                    (Some(username), Some(access_key)) => serde_json::json!({
                        "provider": "browserstack",
                        "username": username,
                        "accessKey": access_key,
                        "name": "Google Pixel 7",
                        "osVersion": "13.0",
                    }),
                    _ => {
                        warn!("BrowserStack credentials not found, using demo mode");
                        serde_json::json!({
                            "provider": "browserstack",
                            "name": "Google Pixel 7",
                            "osVersion": "13.0",
                        })
                    }
                };

                Ok(serde_json::json!({
                    "platform": "ANDROID",
                    "device": device,
                    "buildPath": "builds/wikipedia.apk",
                    "automationName": "uiautomator2",
                }))
            }
        }
    }

    /// Find the APK for an app version, falling back to any APK in `apps/`.
    fn find_apk(&self, app_version_id: &str) -> String {
        let apps_dir = self.workspace_dir.join("apps");

        let version_apk = apps_dir.join(format!("{}.apk", app_version_id));
        if version_apk.exists() {
            return version_apk.to_string_lossy().to_string();
        }

        if let Ok(entries) = std::fs::read_dir(&apps_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("apk") {
                    return path.to_string_lossy().to_string();
                }
            }
        }

        "apps/test123.apk".to_string()
    }
}

#[async_trait]
impl TestRunner for AppwrightRunner {
    async fn run_tests(&self, test_path: &str, app_version_id: &str) -> AppResult<TestResults> {
        info!(
            "Starting AppWright test execution: {} on {}",
            test_path, self.target
        );

        validate_test_file(test_path).map_err(AppError::Execution)?;

        let config = self.target_config(app_version_id)?;

        let start = Instant::now();
        let child = Command::new("npx")
            .args([
                "appwright",
                "test",
                test_path,
                "--config",
                "appwright.config.ts",
                "--reporter",
                "json",
                "--project",
                "android",
                "--trace",
                "on",
            ])
            .current_dir(&self.workspace_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::Execution(format!("Failed to spawn appwright: {}", e)))?;

        let output = tokio::time::timeout(COMMAND_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                AppError::Execution(format!(
                    "Command timed out after {} seconds",
                    COMMAND_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| AppError::Execution(format!("Failed to run command: {}", e)))?;

        let execution_time = start.elapsed().as_secs_f64();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        info!(
            "AppWright command completed with return code {:?} in {:.2}s",
            output.status.code(),
            execution_time
        );

        if !output.status.success() {
            let error = if stderr.is_empty() {
                format!("Exit code: {:?}", output.status.code())
            } else {
                stderr
            };
            return Err(AppError::Execution(error));
        }

        Ok(TestResults {
            test_file: test_path.to_string(),
            app_version_id: app_version_id.to_string(),
            target: self.target,
            execution_time_secs: execution_time,
            tests_run: 1,
            tests_passed: 1,
            tests_failed: 0,
            details: serde_json::json!({
                "target_config": config,
                "test_output": stdout,
            }),
        })
    }
}
