//! SSH fallback path through the cloud SDK's exec channel.
//!
//! Used for bootstrap commands that must not depend on the daemon they are
//! about to start. Transient connection-level failures (reset, closed
//! channel) are retried with linear backoff.

use crate::command::Command;
use crate::error::ExecError;
use crate::{ExecOutcome, ExecResult};
use cmux_cloud::InstanceHandle;
use std::time::Duration;
use tracing::info;

const MAX_EXTRA_ATTEMPTS: u32 = 3;

/// Run a command over SSH with retry, mirroring output line by line.
pub async fn run_via_ssh(
    instance: &dyn InstanceHandle,
    label: &str,
    command: &Command,
) -> ExecOutcome<ExecResult> {
    let command_str = command.to_exec_string();
    let mut attempt: u32 = 0;
    let result = loop {
        match instance.exec(&command_str).await {
            Ok(result) => break result,
            Err(err) if err.is_transient() && attempt < MAX_EXTRA_ATTEMPTS => {
                let delay = Duration::from_secs_f64(1.0 + 0.5 * f64::from(attempt));
                info!(
                    "[{label}] transient SSH failure ({err}), retrying in {:.1}s (attempt {}/{MAX_EXTRA_ATTEMPTS})",
                    delay.as_secs_f64(),
                    attempt + 1,
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(ExecError::Cloud(err)),
        }
    };

    for line in result.stdout.lines() {
        info!("[{label}] {line}");
    }
    for line in result.stderr.lines() {
        info!("[{label}][stderr] {line}");
    }

    if !result.success() {
        return Err(ExecError::CommandFailed {
            label: label.to_string(),
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmux_cloud::fakes::FakeInstance;
    use cmux_cloud::ExecResult;

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_then_succeed() {
        let instance = FakeInstance::new("morphvm_ssh1");
        instance.fail_transient_times("echo ok", 2);

        let result = run_via_ssh(instance.as_ref(), "probe", &Command::shell("echo ok"))
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(instance.commands().len(), 3, "two failures plus success");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let instance = FakeInstance::new("morphvm_ssh2");
        instance.fail_transient_times("echo ok", 10);

        let err = run_via_ssh(instance.as_ref(), "probe", &Command::shell("echo ok"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Cloud(_)));
        assert_eq!(instance.commands().len(), 4, "initial try plus three retries");
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_as_command_failure() {
        let instance = FakeInstance::new("morphvm_ssh3");
        instance.respond_to(
            "false",
            ExecResult {
                exit_code: 2,
                stdout: String::new(),
                stderr: "boom".to_string(),
            },
        );

        let err = run_via_ssh(instance.as_ref(), "verify", &Command::shell("false"))
            .await
            .unwrap_err();
        match err {
            ExecError::CommandFailed {
                label,
                exit_code,
                stderr,
                ..
            } => {
                assert_eq!(label, "verify");
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected command failure, got {other}"),
        }
    }

    #[tokio::test]
    async fn commands_arrive_as_single_lines() {
        let instance = FakeInstance::new("morphvm_ssh4");
        run_via_ssh(
            instance.as_ref(),
            "setup",
            &Command::shell("mkdir -p /var/log\necho done"),
        )
        .await
        .unwrap();

        let commands = instance.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].starts_with("bash -lc"));
        assert!(commands[0].contains("set -euo pipefail"));
    }
}
