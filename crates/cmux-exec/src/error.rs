//! Error types for the exec transports.

use thiserror::Error;

fn command_failure_message(label: &str, exit_code: &i32, stdout: &str, stderr: &str) -> String {
    let mut parts = vec![format!("{label} failed with exit code {exit_code}")];
    if !stdout.trim().is_empty() {
        parts.push(format!("stdout:\n{}", stdout.trim_end()));
    }
    if !stderr.trim().is_empty() {
        parts.push(format!("stderr:\n{}", stderr.trim_end()));
    }
    parts.join("\n")
}

/// Errors surfaced when running remote commands.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The executed command exited non-zero. Transport worked; the command
    /// itself failed.
    #[error("{}", command_failure_message(.label, .exit_code, .stdout, .stderr))]
    CommandFailed {
        label: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Request-level failure (connection error, or transient 5xx after the
    /// retry budget was exhausted).
    #[error("exec service request failed: {0}")]
    Transport(String),

    /// The exec endpoint answered with a non-200 status.
    #[error("exec service returned status {status}: {body}")]
    Protocol { status: u16, body: String },

    /// Health polling gave up.
    #[error("exec service did not become ready")]
    NotReady,

    /// SSH leg failed below the command level.
    #[error(transparent)]
    Cloud(#[from] cmux_cloud::CloudError),
}

impl ExecError {
    /// Exit code when the command itself ran and failed.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::CommandFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failure_includes_label_code_and_output() {
        let err = ExecError::CommandFailed {
            label: "check-bun".to_string(),
            exit_code: 2,
            stdout: "partial\n".to_string(),
            stderr: "boom\n".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("check-bun failed with exit code 2"));
        assert!(message.contains("stdout:\npartial"));
        assert!(message.contains("stderr:\nboom"));
    }

    #[test]
    fn empty_output_sections_are_omitted() {
        let err = ExecError::CommandFailed {
            label: "quiet".to_string(),
            exit_code: 1,
            stdout: "  \n".to_string(),
            stderr: String::new(),
        };
        let message = err.to_string();
        assert_eq!(message, "quiet failed with exit code 1");
    }
}
