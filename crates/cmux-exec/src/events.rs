//! NDJSON event frames from the exec daemon.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// One stream frame. Each frame is a single JSON object per
/// newline-delimited line with a `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecEvent {
    Stdout { data: String },
    Stderr { data: String },
    Exit { code: Value },
    Error { message: String },
}

/// Folds stream lines into the final stdout/stderr buffers and exit code,
/// mirroring output to the log line by line under a `[label]` prefix.
///
/// Malformed JSON and unknown event types are recorded as stderr noise and
/// never abort the stream.
#[derive(Debug)]
pub(crate) struct EventAccumulator {
    label: String,
    stdout: Vec<String>,
    stderr: Vec<String>,
    exit_code: Option<i32>,
}

impl EventAccumulator {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
        }
    }

    pub(crate) fn note_line(&mut self, line: &str) {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return;
        }
        let event: ExecEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(_) => {
                let noise = format!("invalid exec response: {line}");
                info!("[{}][stderr] {noise}", self.label);
                self.stderr.push(noise);
                return;
            }
        };
        match event {
            ExecEvent::Stdout { data } => {
                for sub_line in data.lines() {
                    info!("[{}] {sub_line}", self.label);
                }
                self.stdout.push(data);
            }
            ExecEvent::Stderr { data } => {
                for sub_line in data.lines() {
                    info!("[{}][stderr] {sub_line}", self.label);
                }
                self.stderr.push(data);
            }
            ExecEvent::Exit { code } => {
                self.exit_code = Some(parse_exit_code(&code));
            }
            ExecEvent::Error { message } => {
                info!("[{}][stderr] {message}", self.label);
                self.stderr.push(message);
            }
        }
    }

    pub(crate) fn finish(self) -> (Option<i32>, String, String) {
        (self.exit_code, self.stdout.concat(), self.stderr.concat())
    }
}

/// Exit codes arrive as numbers or strings; anything unparsable counts as 1.
fn parse_exit_code(code: &Value) -> i32 {
    match code {
        Value::Number(n) => n.as_i64().map(|c| c as i32).unwrap_or(1),
        Value::String(s) => s.trim().parse().unwrap_or(1),
        Value::Null => 0,
        _ => 1,
    }
}
