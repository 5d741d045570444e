//! Command values and pre-send decoration.

/// A remote command: either a shell script or an argv vector.
///
/// Shell scripts always run under `bash -lc` with `set -euo pipefail`
/// prepended; argv vectors are shell-joined so the daemon's executor always
/// receives a single command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Shell(String),
    Argv(Vec<String>),
}

impl Command {
    pub fn shell(script: impl Into<String>) -> Self {
        Command::Shell(script.into())
    }

    pub fn argv<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command::Argv(parts.into_iter().map(Into::into).collect())
    }

    /// The words actually executed: `["bash", "-lc", <script>]` for shell
    /// form, the argv itself otherwise.
    pub fn shell_words(&self) -> Vec<String> {
        match self {
            Command::Shell(script) => vec![
                "bash".to_string(),
                "-lc".to_string(),
                format!("set -euo pipefail\n{script}"),
            ],
            Command::Argv(parts) => parts.clone(),
        }
    }

    /// Single shell-safe command line for the exec wire protocol.
    pub fn to_exec_string(&self) -> String {
        join_words(&self.shell_words())
    }

    /// Flatten to plain script text (no `bash -lc` wrapper), for embedding
    /// under a decoration prelude.
    fn flatten(&self) -> String {
        match self {
            Command::Shell(script) => script.clone(),
            Command::Argv(parts) => join_words(parts),
        }
    }
}

impl From<&str> for Command {
    fn from(script: &str) -> Self {
        Command::Shell(script.to_string())
    }
}

impl From<String> for Command {
    fn from(script: String) -> Self {
        Command::Shell(script)
    }
}

fn join_words(words: &[String]) -> String {
    shlex::try_join(words.iter().map(String::as_str)).unwrap_or_else(|_| words.join(" "))
}

fn quote(word: &str) -> String {
    shlex::try_quote(word)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| word.to_string())
}

/// Decorate a command before it enters a backend: environment prelude
/// first, then (when attached and requested) the cgroup join.
///
/// The join writes the shell's own PID into `<cgroup>/cgroup.procs`,
/// tolerating a missing or unwritable file. Bootstrap commands (starting
/// the daemon itself) pass `join_cgroup = false`.
pub fn decorate(
    command: &Command,
    env_prelude: Option<&str>,
    cgroup_path: Option<&str>,
    join_cgroup: bool,
) -> Command {
    let mut script = command.flatten();
    if let Some(prelude) = env_prelude {
        if !prelude.is_empty() {
            script = format!("{prelude}\n{script}");
        }
    }
    if join_cgroup {
        if let Some(cgroup) = cgroup_path {
            let quoted = quote(cgroup);
            let join = format!(
                "if [ -d {quoted} ] && [ -w {quoted}/cgroup.procs ]; then\n    printf '%d\\n' $$ > {quoted}/cgroup.procs || true\nfi"
            );
            script = format!("{join}\n{script}");
        }
    }
    Command::Shell(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_command_wraps_with_pipefail_bash() {
        let command = Command::shell("echo hi");
        let words = command.shell_words();
        assert_eq!(words[0], "bash");
        assert_eq!(words[1], "-lc");
        assert_eq!(words[2], "set -euo pipefail\necho hi");

        // The wire string round-trips back to the same words.
        let wire = command.to_exec_string();
        let parsed = shlex::split(&wire).expect("wire string splits");
        assert_eq!(parsed, words);
    }

    #[test]
    fn argv_command_is_joined_not_wrapped() {
        let command = Command::argv(["ls", "-l", "/tmp/has space"]);
        let wire = command.to_exec_string();
        let parsed = shlex::split(&wire).unwrap();
        assert_eq!(parsed, vec!["ls", "-l", "/tmp/has space"]);
        assert!(!wire.contains("pipefail"));
    }

    #[test]
    fn decorate_prepends_env_then_cgroup() {
        let command = Command::shell("make install");
        let decorated = decorate(
            &command,
            Some("export PATH=/usr/local/bin:$PATH"),
            Some("/sys/fs/cgroup/cmux-provision"),
            true,
        );
        match decorated {
            Command::Shell(script) => {
                let join_at = script.find("cgroup.procs").unwrap();
                let env_at = script.find("export PATH").unwrap();
                let cmd_at = script.find("make install").unwrap();
                assert!(join_at < env_at && env_at < cmd_at, "script: {script}");
                assert!(script.contains("|| true"));
            }
            other => panic!("expected shell command, got {other:?}"),
        }
    }

    #[test]
    fn decorate_skips_cgroup_when_bypassed() {
        let command = Command::shell("start daemon");
        let decorated = decorate(&command, Some("export A=1"), Some("/sys/fs/cgroup/x"), false);
        match decorated {
            Command::Shell(script) => {
                assert!(!script.contains("cgroup.procs"));
                assert!(script.starts_with("export A=1\n"));
            }
            other => panic!("expected shell command, got {other:?}"),
        }
    }

    #[test]
    fn decorate_flattens_argv_commands() {
        let command = Command::argv(["touch", "/tmp/file with space"]);
        let decorated = decorate(&command, None, Some("/sys/fs/cgroup/x"), true);
        match decorated {
            Command::Shell(script) => {
                assert!(script.contains("cgroup.procs"));
                let requoted = shlex::split(&script).is_some();
                assert!(requoted, "flattened argv stays shell-parseable: {script}");
                assert!(script.contains("file with space"));
            }
            other => panic!("expected shell command, got {other:?}"),
        }
    }
}
