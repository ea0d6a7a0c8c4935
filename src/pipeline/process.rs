//! Subprocess invocation for executables and values transforms
//!
//! The child gets exactly the configured environment, the serialized
//! variables on stdin, and has stdout and stderr captured in full. Stdin is
//! written from its own task so a child that fills its output pipes before
//! reading all input cannot deadlock against us.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// Exit code and captured output of a finished child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run `program` with `input` on stdin and only `env` in its environment
pub async fn run_with_input(
    program: &Path,
    env: &BTreeMap<String, String>,
    input: Vec<u8>,
) -> Result<RunResult, ProcessError> {
    let shown = program.display().to_string();

    let mut child = Command::new(program)
        .env_clear()
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProcessError::CommandNotFound(shown.clone()),
            _ => ProcessError::ExecutionFailed(format!("{shown}: {e}")),
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| ProcessError::ExecutionFailed(format!("{shown}: stdin unavailable")))?;
    let writer = tokio::spawn(async move {
        let written = stdin.write_all(&input).await;
        drop(stdin);
        written
    });

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ProcessError::ExecutionFailed(format!("{shown}: {e}")))?;

    match writer.await {
        Ok(Ok(())) => {}
        // The child exited without reading all of its input
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        Ok(Err(e)) => {
            return Err(ProcessError::ExecutionFailed(format!(
                "{shown}: writing stdin: {e}"
            )))
        }
        Err(e) => {
            return Err(ProcessError::ExecutionFailed(format!(
                "{shown}: stdin writer: {e}"
            )))
        }
    }

    let result = RunResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: output.stdout,
        stderr: output.stderr,
    };
    debug!(program = %shown, exit_code = result.exit_code, "Subprocess finished");
    Ok(result)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    pub(crate) fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub(crate) fn env() -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
        env.insert("MY_VAR".to_string(), "my_value".to_string());
        env
    }

    #[test]
    fn test_run_result_passed() {
        let result = RunResult {
            exit_code: 0,
            stdout: b"All good".to_vec(),
            stderr: Vec::new(),
        };
        assert!(result.passed());
        assert_eq!(result.stdout_text(), "All good");

        let result = RunResult {
            exit_code: 1,
            stdout: Vec::new(),
            stderr: b"failed".to_vec(),
        };
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_stdin_reaches_child() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "echo-line.sh", "read line\necho \"got: $line\"");

        let result = run_with_input(&program, &env(), b"{\"a\":1}\n".to_vec())
            .await
            .unwrap();

        assert!(result.passed());
        assert_eq!(result.stdout_text(), "got: {\"a\":1}\n");
    }

    #[tokio::test]
    async fn test_environment_is_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "show-env.sh", "env");

        let result = run_with_input(&program, &env(), Vec::new()).await.unwrap();

        let stdout = result.stdout_text();
        assert!(stdout.contains("MY_VAR=my_value"), "{stdout}");
        assert!(!stdout.contains("HOME="), "{stdout}");
    }

    #[tokio::test]
    async fn test_failure_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "fail.sh", "echo out\necho bad >&2\nexit 3");

        let result = run_with_input(&program, &env(), Vec::new()).await.unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout_text(), "out\n");
        assert_eq!(result.stderr_text(), "bad\n");
    }

    #[tokio::test]
    async fn test_large_output_without_reading_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(
            dir.path(),
            "noisy.sh",
            "i=0\nwhile [ $i -lt 20000 ]; do echo \"line $i\"; i=$((i+1)); done",
        );
        let input = vec![b'x'; 1 << 20];

        let result = run_with_input(&program, &env(), input).await.unwrap();

        assert!(result.passed());
        assert!(result.stdout.len() > 100_000);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_with_input(Path::new("/nonexistent/program"), &env(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::CommandNotFound(_)));
        assert!(err.to_string().contains("/nonexistent/program"));
    }
}
