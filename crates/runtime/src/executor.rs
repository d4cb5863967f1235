//! Local subprocess execution.
//!
//! Spawns a prepared argv, streams stdout/stderr line by line into the log,
//! folds output lines into the run's outputs and kills the child when the
//! run's cancellation token fires.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use indexmap::IndexMap;
use serde_json::Value;
use studio_types::{StudioError, StudioResult};
use studio_util::redact_sensitive;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Cleanup;
use crate::outputs::OutputCollector;

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Default)]
pub struct ExecuteOptions {
    pub argv: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Added to the inherited process environment.
    pub env: IndexMap<String, String>,
    pub run_id: String,
    pub max_output_line_bytes: Option<usize>,
    pub cancel: CancellationToken,
    /// Runs once the child has exited.
    pub cleanup: Option<Cleanup>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub cancelled: bool,
    pub outputs: Value,
    /// Output lines that could not be parsed.
    pub output_errors: Vec<String>,
    /// Last lines written to stderr.
    pub stderr_tail: Vec<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.exit_code == Some(0)
    }

    /// The process died from a signal it did not ask for.
    pub fn was_killed(&self) -> bool {
        !self.cancelled && matches!(self.exit_code, None | Some(-1))
    }

    /// Short description of a failed run, suitable for the run's outputs.
    pub fn error_message(&self) -> String {
        let status = match self.exit_code {
            Some(code) => format!("process exited with status {code}"),
            None => "process was killed".to_string(),
        };
        match self.stderr_tail.last() {
            Some(line) => format!("{status}: {line}"),
            None => status,
        }
    }
}

/// Next line without its terminator, with invalid UTF-8 replaced. Returns
/// `None` at EOF or on a read error, so callers drain the pipe to the end.
async fn read_lossy_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<String> {
    let mut buf = Vec::new();
    match reader.read_until(b'\n', &mut buf).await {
        Ok(0) | Err(_) => None,
        Ok(_) => {
            if buf.last() == Some(&b'\n') {
                buf.pop();
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
            }
            Some(String::from_utf8_lossy(&buf).into_owned())
        }
    }
}

/// Run `opts.argv` to completion or cancellation.
pub async fn execute(opts: ExecuteOptions) -> StudioResult<ExecutionOutcome> {
    let ExecuteOptions {
        argv,
        working_dir,
        env,
        run_id,
        max_output_line_bytes,
        cancel,
        cleanup,
    } = opts;

    let Some((program, args)) = argv.split_first() else {
        return Err(StudioError::bad_request("cannot execute an empty command"));
    };
    info!(run_id = %run_id, command = %redact_sensitive(&argv.join(" ")), "starting local run");

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(&env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &working_dir {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) => {
            if let Some(cleanup) = cleanup {
                let _ = cleanup.run().await;
            }
            return Err(StudioError::internal(format!("starting {program}"), error));
        }
    };

    let stdout = child.stdout.take();
    let stdout_run_id = run_id.clone();
    let stdout_task = tokio::spawn(async move {
        let mut collector = OutputCollector::new(max_output_line_bytes);
        let mut errors = Vec::new();
        if let Some(stdout) = stdout {
            let mut reader = BufReader::new(stdout);
            while let Some(line) = read_lossy_line(&mut reader).await {
                info!(run_id = %stdout_run_id, stream = "stdout", "{line}");
                if let Err(error) = collector.feed(&line) {
                    warn!(run_id = %stdout_run_id, error = %error, "ignoring malformed output line");
                    errors.push(error.to_string());
                }
            }
        }
        (collector.into_outputs(), errors)
    });

    let stderr = child.stderr.take();
    let stderr_run_id = run_id.clone();
    let stderr_task = tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = stderr {
            let mut reader = BufReader::new(stderr);
            while let Some(line) = read_lossy_line(&mut reader).await {
                info!(run_id = %stderr_run_id, stream = "stderr", "{line}");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
        Vec::from(tail)
    });

    let (status, cancelled) = tokio::select! {
        status = child.wait() => (status, false),
        _ = cancel.cancelled() => {
            info!(run_id = %run_id, "cancelling local run");
            if let Err(error) = child.start_kill() {
                warn!(run_id = %run_id, error = %error, "failed to kill run process");
            }
            (child.wait().await, true)
        }
    };

    let (outputs, output_errors) = stdout_task
        .await
        .map_err(|error| StudioError::internal("reading run stdout", error))?;
    let stderr_tail = stderr_task
        .await
        .map_err(|error| StudioError::internal("reading run stderr", error))?;

    if let Some(cleanup) = cleanup {
        // A leftover scratch directory does not change the run's result.
        let _ = cleanup.run().await;
    }

    let status = status.map_err(|error| StudioError::internal(format!("waiting for {program}"), error))?;
    let outcome = ExecutionOutcome {
        exit_code: status.code(),
        cancelled,
        outputs,
        output_errors,
        stderr_tail,
    };
    info!(run_id = %run_id, exit_code = ?outcome.exit_code, cancelled, "local run finished");
    Ok(outcome)
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;
    use serde_json::json;

    fn shell(script: &str) -> ExecuteOptions {
        ExecuteOptions {
            argv: vec!["sh".into(), "-c".into(), script.into()],
            run_id: "run_test".into(),
            ..ExecuteOptions::default()
        }
    }

    #[tokio::test]
    async fn collects_outputs_from_stdout() {
        let outcome = execute(shell(
            r#"echo starting; echo 'airplane_output_set {"rows": []}'; echo 'airplane_output_append:rows 1'"#,
        ))
        .await
        .unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.outputs, json!({"rows": [1]}));
        assert!(outcome.output_errors.is_empty());
    }

    #[tokio::test]
    async fn failures_report_exit_status_and_stderr() {
        let outcome = execute(shell("echo boom >&2; exit 3")).await.unwrap();
        assert!(!outcome.succeeded());
        assert!(!outcome.was_killed());
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.error_message(), "process exited with status 3: boom");
    }

    #[tokio::test]
    async fn injects_environment_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = shell(r#"echo "airplane_output_set \"$STUDIO_TEST_VALUE:$(basename "$PWD")\"""#);
        opts.env.insert("STUDIO_TEST_VALUE".into(), "hello".into());
        std::fs::create_dir(dir.path().join("work")).unwrap();
        opts.working_dir = Some(dir.path().join("work"));

        let outcome = execute(opts).await.unwrap();
        assert_eq!(outcome.outputs, json!("hello:work"));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child_and_runs_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("task").join("run");
        std::fs::create_dir_all(&scratch).unwrap();

        let mut opts = shell("exec sleep 30");
        let cancel = opts.cancel.clone();
        opts.cleanup = Some(Cleanup::new(&scratch));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(10), execute(opts))
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.cancelled);
        assert!(!outcome.succeeded());
        assert!(!outcome.was_killed());
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn invalid_utf8_lines_do_not_stop_output_collection() {
        let outcome = execute(shell(
            r#"printf 'caf\351\n'; i=0; while [ $i -lt 20000 ]; do echo "line $i"; i=$((i+1)); done; echo 'airplane_output_set 42'"#,
        ))
        .await
        .unwrap();
        assert!(outcome.succeeded(), "{outcome:?}");
        assert!(!outcome.was_killed());
        assert_eq!(outcome.outputs, json!(42));
    }

    #[tokio::test]
    async fn lossy_lines_strip_terminators() {
        let mut reader = BufReader::new(&b"caf\xe9\r\nok\nlast"[..]);
        assert_eq!(read_lossy_line(&mut reader).await.as_deref(), Some("caf\u{fffd}"));
        assert_eq!(read_lossy_line(&mut reader).await.as_deref(), Some("ok"));
        assert_eq!(read_lossy_line(&mut reader).await.as_deref(), Some("last"));
        assert_eq!(read_lossy_line(&mut reader).await, None);
    }

    #[tokio::test]
    async fn signals_count_as_killed() {
        let outcome = execute(shell("kill -9 $$")).await.unwrap();
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.was_killed());
        assert_eq!(outcome.error_message(), "process was killed");
    }

    #[tokio::test]
    async fn missing_programs_fail_to_start() {
        let opts = ExecuteOptions {
            argv: vec!["/nonexistent/studio-test-binary".into()],
            ..ExecuteOptions::default()
        };
        assert!(execute(opts).await.is_err());
        assert!(execute(ExecuteOptions::default()).await.is_err());
    }
}
