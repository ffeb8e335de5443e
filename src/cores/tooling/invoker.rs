use async_trait::async_trait;
use serde::Serialize;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::errors::UltrascanError;

#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    pub program: String,
    pub args: Vec<String>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by a marked stderr section when stderr is non-empty.
    pub fn transcript(&self) -> String {
        if self.stderr.trim().is_empty() {
            return self.stdout.clone();
        }
        let mut out = self.stdout.clone();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("[stderr]\n");
        out.push_str(&self.stderr);
        out
    }
}

/// Runs one external program to completion or timeout.
///
/// A non-zero exit status is reported through `ToolOutput::exit_code`, never as
/// an error. A process killed by a signal has no exit status and is reported
/// as `ToolExecution`.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ToolOutput, UltrascanError>;
}

#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker {
    limiter: Option<Arc<Semaphore>>,
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap how many child processes run at once across the whole run.
    pub fn with_process_limit(max: usize) -> Self {
        Self {
            limiter: Some(Arc::new(Semaphore::new(max.max(1)))),
        }
    }
}

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ToolOutput, UltrascanError> {
        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.clone().acquire_owned().await.map_err(|e| {
                UltrascanError::ToolExecution {
                    program: program.to_string(),
                    reason: format!("process limiter closed: {e}"),
                }
            })?),
            None => None,
        };

        debug!(program, ?args, timeout_secs = timeout.as_secs(), "spawning tool");
        let started = Instant::now();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group: a terminal Ctrl-C reaches ultrascan, not the tools.
        #[cfg(unix)]
        command.process_group(0);
        let child = command.spawn().map_err(|e| spawn_error(program, e))?;

        // On timeout the wait future is dropped with the child, which kills it.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let elapsed = started.elapsed();
                debug!(program, code = ?output.status.code(), ?elapsed, "tool finished");
                // Killed by a signal: whatever it printed is truncated.
                let Some(code) = output.status.code() else {
                    warn!(program, status = %output.status, "tool terminated by signal");
                    return Err(UltrascanError::ToolExecution {
                        program: program.to_string(),
                        reason: format!("terminated by signal ({})", output.status),
                    });
                };
                Ok(ToolOutput {
                    program: program.to_string(),
                    args: args.to_vec(),
                    exit_code: Some(code),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    elapsed,
                })
            }
            Ok(Err(e)) => Err(UltrascanError::ToolExecution {
                program: program.to_string(),
                reason: format!("wait failed: {e}"),
            }),
            Err(_) => {
                warn!(program, timeout_secs = timeout.as_secs(), "tool timed out; killed");
                Err(UltrascanError::ToolTimeout {
                    program: program.to_string(),
                    timeout,
                })
            }
        }
    }
}

fn spawn_error(program: &str, e: io::Error) -> UltrascanError {
    match e.kind() {
        io::ErrorKind::NotFound => UltrascanError::ToolNotFound {
            program: program.to_string(),
        },
        io::ErrorKind::PermissionDenied => UltrascanError::ToolExecution {
            program: program.to_string(),
            reason: "permission denied".to_string(),
        },
        _ => UltrascanError::ToolExecution {
            program: program.to_string(),
            reason: format!("spawn failed: {e}"),
        },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_code() {
        let inv = ProcessInvoker::new();
        let out = inv
            .invoke("sh", &sh("echo out; echo err >&2; exit 3"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(out.transcript().contains("[stderr]\nerr"));
    }

    #[tokio::test]
    async fn signalled_child_is_an_execution_error() {
        let inv = ProcessInvoker::new();
        let err = inv
            .invoke("sh", &sh("echo partial; kill -9 $$"), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            UltrascanError::ToolExecution { program, reason } => {
                assert_eq!(program, "sh");
                assert!(reason.contains("signal"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn child_leads_its_own_process_group() {
        fn pid_and_group(stat: &str) -> (String, String) {
            // pid (comm) state ppid pgrp ...
            let after_comm = &stat[stat.rfind(')').unwrap() + 1..];
            let fields: Vec<&str> = after_comm.split_whitespace().collect();
            let pid = stat.split_whitespace().next().unwrap().to_string();
            (pid, fields[2].to_string())
        }

        let inv = ProcessInvoker::new();
        let out = inv
            .invoke("sh", &sh("cat /proc/$$/stat"), Duration::from_secs(5))
            .await
            .unwrap();
        let (child_pid, child_group) = pid_and_group(&out.stdout);
        assert_eq!(child_pid, child_group);

        let own = std::fs::read_to_string("/proc/self/stat").unwrap();
        let (_, own_group) = pid_and_group(&own);
        assert_ne!(child_group, own_group);
    }

    #[tokio::test]
    async fn missing_program_is_tool_not_found() {
        let inv = ProcessInvoker::new();
        let err = inv
            .invoke("ultrascan-no-such-tool", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, UltrascanError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn slow_program_times_out() {
        let inv = ProcessInvoker::with_process_limit(1);
        let started = Instant::now();
        let err = inv
            .invoke("sleep", &["5".to_string()], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, UltrascanError::ToolTimeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
