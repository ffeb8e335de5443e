//! Scripted stand-in for external tools, used by unit tests across the crate.
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::invoker::{ToolInvoker, ToolOutput};
use crate::errors::UltrascanError;

#[derive(Debug, Clone)]
pub enum Scripted {
    Output { stdout: String, exit_code: i32 },
    NotFound,
    Timeout,
    Failure(String),
}

impl Scripted {
    pub fn stdout(text: impl Into<String>) -> Self {
        Scripted::Output {
            stdout: text.into(),
            exit_code: 0,
        }
    }

    pub fn exit(code: i32) -> Self {
        Scripted::Output {
            stdout: String::new(),
            exit_code: code,
        }
    }
}

struct Rule {
    program: String,
    arg_contains: Option<String>,
    response: Scripted,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub started: Instant,
    pub finished: Instant,
}

/// Unmatched programs succeed with empty output.
#[derive(Default)]
pub struct ScriptedInvoker {
    rules: Vec<Rule>,
    delay: Duration,
    cancel_on: Option<(String, CancellationToken)>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, program: &str, response: Scripted) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            arg_contains: None,
            response,
        });
        self
    }

    /// Matches only when some argument contains `needle`; wins over `on`.
    pub fn on_arg(mut self, program: &str, needle: &str, response: Scripted) -> Self {
        self.rules.push(Rule {
            program: program.to_string(),
            arg_contains: Some(needle.to_string()),
            response,
        });
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancel `token` the moment `program` is invoked.
    pub fn cancel_on(mut self, program: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((program.to_string(), token));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn response_for(&self, program: &str, args: &[String]) -> Scripted {
        let by_arg = self.rules.iter().find(|r| {
            r.program == program
                && r.arg_contains
                    .as_deref()
                    .is_some_and(|needle| args.iter().any(|a| a.contains(needle)))
        });
        let by_program = || {
            self.rules
                .iter()
                .find(|r| r.program == program && r.arg_contains.is_none())
        };
        by_arg
            .or_else(by_program)
            .map(|r| r.response.clone())
            .unwrap_or_else(|| Scripted::stdout(""))
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ToolOutput, UltrascanError> {
        let started = Instant::now();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some((trigger, token)) = &self.cancel_on
            && trigger == program
        {
            token.cancel();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self.response_for(program, args);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(Call {
            program: program.to_string(),
            args: args.to_vec(),
            started,
            finished: Instant::now(),
        });

        match response {
            Scripted::Output { stdout, exit_code } => Ok(ToolOutput {
                program: program.to_string(),
                args: args.to_vec(),
                exit_code: Some(exit_code),
                stdout,
                stderr: String::new(),
                elapsed: started.elapsed(),
            }),
            Scripted::NotFound => Err(UltrascanError::ToolNotFound {
                program: program.to_string(),
            }),
            Scripted::Timeout => Err(UltrascanError::ToolTimeout {
                program: program.to_string(),
                timeout,
            }),
            Scripted::Failure(reason) => Err(UltrascanError::ToolExecution {
                program: program.to_string(),
                reason,
            }),
        }
    }
}
