// src/pipeline/command.rs: one configured pipeline stage

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use futures::FutureExt;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::utils::options::Options;
use crate::utils::status::{Status, RECORDS_IN, RECORDS_OUT, STATUS, TIME_ELAPSED, TIME_START, TIME_STOP};
use crate::utils::streams::{RecordReader, RecordWriter, StreamError};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Execution logic of a command. Reads records from `input`, writes to
/// `output` and updates its own `status` counters.
#[async_trait]
pub trait CommandFn: Send + Sync {
    async fn execute(
        &self,
        input: &mut RecordReader,
        output: &mut RecordWriter,
        status: &mut Status,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub message: String,
    /// The command failed only because its downstream stopped reading.
    pub broken_pipe: bool,
}

/// Outcome of one command's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub status: Status,
    pub failure: Option<StageFailure>,
}

impl StageReport {
    /// Report for a unit that died without reporting.
    pub fn lost(message: String) -> Self {
        let mut status = Status::new();
        status.set(STATUS, "failed");
        StageReport {
            status,
            failure: Some(StageFailure { message, broken_pipe: false }),
        }
    }
}

#[derive(Clone)]
pub struct Command {
    name: String,
    options: Options,
    options_orig: Options,
    logic: Arc<dyn CommandFn>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

impl Command {
    /// # Arguments
    ///
    /// * `name` - Command name as used in the description language.
    /// * `options_orig` - Options as given by the caller, kept for display.
    /// * `options` - Validated options with defaults applied.
    /// * `logic` - What the command does with its streams.
    pub fn new<L: CommandFn + 'static>(name: &str, options_orig: Options, options: Options, logic: L) -> Self {
        Command {
            name: name.to_string(),
            options,
            options_orig,
            logic: Arc::new(logic),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_orig(&self) -> &Options {
        &self.options_orig
    }

    /// `.name(key: value, ...)`, or `.name` without options.
    pub fn to_s(&self) -> String {
        if self.options_orig.is_empty() {
            format!(".{}", self.name)
        } else {
            format!(".{}({})", self.name, self.options_orig)
        }
    }

    /// Runs the command once. Both streams are closed on every exit path,
    /// including a panic inside the command logic.
    ///
    /// # Arguments
    ///
    /// * `input` - Records flowing in.
    /// * `output` - Records flowing out.
    ///
    /// # Returns
    /// StageReport with the final status and the failure, if any.
    pub async fn run(&self, input: &mut RecordReader, output: &mut RecordWriter) -> StageReport {
        let mut status = Status::new();
        status.set(STATUS, "running");
        status.init_counters(&[RECORDS_IN, RECORDS_OUT]);
        let start = Local::now();
        status.set(TIME_START, start.format(TIME_FORMAT).to_string());
        debug!("{}: started", self.name);

        let outcome = AssertUnwindSafe(self.logic.execute(input, output, &mut status))
            .catch_unwind()
            .await;

        input.close();
        output.close();

        let stop = Local::now();
        status.set(TIME_STOP, stop.format(TIME_FORMAT).to_string());
        let elapsed = (stop - start).to_std().unwrap_or_default();
        status.set(TIME_ELAPSED, format!("{:.3}s", elapsed.as_secs_f64()));
        status.set(RECORDS_IN, input.received());
        status.set(RECORDS_OUT, output.sent());

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(StageFailure {
                message: format!("{:#}", e),
                broken_pipe: e
                    .chain()
                    .any(|cause| matches!(cause.downcast_ref::<StreamError>(), Some(StreamError::BrokenPipe))),
            }),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Some(StageFailure {
                    message: format!("panicked: {}", message),
                    broken_pipe: false,
                })
            }
        };
        status.set(STATUS, if failure.is_some() { "failed" } else { "done" });
        debug!("{}: {}", self.name, status.summary());

        StageReport { status, failure }
    }
}
