// src/pipeline/strategy.rs: the three ways of executing a command chain
//
// Enumerate runs every stage as a future on one thread with single-slot pipes.
// Fork and Thread share `run_chain`, which wires commands back to front over a
// `Backend` and runs the first command in the calling process.

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use futures::future::join_all;
use log::debug;
use nix::fcntl::OFlag;
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, fork, pipe2, ForkResult, Pid};
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

use crate::config::defs::PipelineError;
use crate::pipeline::command::{Command, StageFailure, StageReport};
use crate::utils::record::Record;
use crate::utils::streams::{drain, feed, pipe, pump_from_fd, pump_to_fd, RecordReader, RecordWriter, Sink, Source};
use crate::utils::system::compute_worker_threads;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Enumerate,
    Fork,
    Thread,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Enumerate => "enumerate",
            Strategy::Fork => "fork",
            Strategy::Thread => "thread",
        })
    }
}

/// Result of running a chain: one report per command in command order, the
/// records collected by the sink, and any failure of the pipeline's own I/O.
#[derive(Debug)]
pub struct ChainOutcome {
    pub reports: Vec<StageReport>,
    pub records: Vec<Record>,
    pub io_error: Option<std::io::Error>,
}

fn setup_error(strategy: &'static str, e: impl fmt::Display) -> PipelineError {
    PipelineError::Setup {
        strategy,
        message: e.to_string(),
    }
}

/// Runs all commands cooperatively on the current thread.
///
/// # Arguments
///
/// * `commands` - Non-empty command chain.
/// * `source` - Records for the first command.
/// * `sink` - Destination of the last command's output.
///
/// # Returns
/// ChainOutcome
pub fn run_enumerate(commands: &[Command], source: Source, sink: Sink) -> Result<ChainOutcome, PipelineError> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| setup_error("enumerate", e))?;

    Ok(runtime.block_on(async {
        let (mut upstream, feeder) = pipe(1);
        let mut stages = Vec::with_capacity(commands.len());
        for command in commands {
            let (next, writer) = pipe(1);
            let reader = std::mem::replace(&mut upstream, next);
            stages.push(async move {
                let (mut reader, mut writer) = (reader, writer);
                command.run(&mut reader, &mut writer).await
            });
        }
        let (fed, reports, drained) = tokio::join!(feed(source, feeder), join_all(stages), drain(upstream, sink));
        let (records, io_error) = match fed.and(drained) {
            Ok(records) => (records, None),
            Err(e) => (Vec::new(), Some(e)),
        };
        ChainOutcome { reports, records, io_error }
    }))
}

/// Primitives a concurrent strategy supplies to `run_chain`.
pub trait Backend {
    /// Read end handed to a unit.
    type Input;
    /// Write end handed to a unit.
    type Output;
    /// A running command.
    type Unit;

    const NAME: &'static str;

    fn connect(&mut self) -> Result<(Self::Input, Self::Output), PipelineError>;

    fn spawn(&mut self, command: &Command, input: Self::Input, output: Self::Output) -> Result<Self::Unit, PipelineError>;

    /// Runs the first command in the calling process, feeding it from `source`
    /// and draining `tail`, the output of the last command, into `sink`.
    fn run_head(
        &mut self,
        command: &Command,
        output: Self::Output,
        tail: Self::Input,
        source: Source,
        sink: Sink,
    ) -> Result<(StageReport, std::io::Result<Vec<Record>>), PipelineError>;

    fn join(&mut self, unit: Self::Unit) -> StageReport;
}

/// Wires `commands` back to front: every command after the first becomes a
/// unit reading from a fresh connection and writing to the connection of the
/// unit after it (the last one writes to the tail). The first command then
/// runs in the caller and every unit is joined, even when wiring fails.
///
/// # Arguments
///
/// * `backend` - Fork or Thread primitives.
/// * `commands` - Non-empty command chain.
/// * `source` - Records for the first command.
/// * `sink` - Destination of the last command's output.
///
/// # Returns
/// ChainOutcome
pub fn run_chain<B: Backend>(
    backend: &mut B,
    commands: &[Command],
    source: Source,
    sink: Sink,
) -> Result<ChainOutcome, PipelineError> {
    let (head, rest) = commands.split_first().ok_or(PipelineError::Empty)?;
    debug!("{}: wiring {} commands", B::NAME, commands.len());

    let (tail, mut downstream) = backend.connect()?;
    let mut units = Vec::with_capacity(rest.len());
    let mut wiring_error = None;
    for command in rest.iter().rev() {
        let (input, output) = match backend.connect() {
            Ok(connection) => connection,
            Err(e) => {
                wiring_error = Some(e);
                break;
            }
        };
        match backend.spawn(command, input, downstream) {
            Ok(unit) => units.push(unit),
            Err(e) => {
                wiring_error = Some(e);
                downstream = output;
                break;
            }
        }
        downstream = output;
    }

    let head_outcome = match wiring_error {
        Some(e) => {
            drop(downstream);
            drop(tail);
            Err(e)
        }
        None => backend.run_head(head, downstream, tail, source, sink),
    };

    units.reverse();
    let joined: Vec<StageReport> = units.into_iter().map(|unit| backend.join(unit)).collect();
    let (head_report, drained) = head_outcome?;

    let mut reports = Vec::with_capacity(commands.len());
    reports.push(head_report);
    reports.extend(joined);
    let (records, io_error) = match drained {
        Ok(records) => (records, None),
        Err(e) => (Vec::new(), Some(e)),
    };
    Ok(ChainOutcome { reports, records, io_error })
}

/// Feeds, runs and drains the head command over in-memory pipes.
async fn run_head_in_memory(
    command: &Command,
    mut output: RecordWriter,
    tail: RecordReader,
    source: Source,
    sink: Sink,
    capacity: usize,
) -> (StageReport, std::io::Result<Vec<Record>>) {
    let (mut head_input, feeder) = pipe(capacity);
    let (fed, report, drained) = tokio::join!(
        feed(source, feeder),
        command.run(&mut head_input, &mut output),
        drain(tail, sink)
    );
    (report, fed.and(drained))
}

/// Tasks on a multi-threaded runtime connected by in-memory pipes.
pub struct ThreadBackend {
    runtime: Runtime,
    capacity: usize,
}

impl ThreadBackend {
    pub fn new(commands: usize, capacity: usize) -> Result<Self, PipelineError> {
        let workers = compute_worker_threads(commands);
        debug!("thread: {} worker threads for {} commands", workers, commands);
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers)
            .enable_all()
            .build()
            .map_err(|e| setup_error("thread", e))?;
        Ok(ThreadBackend { runtime, capacity })
    }
}

impl Backend for ThreadBackend {
    type Input = RecordReader;
    type Output = RecordWriter;
    type Unit = JoinHandle<StageReport>;

    const NAME: &'static str = "thread";

    fn connect(&mut self) -> Result<(RecordReader, RecordWriter), PipelineError> {
        Ok(pipe(self.capacity))
    }

    fn spawn(&mut self, command: &Command, input: RecordReader, output: RecordWriter) -> Result<Self::Unit, PipelineError> {
        let command = command.clone();
        Ok(self.runtime.spawn(async move {
            let (mut input, mut output) = (input, output);
            command.run(&mut input, &mut output).await
        }))
    }

    fn run_head(
        &mut self,
        command: &Command,
        output: RecordWriter,
        tail: RecordReader,
        source: Source,
        sink: Sink,
    ) -> Result<(StageReport, std::io::Result<Vec<Record>>), PipelineError> {
        let capacity = self.capacity;
        Ok(self
            .runtime
            .block_on(run_head_in_memory(command, output, tail, source, sink, capacity)))
    }

    fn join(&mut self, unit: Self::Unit) -> StageReport {
        match self.runtime.block_on(unit) {
            Ok(report) => report,
            Err(e) => StageReport::lost(format!("task failed: {}", e)),
        }
    }
}

/// A forked child running one command.
pub struct ForkUnit {
    pid: Pid,
    report: OwnedFd,
}

/// Child processes connected by OS pipes carrying framed records.
///
/// Pipe ends stay open in the parent until the unit using them is forked, so
/// each child closes every end it inherited except its own two; otherwise a
/// stray write end would keep a reader from ever seeing EOF.
pub struct ForkBackend {
    capacity: usize,
    held: Vec<RawFd>,
}

impl ForkBackend {
    pub fn new(capacity: usize) -> Self {
        ForkBackend { capacity, held: Vec::new() }
    }

    fn os_pipe(&mut self) -> Result<(OwnedFd, OwnedFd), PipelineError> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(|e| setup_error("fork", e))?;
        self.held.push(read.as_raw_fd());
        self.held.push(write.as_raw_fd());
        Ok((read, write))
    }

    fn release(&mut self, fds: &[RawFd]) {
        self.held.retain(|fd| !fds.contains(fd));
    }
}

/// Body of a forked child. Never returns to the caller's stack.
fn child_main(command: &Command, input: OwnedFd, output: OwnedFd, report: OwnedFd, capacity: usize) -> ! {
    // SAFETY: the child is single threaded at this point.
    unsafe {
        let _ = signal(Signal::SIGPIPE, SigHandler::SigIgn);
    }

    let stage_report = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime.block_on(async {
            let (mut command_input, input_writer) = pipe(capacity);
            let (output_reader, mut command_output) = pipe(capacity);
            let (pumped_in, mut stage_report, pumped_out) = tokio::join!(
                pump_from_fd(input, input_writer),
                command.run(&mut command_input, &mut command_output),
                pump_to_fd(output_reader, output)
            );
            if stage_report.failure.is_none() {
                if let Err(e) = pumped_in.and(pumped_out) {
                    stage_report.failure = Some(StageFailure {
                        message: format!("record pipe: {}", e),
                        broken_pipe: false,
                    });
                }
            }
            stage_report
        }),
        Err(e) => StageReport::lost(format!("failed to build child runtime: {}", e)),
    };

    let code = if stage_report.failure.is_some() { 1 } else { 0 };
    if let Ok(bytes) = bincode::serde::encode_to_vec(&stage_report, bincode::config::standard()) {
        let _ = File::from(report).write_all(&bytes);
    }
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    // SAFETY: skips the parent's atexit handlers and destructors, which belong
    // to the parent process.
    unsafe { nix::libc::_exit(code) }
}

impl Backend for ForkBackend {
    type Input = OwnedFd;
    type Output = OwnedFd;
    type Unit = ForkUnit;

    const NAME: &'static str = "fork";

    fn connect(&mut self) -> Result<(OwnedFd, OwnedFd), PipelineError> {
        self.os_pipe()
    }

    fn spawn(&mut self, command: &Command, input: OwnedFd, output: OwnedFd) -> Result<ForkUnit, PipelineError> {
        let (report_read, report_write) = pipe2(OFlag::O_CLOEXEC).map_err(|e| setup_error("fork", e))?;
        let own = [input.as_raw_fd(), output.as_raw_fd()];

        // SAFETY: no runtime or other thread of this pipeline exists in the
        // parent while units are forked; the child builds its own runtime.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                for fd in &self.held {
                    if !own.contains(fd) {
                        let _ = close(*fd);
                    }
                }
                drop(report_read);
                child_main(command, input, output, report_write, self.capacity)
            }
            Ok(ForkResult::Parent { child }) => {
                debug!("fork: {} running as pid {}", command.name(), child);
                self.release(&own);
                self.held.push(report_read.as_raw_fd());
                Ok(ForkUnit { pid: child, report: report_read })
            }
            Err(e) => {
                self.release(&own);
                Err(setup_error("fork", e))
            }
        }
    }

    fn run_head(
        &mut self,
        command: &Command,
        output: OwnedFd,
        tail: OwnedFd,
        source: Source,
        sink: Sink,
    ) -> Result<(StageReport, std::io::Result<Vec<Record>>), PipelineError> {
        self.release(&[output.as_raw_fd(), tail.as_raw_fd()]);
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| setup_error("fork", e))?;
        let capacity = self.capacity;

        Ok(runtime.block_on(async {
            let (tail_reader, tail_writer) = pipe(capacity);
            let (head_output_reader, head_output) = pipe(capacity);
            let ((report, drained), pumped_in, pumped_out) = tokio::join!(
                run_head_in_memory(command, head_output, tail_reader, source, sink, capacity),
                pump_from_fd(tail, tail_writer),
                pump_to_fd(head_output_reader, output)
            );
            (report, pumped_in.and(pumped_out).and(drained))
        }))
    }

    fn join(&mut self, unit: ForkUnit) -> StageReport {
        let ForkUnit { pid, report } = unit;
        self.release(&[report.as_raw_fd()]);

        let mut bytes = Vec::new();
        let read = File::from(report).read_to_end(&mut bytes);
        let waited = waitpid(pid, None);

        if read.is_ok() && !bytes.is_empty() {
            if let Ok((stage_report, _)) =
                bincode::serde::decode_from_slice::<StageReport, _>(&bytes, bincode::config::standard())
            {
                return stage_report;
            }
        }
        let message = match waited {
            Ok(WaitStatus::Exited(_, code)) => format!("process {} exited with status {} without a report", pid, code),
            Ok(WaitStatus::Signaled(_, signal, _)) => format!("process {} killed by {:?}", pid, signal),
            Ok(other) => format!("process {} ended unexpectedly: {:?}", pid, other),
            Err(e) => format!("failed to wait for process {}: {}", pid, e),
        };
        StageReport::lost(message)
    }
}
