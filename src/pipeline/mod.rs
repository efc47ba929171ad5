// src/pipeline/mod.rs: composing and running command chains

pub mod command;
pub mod strategy;

use std::fs::OpenOptions;
use std::io::Write;
use std::ops::{Add, ShlAssign};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use log::{debug, info, warn};

use crate::commands;
use crate::config::defs::{Config, OptionError, PipelineError, ENTRY_POINT};
use crate::pipeline::command::Command;
use crate::pipeline::strategy::{run_chain, run_enumerate, ChainOutcome, ForkBackend, Strategy, ThreadBackend};
use crate::utils::mail::send_mail;
use crate::utils::options::{Options, Validator};
use crate::utils::record::Record;
use crate::utils::status::Status;
use crate::utils::streams::{Sink, Source};

const RUN_OPTIONS: &[&str] = &[
    "verbose", "email", "progress", "subject", "input", "output", "fork", "thread",
];

/// Ordered list of commands plus the status each produced in the last run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    commands: Vec<Command>,
    status: Vec<Status>,
    completed: bool,
    run_options: Options,
    config: Arc<Config>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::with_config(Config::default())
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline::default()
    }

    pub fn with_config(config: Config) -> Self {
        Pipeline {
            commands: Vec::new(),
            status: Vec::new(),
            completed: false,
            run_options: Options::new(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn size(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Per-command status of the last run, in command order.
    pub fn status(&self) -> &[Status] {
        &self.status
    }

    /// Builds command `name` from `options` and appends it.
    ///
    /// # Arguments
    ///
    /// * `name` - Registered command name.
    /// * `options` - Command options, validated now.
    ///
    /// # Returns
    /// The pipeline for chaining, or OptionError.
    pub fn add(&mut self, name: &str, options: Options) -> Result<&mut Self, OptionError> {
        let command = commands::build(name, options, &self.config)?;
        Ok(self.push(command))
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn read_fasta(&mut self, options: Options) -> Result<&mut Self, OptionError> {
        self.add("read_fasta", options)
    }

    pub fn write_fasta(&mut self, options: Options) -> Result<&mut Self, OptionError> {
        self.add("write_fasta", options)
    }

    pub fn dump(&mut self, options: Options) -> Result<&mut Self, OptionError> {
        self.add("dump", options)
    }

    pub fn grab(&mut self, options: Options) -> Result<&mut Self, OptionError> {
        self.add("grab", options)
    }

    pub fn sort(&mut self, options: Options) -> Result<&mut Self, OptionError> {
        self.add("sort", options)
    }

    pub fn usearch_global(&mut self, options: Options) -> Result<&mut Self, OptionError> {
        self.add("usearch_global", options)
    }

    pub fn cluster_otus(&mut self, options: Options) -> Result<&mut Self, OptionError> {
        self.add("cluster_otus", options)
    }

    pub fn genecall(&mut self, options: Options) -> Result<&mut Self, OptionError> {
        self.add("genecall", options)
    }

    pub fn tree(&mut self, options: Options) -> Result<&mut Self, OptionError> {
        self.add("tree", options)
    }

    /// Moves all of `other`'s commands and status to the end of this pipeline.
    pub fn append(&mut self, other: Pipeline) -> &mut Self {
        self.commands.extend(other.commands);
        self.status.extend(other.status);
        self
    }

    /// Removes the last command and returns it as a single-command pipeline.
    /// Returns an empty pipeline when there is nothing to remove.
    pub fn pop(&mut self) -> Pipeline {
        let mut popped = Pipeline {
            commands: Vec::new(),
            status: Vec::new(),
            completed: false,
            run_options: Options::new(),
            config: Arc::clone(&self.config),
        };
        if let Some(command) = self.commands.pop() {
            if self.status.len() > self.commands.len() {
                if let Some(status) = self.status.pop() {
                    popped.status.push(status);
                }
            }
            popped.commands.push(command);
        }
        popped
    }

    /// Renders the pipeline as `BP.new.cmd(opts)...`, with `.run(opts)` once it
    /// has been run.
    pub fn to_s(&self) -> String {
        let mut s = String::from(ENTRY_POINT);
        for command in &self.commands {
            s.push_str(&command.to_s());
        }
        if self.completed {
            if self.run_options.is_empty() {
                s.push_str(".run");
            } else {
                s.push_str(&format!(".run({})", self.run_options));
            }
        }
        s
    }

    /// Runs the pipeline. Must not be called from inside an async runtime: each
    /// strategy builds the runtime it needs.
    ///
    /// # Arguments
    ///
    /// * `options` - Run options: `fork` or `thread` to pick a strategy,
    ///   `input`/`output` text stream files (`-` for stdin/stdout), `verbose`,
    ///   `progress`, `email` and `subject`.
    ///
    /// # Returns
    /// Result<(), PipelineError>
    pub fn run(&mut self, options: Options) -> Result<(), PipelineError> {
        validate_run_options(&options, true)?;
        let source = match options.get_str("input") {
            Some("-") => Source::Stdin,
            Some(path) => Source::File(PathBuf::from(path)),
            None => Source::Empty,
        };
        let sink = match options.get_str("output") {
            Some("-") => Sink::Stdout,
            Some(path) => Sink::File(PathBuf::from(path)),
            None => Sink::Discard,
        };
        self.execute(options, source, sink).map(|_| ())
    }

    /// Runs the pipeline on `records` and returns what the last command emits.
    ///
    /// # Arguments
    ///
    /// * `records` - Input of the first command.
    /// * `options` - Run options as for `run`, without `input` and `output`.
    ///
    /// # Returns
    /// Output records in emission order.
    pub fn collect(&mut self, records: Vec<Record>, options: Options) -> Result<Vec<Record>, PipelineError> {
        validate_run_options(&options, false)?;
        self.execute(options, Source::Records(records), Sink::Collect)
    }

    fn execute(&mut self, options: Options, source: Source, sink: Sink) -> Result<Vec<Record>, PipelineError> {
        let started = Instant::now();
        self.completed = true;
        self.run_options = options;

        let result = self.dispatch(source, sink);
        debug!("{} finished in {} ms", self.to_s(), started.elapsed().as_millis());

        if self.run_options.flag("verbose") {
            eprint!("{}", self.status_table());
        }
        if let Some(to) = self.run_options.get_str("email") {
            let subject = self
                .run_options
                .get_str("subject")
                .map(str::to_string)
                .unwrap_or_else(|| self.to_s());
            let body = format!("{}\n\n{}", self.to_s(), self.status_table());
            if let Err(e) = send_mail(to, &subject, &body) {
                warn!("Failed to send mail to {}: {:#}", to, e);
            }
        }
        self.write_history(&result);
        result
    }

    fn dispatch(&mut self, source: Source, sink: Sink) -> Result<Vec<Record>, PipelineError> {
        if self.commands.is_empty() {
            return Err(PipelineError::Empty);
        }
        let strategy = if self.run_options.flag("fork") {
            Strategy::Fork
        } else if self.run_options.flag("thread") {
            Strategy::Thread
        } else {
            Strategy::Enumerate
        };
        debug!("Running {} commands with {} strategy", self.commands.len(), strategy);

        let capacity = self.config.stream_buffer;
        let outcome = match strategy {
            Strategy::Enumerate => run_enumerate(&self.commands, source, sink)?,
            Strategy::Thread => {
                let mut backend = ThreadBackend::new(self.commands.len(), capacity)?;
                run_chain(&mut backend, &self.commands, source, sink)?
            }
            Strategy::Fork => {
                let mut backend = ForkBackend::new(capacity);
                run_chain(&mut backend, &self.commands, source, sink)?
            }
        };

        self.status = outcome.reports.iter().map(|report| report.status.clone()).collect();
        if self.run_options.flag("progress") {
            for (command, status) in self.commands.iter().zip(&self.status) {
                info!("{}: {}", command.to_s(), status.summary());
            }
        }
        failure_of(&self.commands, outcome)
    }

    fn status_table(&self) -> String {
        let mut table = String::new();
        for (command, status) in self.commands.iter().zip(&self.status) {
            table.push_str(&command.to_s());
            table.push('\n');
            table.push_str(&status.to_string());
        }
        table
    }

    fn write_history(&self, result: &Result<Vec<Record>, PipelineError>) {
        let Some(path) = &self.config.history_file else {
            return;
        };
        let outcome = match result {
            Ok(_) => "OK".to_string(),
            Err(e) => format!("ERROR: {}", e).replace(['\n', '\t'], " "),
        };
        let line = format!("{}\t{}\t{}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), self.to_s(), outcome);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!("Failed to write history to {}: {}", path.display(), e);
        }
    }
}

fn validate_run_options(options: &Options, with_io: bool) -> Result<(), OptionError> {
    let allowed: Vec<&str> = RUN_OPTIONS
        .iter()
        .copied()
        .filter(|key| with_io || !matches!(*key, "input" | "output"))
        .collect();
    let v = Validator::new("run", options);
    v.allowed(&allowed)?
        .unique(&["fork", "thread"])?
        .requires("subject", "email")?
        .boolean(&["verbose", "progress", "fork", "thread"])?;
    Ok(())
}

/// Picks the error a run reports: the first failure in command order that is
/// not a broken pipe, then the pipeline's own I/O error. Broken pipes alone
/// only mean a downstream command stopped reading early.
fn failure_of(commands: &[Command], outcome: ChainOutcome) -> Result<Vec<Record>, PipelineError> {
    let ChainOutcome { reports, records, io_error } = outcome;
    for (command, report) in commands.iter().zip(&reports) {
        if let Some(failure) = &report.failure {
            if !failure.broken_pipe {
                return Err(PipelineError::CommandFailed {
                    command: command.to_s(),
                    message: failure.message.clone(),
                });
            }
        }
    }
    if let Some(e) = io_error {
        return Err(PipelineError::Io(e));
    }
    for (command, report) in commands.iter().zip(&reports) {
        if report.failure.is_some() {
            debug!("{} stopped early: downstream closed", command.to_s());
        }
    }
    Ok(records)
}

impl Add for Pipeline {
    type Output = Pipeline;

    /// New pipeline with this pipeline's commands followed by `other`'s.
    fn add(mut self, other: Pipeline) -> Pipeline {
        self.append(other);
        self.completed = false;
        self.run_options = Options::new();
        self
    }
}

impl ShlAssign for Pipeline {
    fn shl_assign(&mut self, other: Pipeline) {
        self.append(other);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn grab_pipeline(pattern: &str) -> Pipeline {
        let mut p = Pipeline::new();
        p.grab(Options::new().with("select", pattern)).unwrap();
        p
    }

    #[test]
    fn test_composition() {
        let mut p = grab_pipeline("a");
        p <<= grab_pipeline("b");
        assert_eq!(p.size(), 2);

        let q = p.clone() + grab_pipeline("c");
        assert_eq!(q.size(), 3);
        assert_eq!(p.size(), 2);
        assert_eq!(q.to_s(), r#"BP.new.grab(select: "a").grab(select: "b").grab(select: "c")"#);

        let last = p.pop();
        assert_eq!(last.size(), 1);
        assert_eq!(p.size(), 1);
        assert_eq!(Pipeline::new().pop().size(), 0);
    }

    #[test]
    fn test_to_s_after_run() -> anyhow::Result<()> {
        let mut p = grab_pipeline("a");
        p.collect(vec![record! { "A" => "a" }], Options::new())?;
        assert_eq!(p.to_s(), r#"BP.new.grab(select: "a").run"#);
        p.collect(vec![], Options::new().with("thread", true))?;
        assert_eq!(p.to_s(), r#"BP.new.grab(select: "a").run(thread: true)"#);
        Ok(())
    }

    #[test]
    fn test_run_option_validation() {
        let mut p = grab_pipeline("a");
        assert!(matches!(
            p.run(Options::new().with("fork", true).with("thread", true)),
            Err(PipelineError::Option(_))
        ));
        assert!(matches!(
            p.run(Options::new().with("subject", "x")),
            Err(PipelineError::Option(_))
        ));
        assert!(matches!(
            p.collect(vec![], Options::new().with("output", "-")),
            Err(PipelineError::Option(_))
        ));
        assert!(matches!(Pipeline::new().run(Options::new()), Err(PipelineError::Empty)));
    }

    #[test]
    fn test_status_counts() -> anyhow::Result<()> {
        let mut p = grab_pipeline("x");
        let records = vec![record! { "A" => "x" }, record! { "A" => "y" }, record! { "A" => "xx" }];
        let out = p.collect(records, Options::new())?;
        assert_eq!(out.len(), 2);
        let status = &p.status()[0];
        assert_eq!(status.count("records_in"), 3);
        assert_eq!(status.count("records_out"), 2);
        assert_eq!(status.count("hits_out"), 2);
        Ok(())
    }

    #[test]
    fn test_history_is_appended() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let history = dir.path().join("history");
        let mut config = Config::default();
        config.history_file = Some(history.clone());

        let mut p = Pipeline::with_config(config);
        p.grab(Options::new().with("evaluate", ":A / 0 > 1"))?;
        assert!(p.collect(vec![record! { "A" => 1 }], Options::new()).is_err());
        p.collect(vec![], Options::new())?;

        let text = std::fs::read_to_string(&history)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\tERROR: "));
        assert!(lines[1].ends_with("\tOK"));
        Ok(())
    }
}
