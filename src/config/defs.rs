use std::collections::HashMap;
use std::path::PathBuf;

use lazy_static::lazy_static;
use thiserror::Error;

use crate::utils::system::get_ram_temp_dir;

// External software
pub const USEARCH_TAG: &str = "usearch";
pub const PRODIGAL_TAG: &str = "prodigal";
pub const FASTTREE_TAG: &str = "FastTree";
pub const MAIL_TAG: &str = "mail";

// Record fields
pub const SEQ_NAME: &str = "SEQ_NAME";
pub const SEQ: &str = "SEQ";
pub const SEQ_LEN: &str = "SEQ_LEN";
pub const RECORD_TYPE: &str = "RECORD_TYPE";

// Static Parameters
pub const DEFAULT_BLOCK_SIZE: i64 = 250_000_000;
pub const DEFAULT_STREAM_BUFFER: usize = 100;
pub const ENTRY_POINT: &str = "BP.new";

pub const FASTA_EXTS: &[&str] = &["fasta", "fa", "fna", "faa", "ffn", "frn"];

lazy_static! {
    /// Environment variables that override a tool's executable, keyed by tool tag.
    pub static ref TOOL_ENV_OVERRIDES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert(USEARCH_TAG, "BP_USEARCH");
        m.insert(PRODIGAL_TAG, "BP_PRODIGAL");
        m.insert(FASTTREE_TAG, "BP_FASTTREE");
        m
    };
}

/// Invalid, missing or conflicting options. Raised while a pipeline is built,
/// before any record flows.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct OptionError(pub String);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Option(#[from] OptionError),

    #[error("Empty pipeline: no commands to run")]
    Empty,

    #[error("Command {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Pipeline I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to set up {strategy} execution: {message}")]
    Setup { strategy: &'static str, message: String },
}

/// Non-zero exit of an external program.
#[derive(Debug, Error)]
#[error("{tool} exited with status {code:?}\ncommand: {command_line}\nstderr: {stderr}")]
pub struct ToolError {
    pub tool: String,
    pub command_line: String,
    pub code: Option<i32>,
    pub stderr: String,
}

/// Host-level settings shared by every command of a pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Spill files of disk-backed commands.
    pub tmp_dir: PathBuf,
    /// Scratch files handed to external tools.
    pub ram_tmp_dir: PathBuf,
    /// Capacity of the record pipes used by fork and thread execution.
    pub stream_buffer: usize,
    /// Run history is appended here when set.
    pub history_file: Option<PathBuf>,
    pub tool_paths: HashMap<String, PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir(),
            ram_tmp_dir: get_ram_temp_dir(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
            history_file: None,
            tool_paths: HashMap::new(),
        }
    }
}

impl Config {
    /// Defaults overridden by `BP_TMP`, `BP_HISTORY` and the per-tool variables
    /// in [`TOOL_ENV_OVERRIDES`].
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(dir) = std::env::var("BP_TMP") {
            config.tmp_dir = PathBuf::from(dir);
        }
        if let Ok(file) = std::env::var("BP_HISTORY") {
            config.history_file = Some(PathBuf::from(file));
        } else if let Ok(home) = std::env::var("HOME") {
            config.history_file = Some(PathBuf::from(home).join(".biopieces_history"));
        }
        for (tool, var) in TOOL_ENV_OVERRIDES.iter() {
            if let Ok(path) = std::env::var(var) {
                config.tool_paths.insert(tool.to_string(), PathBuf::from(path));
            }
        }
        config
    }

    pub fn with_tool<S: Into<String>, P: Into<PathBuf>>(mut self, tool: S, path: P) -> Self {
        self.tool_paths.insert(tool.into(), path.into());
        self
    }

    pub fn with_tmp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        let dir = dir.into();
        self.tmp_dir = dir.clone();
        self.ram_tmp_dir = dir;
        self
    }
}
