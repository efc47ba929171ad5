// src/commands/mod.rs: command registry and helpers shared by commands

pub mod dump;
pub mod genecall;
pub mod grab;
pub mod read_fasta;
pub mod sort;
pub mod tree;
pub mod usearch;
pub mod write_fasta;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::config::defs::{Config, OptionError, SEQ};
use crate::pipeline::command::Command;
use crate::utils::fastx::{sequence_of, write_fasta_record};
use crate::utils::file::FileWriter;
use crate::utils::options::Options;
use crate::utils::record::Record;
use crate::utils::status::{Status, RESIDUES_IN, RESIDUES_OUT, SEQUENCES_IN, SEQUENCES_OUT};
use crate::utils::streams::{RecordReader, RecordWriter};

pub const COMMAND_NAMES: &[&str] = &[
    "cluster_otus",
    "dump",
    "genecall",
    "grab",
    "read_fasta",
    "sort",
    "tree",
    "usearch_global",
    "write_fasta",
];

/// Builds a command by name. Options are validated here, before any record flows.
///
/// # Arguments
///
/// * `name` - Command name.
/// * `options` - Options as given by the caller.
/// * `config` - Pipeline configuration.
///
/// # Returns
/// Command, or OptionError for an unknown name or invalid options.
pub fn build(name: &str, options: Options, config: &Arc<Config>) -> Result<Command, OptionError> {
    match name {
        "cluster_otus" => usearch::build_cluster_otus(options, config),
        "dump" => dump::build(options),
        "genecall" => genecall::build(options, config),
        "grab" => grab::build(options),
        "read_fasta" => read_fasta::build(options),
        "sort" => sort::build(options, config),
        "tree" => tree::build(options, config),
        "usearch_global" => usearch::build_usearch_global(options, config),
        "write_fasta" => write_fasta::build(options),
        _ => Err(OptionError(format!(
            "Unknown command: {}. Available commands: {}",
            name,
            COMMAND_NAMES.join(", ")
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Direction {
    In,
    Out,
}

/// Counts a record carrying a sequence in the sequence and residue counters.
pub(crate) fn tally_sequence(status: &mut Status, record: &Record, direction: Direction) {
    let Some(seq) = record.get(SEQ) else {
        return;
    };
    if seq.is_nil() {
        return;
    }
    let residues = seq.to_string().len() as i64;
    let (sequences_key, residues_key) = match direction {
        Direction::In => (SEQUENCES_IN, RESIDUES_IN),
        Direction::Out => (SEQUENCES_OUT, RESIDUES_OUT),
    };
    status.inc(sequences_key);
    status.add(residues_key, residues);
}

/// Scratch directory of an external tool run. Removed when dropped.
pub(crate) struct ToolScratch {
    dir: TempDir,
}

impl ToolScratch {
    pub fn new(config: &Config, tool: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("bp_{}_", tool))
            .tempdir_in(&config.ram_tmp_dir)
            .with_context(|| format!("Failed to create scratch dir in {}", config.ram_tmp_dir.display()))?;
        Ok(ToolScratch { dir })
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }
}

/// Writes records with a sequence to `fasta` and passes the rest downstream
/// right away.
///
/// # Arguments
///
/// * `input` - Incoming records.
/// * `output` - Pass-through destination.
/// * `status` - Receives sequence and residue counts.
/// * `fasta` - Temporary FASTA file for the tool.
///
/// # Returns
/// Number of sequences written.
pub(crate) async fn stage_sequences(
    input: &mut RecordReader,
    output: &mut RecordWriter,
    status: &mut Status,
    fasta: &Path,
) -> Result<usize> {
    let mut writer = FileWriter::create(fasta, false)
        .with_context(|| format!("Failed to create {}", fasta.display()))?;
    let mut staged = 0;
    while let Some(record) = input.recv().await {
        match sequence_of(&record) {
            Some((name, seq)) => {
                tally_sequence(status, &record, Direction::In);
                write_fasta_record(&mut writer, &name, seq.as_bytes(), None)?;
                staged += 1;
            }
            None => output.write(record).await?,
        }
    }
    writer.finish()?;
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command() {
        let err = build("frobnicate", Options::new(), &Arc::new(Config::default())).unwrap_err();
        assert!(err.to_string().starts_with("Unknown command: frobnicate"));
    }
}
