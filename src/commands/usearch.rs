// src/commands/usearch.rs: usearch_global and cluster_otus
//
// Sequences are staged to a FASTA file in a scratch directory, usearch runs on
// it, and its output is parsed back into records emitted after the
// pass-through records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use tokio::task;

use crate::commands::{stage_sequences, tally_sequence, Direction, ToolScratch};
use crate::config::defs::{Config, OptionError, ToolError, RECORD_TYPE, USEARCH_TAG};
use crate::pipeline::command::{Command, CommandFn};
use crate::utils::command::{locate_tool, run_tool, ToolOutput};
use crate::utils::fastx::sequence_reader;
use crate::utils::options::{Options, Validator};
use crate::utils::record::{Record, Value};
use crate::utils::status::{Status, HITS_OUT};
use crate::utils::streams::{RecordReader, RecordWriter};

/// usearch reports this on stderr and exits non-zero when given no sequences.
const EMPTY_INPUT: &str = "empty input file";

enum Mode {
    Global {
        database: PathBuf,
        identity: f64,
        strand: String,
        cpus: i64,
    },
    ClusterOtus {
        identity: f64,
    },
}

struct Usearch {
    program: PathBuf,
    config: Arc<Config>,
    mode: Mode,
}

/// Searches each sequence against `database` and emits one record per hit.
///
/// # Arguments
///
/// * `options` - `database` and `identity` (0..1) required; `strand`
///   plus or both; `cpus` threads.
/// * `config` - Supplies the usearch executable and scratch location.
///
/// # Returns
/// Command, or OptionError for bad options or a missing usearch.
pub fn build_usearch_global(options: Options, config: &Arc<Config>) -> Result<Command, OptionError> {
    let name = "usearch_global";
    let v = Validator::new(name, &options);
    v.allowed(&["database", "identity", "strand", "cpus"])?
        .required(&["database", "identity"])?
        .files_exist(&["database"])?
        .assert_range("identity", 0.0, 1.0)?
        .allowed_values("strand", &["plus", "both"])?
        .assert_positive("cpus")?;
    let program = locate_tool(USEARCH_TAG, config)?;

    let mut resolved = options.clone();
    resolved.default_to("strand", "plus");
    resolved.default_to("cpus", 1);

    let mode = Mode::Global {
        database: PathBuf::from(resolved.get("database").map(|d| d.to_plain_string()).unwrap_or_default()),
        identity: resolved.get_f64("identity").unwrap_or_default(),
        strand: resolved.get("strand").map(|s| s.to_plain_string()).unwrap_or_default(),
        cpus: resolved.get_i64("cpus").unwrap_or(1),
    };
    let usearch = Usearch {
        program,
        config: Arc::clone(config),
        mode,
    };
    Ok(Command::new(name, options, resolved, usearch))
}

/// Clusters sequences into OTUs and emits the OTU centroids.
///
/// # Arguments
///
/// * `options` - `identity` (0..1, default 0.97).
/// * `config` - Supplies the usearch executable and scratch location.
///
/// # Returns
/// Command, or OptionError for bad options or a missing usearch.
pub fn build_cluster_otus(options: Options, config: &Arc<Config>) -> Result<Command, OptionError> {
    let name = "cluster_otus";
    let v = Validator::new(name, &options);
    v.allowed(&["identity"])?.assert_range("identity", 0.0, 1.0)?;
    let program = locate_tool(USEARCH_TAG, config)?;

    let mut resolved = options.clone();
    resolved.default_to("identity", 0.97);

    let usearch = Usearch {
        program,
        config: Arc::clone(config),
        mode: Mode::ClusterOtus {
            identity: resolved.get_f64("identity").unwrap_or(0.97),
        },
    };
    Ok(Command::new(name, options, resolved, usearch))
}

/// Runs usearch, mapping the benign empty-input failure to `None`.
async fn run_usearch(program: &Path, args: &[String]) -> Result<Option<ToolOutput>, ToolError> {
    match run_tool(USEARCH_TAG, program, args).await {
        Ok(out) => Ok(Some(out)),
        Err(e) if e.stderr.to_lowercase().contains(EMPTY_INPUT) => {
            debug!("{}: empty input, nothing to do", USEARCH_TAG);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// One hit line of a usearch `.uc` table.
fn parse_uc_hit(line: &str) -> Option<Record> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 10 || fields[0] != "H" {
        return None;
    }
    let mut record = Record::new();
    record.insert(RECORD_TYPE, USEARCH_TAG);
    record.insert("TYPE", fields[0]);
    record.insert("CLUSTER", Value::parse(fields[1]));
    record.insert("SEQ_LEN", Value::parse(fields[2]));
    record.insert("IDENT", Value::parse(fields[3]));
    record.insert("STRAND", fields[4]);
    record.insert("CIGAR", fields[7]);
    record.insert("Q_ID", fields[8]);
    record.insert("S_ID", fields[9]);
    Some(record)
}

/// `-otu_radius_pct` for a clustering identity, e.g. 0.97 gives 3.
fn otu_radius(identity: f64) -> f64 {
    ((1.0 - identity) * 100.0 * 1e6).round() / 1e6
}

fn read_otus(path: &Path) -> Result<Vec<Record>> {
    let reader = sequence_reader(path).with_context(|| format!("Failed to open {}", path.display()))?;
    reader
        .into_records()
        .map(|entry| {
            entry
                .map(Record::from)
                .with_context(|| format!("Malformed FASTA in {}", path.display()))
        })
        .collect()
}

#[async_trait]
impl CommandFn for Usearch {
    async fn execute(
        &self,
        input: &mut RecordReader,
        output: &mut RecordWriter,
        status: &mut Status,
    ) -> Result<()> {
        let scratch = ToolScratch::new(&self.config, USEARCH_TAG)?;
        let fasta = scratch.path("input.fna");
        stage_sequences(input, output, status, &fasta).await?;

        match &self.mode {
            Mode::Global {
                database,
                identity,
                strand,
                cpus,
            } => {
                status.init_counters(&[HITS_OUT]);
                let uc = scratch.path("output.uc");
                let args = vec![
                    "-usearch_global".to_string(),
                    fasta.display().to_string(),
                    "-db".to_string(),
                    database.display().to_string(),
                    "-strand".to_string(),
                    strand.clone(),
                    "-id".to_string(),
                    identity.to_string(),
                    "-threads".to_string(),
                    cpus.to_string(),
                    "-uc".to_string(),
                    uc.display().to_string(),
                ];
                if run_usearch(&self.program, &args).await?.is_none() || !uc.exists() {
                    return Ok(());
                }
                let table = tokio::fs::read_to_string(&uc)
                    .await
                    .with_context(|| format!("Failed to read {}", uc.display()))?;
                for record in table.lines().filter_map(parse_uc_hit) {
                    status.inc(HITS_OUT);
                    output.write(record).await?;
                }
            }
            Mode::ClusterOtus { identity } => {
                let otus = scratch.path("otus.fna");
                let args = vec![
                    "-cluster_otus".to_string(),
                    fasta.display().to_string(),
                    "-otus".to_string(),
                    otus.display().to_string(),
                    "-otu_radius_pct".to_string(),
                    otu_radius(*identity).to_string(),
                ];
                if run_usearch(&self.program, &args).await?.is_none() || !otus.exists() {
                    return Ok(());
                }
                for mut record in task::spawn_blocking(move || read_otus(&otus)).await?? {
                    record.insert(RECORD_TYPE, USEARCH_TAG);
                    tally_sequence(status, &record, Direction::Out);
                    output.write(record).await?;
                }
            }
        }
        Ok(())
    }
}
