// src/commands/genecall.rs: gene prediction with prodigal

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;

use crate::commands::{stage_sequences, ToolScratch};
use crate::config::defs::{Config, OptionError, PRODIGAL_TAG, RECORD_TYPE};
use crate::pipeline::command::{Command, CommandFn};
use crate::utils::command::{locate_tool, run_tool};
use crate::utils::options::{Options, Validator};
use crate::utils::record::{Record, Value};
use crate::utils::status::{Status, HITS_OUT};
use crate::utils::streams::{RecordReader, RecordWriter};

const NAME: &str = "genecall";

pub fn build(options: Options, config: &Arc<Config>) -> Result<Command, OptionError> {
    let v = Validator::new(NAME, &options);
    v.allowed(&["procedure", "closed_ends"])?
        .allowed_values("procedure", &["single", "meta"])?
        .boolean(&["closed_ends"])?;
    let program = locate_tool(PRODIGAL_TAG, config)?;

    let mut resolved = options.clone();
    resolved.default_to("procedure", "single");
    resolved.default_to("closed_ends", false);

    let genecall = Genecall {
        program,
        config: Arc::clone(config),
        procedure: resolved.get("procedure").map(|p| p.to_plain_string()).unwrap_or_default(),
        closed_ends: resolved.flag("closed_ends"),
    };
    Ok(Command::new(NAME, options, resolved, genecall))
}

struct Genecall {
    program: PathBuf,
    config: Arc<Config>,
    procedure: String,
    closed_ends: bool,
}

/// One feature line of prodigal's GFF output. Coordinates become 0-based.
fn parse_gff_line(line: &str) -> Option<Record> {
    if line.starts_with('#') || line.trim().is_empty() {
        return None;
    }
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 7 {
        return None;
    }
    let start: i64 = fields[3].parse().ok()?;
    let end: i64 = fields[4].parse().ok()?;

    let mut record = Record::new();
    record.insert(RECORD_TYPE, NAME);
    record.insert("S_ID", fields[0]);
    record.insert("S_BEG", start - 1);
    record.insert("S_END", end - 1);
    record.insert("S_LEN", end - start + 1);
    record.insert("STRAND", fields[6]);
    record.insert("SCORE", Value::parse(fields[5]));
    Some(record)
}

#[async_trait]
impl CommandFn for Genecall {
    async fn execute(
        &self,
        input: &mut RecordReader,
        output: &mut RecordWriter,
        status: &mut Status,
    ) -> Result<()> {
        status.init_counters(&[HITS_OUT]);
        let scratch = ToolScratch::new(&self.config, PRODIGAL_TAG)?;
        let fasta = scratch.path("input.fna");
        if stage_sequences(input, output, status, &fasta).await? == 0 {
            debug!("{}: no sequences, skipping {}", NAME, PRODIGAL_TAG);
            return Ok(());
        }

        let gff = scratch.path("output.gff");
        let mut args = vec![
            "-i".to_string(),
            fasta.display().to_string(),
            "-o".to_string(),
            gff.display().to_string(),
            "-f".to_string(),
            "gff".to_string(),
            "-p".to_string(),
            self.procedure.clone(),
        ];
        if self.closed_ends {
            args.push("-c".to_string());
        }
        run_tool(PRODIGAL_TAG, &self.program, &args).await?;

        let table = tokio::fs::read_to_string(&gff)
            .await
            .with_context(|| format!("Failed to read {}", gff.display()))?;
        for record in table.lines().filter_map(parse_gff_line) {
            status.inc(HITS_OUT);
            output.write(record).await?;
        }
        Ok(())
    }
}
