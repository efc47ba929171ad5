// src/commands/tree.rs: phylogenetic tree of aligned sequences with FastTree

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::debug;

use crate::commands::{stage_sequences, ToolScratch};
use crate::config::defs::{Config, OptionError, FASTTREE_TAG, RECORD_TYPE};
use crate::pipeline::command::{Command, CommandFn};
use crate::utils::command::{locate_tool, run_tool};
use crate::utils::options::{Options, Validator};
use crate::utils::record::Record;
use crate::utils::status::Status;
use crate::utils::streams::{RecordReader, RecordWriter};

const NAME: &str = "tree";

/// Options: `type` dna or protein (default dna).
pub fn build(options: Options, config: &Arc<Config>) -> Result<Command, OptionError> {
    let v = Validator::new(NAME, &options);
    v.allowed(&["type"])?.allowed_values("type", &["dna", "protein"])?;
    let program = locate_tool(FASTTREE_TAG, config)?;

    let mut resolved = options.clone();
    resolved.default_to("type", "dna");

    let tree = Tree {
        program,
        config: Arc::clone(config),
        nucleotide: resolved.get("type").map(|t| t.to_plain_string()).as_deref() == Some("dna"),
    };
    Ok(Command::new(NAME, options, resolved, tree))
}

struct Tree {
    program: PathBuf,
    config: Arc<Config>,
    nucleotide: bool,
}

#[async_trait]
impl CommandFn for Tree {
    async fn execute(
        &self,
        input: &mut RecordReader,
        output: &mut RecordWriter,
        status: &mut Status,
    ) -> Result<()> {
        let scratch = ToolScratch::new(&self.config, FASTTREE_TAG)?;
        let fasta = scratch.path("input.fna");
        if stage_sequences(input, output, status, &fasta).await? == 0 {
            debug!("{}: no sequences, skipping {}", NAME, FASTTREE_TAG);
            return Ok(());
        }

        let mut args = Vec::new();
        if self.nucleotide {
            args.push("-nt".to_string());
        }
        args.push("-quiet".to_string());
        args.push(fasta.display().to_string());
        let out = run_tool(FASTTREE_TAG, &self.program, &args).await?;

        let mut record = Record::new();
        record.insert(RECORD_TYPE, NAME);
        record.insert("TREE", out.stdout.trim());
        output.write(record).await?;
        Ok(())
    }
}
