// src/commands/write_fasta.rs: write sequence records as FASTA, passing every record on

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::commands::{tally_sequence, Direction};
use crate::config::defs::OptionError;
use crate::pipeline::command::{Command, CommandFn};
use crate::utils::fastx::{sequence_of, write_fasta_record};
use crate::utils::file::FileWriter;
use crate::utils::options::{Options, Validator};
use crate::utils::status::Status;
use crate::utils::streams::{RecordReader, RecordWriter};

const NAME: &str = "write_fasta";

/// Options: `output` (stdout when absent), `force` to overwrite, `wrap`
/// residues per line, `gzip` to compress.
pub fn build(options: Options) -> Result<Command, OptionError> {
    let v = Validator::new(NAME, &options);
    v.allowed(&["output", "force", "wrap", "gzip"])?
        .boolean(&["force", "gzip"])?
        .files_exist_no_force("output")?
        .assert_positive("wrap")?;

    let writer = WriteFasta {
        output: options.get("output").map(|p| PathBuf::from(p.to_plain_string())),
        wrap: options.get_i64("wrap").map(|w| w as usize),
        gzip: options.flag("gzip"),
    };
    Ok(Command::new(NAME, options.clone(), options, writer))
}

struct WriteFasta {
    output: Option<PathBuf>,
    wrap: Option<usize>,
    gzip: bool,
}

#[async_trait]
impl CommandFn for WriteFasta {
    async fn execute(
        &self,
        input: &mut RecordReader,
        output: &mut RecordWriter,
        status: &mut Status,
    ) -> Result<()> {
        let mut file = match &self.output {
            Some(path) => Some(
                FileWriter::create(path, self.gzip)
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            ),
            None => None,
        };
        let mut stdout = std::io::stdout();

        while let Some(record) = input.recv().await {
            if let Some((name, seq)) = sequence_of(&record) {
                match file.as_mut() {
                    Some(f) => write_fasta_record(f, &name, seq.as_bytes(), self.wrap)?,
                    None => write_fasta_record(&mut stdout, &name, seq.as_bytes(), self.wrap)?,
                }
                tally_sequence(status, &record, Direction::Out);
            }
            output.write(record).await?;
        }

        match file {
            Some(f) => f.finish()?,
            None => stdout.flush()?,
        }
        Ok(())
    }
}
