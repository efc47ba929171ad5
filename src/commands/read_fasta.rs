// src/commands/read_fasta.rs: emit FASTA entries as records

use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};

use crate::commands::{tally_sequence, Direction};
use crate::config::defs::OptionError;
use crate::pipeline::command::{Command, CommandFn};
use crate::utils::fastx::{is_fasta_path, sequence_reader};
use crate::utils::file::option_paths;
use crate::utils::options::{Options, Validator};
use crate::utils::record::Record;
use crate::utils::status::Status;
use crate::utils::streams::{RecordReader, RecordWriter};

const NAME: &str = "read_fasta";

/// Options: `input` (one path or a list, gzip aware), `first` or `last` to
/// limit how many entries are emitted.
pub fn build(options: Options) -> Result<Command, OptionError> {
    let v = Validator::new(NAME, &options);
    v.allowed(&["input", "first", "last"])?
        .required(&["input"])?
        .files_exist(&["input"])?
        .unique(&["first", "last"])?
        .assert_non_negative("first")?
        .assert_non_negative("last")?;

    let reader = ReadFasta {
        inputs: option_paths(options.get("input")),
        first: options.get_i64("first").map(|n| n as usize),
        last: options.get_i64("last").map(|n| n as usize),
    };
    Ok(Command::new(NAME, options.clone(), options, reader))
}

struct ReadFasta {
    inputs: Vec<PathBuf>,
    first: Option<usize>,
    last: Option<usize>,
}

#[async_trait]
impl CommandFn for ReadFasta {
    async fn execute(
        &self,
        input: &mut RecordReader,
        output: &mut RecordWriter,
        status: &mut Status,
    ) -> Result<()> {
        while let Some(record) = input.recv().await {
            tally_sequence(status, &record, Direction::In);
            output.write(record).await?;
        }

        let mut emitted = 0usize;
        let mut tail: VecDeque<Record> = VecDeque::new();
        'files: for path in &self.inputs {
            debug!("{}: reading {}", NAME, path.display());
            if !is_fasta_path(path) {
                warn!("{}: {} does not have a FASTA extension", NAME, path.display());
            }
            let reader = sequence_reader(path).with_context(|| format!("Failed to open {}", path.display()))?;
            for entry in reader.into_records() {
                if self.first.is_some_and(|first| emitted >= first) {
                    break 'files;
                }
                let entry = entry.with_context(|| format!("Malformed FASTA in {}", path.display()))?;
                let record = Record::from(entry);
                match self.last {
                    Some(last) => {
                        tail.push_back(record);
                        if tail.len() > last {
                            tail.pop_front();
                        }
                    }
                    None => {
                        tally_sequence(status, &record, Direction::Out);
                        output.write(record).await?;
                        emitted += 1;
                    }
                }
            }
        }
        for record in tail {
            tally_sequence(status, &record, Direction::Out);
            output.write(record).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defs::SEQ_NAME;
    use crate::utils::streams::pipe;
    use std::io::Write;

    async fn read(options: Options) -> Vec<String> {
        let cmd = build(options).unwrap();
        let (mut in_r, mut in_w) = pipe(16);
        let (mut out_r, mut out_w) = pipe(16);
        in_w.close();
        let report = cmd.run(&mut in_r, &mut out_w).await;
        assert!(report.failure.is_none(), "{:?}", report.failure);
        let mut names = Vec::new();
        while let Some(r) = out_r.recv().await {
            names.push(r.get(SEQ_NAME).map(|v| v.to_string()).unwrap_or_default());
        }
        names
    }

    #[tokio::test]
    async fn test_first_and_last() -> anyhow::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new()?;
        write!(tmp, ">a\nAC\n>b\nGT\n>c\nTT\n")?;
        tmp.flush()?;
        let path = tmp.path().to_path_buf();

        assert_eq!(read(Options::new().with("input", path.as_path())).await, vec!["a", "b", "c"]);
        assert_eq!(read(Options::new().with("input", path.as_path()).with("first", 2)).await, vec!["a", "b"]);
        assert_eq!(read(Options::new().with("input", path.as_path()).with("last", 1)).await, vec!["c"]);
        assert!(build(Options::new().with("input", path.as_path()).with("first", 1).with("last", 1)).is_err());
        assert!(build(Options::new().with("input", "/nonexistent/x.fna")).is_err());
        Ok(())
    }
}
