// src/commands/dump.rs: print records to stdout in the text stream format

use std::collections::VecDeque;
use std::io::Write;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::defs::OptionError;
use crate::pipeline::command::{Command, CommandFn};
use crate::utils::options::{Options, Validator};
use crate::utils::record::Record;
use crate::utils::status::Status;
use crate::utils::streams::{RecordReader, RecordWriter};

const NAME: &str = "dump";

/// Options: `first` or `last` limit what is printed. Every record passes on.
pub fn build(options: Options) -> Result<Command, OptionError> {
    let v = Validator::new(NAME, &options);
    v.allowed(&["first", "last"])?
        .unique(&["first", "last"])?
        .assert_non_negative("first")?
        .assert_non_negative("last")?;

    let dump = Dump {
        first: options.get_i64("first").map(|n| n as usize),
        last: options.get_i64("last").map(|n| n as usize),
    };
    Ok(Command::new(NAME, options.clone(), options, dump))
}

struct Dump {
    first: Option<usize>,
    last: Option<usize>,
}

#[async_trait]
impl CommandFn for Dump {
    async fn execute(
        &self,
        input: &mut RecordReader,
        output: &mut RecordWriter,
        _status: &mut Status,
    ) -> Result<()> {
        let mut stdout = std::io::stdout();
        let mut printed = 0usize;
        let mut tail: VecDeque<Record> = VecDeque::new();

        while let Some(record) = input.recv().await {
            match (self.first, self.last) {
                (Some(first), _) if printed >= first => {}
                (_, Some(last)) => {
                    tail.push_back(record.clone());
                    if tail.len() > last {
                        tail.pop_front();
                    }
                }
                _ => {
                    stdout.write_all(record.to_text().as_bytes())?;
                    printed += 1;
                }
            }
            output.write(record).await?;
        }
        for record in tail {
            stdout.write_all(record.to_text().as_bytes())?;
        }
        stdout.flush()?;
        Ok(())
    }
}
