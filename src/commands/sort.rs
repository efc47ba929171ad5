// src/commands/sort.rs: external sort on one record field
//
// Records are collected until their text size passes block_size, then the
// block is sorted and spilled to a temporary file. All spill files are merged
// through a min-heap holding the next unread record of each file. Records with
// equal keys from different spill files come out in no guaranteed order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::task;

use crate::config::defs::{Config, OptionError, DEFAULT_BLOCK_SIZE};
use crate::pipeline::command::{Command, CommandFn};
use crate::utils::options::{Options, Validator};
use crate::utils::record::{Record, Value};
use crate::utils::serializer::{Deserializer, Serializer};
use crate::utils::status::Status;
use crate::utils::streams::{RecordReader, RecordWriter};

const NAME: &str = "sort";

static NIL: Value = Value::Nil;

pub fn build(options: Options, config: &Arc<Config>) -> Result<Command, OptionError> {
    let v = Validator::new(NAME, &options);
    v.allowed(&["key", "reverse", "block_size"])?
        .required(&["key"])?
        .boolean(&["reverse"])?
        .assert_positive("block_size")?;

    let mut resolved = options.clone();
    resolved.default_to("reverse", false);
    resolved.default_to("block_size", DEFAULT_BLOCK_SIZE);

    let engine = SortEngine {
        order: SortOrder {
            key: resolved.get("key").map(|k| k.to_plain_string()).unwrap_or_default(),
            reverse: resolved.flag("reverse"),
        },
        block_size: resolved.get_i64("block_size").unwrap_or(DEFAULT_BLOCK_SIZE) as usize,
        tmp_dir: config.tmp_dir.clone(),
        merge_buffer: config.stream_buffer.max(1),
    };
    Ok(Command::new(NAME, options, resolved, engine))
}

#[derive(Clone)]
struct SortOrder {
    key: String,
    reverse: bool,
}

impl SortOrder {
    fn key_of<'a>(&self, record: &'a Record) -> &'a Value {
        record.get(&self.key).unwrap_or(&NIL)
    }

    /// Comparator shared by block sorting and merging.
    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ord = a.natural_cmp(b);
        if self.reverse { ord.reverse() } else { ord }
    }

    fn entry(&self, record: Record, file: usize) -> Reverse<Entry> {
        Reverse(Entry {
            key: self.key_of(&record).clone(),
            record,
            file,
            reverse: self.reverse,
        })
    }
}

struct SortEngine {
    order: SortOrder,
    block_size: usize,
    tmp_dir: PathBuf,
    merge_buffer: usize,
}

impl SortEngine {
    async fn spill(&self, batch: Vec<Record>) -> Result<NamedTempFile> {
        let order = self.order.clone();
        let tmp_dir = self.tmp_dir.clone();
        task::spawn_blocking(move || save_block(&order, batch, &tmp_dir)).await?
    }
}

/// Sorts the batch and writes it to a new spill file.
fn save_block(order: &SortOrder, mut batch: Vec<Record>, tmp_dir: &Path) -> Result<NamedTempFile> {
    batch.sort_by(|a, b| order.compare(order.key_of(a), order.key_of(b)));

    let mut spill = tempfile::Builder::new()
        .prefix("bp_sort_")
        .tempfile_in(tmp_dir)
        .with_context(|| format!("Failed to create spill file in {}", tmp_dir.display()))?;
    let mut serializer = Serializer::new(BufWriter::new(&mut spill));
    for record in &batch {
        serializer.write(record)?;
    }
    serializer.finish()?;
    debug!("{}: spilled block to {}", NAME, spill.path().display());
    Ok(spill)
}

/// K-way merge of the spill files into `merged`. Stops early once the
/// receiving side has gone away.
fn merge(order: &SortOrder, spills: &[NamedTempFile], merged: mpsc::Sender<Record>) -> Result<()> {
    let mut readers = spills
        .iter()
        .map(|spill| spill.reopen().map(|file| Deserializer::new(BufReader::new(file))))
        .collect::<std::io::Result<Vec<Deserializer<BufReader<File>>>>>()
        .context("Failed to reopen spill file")?;

    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (file, reader) in readers.iter_mut().enumerate() {
        if let Some(record) = reader.read()? {
            heap.push(order.entry(record, file));
        }
    }

    while let Some(Reverse(entry)) = heap.pop() {
        let file = entry.file;
        if merged.blocking_send(entry.record).is_err() {
            return Ok(());
        }
        if let Some(record) = readers[file].read()? {
            heap.push(order.entry(record, file));
        }
    }
    Ok(())
}

/// Next unread record of one spill file.
struct Entry {
    key: Value,
    record: Record,
    file: usize,
    reverse: bool,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        let ord = self.key.natural_cmp(&other.key);
        if self.reverse { ord.reverse() } else { ord }
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

#[async_trait]
impl CommandFn for SortEngine {
    async fn execute(
        &self,
        input: &mut RecordReader,
        output: &mut RecordWriter,
        status: &mut Status,
    ) -> Result<()> {
        let mut spills: Vec<NamedTempFile> = Vec::new();
        let mut batch: Vec<Record> = Vec::new();
        let mut size = 0usize;

        while let Some(record) = input.recv().await {
            size += record.to_text().len();
            batch.push(record);
            if size > self.block_size {
                spills.push(self.spill(std::mem::take(&mut batch)).await?);
                size = 0;
            }
        }
        if !batch.is_empty() {
            spills.push(self.spill(batch).await?);
        }
        status.set("spill_files", spills.len());

        // Spill files are deleted when the merge task drops them.
        let (tx, mut rx) = mpsc::channel(self.merge_buffer);
        let order = self.order.clone();
        let merger = task::spawn_blocking(move || merge(&order, &spills, tx));

        let mut written = Ok(());
        while let Some(record) = rx.recv().await {
            if let Err(e) = output.write(record).await {
                written = Err(e);
                break;
            }
        }
        drop(rx);
        let merged = merger.await;
        written?;
        merged??;
        Ok(())
    }
}
