// src/utils/streams.rs
use std::os::fd::OwnedFd;
use std::path::PathBuf;

use log::debug;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::utils::record::Record;
use crate::utils::serializer::{read_frame, write_frame};

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Write to closed stream")]
    Closed,

    #[error("Broken pipe: the reading end of the stream is closed")]
    BrokenPipe,
}

/// Write end of a record pipe.
#[derive(Debug)]
pub struct RecordWriter {
    tx: Option<mpsc::Sender<Record>>,
    sent: u64,
}

/// Read end of a record pipe.
#[derive(Debug)]
pub struct RecordReader {
    rx: Option<mpsc::Receiver<Record>>,
    received: u64,
}

/// Creates a connected, bounded record pipe.
///
/// # Arguments
///
/// * `capacity` - Records buffered before the writer suspends. At least 1.
///
/// # Returns
/// (RecordReader, RecordWriter)
pub fn pipe(capacity: usize) -> (RecordReader, RecordWriter) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        RecordReader { rx: Some(rx), received: 0 },
        RecordWriter { tx: Some(tx), sent: 0 },
    )
}

impl RecordWriter {
    /// Appends a record, suspending while the pipe is full.
    pub async fn write(&mut self, record: Record) -> Result<(), StreamError> {
        let tx = self.tx.as_ref().ok_or(StreamError::Closed)?;
        tx.send(record).await.map_err(|_| StreamError::BrokenPipe)?;
        self.sent += 1;
        Ok(())
    }

    /// Signals end of stream to the reader. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.tx.take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl RecordReader {
    /// Next record, or None once the writer is closed and the buffer drained.
    pub async fn recv(&mut self) -> Option<Record> {
        let record = self.rx.as_mut()?.recv().await?;
        self.received += 1;
        Some(record)
    }

    /// Stops reading. Pending and future writes fail with a broken pipe.
    pub fn close(&mut self) {
        self.rx.take();
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Converts the remaining records into a `Stream`.
    pub fn into_stream(mut self) -> ReceiverStream<Record> {
        match self.rx.take() {
            Some(rx) => ReceiverStream::new(rx),
            None => {
                let (_, rx) = mpsc::channel(1);
                ReceiverStream::new(rx)
            }
        }
    }
}

/// Where the head of a pipeline takes its records from.
#[derive(Debug, Clone, Default)]
pub enum Source {
    #[default]
    Empty,
    Records(Vec<Record>),
    /// Text stream format file.
    File(PathBuf),
    Stdin,
}

/// Where the records leaving the last command go.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Sink {
    #[default]
    Discard,
    /// Text stream format file.
    File(PathBuf),
    Stdout,
    Collect,
}

/// Parses the text stream format: `KEY: value` lines, each record terminated by `---`.
async fn feed_text<R: tokio::io::AsyncRead + Unpin>(
    input: R,
    writer: &mut RecordWriter,
) -> std::io::Result<()> {
    let mut lines = BufReader::new(input).lines();
    let mut body: Vec<String> = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line == "---" {
            match Record::from_text_lines(body.iter().map(String::as_str)) {
                Some(record) => {
                    if writer.write(record).await.is_err() {
                        return Ok(());
                    }
                }
                None => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Malformed record in text stream: {:?}", body),
                    ))
                }
            }
            body.clear();
        } else if !line.is_empty() {
            body.push(line);
        }
    }
    Ok(())
}

/// Writes the pipeline's source into the head command's input, then closes it.
/// A head command that stops reading ends feeding early without error.
///
/// # Arguments
///
/// * `source` - Records, a text stream file, stdin or nothing.
/// * `writer` - Input pipe of the first command.
///
/// # Returns
/// io::Result<()>
pub async fn feed(source: Source, mut writer: RecordWriter) -> std::io::Result<()> {
    let result = match source {
        Source::Empty => Ok(()),
        Source::Records(records) => {
            for record in records {
                if writer.write(record).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
        Source::File(path) => match tokio::fs::File::open(&path).await {
            Ok(file) => feed_text(file, &mut writer).await,
            Err(e) => Err(std::io::Error::new(
                e.kind(),
                format!("Failed to open pipeline input {}: {}", path.display(), e),
            )),
        },
        Source::Stdin => feed_text(tokio::io::stdin(), &mut writer).await,
    };
    writer.close();
    result
}

/// Consumes the output of the last command.
///
/// # Arguments
///
/// * `reader` - Output pipe of the last command.
/// * `sink` - Destination.
///
/// # Returns
/// Collected records for `Sink::Collect`, otherwise empty.
pub async fn drain(mut reader: RecordReader, sink: Sink) -> std::io::Result<Vec<Record>> {
    let mut collected = Vec::new();
    match sink {
        Sink::Discard => {
            while reader.recv().await.is_some() {}
        }
        Sink::Collect => {
            while let Some(record) = reader.recv().await {
                collected.push(record);
            }
        }
        Sink::File(path) => {
            let file = tokio::fs::File::create(&path).await.map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("Failed to create pipeline output {}: {}", path.display(), e),
                )
            })?;
            let mut out = BufWriter::new(file);
            while let Some(record) = reader.recv().await {
                out.write_all(record.to_text().as_bytes()).await?;
            }
            out.flush().await?;
        }
        Sink::Stdout => {
            let mut out = BufWriter::new(tokio::io::stdout());
            while let Some(record) = reader.recv().await {
                out.write_all(record.to_text().as_bytes()).await?;
            }
            out.flush().await?;
        }
    }
    reader.close();
    Ok(collected)
}

/// Moves framed records from an OS pipe into an in-memory pipe.
/// Stops at EOF, or early when the in-memory reader is gone.
///
/// # Arguments
///
/// * `fd` - Read end of an OS pipe. Must be called inside a runtime.
/// * `writer` - In-memory pipe feeding a command.
///
/// # Returns
/// io::Result<()>
pub async fn pump_from_fd(fd: OwnedFd, mut writer: RecordWriter) -> std::io::Result<()> {
    let mut rx = pipe::Receiver::from_owned_fd(fd)?;
    let result = loop {
        match read_frame(&mut rx).await {
            Ok(Some(record)) => {
                if writer.write(record).await.is_err() {
                    debug!("Record pump: downstream closed, dropping OS pipe reader");
                    break Ok(());
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    writer.close();
    result
}

/// Moves records from an in-memory pipe out through an OS pipe as frames.
/// A reader that went away on the far side closes `reader`, which the
/// producing command then sees as a broken pipe.
///
/// # Arguments
///
/// * `reader` - In-memory pipe fed by a command.
/// * `fd` - Write end of an OS pipe. Must be called inside a runtime.
///
/// # Returns
/// io::Result<()>
pub async fn pump_to_fd(mut reader: RecordReader, fd: OwnedFd) -> std::io::Result<()> {
    let mut tx = pipe::Sender::from_owned_fd(fd)?;
    let mut result = Ok(());
    while let Some(record) = reader.recv().await {
        if let Err(e) = write_frame(&mut tx, &record).await {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                result = Err(e);
            }
            break;
        }
    }
    reader.close();
    if result.is_ok() {
        result = tx.flush().await;
    }
    result
}
