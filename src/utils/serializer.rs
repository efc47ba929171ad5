// src/utils/serializer.rs: binary record frames for spill files and process pipes
//
// Frame layout: u32 little-endian payload length, then the bincode payload.

use std::io::{self, Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::utils::record::Record;

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

pub fn encode(record: &Record) -> io::Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode_config()).map_err(io::Error::other)
}

pub fn decode(bytes: &[u8]) -> io::Result<Record> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode_config())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(record)
}

/// Writes records as frames to any byte sink.
pub struct Serializer<W: Write> {
    inner: W,
}

impl<W: Write> Serializer<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write(&mut self, record: &Record) -> io::Result<()> {
        let payload = encode(record)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record too large to frame"))?;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(&payload)
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Reads frames back into records. Iteration ends at a clean end of input;
/// a frame cut short is an error.
pub struct Deserializer<R: Read> {
    inner: R,
}

impl<R: Read> Deserializer<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read(&mut self) -> io::Result<Option<Record>> {
        let mut len = [0u8; 4];
        let first = loop {
            match self.inner.read(&mut len[..1]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if first == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut len[1..])?;
        let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
        self.inner.read_exact(&mut payload)?;
        decode(&payload).map(Some)
    }
}

impl<R: Read> Iterator for Deserializer<R> {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, record: &Record) -> io::Result<()> {
    let payload = encode(record)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record too large to frame"))?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&payload).await
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Record>> {
    let mut len = [0u8; 4];
    if reader.read(&mut len[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len[1..]).await?;
    let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
    reader.read_exact(&mut payload).await?;
    decode(&payload).map(Some)
}
