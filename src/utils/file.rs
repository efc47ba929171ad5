use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::utils::options::OptionValue;

/// Checks the gzip magic bytes. Files shorter than two bytes are not gzipped.
pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..])? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(buffer == [0x1F, 0x8B]) // Gzip magic bytes
}

/// Enum to hold either an uncompressed or gzipped file reader
pub enum FileReader {
    Uncompressed(BufReader<File>),
    Gzipped(MultiGzDecoder<BufReader<File>>),
}

impl FileReader {
    /// Opens `path`, decompressing transparently when it is gzipped.
    pub fn open(path: &Path) -> io::Result<FileReader> {
        let gz = is_gzipped(path)?;
        let reader = BufReader::new(File::open(path)?);
        Ok(if gz {
            FileReader::Gzipped(MultiGzDecoder::new(reader))
        } else {
            FileReader::Uncompressed(reader)
        })
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileReader::Uncompressed(r) => r.read(buf),
            FileReader::Gzipped(r) => r.read(buf),
        }
    }
}

/// Enum to hold either an uncompressed or gzipped file writer
pub enum FileWriter {
    Uncompressed(BufWriter<File>),
    Gzipped(GzEncoder<BufWriter<File>>),
}

impl FileWriter {
    pub fn create(path: &Path, gzip: bool) -> io::Result<FileWriter> {
        let writer = BufWriter::new(File::create(path)?);
        Ok(if gzip {
            FileWriter::Gzipped(GzEncoder::new(writer, Compression::default()))
        } else {
            FileWriter::Uncompressed(writer)
        })
    }

    /// Flushes buffers and writes the gzip trailer.
    pub fn finish(self) -> io::Result<()> {
        match self {
            FileWriter::Uncompressed(mut w) => w.flush(),
            FileWriter::Gzipped(w) => w.finish()?.flush(),
        }
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileWriter::Uncompressed(w) => w.write(buf),
            FileWriter::Gzipped(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileWriter::Uncompressed(w) => w.flush(),
            FileWriter::Gzipped(w) => w.flush(),
        }
    }
}

/// Splits trailing extensions off a file name.
///
/// # Arguments
///
/// * `path` - File path, e.g. `reads.fna.gz`.
///
/// # Returns
/// (path without extensions, extensions in order), e.g. (`reads`, [`fna`, `gz`]).
pub fn extension_remover(path: &Path) -> (PathBuf, Vec<String>) {
    let mut stem = path.to_path_buf();
    let mut extensions = Vec::new();
    while let Some(ext) = stem.extension().map(|e| e.to_string_lossy().into_owned()) {
        if ext.is_empty() || ext.chars().any(|c| !c.is_ascii_alphanumeric()) {
            break;
        }
        extensions.insert(0, ext);
        stem.set_extension("");
    }
    (stem, extensions)
}

/// Paths named by an option holding one path or a list of them.
pub fn option_paths(value: Option<&OptionValue>) -> Vec<PathBuf> {
    value
        .map(|v| v.as_list().into_iter().map(|p| PathBuf::from(p.to_plain_string())).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_extension_remover() {
        let (stem, exts) = extension_remover(Path::new("/data/reads.fna.gz"));
        assert_eq!(stem, PathBuf::from("/data/reads"));
        assert_eq!(exts, vec!["fna".to_string(), "gz".to_string()]);
    }

    #[test]
    fn test_gzip_round_trip() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("x.txt.gz");
        let mut w = FileWriter::create(&path, true)?;
        w.write_all(b">a\nACGT\n")?;
        w.finish()?;
        assert!(is_gzipped(&path)?);

        let mut text = String::new();
        FileReader::open(&path)?.read_to_string(&mut text)?;
        assert_eq!(text, ">a\nACGT\n");

        let short = dir.path().join("short");
        std::fs::File::create(&short)?.write_all(b"x")?;
        assert!(!is_gzipped(&short)?);
        Ok(())
    }
}
