use std::io::{self, Write};
use std::path::Path;

use seq_io::fasta::{OwnedRecord as FastaOwnedRecord, Reader as FastaReader};

use crate::config::defs::{FASTA_EXTS, SEQ, SEQ_LEN, SEQ_NAME};
use crate::utils::file::{extension_remover, FileReader};
use crate::utils::record::{Record, Value};

/// Creates a FASTA reader, gzip aware.
///
/// # Arguments
///
/// * `path`: &Path - Valid path to a FASTA file, optionally gzipped.
///
/// # Returns
/// io::Result<FastaReader<FileReader>>
pub fn sequence_reader(path: &Path) -> io::Result<FastaReader<FileReader>> {
    Ok(FastaReader::new(FileReader::open(path)?))
}

/// True when one of the path's extensions is a known FASTA extension.
pub fn is_fasta_path(path: &Path) -> bool {
    let (_, extensions) = extension_remover(path);
    extensions
        .iter()
        .any(|ext| FASTA_EXTS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Converts one FASTA entry into a record with SEQ_NAME, SEQ and SEQ_LEN.
/// The whole header line, description included, becomes SEQ_NAME.
impl From<FastaOwnedRecord> for Record {
    fn from(entry: FastaOwnedRecord) -> Self {
        let name = String::from_utf8_lossy(&entry.head).trim_end().to_string();
        let seq = String::from_utf8_lossy(&entry.seq).into_owned();
        let len = seq.len();
        let mut record = Record::new();
        record.insert(SEQ_NAME, Value::Str(name));
        record.insert(SEQ, Value::Str(seq));
        record.insert(SEQ_LEN, len);
        record
    }
}

/// Sequence name and residues of a record, when it carries both.
pub fn sequence_of(record: &Record) -> Option<(String, String)> {
    let name = record.get(SEQ_NAME)?;
    let seq = record.get(SEQ)?;
    if name.is_nil() || seq.is_nil() {
        return None;
    }
    Some((name.to_string(), seq.to_string()))
}

/// Writes one FASTA entry.
///
/// # Arguments
///
/// * `writer` - Destination.
/// * `name` - Header text without the leading `>`.
/// * `seq` - Residues.
/// * `wrap` - Residues per line; `None` writes the sequence on one line.
///
/// # Returns
/// io::Result<()>
pub fn write_fasta_record<W: Write>(
    writer: &mut W,
    name: &str,
    seq: &[u8],
    wrap: Option<usize>,
) -> io::Result<()> {
    writer.write_all(b">")?;
    writer.write_all(name.as_bytes())?;
    writer.write_all(b"\n")?;

    match wrap {
        Some(width) if width > 0 => {
            for chunk in seq.chunks(width) {
                writer.write_all(chunk)?;
                writer.write_all(b"\n")?;
            }
        }
        _ => {
            writer.write_all(seq)?;
            writer.write_all(b"\n")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sequence_reader_fasta() -> anyhow::Result<()> {
        let mut tmp = NamedTempFile::new_in(std::env::temp_dir())?;
        writeln!(tmp, ">seq1 testFASTA\nATCG\nGG\n>seq2\nTT")?;
        tmp.flush()?;

        let records: Vec<Record> = sequence_reader(tmp.path())?
            .into_records()
            .map(|r| r.map(Record::from))
            .collect::<Result<_, _>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get(SEQ_NAME), Some(&Value::from("seq1 testFASTA")));
        assert_eq!(records[0].get(SEQ), Some(&Value::from("ATCGGG")));
        assert_eq!(records[0].get(SEQ_LEN), Some(&Value::Int(6)));
        assert_eq!(sequence_of(&records[1]), Some(("seq2".to_string(), "TT".to_string())));
        Ok(())
    }

    #[test]
    fn test_write_fasta_record_wrap() -> io::Result<()> {
        let mut out = Vec::new();
        write_fasta_record(&mut out, "s1", b"ACGTA", Some(2))?;
        write_fasta_record(&mut out, "s2", b"ACGTA", None)?;
        assert_eq!(String::from_utf8_lossy(&out), ">s1\nAC\nGT\nA\n>s2\nACGTA\n");
        Ok(())
    }

    #[test]
    fn test_is_fasta_path() {
        assert!(is_fasta_path(&PathBuf::from("reads.fna.gz")));
        assert!(is_fasta_path(&PathBuf::from("reads.FA")));
        assert!(!is_fasta_path(&PathBuf::from("reads.fastq")));
    }
}
