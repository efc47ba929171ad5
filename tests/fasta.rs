use std::io::Read;

use anyhow::Result;
use flate2::read::MultiGzDecoder;

use biopieces::utils::options::Options;
use biopieces::Pipeline;

const FASTA: &str = ">test1 sample=a\nATCGATCGTTAGCCTAG\n>test2\nDSEQM\n>test3\nACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT\n";

#[test]
fn test_read_then_write_reproduces_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("test.fna");
    let output = dir.path().join("test2.fna");
    std::fs::write(&input, FASTA)?;

    let mut p = Pipeline::new();
    p.read_fasta(Options::new().with("input", input.as_path()))?
        .write_fasta(Options::new().with("output", output.as_path()))?;
    p.run(Options::new())?;

    assert_eq!(std::fs::read(&output)?, FASTA.as_bytes());
    let status = p.status();
    assert_eq!(status[0].count("sequences_out"), 3);
    assert_eq!(status[1].count("residues_out"), 17 + 5 + 40);
    Ok(())
}

#[test]
fn test_existing_output_requires_force() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("test.fna");
    let output = dir.path().join("out.fna");
    std::fs::write(&input, FASTA)?;
    std::fs::write(&output, "old")?;

    let mut p = Pipeline::new();
    assert!(p.write_fasta(Options::new().with("output", output.as_path())).is_err());

    p.read_fasta(Options::new().with("input", input.as_path()).with("first", 1))?
        .write_fasta(
            Options::new()
                .with("output", output.as_path())
                .with("force", true)
                .with("wrap", 5),
        )?;
    p.run(Options::new().with("thread", true))?;
    assert_eq!(
        std::fs::read_to_string(&output)?,
        ">test1 sample=a\nATCGA\nTCGTT\nAGCCT\nAG\n"
    );
    Ok(())
}

#[test]
fn test_gzip_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("test.fna");
    let packed = dir.path().join("test.fna.gz");
    let output = dir.path().join("again.fna");
    std::fs::write(&input, FASTA)?;

    let mut pack = Pipeline::new();
    pack.read_fasta(Options::new().with("input", input.as_path()))?
        .write_fasta(Options::new().with("output", packed.as_path()).with("gzip", true))?;
    pack.run(Options::new())?;

    let mut unpacked = String::new();
    MultiGzDecoder::new(std::fs::File::open(&packed)?).read_to_string(&mut unpacked)?;
    assert_eq!(unpacked, FASTA);

    let mut unpack = Pipeline::new();
    unpack
        .read_fasta(Options::new().with("input", packed.as_path()).with("last", 2))?
        .write_fasta(Options::new().with("output", output.as_path()))?;
    unpack.run(Options::new())?;
    assert!(std::fs::read_to_string(&output)?.starts_with(">test2\nDSEQM\n>test3\n"));
    Ok(())
}
