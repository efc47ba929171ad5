use anyhow::Result;

use biopieces::config::defs::PipelineError;
use biopieces::record;
use biopieces::utils::options::Options;
use biopieces::utils::record::Record;
use biopieces::Pipeline;

fn numbered(n: i64) -> Vec<Record> {
    (0..n)
        .map(|i| record! { "SEQ_NAME" => format!("seq{}", i), "SEQ" => "ACGT", "N" => i })
        .collect()
}

fn filter_chain() -> Result<Pipeline> {
    let mut p = Pipeline::new();
    p.grab(Options::new().with("evaluate", ":N % 3 != 1"))?
        .grab(Options::new().with("reject", "seq5").with("exact", true))?
        .grab(Options::new().with("select", "ACGT").with("keys", ["SEQ"]))?;
    Ok(p)
}

#[test]
fn test_order_is_the_same_with_enumerate_and_thread() -> Result<()> {
    let input = numbered(500);
    let enumerated = filter_chain()?.collect(input.clone(), Options::new())?;
    let threaded = filter_chain()?.collect(input, Options::new().with("thread", true))?;

    assert_eq!(enumerated.len(), 500 - 167 - 1);
    assert_eq!(enumerated, threaded);
    let ns: Vec<i64> = enumerated.iter().filter_map(|r| r.get("N").and_then(|v| v.as_i64())).collect();
    assert!(ns.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[test]
fn test_empty_pipeline_fails() {
    let mut p = Pipeline::new();
    assert!(matches!(p.run(Options::new()), Err(PipelineError::Empty)));
    assert!(matches!(p.collect(numbered(1), Options::new()), Err(PipelineError::Empty)));
}

#[test]
fn test_select_and_reject_partition_input() -> Result<()> {
    let input = numbered(40);
    let patterns = ["seq1", "seq3$"];

    let mut select = Pipeline::new();
    select.grab(Options::new().with("select", patterns))?;
    let mut reject = Pipeline::new();
    reject.grab(Options::new().with("reject", patterns))?;

    let selected = select.collect(input.clone(), Options::new())?;
    let rejected = reject.collect(input.clone(), Options::new())?;

    assert_eq!(selected.len() + rejected.len(), input.len());
    assert!(selected.iter().all(|r| !rejected.contains(r)));
    assert!(input.iter().all(|r| selected.contains(r) || rejected.contains(r)));
    Ok(())
}

#[test]
fn test_grab_select_list() -> Result<()> {
    let input = vec![
        record! { "SEQ_NAME" => "test1", "SEQ" => "atcg" },
        record! { "SEQ_NAME" => "test2", "SEQ" => "DSEQM" },
        record! { "FOO" => "SEQ" },
    ];
    let mut p = Pipeline::new();
    p.grab(Options::new().with("select", ["est1", "QM"]))?;
    let out = p.collect(input.clone(), Options::new())?;
    assert_eq!(out, input[..2].to_vec());
    Ok(())
}

#[test]
fn test_failure_names_the_command() -> Result<()> {
    let mut p = Pipeline::new();
    p.grab(Options::new().with("select", "seq"))?
        .grab(Options::new().with("evaluate", ":N / 0 == 1"))?;
    match p.collect(numbered(10), Options::new().with("thread", true)) {
        Err(PipelineError::CommandFailed { command, message }) => {
            assert_eq!(command, r#".grab(evaluate: ":N / 0 == 1")"#);
            assert!(message.contains("division by zero"), "{}", message);
        }
        other => panic!("unexpected outcome: {:?}", other.map(|r| r.len())),
    }
    Ok(())
}

#[test]
fn test_text_stream_input_and_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    std::fs::write(&input, "SEQ_NAME: a\nCOUNT: 4\n---\nSEQ_NAME: b\nCOUNT: 21\n---\n")?;

    let mut p = Pipeline::new();
    p.grab(Options::new().with("evaluate", ":COUNT > 10"))?;
    p.run(
        Options::new()
            .with("input", input.as_path())
            .with("output", output.as_path()),
    )?;
    assert_eq!(std::fs::read_to_string(&output)?, "SEQ_NAME: b\nCOUNT: 21\n---\n");
    assert!(p.to_s().starts_with("BP.new.grab(evaluate: \":COUNT > 10\").run(input: "));
    Ok(())
}

#[test]
fn test_missing_input_file_is_an_io_error() -> Result<()> {
    let mut p = Pipeline::new();
    p.grab(Options::new().with("select", "x"))?;
    let result = p.run(Options::new().with("input", "/nonexistent/records.txt"));
    assert!(matches!(result, Err(PipelineError::Io(_))));
    Ok(())
}
