use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;

use biopieces::config::defs::{Config, PipelineError, FASTTREE_TAG, PRODIGAL_TAG, USEARCH_TAG};
use biopieces::record;
use biopieces::utils::options::Options;
use biopieces::utils::record::Record;
use biopieces::Pipeline;

// A script being written while another test spawns a process can fail to exec.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

const FAKE_USEARCH: &str = r#"#!/bin/sh
mode="$1"
input="$2"
shift 2
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -uc|-otus) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ ! -s "$input" ]; then
  echo "---Fatal error--- Empty input file" >&2
  exit 1
fi
case "$mode" in
  -usearch_global)
    grep '^>' "$input" | sed 's/^>//' | while read -r name; do
      printf 'H\t0\t4\t100.0\t+\t0\t0\t4M\t%s\tref1\n' "$name"
    done > "$out" ;;
  -cluster_otus)
    head -n 2 "$input" > "$out" ;;
esac
"#;

const FAKE_PRODIGAL: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    -i) input="$2"; shift 2 ;;
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf '##gff-version  3\n' > "$out"
grep '^>' "$input" | sed 's/^>//' | while read -r name; do
  printf '%s\tProdigal_v2.6.3\tCDS\t1\t9\t12.5\t+\t0\tID=1_1\n' "$name" >> "$out"
done
"#;

const FAKE_FASTTREE: &str = r#"#!/bin/sh
if [ "$1" = "-nt" ]; then
  echo "(a:0.1,b:0.2);"
else
  echo "(p:0.3,q:0.4);"
fi
"#;

const FAILING_TOOL: &str = "#!/bin/sh\necho boom >&2\nexit 3\n";

fn script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, body)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

fn sequences() -> Vec<Record> {
    vec![
        record! { "SEQ_NAME" => "s1", "SEQ" => "ATCGATCGA" },
        record! { "NOTE" => "no sequence" },
        record! { "SEQ_NAME" => "s2", "SEQ" => "GGCCAATTG" },
    ]
}

fn text(record: &Record, key: &str) -> String {
    record.get(key).map(|v| v.to_string()).unwrap_or_default()
}

#[test]
fn test_usearch_global_hits() -> Result<()> {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;
    let tool = script(dir.path(), "usearch", FAKE_USEARCH)?;
    let database = dir.path().join("db.fna");
    std::fs::write(&database, ">ref1\nATCG\n")?;

    let config = Config::default().with_tmp_dir(scratch.path()).with_tool(USEARCH_TAG, tool);
    let mut p = Pipeline::with_config(config);
    p.usearch_global(
        Options::new()
            .with("database", database.as_path())
            .with("identity", 0.9)
            .with("strand", "both"),
    )?;
    let out = p.collect(sequences(), Options::new())?;

    assert_eq!(out.len(), 3);
    assert_eq!(out[0], record! { "NOTE" => "no sequence" });
    assert_eq!(text(&out[1], "RECORD_TYPE"), "usearch");
    assert_eq!(text(&out[1], "Q_ID"), "s1");
    assert_eq!(text(&out[2], "Q_ID"), "s2");
    assert_eq!(text(&out[2], "S_ID"), "ref1");
    assert_eq!(p.status()[0].count("hits_out"), 2);
    assert_eq!(p.status()[0].count("sequences_in"), 2);
    assert_eq!(std::fs::read_dir(scratch.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_usearch_tolerates_empty_input() -> Result<()> {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir()?;
    let tool = script(dir.path(), "usearch", FAKE_USEARCH)?;
    let database = dir.path().join("db.fna");
    std::fs::write(&database, ">ref1\nATCG\n")?;

    let config = Config::default().with_tmp_dir(dir.path()).with_tool(USEARCH_TAG, tool);
    let mut p = Pipeline::with_config(config);
    p.usearch_global(Options::new().with("database", database.as_path()).with("identity", 0.9))?;
    let out = p.collect(vec![record! { "NOTE" => "no sequence" }], Options::new())?;
    assert_eq!(out, vec![record! { "NOTE" => "no sequence" }]);
    assert_eq!(p.status()[0].count("hits_out"), 0);
    Ok(())
}

#[test]
fn test_cluster_otus() -> Result<()> {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir()?;
    let tool = script(dir.path(), "usearch", FAKE_USEARCH)?;

    let config = Config::default().with_tmp_dir(dir.path()).with_tool(USEARCH_TAG, tool);
    let mut p = Pipeline::with_config(config);
    p.cluster_otus(Options::new())?;
    assert_eq!(p.to_s(), "BP.new.cluster_otus");
    let out = p.collect(sequences(), Options::new())?;

    assert_eq!(out.len(), 2);
    assert_eq!(text(&out[1], "SEQ_NAME"), "s1");
    assert_eq!(text(&out[1], "SEQ"), "ATCGATCGA");
    assert_eq!(text(&out[1], "RECORD_TYPE"), "usearch");
    Ok(())
}

#[test]
fn test_genecall() -> Result<()> {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir()?;
    let tool = script(dir.path(), "prodigal", FAKE_PRODIGAL)?;

    let config = Config::default().with_tmp_dir(dir.path()).with_tool(PRODIGAL_TAG, tool);
    let mut p = Pipeline::with_config(config);
    p.genecall(Options::new().with("procedure", "meta"))?;
    let out = p.collect(sequences(), Options::new().with("thread", true))?;

    assert_eq!(out.len(), 3);
    let genes: Vec<&Record> = out.iter().filter(|r| text(r, "RECORD_TYPE") == "genecall").collect();
    assert_eq!(genes.len(), 2);
    assert_eq!(text(genes[0], "S_ID"), "s1");
    assert_eq!(genes[0].get("S_BEG").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(genes[0].get("S_END").and_then(|v| v.as_i64()), Some(8));
    assert_eq!(genes[1].get("S_LEN").and_then(|v| v.as_i64()), Some(9));
    Ok(())
}

#[test]
fn test_tree() -> Result<()> {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir()?;
    let tool = script(dir.path(), "FastTree", FAKE_FASTTREE)?;
    let config = Config::default().with_tmp_dir(dir.path()).with_tool(FASTTREE_TAG, tool);

    let mut dna = Pipeline::with_config(config.clone());
    dna.tree(Options::new())?;
    let out = dna.collect(sequences(), Options::new())?;
    assert_eq!(out.len(), 2);
    assert_eq!(text(&out[1], "TREE"), "(a:0.1,b:0.2);");

    let mut protein = Pipeline::with_config(config);
    protein.tree(Options::new().with("type", "protein"))?;
    let out = protein.collect(sequences(), Options::new())?;
    assert_eq!(text(&out[1], "TREE"), "(p:0.3,q:0.4);");
    Ok(())
}

#[test]
fn test_tool_failure_carries_stderr() -> Result<()> {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;
    let tool = script(dir.path(), "prodigal", FAILING_TOOL)?;
    let config = Config::default().with_tmp_dir(scratch.path()).with_tool(PRODIGAL_TAG, tool);

    let mut p = Pipeline::with_config(config);
    p.genecall(Options::new())?;
    match p.collect(sequences(), Options::new()) {
        Err(PipelineError::CommandFailed { command, message }) => {
            assert_eq!(command, ".genecall");
            assert!(message.contains("boom"), "{}", message);
            assert!(message.contains("-p single"), "{}", message);
        }
        other => panic!("unexpected outcome: {:?}", other.map(|r| r.len())),
    }
    // The staged FASTA and the scratch dir holding it are gone.
    assert_eq!(std::fs::read_dir(scratch.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_usearch_failure_removes_scratch() -> Result<()> {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempfile::tempdir()?;
    let scratch = tempfile::tempdir()?;
    let tool = script(dir.path(), "usearch", FAILING_TOOL)?;
    let config = Config::default().with_tmp_dir(scratch.path()).with_tool(USEARCH_TAG, tool);

    let mut p = Pipeline::with_config(config);
    p.cluster_otus(Options::new())?;
    let result = p.collect(sequences(), Options::new().with("thread", true));
    assert!(matches!(result, Err(PipelineError::CommandFailed { .. })), "{:?}", result.map(|r| r.len()));
    assert_eq!(std::fs::read_dir(scratch.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_missing_tool_fails_at_build() {
    let config = Config::default().with_tool(FASTTREE_TAG, "/nonexistent/FastTree");
    let mut p = Pipeline::with_config(config);
    let err = p.tree(Options::new()).unwrap_err();
    assert!(err.to_string().contains("FastTree"));
}
