use anyhow::Result;

use biopieces::config::defs::Config;
use biopieces::record;
use biopieces::utils::options::Options;
use biopieces::utils::record::Record;
use biopieces::Pipeline;

fn counts() -> Vec<Record> {
    vec![
        record! { "NAME" => "test2", "COUNT" => 4 },
        record! { "NAME" => "test1", "COUNT" => 21 },
        record! { "NAME" => "test2", "COUNT" => 2 },
        record! { "NAME" => "test3", "COUNT" => 9 },
    ]
}

fn sorted(records: Vec<Record>, options: Options, tmp: &std::path::Path) -> Result<Vec<Record>> {
    let mut p = Pipeline::with_config(Config::default().with_tmp_dir(tmp));
    p.sort(options)?;
    Ok(p.collect(records, Options::new())?)
}

fn column(records: &[Record], key: &str) -> Vec<i64> {
    records.iter().filter_map(|r| r.get(key).and_then(|v| v.as_i64())).collect()
}

#[test]
fn test_sort_by_count() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = sorted(counts(), Options::new().with("key", "COUNT"), dir.path())?;
    assert_eq!(column(&out, "COUNT"), vec![2, 4, 9, 21]);

    let out = sorted(counts(), Options::new().with("key", "COUNT").with("reverse", true), dir.path())?;
    assert_eq!(column(&out, "COUNT"), vec![21, 9, 4, 2]);
    Ok(())
}

#[test]
fn test_multi_block_matches_single_block() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // Distinct keys in a scrambled order.
    let input: Vec<Record> = (0..300i64)
        .map(|i| (i * 7919) % 300)
        .map(|n| record! { "ID" => format!("r{}", n), "N" => n, "W" => (n as f64) / 8.0 })
        .collect();

    for key in ["N", "W", "ID"] {
        for reverse in [false, true] {
            let single = sorted(
                input.clone(),
                Options::new().with("key", key).with("reverse", reverse),
                dir.path(),
            )?;
            let multi = sorted(
                input.clone(),
                Options::new().with("key", key).with("reverse", reverse).with("block_size", 64),
                dir.path(),
            )?;
            assert_eq!(single.len(), input.len());
            assert_eq!(single, multi, "key {} reverse {}", key, reverse);
        }
    }

    let out = sorted(input, Options::new().with("key", "N").with("block_size", 64), dir.path())?;
    assert_eq!(column(&out, "N"), (0..300).collect::<Vec<_>>());
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn test_sort_under_thread() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut p = Pipeline::with_config(Config::default().with_tmp_dir(dir.path()));
    p.sort(Options::new().with("key", "COUNT").with("block_size", 30))?
        .grab(Options::new().with("evaluate", ":COUNT > 3"))?;
    let out = p.collect(counts(), Options::new().with("thread", true))?;
    assert_eq!(column(&out, "COUNT"), vec![4, 9, 21]);
    assert!(p.status()[0].count("spill_files") > 1);
    Ok(())
}

#[test]
fn test_mixed_key_types_sort_totally() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // Integer keys interleaved with strings that look numeric.
    let input: Vec<Record> = (0..100i64)
        .flat_map(|i| {
            [
                record! { "K" => (i * 37) % 100 },
                record! { "K" => format!("{}", 100 + (i * 53) % 100) },
            ]
        })
        .collect();

    let single = sorted(input.clone(), Options::new().with("key", "K").with("block_size", 1_000_000), dir.path())?;
    let multi = sorted(input, Options::new().with("key", "K").with("block_size", 40), dir.path())?;
    assert_eq!(single, multi);

    let ints: Vec<i64> = single[..100].iter().filter_map(|r| r.get("K").and_then(|v| v.as_i64())).collect();
    assert_eq!(ints, (0..100).collect::<Vec<_>>());
    assert!(single[..100].iter().all(|r| r.get("K").is_some_and(|v| v.is_numeric())));
    let strings: Vec<String> = single[100..].iter().map(|r| r.get("K").map(|v| v.to_string()).unwrap_or_default()).collect();
    let expected: Vec<String> = (100..200).map(|n| n.to_string()).collect();
    assert_eq!(strings, expected);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}
