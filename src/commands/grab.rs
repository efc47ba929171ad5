// src/commands/grab.rs: select or reject records by pattern
//
// Exactly one of select, select_file, reject, reject_file or evaluate.
// Patterns match keys and values unless narrowed with keys, keys_only or
// values_only. A record is emitted when it matched and was selected, or did
// not match and was rejected.

use std::fs;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use fxhash::FxHashSet;
use ordered_float::OrderedFloat;
use regex::{Regex, RegexBuilder};

use crate::config::defs::OptionError;
use crate::pipeline::command::{Command, CommandFn};
use crate::utils::expr::Expr;
use crate::utils::options::{OptionValue, Options, Validator};
use crate::utils::record::{Record, Value};
use crate::utils::status::{Status, HITS_OUT};
use crate::utils::streams::{RecordReader, RecordWriter};

const NAME: &str = "grab";

const ALLOWED: &[&str] = &[
    "select",
    "select_file",
    "reject",
    "reject_file",
    "evaluate",
    "exact",
    "keys",
    "keys_only",
    "values_only",
    "ignore_case",
];

/// Set member for exact matching. Integral floats fold into integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ExactKey {
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
}

impl ExactKey {
    fn number(x: f64) -> ExactKey {
        if x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
            ExactKey::Int(x as i64)
        } else {
            ExactKey::Float(OrderedFloat(x))
        }
    }

    fn text(s: &str, ignore_case: bool) -> ExactKey {
        if ignore_case {
            ExactKey::Str(s.to_lowercase())
        } else {
            ExactKey::Str(s.to_string())
        }
    }

    fn from_value(value: &Value, ignore_case: bool) -> ExactKey {
        match value {
            Value::Int(i) => ExactKey::Int(*i),
            Value::Float(f) => ExactKey::number(*f),
            Value::Str(s) => ExactKey::text(s, ignore_case),
            Value::Nil => ExactKey::Str(String::new()),
        }
    }
}

enum Matcher {
    Exact(FxHashSet<ExactKey>),
    Regex(Vec<Regex>),
    Evaluate(Expr),
}

struct Grab {
    matcher: Matcher,
    invert: bool,
    keys: Option<Vec<String>>,
    keys_only: bool,
    values_only: bool,
    ignore_case: bool,
}

/// One pattern per line, blank lines skipped.
fn load_patterns(path: &Path) -> Result<Vec<OptionValue>, OptionError> {
    let text = fs::read_to_string(path)
        .map_err(|e| OptionError(format!("{}: failed to read {}: {}", NAME, path.display(), e)))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(OptionValue::from)
        .collect())
}

pub fn build(options: Options) -> Result<Command, OptionError> {
    let grab = logic(&options)?;
    Ok(Command::new(NAME, options.clone(), options, grab))
}

fn logic(options: &Options) -> Result<Grab, OptionError> {
    let v = Validator::new(NAME, options);
    v.allowed(ALLOWED)?
        .required_unique(&["select", "select_file", "reject", "reject_file", "evaluate"])?
        .conflict("evaluate", &["exact", "keys", "keys_only", "values_only", "ignore_case"])?
        .unique(&["keys_only", "values_only"])?
        .boolean(&["exact", "keys_only", "values_only", "ignore_case"])?
        .files_exist(&["select_file", "reject_file"])?;

    let invert = options.contains("reject") || options.contains("reject_file");
    let ignore_case = options.flag("ignore_case");

    let matcher = if let Some(text) = options.get("evaluate") {
        Matcher::Evaluate(Expr::parse(&text.to_plain_string())?)
    } else {
        let patterns: Vec<OptionValue> = if let Some(value) = options.get("select").or_else(|| options.get("reject")) {
            value.as_list().into_iter().cloned().collect()
        } else {
            let file = options
                .get_str("select_file")
                .or_else(|| options.get_str("reject_file"))
                .ok_or_else(|| OptionError(format!("{}: pattern file must be a path", NAME)))?;
            load_patterns(Path::new(file))?
        };

        if options.flag("exact") {
            Matcher::Exact(
                patterns
                    .iter()
                    .map(|p| ExactKey::from_value(&p.to_value(), ignore_case))
                    .collect(),
            )
        } else {
            let regexes = patterns
                .iter()
                .map(|p| {
                    let pattern = p.to_plain_string();
                    RegexBuilder::new(&pattern)
                        .case_insensitive(ignore_case)
                        .build()
                        .map_err(|e| OptionError(format!("{}: invalid pattern {:?}: {}", NAME, pattern, e)))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Matcher::Regex(regexes)
        }
    };

    let keys = options.get("keys").map(|k| {
        k.as_list()
            .into_iter()
            .map(|key| key.to_plain_string())
            .collect::<Vec<_>>()
    });

    Ok(Grab {
        matcher,
        invert,
        keys,
        keys_only: options.flag("keys_only"),
        values_only: options.flag("values_only"),
        ignore_case,
    })
}

impl Grab {
    fn hit_key(&self, key: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(set) => set.contains(&ExactKey::text(key, self.ignore_case)),
            Matcher::Regex(regexes) => regexes.iter().any(|re| re.is_match(key)),
            Matcher::Evaluate(_) => false,
        }
    }

    fn hit_value(&self, value: &Value) -> bool {
        match &self.matcher {
            Matcher::Exact(set) => set.contains(&ExactKey::from_value(value, self.ignore_case)),
            Matcher::Regex(regexes) => {
                let text = value.to_string();
                regexes.iter().any(|re| re.is_match(&text))
            }
            Matcher::Evaluate(_) => false,
        }
    }

    fn matches(&self, record: &Record) -> Result<bool> {
        if let Matcher::Evaluate(expr) = &self.matcher {
            return expr.matches(record);
        }
        if let Some(keys) = &self.keys {
            return Ok(keys
                .iter()
                .filter_map(|key| record.get(key))
                .any(|value| self.hit_value(value)));
        }
        Ok(record.iter().any(|(key, value)| {
            (!self.values_only && self.hit_key(key)) || (!self.keys_only && self.hit_value(value))
        }))
    }
}

#[async_trait]
impl CommandFn for Grab {
    async fn execute(
        &self,
        input: &mut RecordReader,
        output: &mut RecordWriter,
        status: &mut Status,
    ) -> Result<()> {
        status.init_counters(&[HITS_OUT]);
        while let Some(record) = input.recv().await {
            let matched = self.matches(&record)?;
            if matched {
                status.inc(HITS_OUT);
            }
            if matched != self.invert {
                output.write(record).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    fn grab(options: Options) -> Grab {
        logic(&options).unwrap()
    }

    #[test]
    fn test_exact_numbers_and_strings() {
        let g = grab(Options::new().with("select", OptionValue::List(vec![4.into(), "atcg".into()])).with("exact", true));
        assert!(g.matches(&record! { "COUNT" => 4 }).unwrap());
        assert!(g.matches(&record! { "COUNT" => 4.0 }).unwrap());
        assert!(g.matches(&record! { "SEQ" => "atcg" }).unwrap());
        assert!(!g.matches(&record! { "SEQ" => "ATCGX" }).unwrap());
        assert!(!g.matches(&record! { "COUNT" => 44 }).unwrap());
    }

    #[test]
    fn test_keys_only_and_values_only() {
        let keys_only = grab(Options::new().with("select", "SEQ").with("keys_only", true));
        assert!(keys_only.matches(&record! { "SEQ" => "x" }).unwrap());
        assert!(!keys_only.matches(&record! { "FOO" => "SEQ" }).unwrap());

        let values_only = grab(Options::new().with("select", "SEQ").with("values_only", true));
        assert!(!values_only.matches(&record! { "SEQ" => "x" }).unwrap());
        assert!(values_only.matches(&record! { "FOO" => "SEQ" }).unwrap());
    }

    #[test]
    fn test_keys_restrict_values() {
        let g = grab(Options::new().with("select", "test").with("keys", ["SEQ_NAME"]));
        assert!(g.matches(&record! { "SEQ_NAME" => "test1" }).unwrap());
        assert!(!g.matches(&record! { "OTHER" => "test1" }).unwrap());
    }

    #[test]
    fn test_validation() {
        assert!(logic(&Options::new()).is_err());
        assert!(logic(&Options::new().with("select", "a").with("reject", "b")).is_err());
        assert!(logic(&Options::new().with("evaluate", ":A > 1").with("exact", true)).is_err());
        assert!(logic(&Options::new().with("select", "a").with("keys_only", true).with("values_only", true)).is_err());
        assert!(logic(&Options::new().with("select_file", "/nonexistent/patterns.txt")).is_err());
        assert!(logic(&Options::new().with("select", "(")).is_err());
        assert!(logic(&Options::new().with("evaluate", ":A >")).is_err());
        assert!(logic(&Options::new().with("select", "a").with("color", "red")).is_err());
        assert!(build(Options::new().with("evaluate", ":A > 1")).is_ok());
    }

    #[test]
    fn test_pattern_file_coerces_numbers_for_exact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("patterns.txt");
        fs::write(&path, "4\ntest1\n\n2.50\n")?;
        let patterns = load_patterns(&path)?;
        assert_eq!(
            patterns.iter().map(OptionValue::to_value).collect::<Vec<_>>(),
            vec![Value::Int(4), Value::Str("test1".into()), Value::Float(2.5)]
        );

        let exact = grab(Options::new().with("select_file", path.as_path()).with("exact", true));
        assert!(exact.matches(&record! { "SCORE" => 2.5 }).unwrap());
        assert!(exact.matches(&record! { "COUNT" => 4.0 }).unwrap());

        // Regex patterns keep their text as written.
        let regex = grab(Options::new().with("select_file", path.as_path()).with("values_only", true));
        assert!(regex.matches(&record! { "NOTE" => "2.50x" }).unwrap());
        assert!(!regex.matches(&record! { "NOTE" => "2.5" }).unwrap());
        Ok(())
    }
}
