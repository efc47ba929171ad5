// src/utils/status.rs: per-command runtime counters

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::record::Value;

pub const STATUS: &str = "status";
pub const RECORDS_IN: &str = "records_in";
pub const RECORDS_OUT: &str = "records_out";
pub const SEQUENCES_IN: &str = "sequences_in";
pub const SEQUENCES_OUT: &str = "sequences_out";
pub const RESIDUES_IN: &str = "residues_in";
pub const RESIDUES_OUT: &str = "residues_out";
pub const HITS_OUT: &str = "hits_out";
pub const TIME_START: &str = "time_start";
pub const TIME_STOP: &str = "time_stop";
pub const TIME_ELAPSED: &str = "time_elapsed";

/// Ordered status mapping owned by exactly one command during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    fields: Vec<(String, Value)>,
}

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Counter value, zero when unset.
    pub fn count(&self, key: &str) -> i64 {
        self.get(key).and_then(|v| v.as_i64()).unwrap_or(0)
    }

    pub fn add(&mut self, key: &str, n: i64) {
        let current = self.count(key);
        self.set(key, current + n);
    }

    pub fn inc(&mut self, key: &str) {
        self.add(key, 1);
    }

    /// Zeroes the counters every command reports, keeping their order stable.
    pub fn init_counters(&mut self, keys: &[&str]) {
        for key in keys {
            if self.get(key).is_none() {
                self.set(*key, 0);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// One-line `key: value` summary used for progress logging.
    pub fn summary(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.fields {
            writeln!(f, "  {}: {}", k, v)?;
        }
        Ok(())
    }
}
