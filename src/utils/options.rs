// src/utils/options.rs: command option values and their declarative validation

use std::fmt;
use std::path::Path;

use crate::config::defs::OptionError;
use crate::utils::record::Value;

/// One option value as accepted from callers and the pipeline description language.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Sym(String),
    List(Vec<OptionValue>),
}

impl OptionValue {
    pub fn sym<S: Into<String>>(name: S) -> Self {
        OptionValue::Sym(name.into())
    }

    /// Text of a string or symbol.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) | OptionValue::Sym(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            OptionValue::Nil => Some(false),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OptionValue::Int(i) => Some(*i),
            OptionValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            OptionValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptionValue::Int(i) => Some(*i as f64),
            OptionValue::Float(f) => Some(*f),
            OptionValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Scalars become one-element lists.
    pub fn as_list(&self) -> Vec<&OptionValue> {
        match self {
            OptionValue::List(items) => items.iter().collect(),
            OptionValue::Nil => Vec::new(),
            other => vec![other],
        }
    }

    /// Text form without quoting, as used for patterns and field names.
    pub fn to_plain_string(&self) -> String {
        match self {
            OptionValue::Nil => String::new(),
            OptionValue::Bool(b) => b.to_string(),
            OptionValue::Int(i) => i.to_string(),
            OptionValue::Float(f) => format!("{:?}", f),
            OptionValue::Str(s) | OptionValue::Sym(s) => s.clone(),
            OptionValue::List(items) => items
                .iter()
                .map(|i| i.to_plain_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Coerces into a record value: numbers stay numbers, numeric-looking text becomes a number.
    pub fn to_value(&self) -> Value {
        match self {
            OptionValue::Nil => Value::Nil,
            OptionValue::Int(i) => Value::Int(*i),
            OptionValue::Float(f) => Value::Float(*f),
            other => Value::parse(&other.to_plain_string()),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Nil => f.write_str("nil"),
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Float(x) => write!(f, "{:?}", x),
            OptionValue::Str(s) => write!(f, "{:?}", s),
            OptionValue::Sym(s) => write!(f, ":{}", s),
            OptionValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Str(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::Str(s)
    }
}

impl From<&Path> for OptionValue {
    fn from(p: &Path) -> Self {
        OptionValue::Str(p.to_string_lossy().into_owned())
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        OptionValue::Int(i)
    }
}

impl From<i32> for OptionValue {
    fn from(i: i32) -> Self {
        OptionValue::Int(i as i64)
    }
}

impl From<usize> for OptionValue {
    fn from(i: usize) -> Self {
        OptionValue::Int(i as i64)
    }
}

impl From<f64> for OptionValue {
    fn from(x: f64) -> Self {
        OptionValue::Float(x)
    }
}

impl<T: Into<OptionValue>> From<Vec<T>> for OptionValue {
    fn from(items: Vec<T>) -> Self {
        OptionValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<OptionValue>, const N: usize> From<[T; N]> for OptionValue {
    fn from(items: [T; N]) -> Self {
        OptionValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Ordered flat key → value option mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    entries: Vec<(String, OptionValue)>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Options::insert`].
    pub fn with<K: Into<String>, V: Into<OptionValue>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert<K: Into<String>, V: Into<OptionValue>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Inserts only when the key is absent.
    pub fn default_to<K: Into<String>, V: Into<OptionValue>>(&mut self, key: K, value: V) {
        let key = key.into();
        if !self.contains(&key) {
            self.entries.push((key, value.into()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Present and not nil.
    pub fn contains(&self, key: &str) -> bool {
        matches!(self.get(key), Some(v) if *v != OptionValue::Nil)
    }

    /// Present and truthy. Booleans must be `true`; any other non-nil value counts.
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(OptionValue::Bool(b)) => *b,
            Some(OptionValue::Nil) | None => false,
            Some(_) => true,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Display for Options {
    /// `key: value, key: value`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<OptionValue>> FromIterator<(K, V)> for Options {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut options = Options::new();
        for (k, v) in iter {
            options.insert(k, v);
        }
        options
    }
}

/// Declarative checks over one command's options. Every check returns `&Self`
/// so they chain with `?`.
pub struct Validator<'a> {
    command: &'a str,
    options: &'a Options,
}

impl<'a> Validator<'a> {
    pub fn new(command: &'a str, options: &'a Options) -> Self {
        Self { command, options }
    }

    fn fail<T>(&self, message: String) -> Result<T, OptionError> {
        Err(OptionError(format!("{}: {}", self.command, message)))
    }

    pub fn allowed(&self, keys: &[&str]) -> Result<&Self, OptionError> {
        for key in self.options.keys() {
            if !keys.contains(&key) {
                return self.fail(format!(
                    "Disallowed option: {}. Allowed options: {}",
                    key,
                    keys.join(", ")
                ));
            }
        }
        Ok(self)
    }

    pub fn required(&self, keys: &[&str]) -> Result<&Self, OptionError> {
        for key in keys {
            if !self.options.contains(key) {
                return self.fail(format!("Required option missing: {}", key));
            }
        }
        Ok(self)
    }

    /// Exactly one of `keys`.
    pub fn required_unique(&self, keys: &[&str]) -> Result<&Self, OptionError> {
        match keys.iter().filter(|k| self.options.contains(k)).count() {
            1 => Ok(self),
            0 => self.fail(format!("Required exactly one option from: {}", keys.join(", "))),
            _ => self.fail(format!("Multiple required unique options used: {}", keys.join(", "))),
        }
    }

    /// At most one of `keys`.
    pub fn unique(&self, keys: &[&str]) -> Result<&Self, OptionError> {
        let used: Vec<&&str> = keys.iter().filter(|k| self.options.flag(k)).collect();
        if used.len() > 1 {
            return self.fail(format!(
                "Multiple mutually exclusive options used: {}",
                used.iter().map(|k| **k).collect::<Vec<_>>().join(", ")
            ));
        }
        Ok(self)
    }

    /// `key` may not be combined with any of `others`.
    pub fn conflict(&self, key: &str, others: &[&str]) -> Result<&Self, OptionError> {
        if self.options.contains(key) {
            for other in others {
                if self.options.contains(other) {
                    return self.fail(format!("Conflicting options: {}, {}", key, other));
                }
            }
        }
        Ok(self)
    }

    /// `key` needs `dependency` to be given as well.
    pub fn requires(&self, key: &str, dependency: &str) -> Result<&Self, OptionError> {
        if self.options.contains(key) && !self.options.contains(dependency) {
            return self.fail(format!("Option {} requires option {}", key, dependency));
        }
        Ok(self)
    }

    pub fn allowed_values(&self, key: &str, values: &[&str]) -> Result<&Self, OptionError> {
        if let Some(value) = self.options.get(key) {
            let text = value.to_plain_string();
            if !values.contains(&text.as_str()) {
                return self.fail(format!(
                    "Invalid value for option {}: {}. Allowed values: {}",
                    key,
                    value,
                    values.join(", ")
                ));
            }
        }
        Ok(self)
    }

    pub fn boolean(&self, keys: &[&str]) -> Result<&Self, OptionError> {
        for key in keys {
            if let Some(value) = self.options.get(key) {
                if value.as_bool().is_none() {
                    return self.fail(format!("Option {} must be true or false, got {}", key, value));
                }
            }
        }
        Ok(self)
    }

    pub fn assert_positive(&self, key: &str) -> Result<&Self, OptionError> {
        if let Some(value) = self.options.get(key) {
            match value.as_i64() {
                Some(n) if n > 0 => {}
                _ => return self.fail(format!("Option {} must be a positive integer, got {}", key, value)),
            }
        }
        Ok(self)
    }

    pub fn assert_non_negative(&self, key: &str) -> Result<&Self, OptionError> {
        if let Some(value) = self.options.get(key) {
            match value.as_i64() {
                Some(n) if n >= 0 => {}
                _ => return self.fail(format!("Option {} must be a non-negative integer, got {}", key, value)),
            }
        }
        Ok(self)
    }

    pub fn assert_range(&self, key: &str, min: f64, max: f64) -> Result<&Self, OptionError> {
        if let Some(value) = self.options.get(key) {
            match value.as_f64() {
                Some(x) if x >= min && x <= max => {}
                _ => {
                    return self.fail(format!(
                        "Option {} must be a number between {} and {}, got {}",
                        key, min, max, value
                    ))
                }
            }
        }
        Ok(self)
    }

    pub fn files_exist(&self, keys: &[&str]) -> Result<&Self, OptionError> {
        for key in keys {
            if let Some(value) = self.options.get(key) {
                for file in value.as_list() {
                    let path = file.to_plain_string();
                    if !Path::new(&path).is_file() {
                        return self.fail(format!("No such file: {}", path));
                    }
                }
            }
        }
        Ok(self)
    }

    /// An output file that already exists is only accepted together with `force`.
    pub fn files_exist_no_force(&self, key: &str) -> Result<&Self, OptionError> {
        if let Some(path) = self.options.get_str(key) {
            if Path::new(path).exists() && !self.options.flag("force") {
                return self.fail(format!("File exists: {} - use 'force: true' to overwrite", path));
            }
        }
        Ok(self)
    }
}
