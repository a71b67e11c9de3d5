//! Flat key/value samples as acquired from a status or variables feed.
//!
//! Values stay textual until a caller asks for a typed view; the accessor
//! chosen (int, float, string) decides the interpretation, not the data.

use std::collections::HashMap;

/// Error type for typed access to a [`Sample`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The key is not present in the sample.
    NotFound(String),
    /// The key is present but the value does not parse as the requested type.
    Parse { key: String, value: String },
}

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueError::NotFound(key) => write!(f, "key '{}' not found", key),
            ValueError::Parse { key, value } => {
                write!(f, "value '{}' for key '{}' does not parse", value, key)
            }
        }
    }
}

impl std::error::Error for ValueError {}

/// A numeric value probed out of a sample, int first, then float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

/// One acquisition from either the status or the variables feed.
///
/// Keys are lower-cased at ingestion. A sample either carries data or
/// carries an error from the tick that produced it, never both: a failed
/// query yields an empty map with the error set, and the error travels
/// downstream inside the sample rather than through a side channel.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    kvs: HashMap<String, String>,
    err: Option<String>,
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sample that carries only an error, for ticks where the
    /// acquisition itself failed.
    pub fn from_error(err: impl Into<String>) -> Self {
        Self {
            kvs: HashMap::new(),
            err: Some(err.into()),
        }
    }

    /// Number of keys in the sample.
    pub fn len(&self) -> usize {
        self.kvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kvs.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.kvs.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.kvs.insert(key.into(), value.into());
    }

    pub fn has_error(&self) -> bool {
        self.err.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.err.as_deref()
    }

    /// Iterates over all key/value pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.kvs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the value for `key` as an `i64`.
    pub fn get_int(&self, key: &str) -> Result<i64, ValueError> {
        let val = self.raw(key)?;
        val.parse().map_err(|_| ValueError::Parse {
            key: key.to_string(),
            value: val.to_string(),
        })
    }

    /// Returns the value for `key` as an `f64`.
    pub fn get_float(&self, key: &str) -> Result<f64, ValueError> {
        let val = self.raw(key)?;
        val.parse().map_err(|_| ValueError::Parse {
            key: key.to_string(),
            value: val.to_string(),
        })
    }

    /// Returns the value for `key` as text.
    pub fn get_string(&self, key: &str) -> Result<&str, ValueError> {
        self.raw(key)
    }

    /// Returns the value for `key` as a number, probing int first and
    /// falling back to float. The probing order is part of the contract:
    /// `"42"` comes back as `Numeric::Int(42)`, never as a float.
    pub fn get_numeric(&self, key: &str) -> Result<Numeric, ValueError> {
        let val = self.raw(key)?;
        if let Ok(i) = val.parse::<i64>() {
            return Ok(Numeric::Int(i));
        }
        if let Ok(f) = val.parse::<f64>() {
            return Ok(Numeric::Float(f));
        }
        Err(ValueError::Parse {
            key: key.to_string(),
            value: val.to_string(),
        })
    }

    /// Like [`get_int`](Self::get_int) but swallows the error, returning 0.
    pub fn get_i(&self, key: &str) -> i64 {
        self.get_int(key).unwrap_or(0)
    }

    /// Like [`get_float`](Self::get_float) but swallows the error, returning 0.0.
    pub fn get_f(&self, key: &str) -> f64 {
        self.get_float(key).unwrap_or(0.0)
    }

    /// Like [`get_string`](Self::get_string) but swallows the error, returning "".
    pub fn get_str(&self, key: &str) -> &str {
        self.get_string(key).unwrap_or("")
    }

    fn raw(&self, key: &str) -> Result<&str, ValueError> {
        self.kvs
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ValueError::NotFound(key.to_string()))
    }
}
