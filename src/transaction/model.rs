use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::blockchain::unix_now;
use crate::codec::{canonical_value_bytes, sha256_hex};
use crate::error::{LedgerError, Result};

/// A ledger entry. Besides the required fields a transaction may carry any
/// number of opaque fields; they are hashed and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub author: String,
    pub content: String,
    /// Unix time in fractional seconds.
    pub time: f64,
    /// Content hash, computed over every other field.
    #[serde(default)]
    pub hash: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of a client submission. Time and hash are optional: when the client
/// does not provide them the node stamps them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTransaction {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Transaction {
    /// Build and hash a transaction stamped with the current time.
    pub fn new(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_time(author, content, unix_now())
    }

    pub fn with_time(author: impl Into<String>, content: impl Into<String>, time: f64) -> Self {
        let mut tx = Self {
            author: author.into(),
            content: content.into(),
            time,
            hash: String::new(),
            extra: Map::new(),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// Turn a client submission into a sealed transaction.
    pub fn from_request(req: NewTransaction) -> Result<Self> {
        let author = required(req.author, "author")?;
        let content = required(req.content, "content")?;
        let tx = Self {
            author,
            content,
            time: req.time.unwrap_or_else(unix_now),
            hash: req.hash.unwrap_or_default(),
            extra: req.extra,
        };
        tx.seal()
    }

    /// Check required fields and fill in or verify the content hash.
    pub fn seal(mut self) -> Result<Self> {
        if self.author.trim().is_empty() {
            return Err(LedgerError::Structural("missing author".into()));
        }
        if self.content.trim().is_empty() {
            return Err(LedgerError::Structural("missing content".into()));
        }
        if !self.time.is_finite() {
            return Err(LedgerError::Structural("invalid time".into()));
        }
        let expected = self.compute_hash();
        if self.hash.is_empty() {
            self.hash = expected;
        } else if self.hash != expected {
            return Err(LedgerError::Structural(format!(
                "transaction hash mismatch (expected {expected})"
            )));
        }
        Ok(self)
    }

    /// JSON form with all fields, the one embedded in block hashes.
    pub fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("author".into(), Value::from(self.author.as_str()));
        map.insert("content".into(), Value::from(self.content.as_str()));
        map.insert("time".into(), Value::from(self.time));
        map.insert("hash".into(), Value::from(self.hash.as_str()));
        Value::Object(map)
    }

    /// SHA-256 over the canonical encoding of every field except `hash`.
    pub fn compute_hash(&self) -> String {
        let mut value = self.to_value();
        if let Value::Object(map) = &mut value {
            map.remove("hash");
        }
        sha256_hex(&canonical_value_bytes(&value))
    }
}

fn required(field: Option<String>, name: &str) -> Result<String> {
    match field {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(LedgerError::Structural(format!("missing {name}"))),
    }
}
