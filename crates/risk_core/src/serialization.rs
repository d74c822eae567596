//! Canonical JSON and content hashing for persisted artifacts
//!
//! Object keys are sorted recursively and output carries no whitespace, so the
//! same value always produces the same bytes and the same BLAKE3 digest.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::errors::{Result, RiskError};

/// Serialize a value to canonical JSON (sorted keys, no whitespace)
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let json_value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&canonicalize_value(&json_value))?)
}

/// Sort all object keys recursively
pub fn canonicalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<_, _> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize_value(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_value).collect()),
        other => other.clone(),
    }
}

/// BLAKE3 digest of a byte string, hex encoded
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// BLAKE3 digest of the canonical JSON form of `value`
pub fn hash_canonical_hex<T: Serialize>(value: &T) -> Result<String> {
    Ok(digest_hex(to_canonical_json(value)?.as_bytes()))
}

/// Write `contents` next to `path` and rename it into place
///
/// Readers either see the previous file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| RiskError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        zeta: Vec<f64>,
        alpha: Inner,
    }

    #[derive(Serialize)]
    struct Inner {
        y: u8,
        b: &'static str,
    }

    fn sample() -> Sample {
        Sample {
            zeta: vec![0.1, 2.5],
            alpha: Inner { y: 1, b: "x" },
        }
    }

    #[test]
    fn keys_are_sorted_recursively() {
        let json = to_canonical_json(&sample()).unwrap();
        assert_eq!(json, r#"{"alpha":{"b":"x","y":1},"zeta":[0.1,2.5]}"#);
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let a = hash_canonical_hex(&sample()).unwrap();
        assert_eq!(a, hash_canonical_hex(&sample()).unwrap());
        assert_eq!(a.len(), 64);

        let mut other = sample();
        other.zeta[0] = 0.2;
        assert_ne!(a, hash_canonical_hex(&other).unwrap());
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("artifact.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
