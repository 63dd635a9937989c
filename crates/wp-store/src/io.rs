// io.rs — Atomic JSON writes and tolerant, versioned reads.
//
// Writes go through a NamedTempFile created next to the target and are
// persisted with a rename, which is atomic on the same filesystem. Readers
// treat a missing file as "no prior state".

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::StoreError;

/// Documents that carry a top-level `version` field.
///
/// `SCHEMA_VERSION` is the newest version this build can read. Files without a
/// `version` field predate versioning and are read as version 1.
pub trait Versioned {
    const SCHEMA_VERSION: u32;
}

/// Atomically write `data` to `path` using a temp file in the same directory.
///
/// Parent directories are created as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|source| StoreError::IoError {
        path: dir.to_path_buf(),
        source,
    })?;

    let io_err = |source| StoreError::IoError {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(data).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

/// Read a JSON document. Returns `Ok(None)` if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let Some(raw) = read_raw(path)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Read a versioned JSON document, rejecting versions newer than `T` supports.
pub fn read_versioned<T>(path: &Path) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned + Versioned,
{
    let Some(raw) = read_raw(path)? else {
        return Ok(None);
    };
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))?;
    let found = match value.get("version") {
        None => 1,
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| corrupt(format!("invalid version field: {}", v)))?,
    };
    if found > T::SCHEMA_VERSION {
        return Err(StoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found,
            supported: T::SCHEMA_VERSION,
        });
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| corrupt(e.to_string()))
}

fn read_raw(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::IoError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        #[serde(default = "one")]
        version: u32,
        name: String,
    }

    fn one() -> u32 {
        1
    }

    impl Versioned for Doc {
        const SCHEMA_VERSION: u32 = 2;
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let found: Option<Doc> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(found.is_none());
        let found: Option<Doc> = read_versioned(&dir.path().join("absent.json")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/doc.json");
        let doc = Doc {
            version: 1,
            name: "a".into(),
        };
        write_json(&path, &doc).unwrap();
        assert_eq!(read_json::<Doc>(&path).unwrap(), Some(doc));
    }

    #[test]
    fn write_leaves_no_temp_files_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        for i in 0..3 {
            let doc = Doc {
                version: 1,
                name: format!("v{}", i),
            };
            write_json(&path, &doc).unwrap();
        }
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(read_json::<Doc>(&path).unwrap().unwrap().name, "v2");
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "{\"version\": 1, \"na").unwrap();
        let err = read_versioned::<Doc>(&path).unwrap_err();
        assert!(err.is_corrupt());
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn newer_schema_version_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, r#"{"version": 7, "name": "future"}"#).unwrap();
        match read_versioned::<Doc>(&path) {
            Err(StoreError::UnsupportedVersion {
                found, supported, ..
            }) => {
                assert_eq!(found, 7);
                assert_eq!(supported, 2);
            }
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn unversioned_document_reads_as_version_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, r#"{"name": "legacy"}"#).unwrap();
        let doc = read_versioned::<Doc>(&path).unwrap().unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.name, "legacy");
    }
}
