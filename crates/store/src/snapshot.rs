//! Atomic JSON snapshot files.
//!
//! A snapshot is replaced by writing a uniquely named temp file in the same
//! directory, syncing it, and renaming it over the destination. The rename is
//! the only operation that touches the final path, so a reader sees either the
//! previous snapshot or the new one, never a partial write.

use crate::error::StoreResult;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix appended to source files once their data lives elsewhere.
pub const ARCHIVE_SUFFIX: &str = ".bak";

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let data = serde_json::to_vec_pretty(value)?;

    // Dropping the handle on any early return removes the temp file.
    let mut tmp = tempfile::Builder::new()
        .prefix(".snapshot-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(&data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Read and decode a snapshot. A missing file is `Ok(None)`.
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Path a file is moved to when archived.
pub fn archive_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(ARCHIVE_SUFFIX);
    PathBuf::from(name)
}

/// Rename `path` to `<path>.bak`, returning the archive location.
pub fn archive(path: &Path) -> StoreResult<PathBuf> {
    let target = archive_path(path);
    fs::rename(path, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    fn leftover_temp_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
            .collect()
    }

    #[test]
    fn write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("record.json");
        let record = Record {
            name: "a".into(),
            count: 3,
        };

        write_atomic(&path, &record).unwrap();
        let loaded: Record = read_snapshot(&path).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(leftover_temp_files(path.parent().unwrap()).is_empty());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Record> = read_snapshot(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"{\"name\": ").unwrap();
        assert!(read_snapshot::<Record>(&path).is_err());
    }

    #[test]
    fn failed_replace_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("record.json");
        let original = Record {
            name: "original".into(),
            count: 1,
        };
        write_atomic(&path, &original).unwrap();

        // A map with non-string keys cannot be encoded as JSON, so the write
        // fails before the rename.
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "x");
        assert!(write_atomic(&path, &bad).is_err());

        let loaded: Record = read_snapshot(&path).unwrap().unwrap();
        assert_eq!(loaded, original);
        assert!(leftover_temp_files(dir.path()).is_empty());
    }

    #[test]
    fn archive_appends_suffix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, b"{}").unwrap();

        let archived = archive(&path).unwrap();
        assert_eq!(archived, dir.path().join("s.json.bak"));
        assert!(!path.exists());
        assert!(archived.exists());
    }
}
