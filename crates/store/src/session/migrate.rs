//! Loading session snapshot files and moving them into SQLite.

use crate::db::Database;
use crate::model::Session;
use crate::snapshot;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// A session decoded from a snapshot file, with the file it came from.
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub session: Session,
    pub path: PathBuf,
}

/// Outcome of [`migrate_to_database`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Sessions written to the database.
    pub migrated: usize,
    /// Sessions skipped because the database already had them.
    pub already_present: usize,
    /// Source files renamed to `.bak`.
    pub archived: usize,
    /// Sessions or files that could not be written or archived.
    pub failed: usize,
    /// Keys whose write failed. The database holds none of their history.
    pub unwritten: Vec<String>,
}

/// Decode every `*.json` file directly under `dir`.
///
/// Unreadable or undecodable files are skipped with a warning. A missing
/// directory yields nothing.
pub fn load_snapshot_dir(dir: &Path) -> Vec<LoadedSnapshot> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("session: no snapshot directory at {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut loaded = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file || path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        match snapshot::read_snapshot::<Session>(&path) {
            Ok(Some(session)) => loaded.push(LoadedSnapshot { session, path }),
            Ok(None) => {}
            Err(e) => log::warn!("session: skipping unreadable snapshot {}: {}", path.display(), e),
        }
    }
    loaded.sort_by(|a, b| a.path.cmp(&b.path));
    loaded
}

/// Copy file-backed sessions into `db` and archive their source files.
///
/// Keys in `existing` are already authoritative in the database and are not
/// rewritten; their files are still archived. A session whose write fails keeps
/// its source file so the next start retries it. A failed archive is logged
/// only: the data is already in the database.
pub fn migrate_to_database(
    db: &Database,
    snapshots: &[LoadedSnapshot],
    existing: &HashSet<String>,
) -> MigrationReport {
    let mut report = MigrationReport::default();

    for snap in snapshots {
        if existing.contains(&snap.session.key) {
            report.already_present += 1;
        } else if let Err(e) = db.write_session(&snap.session) {
            log::warn!(
                "session: failed to migrate {} from {}: {}",
                snap.session.key,
                snap.path.display(),
                e
            );
            report.failed += 1;
            report.unwritten.push(snap.session.key.clone());
            continue;
        } else {
            report.migrated += 1;
        }

        match snapshot::archive(&snap.path) {
            Ok(_) => report.archived += 1,
            Err(e) => {
                log::warn!("session: failed to archive {}: {}", snap.path.display(), e);
                report.failed += 1;
            }
        }
    }

    report
}
