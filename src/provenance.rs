//! Source provenance for import runs
//!
//! Every file the import pipeline reads is hashed with SHA-256 and logged to
//! `import_sources` under one run id, so a database can be traced back to
//! the exact scraped JSON it was built from.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Hash content with SHA-256, hex encoded
pub fn hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// One recorded source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub run_id: String,
    pub path: String,
    pub sha256: String,
    pub byte_len: usize,
    pub imported_at: DateTime<Utc>,
}

/// Reads source files and records them for one import run
pub struct ImportRun {
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

impl Default for ImportRun {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportRun {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    pub fn run_id(&self) -> String {
        self.run_id.to_string()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Read a UTF-8 file and record its hash
    pub fn read_source(&self, conn: &Connection, path: &Path) -> Result<String> {
        let bytes = fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        self.record(conn, path, &bytes)?;
        String::from_utf8(bytes).with_context(|| format!("{:?} is not valid UTF-8", path))
    }

    pub fn record(&self, conn: &Connection, path: &Path, bytes: &[u8]) -> Result<SourceRecord> {
        let record = SourceRecord {
            run_id: self.run_id(),
            path: path.display().to_string(),
            sha256: hash(bytes),
            byte_len: bytes.len(),
            imported_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO import_sources (run_id, path, sha256, byte_len, imported_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.run_id,
                record.path,
                record.sha256,
                record.byte_len as i64,
                record.imported_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!("Recorded source {} ({})", record.path, &record.sha256[..12]);
        Ok(record)
    }
}

/// Sources of the most recent import run
pub fn latest_sources(conn: &Connection) -> Result<Vec<SourceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, path, sha256, byte_len, imported_at FROM import_sources
         WHERE run_id = (SELECT run_id FROM import_sources ORDER BY id DESC LIMIT 1)
         ORDER BY id",
    )?;

    let rows = stmt.query_map([], |row| {
        let imported_at: String = row.get(4)?;
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            imported_at,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (run_id, path, sha256, byte_len, imported_at) = row?;
        let imported_at = DateTime::parse_from_rfc3339(&imported_at)
            .with_context(|| format!("Bad timestamp {:?}", imported_at))?
            .with_timezone(&Utc);
        out.push(SourceRecord {
            run_id,
            path,
            sha256,
            byte_len: byte_len as usize,
            imported_at,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use crate::db;

    #[test]
    fn test_hash_is_sha256() {
        assert_eq!(
            hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_read_source_records_hash() {
        let conn = db::open_in_memory().unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("wing.json");
        fs::write(&path, "{\"content\": \"乾\"}").unwrap();

        let run = ImportRun::new();
        let content = run.read_source(&conn, &path).unwrap();
        assert!(content.contains('乾'));

        let sources = latest_sources(&conn).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].run_id, run.run_id());
        assert_eq!(sources[0].sha256, hash(content.as_bytes()));
        assert_eq!(sources[0].byte_len, content.len());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let conn = db::open_in_memory().unwrap();
        let run = ImportRun::new();
        assert!(run
            .read_source(&conn, Path::new("/nonexistent/iching.json"))
            .is_err());
    }
}
