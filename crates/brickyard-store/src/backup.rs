//! Whole-database export and restore.
//!
//! An export is a JSON [`Snapshot`] of every registered table taken from a
//! single read transaction, so it always reflects one committed state. The
//! snapshot carries a blake3 checksum over its table contents; restore
//! refuses snapshots whose checksum or format version does not match.

use crate::db::{Db, Tx};
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

type TableContents = BTreeMap<String, BTreeMap<String, String>>;

/// Serialized form of a database export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub exported_at: String,
    /// table name -> (entity id -> stored JSON record)
    pub tables: TableContents,
    pub checksum: String,
}

impl Snapshot {
    fn compute_checksum(tables: &TableContents) -> Result<String, StoreError> {
        let bytes = serde_json::to_vec(tables)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }

    /// Number of records across all tables.
    pub fn record_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn verify(&self) -> Result<(), StoreError> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: SNAPSHOT_FORMAT_VERSION,
                found: self.format_version,
            });
        }
        let actual = Self::compute_checksum(&self.tables)?;
        if actual != self.checksum {
            return Err(StoreError::IntegrityFailure {
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

fn utf8_record(table: &str, id: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
    String::from_utf8(bytes).map_err(|e| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{table}/{id} is not valid UTF-8: {e}"),
        ))
    })
}

impl Db {
    /// Capture every registered table in one read transaction.
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let tables = self.view(|tx| {
            let mut out = TableContents::new();
            for table in self.tables() {
                let mut records = BTreeMap::new();
                for (id, bytes) in tx.entries_raw(*table)? {
                    let record = utf8_record(table, &id, bytes)?;
                    records.insert(id, record);
                }
                out.insert((*table).to_owned(), records);
            }
            Ok::<_, StoreError>(out)
        })?;

        let checksum = Snapshot::compute_checksum(&tables)?;
        Ok(Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            tables,
            checksum,
        })
    }

    /// Write the current committed contents to `writer`. Returns the number
    /// of bytes written.
    pub fn export<W: Write>(&self, writer: &mut W) -> Result<u64, StoreError> {
        let snapshot = self.snapshot()?;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        debug!(
            "exported {} records ({} bytes)",
            snapshot.record_count(),
            bytes.len()
        );
        Ok(bytes.len() as u64)
    }

    /// Export to `dest` atomically: the file is either the previous export
    /// or the complete new one, never a partial write.
    pub fn export_to_file(&self, dest: &Path) -> Result<u64, StoreError> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        let written = self.export(&mut tmp)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;

        info!("database exported to {}", dest.display());
        Ok(written)
    }

    /// Create a new database at `path` holding the contents of an export.
    ///
    /// `path` must not exist yet. The snapshot is verified before anything is
    /// written, and all records are loaded in one write transaction.
    pub fn restore<R: Read>(
        path: impl AsRef<Path>,
        tables: &[&'static str],
        reader: R,
    ) -> Result<Db, StoreError> {
        let path = path.as_ref();
        if path.exists() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("restore target {} already exists", path.display()),
            )));
        }

        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        snapshot.verify()?;

        let mut resolved = Vec::with_capacity(snapshot.tables.len());
        for name in snapshot.tables.keys() {
            match tables.iter().find(|t| **t == name.as_str()) {
                Some(t) => resolved.push(*t),
                None => return Err(StoreError::UnknownTable(name.clone())),
            }
        }

        let db = Db::open(path, tables)?;
        db.update(|tx| {
            for (table, records) in resolved.iter().zip(snapshot.tables.values()) {
                for (id, record) in records {
                    tx.put_raw(*table, id, record.as_bytes())?;
                }
            }
            Ok::<_, StoreError>(())
        })?;

        info!(
            "restored {} records into {}",
            snapshot.record_count(),
            path.display()
        );
        Ok(db)
    }
}
