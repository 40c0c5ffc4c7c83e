use crate::StoreError;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A persisted record stored as JSON under its id in a per-kind table.
pub trait Entity: Serialize + DeserializeOwned {
    /// Name of the table holding every record of this kind.
    const TABLE: &'static str;

    fn id(&self) -> &str;
}

type RawTable = TableDefinition<'static, &'static str, &'static [u8]>;

fn table_def(name: &'static str) -> RawTable {
    TableDefinition::new(name)
}

fn read_one<T>(table: &T, id: &str) -> Result<Option<Vec<u8>>, StoreError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    Ok(table.get(id)?.map(|guard| guard.value().to_vec()))
}

fn read_all<T>(table: &T) -> Result<Vec<(String, Vec<u8>)>, StoreError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut out = Vec::new();
    for item in table.iter()? {
        let (key, value) = item?;
        out.push((key.value().to_owned(), value.value().to_vec()));
    }
    Ok(out)
}

fn check_registered(tables: &[&'static str], table: &str) -> Result<(), StoreError> {
    if tables.iter().any(|t| *t == table) {
        Ok(())
    } else {
        Err(StoreError::UnknownTable(table.to_owned()))
    }
}

/// Embedded single-writer, multi-reader entity database.
///
/// Every read happens inside [`view`](Self::view) and every write inside
/// [`update`](Self::update). A write transaction commits only when its
/// closure returns `Ok`; any error aborts it and discards all of its writes.
/// Write transactions are serialized; readers see the last committed state.
#[derive(Debug)]
pub struct Db {
    inner: Database,
    path: PathBuf,
    tables: Vec<&'static str>,
}

impl Db {
    /// Open (or create) the database at `path` with the given tables.
    ///
    /// All tables are created eagerly so read transactions never observe a
    /// missing table.
    pub fn open(path: impl AsRef<Path>, tables: &[&'static str]) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let inner = Database::create(&path)?;
        let db = Self {
            inner,
            path,
            tables: tables.to_vec(),
        };

        let txn = db.inner.begin_write()?;
        for name in &db.tables {
            txn.open_table(table_def(name))?;
        }
        txn.commit()?;
        debug!(
            "opened database {} with {} tables",
            db.path.display(),
            db.tables.len()
        );

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tables(&self) -> &[&'static str] {
        &self.tables
    }

    /// Run `f` inside a read-only transaction.
    pub fn view<T, E>(&self, f: impl FnOnce(&ReadTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let txn = self.inner.begin_read().map_err(StoreError::from)?;
        let tx = ReadTx {
            inner: txn,
            tables: &self.tables,
        };
        f(&tx)
    }

    /// Run `f` inside a read-write transaction, committing only on `Ok`.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut WriteTx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let txn = self.inner.begin_write().map_err(StoreError::from)?;
        let mut tx = WriteTx {
            inner: txn,
            tables: &self.tables,
        };
        match f(&mut tx) {
            Ok(value) => {
                tx.inner.commit().map_err(StoreError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = tx.inner.abort() {
                    warn!("transaction abort failed: {abort_err}");
                }
                debug!("write transaction aborted");
                Err(e)
            }
        }
    }
}

/// Read access shared by read-only and read-write transactions.
pub trait Tx {
    /// Raw bytes stored under `id`, if any.
    fn get_raw(&self, table: &'static str, id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Every `(id, bytes)` pair of a table, ordered by id.
    fn entries_raw(&self, table: &'static str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Load an entity; a missing id is [`StoreError::NotFound`].
    fn get<E: Entity>(&self, id: &str) -> Result<E, StoreError> {
        match self.get_raw(E::TABLE, id)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Err(StoreError::NotFound {
                table: E::TABLE,
                id: id.to_owned(),
            }),
        }
    }

    fn exists<E: Entity>(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.get_raw(E::TABLE, id)?.is_some())
    }

    fn list<E: Entity>(&self) -> Result<Vec<E>, StoreError> {
        self.entries_raw(E::TABLE)?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(StoreError::from))
            .collect()
    }

    fn ids<E: Entity>(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries_raw(E::TABLE)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }
}

/// A read-only transaction with a consistent snapshot of committed data.
pub struct ReadTx<'db> {
    inner: redb::ReadTransaction,
    tables: &'db [&'static str],
}

impl Tx for ReadTx<'_> {
    fn get_raw(&self, table: &'static str, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_registered(self.tables, table)?;
        let t = self.inner.open_table(table_def(table))?;
        read_one(&t, id)
    }

    fn entries_raw(&self, table: &'static str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        check_registered(self.tables, table)?;
        let t = self.inner.open_table(table_def(table))?;
        read_all(&t)
    }
}

/// A read-write transaction. Writes become visible only after commit.
pub struct WriteTx<'db> {
    inner: redb::WriteTransaction,
    tables: &'db [&'static str],
}

impl WriteTx<'_> {
    /// Insert or replace an entity under its id.
    pub fn put<E: Entity>(&mut self, entity: &E) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(entity)?;
        self.put_raw(E::TABLE, entity.id(), &bytes)
    }

    /// Remove an entity; removing a missing id is [`StoreError::NotFound`].
    pub fn delete<E: Entity>(&mut self, id: &str) -> Result<(), StoreError> {
        check_registered(self.tables, E::TABLE)?;
        let mut t = self.inner.open_table(table_def(E::TABLE))?;
        if t.remove(id)?.is_none() {
            return Err(StoreError::NotFound {
                table: E::TABLE,
                id: id.to_owned(),
            });
        }
        Ok(())
    }

    pub(crate) fn put_raw(
        &mut self,
        table: &'static str,
        id: &str,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        check_registered(self.tables, table)?;
        let mut t = self.inner.open_table(table_def(table))?;
        t.insert(id, bytes)?;
        Ok(())
    }
}

impl Tx for WriteTx<'_> {
    fn get_raw(&self, table: &'static str, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        check_registered(self.tables, table)?;
        let t = self.inner.open_table(table_def(table))?;
        read_one(&t, id)
    }

    fn entries_raw(&self, table: &'static str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        check_registered(self.tables, table)?;
        let t = self.inner.open_table(table_def(table))?;
        read_all(&t)
    }
}
