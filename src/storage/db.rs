use redb::{
    Database as RedbDatabase, ReadTransaction, ReadableTable, Table, WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    #[error("Database error: {0}")]
    Redb(Box<redb::Error>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No order left after {0} in this scope")]
    OrderExhausted(u32),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("Storage error: {0}")]
    Storage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<redb::CommitError> for DatabaseError {
    fn from(e: redb::CommitError) -> Self {
        DatabaseError::Commit(Box::new(e))
    }
}

impl From<redb::DatabaseError> for DatabaseError {
    fn from(e: redb::DatabaseError) -> Self {
        DatabaseError::RedbDatabase(Box::new(e))
    }
}

impl From<redb::Error> for DatabaseError {
    fn from(e: redb::Error) -> Self {
        DatabaseError::Redb(Box::new(e))
    }
}

impl From<redb::StorageError> for DatabaseError {
    fn from(e: redb::StorageError) -> Self {
        DatabaseError::Storage(Box::new(e))
    }
}

impl From<redb::TableError> for DatabaseError {
    fn from(e: redb::TableError) -> Self {
        DatabaseError::Table(Box::new(e))
    }
}

impl From<redb::TransactionError> for DatabaseError {
    fn from(e: redb::TransactionError) -> Self {
        DatabaseError::Transaction(Box::new(e))
    }
}

pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("course-manager.redb");
        let db = Arc::new(RedbDatabase::create(db_path)?);

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SEQUENCES)?;
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USERNAMES)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(SUBJECTS)?;
            let _ = write_txn.open_table(SUBJECT_SLUGS)?;
            let _ = write_txn.open_table(COURSES)?;
            let _ = write_txn.open_table(COURSE_SLUGS)?;
            let _ = write_txn.open_table(MODULES)?;
            let _ = write_txn.open_table(COURSE_MODULES)?;
            let _ = write_txn.open_table(CONTENTS)?;
            let _ = write_txn.open_table(MODULE_CONTENTS)?;
            let _ = write_txn.open_table(TEXTS)?;
            let _ = write_txn.open_table(FILES)?;
            let _ = write_txn.open_table(IMAGES)?;
            let _ = write_txn.open_table(VIDEOS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }
}

// ============================================================================
// Row helpers shared by the entity modules
// ============================================================================

/// Issue the next id of a named sequence. Ids start at 1.
pub(crate) fn next_id(txn: &WriteTransaction, sequence: &str) -> Result<u64, DatabaseError> {
    let mut table = txn.open_table(SEQUENCES)?;
    let next = table.get(sequence)?.map(|v| v.value()).unwrap_or(0) + 1;
    table.insert(sequence, next)?;
    Ok(next)
}

pub(crate) fn load<T, R>(table: &R, id: u64) -> Result<Option<T>, DatabaseError>
where
    T: DeserializeOwned,
    R: ReadableTable<u64, &'static [u8]>,
{
    match table.get(id)? {
        Some(data) => Ok(Some(rmp_serde::from_slice(data.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn load_all<T, R>(table: &R) -> Result<Vec<T>, DatabaseError>
where
    T: DeserializeOwned,
    R: ReadableTable<u64, &'static [u8]>,
{
    let mut rows = Vec::new();
    for result in table.iter()? {
        let (_, value) = result?;
        rows.push(rmp_serde::from_slice(value.value())?);
    }
    Ok(rows)
}

pub(crate) fn store<T: Serialize>(
    table: &mut Table<u64, &'static [u8]>,
    id: u64,
    row: &T,
) -> Result<(), DatabaseError> {
    let data = rmp_serde::to_vec_named(row)?;
    table.insert(id, data.as_slice())?;
    Ok(())
}

/// Read a parent -> child ids index entry.
pub(crate) fn read_index<R>(table: &R, parent: u64) -> Result<Vec<u64>, DatabaseError>
where
    R: ReadableTable<u64, &'static [u8]>,
{
    match table.get(parent)? {
        Some(data) => Ok(rmp_serde::from_slice(data.value())?),
        None => Ok(Vec::new()),
    }
}

pub(crate) fn index_insert(
    table: &mut Table<u64, &'static [u8]>,
    parent: u64,
    child: u64,
) -> Result<(), DatabaseError> {
    let mut ids = read_index(table, parent)?;
    if !ids.contains(&child) {
        ids.push(child);
        let data = rmp_serde::to_vec(&ids)?;
        table.insert(parent, data.as_slice())?;
    }
    Ok(())
}

pub(crate) fn index_remove(
    table: &mut Table<u64, &'static [u8]>,
    parent: u64,
    child: u64,
) -> Result<(), DatabaseError> {
    let mut ids = read_index(table, parent)?;
    ids.retain(|id| *id != child);
    if ids.is_empty() {
        table.remove(parent)?;
    } else {
        let data = rmp_serde::to_vec(&ids)?;
        table.insert(parent, data.as_slice())?;
    }
    Ok(())
}
