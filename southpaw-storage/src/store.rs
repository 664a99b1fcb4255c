use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lmdb::{Cursor, Environment, EnvironmentCopyFlags, Transaction, WriteFlags};
use tracing::debug;

use crate::errors::StorageError;

/// A handle to a named database within the store (spec §6
/// `createKeySpace(name)`). Cheap to clone; the underlying LMDB database
/// handle is stable for the lifetime of the environment.
#[derive(Clone, Debug)]
pub struct KeySpace {
    name: Arc<str>,
    db: lmdb::Database,
}

impl KeySpace {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Reserved keyspace holding pending-set serializations under keys
/// `PK|<denormalized_name>` (spec §6).
pub const METADATA_KEYSPACE: &str = "__southpaw.metadata";

/// The durable, embedded keyspaced key-value map the engine consumes
/// through this interface (spec §6 "State store"). Buffered writes are
/// applied in memory and only become durable on `flush`, matching the
/// "single write barrier per flush" design note in spec §9: any number of
/// `put`/`delete` calls across any number of keyspaces are made crash-safe
/// together by one `flush`.
pub trait StateStore {
    fn create_keyspace(&mut self, name: &str) -> Result<KeySpace, StorageError>;

    fn get(&self, ks: &KeySpace, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&mut self, ks: &KeySpace, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    fn delete(&mut self, ks: &KeySpace, key: &[u8]) -> Result<(), StorageError>;

    /// Every key/value pair currently visible in `ks`, including buffered
    /// but not yet flushed writes. Used by `ReversibleIndex::verify` and by
    /// operator tooling; not on the engine's hot path.
    fn iter(&self, ks: &KeySpace) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Makes all buffered writes since the last flush durable.
    fn flush(&mut self) -> Result<(), StorageError>;

    /// Performs a flush, then snapshots the whole store.
    fn backup(&mut self) -> Result<(), StorageError>;

    /// Overwrites the live store with the most recent backup.
    fn restore(&mut self) -> Result<(), StorageError>;

    /// Deletes the live store on disk.
    fn delete_state(&mut self) -> Result<(), StorageError>;

    /// Deletes all backups on disk.
    fn delete_backups(&mut self) -> Result<(), StorageError>;

    fn open(&mut self) -> Result<(), StorageError>;

    fn close(&mut self) -> Result<(), StorageError>;
}

enum PendingOp {
    Put(Vec<u8>),
    Delete,
}

/// LMDB-backed `StateStore`, grounded on the teacher's `dozer-storage` /
/// `dozer-cache::cache::lmdb` environment-management pattern: named
/// databases under one `lmdb::Environment`, opened up front with a
/// generous `max_dbs`, backed up with `mdb_env_copy` into a sibling
/// directory.
pub struct LmdbStateStore {
    base_path: PathBuf,
    state_dir: PathBuf,
    backup_dir: PathBuf,
    max_dbs: u32,
    map_size: usize,
    env: Option<Environment>,
    keyspace_names: Vec<Arc<str>>,
    databases: HashMap<String, lmdb::Database>,
    pending: HashMap<(String, Vec<u8>), PendingOp>,
}

impl LmdbStateStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        let state_dir = base_path.join("state");
        let backup_dir = base_path.join("backup");
        let mut store = Self {
            base_path,
            state_dir,
            backup_dir,
            max_dbs: 64,
            map_size: 1 << 30, // 1 GiB, resized by LMDB lazily via sparse files
            env: None,
            keyspace_names: Vec::new(),
            databases: HashMap::new(),
            pending: HashMap::new(),
        };
        store.open()?;
        Ok(store)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn env(&self) -> Result<&Environment, StorageError> {
        self.env.as_ref().ok_or(StorageError::Closed)
    }

    fn database(&self, ks: &KeySpace) -> Result<lmdb::Database, StorageError> {
        self.databases
            .get(ks.name())
            .copied()
            .ok_or_else(|| StorageError::KeySpaceNotOpen(ks.name().to_string()))
    }

    fn open_environment(path: &Path, max_dbs: u32, map_size: usize) -> Result<Environment, StorageError> {
        fs::create_dir_all(path).map_err(|source| StorageError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Environment::new()
            .set_max_dbs(max_dbs)
            .set_map_size(map_size)
            .open(path)
            .map_err(StorageError::Lmdb)
    }
}

impl StateStore for LmdbStateStore {
    fn create_keyspace(&mut self, name: &str) -> Result<KeySpace, StorageError> {
        if let Some(db) = self.databases.get(name) {
            let interned = self
                .keyspace_names
                .iter()
                .find(|n| n.as_ref() == name)
                .cloned()
                .expect("keyspace name interned alongside database handle");
            return Ok(KeySpace { name: interned, db: *db });
        }
        let env = self.env()?;
        let db = env
            .create_db(Some(name), lmdb::DatabaseFlags::empty())
            .map_err(StorageError::Lmdb)?;
        self.databases.insert(name.to_string(), db);
        let interned: Arc<str> = Arc::from(name);
        self.keyspace_names.push(interned.clone());
        Ok(KeySpace { name: interned, db })
    }

    fn get(&self, ks: &KeySpace, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if let Some(op) = self.pending.get(&(ks.name().to_string(), key.to_vec())) {
            return Ok(match op {
                PendingOp::Put(value) => Some(value.clone()),
                PendingOp::Delete => None,
            });
        }
        let db = self.database(ks)?;
        let env = self.env()?;
        let txn = env.begin_ro_txn().map_err(StorageError::Lmdb)?;
        match txn.get(db, &key) {
            Ok(value) => Ok(Some(value.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(StorageError::Lmdb(e)),
        }
    }

    fn put(&mut self, ks: &KeySpace, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.pending
            .insert((ks.name().to_string(), key.to_vec()), PendingOp::Put(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, ks: &KeySpace, key: &[u8]) -> Result<(), StorageError> {
        self.pending
            .insert((ks.name().to_string(), key.to_vec()), PendingOp::Delete);
        Ok(())
    }

    fn iter(&self, ks: &KeySpace) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let db = self.database(ks)?;
        let env = self.env()?;
        let txn = env.begin_ro_txn().map_err(StorageError::Lmdb)?;
        let mut out = Vec::new();
        {
            let mut cursor = txn.open_ro_cursor(db).map_err(StorageError::Lmdb)?;
            for item in cursor.iter_start() {
                let (key, value) = item.map_err(StorageError::Lmdb)?;
                out.insert(out.len(), (key.to_vec(), value.to_vec()));
            }
        }
        // Overlay buffered writes for this keyspace so `verify()` and other
        // operator tooling see a consistent in-session view.
        let mut merged: HashMap<Vec<u8>, Vec<u8>> = out.into_iter().collect();
        for ((keyspace, key), op) in &self.pending {
            if keyspace == ks.name() {
                match op {
                    PendingOp::Put(value) => {
                        merged.insert(key.clone(), value.clone());
                    }
                    PendingOp::Delete => {
                        merged.remove(key);
                    }
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let env = self.env()?;
        let mut txn = env.begin_rw_txn().map_err(StorageError::Lmdb)?;
        for ((keyspace, key), op) in self.pending.drain() {
            let db = *self
                .databases
                .get(&keyspace)
                .ok_or(StorageError::KeySpaceNotOpen(keyspace))?;
            match op {
                PendingOp::Put(value) => {
                    txn.put(db, &key, &value, WriteFlags::empty())
                        .map_err(StorageError::Lmdb)?;
                }
                PendingOp::Delete => match txn.del(db, &key, None) {
                    Ok(()) => {}
                    Err(lmdb::Error::NotFound) => {}
                    Err(e) => return Err(StorageError::Lmdb(e)),
                },
            }
        }
        txn.commit().map_err(StorageError::Lmdb)?;
        debug!("state store flushed");
        Ok(())
    }

    fn backup(&mut self) -> Result<(), StorageError> {
        self.flush()?;
        fs::create_dir_all(&self.backup_dir).map_err(|source| StorageError::Io {
            path: self.backup_dir.display().to_string(),
            source,
        })?;
        // mdb_env_copy2 with COMPACT: a consistent, compacted snapshot
        // written atomically into the backup directory.
        self.env()?
            .copy(&self.backup_dir, EnvironmentCopyFlags::COMPACT)
            .map_err(StorageError::Lmdb)?;
        debug!(path = %self.backup_dir.display(), "state store backed up");
        Ok(())
    }

    fn restore(&mut self) -> Result<(), StorageError> {
        if !self.backup_dir.join("data.mdb").exists() {
            return Err(StorageError::NoBackup);
        }
        self.close()?;
        if self.state_dir.exists() {
            fs::remove_dir_all(&self.state_dir).map_err(|source| StorageError::Io {
                path: self.state_dir.display().to_string(),
                source,
            })?;
        }
        fs::create_dir_all(&self.state_dir).map_err(|source| StorageError::Io {
            path: self.state_dir.display().to_string(),
            source,
        })?;
        for entry in fs::read_dir(&self.backup_dir).map_err(|source| StorageError::Io {
            path: self.backup_dir.display().to_string(),
            source,
        })? {
            let entry = entry.map_err(|source| StorageError::Io {
                path: self.backup_dir.display().to_string(),
                source,
            })?;
            fs::copy(entry.path(), self.state_dir.join(entry.file_name())).map_err(|source| {
                StorageError::Io {
                    path: entry.path().display().to_string(),
                    source,
                }
            })?;
        }
        self.open()
    }

    fn delete_state(&mut self) -> Result<(), StorageError> {
        self.close()?;
        if self.state_dir.exists() {
            fs::remove_dir_all(&self.state_dir).map_err(|source| StorageError::Io {
                path: self.state_dir.display().to_string(),
                source,
            })?;
        }
        self.open()
    }

    fn delete_backups(&mut self) -> Result<(), StorageError> {
        if self.backup_dir.exists() {
            fs::remove_dir_all(&self.backup_dir).map_err(|source| StorageError::Io {
                path: self.backup_dir.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    fn open(&mut self) -> Result<(), StorageError> {
        if self.env.is_some() {
            return Ok(());
        }
        let env = Self::open_environment(&self.state_dir, self.max_dbs, self.map_size)?;
        // Re-create previously known keyspaces against the freshly opened
        // environment so handles stay valid across restore/delete cycles.
        let mut databases = HashMap::new();
        for name in &self.keyspace_names {
            let db = env
                .create_db(Some(name), lmdb::DatabaseFlags::empty())
                .map_err(StorageError::Lmdb)?;
            databases.insert(name.to_string(), db);
        }
        self.databases = databases;
        self.env = Some(env);
        Ok(())
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if self.env.is_some() {
            self.flush()?;
        }
        self.env = None;
        self.databases.clear();
        Ok(())
    }
}

impl Drop for LmdbStateStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_is_visible_before_flush() {
        let dir = tempdir().unwrap();
        let mut store = LmdbStateStore::new(dir.path()).unwrap();
        let ks = store.create_keyspace("test").unwrap();
        store.put(&ks, b"k", b"v").unwrap();
        assert_eq!(store.get(&ks, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn flush_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let mut store = LmdbStateStore::new(dir.path()).unwrap();
        let ks = store.create_keyspace("test").unwrap();
        store.put(&ks, b"k", b"v").unwrap();
        store.flush().unwrap();
        store.close().unwrap();
        store.open().unwrap();
        let ks = store.create_keyspace("test").unwrap();
        assert_eq!(store.get(&ks, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn unflushed_writes_do_not_survive_close() {
        let dir = tempdir().unwrap();
        let mut store = LmdbStateStore::new(dir.path()).unwrap();
        let ks = store.create_keyspace("test").unwrap();
        store.put(&ks, b"k", b"v").unwrap();
        // Simulate a crash (no flush) by clearing the pending buffer
        // directly instead of relying on `Drop`, which does flush.
        store.pending.clear();
        store.close().unwrap();
        store.open().unwrap();
        let ks = store.create_keyspace("test").unwrap();
        assert_eq!(store.get(&ks, b"k").unwrap(), None);
    }

    #[test]
    fn backup_then_restore_recovers_data() {
        let dir = tempdir().unwrap();
        let mut store = LmdbStateStore::new(dir.path()).unwrap();
        let ks = store.create_keyspace("test").unwrap();
        store.put(&ks, b"k", b"v").unwrap();
        store.backup().unwrap();
        store.delete(&ks, b"k").unwrap();
        store.flush().unwrap();
        assert_eq!(store.get(&ks, b"k").unwrap(), None);

        store.restore().unwrap();
        let ks = store.create_keyspace("test").unwrap();
        assert_eq!(store.get(&ks, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn delete_removes_key() {
        let dir = tempdir().unwrap();
        let mut store = LmdbStateStore::new(dir.path()).unwrap();
        let ks = store.create_keyspace("test").unwrap();
        store.put(&ks, b"k", b"v").unwrap();
        store.flush().unwrap();
        store.delete(&ks, b"k").unwrap();
        assert_eq!(store.get(&ks, b"k").unwrap(), None);
        store.flush().unwrap();
        assert_eq!(store.get(&ks, b"k").unwrap(), None);
    }
}
