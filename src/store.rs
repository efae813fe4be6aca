//! Persistent backing store for disk-backed caches

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use heed::types::SerdeBincode;
use heed::{Database, Env, EnvOpenOptions};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{store_err, Result};

/// Write-through key/value persistence behind a cache.
///
/// The in-memory-only rendition is [`NullTable`]; keeping the null case
/// behind the same capability keeps the cache free of per-method
/// store-or-not branches.
pub trait DiskTable<K, V>: Send + Sync {
    fn enabled(&self) -> bool;
    fn get(&self, key: &K) -> Result<Option<V>>;
    fn put(&self, key: &K, value: &V) -> Result<()>;
    fn remove(&self, key: &K) -> Result<()>;
    fn keys(&self) -> Result<Vec<K>>;
    fn values(&self) -> Result<Vec<V>>;
    fn len(&self) -> Result<usize>;
    fn contains(&self, key: &K) -> Result<bool>;
    fn clear(&self) -> Result<()>;
}

/// No-op store: every read is a miss, every write succeeds.
pub struct NullTable;

impl<K, V> DiskTable<K, V> for NullTable {
    fn enabled(&self) -> bool {
        false
    }
    fn get(&self, _key: &K) -> Result<Option<V>> {
        Ok(None)
    }
    fn put(&self, _key: &K, _value: &V) -> Result<()> {
        Ok(())
    }
    fn remove(&self, _key: &K) -> Result<()> {
        Ok(())
    }
    fn keys(&self) -> Result<Vec<K>> {
        Ok(Vec::new())
    }
    fn values(&self) -> Result<Vec<V>> {
        Ok(Vec::new())
    }
    fn len(&self) -> Result<usize> {
        Ok(0)
    }
    fn contains(&self, _key: &K) -> Result<bool> {
        Ok(false)
    }
    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

static ENVS: OnceLock<Mutex<HashMap<PathBuf, Arc<Env>>>> = OnceLock::new();

/// One LMDB environment per store path, shared by every cache that
/// selects that path.
pub fn shared_env(path: &Path) -> Result<Arc<Env>> {
    let envs = ENVS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut envs = envs.lock();
    if let Some(env) = envs.get(path) {
        return Ok(env.clone());
    }
    std::fs::create_dir_all(path).map_err(store_err)?;
    // SAFETY: LMDB requires no other process access this path concurrently during open.
    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(1 << 30)
            .max_dbs(126)
            .open(path)
            .map_err(store_err)?
    };
    let env = Arc::new(env);
    envs.insert(path.to_path_buf(), env.clone());
    Ok(env)
}

/// LMDB-backed table. Each cache owns one named database inside a shared
/// environment; every operation runs in its own transaction and commits
/// before returning. Access is serialized on the table's own lock because
/// iteration must not interleave with writes from the same cache.
pub struct LmdbTable<K, V> {
    env: Arc<Env>,
    db: Database<SerdeBincode<K>, SerdeBincode<V>>,
    lock: Mutex<()>,
}

impl<K, V> LmdbTable<K, V>
where
    K: Serialize + DeserializeOwned + 'static,
    V: Serialize + DeserializeOwned + 'static,
{
    pub fn open(env: Arc<Env>, name: &str) -> Result<Self> {
        let mut wtxn = env.write_txn().map_err(store_err)?;
        let db = env.create_database(&mut wtxn, Some(name)).map_err(store_err)?;
        wtxn.commit().map_err(store_err)?;
        Ok(Self { env, db, lock: Mutex::new(()) })
    }
}

impl<K, V> DiskTable<K, V> for LmdbTable<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn enabled(&self) -> bool {
        true
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        let _guard = self.lock.lock();
        let rtxn = self.env.read_txn().map_err(store_err)?;
        self.db.get(&rtxn, key).map_err(store_err)
    }

    fn put(&self, key: &K, value: &V) -> Result<()> {
        let _guard = self.lock.lock();
        let mut wtxn = self.env.write_txn().map_err(store_err)?;
        self.db.put(&mut wtxn, key, value).map_err(store_err)?;
        wtxn.commit().map_err(store_err)
    }

    fn remove(&self, key: &K) -> Result<()> {
        let _guard = self.lock.lock();
        let mut wtxn = self.env.write_txn().map_err(store_err)?;
        self.db.delete(&mut wtxn, key).map_err(store_err)?;
        wtxn.commit().map_err(store_err)
    }

    fn keys(&self) -> Result<Vec<K>> {
        let _guard = self.lock.lock();
        let rtxn = self.env.read_txn().map_err(store_err)?;
        let mut keys = Vec::new();
        for item in self.db.iter(&rtxn).map_err(store_err)? {
            let (key, _) = item.map_err(store_err)?;
            keys.push(key);
        }
        Ok(keys)
    }

    fn values(&self) -> Result<Vec<V>> {
        let _guard = self.lock.lock();
        let rtxn = self.env.read_txn().map_err(store_err)?;
        let mut values = Vec::new();
        for item in self.db.iter(&rtxn).map_err(store_err)? {
            let (_, value) = item.map_err(store_err)?;
            values.push(value);
        }
        Ok(values)
    }

    fn len(&self) -> Result<usize> {
        let _guard = self.lock.lock();
        let rtxn = self.env.read_txn().map_err(store_err)?;
        Ok(self.db.len(&rtxn).map_err(store_err)? as usize)
    }

    fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        let mut wtxn = self.env.write_txn().map_err(store_err)?;
        self.db.clear(&mut wtxn).map_err(store_err)?;
        wtxn.commit().map_err(store_err)
    }
}
