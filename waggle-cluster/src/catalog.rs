//! Node-local collection catalog.
//!
//! Collection records live in a small embedded database (`node.db` under the
//! root directory), keyed `"<user>/<collection>"` and encoded with the same
//! binary format the RPC layer uses, so a record read here round-trips
//! byte-identically over the wire.

use crate::error::{ClusterError, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tracing::debug;
use uuid::Uuid;
use waggle::Collection;

const USERCOLS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("usercols");

const NODE_DB_FILE: &str = "node.db";

pub struct Catalog {
    db: Database,
}

impl Catalog {
    /// Open (or create) the catalog under the node's root directory.
    pub fn open(root_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(root_dir)
            .map_err(|err| ClusterError::Catalog(format!("creating {}: {err}", root_dir.display())))?;
        let db = Database::create(root_dir.join(NODE_DB_FILE))?;
        let txn = db.begin_write()?;
        txn.open_table(USERCOLS_TABLE)?;
        txn.commit()?;
        Ok(Self { db })
    }

    fn key(user_id: &str, collection_id: &str) -> String {
        format!("{user_id}/{collection_id}")
    }

    /// Store a new collection record. Returns `true` if a record with the
    /// same key already existed (and was left untouched).
    pub fn create_collection(&self, collection: &Collection) -> Result<bool> {
        let key = Self::key(&collection.user_id, &collection.id);
        let value = bincode::serialize(collection)?;
        let txn = self.db.begin_write()?;
        let already_exists = {
            let mut table = txn.open_table(USERCOLS_TABLE)?;
            if table.get(key.as_str())?.is_some() {
                true
            } else {
                table.insert(key.as_str(), value.as_slice())?;
                false
            }
        };
        txn.commit()?;
        debug!(key = %key, already_exists, "create collection");
        Ok(already_exists)
    }

    /// Fetch one collection record.
    pub fn get_collection(&self, user_id: &str, collection_id: &str) -> Result<Option<Collection>> {
        let key = Self::key(user_id, collection_id);
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USERCOLS_TABLE)?;
        match table.get(key.as_str())? {
            Some(guard) => Ok(Some(bincode::deserialize(guard.value())?)),
            None => Ok(None),
        }
    }

    /// All collections belonging to one user, in key order.
    pub fn list_collections(&self, user_id: &str) -> Result<Vec<Collection>> {
        let prefix = format!("{user_id}/");
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USERCOLS_TABLE)?;
        let mut collections = Vec::new();
        for entry in table.range(prefix.as_str()..)? {
            let (key, value) = entry?;
            if !key.value().starts_with(prefix.as_str()) {
                break;
            }
            collections.push(bincode::deserialize(value.value())?);
        }
        Ok(collections)
    }

    /// Register a new shard on an existing collection and return its id.
    pub fn create_shard(&self, user_id: &str, collection_id: &str) -> Result<String> {
        let key = Self::key(user_id, collection_id);
        let shard_id = Uuid::new_v4().to_string();
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(USERCOLS_TABLE)?;
            let mut collection: Collection = match table.get(key.as_str())? {
                Some(guard) => bincode::deserialize(guard.value())?,
                None => {
                    return Err(ClusterError::NotFound(format!("collection {key}")));
                }
            };
            collection.shard_ids.push(shard_id.clone());
            let value = bincode::serialize(&collection)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        debug!(key = %key, shard_id = %shard_id, "created shard");
        Ok(shard_id)
    }
}
