//! On-disk DAG store using Fjall

use crate::dag_store::{BatchOp, DAGStore, WriteBatch};
use anyhow::Result;
use config::Config;
use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct FjallDAGStore {
    database: Database,
    keyspace: Keyspace,
}

const DEFAULT_DATABASE_PATH: &str = "fjall-blockdag";
const DEFAULT_CLEAR_ON_START: bool = false;
const KEYSPACE_NAME: &str = "dag";

impl FjallDAGStore {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let path = config
            .get_string("database-path")
            .unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());
        let clear = config.get_bool("clear-on-start").unwrap_or(DEFAULT_CLEAR_ON_START);
        info!("Storing DAG with Fjall on disk ({path})");
        let path = Path::new(&path);

        if clear && path.exists() {
            info!("Clearing existing DAG database");
            fs::remove_dir_all(path)?;
        }

        let database = Database::builder(path).open()?;
        let keyspace = database.keyspace(KEYSPACE_NAME, KeyspaceCreateOptions::default)?;
        Ok(Self { database, keyspace })
    }
}

impl DAGStore for FjallDAGStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.keyspace.get(key)?.map(|value| value.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.keyspace.insert(key, value)?;
        self.database.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.keyspace.remove(key)?;
        self.database.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut fjall_batch = self.database.batch();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => fjall_batch.insert(&self.keyspace, key, value),
                BatchOp::Delete { key } => fjall_batch.remove(&self.keyspace, key),
            }
        }
        fjall_batch.commit()?;
        self.database.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}
