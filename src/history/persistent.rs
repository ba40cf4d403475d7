//! Redb-backed persistent history storage.
//!
//! Items are stored as JSON under `target\0correspondent\0nanos\0msgid`,
//! so a target's history (optionally narrowed to one correspondent) is a
//! contiguous key range. A second table maps each msgid to the keys that
//! hold it; conversation items are stored once per side.

use super::{HistoryError, Item, PersistentHistory, Sequence, window};
use crate::config::PersistentHistoryConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const HISTORY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("history");
const MSGID_INDEX: TableDefinition<&str, &str> = TableDefinition::new("msgid_index");

fn db_err(e: impl std::fmt::Display) -> HistoryError {
    HistoryError::Store(e.to_string())
}

pub struct RedbHistory {
    db: Database,
    max_results: AtomicUsize,
}

impl std::fmt::Debug for RedbHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbHistory")
            .field("max_results", &self.max_results)
            .finish_non_exhaustive()
    }
}

impl RedbHistory {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistentHistoryConfig) -> Result<Self, HistoryError> {
        let db = Database::create(path).map_err(db_err)?;
        let txn = db.begin_write().map_err(db_err)?;
        {
            txn.open_table(HISTORY_TABLE).map_err(db_err)?;
            txn.open_table(MSGID_INDEX).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(Self {
            db,
            max_results: AtomicUsize::new(config.max_results),
        })
    }

    fn prefix(target: &str, correspondent: &str) -> String {
        if correspondent.is_empty() {
            format!("{target}\0")
        } else {
            format!("{target}\0{correspondent}\0")
        }
    }

    fn make_key(target: &str, item: &Item) -> String {
        let nanos = item.time.timestamp_nanos_opt().unwrap_or(0).max(0);
        format!(
            "{}\0{}\0{:020}\0{}",
            target, item.correspondent, nanos, item.msgid
        )
    }

    fn scan(&self, prefix: &str) -> Result<Vec<Item>, HistoryError> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(HISTORY_TABLE).map_err(db_err)?;
        let mut items = Vec::new();
        for entry in table.range(prefix..).map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            let item: Item = serde_json::from_slice(value.value())
                .map_err(|e| HistoryError::Serialization(e.to_string()))?;
            items.push(item);
        }
        // Keys sort by correspondent before time when scanning a whole target.
        items.sort_by_key(|item| item.time);
        Ok(items)
    }

    fn remove_keys(&self, keys: &[String], msgids: &[String]) -> Result<(), HistoryError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(HISTORY_TABLE).map_err(db_err)?;
            for key in keys {
                table.remove(key.as_str()).map_err(db_err)?;
            }
            let mut index = txn.open_table(MSGID_INDEX).map_err(db_err)?;
            for msgid in msgids {
                index.remove(msgid.as_str()).map_err(db_err)?;
            }
        }
        txn.commit().map_err(db_err)
    }
}

struct RedbSequence {
    store: Arc<RedbHistory>,
    prefix: String,
    cutoff: Option<DateTime<Utc>>,
}

#[async_trait]
impl Sequence for RedbSequence {
    async fn between(
        &self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Item>, HistoryError> {
        let cap = self.store.max_results.load(Ordering::Relaxed);
        let items = self.store.scan(&self.prefix)?;
        Ok(window(items, self.cutoff, after, before, limit.min(cap)))
    }

    fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }
}

#[async_trait]
impl PersistentHistory for RedbHistory {
    fn make_sequence(
        self: Arc<Self>,
        target: &str,
        correspondent: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Box<dyn Sequence> {
        Box::new(RedbSequence {
            prefix: Self::prefix(target, correspondent),
            store: self,
            cutoff,
        })
    }

    async fn store(&self, target: &str, item: &Item) -> Result<(), HistoryError> {
        let key = Self::make_key(target, item);
        let value =
            serde_json::to_vec(item).map_err(|e| HistoryError::Serialization(e.to_string()))?;

        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(HISTORY_TABLE).map_err(db_err)?;
            table.insert(key.as_str(), value.as_slice()).map_err(db_err)?;

            let mut index = txn.open_table(MSGID_INDEX).map_err(db_err)?;
            let keys = match index.get(item.msgid.as_str()).map_err(db_err)? {
                Some(existing) => format!("{}\n{}", existing.value(), key),
                None => key,
            };
            index
                .insert(item.msgid.as_str(), keys.as_str())
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)
    }

    async fn forget(&self, account: &str) -> Result<usize, HistoryError> {
        let mut keys = Vec::new();
        let mut msgids = Vec::new();
        {
            let txn = self.db.begin_read().map_err(db_err)?;
            let table = txn.open_table(HISTORY_TABLE).map_err(db_err)?;
            for entry in table.iter().map_err(db_err)? {
                let (key, value) = entry.map_err(db_err)?;
                let item: Item = serde_json::from_slice(value.value())
                    .map_err(|e| HistoryError::Serialization(e.to_string()))?;
                if item.account_name.eq_ignore_ascii_case(account) {
                    keys.push(key.value().to_string());
                    msgids.push(item.msgid);
                }
            }
        }
        msgids.sort();
        msgids.dedup();
        self.remove_keys(&keys, &msgids)?;
        Ok(keys.len())
    }

    async fn delete_msgid(&self, msgid: &str, account: &str) -> Result<bool, HistoryError> {
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(db_err)?;
            let index = txn.open_table(MSGID_INDEX).map_err(db_err)?;
            let Some(entry) = index.get(msgid).map_err(db_err)? else {
                return Ok(false);
            };
            let keys: Vec<String> = entry.value().split('\n').map(str::to_string).collect();

            if account != "*" {
                let table = txn.open_table(HISTORY_TABLE).map_err(db_err)?;
                if let Some(first) = keys.first()
                    && let Some(value) = table.get(first.as_str()).map_err(db_err)?
                {
                    let item: Item = serde_json::from_slice(value.value())
                        .map_err(|e| HistoryError::Serialization(e.to_string()))?;
                    if !item.account_name.eq_ignore_ascii_case(account) {
                        return Ok(false);
                    }
                }
            }
            keys
        };
        self.remove_keys(&keys, &[msgid.to_string()])?;
        Ok(true)
    }

    fn set_config(&self, config: &PersistentHistoryConfig) {
        self.max_results.store(config.max_results, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::test_item;

    fn open(dir: &tempfile::TempDir) -> Arc<RedbHistory> {
        let config = PersistentHistoryConfig::default();
        Arc::new(RedbHistory::open(dir.path().join("history.redb"), &config).unwrap())
    }

    #[tokio::test]
    async fn store_and_read_back_by_correspondent() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.store("alice", &test_item("a", 10, "alice", "bob")).await.unwrap();
        db.store("alice", &test_item("b", 20, "carol", "carol")).await.unwrap();
        db.store("alice", &test_item("c", 30, "alice", "bob")).await.unwrap();

        let bob = db.clone().make_sequence("alice", "bob", None);
        let ids: Vec<_> = bob.latest(10).await.unwrap().into_iter().map(|i| i.msgid).collect();
        assert_eq!(ids, ["a", "c"]);

        let all = db.clone().make_sequence("alice", "", None);
        let ids: Vec<_> = all.latest(10).await.unwrap().into_iter().map(|i| i.msgid).collect();
        assert_eq!(ids, ["a", "b", "c"]);

        let cut = db.make_sequence("alice", "", DateTime::from_timestamp(15, 0));
        assert_eq!(cut.latest(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_msgid_checks_author() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.store("#chan", &test_item("m1", 10, "alice", "")).await.unwrap();

        assert!(!db.delete_msgid("m1", "mallory").await.unwrap());
        assert!(db.delete_msgid("m1", "Alice").await.unwrap());
        assert!(!db.delete_msgid("m1", "*").await.unwrap());
        let seq = db.make_sequence("#chan", "", None);
        assert!(seq.latest(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forget_removes_all_sides() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        let item = test_item("dm", 10, "alice", "bob");
        db.store("alice", &item).await.unwrap();
        db.store("bob", &item).await.unwrap();
        db.store("#chan", &test_item("x", 11, "carol", "")).await.unwrap();

        assert_eq!(db.forget("alice").await.unwrap(), 2);
        assert!(!db.delete_msgid("dm", "*").await.unwrap());
        assert!(db.delete_msgid("x", "*").await.unwrap());
    }

    #[tokio::test]
    async fn set_config_caps_results() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        for i in 0..5 {
            db.store("#chan", &test_item(&format!("m{i}"), i, "alice", ""))
                .await
                .unwrap();
        }
        db.set_config(&PersistentHistoryConfig {
            max_results: 2,
            ..Default::default()
        });
        let seq = db.make_sequence("#chan", "", None);
        assert_eq!(seq.latest(100).await.unwrap().len(), 2);
    }
}
