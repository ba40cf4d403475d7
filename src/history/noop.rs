//! No-op persistent history that discards all items.
//!
//! Installed when persistent history is disabled. All operations succeed
//! but store nothing.

use super::{HistoryError, Item, PersistentHistory, Sequence};
use crate::config::PersistentHistoryConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct NoopHistory;

struct EmptySequence {
    cutoff: Option<DateTime<Utc>>,
}

#[async_trait]
impl Sequence for EmptySequence {
    async fn between(
        &self,
        _after: Option<DateTime<Utc>>,
        _before: Option<DateTime<Utc>>,
        _limit: usize,
    ) -> Result<Vec<Item>, HistoryError> {
        Ok(vec![])
    }

    fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }
}

#[async_trait]
impl PersistentHistory for NoopHistory {
    fn make_sequence(
        self: Arc<Self>,
        _target: &str,
        _correspondent: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Box<dyn Sequence> {
        Box::new(EmptySequence { cutoff })
    }

    async fn store(&self, _target: &str, _item: &Item) -> Result<(), HistoryError> {
        Ok(())
    }

    async fn forget(&self, _account: &str) -> Result<usize, HistoryError> {
        Ok(0)
    }

    async fn delete_msgid(&self, _msgid: &str, _account: &str) -> Result<bool, HistoryError> {
        Ok(false)
    }

    fn set_config(&self, _config: &PersistentHistoryConfig) {}
}
