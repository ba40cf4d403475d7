//! History resolution, replay, forgetting and deletion.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{TestServer, commands};
use lattice_ircd::config::PersistentHistoryConfig;
use lattice_ircd::history::{
    HistoryError, Item, ItemKind, NoopHistory, PersistentHistory, Sequence,
};
use lattice_ircd::server::DeleteOutcome;
use std::sync::Arc;

const HISTORY: &str = "[history]\nenabled = true\nchannel_length = 16\nclient_length = 16\n";

fn item(account: &str, target: &str, correspondent: &str, ago: Duration) -> Item {
    Item {
        msgid: format!("{account}-{}", ago.num_seconds()),
        time: Utc::now() - ago,
        kind: ItemKind::Privmsg,
        nickmask: format!("{account}!~{account}@192.0.2.99"),
        account_name: account.to_string(),
        target: target.to_string(),
        correspondent: correspondent.to_string(),
        text: "hello".to_string(),
    }
}

#[tokio::test]
async fn direct_messages_are_kept_for_both_sides() {
    let ts = TestServer::start(HISTORY).await;
    let mut alice = ts.register("192.0.2.1", "alice").await;
    let mut bob = ts.register("192.0.2.2", "bob").await;

    alice.send("PRIVMSG Bob :hi bob").await;
    let delivered = bob.drain();
    assert_eq!(commands(&delivered), ["PRIVMSG"]);
    assert_eq!(delivered[0].param(1), Some("hi bob"));

    let bob_client = bob.session.client().unwrap();
    let (channel, sequence) = ts
        .server
        .get_history_sequence(None, &bob_client, "ALICE")
        .unwrap();
    assert!(channel.is_none());
    let items = sequence.unwrap().latest(10).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].text, "hi bob");
    assert_eq!(items[0].correspondent, "alice");

    let alice_client = alice.session.client().unwrap();
    let (_, sequence) = ts
        .server
        .get_history_sequence(None, &alice_client, "*")
        .unwrap();
    let items = sequence.unwrap().latest(10).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].correspondent, "bob");
    alice.drain();
}

#[tokio::test]
async fn conversation_items_before_connecting_are_hidden() {
    let ts = TestServer::start(HISTORY).await;
    let bob = ts.register("192.0.2.2", "bob").await;
    let client = bob.session.client().unwrap();

    client.history().add(item("*", "bob", "alice", Duration::hours(1)));
    client.history().add(item("*", "bob", "alice", Duration::zero()));

    let (_, sequence) = ts.server.get_history_sequence(None, &client, "alice").unwrap();
    let items = sequence.unwrap().latest(10).await.unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0].time > client.ctime);
}

#[tokio::test]
async fn channel_history_requires_membership() {
    let ts = TestServer::start(HISTORY).await;
    let mut alice = ts.register("192.0.2.1", "alice").await;
    let mut bob = ts.register("192.0.2.2", "bob").await;
    alice.send("JOIN #lobby").await;
    alice.send("PRIVMSG #lobby :first").await;
    alice.drain();

    let bob_client = bob.session.client().unwrap();
    let err = ts
        .server
        .get_history_sequence(None, &bob_client, "#lobby")
        .err()
        .unwrap();
    assert!(matches!(err, HistoryError::InsufficientPrivileges));

    bob.send("CHATHISTORY LATEST #lobby * 10").await;
    let lines = bob.drain();
    assert_eq!(lines[0].command, "FAIL");
    assert_eq!(lines[0].param(1), Some("INVALID_TARGET"));

    // Unknown channels resolve to nothing rather than an error.
    let (channel, sequence) = ts
        .server
        .get_history_sequence(None, &bob_client, "#nowhere")
        .unwrap();
    assert!(channel.is_none() && sequence.is_none());
}

#[tokio::test]
async fn chathistory_replays_in_a_batch() {
    let ts = TestServer::start(HISTORY).await;
    let mut alice = ts.register("192.0.2.1", "alice").await;
    alice.send("JOIN #lobby").await;
    alice.send("PRIVMSG #lobby :one").await;
    alice.send("PRIVMSG #lobby :two").await;
    alice.send("CAP REQ batch").await;
    alice.drain();

    alice.send("CHATHISTORY LATEST #lobby * 2").await;
    let lines = alice.drain();
    assert_eq!(commands(&lines), ["BATCH", "PRIVMSG", "PRIVMSG", "BATCH"]);
    assert_eq!(lines[1].param(1), Some("one"));
    assert_eq!(lines[2].param(1), Some("two"));
    assert!(lines[0].param(0).unwrap().starts_with('+'));
}

#[tokio::test]
async fn disabled_history_records_nothing() {
    let ts = TestServer::start("").await;
    let mut alice = ts.register("192.0.2.1", "alice").await;
    alice.send("JOIN #lobby").await;
    alice.send("PRIVMSG #lobby :unrecorded").await;

    let channel = ts
        .server
        .channels
        .get("#lobby", ts.server.config().server.casemapping)
        .unwrap();
    assert!(channel.history().is_empty());
    let client = alice.session.client().unwrap();
    let (_, sequence) = ts.server.get_history_sequence(None, &client, "#lobby").unwrap();
    assert!(sequence.is_none());
}

#[tokio::test]
async fn delete_message_by_id() {
    let ts = TestServer::start(HISTORY).await;
    let mut alice = ts.register("192.0.2.1", "alice").await;
    alice.send("JOIN #lobby").await;
    alice.drain();

    let channel = ts
        .server
        .channels
        .get("#lobby", ts.server.config().server.casemapping)
        .unwrap();
    channel.history().add(item("carol", "#lobby", "", Duration::zero()));
    let msgid = "carol-0";

    assert_eq!(
        ts.server.delete_message("#lobby", "unknown", "*").await.unwrap(),
        DeleteOutcome::Noop
    );
    assert_eq!(
        ts.server.delete_message("#lobby", msgid, "dave").await.unwrap(),
        DeleteOutcome::Noop
    );
    assert_eq!(
        ts.server.delete_message("#lobby", msgid, "carol").await.unwrap(),
        DeleteOutcome::Deleted(1)
    );
    assert_eq!(
        ts.server.delete_message("#lobby", msgid, "*").await.unwrap(),
        DeleteOutcome::Noop
    );
}

#[tokio::test]
async fn forget_removes_an_accounts_items_everywhere() {
    let ts = TestServer::start(HISTORY).await;
    let mut alice = ts.register("192.0.2.1", "alice").await;
    alice.send("JOIN #lobby").await;
    alice.send("PRIVMSG #lobby :kept").await;

    let channel = ts
        .server
        .channels
        .get("#lobby", ts.server.config().server.casemapping)
        .unwrap();
    let client = alice.session.client().unwrap();
    channel.history().add(item("carol", "#lobby", "", Duration::zero()));
    client.history().add(item("carol", "alice", "carol", Duration::zero()));
    let before = channel.history().len();

    assert_eq!(ts.server.forget_history("*").await.unwrap(), 0);
    assert_eq!(ts.server.forget_history("carol").await.unwrap(), 2);
    assert_eq!(channel.history().len(), before - 1);
    assert!(client.history().is_empty());
}

/// A durable store whose writes always fail.
struct BrokenStore;

#[async_trait]
impl PersistentHistory for BrokenStore {
    fn make_sequence(
        self: Arc<Self>,
        target: &str,
        correspondent: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Box<dyn Sequence> {
        Arc::new(NoopHistory).make_sequence(target, correspondent, cutoff)
    }

    async fn store(&self, _target: &str, _item: &Item) -> Result<(), HistoryError> {
        Err(HistoryError::Store("disk full".into()))
    }

    async fn forget(&self, _account: &str) -> Result<usize, HistoryError> {
        Err(HistoryError::Store("disk full".into()))
    }

    async fn delete_msgid(&self, _msgid: &str, _account: &str) -> Result<bool, HistoryError> {
        Err(HistoryError::Store("disk full".into()))
    }

    fn set_config(&self, _config: &PersistentHistoryConfig) {}
}

#[tokio::test]
async fn forget_purges_buffers_when_the_store_fails() {
    let ts = TestServer::with_history_store(HISTORY, Arc::new(BrokenStore)).await;
    let mut alice = ts.register("192.0.2.1", "alice").await;
    alice.send("JOIN #lobby").await;
    alice.drain();

    let channel = ts
        .server
        .channels
        .get("#lobby", ts.server.config().server.casemapping)
        .unwrap();
    let client = alice.session.client().unwrap();
    channel.history().add(item("carol", "#lobby", "", Duration::zero()));
    client.history().add(item("carol", "alice", "carol", Duration::zero()));
    let before = channel.history().len();

    let err = ts.server.forget_history("carol").await.unwrap_err();
    assert!(matches!(err, HistoryError::Store(_)));
    assert_eq!(channel.history().len(), before - 1);
    assert!(client.history().is_empty());
}
