//! Live configuration changes.

mod common;

use common::{NoDns, RecordingFactory, TestServer, commands, config_text};
use lattice_ircd::config::{Config, ImmutableField};
use lattice_ircd::network::ListenerFactory;
use lattice_ircd::server::{RehashError, Server};
use std::sync::Arc;

const STS: &str = "[server.sts]\nenabled = true\nport = 6697\nduration = \"1d\"\n";

#[tokio::test]
async fn immutable_change_keeps_previous_snapshot() {
    let ts = TestServer::start("").await;
    let text = config_text(&ts.dir, "")
        .replace("irc.test", "irc.other")
        .replace("TestNet", "OtherNet");
    let candidate = Config::parse(&text).unwrap();

    let err = ts.server.apply_config(candidate).await.unwrap_err();
    assert!(matches!(err, RehashError::Immutable(ImmutableField::ServerName)));

    let config = ts.server.config();
    assert_eq!(config.server.name, "irc.test");
    assert_eq!(config.server.network, "TestNet");
}

#[tokio::test]
async fn server_name_case_is_immutable() {
    let ts = TestServer::start("").await;
    let text = config_text(&ts.dir, "").replace("irc.test", "IRC.Test");
    let err = ts
        .server
        .apply_config(Config::parse(&text).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RehashError::Immutable(ImmutableField::ServerName)));
    assert_eq!(ts.server.config().server.name, "irc.test");
}

#[tokio::test]
async fn cap_changes_reach_cap_notify_subscribers_del_first() {
    let ts = TestServer::start(STS).await;

    let mut subscriber = ts.connect("192.0.2.1");
    subscriber.send("CAP LS 302").await;
    subscriber.send("NICK alice").await;
    subscriber.send("USER alice 0 * :Alice").await;
    subscriber.send("CAP END").await;
    subscriber.drain();
    let mut plain = ts.register("192.0.2.2", "bob").await;

    let moved = ts.config("[server.sts]\nenabled = true\nport = 7000\nduration = \"1d\"\n");
    ts.server.apply_config(moved).await.unwrap();

    let lines = subscriber.drain();
    assert_eq!(commands(&lines), ["CAP", "CAP"]);
    assert_eq!(lines[0].param(1), Some("DEL"));
    assert_eq!(lines[0].param(2), Some("sts"));
    assert_eq!(lines[1].param(1), Some("NEW"));
    assert_eq!(lines[1].param(2), Some("sts=port=7000,duration=86400"));
    assert!(plain.drain().is_empty());

    // Enabling history only adds.
    let with_history = ts.config(&format!(
        "{}[history]\nenabled = true\n",
        "[server.sts]\nenabled = true\nport = 7000\nduration = \"1d\"\n"
    ));
    ts.server.apply_config(with_history).await.unwrap();
    let lines = subscriber.drain();
    let caps: Vec<_> = lines.iter().filter(|m| m.command == "CAP").collect();
    assert_eq!(caps.len(), 1);
    assert_eq!(caps[0].param(1), Some("NEW"));
    assert_eq!(caps[0].param(2), Some("draft/chathistory"));
}

#[tokio::test]
async fn history_lengths_resize_live_buffers() {
    let history = "[history]\nenabled = true\nchannel_length = 16\nclient_length = 16\n";
    let ts = TestServer::start(history).await;
    let mut alice = ts.register("192.0.2.1", "alice").await;
    alice.send("JOIN #lobby").await;
    for n in 0..5 {
        alice.send(&format!("PRIVMSG #lobby :message {n}")).await;
    }
    let channel = ts
        .server
        .channels
        .get("#lobby", ts.server.config().server.casemapping)
        .unwrap();
    assert_eq!(channel.history().len(), 6);

    let shrunk = ts.config("[history]\nenabled = true\nchannel_length = 2\nclient_length = 4\n");
    ts.server.apply_config(shrunk).await.unwrap();

    assert_eq!(channel.history().capacity(), 2);
    assert_eq!(channel.history().len(), 2);
    let client = alice.session.client().unwrap();
    assert_eq!(client.history().capacity(), 4);
}

#[tokio::test]
async fn motd_change_pushes_nothing_but_is_served() {
    let ts = TestServer::start("").await;
    let mut alice = ts.register("192.0.2.1", "alice").await;

    let motd = ts.config("[server.motd]\nlines = [\"be excellent\"]\n");
    ts.server.apply_config(motd).await.unwrap();
    assert!(alice.drain().is_empty());

    alice.send("MOTD").await;
    let lines = alice.drain();
    assert_eq!(commands(&lines), ["375", "372", "376"]);
    assert_eq!(lines[1].param(1), Some("- be excellent"));
}

#[tokio::test]
async fn isupport_changes_are_pushed_to_registered_clients() {
    let ts = TestServer::start("").await;
    let mut alice = ts.register("192.0.2.1", "alice").await;
    let mut pending = ts.connect("192.0.2.2");

    let text = config_text(&ts.dir, "").replace("TestNet", "OtherNet");
    ts.server
        .apply_config(Config::parse(&text).unwrap())
        .await
        .unwrap();

    let lines = alice.drain();
    assert_eq!(commands(&lines), ["005"]);
    assert_eq!(lines[0].param(1), Some("NETWORK=OtherNet"));
    assert!(pending.drain().is_empty());
}

#[tokio::test]
async fn listener_failures_are_reported_after_the_swap() {
    let ts = TestServer::start("").await;
    ts.factory.failing.lock().insert(":7000".to_string());

    let text = config_text(&ts.dir, "[server.listeners.\":7000\"]\n")
        .replace("[server.listeners.\":6667\"]\n", "")
        .replace("TestNet", "OtherNet");
    let err = ts
        .server
        .apply_config(Config::parse(&text).unwrap())
        .await
        .unwrap_err();

    let RehashError::Listeners(failures) = err else {
        panic!("expected listener failure, got {err}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, ":7000");
    assert_eq!(ts.server.config().server.network, "OtherNet");
    assert_eq!(*ts.factory.stopped.lock(), [":6667"]);
    assert!(ts.server.listener_addresses().is_empty());
}

#[tokio::test]
async fn rehash_rereads_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ircd.toml");
    std::fs::write(&path, config_text(&dir, "")).unwrap();

    let config = Config::load(&path).unwrap();
    let factory = Arc::new(RecordingFactory::default());
    let server = Server::builder(config)
        .config_path(&path)
        .listener_factory(Arc::clone(&factory) as Arc<dyn ListenerFactory>)
        .resolver(Arc::new(NoDns))
        .build()
        .await
        .unwrap();
    assert_eq!(server.listener_addresses(), [":6667"]);

    std::fs::write(
        &path,
        config_text(&dir, "[server.listeners.\":6697\"]\n").replace("TestNet", "OtherNet"),
    )
    .unwrap();
    server.rehash().await.unwrap();
    assert_eq!(server.config().server.network, "OtherNet");
    assert_eq!(server.listener_addresses(), [":6667", ":6697"]);
    assert_eq!(*factory.started.lock(), [":6667", ":6697"]);

    std::fs::write(&path, "[server]\nname = ").unwrap();
    assert!(server.rehash().await.is_err());
    assert_eq!(server.config().server.network, "OtherNet");
}

#[tokio::test]
async fn rehash_without_a_file_fails() {
    let ts = TestServer::start("").await;
    assert!(matches!(
        ts.server.rehash().await,
        Err(RehashError::NoConfigPath)
    ));
}

#[tokio::test]
async fn rehash_command_needs_operator() {
    let ts = TestServer::start("").await;
    let mut alice = ts.register("192.0.2.1", "alice").await;
    alice.send("REHASH").await;
    assert_eq!(commands(&alice.drain()), ["481"]);
}

#[tokio::test]
async fn diagnostics_listener_follows_the_config() {
    let ts = TestServer::start("").await;
    assert_eq!(ts.server.diagnostics_address(), None);

    let on = ts.config("[debug]\ndiagnostics_listener = \"127.0.0.1:0\"\n");
    ts.server.apply_config(on).await.unwrap();
    assert_eq!(ts.server.diagnostics_address().as_deref(), Some("127.0.0.1:0"));

    let off = ts.config("");
    ts.server.apply_config(off).await.unwrap();
    assert_eq!(ts.server.diagnostics_address(), None);
}
