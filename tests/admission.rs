//! Admission control as configured through the server.

mod common;

use common::TestServer;
use lattice_ircd::security::AdmissionDecision;
use std::net::IpAddr;

const LIMITS: &str = "[server.ip_limits]\n\
    max_concurrent_connections = 100\n\
    max_connections_per_window = 3\n\
    window = \"10m\"\n\
    throttle_ban_duration = \"10m\"\n\
    exempted = [\"198.51.100.0/24\"]\n";

#[tokio::test]
async fn throttled_address_is_dlined() {
    let ts = TestServer::start(LIMITS).await;
    let ip: IpAddr = "192.0.2.7".parse().unwrap();

    for _ in 0..3 {
        assert_eq!(ts.server.admit(ip, false), AdmissionDecision::Accept);
    }
    assert!(ts.server.admit(ip, false).is_rejected());

    let ban = ts.server.bans.check_ip(ip).expect("throttle ban installed");
    assert_eq!(ban.duration, Some(std::time::Duration::from_secs(600)));

    let later = ts.server.admit(ip, false);
    assert!(
        later
            .message()
            .unwrap()
            .starts_with("You are banned from this server (")
    );
    assert_eq!(ts.server.bans.len(), 1);

    // Other addresses are unaffected.
    assert_eq!(
        ts.server.admit("192.0.2.8".parse().unwrap(), false),
        AdmissionDecision::Accept
    );
}

#[tokio::test]
async fn exempt_networks_skip_limits() {
    let ts = TestServer::start(LIMITS).await;
    let ip: IpAddr = "198.51.100.20".parse().unwrap();
    for _ in 0..10 {
        assert_eq!(ts.server.admit(ip, false), AdmissionDecision::Accept);
    }
    assert!(ts.server.bans.is_empty());
}

#[tokio::test]
async fn rehash_changes_limits_in_place() {
    let ts = TestServer::start(
        "[server.ip_limits]\nmax_concurrent_connections = 1\nexempted = []\n",
    )
    .await;
    let ip: IpAddr = "192.0.2.9".parse().unwrap();
    assert_eq!(ts.server.admit(ip, false), AdmissionDecision::Accept);
    assert!(ts.server.admit(ip, false).is_rejected());

    let relaxed = ts.config("[server.ip_limits]\nmax_concurrent_connections = 5\nexempted = []\n");
    ts.server.apply_config(relaxed).await.unwrap();

    // The held slot survives the rehash.
    assert_eq!(ts.server.admission.limiter().count(ip), 1);
    assert_eq!(ts.server.admit(ip, false), AdmissionDecision::Accept);
}

#[tokio::test]
async fn closing_a_session_releases_its_slot() {
    let ts = TestServer::start(
        "[server.ip_limits]\nmax_concurrent_connections = 1\nexempted = []\n",
    )
    .await;
    let ip: IpAddr = "192.0.2.10".parse().unwrap();
    assert_eq!(ts.server.admit(ip, false), AdmissionDecision::Accept);
    let session = ts.connect("192.0.2.10");
    assert!(ts.server.admit(ip, false).is_rejected());

    ts.server.disconnect(&session.session, "bye");
    assert_eq!(ts.server.admit(ip, false), AdmissionDecision::Accept);
}

#[tokio::test]
async fn connections_spread_across_the_window_still_trip_the_throttle() {
    let ts = TestServer::start(
        "[server.ip_limits]\n\
         max_concurrent_connections = 100\n\
         max_connections_per_window = 3\n\
         window = \"2s\"\n\
         throttle_ban_duration = \"10m\"\n\
         exempted = []\n",
    )
    .await;
    let ip: IpAddr = "192.0.2.11".parse().unwrap();
    for _ in 0..3 {
        assert_eq!(ts.server.admit(ip, false), AdmissionDecision::Accept);
        tokio::time::sleep(std::time::Duration::from_millis(450)).await;
    }
    assert!(ts.server.admit(ip, false).is_rejected());
    assert!(ts.server.bans.check_ip(ip).is_some());
}

#[tokio::test]
async fn expired_throttle_bans_are_pruned() {
    let ts = TestServer::start(
        "[server.ip_limits]\n\
         max_concurrent_connections = 100\n\
         max_connections_per_window = 1\n\
         window = \"10m\"\n\
         throttle_ban_duration = \"1s\"\n\
         exempted = []\n",
    )
    .await;
    for n in 1..=20 {
        let ip: IpAddr = format!("192.0.2.{n}").parse().unwrap();
        ts.server.admit(ip, false);
        assert!(ts.server.admit(ip, false).is_rejected());
    }
    assert_eq!(ts.server.bans.len(), 20);

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    ts.server.prune_expired();
    assert!(ts.server.bans.is_empty());
}
