use fleet_devkit::TestHarness;
use fleet_kernel::latency::LatencySample;
use fleet_kernel::models::{Command, CommandKind, CommandStatus, ConnectionId, NodeId, NodeStatus};
use fleet_kernel::store::{CommandStore, NodeStore, QueuePolicy};
use fleet_kernel::config::KernelConfig;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn command_lifecycle_through_hub_and_dispatcher() {
    let harness = TestHarness::new().unwrap();
    harness.connect_agent("n1", "s1").await.unwrap();

    let id = harness.enqueue("n1", CommandKind::GetMetrics).await.unwrap();
    let report = harness.dispatch().await.unwrap();
    assert_eq!(report.sent, 1);

    let sent = harness.transport.sent_to(&ConnectionId::from("s1"));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].envelope["command_type"], "get_metrics");

    harness
        .respond(id, CommandStatus::Success, Some(serde_json::json!({ "cpu": 12.5 })))
        .await
        .unwrap();
    let command = harness.command(id).await.unwrap();
    assert_eq!(command.status, CommandStatus::Success);
    assert_eq!(command.result.unwrap()["cpu"], 12.5);
    assert!(command.completed_at.is_some());
}

#[tokio::test]
async fn command_for_offline_node_waits_for_connection() {
    let harness = TestHarness::new().unwrap();
    harness.connect_agent("other", "s0").await.unwrap();
    let id = harness.enqueue("n1", CommandKind::Reboot).await.unwrap();

    let report = harness.dispatch().await.unwrap();
    assert_eq!(report.undeliverable, 1);
    assert_eq!(harness.command(id).await.unwrap().status, CommandStatus::Queued);

    harness.connect_agent("n1", "s1").await.unwrap();
    harness.dispatch().await.unwrap();
    assert_eq!(harness.command(id).await.unwrap().status, CommandStatus::Sent);
    assert_eq!(harness.transport.sent_to(&ConnectionId::from("s1")).len(), 1);
}

#[tokio::test]
async fn stale_disconnect_keeps_newer_session() {
    let harness = TestHarness::new().unwrap();
    harness.connect_agent("n1", "s1").await.unwrap();
    harness.connect_agent("n1", "s2").await.unwrap();

    harness.disconnect_agent("s1").await.unwrap();
    assert_eq!(harness.registry.try_get(&NodeId::from("n1")), Some(ConnectionId::from("s2")));

    harness.disconnect_agent("s2").await.unwrap();
    assert!(!harness.registry.has_connections());
}

#[tokio::test]
async fn snapshot_follows_registrations() {
    let harness = TestHarness::new().unwrap();
    let empty = harness.registry.connected_node_ids_snapshot();
    assert!(empty.is_empty());

    harness.connect_agent("n1", "s1").await.unwrap();
    harness.connect_agent("n2", "s2").await.unwrap();
    let snapshot = harness.registry.connected_node_ids_snapshot();
    let mut ids = snapshot.to_vec();
    ids.sort();
    assert_eq!(ids, vec![NodeId::from("n1"), NodeId::from("n2")]);

    harness.disconnect_agent("s1").await.unwrap();
    assert_eq!(harness.registry.connected_node_ids_snapshot().as_ref(), &[NodeId::from("n2")]);
}

#[tokio::test]
async fn failing_transport_exhausts_attempts() {
    let policy = QueuePolicy {
        max_attempts: Some(2),
        max_queued_age: None,
    };
    let harness = TestHarness::with_config(&KernelConfig::default(), policy).unwrap();
    harness.connect_agent("n1", "s1").await.unwrap();
    harness.transport.fail_connection("s1");
    let id = harness.enqueue("n1", CommandKind::Ping).await.unwrap();

    assert_eq!(harness.dispatch().await.unwrap().failed, 1);
    assert_eq!(harness.command(id).await.unwrap().status, CommandStatus::Queued);

    assert_eq!(harness.dispatch().await.unwrap().failed, 1);
    let command = harness.command(id).await.unwrap();
    assert_eq!(command.status, CommandStatus::Failed);
    assert_eq!(command.attempts, 2);

    // Nothing left to send once healed.
    harness.transport.heal(&ConnectionId::from("s1"));
    assert!(harness.dispatch().await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_transport_counts_as_failed_delivery() {
    let config = TestHarness::fast_config(1000, 120);
    let harness = TestHarness::with_config(&config, QueuePolicy::unbounded()).unwrap();
    harness.connect_agent("n1", "s1").await.unwrap();
    harness
        .transport
        .delay_connection("s1", Duration::from_millis(config.dispatch.send_timeout_ms * 5));
    let id = harness.enqueue("n1", CommandKind::Ping).await.unwrap();

    let report = harness.dispatch().await.unwrap();
    assert_eq!(report.failed, 1);
    let command = harness.command(id).await.unwrap();
    assert_eq!(command.status, CommandStatus::Queued);
    assert_eq!(command.attempts, 1);
}

#[tokio::test]
async fn silent_node_goes_offline_once_per_episode() {
    let harness = TestHarness::new().unwrap();
    let now = OffsetDateTime::now_utc();
    harness.seed_node("quiet", now - time::Duration::seconds(600)).await.unwrap();
    harness.seed_node("chatty", now - time::Duration::seconds(5)).await.unwrap();

    let transitions = harness.scan_at(now).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].node_id, NodeId::from("quiet"));
    assert!(harness.scan_at(now + time::Duration::seconds(30)).await.unwrap().is_empty());
    assert_eq!(harness.node("chatty").await.unwrap().status, NodeStatus::Online);

    // Heartbeat revives it; a later silence is a new episode.
    harness.heartbeat("quiet", &[]).await.unwrap();
    assert_eq!(harness.node("quiet").await.unwrap().status, NodeStatus::Online);
    let later = harness.scan_at(OffsetDateTime::now_utc() + time::Duration::seconds(600)).await.unwrap();
    assert_eq!(later.len(), 2);
}

#[tokio::test]
async fn agent_cannot_report_itself_offline() {
    let harness = TestHarness::new().unwrap();
    harness.connect_agent("n1", "s1").await.unwrap();

    harness.report_status("n1", NodeStatus::Offline).await.unwrap();
    assert_eq!(harness.node("n1").await.unwrap().status, NodeStatus::Online);

    // The silence episode is still reported by the monitor.
    let later = OffsetDateTime::now_utc() + time::Duration::seconds(10_000);
    let transitions = harness.scan_at(later).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].node_id, NodeId::from("n1"));
    assert_eq!(harness.node("n1").await.unwrap().status, NodeStatus::Offline);
}

#[tokio::test]
async fn queued_commands_expire_while_fleet_is_empty() {
    let policy = QueuePolicy {
        max_attempts: None,
        max_queued_age: Some(time::Duration::minutes(1)),
    };
    let harness = TestHarness::with_config(&KernelConfig::default(), policy).unwrap();
    let mut command = Command::new("n1", CommandKind::Ping, None);
    command.created_at = OffsetDateTime::now_utc() - time::Duration::hours(1);
    let id = harness.commands.enqueue(command).await.unwrap();

    let report = harness.dispatch().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.fetched, 0);
    assert_eq!(harness.command(id).await.unwrap().status, CommandStatus::Failed);
    assert_eq!(harness.transport.sent_count(), 0);
}

#[tokio::test]
async fn heartbeat_latency_feeds_quality_window() {
    let harness = TestHarness::new().unwrap();
    harness.connect_agent("n1", "s1").await.unwrap();
    harness
        .heartbeat(
            "n1",
            &[
                LatencySample::Success { rtt_ms: 10 },
                LatencySample::Success { rtt_ms: 30 },
                LatencySample::Failure,
                LatencySample::Success { rtt_ms: 20 },
            ],
        )
        .await
        .unwrap();

    let stats = harness.quality.stats(&NodeId::from("n1")).unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.success_count, 3);
    assert_eq!(stats.failure_count, 1);
    assert_eq!(stats.packet_loss_percent, 25.0);
    assert_eq!(stats.average_rtt_ms, Some(20.0));
    assert_eq!(stats.min_rtt_ms, Some(10));
    assert_eq!(stats.max_rtt_ms, Some(30));
}

#[tokio::test]
async fn heartbeat_from_unknown_node_is_ignored() {
    let harness = TestHarness::new().unwrap();
    harness
        .heartbeat("ghost", &[LatencySample::Success { rtt_ms: 5 }])
        .await
        .unwrap();

    assert!(harness.nodes.get(&NodeId::from("ghost")).await.unwrap().is_none());
    assert!(harness.quality.stats(&NodeId::from("ghost")).is_none());
}

#[tokio::test]
async fn spawned_loops_dispatch_and_stop() {
    let config = TestHarness::fast_config(20, 120);
    let harness = TestHarness::with_config(&config, QueuePolicy::unbounded()).unwrap();
    harness.connect_agent("n1", "s1").await.unwrap();

    let shutdown = CancellationToken::new();
    let dispatch_task = harness.dispatcher.clone().spawn(&shutdown);
    let monitor_task = harness.monitor.clone().spawn(&shutdown);

    let id = harness.enqueue("n1", CommandKind::RunCommand).await.unwrap();
    harness
        .wait_for_status(id, CommandStatus::Sent, Duration::from_secs(2))
        .await
        .unwrap();

    shutdown.cancel();
    dispatch_task.stop().await;
    monitor_task.stop().await;

    // Loops are gone: a new command stays queued.
    let late = harness.enqueue("n1", CommandKind::Ping).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.command(late).await.unwrap().status, CommandStatus::Queued);
    assert_eq!(harness.transport.sent_count(), 1);
}
