use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serial_test::serial;
use temp_env::with_var;
use tracing_test::traced_test;

use super::*;
use crate::test_utils::peered_pair;
use crate::test_utils::settle;
use crate::test_utils::test_config;
use crate::test_utils::MockTypeConfig;
use crate::test_utils::RecordingHost;
use crate::test_utils::TestNode;
use crate::BackendKind;
use crate::BackendOptions;
use crate::BrokerError;
use crate::CloneParams;
use crate::Data;
use crate::Event;
use crate::LogWrite;
use crate::MemoryHub;
use crate::MemoryTable;
use crate::MockHostRuntime;
use crate::MockMessageChannel;
use crate::MockReporter;
use crate::QueryOutcome;
use crate::StoreFailure;
use crate::StoreQuery;
use crate::Topic;
use crate::DEFAULT_CONNECT_RETRY_ENV;

type Outcomes = Arc<Mutex<Vec<QueryOutcome>>>;

fn recording_callback(outcomes: &Outcomes) -> StoreQueryCallback {
    let outcomes = outcomes.clone();
    StoreQueryCallback::new(move |outcome| outcomes.lock().push(outcome))
}

fn log_write(
    stream: &str,
    n: u64,
) -> LogWrite {
    LogWrite {
        stream: stream.to_string(),
        writer: "Log::WRITER_ASCII".to_string(),
        path: stream.to_string(),
        vals: vec![Data::Count(n)],
    }
}

fn master(
    node: &mut TestNode,
    name: &str,
) -> crate::StoreHandle {
    node.manager
        .make_master(&CallContext::Internal, name, BackendKind::Memory, BackendOptions::default())
        .unwrap()
}

fn mock_manager(channel: MockMessageChannel) -> Manager<MockTypeConfig> {
    Manager::new(test_config(), channel, MockHostRuntime::new(), MockReporter::new())
}

#[test]
fn test_active_tracks_listeners_and_stores() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    assert!(!node.manager.active());

    master(&mut node, "db");
    assert!(node.manager.active());
    assert!(node.manager.close_store(&CallContext::Internal, "db"));
    assert!(!node.manager.active());

    assert!(node.manager.listen(&CallContext::Internal, "127.0.0.1", 0) > 0);
    assert!(node.manager.active());
}

#[test]
fn test_duplicate_store_name_is_reported() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let ctx = CallContext::script("test.zeek:12");

    master(&mut node, "db");
    assert!(node.manager.make_clone(&ctx, "db", None).is_none());
    assert_eq!(node.manager.stats().num_stores, 1);
    assert!(node.reporter.has_error_containing("test.zeek:12: Duplicate store: db"));
}

/// # Case: a store with a pending query is closed
///
/// ## Validation criteria
/// 1. lookup of the name fails afterwards
/// 2. the pending query resolves with a timeout exactly once
/// 3. the stale handle is rejected and the name can be reused
#[test]
fn test_close_store_invalidates_handle_and_times_out_queries() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let ctx = CallContext::Internal;
    let outcomes = Outcomes::default();

    let h = master(&mut node, "db");
    assert!(node
        .manager
        .track_store_query(&ctx, h, 42, recording_callback(&outcomes).with_timeout(100.0)));

    assert!(node.manager.close_store(&ctx, "db"));
    assert_eq!(node.manager.lookup_store("db"), None);
    assert_eq!(*outcomes.lock(), vec![QueryOutcome::Timeout]);

    node.manager.advance_time(200.0);
    node.manager.process();
    assert_eq!(outcomes.lock().len(), 1);

    assert!(!node.manager.store_put(&ctx, h, Data::from("k"), Data::Count(1), None));
    assert!(node.reporter.has_error_containing("Invalid store handle"));

    let h2 = master(&mut node, "db");
    assert_ne!(h, h2);
    assert!(node.manager.store(h).is_none());
    assert!(!node.manager.close_store(&ctx, "missing"));
}

/// # Case: TrackStoreQuery(h, 42) with a 5s timeout, clock driven by
/// advance_time
///
/// ## Validation criteria
/// 1. no outcome before the deadline
/// 2. a single Timeout once the deadline passes
#[test]
fn test_tracked_query_times_out_on_simulated_clock() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let ctx = CallContext::Internal;
    let outcomes = Outcomes::default();
    let h = master(&mut node, "db");

    assert!(node
        .manager
        .track_store_query(&ctx, h, 42, recording_callback(&outcomes).with_timeout(5.0)));
    // Same key again is rejected while pending
    assert!(!node
        .manager
        .track_store_query(&ctx, h, 42, recording_callback(&outcomes).with_timeout(5.0)));
    assert_eq!(node.manager.stats().num_pending_queries, 1);

    node.manager.advance_time(4.0);
    node.manager.process();
    assert!(outcomes.lock().is_empty());

    node.manager.advance_time(5.0);
    node.manager.process();
    node.manager.process();
    assert_eq!(*outcomes.lock(), vec![QueryOutcome::Timeout]);
    assert_eq!(node.manager.stats().num_pending_queries, 0);
}

#[test]
fn test_track_query_on_unknown_handle_is_rejected() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let outcomes = Outcomes::default();
    let h = master(&mut node, "db");
    node.manager.close_store(&CallContext::Internal, "db");

    assert!(!node
        .manager
        .track_store_query(&CallContext::Internal, h, 1, recording_callback(&outcomes)));
    assert_eq!(node.manager.stats().num_pending_queries, 0);
}

#[test]
fn test_store_query_answers_on_next_process() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let ctx = CallContext::Internal;
    let outcomes = Outcomes::default();
    let h = master(&mut node, "db");

    assert!(node.manager.store_put(&ctx, h, Data::from("k"), Data::Count(1), None));
    let first = node
        .manager
        .store_query(&ctx, h, StoreQuery::Get(Data::from("k")), recording_callback(&outcomes))
        .unwrap();
    let second = node
        .manager
        .store_query(&ctx, h, StoreQuery::Get(Data::from("nope")), recording_callback(&outcomes))
        .unwrap();
    assert_ne!(first, second);
    assert!(outcomes.lock().is_empty());

    node.manager.process();
    assert_eq!(*outcomes.lock(), vec![
        QueryOutcome::Success(Data::Count(1)),
        QueryOutcome::Failure(StoreFailure::NoSuchKey),
    ]);
}

#[test]
fn test_master_key_expiry_follows_simulated_clock() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let ctx = CallContext::Internal;
    let outcomes = Outcomes::default();
    let h = master(&mut node, "db");

    node.manager.store_put(&ctx, h, Data::from("k"), Data::Count(1), Some(10.0));
    node.manager.advance_time(11.0);
    node.manager.process();

    node.manager
        .store_query(&ctx, h, StoreQuery::Exists(Data::from("k")), recording_callback(&outcomes));
    node.manager.process();
    assert_eq!(*outcomes.lock(), vec![QueryOutcome::Success(Data::Boolean(false))]);
}

/// # Case: table T associated with "db" before the master exists
///
/// ## Validation criteria
/// 1. creating the master seeds T
/// 2. later mutations are reflected in T in order
#[test]
fn test_forwarded_table_follows_master() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let ctx = CallContext::Internal;
    let table = MemoryTable::new();

    assert!(node.manager.add_forwarded_store(&ctx, "db", Box::new(table.clone())));
    assert!(!node.manager.add_forwarded_store(&ctx, "db", Box::new(MemoryTable::new())));

    let h = master(&mut node, "db");
    node.manager.store_put(&ctx, h, Data::from("k"), Data::Count(1), None);
    node.manager.store_put(&ctx, h, Data::from("j"), Data::Count(2), None);
    node.manager.store_erase(&ctx, h, Data::from("j"));

    assert_eq!(table.get(&Data::from("k")), Some(Data::Count(1)));
    assert_eq!(table.get(&Data::from("j")), None);
    assert_eq!(table.len(), 1);
}

#[test]
fn test_empty_master_adopts_forwarded_rows() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let ctx = CallContext::Internal;
    let outcomes = Outcomes::default();
    let h = master(&mut node, "db");

    let table = MemoryTable::with_rows(vec![(Data::from("a"), Data::Count(1)), (Data::from("b"), Data::Count(2))]);
    assert!(node.manager.add_forwarded_store(&ctx, "db", Box::new(table)));

    node.manager
        .store_query(&ctx, h, StoreQuery::Keys, recording_callback(&outcomes));
    node.manager.process();
    assert_eq!(*outcomes.lock(), vec![QueryOutcome::Success(Data::Vector(vec![
        Data::from("a"),
        Data::from("b")
    ]))]);
}

#[test]
fn test_clear_stores_flushes_queries_and_contents() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let ctx = CallContext::Internal;
    let outcomes = Outcomes::default();
    let h = master(&mut node, "db");
    node.manager.store_put(&ctx, h, Data::from("k"), Data::Count(1), None);
    node.manager.track_store_query(&ctx, h, 7, recording_callback(&outcomes));

    node.manager.clear_stores();
    assert_eq!(*outcomes.lock(), vec![QueryOutcome::Timeout]);
    assert!(node.manager.store(h).unwrap().is_empty().unwrap());
}

/// # Case: batch size 3, three writes to stream "conn"
///
/// ## Validation criteria
/// 1. the third write sends one batch right away
/// 2. the peer receives the three writes in order on bro/log/conn
#[test]
fn test_log_writes_are_batched_to_peer() {
    let hub = MemoryHub::new();
    let (mut a, mut b) = peered_pair(&hub);
    let ctx = CallContext::Internal;

    for i in 0..2 {
        assert!(a.manager.publish_log_write(&ctx, log_write("conn", i)));
    }
    assert_eq!(a.manager.pending_log_writes(), 2);
    b.manager.process();
    assert!(b.host.log_writes().is_empty());

    a.manager.publish_log_write(&ctx, log_write("conn", 2));
    assert_eq!(a.manager.pending_log_writes(), 0);

    b.manager.process();
    let writes = b.host.log_writes();
    let vals: Vec<Data> = writes.iter().map(|w| w.vals[0].clone()).collect();
    assert_eq!(vals, vec![Data::Count(0), Data::Count(1), Data::Count(2)]);
    assert_eq!(a.manager.stats().num_logs_outgoing, 3);
    assert_eq!(b.manager.stats().num_logs_incoming, 3);
}

#[test]
fn test_log_buffers_flush_on_interval() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let ctx = CallContext::Internal;

    node.manager.publish_log_write(&ctx, log_write("conn", 0));
    node.manager.advance_time(0.5);
    node.manager.process();
    assert_eq!(node.manager.pending_log_writes(), 1);

    node.manager.advance_time(1.0);
    node.manager.process();
    assert_eq!(node.manager.pending_log_writes(), 0);
}

#[test]
fn test_custom_log_topic_fn() {
    let hub = MemoryHub::new();
    let (mut a, mut b) = peered_pair(&hub);
    let ctx = CallContext::Internal;
    b.manager.subscribe(&ctx, "logs/");
    a.manager
        .set_log_topic_fn(Box::new(|stream: &str, writer: &str| Topic::new(format!("logs/{}/{}", writer, stream))));

    a.manager.publish_log_write(&ctx, log_write("dns", 1));
    a.manager.flush_log_buffers();
    b.manager.process();
    assert_eq!(b.host.log_writes().len(), 1);
}

#[test]
fn test_events_and_identifiers_reach_peer() {
    let hub = MemoryHub::new();
    let (mut a, mut b) = peered_pair(&hub);
    let ctx = CallContext::Internal;
    b.manager.subscribe(&ctx, "zeek/events/");
    a.host.set_identifier("Site::local_nets", Data::from("10.0.0.0/8"));

    let topic = Topic::from("zeek/events/ping");
    assert!(a.manager.publish_event(&ctx, &topic, Event::new("ping", vec![Data::Count(1)])));
    assert!(a.manager.publish_identifier(&ctx, &topic, "Site::local_nets"));
    assert!(!a.manager.publish_identifier(&ctx, &topic, "Site::missing"));
    assert!(a.reporter.has_error_containing("unknown identifier 'Site::missing'"));

    b.manager.process();
    let events = b.host.events();
    assert_eq!(events, vec![(topic.clone(), Event::new("ping", vec![Data::Count(1)]))]);
    assert_eq!(
        b.host.state.lock().identifiers.get("Site::local_nets"),
        Some(&Data::from("10.0.0.0/8"))
    );

    let a_stats = a.manager.stats();
    assert_eq!(a_stats.num_events_outgoing, 1);
    assert_eq!(a_stats.num_ids_outgoing, 1);
    assert_eq!(a_stats.num_peers, 1);
    let b_stats = b.manager.stats();
    assert_eq!(b_stats.num_events_incoming, 1);
    assert_eq!(b_stats.num_ids_incoming, 1);
}

#[test]
fn test_auto_published_event_is_sent_on_every_topic() {
    let hub = MemoryHub::new();
    let (mut a, mut b) = peered_pair(&hub);
    let ctx = CallContext::Internal;
    b.manager.subscribe(&ctx, "t/");

    let t1 = Topic::from("t/one");
    let t2 = Topic::from("t/two");
    assert!(a.manager.auto_publish_event(&ctx, &t1, "ping"));
    assert!(a.manager.auto_publish_event(&ctx, &t2, "ping"));

    assert_eq!(a.manager.raise_local_event(&ctx, &Event::new("ping", vec![])), 2);
    assert_eq!(a.manager.raise_local_event(&ctx, &Event::new("other", vec![])), 0);

    assert!(a.manager.auto_unpublish_event(&ctx, &t2, "ping"));
    assert!(!a.manager.auto_unpublish_event(&ctx, &t2, "ping"));
    assert_eq!(a.manager.raise_local_event(&ctx, &Event::new("ping", vec![])), 1);

    b.manager.process();
    let topics: Vec<Topic> = b.host.events().into_iter().map(|(t, _)| t).collect();
    assert_eq!(topics, vec![t1.clone(), t2, t1]);
}

#[test]
fn test_auto_publish_of_unknown_event_is_rejected() {
    let hub = MemoryHub::new();
    let host = RecordingHost::with_events(&["known"]);
    let mut node = TestNode::new(&hub);
    node.manager = Manager::new(test_config(), hub.endpoint(), host, node.reporter.clone());

    assert!(!node
        .manager
        .auto_publish_event(&CallContext::Internal, &Topic::from("t/"), "unknown"));
    assert!(node.reporter.has_error_containing("unknown event 'unknown'"));
}

#[test]
fn test_subscribe_and_unsubscribe() {
    let hub = MemoryHub::new();
    let mut node = TestNode::new(&hub);
    let ctx = CallContext::Internal;

    assert!(node.manager.subscribe(&ctx, "a/"));
    assert!(!node.manager.subscribe(&ctx, "a/"));
    assert!(node.manager.forward(&ctx, "b/"));
    assert!(!node.manager.forward(&ctx, "b/"));

    assert!(node.manager.unsubscribe(&ctx, "a/"));
    assert!(node.manager.unsubscribe(&ctx, "b/"));
    assert!(!node.manager.unsubscribe(&ctx, "a/"));
}

#[test]
fn test_terminate_flushes_logs_and_queries() {
    let hub = MemoryHub::new();
    let (mut a, mut b) = peered_pair(&hub);
    let ctx = CallContext::Internal;
    let outcomes = Outcomes::default();
    let h = master(&mut a, "db");
    a.manager.track_store_query(&ctx, h, 1, recording_callback(&outcomes));
    a.manager.publish_log_write(&ctx, log_write("conn", 9));

    a.manager.terminate();
    assert_eq!(*outcomes.lock(), vec![QueryOutcome::Timeout]);
    settle(&mut [&mut b]);
    assert_eq!(b.host.log_writes().len(), 1);
}

#[test]
fn test_clone_created_on_peer_syncs_from_master() {
    let hub = MemoryHub::new();
    let (mut a, mut b) = peered_pair(&hub);
    let ctx = CallContext::Internal;
    let outcomes = Outcomes::default();

    let m = master(&mut a, "db");
    a.manager.store_put(&ctx, m, Data::from("k"), Data::Count(1), None);
    let c = b.manager.make_clone(&ctx, "db", Some(CloneParams::default())).unwrap();
    b.manager
        .store_query(&ctx, c, StoreQuery::Get(Data::from("k")), recording_callback(&outcomes));

    settle(&mut [&mut a, &mut b]);
    assert!(b.manager.store(c).unwrap().is_connected());
    assert_eq!(*outcomes.lock(), vec![QueryOutcome::Success(Data::Count(1))]);
}

#[test]
#[traced_test]
fn test_listen_failure_is_reported() {
    let mut channel = MockMessageChannel::new();
    channel.expect_node_id().returning(|| "node-1".to_string());
    channel
        .expect_listen()
        .returning(|_, _| Err(BrokerError::Transport("address in use".to_string()).into()));

    let mut manager = mock_manager(channel);
    manager.reporter.expect_report_error().times(1).returning(|_| ());

    assert_eq!(manager.listen(&CallContext::Internal, "127.0.0.1", 9999), 0);
    assert!(!manager.active());
    assert!(logs_contain("address in use"));
}

#[test]
fn test_publish_failure_is_reported() {
    let mut channel = MockMessageChannel::new();
    channel.expect_node_id().returning(|| "node-1".to_string());
    channel
        .expect_publish()
        .times(1)
        .returning(|_, _| Err(BrokerError::Transport("closed".to_string()).into()));

    let mut manager = mock_manager(channel);
    manager
        .reporter
        .expect_report_error()
        .withf(|msg| msg.starts_with("script.zeek:3: Transport error"))
        .times(1)
        .returning(|_| ());

    let ctx = CallContext::script("script.zeek:3");
    assert!(!manager.publish_event(&ctx, &Topic::from("t/x"), Event::new("e", vec![])));
    assert_eq!(manager.stats().num_events_outgoing, 0);
}

/// # Case: the first full log batch is rejected by the transport
///
/// ## Validation criteria
/// 1. the dropped writes are not counted as outgoing
/// 2. the next batch that goes out is
#[test]
fn test_rejected_log_batch_is_not_counted() {
    let mut channel = MockMessageChannel::new();
    channel.expect_node_id().returning(|| "node-1".to_string());
    let mut calls = 0;
    channel.expect_publish().times(2).returning(move |_, _| {
        calls += 1;
        if calls == 1 {
            Err(BrokerError::Transport("closed".to_string()).into())
        } else {
            Ok(())
        }
    });

    let mut manager = mock_manager(channel);
    let ctx = CallContext::Internal;
    for i in 0..3 {
        manager.publish_log_write(&ctx, log_write("conn", i));
    }
    assert_eq!(manager.pending_log_writes(), 0);
    assert_eq!(manager.stats().num_logs_outgoing, 0);

    for i in 3..6 {
        manager.publish_log_write(&ctx, log_write("conn", i));
    }
    assert_eq!(manager.stats().num_logs_outgoing, 3);
}

#[test]
#[serial]
fn test_peer_retry_env_override() {
    with_var(DEFAULT_CONNECT_RETRY_ENV, Some("5"), || {
        let mut channel = MockMessageChannel::new();
        channel.expect_node_id().returning(|| "node-1".to_string());
        channel
            .expect_peer()
            .withf(|address, port, retry| address == "10.0.0.1" && *port == 9999 && *retry == Duration::from_secs(5))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut manager = mock_manager(channel);
        manager.peer(&CallContext::Internal, "10.0.0.1", 9999, Duration::from_secs(30));
    });
}

#[test]
#[serial]
fn test_peer_uses_given_retry_without_override() {
    with_var(DEFAULT_CONNECT_RETRY_ENV, None::<&str>, || {
        let mut channel = MockMessageChannel::new();
        channel.expect_node_id().returning(|| "node-1".to_string());
        channel
            .expect_peer()
            .withf(|address, port, retry| address == "10.0.0.1" && *port == 9999 && *retry == Duration::from_secs(30))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut manager = mock_manager(channel);
        manager.peer(&CallContext::Internal, "10.0.0.1", 9999, Duration::from_secs(30));
    });
}
