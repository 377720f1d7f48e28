//! Session orchestrator tests against the in-memory collaborators

mod common;

use common::*;
use courier::collaborators::{CheckType, HandlerKind, Queue};
use courier::config::{SessionConfig, DEFAULT_PREFETCH};
use courier::memory::LocalConnection;
use courier::{CourierError, Message, MessagingError};
use std::sync::Arc;

fn acks_in_transaction() -> SessionConfig {
    SessionConfig {
        auto_commit_sends: true,
        auto_commit_acks: false,
        ..SessionConfig::default()
    }
}

#[test]
fn test_auto_commit_send_deliver_acknowledge() {
    init_tracing();
    let broker = Broker::new();
    broker.queue("orders", false);
    let mut ts = broker.open(SessionConfig::default());

    ts.session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();
    assert!(ts.session.send("orders", Message::new("hello")).unwrap());

    let delivered = ts.wait_for(1);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].delivery_id, 1);
    assert_eq!(ts.session.delivery_ids(), vec![1]);

    ts.session.acknowledge(1, true).unwrap();

    assert_eq!(ts.session.delivery_count(), 0);
    assert_eq!(broker.message_count("orders"), 0);
}

#[test]
fn test_failed_auto_commit_ack_keeps_delivery_for_redelivery() {
    let broker = Broker::new();
    broker.queue("orders", true);
    let mut ts = broker.open(SessionConfig::default());
    ts.session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();
    ts.session
        .send("orders", Message::new("a").with_durable(true))
        .unwrap();
    assert_eq!(ts.wait_for(1).len(), 1);

    broker.persistence.set_failing(true);
    assert!(ts.session.acknowledge(1, true).is_err());
    assert!(ts.session.acknowledge(1, false).is_err());
    assert_eq!(ts.session.delivery_ids(), vec![1]);
    broker.persistence.set_failing(false);

    ts.session.rollback().unwrap();
    broker.post_office.queue("orders").unwrap().deliver();
    let redelivered = ts.wait_for(1);
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].delivery_id, 1);

    ts.session.acknowledge(1, true).unwrap();
    assert!(ts.session.delivery_ids().is_empty());
    assert_eq!(broker.message_count("orders"), 0);
}

#[test]
fn test_transactional_ack_then_rollback_compacts_ids() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let mut ts = broker.open(acks_in_transaction());
    ts.session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();

    ts.session.send("orders", Message::new("a")).unwrap();
    ts.session.send("orders", Message::new("b")).unwrap();
    let ids: Vec<u64> = ts.wait_for(2).iter().map(|d| d.delivery_id).collect();
    assert_eq!(ids, vec![1, 2]);

    ts.session.acknowledge(1, true).unwrap();
    assert_eq!(ts.session.delivery_ids(), vec![2]);
    assert_eq!(
        ts.session.transaction().unwrap().acknowledgement_count(),
        1
    );

    ts.session.rollback().unwrap();

    assert_eq!(ts.session.delivery_count(), 0);
    assert_eq!(ts.session.last_delivery_id(), 1);
    assert!(ts.session.transaction().unwrap().is_empty());
    assert_eq!(broker.message_count("orders"), 2);

    // Redelivery continues from the compacted counter
    broker.post_office.queue("orders").unwrap().deliver();
    let ids: Vec<u64> = ts.wait_for(2).iter().map(|d| d.delivery_id).collect();
    assert_eq!(ids, vec![2, 3]);
}

#[test]
fn test_repeated_rollback_does_not_grow_ids() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let mut ts = broker.open(acks_in_transaction());
    ts.session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();
    ts.session.send("orders", Message::new("a")).unwrap();
    assert_eq!(ts.wait_for(1)[0].delivery_id, 1);

    let queue = broker.post_office.queue("orders").unwrap();
    for _ in 0..3 {
        ts.session.rollback().unwrap();
        queue.deliver();
        assert_eq!(ts.wait_for(1)[0].delivery_id, 1);
    }
}

#[test]
fn test_transacted_send_invisible_until_commit() {
    let broker = Broker::new();
    broker.queue("orders", true);
    let ts = broker.open(SessionConfig::transacted());

    ts.session
        .send("orders", Message::new("a").with_durable(true))
        .unwrap();
    assert_eq!(broker.message_count("orders"), 0);
    assert_eq!(ts.session.transaction().unwrap().send_count(), 1);

    ts.session.commit().unwrap();
    assert_eq!(broker.message_count("orders"), 1);
    assert_eq!(broker.persistence.committed_transactions(), 1);
}

#[test]
fn test_transacted_send_discarded_on_rollback() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let ts = broker.open(SessionConfig::transacted());

    ts.session.send("orders", Message::new("a")).unwrap();
    ts.session.rollback().unwrap();
    ts.session.commit().unwrap();
    assert_eq!(broker.message_count("orders"), 0);
}

#[test]
fn test_auto_commit_durable_send_is_stored() {
    let broker = Broker::new();
    broker.queue("orders", true);
    let ts = broker.open(SessionConfig::default());

    ts.session
        .send("orders", Message::new("a").with_durable(true))
        .unwrap();
    ts.session.send("orders", Message::new("b")).unwrap();
    assert_eq!(broker.persistence.added_messages(), 1);
    assert_eq!(broker.message_count("orders"), 2);
}

#[test]
fn test_send_without_route_is_not_delivered() {
    let broker = Broker::new();
    let ts = broker.open(SessionConfig::default());

    assert!(!ts.session.send("nowhere", Message::new("a")).unwrap());
    // The address was created on demand
    assert!(ts.session.execute_binding_query("nowhere").unwrap().exists);
}

#[test]
fn test_denied_create_reports_missing_queue() {
    let broker = Broker::new();
    broker.security.deny("secret", CheckType::Create);
    let ts = broker.open(SessionConfig::default());

    let err = ts.session.send("secret", Message::new("a")).unwrap_err();
    assert!(matches!(
        err,
        CourierError::Messaging(MessagingError::QueueDoesNotExist(_))
    ));
}

#[test]
fn test_denied_write_is_authorization_failure() {
    let broker = Broker::new();
    broker.queue("orders", false);
    broker.security.deny("orders", CheckType::Write);
    let ts = broker.open(SessionConfig::default());

    let err = ts.session.send("orders", Message::new("a")).unwrap_err();
    assert!(matches!(err, CourierError::AuthorizationFailed(_)));
    assert_eq!(broker.message_count("orders"), 0);
}

#[test]
fn test_acknowledge_unknown_id_is_noop() {
    let broker = Broker::new();
    let ts = broker.open(SessionConfig::default());
    ts.session.acknowledge(42, true).unwrap();
    ts.session.acknowledge(42, false).unwrap();
}

#[test]
fn test_acknowledge_one_leaves_others() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let mut ts = broker.open(SessionConfig::default());
    ts.session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();
    for body in ["a", "b", "c"] {
        ts.session.send("orders", Message::new(body)).unwrap();
    }
    ts.wait_for(3);

    ts.session.acknowledge(2, false).unwrap();
    assert_eq!(ts.session.delivery_ids(), vec![1, 3]);
    assert_eq!(broker.message_count("orders"), 2);
}

#[test]
fn test_cancel_all_requeues() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let mut ts = broker.open(SessionConfig::default());
    ts.session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();
    ts.session.send("orders", Message::new("a")).unwrap();
    ts.session.send("orders", Message::new("b")).unwrap();
    ts.wait_for(2);

    ts.session.cancel(-1, false).unwrap();

    assert_eq!(ts.session.delivery_count(), 0);
    assert_eq!(ts.session.last_delivery_id(), 2);
    let queue = broker.post_office.queue("orders").unwrap();
    assert_eq!(queue.list(None).len(), 2);
}

#[test]
fn test_cancel_expired_delivery() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let mut ts = broker.open(acks_in_transaction());
    ts.session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();
    ts.session.send("orders", Message::new("a")).unwrap();
    ts.wait_for(1);

    ts.session.cancel(1, true).unwrap();
    assert_eq!(ts.session.delivery_count(), 0);
    assert_eq!(broker.message_count("orders"), 0);

    // Expiry is not undone by rollback
    ts.session.rollback().unwrap();
    assert_eq!(broker.message_count("orders"), 0);

    assert!(matches!(
        ts.session.cancel(5, false),
        Err(CourierError::InvalidArgument(_))
    ));
    assert!(matches!(
        ts.session.cancel(-2, true),
        Err(CourierError::InvalidArgument(_))
    ));
}

#[test]
fn test_no_local_consumer_drops_own_messages() {
    let broker = Broker::new();
    broker.queue("chat", false);
    let mut ts = broker.open(SessionConfig::default());
    ts.session
        .create_consumer("chat", None, true, false, -1)
        .unwrap();

    ts.session.send("chat", Message::new("echo")).unwrap();

    assert!(ts.drain().is_empty());
    assert_eq!(ts.session.delivery_count(), 0);
    assert_eq!(broker.message_count("chat"), 0);
}

#[test]
fn test_no_local_consumer_takes_other_connections_messages() {
    let broker = Broker::new();
    broker.queue("chat", false);
    let mut receiver = broker.open(SessionConfig::default());
    let sender = broker.open(SessionConfig::default());
    receiver
        .session
        .create_consumer("chat", None, true, false, -1)
        .unwrap();

    sender.session.send("chat", Message::new("hi")).unwrap();
    assert_eq!(receiver.wait_for(1).len(), 1);
}

#[test]
fn test_stopped_connection_holds_messages_until_started() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let connection = Arc::new(LocalConnection::new(None));
    let mut ts = broker.open_on(connection, SessionConfig::default());

    let created = ts
        .session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();
    ts.session.send("orders", Message::new("a")).unwrap();
    assert!(ts.drain().is_empty());
    assert!(!ts.session.consumer(&created.consumer_id).unwrap().is_started());

    ts.session.set_started(true);
    let delivered = ts.wait_for(1);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].consumer_id, created.consumer_id);
}

#[test]
fn test_refused_delivery_is_not_recorded() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let mut ts = broker.open(SessionConfig::default());
    ts.session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();

    ts.sender.set_refusing(true);
    ts.session.send("orders", Message::new("a")).unwrap();
    assert_eq!(ts.session.delivery_count(), 0);
    assert!(ts.session.last_delivery_id() >= 1);
    assert_eq!(broker.message_count("orders"), 1);

    ts.sender.set_refusing(false);
    broker.post_office.queue("orders").unwrap().deliver();
    let delivered = ts.wait_for(1);
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].delivery_id > 1);
    assert_eq!(ts.session.delivery_ids(), vec![delivered[0].delivery_id]);
}

#[test]
fn test_create_queue_and_queries() {
    let broker = Broker::new();
    let ts = broker.open(SessionConfig::default());

    ts.session
        .create_queue("prices", "prices.eu", Some("region = 'eu'"), true, false)
        .unwrap();

    let query = ts.session.execute_queue_query("prices.eu").unwrap();
    assert!(query.exists);
    assert!(query.durable);
    assert!(!query.temporary);
    assert_eq!(query.max_size, -1);
    assert_eq!(query.consumer_count, 0);
    assert_eq!(query.message_count, 0);
    assert_eq!(query.filter_string.as_deref(), Some("region = 'eu'"));
    assert_eq!(query.address.as_deref(), Some("prices"));

    let err = ts
        .session
        .create_queue("prices", "prices.eu", None, true, false)
        .unwrap_err();
    assert!(matches!(
        err,
        CourierError::Messaging(MessagingError::QueueExists(_))
    ));

    let bindings = ts.session.execute_binding_query("prices").unwrap();
    assert!(bindings.exists);
    assert_eq!(bindings.queue_names, vec!["prices.eu".to_string()]);

    assert!(!ts.session.execute_queue_query("missing").unwrap().exists);
    assert!(!ts.session.execute_binding_query("missing").unwrap().exists);
    assert!(matches!(
        ts.session.execute_queue_query(""),
        Err(CourierError::InvalidArgument(_))
    ));
}

#[test]
fn test_temporary_queue_tracked_by_connection() {
    let broker = Broker::new();
    let ts = broker.open(SessionConfig::default());

    ts.session
        .create_queue("replies", "tmp.1", None, true, true)
        .unwrap();
    let query = ts.session.execute_queue_query("tmp.1").unwrap();
    assert!(query.temporary);
    assert!(!query.durable);
    assert_eq!(ts.connection.temporary_queue_names(), vec!["tmp.1".to_string()]);

    ts.session.delete_queue("tmp.1").unwrap();
    assert!(ts.connection.temporary_queue_names().is_empty());
    assert!(matches!(
        ts.session.delete_queue("tmp.1"),
        Err(CourierError::Messaging(MessagingError::QueueDoesNotExist(_)))
    ));
}

#[test]
fn test_delete_durable_queue_drops_stored_references() {
    let broker = Broker::new();
    let ts = broker.open(SessionConfig::default());
    ts.session
        .create_queue("orders", "orders", None, true, false)
        .unwrap();
    ts.session.delete_queue("orders").unwrap();
    assert_eq!(broker.persistence.deleted_queue_count(), 1);
}

#[test]
fn test_add_and_remove_address() {
    let broker = Broker::new();
    let ts = broker.open(SessionConfig::default());

    ts.session.add_address("events").unwrap();
    assert!(matches!(
        ts.session.add_address("events"),
        Err(CourierError::Messaging(MessagingError::AddressExists(_)))
    ));
    ts.session.remove_address("events").unwrap();
    assert!(matches!(
        ts.session.remove_address("events"),
        Err(CourierError::Messaging(MessagingError::AddressDoesNotExist(_)))
    ));

    broker.security.deny("locked", CheckType::Create);
    assert!(matches!(
        ts.session.add_address("locked"),
        Err(CourierError::AuthorizationFailed(_))
    ));
}

#[test]
fn test_create_consumer_validation() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let ts = broker.open(SessionConfig::default());

    assert!(matches!(
        ts.session.create_consumer("missing", None, false, false, -1),
        Err(CourierError::Messaging(MessagingError::QueueDoesNotExist(_)))
    ));

    let defaulted = ts
        .session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();
    assert_eq!(defaulted.prefetch, DEFAULT_PREFETCH);
    let explicit = ts
        .session
        .create_consumer("orders", None, false, false, 10)
        .unwrap();
    assert_eq!(explicit.prefetch, 10);
    assert_eq!(
        broker.dispatcher.kind_of(&explicit.consumer_id),
        Some(HandlerKind::Consumer)
    );
    assert_eq!(ts.session.consumer_count(), 2);

    broker.security.deny("orders", CheckType::Read);
    assert!(matches!(
        ts.session.create_consumer("orders", None, false, false, -1),
        Err(CourierError::AuthorizationFailed(_))
    ));
}

#[test]
fn test_auto_delete_queue_removed_with_last_consumer() {
    let broker = Broker::new();
    let ts = broker.open(SessionConfig::default());
    ts.session
        .create_queue("topic", "sub.1", None, false, false)
        .unwrap();
    let created = ts
        .session
        .create_consumer("sub.1", None, false, true, -1)
        .unwrap();

    ts.session
        .consumer(&created.consumer_id)
        .unwrap()
        .close()
        .unwrap();

    assert!(!ts.session.execute_queue_query("sub.1").unwrap().exists);
    assert_eq!(ts.session.consumer_count(), 0);
    assert!(!broker.dispatcher.is_registered(&created.consumer_id));
}

#[test]
fn test_browser_does_not_consume() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let ts = broker.open(SessionConfig::default());
    ts.session.send("orders", Message::new("a")).unwrap();
    ts.session.send("orders", Message::new("b")).unwrap();

    let created = ts.session.create_browser("orders", None).unwrap();
    let browser = ts.session.browser(&created.browser_id).unwrap();
    assert_eq!(browser.next_message_block(10).unwrap().len(), 2);
    assert_eq!(broker.message_count("orders"), 2);

    browser.close().unwrap();
    assert_eq!(ts.session.browser_count(), 0);
    assert!(!broker.dispatcher.is_registered(&created.browser_id));
    assert!(matches!(
        ts.session.create_browser("missing", None),
        Err(CourierError::Messaging(MessagingError::QueueDoesNotExist(_)))
    ));
}

#[test]
fn test_remove_unknown_handlers() {
    let broker = Broker::new();
    let ts = broker.open(SessionConfig::default());
    assert!(matches!(
        ts.session.remove_consumer("nope"),
        Err(CourierError::IllegalState(_))
    ));
    assert!(matches!(
        ts.session.remove_browser("nope"),
        Err(CourierError::IllegalState(_))
    ));
}

#[test]
fn test_close_cascades() {
    let broker = Broker::new();
    broker.queue("orders", false);
    let mut ts = broker.open(SessionConfig::default());
    let session_id = ts.session.id().to_string();
    let consumer = ts
        .session
        .create_consumer("orders", None, false, false, -1)
        .unwrap();
    let browser = ts.session.create_browser("orders", None).unwrap();
    assert_eq!(
        broker.dispatcher.kind_of(&session_id),
        Some(HandlerKind::Session)
    );

    ts.session.send("orders", Message::new("unacked")).unwrap();
    ts.wait_for(1);

    ts.session.close().unwrap();

    assert!(ts.session.is_closed());
    assert_eq!(ts.session.consumer_count(), 0);
    assert_eq!(ts.session.browser_count(), 0);
    assert_eq!(ts.session.delivery_count(), 0);
    assert!(broker.dispatcher.is_empty());
    assert!(!broker.dispatcher.is_registered(&consumer.consumer_id));
    assert!(!broker.dispatcher.is_registered(&browser.browser_id));
    assert_eq!(ts.connection.removed_sessions(), vec![session_id]);

    // The unacknowledged message went back to its queue, which has no consumer now
    let queue = broker.post_office.queue("orders").unwrap();
    assert_eq!(queue.consumer_count(), 0);
    assert_eq!(queue.list(None).len(), 1);

    ts.session.close().unwrap();
    assert!(matches!(
        ts.session.send("orders", Message::new("late")),
        Err(CourierError::IllegalState(_))
    ));
}

#[test]
fn test_commit_on_xa_session_rejected() {
    let broker = Broker::new();
    let ts = broker.open(SessionConfig::xa());
    assert!(matches!(
        ts.session.commit(),
        Err(CourierError::IllegalState(_))
    ));

    ts.session.xa_start(&xid("b1")).unwrap();
    assert!(matches!(
        ts.session.commit(),
        Err(CourierError::IllegalState(_))
    ));
}
