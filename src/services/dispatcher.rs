// src/services/dispatcher.rs

//! # Dispatcher
//!
//! Parses an inbound chat payload and routes it by command code to the
//! mailboxes of the connections registered on this instance.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, error, warn};

use crate::{
    models::{ChatMessage, Command},
    services::{
        connection_manager::{ConnectionManager, EnqueueOutcome},
        history_service::ChatHistory,
    },
};

/// Where a payload entered this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Read from a WebSocket connected to this instance.
    Local,
    /// Received from another instance over the bridge.
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The payload did not parse and was discarded.
    Malformed,
    /// Routed; `recipients` mailboxes accepted the payload (0 if nobody matched).
    Delivered { recipients: usize },
    Heartbeat,
    /// Unrecognised command code, ignored.
    Ignored(i64),
}

pub struct Dispatcher {
    registry: Arc<ConnectionManager>,
    history: Arc<dyn ChatHistory>,
    enqueue_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionManager>,
        history: Arc<dyn ChatHistory>,
        enqueue_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            history,
            enqueue_timeout,
        }
    }

    /// Routes one raw payload. The bytes handed to mailboxes are the input
    /// bytes, unchanged.
    pub async fn dispatch(&self, payload: Bytes, origin: Origin) -> DispatchOutcome {
        let message = match ChatMessage::parse(&payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(?origin, len = payload.len(), "Discarding malformed chat payload: {}", e);
                return DispatchOutcome::Malformed;
            }
        };

        let command = message.command();

        // Bridged copies were already persisted by the instance that received them.
        if origin == Origin::Local && command != Command::Heartbeat {
            if let Err(e) = self.history.insert(&message) {
                error!(sender = message.userid, target = message.dstid, "Failed to persist chat message: {}", e);
            }
        }

        debug!(?origin, sender = message.userid, target = message.dstid, cmd = message.cmd, "Dispatching");

        match command {
            Command::Single => {
                let recipients = self.send_to_user(message.dstid, payload).await;
                DispatchOutcome::Delivered { recipients }
            }
            Command::Group => {
                let recipients = self.send_to_group(message.dstid, payload).await;
                DispatchOutcome::Delivered { recipients }
            }
            Command::Heartbeat => DispatchOutcome::Heartbeat,
            Command::Unknown(code) => {
                debug!(code, "Ignoring unknown command");
                DispatchOutcome::Ignored(code)
            }
        }
    }

    async fn send_to_user(&self, user_id: i64, payload: Bytes) -> usize {
        match self.registry.lookup(user_id).await {
            Some(node) => {
                let outcome = node.enqueue(payload, self.enqueue_timeout).await;
                usize::from(outcome == EnqueueOutcome::Queued)
            }
            None => {
                debug!(user_id, "Recipient not connected here, dropping");
                0
            }
        }
    }

    async fn send_to_group(&self, group: i64, payload: Bytes) -> usize {
        let members = self.registry.members_of(group).await;
        let outcomes = join_all(
            members
                .iter()
                .map(|node| node.enqueue(payload.clone(), self.enqueue_timeout)),
        )
        .await;

        outcomes
            .into_iter()
            .filter(|outcome| *outcome == EnqueueOutcome::Queued)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        connection_manager::Node,
        history_service::{HistoryError, MemoryHistory},
    };
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    const WAIT: Duration = Duration::from_millis(20);

    struct BrokenHistory;

    impl ChatHistory for BrokenHistory {
        fn insert(&self, _message: &ChatMessage) -> Result<(), HistoryError> {
            Err(HistoryError::Unavailable("database down".into()))
        }
    }

    async fn connect(
        registry: &ConnectionManager,
        user: i64,
        groups: &[i64],
    ) -> mpsc::Receiver<Bytes> {
        let (node, rx) = Node::new(user, groups.iter().copied(), 8, CancellationToken::new());
        registry.register(node).await;
        rx
    }

    fn setup() -> (Arc<ConnectionManager>, Arc<MemoryHistory>, Dispatcher) {
        let registry = Arc::new(ConnectionManager::new());
        let history = Arc::new(MemoryHistory::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), history.clone(), WAIT);
        (registry, history, dispatcher)
    }

    #[tokio::test]
    async fn single_delivery_is_byte_identical() {
        let (registry, history, dispatcher) = setup();
        let mut rx = connect(&registry, 3, &[]).await;
        let mut other = connect(&registry, 4, &[]).await;

        let payload = Bytes::from_static(br#"{"id":1,"userid":2,"dstid":3,"cmd":10,"media":1,"content":"hello"}"#);
        let outcome = dispatcher.dispatch(payload.clone(), Origin::Local).await;

        assert_eq!(outcome, DispatchOutcome::Delivered { recipients: 1 });
        assert_eq!(rx.try_recv().unwrap(), payload);
        assert!(rx.try_recv().is_err());
        assert!(other.try_recv().is_err());
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn media_fields_are_not_validated() {
        let (registry, history, dispatcher) = setup();
        let mut rx = connect(&registry, 3, &[]).await;

        let payloads = [
            Bytes::from_static(br#"{"userid":2,"dstid":3,"cmd":10,"media":5,"amount":3.5}"#),
            Bytes::from_static(br#"{"userid":2,"dstid":3,"cmd":10,"media":9,"content":10086,"memo":"Hu"}"#),
            Bytes::from_static(br#"{"id":"a1b2","userid":2,"dstid":3,"cmd":10,"media":"text"}"#),
        ];
        for payload in payloads {
            let outcome = dispatcher.dispatch(payload.clone(), Origin::Local).await;
            assert_eq!(outcome, DispatchOutcome::Delivered { recipients: 1 });
            assert_eq!(rx.try_recv().unwrap(), payload);
        }
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn group_delivery_reaches_members_only() {
        let (registry, _history, dispatcher) = setup();
        let mut u1 = connect(&registry, 1, &[]).await;
        let mut u2 = connect(&registry, 2, &[]).await;
        let mut u3 = connect(&registry, 3, &[2]).await;
        assert!(registry.add_group(1, 1).await);
        assert!(registry.add_group(2, 1).await);

        let payload = Bytes::from_static(br#"{"userid":1,"dstid":1,"cmd":11,"media":1,"content":"hi all"}"#);
        let outcome = dispatcher.dispatch(payload.clone(), Origin::Remote).await;

        assert_eq!(outcome, DispatchOutcome::Delivered { recipients: 2 });
        assert_eq!(u1.try_recv().unwrap(), payload);
        assert_eq!(u2.try_recv().unwrap(), payload);
        assert!(u3.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_target_produces_no_writes() {
        let (registry, _history, dispatcher) = setup();
        let mut rx = connect(&registry, 1, &[]).await;

        let payload = Bytes::from_static(br#"{"userid":1,"dstid":99,"cmd":10}"#);
        let outcome = dispatcher.dispatch(payload, Origin::Local).await;

        assert_eq!(outcome, DispatchOutcome::Delivered { recipients: 0 });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn heartbeat_and_unknown_commands_touch_nothing() {
        let (registry, history, dispatcher) = setup();
        let mut rx = connect(&registry, 1, &[1]).await;

        let heartbeat = dispatcher
            .dispatch(Bytes::from_static(br#"{"userid":1,"dstid":1,"cmd":0}"#), Origin::Local)
            .await;
        let unknown = dispatcher
            .dispatch(Bytes::from_static(br#"{"userid":1,"dstid":1,"cmd":77}"#), Origin::Local)
            .await;

        assert_eq!(heartbeat, DispatchOutcome::Heartbeat);
        assert_eq!(unknown, DispatchOutcome::Ignored(77));
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.lookup(1).await.unwrap().groups(), vec![1]);
        // Unknown commands are still recorded; heartbeats are not.
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_discarded() {
        let (registry, history, dispatcher) = setup();
        let mut rx = connect(&registry, 1, &[]).await;

        let outcome = dispatcher.dispatch(Bytes::from_static(b"{not json"), Origin::Local).await;

        assert_eq!(outcome, DispatchOutcome::Malformed);
        assert!(rx.try_recv().is_err());
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn remote_messages_are_not_persisted_again() {
        let (registry, history, dispatcher) = setup();
        let _rx = connect(&registry, 3, &[]).await;

        dispatcher
            .dispatch(Bytes::from_static(br#"{"userid":2,"dstid":3,"cmd":10}"#), Origin::Remote)
            .await;

        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_does_not_block_delivery() {
        let registry = Arc::new(ConnectionManager::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::new(BrokenHistory), WAIT);
        let mut rx = connect(&registry, 3, &[]).await;

        let payload = Bytes::from_static(br#"{"userid":2,"dstid":3,"cmd":10}"#);
        let outcome = dispatcher.dispatch(payload.clone(), Origin::Local).await;

        assert_eq!(outcome, DispatchOutcome::Delivered { recipients: 1 });
        assert_eq!(rx.try_recv().unwrap(), payload);
    }

    #[tokio::test]
    async fn full_mailbox_drops_after_bounded_wait() {
        let registry = Arc::new(ConnectionManager::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::new(MemoryHistory::new()), WAIT);
        let (node, mut rx) = Node::new(3, [], 1, CancellationToken::new());
        registry.register(node).await;

        let payload = Bytes::from_static(br#"{"userid":2,"dstid":3,"cmd":10}"#);
        let first = dispatcher.dispatch(payload.clone(), Origin::Local).await;
        let second = dispatcher.dispatch(payload.clone(), Origin::Local).await;

        assert_eq!(first, DispatchOutcome::Delivered { recipients: 1 });
        assert_eq!(second, DispatchOutcome::Delivered { recipients: 0 });
        assert_eq!(rx.try_recv().unwrap(), payload);
        assert!(rx.try_recv().is_err());
    }
}
