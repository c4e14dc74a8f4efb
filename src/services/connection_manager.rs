// src/services/connection_manager.rs

//! # Connection Manager Service
//!
//! Owns the registry that maps a user identity to the live state of its
//! WebSocket connection (a [`Node`]), and the per-node outbound mailbox.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, PoisonError, RwLock as StdRwLock},
    time::Duration,
};

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{GroupId, UserId};

/// Result of putting one payload into a node's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The mailbox stayed full for the whole wait; the payload was dropped.
    Full,
    /// The send pump is gone; the payload was dropped.
    Closed,
}

/// Runtime state of one live connection.
#[derive(Debug)]
pub struct Node {
    id: Uuid,
    user_id: UserId,
    mailbox: mpsc::Sender<Bytes>,
    groups: StdRwLock<HashSet<GroupId>>,
    cancel: CancellationToken,
}

impl Node {
    /// Creates a node and the receiving end of its mailbox.
    ///
    /// The receiver belongs to the send pump; dropping it closes the mailbox.
    pub fn new(
        user_id: UserId,
        groups: impl IntoIterator<Item = GroupId>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (mailbox, rx) = mpsc::channel(capacity);
        let node = Self {
            id: Uuid::new_v4(),
            user_id,
            mailbox,
            groups: StdRwLock::new(groups.into_iter().collect()),
            cancel,
        };
        (Arc::new(node), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn in_group(&self, group: GroupId) -> bool {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&group)
    }

    /// Adds a group; returns false if the node was already a member.
    pub fn join_group(&self, group: GroupId) -> bool {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group)
    }

    pub fn groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<_> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        groups.sort_unstable();
        groups
    }

    /// Queues a payload for the send pump, waiting at most `wait` for space.
    pub async fn enqueue(&self, payload: Bytes, wait: Duration) -> EnqueueOutcome {
        match self.mailbox.send_timeout(payload, wait).await {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!(user_id = self.user_id, node = %self.id, "Mailbox full, dropping payload");
                EnqueueOutcome::Full
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                debug!(user_id = self.user_id, node = %self.id, "Mailbox closed, dropping payload");
                EnqueueOutcome::Closed
            }
        }
    }

    /// Signals both pumps of this node to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

type NodeMap = HashMap<UserId, Arc<Node>>;

/// Registry of live connections, one node per user identity.
///
/// Point lookups and group scans share the read lock; registration,
/// deregistration and membership changes take the write lock.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    nodes: RwLock<NodeMap>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `node` for its user, replacing any previous node.
    ///
    /// The replaced node is closed so its pumps stop and its mailbox is
    /// dropped; it is returned to the caller.
    pub async fn register(&self, node: Arc<Node>) -> Option<Arc<Node>> {
        let previous = {
            let mut map = self.nodes.write().await;
            map.insert(node.user_id(), Arc::clone(&node))
        };

        info!(user_id = node.user_id(), node = %node.id(), "Connection registered");
        if let Some(old) = &previous {
            if old.id() != node.id() {
                info!(user_id = old.user_id(), node = %old.id(), "Replaced connection closed");
                old.close();
            }
        }
        previous
    }

    pub async fn lookup(&self, user_id: UserId) -> Option<Arc<Node>> {
        self.nodes.read().await.get(&user_id).cloned()
    }

    /// Adds `group` to the membership set of a connected user.
    ///
    /// Returns false, without creating anything, if the user is not connected.
    pub async fn add_group(&self, user_id: UserId, group: GroupId) -> bool {
        let map = self.nodes.write().await;
        match map.get(&user_id) {
            Some(node) => {
                node.join_group(group);
                debug!(user_id, group, "Group added to connection");
                true
            }
            None => false,
        }
    }

    /// Snapshot of every registered node that is a member of `group`.
    pub async fn members_of(&self, group: GroupId) -> Vec<Arc<Node>> {
        self.nodes
            .read()
            .await
            .values()
            .filter(|node| node.in_group(group))
            .cloned()
            .collect()
    }

    /// Removes the entry for `user_id` if it still belongs to `node_id`.
    pub async fn deregister(&self, user_id: UserId, node_id: Uuid) -> bool {
        let mut map = self.nodes.write().await;
        match map.get(&user_id) {
            Some(current) if current.id() == node_id => {
                map.remove(&user_id);
                info!(user_id, node = %node_id, "Connection removed.");
                true
            }
            Some(_) => {
                debug!(user_id, node = %node_id, "Connection already replaced, keeping newer entry");
                false
            }
            None => {
                warn!(user_id, node = %node_id, "Attempted to remove non-existent connection");
                false
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    /// Closes every registered node.
    pub async fn close_all(&self) {
        for node in self.nodes.read().await.values() {
            node.close();
        }
    }
}
