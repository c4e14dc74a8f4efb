// src/services/bridge.rs

//! # Cross-Instance Bridge
//!
//! Propagates chat payloads to every other instance on the local network
//! segment with UDP broadcast. Delivery is at-most-once and unordered, and a
//! bridged payload can be at most [`MAX_BRIDGE_PAYLOAD`] bytes.
//!
//! Each datagram is a frame:
//!
//! ```text
//! +---------+----------------------+-----------------+
//! | "CRB1"  | origin instance uuid | payload bytes   |
//! | 4 bytes | 16 bytes             | <= 492 bytes    |
//! +---------+----------------------+-----------------+
//! ```
//!
//! Receivers skip frames stamped with their own instance id, so a message is
//! dispatched once on the instance that read it from a WebSocket and once on
//! every other instance.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
    config::{Config, MAX_DATAGRAM_SIZE},
    services::dispatcher::{Dispatcher, Origin},
};

pub const FRAME_MAGIC: &[u8; 4] = b"CRB1";
pub const FRAME_HEADER_LEN: usize = FRAME_MAGIC.len() + 16;
/// Largest payload that survives the bridge.
pub const MAX_BRIDGE_PAYLOAD: usize = MAX_DATAGRAM_SIZE - FRAME_HEADER_LEN;

const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("payload of {len} bytes exceeds the bridge limit of {max} bytes")]
    Oversize { len: usize, max: usize },

    #[error("datagram of {0} bytes is shorter than the frame header")]
    Truncated(usize),

    #[error("datagram does not carry the bridge magic")]
    BadMagic,

    #[error("bridge queue full")]
    QueueFull,

    #[error("bridge sender stopped")]
    Closed,
}

pub fn encode_frame(origin: Uuid, payload: &[u8]) -> Result<Bytes, BridgeError> {
    if payload.len() > MAX_BRIDGE_PAYLOAD {
        return Err(BridgeError::Oversize {
            len: payload.len(),
            max: MAX_BRIDGE_PAYLOAD,
        });
    }
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.put_slice(FRAME_MAGIC);
    frame.put_slice(origin.as_bytes());
    frame.put_slice(payload);
    Ok(frame.freeze())
}

pub fn decode_frame(datagram: &[u8]) -> Result<(Uuid, Bytes), BridgeError> {
    if datagram.len() > MAX_DATAGRAM_SIZE {
        return Err(BridgeError::Oversize {
            len: datagram.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    if datagram.len() < FRAME_HEADER_LEN {
        return Err(BridgeError::Truncated(datagram.len()));
    }
    let (magic, rest) = datagram.split_at(FRAME_MAGIC.len());
    if magic != FRAME_MAGIC {
        return Err(BridgeError::BadMagic);
    }
    let (origin, payload) = rest.split_at(16);
    let origin = Uuid::from_slice(origin).map_err(|_| BridgeError::Truncated(datagram.len()))?;
    Ok((origin, Bytes::copy_from_slice(payload)))
}

/// Producer side of the bridge queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    instance_id: Uuid,
    queue: mpsc::Sender<Bytes>,
    enqueue_timeout: Duration,
}

impl BridgeHandle {
    pub fn new(instance_id: Uuid, queue: mpsc::Sender<Bytes>, enqueue_timeout: Duration) -> Self {
        Self {
            instance_id,
            queue,
            enqueue_timeout,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Queues `payload` for broadcast, waiting at most the enqueue timeout.
    pub async fn publish(&self, payload: &[u8]) -> Result<(), BridgeError> {
        let frame = encode_frame(self.instance_id, payload)?;
        self.queue
            .send_timeout(frame, self.enqueue_timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => BridgeError::QueueFull,
                mpsc::error::SendTimeoutError::Closed(_) => BridgeError::Closed,
            })
    }
}

/// Running bridge loops.
pub struct BridgeTasks {
    pub sender: JoinHandle<()>,
    pub receiver: JoinHandle<()>,
}

impl BridgeTasks {
    pub async fn join(self) {
        if let Err(e) = self.sender.await {
            error!("Bridge sender task failed: {}", e);
        }
        if let Err(e) = self.receiver.await {
            error!("Bridge receiver task failed: {}", e);
        }
    }
}

/// Binds both bridge sockets and spawns the sender and receiver loops.
pub async fn start(
    config: &Config,
    instance_id: Uuid,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) -> std::io::Result<(BridgeHandle, BridgeTasks)> {
    let send_socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
    send_socket.set_broadcast(true)?;
    let recv_socket = UdpSocket::bind(config.bridge_bind).await?;

    info!(
        %instance_id,
        bind = %recv_socket.local_addr()?,
        target = %config.bridge_target,
        max_payload = MAX_BRIDGE_PAYLOAD,
        "Bridge started"
    );

    let (tx, rx) = mpsc::channel(config.bridge_queue_capacity);
    let handle = BridgeHandle::new(instance_id, tx, config.enqueue_timeout);

    let sender = tokio::spawn(run_sender(send_socket, config.bridge_target, rx, cancel.clone()));
    let receiver = tokio::spawn(run_receiver(recv_socket, instance_id, dispatcher, cancel));

    Ok((handle, BridgeTasks { sender, receiver }))
}

/// Drains the bridge queue, writing each frame as one datagram to `target`.
pub async fn run_sender(
    socket: UdpSocket,
    target: SocketAddr,
    mut queue: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = queue.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = socket.send_to(&frame, target).await {
                        warn!(%target, len = frame.len(), "Bridge datagram not sent: {}", e);
                    } else {
                        trace!(%target, len = frame.len(), "Bridge datagram sent");
                    }
                }
                None => break,
            },
        }
    }
    info!("Bridge sender stopped");
}

/// Reads datagrams and dispatches every frame that came from another instance.
///
/// Datagrams longer than [`MAX_DATAGRAM_SIZE`] are dropped whole rather than
/// truncated.
pub async fn run_receiver(
    socket: UdpSocket,
    instance_id: Uuid,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE + 1];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => received,
        };

        let (len, peer) = match received {
            Ok(r) => r,
            Err(e) => {
                error!("Bridge receive failed: {}. Retrying...", e);
                tokio::time::sleep(RECV_RETRY_DELAY).await;
                continue;
            }
        };

        let (origin, payload) = match decode_frame(&buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%peer, len, "Dropping bridge datagram: {}", e);
                continue;
            }
        };

        if origin == instance_id {
            trace!(%peer, "Skipping own bridge frame");
            continue;
        }

        debug!(%peer, %origin, len = payload.len(), "Bridge frame received");
        dispatcher.dispatch(payload, Origin::Remote).await;
    }
    info!("Bridge receiver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        connection_manager::{ConnectionManager, Node},
        history_service::MemoryHistory,
    };

    #[test]
    fn frame_carries_origin_and_payload() {
        let origin = Uuid::new_v4();
        let frame = encode_frame(origin, b"{\"cmd\":0}").unwrap();
        assert_eq!(&frame[..4], FRAME_MAGIC);

        let (decoded_origin, payload) = decode_frame(&frame).unwrap();
        assert_eq!(decoded_origin, origin);
        assert_eq!(&payload[..], b"{\"cmd\":0}");
    }

    #[test]
    fn payload_cap_is_enforced_on_both_ends() {
        let origin = Uuid::new_v4();
        assert!(encode_frame(origin, &[b' '; MAX_BRIDGE_PAYLOAD]).is_ok());
        assert_eq!(
            encode_frame(origin, &[b' '; MAX_BRIDGE_PAYLOAD + 1]),
            Err(BridgeError::Oversize { len: MAX_BRIDGE_PAYLOAD + 1, max: MAX_BRIDGE_PAYLOAD })
        );
        assert!(matches!(
            decode_frame(&[0u8; MAX_DATAGRAM_SIZE + 1]),
            Err(BridgeError::Oversize { .. })
        ));
    }

    #[test]
    fn foreign_datagrams_are_rejected() {
        assert_eq!(decode_frame(b"CRB1short"), Err(BridgeError::Truncated(9)));
        assert_eq!(decode_frame(&[b'x'; 40]), Err(BridgeError::BadMagic));
    }

    #[tokio::test]
    async fn publish_reports_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = BridgeHandle::new(Uuid::new_v4(), tx, Duration::from_millis(10));
        assert!(handle.publish(b"a").await.is_ok());
        assert_eq!(handle.publish(b"b").await, Err(BridgeError::QueueFull));
    }

    struct Peer {
        addr: SocketAddr,
        instance_id: Uuid,
        registry: Arc<ConnectionManager>,
        cancel: CancellationToken,
    }

    async fn spawn_receiver() -> Peer {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let instance_id = Uuid::new_v4();
        let registry = Arc::new(ConnectionManager::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::new(MemoryHistory::new()),
            Duration::from_millis(20),
        ));
        let cancel = CancellationToken::new();
        tokio::spawn(run_receiver(socket, instance_id, dispatcher, cancel.clone()));
        Peer { addr, instance_id, registry, cancel }
    }

    async fn recv(rx: &mut mpsc::Receiver<Bytes>) -> Option<Bytes> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn round_trip_through_udp_is_byte_identical() {
        let peer = spawn_receiver().await;
        let (node, mut rx) = Node::new(3, [], 8, CancellationToken::new());
        peer.registry.register(node).await;

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, queue) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        tokio::spawn(run_sender(socket, peer.addr, queue, cancel.clone()));
        let handle = BridgeHandle::new(Uuid::new_v4(), tx, Duration::from_millis(50));

        let payload = br#"{"id":9,"userid":2,"dstid":3,"cmd":10,"media":1,"content":"over the wire"}"#;
        handle.publish(payload).await.unwrap();

        assert_eq!(recv(&mut rx).await.as_deref(), Some(&payload[..]));
        cancel.cancel();
        peer.cancel.cancel();
    }

    #[tokio::test]
    async fn own_frames_and_oversize_datagrams_are_not_dispatched() {
        let peer = spawn_receiver().await;
        let (node, mut rx) = Node::new(3, [], 8, CancellationToken::new());
        peer.registry.register(node).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let message = br#"{"userid":2,"dstid":3,"cmd":10}"#;

        // Same origin as the receiver: skipped.
        let own = encode_frame(peer.instance_id, message).unwrap();
        socket.send_to(&own, peer.addr).await.unwrap();

        // Valid JSON padded past the datagram limit: dropped whole.
        let mut oversize = BytesMut::new();
        oversize.put_slice(FRAME_MAGIC);
        oversize.put_slice(Uuid::new_v4().as_bytes());
        oversize.put_slice(message);
        oversize.put_slice(&[b' '; MAX_DATAGRAM_SIZE]);
        socket.send_to(&oversize, peer.addr).await.unwrap();

        // A normal frame afterwards still goes through.
        let good = encode_frame(Uuid::new_v4(), br#"{"userid":2,"dstid":3,"cmd":10,"content":"ok"}"#).unwrap();
        socket.send_to(&good, peer.addr).await.unwrap();

        let delivered = recv(&mut rx).await.unwrap();
        assert_eq!(&delivered[..], &good[FRAME_HEADER_LEN..]);
        assert!(rx.try_recv().is_err());
        peer.cancel.cancel();
    }
}
