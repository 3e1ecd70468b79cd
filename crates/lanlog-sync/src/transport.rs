//! Transport abstraction for the gossip protocol.
//!
//! Every payload is broadcast to the whole group; there is no unicast.
//! Requests carry their addressee inside the payload instead.
//! Implementations: [`udp::UdpMulticastTransport`] for real networks and
//! [`memory::MemoryTransport`] for tests.

use async_trait::async_trait;

use crate::error::Result;

/// A payload received from the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// The JSON text.
    pub payload: String,
    /// Where it came from, as reported by the transport. Informational only.
    pub sender: String,
}

/// Group transport.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Join the group. Idempotent.
    async fn join(&self) -> Result<()>;

    /// Leave the group and release resources. Idempotent.
    async fn leave(&self) -> Result<()>;

    /// Send a payload to every other member of the group.
    async fn broadcast(&self, payload: &str) -> Result<()>;

    /// Receive the next payload. Blocks until one arrives or the transport fails.
    async fn recv(&self) -> Result<Inbound>;
}

/// A simple in-memory transport for testing.
///
/// Every transport created from one [`memory::MemoryNetwork`] is a member of
/// the same group. Delivery is FIFO per receiver and lossless.
pub mod memory {
    use super::*;
    use crate::error::SyncError;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    struct Member {
        sender: mpsc::UnboundedSender<Inbound>,
        joined: bool,
    }

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        members: RwLock<HashMap<String, Member>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport attached to this network. It must still `join`.
        pub async fn create_transport(self: &Arc<Self>, name: impl Into<String>) -> MemoryTransport {
            let name = name.into();
            let (tx, rx) = mpsc::unbounded_channel();

            self.members.write().await.insert(
                name.clone(),
                Member {
                    sender: tx,
                    joined: false,
                },
            );

            MemoryTransport {
                name,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        async fn set_joined(&self, name: &str, joined: bool) -> Result<()> {
            let mut members = self.members.write().await;
            let member = members
                .get_mut(name)
                .ok_or_else(|| SyncError::Transport(format!("{name} is not on this network")))?;
            member.joined = joined;
            Ok(())
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        name: String,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    }

    impl MemoryTransport {
        /// The name other members see as the sender.
        pub fn name(&self) -> &str {
            &self.name
        }

        /// Take the next pending payload without waiting.
        pub fn try_recv(&self) -> Option<Inbound> {
            self.receiver.try_lock().ok()?.try_recv().ok()
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn join(&self) -> Result<()> {
            self.network.set_joined(&self.name, true).await
        }

        async fn leave(&self) -> Result<()> {
            self.network.set_joined(&self.name, false).await
        }

        async fn broadcast(&self, payload: &str) -> Result<()> {
            let members = self.network.members.read().await;
            match members.get(&self.name) {
                Some(me) if me.joined => {}
                _ => return Err(SyncError::Transport("not joined".into())),
            }

            for (name, member) in members.iter() {
                if name == &self.name || !member.joined {
                    continue;
                }
                // A dropped receiver just means that member is gone.
                let _ = member.sender.send(Inbound {
                    payload: payload.to_string(),
                    sender: self.name.clone(),
                });
            }
            Ok(())
        }

        async fn recv(&self) -> Result<Inbound> {
            let mut rx = self.receiver.lock().await;
            rx.recv()
                .await
                .ok_or_else(|| SyncError::Transport("channel closed".into()))
        }
    }
}

/// UDP multicast transport for a local network.
pub mod udp {
    use super::*;
    use crate::error::SyncError;
    use crate::messages::limits::MAX_PAYLOAD_BYTES;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::sync::Arc;
    use tokio::net::UdpSocket;
    use tokio::sync::RwLock;

    /// Default multicast group.
    pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(235, 1, 1, 0);
    /// Default port.
    pub const DEFAULT_PORT: u16 = 4450;

    /// Joins an IPv4 multicast group and exchanges UTF-8 datagrams on it.
    ///
    /// Our own datagrams are not looped back.
    pub struct UdpMulticastTransport {
        group: SocketAddrV4,
        interface: Ipv4Addr,
        socket: RwLock<Option<Arc<UdpSocket>>>,
    }

    impl UdpMulticastTransport {
        /// Create a transport for `group`, joined on `interface`
        /// (`Ipv4Addr::UNSPECIFIED` lets the OS pick).
        pub fn new(group: SocketAddrV4, interface: Ipv4Addr) -> Self {
            Self {
                group,
                interface,
                socket: RwLock::new(None),
            }
        }

        /// The multicast group address.
        pub fn group(&self) -> SocketAddrV4 {
            self.group
        }

        async fn socket(&self) -> Result<Arc<UdpSocket>> {
            self.socket
                .read()
                .await
                .clone()
                .ok_or_else(|| SyncError::Transport("not joined".into()))
        }
    }

    impl Default for UdpMulticastTransport {
        fn default() -> Self {
            Self::new(
                SocketAddrV4::new(DEFAULT_GROUP, DEFAULT_PORT),
                Ipv4Addr::UNSPECIFIED,
            )
        }
    }

    fn io_err(context: &str, e: std::io::Error) -> SyncError {
        SyncError::Transport(format!("{context}: {e}"))
    }

    #[async_trait]
    impl Transport for UdpMulticastTransport {
        async fn join(&self) -> Result<()> {
            let mut slot = self.socket.write().await;
            if slot.is_some() {
                return Ok(());
            }

            let bind = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.group.port());
            let socket = UdpSocket::bind(bind)
                .await
                .map_err(|e| io_err("bind", e))?;
            socket
                .join_multicast_v4(*self.group.ip(), self.interface)
                .map_err(|e| io_err("join multicast group", e))?;
            socket
                .set_multicast_loop_v4(false)
                .map_err(|e| io_err("disable multicast loop", e))?;

            tracing::info!(group = %self.group, "joined multicast group");
            *slot = Some(Arc::new(socket));
            Ok(())
        }

        async fn leave(&self) -> Result<()> {
            let Some(socket) = self.socket.write().await.take() else {
                return Ok(());
            };
            if let Err(e) = socket.leave_multicast_v4(*self.group.ip(), self.interface) {
                tracing::debug!(error = %e, "leave multicast group failed");
            }
            tracing::info!(group = %self.group, "left multicast group");
            Ok(())
        }

        async fn broadcast(&self, payload: &str) -> Result<()> {
            if payload.len() > MAX_PAYLOAD_BYTES {
                return Err(SyncError::Transport(format!(
                    "datagram of {} bytes exceeds limit",
                    payload.len()
                )));
            }
            let socket = self.socket().await?;
            socket
                .send_to(payload.as_bytes(), self.group)
                .await
                .map_err(|e| io_err("send", e))?;
            Ok(())
        }

        async fn recv(&self) -> Result<Inbound> {
            let socket = self.socket().await?;
            let mut buf = vec![0u8; MAX_PAYLOAD_BYTES];
            let (len, from) = socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| io_err("receive", e))?;
            Ok(Inbound {
                payload: String::from_utf8_lossy(&buf[..len]).into_owned(),
                sender: from.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use crate::error::SyncError;

    #[tokio::test]
    async fn test_memory_broadcast_reaches_joined_members() {
        let network = MemoryNetwork::new();
        let a = network.create_transport("A").await;
        let b = network.create_transport("B").await;
        let c = network.create_transport("C").await;
        a.join().await.unwrap();
        b.join().await.unwrap();
        c.join().await.unwrap();

        a.broadcast("hello").await.unwrap();

        let got_b = b.recv().await.unwrap();
        let got_c = c.recv().await.unwrap();
        assert_eq!(got_b.payload, "hello");
        assert_eq!(got_b.sender, "A");
        assert_eq!(got_c.sender, "A");
        assert!(a.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_memory_left_members_get_nothing() {
        let network = MemoryNetwork::new();
        let a = network.create_transport("A").await;
        let b = network.create_transport("B").await;
        a.join().await.unwrap();
        b.join().await.unwrap();
        b.leave().await.unwrap();

        a.broadcast("ping").await.unwrap();
        assert!(b.try_recv().is_none());

        assert!(matches!(
            b.broadcast("pong").await,
            Err(SyncError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_delivery_is_fifo() {
        let network = MemoryNetwork::new();
        let a = network.create_transport("A").await;
        let b = network.create_transport("B").await;
        a.join().await.unwrap();
        b.join().await.unwrap();

        for i in 0..5 {
            a.broadcast(&i.to_string()).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(b.try_recv().unwrap().payload, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_udp_broadcast_requires_join() {
        let transport = udp::UdpMulticastTransport::default();
        assert!(matches!(
            transport.broadcast("x").await,
            Err(SyncError::Transport(_))
        ));
        transport.leave().await.unwrap();
    }
}
