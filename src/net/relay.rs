//! Hostname-keyed message relay.
//!
//! Every connection registers a hostname, then gets its own task that reads
//! envelopes and forwards them, unmodified, to the connection registered
//! under the envelope's target. Payloads are opaque except in eavesdrop
//! mode, where qubit streams in transit are measured and re-sent.
//!
//! ```text
//! accept -> read hostname -> register -> RES <hostname> / OK
//!                               |
//!                               +-- duplicate -> ERR, close
//! worker: inbound envelope -> route to target's queue | ERR back
//!         own queue        -> socket
//! ```

use crate::config::RelayConfig;
use crate::net::envelope::{Envelope, Method, Opcode, SERVER_NAME};
use crate::net::wire;
use crate::protocols::bb84::{decode_stream, encode_stream, intercept_resend};
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

/// Payload of the `ERR` sent back for an unknown target.
pub const HOST_NOT_FOUND: &str = "Host not found!";

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

/// Handle to one registered connection.
#[derive(Debug)]
struct PeerHandle {
    /// Distinguishes a reconnect from the connection it replaced.
    id: u64,
    outbound: mpsc::UnboundedSender<Bytes>,
}

/// Live connections by hostname, at most one per name.
#[derive(Debug, Default)]
pub struct Registry {
    peers: DashMap<String, PeerHandle>,
}

impl Registry {
    /// Inserts the handle unless the hostname is taken. Check and insert
    /// happen under the same shard lock.
    fn try_register(&self, hostname: &str, handle: PeerHandle) -> bool {
        match self.peers.entry(hostname.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Removes `hostname` only if it is still owned by connection `id`.
    fn deregister(&self, hostname: &str, id: u64) -> bool {
        self.peers
            .remove_if(hostname, |_, handle| handle.id == id)
            .is_some()
    }

    /// Queues `frame` for `target`. False if nobody by that name is connected.
    fn route(&self, target: &str, frame: Bytes) -> bool {
        self.peers
            .get(target)
            .is_some_and(|peer| peer.outbound.send(frame).is_ok())
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.peers.contains_key(hostname)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// What a worker does after handling one inbound frame.
enum Flow {
    Continue,
    Reply(Envelope),
    Disconnect,
}

struct RelayInner {
    registry: Registry,
    eavesdrop: bool,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// The relay. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct RelayServer {
    inner: Arc<RelayInner>,
}

impl RelayServer {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                registry: Registry::default(),
                eavesdrop: config.eavesdrop,
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Stops the accept loop and every connection worker.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Accepts connections until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self, listener: TcpListener) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                addr = %addr,
                eavesdrop = self.inner.eavesdrop,
                "relay listening"
            );
        }

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    tracing::info!("relay shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let relay = self.clone();
                            tokio::spawn(async move { relay.serve(stream, addr).await });
                        }
                        Err(e) => {
                            // Transient (e.g. out of descriptors); keep accepting
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }

    /// Runs one connection from hostname preamble to deregistration.
    pub async fn serve(&self, mut stream: TcpStream, addr: SocketAddr) {
        let shutdown = &self.inner.shutdown;

        let raw = tokio::select! {
            _ = shutdown.cancelled() => return,
            raw = wire::read_hostname(&mut stream) => raw,
        };
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(peer = %addr, error = %e, "connection closed before registering");
                return;
            }
        };

        let mut framed = Framed::new(stream, wire::codec());

        let hostname = match wire::parse_hostname(&raw) {
            Ok(hostname) => hostname,
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "rejected hostname");
                refuse(&mut framed, e.to_string()).await;
                return;
            }
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, queue) = mpsc::unbounded_channel();
        let cancel = shutdown.child_token();
        let handle = PeerHandle { id, outbound };

        if !self.inner.registry.try_register(&hostname, handle) {
            let reason = format!("Hostname {hostname} is already in use!");
            tracing::warn!(peer = %addr, hostname = %hostname, "duplicate hostname");
            refuse(&mut framed, reason).await;
            return;
        }
        tracing::info!(peer = %addr, hostname = %hostname, "peer registered");

        let welcome = Envelope::new(Method::Response(None), hostname.as_str(), SERVER_NAME, "OK");
        if framed.send(welcome.to_bytes()).await.is_ok() {
            self.worker(&hostname, &mut framed, queue, &cancel).await;
        }

        self.inner.registry.deregister(&hostname, id);
        tracing::info!(hostname = %hostname, "peer disconnected");
    }

    async fn worker(
        &self,
        hostname: &str,
        framed: &mut Transport,
        mut queue: mpsc::UnboundedReceiver<Bytes>,
        cancel: &CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                outbound = queue.recv() => {
                    let Some(frame) = outbound else { break };
                    if let Err(e) = framed.send(frame).await {
                        tracing::debug!(hostname, error = %e, "write failed");
                        break;
                    }
                }

                inbound = framed.next() => {
                    let frame = match inbound {
                        Some(Ok(frame)) => frame.freeze(),
                        Some(Err(e)) => {
                            tracing::debug!(hostname, error = %e, "read failed");
                            break;
                        }
                        None => break,
                    };

                    match self.handle_frame(hostname, frame) {
                        Flow::Continue => {}
                        Flow::Disconnect => break,
                        Flow::Reply(reply) => {
                            if let Err(e) = framed.send(reply.to_bytes()).await {
                                tracing::debug!(hostname, error = %e, "write failed");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&self, hostname: &str, frame: Bytes) -> Flow {
        let envelope = match Envelope::parse(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(hostname, error = %e, "malformed envelope");
                return Flow::Reply(Envelope::new(
                    Method::Error(None),
                    hostname,
                    SERVER_NAME,
                    e.to_string(),
                ));
            }
        };

        if envelope.method == Method::Request(Opcode::Dc) {
            return Flow::Disconnect;
        }

        let frame = if self.inner.eavesdrop && envelope.method == Method::Response(Some(Opcode::Get))
        {
            intercept(&envelope).unwrap_or(frame)
        } else {
            frame
        };

        if self.inner.registry.route(&envelope.target, frame) {
            tracing::debug!(
                method = %envelope.method,
                from = hostname,
                to = %envelope.target,
                "forwarded"
            );
            return Flow::Continue;
        }

        tracing::debug!(method = %envelope.method, target = %envelope.target, "unknown target");
        Flow::Reply(Envelope::new(
            Method::Error(envelope.method.opcode()),
            hostname,
            envelope.target,
            HOST_NOT_FOUND,
        ))
    }
}

/// Measures a relayed qubit stream in random bases and re-encodes the
/// outcomes. `None` leaves the original frame in place.
fn intercept(envelope: &Envelope) -> Option<Bytes> {
    let stream = match decode_stream(&envelope.payload) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "qubit stream not decodable, forwarding untouched");
            return None;
        }
    };
    let qubits = stream.len();

    let tampered = intercept_resend(stream).and_then(|stream| encode_stream(&stream));
    match tampered {
        Ok(payload) => {
            tracing::info!(
                from = %envelope.sender,
                to = %envelope.target,
                qubits,
                "intercepted qubit stream"
            );
            let forged = Envelope {
                payload,
                ..envelope.clone()
            };
            Some(forged.to_bytes())
        }
        Err(e) => {
            tracing::warn!(error = %e, "intercept failed, forwarding untouched");
            None
        }
    }
}

async fn refuse(framed: &mut Transport, reason: String) {
    let refusal = Envelope::new(Method::Error(None), "", SERVER_NAME, reason);
    if let Err(e) = framed.send(refusal.to_bytes()).await {
        tracing::debug!(error = %e, "could not deliver refusal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64) -> (PeerHandle, mpsc::UnboundedReceiver<Bytes>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = PeerHandle { id, outbound };
        (handle, rx)
    }

    #[test]
    fn hostname_registers_once() {
        let registry = Registry::default();
        let (first, _rx1) = handle(1);
        let (second, _rx2) = handle(2);

        assert!(registry.try_register("alice", first));
        assert!(!registry.try_register("alice", second));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("alice"));
    }

    #[test]
    fn stale_connection_cannot_evict_successor() {
        let registry = Registry::default();
        let (old, _rx) = handle(1);
        assert!(registry.try_register("alice", old));
        assert!(registry.deregister("alice", 1));

        let (new, _rx) = handle(2);
        assert!(registry.try_register("alice", new));
        assert!(!registry.deregister("alice", 1));
        assert!(registry.contains("alice"));
    }

    #[test]
    fn route_delivers_to_queue() {
        let registry = Registry::default();
        let (bob, mut rx) = handle(1);
        registry.try_register("bob", bob);

        assert!(registry.route("bob", Bytes::from_static(b"frame")));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"frame"));
        assert!(!registry.route("carol", Bytes::from_static(b"frame")));

        // A worker that already dropped its queue is unreachable
        drop(rx);
        assert!(!registry.route("bob", Bytes::from_static(b"frame")));
    }

    #[test]
    fn unknown_target_yields_error_reply() {
        let relay = RelayServer::new(&RelayConfig::default());
        let request = Envelope::request(Opcode::Basis, "ghost", "alice", "0101");

        let Flow::Reply(reply) = relay.handle_frame("alice", request.to_bytes()) else {
            panic!("expected a reply");
        };
        assert_eq!(reply.method, Method::Error(Some(Opcode::Basis)));
        assert_eq!(reply.target, "alice");
        assert_eq!(reply.sender, "ghost");
        assert_eq!(reply.payload, HOST_NOT_FOUND);
    }

    #[test]
    fn garbage_yields_bare_error() {
        let relay = RelayServer::new(&RelayConfig::default());
        let Flow::Reply(reply) = relay.handle_frame("alice", Bytes::from_static(b"garbage")) else {
            panic!("expected a reply");
        };
        assert_eq!(reply.method, Method::Error(None));
        assert_eq!(reply.sender, SERVER_NAME);
    }

    #[test]
    fn disconnect_request_ends_worker() {
        let relay = RelayServer::new(&RelayConfig::default());
        let dc = Envelope::request(Opcode::Dc, SERVER_NAME, "alice", "");
        assert!(matches!(relay.handle_frame("alice", dc.to_bytes()), Flow::Disconnect));
    }

    #[test]
    fn eavesdropper_rewrites_qubit_streams() {
        let relay = RelayServer::new(&RelayConfig {
            eavesdrop: true,
            ..RelayConfig::default()
        });
        let (bob, mut rx) = handle(1);
        relay.registry().try_register("bob", bob);

        let mut alice = crate::protocols::bb84::Bb84Session::new(32).unwrap();
        let payload = encode_stream(&alice.send().unwrap()).unwrap();
        let original = Envelope::new(Method::Response(Some(Opcode::Get)), "bob", "alice", payload);

        assert!(matches!(
            relay.handle_frame("alice", original.to_bytes()),
            Flow::Continue
        ));
        let forwarded = Envelope::parse(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(forwarded.method, original.method);
        assert_eq!(forwarded.sender, "alice");
        assert_ne!(forwarded.payload, original.payload);
        assert_eq!(decode_stream(&forwarded.payload).unwrap().len(), 32);

        // Undecodable streams pass through as they are
        let junk = Envelope::new(Method::Response(Some(Opcode::Get)), "bob", "alice", "%%%");
        relay.handle_frame("alice", junk.to_bytes());
        assert_eq!(rx.try_recv().unwrap(), junk.to_bytes());
    }
}
