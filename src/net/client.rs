//! Relay client: runs BB84 handshakes with other peers and exchanges
//! enciphered chat over the agreed keys.
//!
//! A single connection task owns the socket. It answers handshake requests
//! from peers on its own (responder role), hands `RES`/`ERR` replies to the
//! waiter that asked for them, and reports chat and key changes as
//! [`ClientEvent`]s. The caller drives the initiator role through
//! [`Client::establish_key`], one request at a time per peer and opcode.

use crate::cipher;
use crate::config::ClientConfig;
use crate::errors::QkdError;
use crate::net::envelope::{Envelope, Method, Opcode, SERVER_NAME};
use crate::net::error::ClientError;
use crate::net::payload;
use crate::net::pending::PendingResponses;
use crate::net::wire;
use crate::protocols::bb84::{Bb84Session, bits_to_string, decode_stream, encode_stream};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

/// Fraction of the check sample that must agree. Any disagreement aborts.
pub const CHECK_THRESHOLD: f64 = 1.0;

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

/// Why an initiated handshake produced no key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The peer found disagreeing bits in the check sample.
    CheckFailed,
    /// Too few coincidences to sacrifice a sample and keep any key.
    InsufficientKey { available: usize, requested: usize },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::CheckFailed => f.write_str("check sample disagreed, possible eavesdropper"),
            AbortReason::InsufficientKey {
                available,
                requested,
            } => write!(
                f,
                "only {available} sifted bits, a check of {requested} needs more"
            ),
        }
    }
}

/// Result of [`Client::establish_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Established {
        peer: String,
        qubits: usize,
        coincidences: usize,
        key_bits: usize,
    },
    Aborted {
        peer: String,
        reason: AbortReason,
    },
}

impl KeyOutcome {
    pub fn is_established(&self) -> bool {
        matches!(self, KeyOutcome::Established { .. })
    }
}

/// Notifications from the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A deciphered chat message.
    Message { from: String, text: String },
    /// A peer completed a handshake this client responded to.
    KeyEstablished { peer: String, key_bits: usize },
    /// A peer's check failed; any key with it is gone.
    KeyDiscarded { peer: String },
    /// The relay connection ended.
    Disconnected,
}

/// State shared by the caller and the connection task.
struct Shared {
    hostname: String,
    qubits: usize,
    check_samples: usize,
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: PendingResponses,
    /// Final keys by peer.
    keys: Mutex<HashMap<String, Vec<bool>>>,
    /// Responder-side sessions by peer, from `GET` until `CHECK`.
    sessions: Mutex<HashMap<String, Bb84Session>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    cancel: CancellationToken,
}

pub struct Client {
    shared: Arc<Shared>,
    connection: Option<JoinHandle<()>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ClientEvent>>>,
}

impl Client {
    /// Connects to the relay and registers `config.hostname`.
    ///
    /// Fails with [`ClientError::RegistrationConflict`] if the relay refuses
    /// the name.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let mut stream = TcpStream::connect(&config.relay).await?;
        wire::write_hostname(&mut stream, &config.hostname).await?;
        let mut framed = Framed::new(stream, wire::codec());

        let frame = framed.next().await.ok_or(ClientError::Disconnected)??;
        let reply = Envelope::parse(&frame)?;
        match reply.method {
            Method::Response(None) => {}
            Method::Error(None) => return Err(ClientError::RegistrationConflict(reply.payload)),
            other => {
                return Err(ClientError::Protocol(format!(
                    "expected registration reply, got {other}"
                )));
            }
        }
        tracing::info!(hostname = %config.hostname, relay = %config.relay, "registered with relay");

        let (outbound, queue) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            hostname: config.hostname,
            qubits: config.qubits,
            check_samples: config.check_samples,
            outbound,
            pending: PendingResponses::new(),
            keys: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            events: events_tx,
            cancel: CancellationToken::new(),
        });

        let connection = tokio::spawn(run_connection(Arc::clone(&shared), framed, queue));

        Ok(Self {
            shared,
            connection: Some(connection),
            events: Mutex::new(Some(events_rx)),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.shared.hostname
    }

    /// The event stream. Only the first call gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events.lock().take()
    }

    /// The final key agreed with `peer`, if any.
    pub fn shared_key(&self, peer: &str) -> Option<Vec<bool>> {
        self.shared.keys.lock().get(peer).cloned()
    }

    pub fn has_key(&self, peer: &str) -> bool {
        self.shared.keys.lock().contains_key(peer)
    }

    /// Runs the initiator side of BB84 against `peer`.
    ///
    /// 1. `GET`: receive the peer's qubits and measure them in own bases.
    /// 2. `BASIS`: disclose own bases, sift to the returned coincidences.
    /// 3. `CHECK`: disclose a random sample of the sifted key.
    /// 4. Keep the rest on `True`, discard everything on `False`.
    ///
    /// A failed check is an [`KeyOutcome::Aborted`], not an error, and
    /// discards the key on both sides. Too few coincidences for the check
    /// also aborts, before `CHECK` is sent; a key agreed earlier survives
    /// that on both sides.
    pub async fn establish_key(&self, peer: &str) -> Result<KeyOutcome, ClientError> {
        self.check_target(peer)?;

        let stream = decode_stream(&self.request(peer, Opcode::Get, String::new()).await?)?;
        let qubits = stream.len();
        let mut session = Bb84Session::new(qubits)?;
        session.recv(stream)?;
        tracing::info!(
            peer,
            qubits,
            bits = %bits_to_string(session.raw_bits()),
            "received qubits"
        );

        let reply = self
            .request(peer, Opcode::Basis, payload::format_basis(session.basis()))
            .await?;
        let indices = payload::parse_indices(&reply)?;
        session.sift_to(&indices)?;
        let coincidences = indices.len();
        tracing::info!(peer, indices = %reply, coincidences, "sifted");

        let sample = match session.draw_sample(self.shared.check_samples) {
            Ok(sample) => sample,
            Err(QkdError::InsufficientKey {
                available,
                requested,
            }) => {
                // Nothing was disclosed and the peer's copy of any earlier
                // key is untouched, so ours stays too.
                tracing::warn!(peer, available, requested, "too few coincidences, aborting");
                return Ok(KeyOutcome::Aborted {
                    peer: peer.to_string(),
                    reason: AbortReason::InsufficientKey {
                        available,
                        requested,
                    },
                });
            }
            Err(e) => return Err(e.into()),
        };

        let verdict = self
            .request(peer, Opcode::Check, payload::format_check(&sample))
            .await?;
        let passed = payload::parse_verdict(&verdict)?;
        tracing::info!(peer, passed, "check result");

        if !passed {
            session.abort();
            self.shared.keys.lock().remove(peer);
            tracing::warn!(peer, "check failed, key discarded");
            return Ok(KeyOutcome::Aborted {
                peer: peer.to_string(),
                reason: AbortReason::CheckFailed,
            });
        }

        let key = session.finalize(&sample.indices)?.to_vec();
        let key_bits = key.len();
        tracing::info!(peer, key = %bits_to_string(&key), "final shared key");
        self.shared.keys.lock().insert(peer.to_string(), key);

        Ok(KeyOutcome::Established {
            peer: peer.to_string(),
            qubits,
            coincidences,
            key_bits,
        })
    }

    /// Enciphers `text` with the key shared with `peer` and sends it.
    pub fn send_message(&self, peer: &str, text: &str) -> Result<(), ClientError> {
        self.check_target(peer)?;
        let ciphertext = {
            let keys = self.shared.keys.lock();
            let key = keys
                .get(peer)
                .ok_or_else(|| ClientError::NoKey(peer.to_string()))?;
            cipher::encrypt(key, text)?
        };
        self.shared.send(&Envelope::request(
            Opcode::Msg,
            peer,
            self.shared.hostname.as_str(),
            ciphertext,
        ))
    }

    /// Leaves the relay and waits for the connection task to finish.
    pub async fn disconnect(mut self) {
        let dc = Envelope::request(Opcode::Dc, SERVER_NAME, self.shared.hostname.as_str(), "");
        if self.shared.send(&dc).is_err() {
            tracing::debug!("connection already closed");
        }
        self.shared.cancel.cancel();

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "connection task failed");
            }
        }
    }

    fn check_target(&self, peer: &str) -> Result<(), ClientError> {
        if peer == self.shared.hostname {
            return Err(ClientError::SelfTarget);
        }
        wire::validate_hostname(peer)?;
        Ok(())
    }

    /// Sends one request and waits for its `RES`, turning `ERR` into
    /// [`ClientError::Routing`].
    async fn request(
        &self,
        peer: &str,
        opcode: Opcode,
        payload: String,
    ) -> Result<String, ClientError> {
        let waiter = self.shared.pending.register(peer, opcode)?;
        let request = Envelope::request(opcode, peer, self.shared.hostname.as_str(), payload);
        if let Err(e) = self.shared.send(&request) {
            self.shared.pending.cancel(peer, opcode);
            return Err(e);
        }

        let reply = waiter.await.map_err(|_| ClientError::Disconnected)?;
        match reply.method {
            Method::Response(_) => Ok(reply.payload),
            method => Err(ClientError::Routing {
                peer: peer.to_string(),
                method,
                reason: reply.payload,
            }),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Shared {
    fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        self.outbound
            .send(envelope.to_bytes())
            .map_err(|_| ClientError::Disconnected)
    }

    fn emit(&self, event: ClientEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Handles one inbound envelope, returning the reply to send if any.
    fn dispatch(&self, envelope: Envelope) -> Option<Envelope> {
        match envelope.method {
            Method::Request(Opcode::Get) => Some(self.respond(&envelope, self.serve_get(&envelope))),
            Method::Request(Opcode::Basis) => {
                Some(self.respond(&envelope, self.serve_basis(&envelope)))
            }
            Method::Request(Opcode::Check) => {
                Some(self.respond(&envelope, self.serve_check(&envelope)))
            }
            Method::Request(Opcode::Msg) => {
                self.receive_message(envelope);
                None
            }
            Method::Request(Opcode::Dc) => {
                tracing::debug!(from = %envelope.sender, "ignoring DC addressed to a client");
                None
            }
            Method::Response(Some(_)) | Method::Error(Some(_)) => {
                if let Err(unclaimed) = self.pending.resolve(envelope) {
                    tracing::debug!(
                        method = %unclaimed.method,
                        from = %unclaimed.sender,
                        "reply nobody waits for"
                    );
                }
                None
            }
            Method::Response(None) | Method::Error(None) => {
                tracing::warn!(
                    method = %envelope.method,
                    reason = %envelope.payload,
                    "relay notice"
                );
                None
            }
        }
    }

    fn respond(&self, request: &Envelope, result: Result<String, ClientError>) -> Envelope {
        match result {
            Ok(payload) => request.reply(payload),
            Err(e) => {
                tracing::warn!(method = %request.method, from = %request.sender, error = %e, "request failed");
                request.error_reply(e.to_string())
            }
        }
    }

    /// Prepares a fresh session for the requesting peer and sends its qubits.
    fn serve_get(&self, request: &Envelope) -> Result<String, ClientError> {
        let mut session = Bb84Session::new(self.qubits)?;
        let stream = encode_stream(&session.send()?)?;
        self.sessions.lock().insert(request.sender.clone(), session);
        tracing::info!(peer = %request.sender, qubits = self.qubits, "sent qubits");
        Ok(stream)
    }

    fn serve_basis(&self, request: &Envelope) -> Result<String, ClientError> {
        let peer_basis = payload::parse_basis(&request.payload)?;

        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&request.sender)
            .ok_or_else(|| ClientError::NoSession(request.sender.clone()))?;
        let indices = match session.sift(&peer_basis) {
            Ok(indices) => indices,
            Err(e) => {
                sessions.remove(&request.sender);
                return Err(e.into());
            }
        };

        let reply = payload::format_indices(&indices);
        tracing::info!(peer = %request.sender, indices = %reply, "sifted");
        Ok(reply)
    }

    fn serve_check(&self, request: &Envelope) -> Result<String, ClientError> {
        let peer = &request.sender;
        // Pass or fail, the session ends here
        let mut session = self
            .sessions
            .lock()
            .remove(peer)
            .ok_or_else(|| ClientError::NoSession(peer.clone()))?;

        let passed = payload::parse_check(&request.payload)
            .map_err(ClientError::from)
            .and_then(|sample| {
                session
                    .check(&sample.indices, &sample.bits, CHECK_THRESHOLD)
                    .map_err(ClientError::from)
            });

        match passed {
            Ok(true) => {
                let key = session.into_final_key().unwrap_or_default();
                let key_bits = key.len();
                tracing::info!(peer = %peer, key = %bits_to_string(&key), "check passed");
                self.keys.lock().insert(peer.clone(), key);
                self.emit(ClientEvent::KeyEstablished {
                    peer: peer.clone(),
                    key_bits,
                });
                Ok(payload::format_verdict(true).to_string())
            }
            Ok(false) => {
                self.discard_key(peer);
                Ok(payload::format_verdict(false).to_string())
            }
            Err(e) => {
                self.discard_key(peer);
                Err(e)
            }
        }
    }

    fn discard_key(&self, peer: &str) {
        self.keys.lock().remove(peer);
        tracing::warn!(peer, "check failed, key discarded");
        self.emit(ClientEvent::KeyDiscarded {
            peer: peer.to_string(),
        });
    }

    fn receive_message(&self, envelope: Envelope) {
        let text = {
            let keys = self.keys.lock();
            let Some(key) = keys.get(&envelope.sender) else {
                tracing::warn!(from = %envelope.sender, "message from peer without a key dropped");
                return;
            };
            cipher::decrypt(key, &envelope.payload)
        };

        match text {
            Ok(text) => self.emit(ClientEvent::Message {
                from: envelope.sender,
                text,
            }),
            Err(e) => tracing::warn!(from = %envelope.sender, error = %e, "undecipherable message"),
        }
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    mut framed: Transport,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
) {
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                // Flush what the caller queued before asking to stop (DC)
                while let Ok(frame) = queue.try_recv() {
                    if framed.send(frame).await.is_err() {
                        break;
                    }
                }
                if let Err(e) = SinkExt::<Bytes>::close(&mut framed).await {
                    tracing::debug!(error = %e, "close failed");
                }
                break;
            }

            outbound = queue.recv() => {
                let Some(frame) = outbound else { break };
                if let Err(e) = framed.send(frame).await {
                    tracing::warn!(error = %e, "write to relay failed");
                    break;
                }
            }

            inbound = framed.next() => {
                let frame = match inbound {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "read from relay failed");
                        break;
                    }
                    None => {
                        tracing::info!("relay closed the connection");
                        break;
                    }
                };

                let envelope = match Envelope::parse(&frame) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping malformed envelope");
                        continue;
                    }
                };

                if let Some(reply) = shared.dispatch(envelope) {
                    if let Err(e) = framed.send(reply.to_bytes()).await {
                        tracing::warn!(error = %e, "write to relay failed");
                        break;
                    }
                }
            }
        }
    }

    // Close the queue first so a request issued from here on fails to send
    // instead of registering a waiter nobody will wake
    shared.cancel.cancel();
    drop(queue);
    tracing::debug!(waiting = shared.pending.len(), "connection closed, waking waiters");
    shared.pending.close_all();
    shared.emit(ClientEvent::Disconnected);
}
