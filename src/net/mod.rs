//! Relay networking: envelope codec, framing, the relay server and the
//! client that runs key agreement through it.

pub mod client;
pub mod envelope;
pub mod error;
pub mod payload;
mod pending;
pub mod relay;
pub mod wire;

pub use client::{AbortReason, Client, ClientEvent, KeyOutcome};
pub use envelope::{Envelope, Method, Opcode, SERVER_NAME};
pub use error::{ClientError, HostnameError, ParseError, PayloadError};
pub use relay::{Registry, RelayServer};
