//! BB84 quantum key distribution between named peers over a message relay.
//!
//! The crate is layered bottom-up: a dense quantum register simulator, a
//! per-party BB84 session built on it, and a relay/client pair that runs the
//! handshake over TCP and uses the agreed key for XOR-enciphered chat.

pub mod cipher;
pub mod config;
mod core;
pub mod logging;
pub mod net;
pub mod protocols;
mod sampler;

pub use crate::core::{Gate, QuantumRegister, errors, utils};
pub use crate::sampler::Sampler;
