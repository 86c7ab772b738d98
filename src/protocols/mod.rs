//! Quantum Cryptography Protocols.
//!
//! Only key distribution lives here for now, see [`qkd`].

pub mod qkd;
pub use qkd::bb84;
