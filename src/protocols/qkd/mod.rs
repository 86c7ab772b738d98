//! Quantum Key Distribution (QKD) Protocols.
//!
//! - **BB84**: prepare-and-measure key agreement over two conjugate bases,
//!   with sifting and a sacrificial check sample to detect interception.

pub mod bb84;
