pub mod errors;
mod gates;
mod measurements;
mod register;
pub mod utils;

pub use gates::Gate;
pub use register::QuantumRegister;
