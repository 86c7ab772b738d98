use crate::cipher::CipherError;
use crate::config::ConfigError;
use crate::errors::QkdError;
use crate::net::envelope::{Method, Opcode};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Envelope is not valid UTF-8")]
    NotUtf8,

    #[error("Envelope has no blank line between header and payload")]
    MissingBody,

    #[error("Envelope header must be exactly two lines")]
    MalformedHeader,

    #[error("First header line has no target")]
    MissingTarget,

    #[error("Unknown method: {0:?}")]
    UnknownMethod(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Invalid basis symbol {0:?}, expected '0' or '1'")]
    InvalidBasis(char),

    #[error("Invalid index: {0:?}")]
    InvalidIndex(String),

    #[error("Invalid bit: {0:?}")]
    InvalidBit(String),

    #[error("Check payload must hold an index line and a bit line")]
    MalformedCheck,

    #[error("Invalid check verdict: {0:?}")]
    InvalidVerdict(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostnameError {
    #[error("Hostname is empty")]
    Empty,

    #[error("Hostname is {0} bytes long, at most 64 fit")]
    TooLong(usize),

    #[error("Hostname must not contain whitespace")]
    Whitespace,

    #[error("Hostname is not valid UTF-8")]
    NotUtf8,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Relay refused registration: {0}")]
    RegistrationConflict(String),

    #[error("{method} to {peer} failed: {reason}")]
    Routing {
        peer: String,
        method: Method,
        reason: String,
    },

    #[error("A {opcode} request to {peer} is already outstanding")]
    RequestOutstanding { peer: String, opcode: Opcode },

    #[error("Disconnected from relay")]
    Disconnected,

    #[error("No shared key with {0}")]
    NoKey(String),

    #[error("No key exchange in progress with {0}")]
    NoSession(String),

    #[error("Target cannot be yourself")]
    SelfTarget,

    #[error("Unexpected reply: {0}")]
    Protocol(String),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Key exchange error: {0}")]
    Qkd(#[from] QkdError),

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Invalid hostname: {0}")]
    Hostname(#[from] HostnameError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
