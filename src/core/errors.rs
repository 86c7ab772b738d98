use crate::protocols::qkd::bb84::Phase;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum GateError {
    #[error("Matrix is not Unitary (U†U != I)")]
    NonUnitary,

    #[error("Matrix must be square")]
    NotSquareMatrix,

    #[error("Invalid Dimensions")]
    InvalidDimensions,

    #[error("Gate acts on {0} qubits, only single-qubit gates can be contracted")]
    UnsupportedArity(usize),
}

#[derive(Error, Debug, Clone)]
pub enum StateError {
    #[error("A register needs at least one qubit")]
    NoQubits,

    #[error("Basis value {value} does not fit in {num_qubits} qubits")]
    InvalidBasisValue { value: usize, num_qubits: usize },

    #[error("Vector is not normalized. Norm squared: {0}")]
    NotNormalized(f64),

    #[error("Invalid dimensions")]
    InvalidDimensions,

    #[error("Qubit index out of bounds")]
    IndexOutOfBounds { index: usize, num_qubits: usize },

    #[error("Register has no probability mass left to measure")]
    ZeroNorm,

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Gate error: {0}")]
    GateError(#[from] GateError),
}

#[derive(Error, Debug, Clone)]
pub enum QkdError {
    #[error("Session length must be at least 1")]
    EmptySession,

    #[error("`{operation}` is not allowed in phase {phase:?}")]
    InvalidPhase {
        operation: &'static str,
        phase: Phase,
    },

    #[error("Length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("Qubit {position} of the stream spans {num_qubits} qubits")]
    NotSingleQubit { position: usize, num_qubits: usize },

    #[error("Index {index} is out of range for {len} bits")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Duplicate index found: {0}")]
    DuplicateIndex(usize),

    #[error("Check sample is empty")]
    EmptySample,

    #[error("Sifted key holds {available} bits, a check of {requested} needs more")]
    InsufficientKey { available: usize, requested: usize },

    #[error("Qubit stream could not be decoded: {0}")]
    Stream(String),

    #[error("State error: {0}")]
    State(#[from] StateError),
}
