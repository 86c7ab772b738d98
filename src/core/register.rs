use crate::core::Gate;
use crate::core::errors::{GateError, StateError};
use crate::core::utils::{self, NORM_TOLERANCE};
use ndarray::{ArrayD, IxDyn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Dense state vector of a register of qubits.
///
/// Amplitudes are stored as a rank-n tensor with one axis of length 2 per
/// qubit, so a gate on qubit `k` is a contraction over axis `k` alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RegisterRepr", into = "RegisterRepr")]
pub struct QuantumRegister {
    pub(crate) amplitudes: ArrayD<Complex64>,
    pub(crate) num_qubits: usize,
}

/// Flat form used on the wire.
#[derive(Serialize, Deserialize)]
struct RegisterRepr {
    qubits: usize,
    amplitudes: Vec<Complex64>,
}

impl QuantumRegister {
    /// Creates a new register initialized to |0...0>.
    pub fn new(num_qubits: usize) -> Result<Self, StateError> {
        Self::from_basis_state(num_qubits, 0)
    }

    /// Creates a register in the computational basis state |value>.
    ///
    /// `value` is read row-major: qubit 0 is the most significant bit.
    pub fn from_basis_state(num_qubits: usize, value: usize) -> Result<Self, StateError> {
        if num_qubits == 0 {
            return Err(StateError::NoQubits);
        }
        if num_qubits >= usize::BITS as usize || value >> num_qubits != 0 {
            return Err(StateError::InvalidBasisValue { value, num_qubits });
        }

        let mut amplitudes = ArrayD::<Complex64>::zeros(IxDyn(&vec![2; num_qubits]));
        let index = utils::index_to_bits(value, num_qubits);
        amplitudes[IxDyn(&index)] = Complex64::new(1.0, 0.0);

        Ok(Self {
            amplitudes,
            num_qubits,
        })
    }

    /// A single qubit holding a classical bit.
    pub fn qubit(bit: bool) -> Self {
        let mut amplitudes = ArrayD::<Complex64>::zeros(IxDyn(&[2]));
        amplitudes[IxDyn(&[bit as usize])] = Complex64::new(1.0, 0.0);
        Self {
            amplitudes,
            num_qubits: 1,
        }
    }

    /// Creates a register from a row-major amplitude vector of length 2^n.
    pub fn from_state_vector(vector: Vec<Complex64>) -> Result<Self, StateError> {
        Self::check_vector_state(&vector)?;

        let num_qubits = vector.len().trailing_zeros() as usize;
        let amplitudes = ArrayD::from_shape_vec(IxDyn(&vec![2; num_qubits]), vector)?;

        Ok(Self {
            amplitudes,
            num_qubits,
        })
    }

    /// Validates that the input vector is a valid quantum state.
    fn check_vector_state(vector: &[Complex64]) -> Result<(), StateError> {
        let dim = vector.len();

        // Dimension must be a power of 2 and hold at least one qubit
        if dim < 2 || !dim.is_power_of_two() {
            return Err(StateError::InvalidDimensions);
        }

        // Sum of squared amplitudes must be 1.
        let norm_sqr = utils::norm_sqr(vector);
        if (norm_sqr - 1.0).abs() > NORM_TOLERANCE {
            return Err(StateError::NotNormalized(norm_sqr));
        }

        Ok(())
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    pub fn amplitudes(&self) -> &ArrayD<Complex64> {
        &self.amplitudes
    }

    /// Born-rule probability of every basis state, row-major.
    pub fn probabilities(&self) -> Vec<f64> {
        self.amplitudes.iter().map(|c| c.norm_sqr()).collect()
    }

    /// Total probability mass. 1 for every observable register.
    pub fn norm_sqr(&self) -> f64 {
        utils::norm_sqr(self.amplitudes.iter())
    }

    /// Checks if a given index is within the register's range
    pub(crate) fn validate_qubit_index(&self, index: usize) -> Result<(), StateError> {
        if index >= self.num_qubits {
            return Err(StateError::IndexOutOfBounds {
                index,
                num_qubits: self.num_qubits,
            });
        }
        Ok(())
    }

    /// Applies a single-qubit gate to qubit `index`.
    ///
    /// The addressed axis is moved last, contracted against the gate as a
    /// `(2^(n-1), 2) x (2, 2)` product and the original axis order restored.
    pub fn apply(&mut self, gate: &Gate, index: usize) -> Result<(), StateError> {
        if gate.num_qubits != 1 {
            return Err(GateError::UnsupportedArity(gate.num_qubits).into());
        }
        self.validate_qubit_index(index)?;

        let n = self.num_qubits;
        let order = utils::axis_to_back(n, index);
        let rows = self.amplitudes.len() / 2;

        let flat = self
            .amplitudes
            .view()
            .permuted_axes(order.clone())
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((rows, 2))?;

        // psi'[.., j] = sum_i psi[.., i] * U[j, i]
        let contracted = flat.dot(&gate.matrix.t());

        let restored = contracted
            .into_shape_with_order(vec![2; n])?
            .permuted_axes(utils::inverse_permutation(&order));

        self.amplitudes = restored.as_standard_layout().into_owned();

        Ok(())
    }

    /// Rotates qubit `index` between the rectilinear and diagonal bases.
    pub fn apply_rotation(&mut self, index: usize) -> Result<(), StateError> {
        self.apply(&Gate::h(), index)
    }

    /// Rescales the amplitudes back to unit norm.
    pub(crate) fn renormalize(&mut self) -> Result<(), StateError> {
        let norm = self.norm_sqr().sqrt();
        if norm < 1e-12 {
            return Err(StateError::ZeroNorm);
        }
        self.amplitudes.mapv_inplace(|c| c / norm);
        Ok(())
    }
}

impl TryFrom<RegisterRepr> for QuantumRegister {
    type Error = StateError;

    fn try_from(repr: RegisterRepr) -> Result<Self, Self::Error> {
        if repr.qubits == 0 || repr.qubits >= usize::BITS as usize {
            return Err(StateError::NoQubits);
        }
        if repr.amplitudes.len() != 1 << repr.qubits {
            return Err(StateError::InvalidDimensions);
        }
        Self::from_state_vector(repr.amplitudes)
    }
}

impl From<QuantumRegister> for RegisterRepr {
    fn from(register: QuantumRegister) -> Self {
        RegisterRepr {
            qubits: register.num_qubits,
            amplitudes: register.amplitudes.iter().copied().collect(),
        }
    }
}
