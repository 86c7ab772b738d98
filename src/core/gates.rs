use crate::core::errors::GateError;
use ndarray::{Array2, arr2};
use num_complex::Complex64;

/// Represents a quantum gate.
///
/// A gate is defined by its unitary matrix and the number of qubits it acts on.
#[derive(Clone, Debug)]
pub struct Gate {
    /// The unitary matrix of the gate.
    pub matrix: Array2<Complex64>,
    /// The number of qubits the gate acts on.
    pub num_qubits: usize,
}

impl Gate {
    /// Creates a new `Gate` from a unitary matrix.
    ///
    /// # Arguments
    ///
    /// * `matrix` - A square, unitary `Array2<Complex64>`.
    ///
    /// # Errors
    ///
    /// Returns a `GateError` if:
    /// - The matrix is not square.
    /// - The matrix dimensions are not a power of 2.
    /// - The matrix is not unitary.
    pub fn new(matrix: Array2<Complex64>) -> Result<Self, GateError> {
        let (rows, cols) = matrix.dim();

        if rows != cols {
            return Err(GateError::NotSquareMatrix);
        }

        if rows < 2 || !rows.is_power_of_two() {
            return Err(GateError::InvalidDimensions);
        }

        if !Self::check_unitary(&matrix) {
            return Err(GateError::NonUnitary);
        }

        let num_qubits = rows.trailing_zeros() as usize;

        Ok(Self { matrix, num_qubits })
    }

    /// Checks if a given matrix is unitary
    fn check_unitary(matrix: &Array2<Complex64>) -> bool {
        let (rows, _) = matrix.dim();
        let eye = Array2::<Complex64>::eye(rows);

        let u_dagger = matrix.t().mapv(|x| x.conj());
        let product = matrix.dot(&u_dagger);

        product
            .iter()
            .zip(eye.iter())
            .all(|(a, b)| (*a - *b).norm() < 1e-9)
    }

    /// Builds a single-qubit gate from a matrix known to be unitary.
    fn single(matrix: [[Complex64; 2]; 2]) -> Gate {
        Gate {
            matrix: arr2(&matrix),
            num_qubits: 1,
        }
    }

    // --- Standard Gates ---

    /// Creates a Pauli-X gate (NOT gate).
    pub fn x() -> Gate {
        Gate::single([
            [Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)],
            [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
        ])
    }

    /// Creates a Hadamard gate.
    ///
    /// This is the basis rotation of BB84: it maps the rectilinear basis onto
    /// the diagonal one and, being its own inverse, back again.
    pub fn h() -> Gate {
        let factor = 1.0 / 2.0_f64.sqrt();
        Gate::single([
            [Complex64::new(factor, 0.0), Complex64::new(factor, 0.0)],
            [Complex64::new(factor, 0.0), Complex64::new(-factor, 0.0)],
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_gates_are_unitary() {
        for gate in [Gate::x(), Gate::h()] {
            assert!(Gate::check_unitary(&gate.matrix));
            assert_eq!(gate.num_qubits, 1);
        }
    }

    #[test]
    fn new_rejects_non_unitary_matrix() {
        let matrix = arr2(&[
            [Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)],
            [Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)],
        ]);
        assert!(matches!(Gate::new(matrix), Err(GateError::NonUnitary)));
    }

    #[test]
    fn new_rejects_bad_shapes() {
        let rect = Array2::<Complex64>::zeros((2, 3));
        assert!(matches!(Gate::new(rect), Err(GateError::NotSquareMatrix)));

        let three = Array2::<Complex64>::eye(3);
        assert!(matches!(Gate::new(three), Err(GateError::InvalidDimensions)));
    }

    #[test]
    fn new_accepts_two_qubit_unitary() {
        let gate = Gate::new(Array2::<Complex64>::eye(4)).unwrap();
        assert_eq!(gate.num_qubits, 2);
    }
}
