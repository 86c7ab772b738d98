//! Utility functions for register operations.
//!
//! This module contains helper functions for:
//! - Axis permutations used by the single-axis tensor contraction.
//! - Conversions between computational basis indices and per-qubit bits.
//! - Normalization checks on amplitude vectors.

use num_complex::Complex64;

/// Tolerance used when checking that a vector has unit norm.
pub const NORM_TOLERANCE: f64 = 1e-9;

/// Axis order that moves `axis` to the last position, keeping the others in order.
pub fn axis_to_back(num_axes: usize, axis: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..num_axes).filter(|&a| a != axis).collect();
    order.push(axis);
    order
}

/// Inverse of an axis permutation.
///
/// If `b = a.permuted_axes(order)` then `b.permuted_axes(inverse_permutation(order)) == a`.
pub fn inverse_permutation(order: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; order.len()];
    for (position, &axis) in order.iter().enumerate() {
        inverse[axis] = position;
    }
    inverse
}

/// Splits a row-major basis index into one bit per qubit.
///
/// Axis 0 is the most significant bit, matching the memory order of a
/// standard-layout tensor of shape `[2; num_qubits]`.
pub fn index_to_bits(value: usize, num_qubits: usize) -> Vec<usize> {
    (0..num_qubits)
        .map(|axis| (value >> (num_qubits - 1 - axis)) & 1)
        .collect()
}

/// Sum of squared magnitudes.
pub fn norm_sqr<'a>(amplitudes: impl IntoIterator<Item = &'a Complex64>) -> f64 {
    amplitudes.into_iter().map(|c| c.norm_sqr()).sum()
}

/// Find duplicate in a slice of usize
pub fn find_duplicate(indices: &[usize]) -> Option<usize> {
    let mut seen = std::collections::HashSet::new();
    indices.iter().find(|&&idx| !seen.insert(idx)).copied()
}
