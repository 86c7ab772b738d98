use crate::core::errors::StateError;
use crate::core::register::QuantumRegister;
use crate::core::utils;
use ndarray::{Axis, IxDyn};
use num_complex::Complex64;
use rand::Rng;

impl QuantumRegister {
    /// Marginal probability that qubit `index` reads 0.
    ///
    /// Sums the squared magnitudes over every basis state with that axis fixed
    /// to 0, normalized by the total probability mass.
    pub fn probability_of_zero(&self, index: usize) -> Result<f64, StateError> {
        self.validate_qubit_index(index)?;

        let p0 = utils::norm_sqr(self.amplitudes.index_axis(Axis(index), 0).iter());
        let p1 = utils::norm_sqr(self.amplitudes.index_axis(Axis(index), 1).iter());

        let total = p0 + p1;
        if total < 1e-12 {
            return Err(StateError::ZeroNorm);
        }

        Ok(p0 / total)
    }

    /// Physical measurement of one qubit in the computational basis, which
    /// collapses the register irretrievably.
    pub fn measure(&mut self, index: usize) -> Result<bool, StateError> {
        let p0 = self.probability_of_zero(index)?;

        let roll: f64 = rand::rng().random();
        let outcome = roll >= p0;

        // Zero the branch inconsistent with the outcome
        self.amplitudes
            .index_axis_mut(Axis(index), usize::from(!outcome))
            .fill(Complex64::new(0.0, 0.0));
        self.renormalize()?;

        Ok(outcome)
    }

    /// Measures every qubit at once, sampling a joint outcome over the whole
    /// computational basis, and collapses to it.
    ///
    /// Returns one bit per qubit in axis order.
    pub fn measure_all(&mut self) -> Result<Vec<bool>, StateError> {
        let mut probs = self.probabilities();
        let total: f64 = probs.iter().sum();
        if total < 1e-12 {
            return Err(StateError::ZeroNorm);
        }
        // Due to float, renormalization of probabilities to ensure completeness
        for p in &mut probs {
            *p /= total;
        }

        let outcome = pick_outcome(&probs, rand::rng().random());
        let index = utils::index_to_bits(outcome, self.num_qubits);

        self.amplitudes.fill(Complex64::new(0.0, 0.0));
        self.amplitudes[IxDyn(&index)] = Complex64::new(1.0, 0.0);

        Ok(index.into_iter().map(|bit| bit == 1).collect())
    }
}

/// Selects an outcome index from `probs` using the uniform draw `roll` in [0, 1).
pub(crate) fn pick_outcome(probs: &[f64], roll: f64) -> usize {
    let mut cumulative = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if roll < cumulative {
            return i;
        }
    }
    // Floating point shortfall: fall back to the last outcome with mass
    probs
        .iter()
        .rposition(|&p| p > 0.0)
        .unwrap_or(probs.len().saturating_sub(1))
}
