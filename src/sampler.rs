use crate::{QuantumRegister, errors::StateError};

/// Widest register the sampler superposes at once (2^12 amplitudes).
pub const MAX_CHUNK_QUBITS: usize = 12;

/// A quantum random source and shot sampler.
///
/// Random bits come from measuring registers in equal superposition rather
/// than from a pseudo-random generator. Long strings are built from chunks of
/// at most `chunk_qubits` qubits so the dense tensor stays small.
#[derive(Debug, Clone)]
pub struct Sampler {
    chunk_qubits: usize,
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    /// Creates a new `Sampler` using the widest allowed chunk.
    pub fn new() -> Self {
        Self {
            chunk_qubits: MAX_CHUNK_QUBITS,
        }
    }

    /// Sets the chunk width, clamped to `1..=MAX_CHUNK_QUBITS`.
    pub fn with_chunk_qubits(mut self, chunk_qubits: usize) -> Self {
        self.chunk_qubits = chunk_qubits.clamp(1, MAX_CHUNK_QUBITS);
        self
    }

    /// Draws `count` uniformly random bits.
    ///
    /// Every qubit of a fresh |0...0> register is rotated into equal
    /// superposition and the whole register is measured at once.
    pub fn random_bits(&self, count: usize) -> Result<Vec<bool>, StateError> {
        let mut bits = Vec::with_capacity(count);

        while bits.len() < count {
            let width = (count - bits.len()).min(self.chunk_qubits);
            let mut register = QuantumRegister::new(width)?;
            for qubit in 0..width {
                register.apply_rotation(qubit)?;
            }
            bits.extend(register.measure_all()?);
        }

        Ok(bits)
    }

    /// Measures qubit `index` of a copy of `register` `num_shots` times.
    ///
    /// Returns how often 0 and 1 were observed; `register` itself is left
    /// untouched.
    pub fn run(
        &self,
        register: &QuantumRegister,
        index: usize,
        num_shots: usize,
    ) -> Result<[usize; 2], StateError> {
        let mut counts = [0usize; 2];

        for _ in 0..num_shots {
            // Clones the register to not collapse it
            let mut copy = register.clone();
            let outcome = copy.measure(index)?;
            counts[usize::from(outcome)] += 1;
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bits_has_requested_length() {
        let sampler = Sampler::new();
        assert!(sampler.random_bits(0).unwrap().is_empty());
        assert_eq!(sampler.random_bits(1).unwrap().len(), 1);
        assert_eq!(sampler.random_bits(40).unwrap().len(), 40);
    }

    #[test]
    fn random_bits_are_roughly_balanced() {
        let bits = Sampler::new().with_chunk_qubits(4).random_bits(2000).unwrap();
        let ones = bits.iter().filter(|&&b| b).count();
        assert!((800..=1200).contains(&ones), "ones {ones}");
    }

    #[test]
    fn chunk_width_is_clamped() {
        assert_eq!(Sampler::new().with_chunk_qubits(0).chunk_qubits, 1);
        assert_eq!(
            Sampler::new().with_chunk_qubits(64).chunk_qubits,
            MAX_CHUNK_QUBITS
        );
    }

    #[test]
    fn run_leaves_register_untouched() {
        let mut register = QuantumRegister::qubit(false);
        register.apply_rotation(0).unwrap();
        let before = register.clone();

        let counts = Sampler::new().run(&register, 0, 1000).unwrap();
        assert_eq!(counts[0] + counts[1], 1000);
        assert!(counts[0] > 350 && counts[1] > 350, "{counts:?}");
        assert_eq!(register, before);
    }

    #[test]
    fn run_on_basis_state_is_deterministic() {
        let register = QuantumRegister::qubit(true);
        assert_eq!(Sampler::new().run(&register, 0, 50).unwrap(), [0, 50]);
    }
}
