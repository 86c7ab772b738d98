//! BB84 key agreement, one party at a time.
//!
//! A [`Bb84Session`] holds one side's bases and bits and walks the phases of
//! the protocol: encode or decode a qubit stream, sift on the coincidence
//! indices, sacrifice a sample to detect tampering, keep the rest as key.

use crate::core::utils::find_duplicate;
use crate::{QuantumRegister, Sampler, errors::QkdError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::seq::index;

/// Qubits per session when nothing else is configured.
pub const DEFAULT_SESSION_LENGTH: usize = 16;

/// Bits sacrificed by the check phase when nothing else is configured.
pub const DEFAULT_CHECK_SAMPLES: usize = 4;

/// Preparation/measurement frame of a qubit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Basis {
    /// Computational basis {|0>, |1>}.
    Rectilinear,
    /// Hadamard basis {|+>, |->}.
    Diagonal,
}

impl Basis {
    pub fn from_bit(bit: bool) -> Self {
        if bit { Basis::Diagonal } else { Basis::Rectilinear }
    }

    pub fn is_diagonal(self) -> bool {
        self == Basis::Diagonal
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BasisGenerated,
    Encoded,
    Decoded,
    Sifted,
    Checked,
    Aborted,
}

/// Indices disclosed for the check phase and the bits found there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSample {
    pub indices: Vec<usize>,
    pub bits: Vec<bool>,
}

/// One party's view of a BB84 exchange.
#[derive(Debug, Clone)]
pub struct Bb84Session {
    basis: Vec<Basis>,
    raw_bits: Vec<bool>,
    sifted: Vec<bool>,
    key: Vec<bool>,
    phase: Phase,
}

impl Bb84Session {
    /// Creates a session of `length` qubits with quantum-random bits and bases.
    pub fn new(length: usize) -> Result<Self, QkdError> {
        if length == 0 {
            return Err(QkdError::EmptySession);
        }

        let sampler = Sampler::new();
        let bits = sampler.random_bits(length)?;
        let basis = sampler
            .random_bits(length)?
            .into_iter()
            .map(Basis::from_bit)
            .collect();

        Self::with_choices(basis, bits)
    }

    /// Creates a session from explicit bases and bits.
    pub fn with_choices(basis: Vec<Basis>, bits: Vec<bool>) -> Result<Self, QkdError> {
        if basis.is_empty() {
            return Err(QkdError::EmptySession);
        }
        if basis.len() != bits.len() {
            return Err(QkdError::LengthMismatch {
                expected: basis.len(),
                got: bits.len(),
            });
        }

        Ok(Self {
            basis,
            raw_bits: bits,
            sifted: Vec::new(),
            key: Vec::new(),
            phase: Phase::BasisGenerated,
        })
    }

    pub fn len(&self) -> usize {
        self.basis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.basis.is_empty()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn basis(&self) -> &[Basis] {
        &self.basis
    }

    /// Bits before sifting: prepared bits for a sender, measured ones for a receiver.
    pub fn raw_bits(&self) -> &[bool] {
        &self.raw_bits
    }

    pub fn sifted_key(&self) -> &[bool] {
        &self.sifted
    }

    /// The agreed key, once the check has passed.
    pub fn final_key(&self) -> Option<&[bool]> {
        (self.phase == Phase::Checked).then_some(self.key.as_slice())
    }

    pub fn into_final_key(self) -> Option<Vec<bool>> {
        (self.phase == Phase::Checked).then_some(self.key)
    }

    fn expect_phase(&self, operation: &'static str, allowed: &[Phase]) -> Result<(), QkdError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(QkdError::InvalidPhase {
                operation,
                phase: self.phase,
            })
        }
    }

    /// Encodes every bit in its basis: |bit>, rotated when the basis is diagonal.
    pub fn send(&mut self) -> Result<Vec<QuantumRegister>, QkdError> {
        self.expect_phase(
            "send",
            &[Phase::BasisGenerated, Phase::Encoded, Phase::Decoded],
        )?;

        let mut stream = Vec::with_capacity(self.len());
        for (&basis, &bit) in self.basis.iter().zip(&self.raw_bits) {
            let mut qubit = QuantumRegister::qubit(bit);
            if basis.is_diagonal() {
                qubit.apply_rotation(0)?;
            }
            stream.push(qubit);
        }

        self.phase = Phase::Encoded;
        Ok(stream)
    }

    /// Measures an incoming stream, each qubit in this session's basis for
    /// its position, and keeps the outcomes as raw bits.
    pub fn recv(&mut self, stream: Vec<QuantumRegister>) -> Result<(), QkdError> {
        self.expect_phase("recv", &[Phase::BasisGenerated])?;
        if stream.len() != self.len() {
            return Err(QkdError::LengthMismatch {
                expected: self.len(),
                got: stream.len(),
            });
        }

        let mut bits = Vec::with_capacity(stream.len());
        for (position, (mut qubit, &basis)) in stream.into_iter().zip(&self.basis).enumerate() {
            if qubit.num_qubits() != 1 {
                return Err(QkdError::NotSingleQubit {
                    position,
                    num_qubits: qubit.num_qubits(),
                });
            }
            // Align basis
            if basis.is_diagonal() {
                qubit.apply_rotation(0)?;
            }
            bits.push(qubit.measure(0)?);
        }

        self.raw_bits = bits;
        self.phase = Phase::Decoded;
        Ok(())
    }

    /// Reconciles against the peer's bases and returns the coincidence
    /// indices, the only thing to disclose back.
    pub fn sift(&mut self, peer_basis: &[Basis]) -> Result<Vec<usize>, QkdError> {
        self.expect_phase("sift", &[Phase::Encoded, Phase::Decoded])?;
        if peer_basis.len() != self.len() {
            return Err(QkdError::LengthMismatch {
                expected: self.len(),
                got: peer_basis.len(),
            });
        }

        let indices = coincidences(&self.basis, peer_basis);
        self.sift_to(&indices)?;
        Ok(indices)
    }

    /// Keeps only the raw bits at `indices`, as computed by the peer.
    pub fn sift_to(&mut self, indices: &[usize]) -> Result<(), QkdError> {
        self.expect_phase("sift", &[Phase::Encoded, Phase::Decoded])?;
        validate_indices(indices, self.len())?;

        self.sifted = indices.iter().map(|&i| self.raw_bits[i]).collect();
        self.phase = Phase::Sifted;
        Ok(())
    }

    /// Draws `count` distinct sifted positions to disclose for the check.
    ///
    /// At least one bit has to survive the check, so the sifted key must be
    /// strictly longer than the sample. Otherwise the session aborts.
    pub fn draw_sample(&mut self, count: usize) -> Result<CheckSample, QkdError> {
        self.expect_phase("draw_sample", &[Phase::Sifted])?;
        if count == 0 {
            self.abort();
            return Err(QkdError::EmptySample);
        }
        if self.sifted.len() <= count {
            let available = self.sifted.len();
            self.abort();
            return Err(QkdError::InsufficientKey {
                available,
                requested: count,
            });
        }

        let mut indices = index::sample(&mut rand::rng(), self.sifted.len(), count).into_vec();
        indices.sort_unstable();
        let bits = indices.iter().map(|&i| self.sifted[i]).collect();

        Ok(CheckSample { indices, bits })
    }

    /// Compares the peer's disclosed bits with our own at `indices`.
    ///
    /// Returns `Ok(true)` and keeps the undisclosed remainder as final key
    /// when the match fraction reaches `threshold`, `Ok(false)` after
    /// aborting otherwise. A malformed sample aborts as well and is reported
    /// as an error.
    pub fn check(
        &mut self,
        indices: &[usize],
        sample_bits: &[bool],
        threshold: f64,
    ) -> Result<bool, QkdError> {
        self.expect_phase("check", &[Phase::Sifted])?;
        if let Err(err) = self.validate_sample(indices, sample_bits) {
            self.abort();
            return Err(err);
        }

        let matches = indices
            .iter()
            .zip(sample_bits)
            .filter(|&(&i, &bit)| self.sifted[i] == bit)
            .count();
        let fraction = matches as f64 / indices.len() as f64;

        if fraction < threshold {
            tracing::debug!(matches, sampled = indices.len(), "check sample disagrees");
            self.abort();
            return Ok(false);
        }

        self.finalize(indices)?;
        Ok(true)
    }

    fn validate_sample(&self, indices: &[usize], sample_bits: &[bool]) -> Result<(), QkdError> {
        if indices.is_empty() {
            return Err(QkdError::EmptySample);
        }
        if indices.len() != sample_bits.len() {
            return Err(QkdError::LengthMismatch {
                expected: indices.len(),
                got: sample_bits.len(),
            });
        }
        if self.sifted.len() <= indices.len() {
            return Err(QkdError::InsufficientKey {
                available: self.sifted.len(),
                requested: indices.len(),
            });
        }
        validate_indices(indices, self.sifted.len())
    }

    /// Strips the disclosed `indices` from the sifted key; what remains is the final key.
    pub fn finalize(&mut self, indices: &[usize]) -> Result<&[bool], QkdError> {
        self.expect_phase("finalize", &[Phase::Sifted])?;
        validate_indices(indices, self.sifted.len())?;

        self.key = self
            .sifted
            .iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, &bit)| bit)
            .collect();
        self.sifted.clear();
        self.phase = Phase::Checked;

        Ok(&self.key)
    }

    /// Discards every bit of key material.
    pub fn abort(&mut self) {
        self.raw_bits.clear();
        self.sifted.clear();
        self.key.clear();
        self.phase = Phase::Aborted;
    }
}

fn validate_indices(indices: &[usize], len: usize) -> Result<(), QkdError> {
    if let Some(&index) = indices.iter().find(|&&i| i >= len) {
        return Err(QkdError::IndexOutOfRange { index, len });
    }
    if let Some(dup) = find_duplicate(indices) {
        return Err(QkdError::DuplicateIndex(dup));
    }
    Ok(())
}

/// Positions where both parties chose the same basis.
pub fn coincidences(own: &[Basis], peer: &[Basis]) -> Vec<usize> {
    own.iter()
        .zip(peer)
        .enumerate()
        .filter(|(_, (a, b))| a == b)
        .map(|(i, _)| i)
        .collect()
}

/// Intercept-resend: measures a stream in fresh random bases, then re-encodes
/// what was measured in those same bases.
pub fn intercept_resend(stream: Vec<QuantumRegister>) -> Result<Vec<QuantumRegister>, QkdError> {
    let mut eve = Bb84Session::new(stream.len())?;
    eve.recv(stream)?;
    eve.send()
}

/// Serializes a qubit stream into a text-safe payload (JSON, then base64).
pub fn encode_stream(stream: &[QuantumRegister]) -> Result<String, QkdError> {
    let json = serde_json::to_vec(stream).map_err(|e| QkdError::Stream(e.to_string()))?;
    Ok(STANDARD.encode(json))
}

/// Inverse of [`encode_stream`]; every register is validated again.
pub fn decode_stream(payload: &str) -> Result<Vec<QuantumRegister>, QkdError> {
    let json = STANDARD
        .decode(payload.trim())
        .map_err(|e| QkdError::Stream(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| QkdError::Stream(e.to_string()))
}

/// Renders bits as a string of `0`/`1`.
pub fn bits_to_string(bits: &[bool]) -> String {
    bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bases(pattern: &str) -> Vec<Basis> {
        pattern.chars().map(|c| Basis::from_bit(c == '1')).collect()
    }

    fn bits(pattern: &str) -> Vec<bool> {
        pattern.chars().map(|c| c == '1').collect()
    }

    fn transmit(bit: bool, sent: Basis, measured: Basis) -> bool {
        let mut alice = Bb84Session::with_choices(vec![sent], vec![bit]).unwrap();
        let mut bob = Bb84Session::with_choices(vec![measured], vec![false]).unwrap();
        bob.recv(alice.send().unwrap()).unwrap();
        bob.raw_bits()[0]
    }

    #[test]
    fn new_session_has_random_choices_of_requested_length() {
        let session = Bb84Session::new(DEFAULT_SESSION_LENGTH).unwrap();
        assert_eq!(session.len(), DEFAULT_SESSION_LENGTH);
        assert_eq!(session.raw_bits().len(), DEFAULT_SESSION_LENGTH);
        assert_eq!(session.phase(), Phase::BasisGenerated);
        assert!(matches!(Bb84Session::new(0), Err(QkdError::EmptySession)));
    }

    #[test]
    fn matching_basis_always_reproduces_the_bit() {
        for _ in 0..250 {
            for basis in [Basis::Rectilinear, Basis::Diagonal] {
                for bit in [false, true] {
                    assert_eq!(transmit(bit, basis, basis), bit);
                }
            }
        }
    }

    #[test]
    fn mismatched_basis_is_a_coin_flip() {
        let trials = 1000;
        let kept = (0..trials)
            .filter(|i| {
                let bit = i % 2 == 0;
                let (sent, measured) = if i % 4 < 2 {
                    (Basis::Rectilinear, Basis::Diagonal)
                } else {
                    (Basis::Diagonal, Basis::Rectilinear)
                };
                transmit(bit, sent, measured) == bit
            })
            .count();
        let ratio = kept as f64 / trials as f64;
        assert!((0.4..=0.6).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn coincidences_are_symmetric() {
        for _ in 0..20 {
            let a = Bb84Session::new(32).unwrap();
            let b = Bb84Session::new(32).unwrap();
            assert_eq!(
                coincidences(a.basis(), b.basis()),
                coincidences(b.basis(), a.basis())
            );
        }
        assert_eq!(coincidences(&bases("0110"), &bases("0011")), vec![0, 2]);
    }

    #[test]
    fn honest_exchange_agrees_on_key() {
        let mut alice = Bb84Session::new(DEFAULT_SESSION_LENGTH).unwrap();
        let mut bob = Bb84Session::new(DEFAULT_SESSION_LENGTH).unwrap();
        bob.recv(alice.send().unwrap()).unwrap();

        let indices = alice.sift(bob.basis()).unwrap();
        bob.sift_to(&indices).unwrap();
        assert_eq!(alice.sifted_key(), bob.sifted_key());
        assert_eq!(
            indices.len(),
            coincidences(alice.basis(), bob.basis()).len()
        );

        if indices.len() <= DEFAULT_CHECK_SAMPLES {
            // Too few coincidences this round: the sample must fail closed
            assert!(matches!(
                bob.draw_sample(DEFAULT_CHECK_SAMPLES),
                Err(QkdError::InsufficientKey { .. })
            ));
            assert_eq!(bob.phase(), Phase::Aborted);
            return;
        }

        let sample = bob.draw_sample(DEFAULT_CHECK_SAMPLES).unwrap();
        assert!(alice.check(&sample.indices, &sample.bits, 1.0).unwrap());
        bob.finalize(&sample.indices).unwrap();

        let key = alice.final_key().unwrap();
        assert_eq!(key.len(), indices.len() - DEFAULT_CHECK_SAMPLES);
        assert_eq!(Some(key), bob.final_key());
    }

    #[test]
    fn check_strips_disclosed_positions() {
        let mut alice = Bb84Session::with_choices(bases("000000"), bits("101100")).unwrap();
        alice.send().unwrap();
        alice.sift(&bases("000000")).unwrap();

        assert!(alice.check(&[0, 2], &[true, true], 1.0).unwrap());
        assert_eq!(alice.final_key().unwrap(), bits("0100").as_slice());
        assert!(alice.sifted_key().is_empty());
    }

    #[test]
    fn disagreeing_sample_aborts_and_discards() {
        let mut alice = Bb84Session::with_choices(bases("0000"), bits("1011")).unwrap();
        alice.send().unwrap();
        alice.sift(&bases("0000")).unwrap();

        assert!(!alice.check(&[0, 1], &[true, true], 1.0).unwrap());
        assert_eq!(alice.phase(), Phase::Aborted);
        assert!(alice.final_key().is_none());
        assert!(alice.raw_bits().is_empty());
    }

    #[test]
    fn threshold_allows_partial_agreement() {
        let mut alice = Bb84Session::with_choices(bases("00000"), bits("10110")).unwrap();
        alice.send().unwrap();
        alice.sift(&bases("00000")).unwrap();

        assert!(alice.check(&[0, 1, 2, 3], &[true, true, true, true], 0.75).unwrap());
        assert_eq!(alice.final_key().unwrap(), &[false]);
    }

    #[test]
    fn malformed_samples_fail_closed() {
        let sifted = || {
            let mut s = Bb84Session::with_choices(bases("0000"), bits("1011")).unwrap();
            s.send().unwrap();
            s.sift(&bases("0000")).unwrap();
            s
        };

        let mut s = sifted();
        assert!(matches!(
            s.check(&[7], &[true], 1.0),
            Err(QkdError::IndexOutOfRange { index: 7, len: 4 })
        ));
        assert_eq!(s.phase(), Phase::Aborted);

        let mut s = sifted();
        assert!(matches!(
            s.check(&[1, 1], &[false, false], 1.0),
            Err(QkdError::DuplicateIndex(1))
        ));

        let mut s = sifted();
        assert!(matches!(
            s.check(&[0, 1, 2, 3], &[true, false, true, true], 1.0),
            Err(QkdError::InsufficientKey { .. })
        ));

        let mut s = sifted();
        assert!(matches!(s.check(&[], &[], 1.0), Err(QkdError::EmptySample)));
        assert_eq!(s.phase(), Phase::Aborted);
    }

    #[test]
    fn draw_sample_picks_distinct_sorted_indices() {
        let mut s = Bb84Session::with_choices(bases("0000000000"), bits("0110100111")).unwrap();
        s.send().unwrap();
        s.sift(&bases("0000000000")).unwrap();

        let sample = s.draw_sample(6).unwrap();
        assert_eq!(sample.indices.len(), 6);
        assert!(sample.indices.windows(2).all(|w| w[0] < w[1]));
        for (&i, &bit) in sample.indices.iter().zip(&sample.bits) {
            assert_eq!(s.sifted_key()[i], bit);
        }
    }

    #[test]
    fn phases_are_enforced() {
        let mut s = Bb84Session::new(4).unwrap();
        assert!(matches!(
            s.sift(&bases("0000")),
            Err(QkdError::InvalidPhase { operation: "sift", .. })
        ));
        s.send().unwrap();
        assert!(matches!(
            s.recv(Vec::new()),
            Err(QkdError::InvalidPhase { operation: "recv", .. })
        ));
    }

    #[test]
    fn recv_rejects_wrong_stream_length() {
        let mut bob = Bb84Session::new(4).unwrap();
        let stream = vec![QuantumRegister::qubit(false); 3];
        assert!(matches!(
            bob.recv(stream),
            Err(QkdError::LengthMismatch { expected: 4, got: 3 })
        ));
    }

    #[test]
    fn sift_to_rejects_foreign_indices() {
        let mut bob = Bb84Session::new(4).unwrap();
        bob.send().unwrap();
        assert!(matches!(
            bob.sift_to(&[0, 4]),
            Err(QkdError::IndexOutOfRange { index: 4, len: 4 })
        ));
    }

    #[test]
    fn stream_survives_text_encoding() {
        let mut alice = Bb84Session::new(8).unwrap();
        let stream = alice.send().unwrap();

        let payload = encode_stream(&stream).unwrap();
        assert!(!payload.contains('\n'));
        let decoded = decode_stream(&payload).unwrap();
        assert_eq!(decoded.len(), stream.len());
        for (a, b) in decoded.iter().zip(&stream) {
            assert_eq!(a.probabilities().len(), 2);
            for (x, y) in a.amplitudes().iter().zip(b.amplitudes().iter()) {
                assert!((x - y).norm() < 1e-12);
            }
        }

        assert!(matches!(decode_stream("not base64!"), Err(QkdError::Stream(_))));
    }

    #[test]
    fn intercept_resend_disturbs_sifted_bits() {
        let mut disagreements = 0;
        let mut compared = 0;
        for _ in 0..20 {
            let mut alice = Bb84Session::new(64).unwrap();
            let mut bob = Bb84Session::new(64).unwrap();
            let tampered = intercept_resend(alice.send().unwrap()).unwrap();
            bob.recv(tampered).unwrap();

            let indices = alice.sift(bob.basis()).unwrap();
            bob.sift_to(&indices).unwrap();
            compared += indices.len();
            disagreements += alice
                .sifted_key()
                .iter()
                .zip(bob.sifted_key())
                .filter(|(a, b)| a != b)
                .count();
        }
        // Roughly a quarter of sifted bits flip under intercept-resend
        let rate = disagreements as f64 / compared as f64;
        assert!((0.15..=0.35).contains(&rate), "rate {rate}");
    }
}
