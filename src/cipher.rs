//! Toy symmetric cipher over an agreed BB84 key.
//!
//! The key bits are read as a big-endian integer and every character's code
//! point is XORed with its low 11 bits. A mask below `0x800` leaves bits 11
//! and up untouched, so a character never moves into the surrogate block or
//! past `char::MAX` and any key length enciphers any text. This hides nothing
//! from anyone who tries; it only demonstrates that both sides hold the same
//! key.

use thiserror::Error;

/// Bits of the key that reach the code points.
pub const MASK_BITS: u32 = 11;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("Key is empty")]
    EmptyKey,
}

/// Low 32 bits of the key read most significant bit first.
pub fn key_value(key: &[bool]) -> Result<u32, CipherError> {
    if key.is_empty() {
        return Err(CipherError::EmptyKey);
    }
    Ok(key
        .iter()
        .fold(0u32, |acc, &bit| (acc << 1) | u32::from(bit)))
}

fn mask(key: &[bool]) -> Result<u32, CipherError> {
    Ok(key_value(key)? & ((1 << MASK_BITS) - 1))
}

pub fn encrypt(key: &[bool], text: &str) -> Result<String, CipherError> {
    let mask = mask(key)?;
    Ok(text
        .chars()
        // bits 11.. are kept, so the result is a scalar whenever `c` is
        .map(|c| char::from_u32(u32::from(c) ^ mask).unwrap_or(c))
        .collect())
}

/// XOR is its own inverse.
pub fn decrypt(key: &[bool], text: &str) -> Result<String, CipherError> {
    encrypt(key, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(pattern: &str) -> Vec<bool> {
        pattern.chars().map(|c| c == '1').collect()
    }

    fn bits(value: u32, width: usize) -> Vec<bool> {
        key(&format!("{value:0width$b}"))
    }

    #[test]
    fn key_is_big_endian() {
        assert_eq!(key_value(&key("1")).unwrap(), 1);
        assert_eq!(key_value(&key("0101")).unwrap(), 5);
        assert_eq!(key_value(&key("1000")).unwrap(), 8);
    }

    #[test]
    fn long_keys_keep_low_bits() {
        let mut k = vec![true; 8];
        k.extend(bits(0x1234_5678, 32));
        assert_eq!(key_value(&k).unwrap(), 0x1234_5678);
        assert_eq!(mask(&k).unwrap(), 0x678);
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let k = key("101101");
        let text = "hello, bob! ¿qué tal? 量子";
        let cipher = encrypt(&k, text).unwrap();
        assert_ne!(cipher, text);
        assert_eq!(decrypt(&k, &cipher).unwrap(), text);
    }

    #[test]
    fn session_length_keys_encipher_text() {
        // 28 bits, what a 64-qubit exchange usually leaves
        let k = bits(0x0A5_5A5A, 28);
        let cipher = encrypt(&k, "hello bob").unwrap();
        assert_ne!(cipher, "hello bob");
        assert_eq!(decrypt(&k, &cipher).unwrap(), "hello bob");
    }

    #[test]
    fn every_scalar_survives_a_full_mask() {
        let k = bits(u32::MAX, 32);
        let samples = ['\0', 'a', '\u{7ff}', '\u{d7ff}', '\u{e000}', '\u{fffd}', '🦀', char::MAX];
        for c in samples {
            let text = c.to_string();
            let cipher = encrypt(&k, &text).unwrap();
            assert_eq!(decrypt(&k, &cipher).unwrap(), text, "{c:?}");
        }
        // next to the surrogate block, nothing crosses into it
        assert_eq!(encrypt(&k, "\u{d7ff}").unwrap(), "\u{d000}");
        assert_eq!(encrypt(&k, "\u{e000}").unwrap(), "\u{e7ff}");
    }

    #[test]
    fn zero_key_is_identity() {
        assert_eq!(encrypt(&key("0000"), "plain").unwrap(), "plain");
    }

    #[test]
    fn empty_key_is_rejected() {
        assert_eq!(encrypt(&[], "x"), Err(CipherError::EmptyKey));
    }
}
