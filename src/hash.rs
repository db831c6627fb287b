//! Deterministic 32-bit hashing and simhash fingerprinting.
//!
//! [`hash32`] is a seeded CRC32 used wherever the store needs a stable,
//! reproducible 32-bit value: group key derivation and the per-dimension
//! words of [`simhash`]. It is not a cryptographic hash; block content
//! hashes use SHA-256 in [`crate::blocks`].

/// Seeded deterministic 32-bit hash of a byte slice.
pub fn hash32(data: &[u8], seed: u32) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(seed);
    hasher.update(data);
    hasher.finalize()
}

/// Convenience wrapper over [`hash32`] for strings.
pub fn hash32_str(text: &str, seed: u32) -> u32 {
    hash32(text.as_bytes(), seed)
}

/// Locality-sensitive 32-bit fingerprint of a float vector.
///
/// Each dimension index is hashed (with the seed) to a 32-bit word; for
/// each of the 32 bit positions the dimension's weight is added to a
/// floating accumulator when that bit is set, subtracted otherwise. The
/// output bit at each position is the sign of its accumulator.
///
/// Deterministic for a given `(vec, seed)` pair. Nearby vectors tend to
/// share most bits; distinct inputs or seeds usually, but not
/// guaranteedly, differ.
pub fn simhash(vec: &[f32], seed: u32) -> u32 {
    let mut acc = [0.0f32; 32];
    for (dim, &weight) in vec.iter().enumerate() {
        let word = hash32(&(dim as u32).to_le_bytes(), seed);
        for (bit, slot) in acc.iter_mut().enumerate() {
            if word >> bit & 1 == 1 {
                *slot += weight;
            } else {
                *slot -= weight;
            }
        }
    }

    let mut out = 0u32;
    for (bit, &slot) in acc.iter().enumerate() {
        if slot > 0.0 {
            out |= 1 << bit;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash32_deterministic() {
        assert_eq!(hash32_str("alpha", 7), hash32_str("alpha", 7));
    }

    #[test]
    fn test_hash32_seed_changes_output() {
        assert_ne!(hash32_str("alpha", 1), hash32_str("alpha", 2));
    }

    #[test]
    fn test_hash32_input_changes_output() {
        assert_ne!(hash32_str("alpha", 1), hash32_str("beta", 1));
    }

    #[test]
    fn test_simhash_deterministic() {
        let v = vec![0.5, -0.25, 1.0, 0.125];
        assert_eq!(simhash(&v, 42), simhash(&v, 42));
    }

    #[test]
    fn test_simhash_seed_sensitivity() {
        let v = vec![0.5, -0.25, 1.0, 0.125, 0.7, -0.9];
        assert_ne!(simhash(&v, 1), simhash(&v, 99));
    }

    #[test]
    fn test_simhash_similar_vectors_share_bits() {
        let a = vec![1.0, 0.5, -0.3, 0.8, 0.2, -0.6, 0.4, 0.9];
        let mut b = a.clone();
        b[0] += 0.01;
        let diff = (simhash(&a, 3) ^ simhash(&b, 3)).count_ones();
        assert!(diff <= 4, "near-identical vectors differ in {} bits", diff);
    }

    #[test]
    fn test_simhash_empty_vector() {
        assert_eq!(simhash(&[], 5), 0);
    }
}
