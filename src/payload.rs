//! Test payload generation

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::checksum::Checksum;

/// Generated object content together with its digest.
#[derive(Debug, Clone)]
pub struct Payload {
    pub data: Bytes,
    pub checksum: Checksum,
}

impl Payload {
    /// Pseudo-random bytes. With a seed the output is reproducible,
    /// otherwise the generator is seeded from the OS.
    pub fn generate(size: usize, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut buf = vec![0u8; size];
        rng.fill_bytes(&mut buf);
        let checksum = Checksum::compute(&buf);
        Self { data: Bytes::from(buf), checksum }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_payload_is_deterministic() {
        let a = Payload::generate(4096, Some(42));
        let b = Payload::generate(4096, Some(42));
        assert_eq!(a.data, b.data);
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.len(), 4096);
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = Payload::generate(256, Some(1));
        let b = Payload::generate(256, Some(2));
        assert_ne!(a.checksum, b.checksum);
    }

    #[test]
    fn test_unseeded_payload_has_size() {
        let p = Payload::generate(1024, None);
        assert_eq!(p.len(), 1024);
        assert_eq!(p.checksum, Checksum::compute(&p.data));
    }
}
