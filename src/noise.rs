//! The noise byte source.
//!
//! A single RNG per build feeds noise entry names, noise payloads, comment
//! junk, and the poison tail, in that fixed order. Seeded builds draw from a
//! deterministic PRNG so two runs with the same configuration are
//! byte-identical; unseeded builds draw from the OS RNG. The RNG is threaded
//! through as an explicit parameter, never a global.

use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};

pub enum NoiseRng {
    Seeded(StdRng),
    Os(OsRng),
}

impl NoiseRng {
    pub fn from_seed(seed: Option<i64>) -> Self {
        match seed {
            Some(seed) => NoiseRng::Seeded(StdRng::seed_from_u64(seed as u64)),
            None => NoiseRng::Os(OsRng),
        }
    }

    pub fn fill(&mut self, buf: &mut [u8]) {
        match self {
            NoiseRng::Seeded(rng) => rng.fill_bytes(buf),
            NoiseRng::Os(rng) => rng.fill_bytes(buf),
        }
    }

    /// Draws `n` bytes and returns them hex-encoded (2n characters).
    pub fn hex(&mut self, n: usize) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut raw = vec![0u8; n];
        self.fill(&mut raw);
        let mut out = String::with_capacity(n * 2);
        for b in raw {
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
        out
    }
}
