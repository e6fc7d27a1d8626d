//! Seedable random stream used for random branch selection.
//!
//! SplitMix64: deterministic for a given seed on every platform, so a script
//! that uses `:select random` replays identically under the same seed.

/// Substitute for a zero seed, which SplitMix64 cannot start from.
const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// A reproducible pseudo-random number stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RngStream {
    state: u64,
}

impl RngStream {
    /// Creates a stream from `seed`.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        let state = if seed == 0 { GOLDEN_GAMMA } else { seed };
        Self { state }
    }

    /// Returns the next 64-bit value and advances the stream.
    pub fn next_u64(&mut self) -> u64 {
        self.state = splitmix64_next(self.state);
        splitmix64_mix(self.state)
    }

    /// Returns an index uniformly drawn from `0..bound`, or 0 when `bound` is 0.
    pub fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next_u64() % bound
    }
}

impl Default for RngStream {
    fn default() -> Self {
        Self::new(0)
    }
}

#[inline]
const fn splitmix64_next(state: u64) -> u64 {
    state.wrapping_add(GOLDEN_GAMMA)
}

#[inline]
const fn splitmix64_mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = RngStream::new(42);
        let mut b = RngStream::new(42);
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn zero_seed_is_usable() {
        let mut rng = RngStream::new(0);
        assert_ne!(rng.next_u64(), rng.next_u64());
    }

    #[test]
    fn below_stays_in_range() {
        let mut rng = RngStream::new(7);
        for _ in 0..1000 {
            assert!(rng.below(3) < 3);
        }
        assert_eq!(rng.below(0), 0);
    }
}
