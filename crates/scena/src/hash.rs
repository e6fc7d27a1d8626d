//! Stable 64-bit hashing for label, actor and identifier names.
//!
//! The compiler hashes names when it emits operands and the engine compares
//! those hashes against values the host computes at run time, so the digest
//! must never depend on process state or platform. FNV-1a has no seed, so the
//! same name always hashes to the same id.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Folds `bytes` into an in-progress FNV-1a state.
#[must_use]
pub const fn fnv1a64_mix(mut hash: u64, bytes: &[u8]) -> u64 {
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Hashes a name into the 64-bit id used by jump tables and operands.
///
/// # Example
/// ```
/// use scena::name_hash;
///
/// assert_eq!(name_hash("red"), name_hash("red"));
/// assert_ne!(name_hash("red"), name_hash("blue"));
/// ```
#[must_use]
pub const fn name_hash(name: &str) -> u64 {
    fnv1a64_mix(FNV_OFFSET_BASIS, name.as_bytes())
}
