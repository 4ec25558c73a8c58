//! Proof-of-work targets and their difficulty.
//!
//! A header hash meets its target when, read as a big-endian 256-bit integer,
//! it is less than or equal to the target. Difficulty is the expected number
//! of hashes needed to find such a value: `2^256 / target`.

use primitive_types::{U256, U512};
use serde::{Deserialize, Serialize};

use super::chain::Sha256Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target(U256);

impl Target {
    /// The easiest possible target; every hash meets it.
    pub const MAX: Target = Target(U256::MAX);

    pub fn new(value: U256) -> Self {
        Target(value)
    }

    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        Target(U256::from_big_endian(bytes))
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.0.to_big_endian(&mut bytes);
        bytes
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    /// Target whose difficulty is `difficulty`. Difficulties of 0 and 1 map to
    /// the maximum target.
    pub fn from_difficulty(difficulty: U256) -> Self {
        if difficulty <= U256::one() {
            return Target::MAX;
        }
        let quotient = two_pow_256() / U512::from(difficulty);
        Target(U256::try_from(quotient).unwrap_or(U256::MAX))
    }

    /// `floor(2^256 / target)`, saturating at `U256::MAX`. A zero target can
    /// never be met and reports the maximum difficulty.
    pub fn to_difficulty(&self) -> U256 {
        if self.0.is_zero() {
            return U256::MAX;
        }
        let quotient = two_pow_256() / U512::from(self.0);
        U256::try_from(quotient).unwrap_or(U256::MAX)
    }

    pub fn meets(&self, hash: &Sha256Hash) -> bool {
        U256::from_big_endian(hash) <= self.0
    }
}

impl From<U256> for Target {
    fn from(value: U256) -> Self {
        Target(value)
    }
}

fn two_pow_256() -> U512 {
    U512::one() << 256u32
}
