//! Fixtures shared by unit and integration tests.

use crate::blockchain::{Block, Target, GENESIS_SEQUENCE};
use crate::persistence::InMemoryPersistence;
use primitive_types::U256;

/// Timestamp of the first fixture block (2023-01-01T00:00:00Z).
pub const TEST_GENESIS_TIMESTAMP: u64 = 1_672_531_200_000;

/// Spacing between fixture blocks in milliseconds.
pub const TEST_BLOCK_INTERVAL: u64 = 60_000;

/// Miner's fee recorded for the fixture block at `sequence`. Fees are stored
/// negative, as a miner's-fee transaction records them.
pub fn test_miners_fee(sequence: u64) -> i128 {
    -(2_000_000_000 + sequence as i128)
}

/// A linked chain of `length` blocks starting at the genesis sequence, with
/// deterministic timestamps and a difficulty that grows with the sequence.
pub fn make_test_chain(length: u64) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::with_capacity(length as usize);
    for offset in 0..length {
        let sequence = GENESIS_SEQUENCE + offset;
        let previous_block_hash = blocks.last().map(|b| b.hash()).unwrap_or([0u8; 32]);
        let target = Target::from_difficulty(U256::from(131_072u64 + offset));
        let block = Block::new(
            sequence,
            previous_block_hash,
            target,
            test_miners_fee(sequence),
        )
        .with_timestamp(TEST_GENESIS_TIMESTAMP + offset * TEST_BLOCK_INTERVAL);
        blocks.push(block);
    }
    blocks
}

/// In-memory store whose head sits at sequence `length`.
pub fn memory_store_with_chain(length: u64) -> InMemoryPersistence {
    InMemoryPersistence::from_blocks(make_test_chain(length))
}
