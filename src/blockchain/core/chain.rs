use sha2::{Digest, Sha256};

use super::target::Target;

pub type Sha256Hash = [u8; 32];

/// Sequence number of the first block in every chain. Heights never resolve
/// below it.
pub const GENESIS_SEQUENCE: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHeader {
    pub sequence: u64,
    pub previous_block_hash: Sha256Hash,
    pub merkle_root: Sha256Hash,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub target: Target,
    pub nonce: u64,
}

impl BlockHeader {
    pub fn hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(self.previous_block_hash);
        hasher.update(self.merkle_root);
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.target.to_be_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.finalize().into()
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence == GENESIS_SEQUENCE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Signed fee paid by the block's miner's-fee transaction. Rewards are
    /// usually stored negative.
    pub miners_fee: i128,
    pub transaction_count: u32,
}

impl Block {
    pub fn new(
        sequence: u64,
        previous_block_hash: Sha256Hash,
        target: Target,
        miners_fee: i128,
    ) -> Self {
        let timestamp = chrono::Utc::now().timestamp_millis() as u64;

        Block {
            header: BlockHeader {
                sequence,
                previous_block_hash,
                merkle_root: [0u8; 32],
                timestamp,
                target,
                nonce: 0,
            },
            miners_fee,
            transaction_count: 1,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.header.timestamp = timestamp;
        self
    }

    pub fn hash(&self) -> Sha256Hash {
        self.header.hash()
    }

    /// Magnitude of the miner's fee; the sign only reflects how the fee
    /// transaction was recorded.
    pub fn reward(&self) -> u128 {
        self.miners_fee.unsigned_abs()
    }
}
