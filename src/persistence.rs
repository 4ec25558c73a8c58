//! Chain store layer for Blockscope
//!
//! The resolver only reads through [`ChainStore`]. Two backends are provided:
//! a SQLite database for running nodes and an in-memory store for tests and
//! ephemeral runs.

use crate::blockchain::{Block, BlockHeader, Sha256Hash, Target};
use crate::error::ChainError;
use parking_lot::RwLock;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Read access to persisted headers and blocks. Implementations must be
/// safe to share between request handlers.
pub trait ChainStore: Send + Sync {
    /// Header of the current main-chain head.
    fn head_header(&self) -> Result<BlockHeader, ChainError>;
    fn header_by_hash(&self, hash: &Sha256Hash) -> Result<Option<BlockHeader>, ChainError>;
    /// Main-chain header at `sequence`.
    fn header_by_sequence(&self, sequence: u64) -> Result<Option<BlockHeader>, ChainError>;
    fn block_by_header(&self, header: &BlockHeader) -> Result<Option<Block>, ChainError>;
}

const HEAD_KEY: &str = "head";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS headers (
                hash BLOB PRIMARY KEY,
                sequence INTEGER NOT NULL,
                previous_hash BLOB NOT NULL,
                merkle_root BLOB NOT NULL,
                timestamp INTEGER NOT NULL,
                target BLOB NOT NULL,
                nonce INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create headers table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS main_chain (
                sequence INTEGER PRIMARY KEY,
                hash BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create main_chain table: {}", e))
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                hash BLOB PRIMARY KEY,
                miners_fee TEXT NOT NULL,
                transaction_count INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create blocks table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            ChainError::DatabaseError(format!("Failed to create metadata table: {}", e))
        })?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a database file that must already exist.
    pub fn open_existing(path: &str) -> Result<Self, ChainError> {
        if !std::path::Path::new(path).is_file() {
            return Err(ChainError::IoError(format!("No database file at {}", path)));
        }
        Self::open(path)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ChainError> {
        self.conn
            .lock()
            .map_err(|_| ChainError::DatabaseError("Mutex poisoned".to_string()))
    }

    /// Atomically stores a header, its main-chain index entry and its body.
    /// The head moves forward when the block extends past it.
    pub fn insert_block(&self, block: &Block) -> Result<(), ChainError> {
        let conn_guard = self.lock()?;
        let tx = conn_guard.unchecked_transaction().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to start transaction: {}", e))
        })?;

        let hash = block.hash();
        write_header(&tx, &block.header)?;

        tx.execute(
            "INSERT OR REPLACE INTO blocks (hash, miners_fee, transaction_count) VALUES (?1, ?2, ?3)",
            params![
                hash.to_vec(),
                block.miners_fee.to_string(),
                block.transaction_count as i64
            ],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;

        let current_head = read_head_sequence(&tx)?;
        if current_head.map_or(true, |seq| block.header.sequence >= seq) {
            write_head(&tx, &hash)?;
        }

        tx.commit().map_err(|e| {
            ChainError::DatabaseError(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(())
    }

    /// Stores a main-chain header without a body.
    pub fn insert_header(&self, header: &BlockHeader) -> Result<(), ChainError> {
        let conn_guard = self.lock()?;
        write_header(&conn_guard, header)
    }

    pub fn set_head(&self, hash: &Sha256Hash) -> Result<(), ChainError> {
        let conn_guard = self.lock()?;
        write_head(&conn_guard, hash)
    }

    pub fn remove_block_body(&self, hash: &Sha256Hash) -> Result<(), ChainError> {
        let conn_guard = self.lock()?;
        conn_guard
            .execute("DELETE FROM blocks WHERE hash = ?1", params![hash.to_vec()])
            .map_err(|e| ChainError::DatabaseError(format!("Failed to delete block: {}", e)))?;
        Ok(())
    }

    fn query_header(
        conn: &Connection,
        sql: &str,
        key: impl rusqlite::ToSql,
    ) -> Result<Option<BlockHeader>, ChainError> {
        conn.query_row(sql, params![key], header_from_row)
            .optional()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to load header: {}", e)))
    }
}

const HEADER_COLUMNS: &str = "h.sequence, h.previous_hash, h.merkle_root, h.timestamp, h.target, h.nonce";

fn write_header(conn: &Connection, header: &BlockHeader) -> Result<(), ChainError> {
    conn.execute(
        "INSERT OR REPLACE INTO headers (hash, sequence, previous_hash, merkle_root, timestamp, target, nonce)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            header.hash().to_vec(),
            header.sequence as i64,
            header.previous_block_hash.to_vec(),
            header.merkle_root.to_vec(),
            header.timestamp as i64,
            header.target.to_be_bytes().to_vec(),
            header.nonce as i64,
        ],
    )
    .map_err(|e| ChainError::DatabaseError(format!("Failed to save header: {}", e)))?;

    conn.execute(
        "INSERT OR REPLACE INTO main_chain (sequence, hash) VALUES (?1, ?2)",
        params![header.sequence as i64, header.hash().to_vec()],
    )
    .map_err(|e| ChainError::DatabaseError(format!("Failed to index header: {}", e)))?;

    Ok(())
}

fn write_head(conn: &Connection, hash: &Sha256Hash) -> Result<(), ChainError> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![HEAD_KEY, hex::encode(hash)],
    )
    .map_err(|e| ChainError::DatabaseError(format!("Failed to save head: {}", e)))?;
    Ok(())
}

fn read_head_hash(conn: &Connection) -> Result<Option<Sha256Hash>, ChainError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![HEAD_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| ChainError::DatabaseError(format!("Failed to load head: {}", e)))?;

    match value {
        None => Ok(None),
        Some(hex_hash) => {
            let mut hash = [0u8; 32];
            hex::decode_to_slice(&hex_hash, &mut hash).map_err(|e| {
                ChainError::SerializationError(format!("Corrupt head hash {}: {}", hex_hash, e))
            })?;
            Ok(Some(hash))
        }
    }
}

fn read_head_sequence(conn: &Connection) -> Result<Option<u64>, ChainError> {
    let Some(hash) = read_head_hash(conn)? else {
        return Ok(None);
    };
    let sql = format!("SELECT {} FROM headers h WHERE h.hash = ?1", HEADER_COLUMNS);
    Ok(Database::query_header(conn, &sql, hash.to_vec())?.map(|h| h.sequence))
}

fn hash_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Sha256Hash> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes.as_slice().try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            format!("expected 32 bytes, found {}", bytes.len()).into(),
        )
    })
}

fn header_from_row(row: &Row<'_>) -> rusqlite::Result<BlockHeader> {
    let sequence: i64 = row.get(0)?;
    let timestamp: i64 = row.get(3)?;
    let nonce: i64 = row.get(5)?;

    Ok(BlockHeader {
        sequence: sequence as u64,
        previous_block_hash: hash_column(row, 1)?,
        merkle_root: hash_column(row, 2)?,
        timestamp: timestamp as u64,
        target: Target::from_be_bytes(&hash_column(row, 4)?),
        nonce: nonce as u64,
    })
}

impl ChainStore for Database {
    fn head_header(&self) -> Result<BlockHeader, ChainError> {
        let conn_guard = self.lock()?;
        let hash = read_head_hash(&conn_guard)?.ok_or(ChainError::EmptyChain)?;
        let sql = format!("SELECT {} FROM headers h WHERE h.hash = ?1", HEADER_COLUMNS);
        Database::query_header(&conn_guard, &sql, hash.to_vec())?.ok_or_else(|| {
            ChainError::DatabaseError(format!("Head header {} is missing", hex::encode(hash)))
        })
    }

    fn header_by_hash(&self, hash: &Sha256Hash) -> Result<Option<BlockHeader>, ChainError> {
        let conn_guard = self.lock()?;
        let sql = format!("SELECT {} FROM headers h WHERE h.hash = ?1", HEADER_COLUMNS);
        Database::query_header(&conn_guard, &sql, hash.to_vec())
    }

    fn header_by_sequence(&self, sequence: u64) -> Result<Option<BlockHeader>, ChainError> {
        let Ok(sequence) = i64::try_from(sequence) else {
            return Ok(None);
        };
        let conn_guard = self.lock()?;
        let sql = format!(
            "SELECT {} FROM main_chain m JOIN headers h ON h.hash = m.hash WHERE m.sequence = ?1",
            HEADER_COLUMNS
        );
        Database::query_header(&conn_guard, &sql, sequence)
    }

    fn block_by_header(&self, header: &BlockHeader) -> Result<Option<Block>, ChainError> {
        let conn_guard = self.lock()?;
        let body: Option<(String, i64)> = conn_guard
            .query_row(
                "SELECT miners_fee, transaction_count FROM blocks WHERE hash = ?1",
                params![header.hash().to_vec()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| ChainError::DatabaseError(format!("Failed to load block: {}", e)))?;

        let Some((miners_fee, transaction_count)) = body else {
            return Ok(None);
        };

        let miners_fee = miners_fee.parse::<i128>().map_err(|e| {
            ChainError::SerializationError(format!("Invalid miner's fee {}: {}", miners_fee, e))
        })?;

        Ok(Some(Block {
            header: header.clone(),
            miners_fee,
            transaction_count: transaction_count as u32,
        }))
    }
}

#[derive(Debug, Default)]
struct MemoryChain {
    headers: HashMap<Sha256Hash, BlockHeader>,
    main_chain: BTreeMap<u64, Sha256Hash>,
    bodies: HashMap<Sha256Hash, Block>,
    head: Option<Sha256Hash>,
}

/// Simple in-memory store useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    chain: Arc<RwLock<MemoryChain>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store holding `blocks` on the main chain.
    pub fn from_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let store = Self::new();
        for block in blocks {
            store.insert_block(block);
        }
        store
    }

    /// Stores a header and body on the main chain. The head moves forward
    /// when the block extends past it.
    pub fn insert_block(&self, block: Block) {
        let hash = block.hash();
        let mut chain = self.chain.write();
        Self::index_header(&mut chain, block.header.clone());

        let advances = match chain.head.and_then(|head| chain.headers.get(&head)) {
            Some(head) => block.header.sequence >= head.sequence,
            None => true,
        };
        if advances {
            chain.head = Some(hash);
        }
        chain.bodies.insert(hash, block);
    }

    /// Stores a main-chain header without a body.
    pub fn insert_header(&self, header: BlockHeader) {
        let mut chain = self.chain.write();
        Self::index_header(&mut chain, header);
    }

    pub fn set_head(&self, hash: Sha256Hash) {
        self.chain.write().head = Some(hash);
    }

    pub fn remove_block_body(&self, hash: &Sha256Hash) -> Option<Block> {
        self.chain.write().bodies.remove(hash)
    }

    fn index_header(chain: &mut MemoryChain, header: BlockHeader) {
        let hash = header.hash();
        chain.main_chain.insert(header.sequence, hash);
        chain.headers.insert(hash, header);
    }
}

impl ChainStore for InMemoryPersistence {
    fn head_header(&self) -> Result<BlockHeader, ChainError> {
        let chain = self.chain.read();
        chain
            .head
            .and_then(|hash| chain.headers.get(&hash))
            .cloned()
            .ok_or(ChainError::EmptyChain)
    }

    fn header_by_hash(&self, hash: &Sha256Hash) -> Result<Option<BlockHeader>, ChainError> {
        Ok(self.chain.read().headers.get(hash).cloned())
    }

    fn header_by_sequence(&self, sequence: u64) -> Result<Option<BlockHeader>, ChainError> {
        let chain = self.chain.read();
        Ok(chain
            .main_chain
            .get(&sequence)
            .and_then(|hash| chain.headers.get(hash))
            .cloned())
    }

    fn block_by_header(&self, header: &BlockHeader) -> Result<Option<Block>, ChainError> {
        Ok(self.chain.read().bodies.get(&header.hash()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_test_chain;

    #[test]
    fn test_database_open() {
        let db = Database::open(":memory:").unwrap();
        assert!(db.conn.lock().unwrap().is_autocommit());
    }

    #[test]
    fn test_open_existing_requires_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chain.db");
        let path_str = path.to_str().unwrap();

        assert!(matches!(
            Database::open_existing(path_str),
            Err(ChainError::IoError(_))
        ));
        assert!(!path.exists());

        Database::open(path_str).unwrap();
        assert!(Database::open_existing(path_str).is_ok());
    }

    #[test]
    fn test_empty_database_has_no_head() {
        let db = Database::open(":memory:").unwrap();
        assert!(matches!(db.head_header(), Err(ChainError::EmptyChain)));
        assert!(db.header_by_sequence(1).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_blocks() {
        let db = Database::open(":memory:").unwrap();
        let blocks = make_test_chain(5);
        for block in &blocks {
            db.insert_block(block).unwrap();
        }

        let head = db.head_header().unwrap();
        assert_eq!(head, blocks[4].header);

        let third = db.header_by_sequence(3).unwrap().unwrap();
        assert_eq!(third, blocks[2].header);
        assert_eq!(db.header_by_hash(&third.hash()).unwrap(), Some(third.clone()));

        let body = db.block_by_header(&third).unwrap().unwrap();
        assert_eq!(body, blocks[2]);
    }

    #[test]
    fn test_miners_fee_precision_survives_storage() {
        let db = Database::open(":memory:").unwrap();
        let mut block = make_test_chain(1).remove(0);
        block.miners_fee = -(i64::MAX as i128) * 4;
        db.insert_block(&block).unwrap();

        let loaded = db.block_by_header(&block.header).unwrap().unwrap();
        assert_eq!(loaded.miners_fee, block.miners_fee);
    }

    #[test]
    fn test_head_does_not_move_backwards() {
        let db = Database::open(":memory:").unwrap();
        let blocks = make_test_chain(3);
        db.insert_block(&blocks[2]).unwrap();
        db.insert_block(&blocks[0]).unwrap();
        assert_eq!(db.head_header().unwrap().sequence, 3);

        db.set_head(&blocks[0].hash()).unwrap();
        assert_eq!(db.head_header().unwrap().sequence, 1);
    }

    #[test]
    fn test_header_without_body() {
        let db = Database::open(":memory:").unwrap();
        let blocks = make_test_chain(2);
        db.insert_block(&blocks[0]).unwrap();
        db.insert_header(&blocks[1].header).unwrap();

        let header = db.header_by_sequence(2).unwrap().unwrap();
        assert!(db.block_by_header(&header).unwrap().is_none());

        db.remove_block_body(&blocks[0].hash()).unwrap();
        assert!(db.block_by_header(&blocks[0].header).unwrap().is_none());
    }

    #[test]
    fn test_in_memory_store() {
        let blocks = make_test_chain(4);
        let store = InMemoryPersistence::from_blocks(blocks.clone());

        assert_eq!(store.head_header().unwrap(), blocks[3].header);
        assert_eq!(
            store.header_by_sequence(2).unwrap(),
            Some(blocks[1].header.clone())
        );
        assert!(store.header_by_sequence(9).unwrap().is_none());

        store.remove_block_body(&blocks[1].hash());
        assert!(store.block_by_header(&blocks[1].header).unwrap().is_none());
        assert!(InMemoryPersistence::new().head_header().is_err());
    }
}
