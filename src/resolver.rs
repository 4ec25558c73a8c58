//! Block identity resolution.
//!
//! Callers name a block loosely: a hex hash, a sequence number, a negative
//! offset from the chain head, or free search text that may be either. The
//! resolver turns that into an ordered [`LookupPlan`], runs it against a
//! [`ChainStore`] and summarizes the block it lands on.
//!
//! Nothing is cached. Every call re-reads the store, so negative offsets are
//! relative to whatever the head is at call time.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::blockchain::{BlockHeader, Sha256Hash, GENESIS_SEQUENCE};
use crate::error::{Identifier, ResolveError};
use crate::persistence::ChainStore;

/// Loose identifier as received from a caller. Any combination of fields may
/// be present; see [`IdentifierSpec::plan`] for how they are prioritized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
}

impl IdentifierSpec {
    pub fn search(text: impl Into<String>) -> Self {
        Self {
            search: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn hash(hash: impl Into<String>) -> Self {
        Self {
            hash: Some(hash.into()),
            ..Self::default()
        }
    }

    pub fn height(height: i64) -> Self {
        Self {
            height: Some(height),
            ..Self::default()
        }
    }

    /// Rewrites `search` into `height` or `hash`.
    ///
    /// Trimmed text that parses as a base-10 integer replaces `height`;
    /// anything else replaces `hash`. Blank search text counts as height `0`.
    pub fn expand_search(&self) -> (Option<String>, Option<i64>) {
        let mut hash = self.hash.clone().filter(|h| !h.is_empty());
        let mut height = self.height;

        if let Some(search) = self.search.as_deref().filter(|s| !s.is_empty()) {
            let search = search.trim();
            if search.is_empty() {
                height = Some(0);
            } else if let Ok(number) = search.parse::<i64>() {
                height = Some(number);
            } else {
                hash = Some(search.to_string());
            }
        }

        (hash, height)
    }

    /// Builds the ordered lookups for this identifier.
    ///
    /// A hash is always tried before a height. Negative heights are
    /// normalized against `head_sequence`, which is only consulted when one
    /// is present. A height of `0` is treated as absent, so sequence 0 can
    /// never be requested through `height`.
    pub fn plan<F>(&self, head_sequence: F) -> Result<LookupPlan, ResolveError>
    where
        F: FnOnce() -> Result<u64, ResolveError>,
    {
        let (hash, height) = self.expand_search();

        let height = match height {
            Some(h) if h < 0 => Some(normalize_height(h, head_sequence()?)),
            other => other,
        };

        let mut lookups = Vec::with_capacity(2);
        if let Some(hash) = hash {
            lookups.push(Lookup::Hash(hash));
        }
        if let Some(height) = height.filter(|h| *h != 0) {
            lookups.push(Lookup::Sequence(height));
        }

        if lookups.is_empty() {
            return Err(ResolveError::InvalidArgument(
                "Expected one of search, hash or a non-zero height".to_string(),
            ));
        }
        Ok(LookupPlan { lookups })
    }
}

/// A single header lookup strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hash(String),
    Sequence(i64),
}

impl Lookup {
    fn identifier(&self) -> Identifier {
        match self {
            Lookup::Hash(hash) => Identifier::Hash(hash.clone()),
            Lookup::Sequence(sequence) => Identifier::Sequence(*sequence),
        }
    }
}

/// Lookups tried in order until one finds a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupPlan {
    lookups: Vec<Lookup>,
}

impl LookupPlan {
    pub fn lookups(&self) -> &[Lookup] {
        &self.lookups
    }
}

/// Maps a negative height to an offset from the head: `-1` is the head, `-2`
/// the block before it. Results never fall below [`GENESIS_SEQUENCE`].
/// Non-negative heights pass through unchanged.
pub fn normalize_height(height: i64, head_sequence: u64) -> i64 {
    if height >= 0 {
        return height;
    }
    let head = i64::try_from(head_sequence).unwrap_or(i64::MAX);
    head.saturating_add(height)
        .saturating_add(1)
        .max(GENESIS_SEQUENCE as i64)
}

/// Compact description of a block as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub height: u64,
    /// Base-10 difficulty derived from the header's target.
    pub difficulty: String,
    pub block_hash: String,
    /// Base-10 magnitude of the miner's fee.
    pub reward: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl fmt::Display for BlockSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} (difficulty {}, reward {})",
            self.height, self.block_hash, self.difficulty, self.reward
        )
    }
}

/// Read-only resolver over a shared chain store.
#[derive(Clone)]
pub struct BlockResolver {
    store: Arc<dyn ChainStore>,
}

impl BlockResolver {
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    /// Resolves a loose identifier to a single block.
    pub fn resolve_one(&self, spec: &IdentifierSpec) -> Result<BlockSummary, ResolveError> {
        let plan = spec.plan(|| self.head_sequence())?;
        tracing::debug!(lookups = ?plan.lookups(), "resolving block");

        let header = self.find_header(&plan)?;
        self.summarize(&header)
    }

    /// Summarizes the current head.
    pub fn resolve_latest(&self) -> Result<BlockSummary, ResolveError> {
        let head = self.store.head_header()?;
        self.summarize(&head)
    }

    /// Resolves `count` consecutive sequences starting at `start_height`.
    ///
    /// Each requested sequence `start_height + i` is normalized on its own,
    /// so a negative start yields per-index offsets from the head. The first
    /// failure aborts the whole batch.
    pub fn resolve_range(
        &self,
        start_height: i64,
        count: u64,
    ) -> Result<Vec<BlockSummary>, ResolveError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        // The last index bounds every other one.
        count
            .checked_sub(1)
            .and_then(|last| i64::try_from(last).ok())
            .and_then(|last| start_height.checked_add(last))
            .ok_or_else(|| {
                ResolveError::InvalidArgument(format!(
                    "Range starting at {} with {} blocks overflows",
                    start_height, count
                ))
            })?;

        let mut summaries = Vec::new();
        for offset in 0..count {
            let sequence = start_height + offset as i64;
            let sequence = if sequence < 0 {
                normalize_height(sequence, self.head_sequence()?)
            } else {
                sequence
            };

            let header = self
                .lookup(&Lookup::Sequence(sequence))?
                .ok_or_else(|| ResolveError::not_found(Identifier::Sequence(sequence)))?;
            summaries.push(self.summarize(&header)?);
        }
        Ok(summaries)
    }

    fn head_sequence(&self) -> Result<u64, ResolveError> {
        Ok(self.store.head_header()?.sequence)
    }

    fn find_header(&self, plan: &LookupPlan) -> Result<BlockHeader, ResolveError> {
        let mut last_miss = None;
        for lookup in plan.lookups() {
            match self.lookup(lookup)? {
                Some(header) => return Ok(header),
                None => last_miss = Some(lookup.identifier()),
            }
        }

        Err(match last_miss {
            Some(identifier) => ResolveError::not_found(identifier),
            None => ResolveError::InvalidArgument("No lookup to perform".to_string()),
        })
    }

    fn lookup(&self, lookup: &Lookup) -> Result<Option<BlockHeader>, ResolveError> {
        let header = match lookup {
            Lookup::Hash(text) => match parse_hash(text) {
                Some(hash) => self.store.header_by_hash(&hash)?,
                None => None,
            },
            // Sequence 0 sits below genesis and is never stored.
            Lookup::Sequence(sequence) if *sequence <= 0 => None,
            Lookup::Sequence(sequence) => self.store.header_by_sequence(*sequence as u64)?,
        };
        Ok(header)
    }

    fn summarize(&self, header: &BlockHeader) -> Result<BlockSummary, ResolveError> {
        let block = self
            .store
            .block_by_header(header)?
            .ok_or_else(|| ResolveError::MissingBlock {
                hash: header.hash_hex(),
            })?;

        Ok(BlockSummary {
            height: header.sequence,
            difficulty: header.target.to_difficulty().to_string(),
            block_hash: header.hash_hex(),
            reward: block.reward().to_string(),
            timestamp: header.timestamp,
        })
    }
}

/// Text that is not a 32-byte hex string cannot name a stored header.
fn parse_hash(text: &str) -> Option<Sha256Hash> {
    let mut hash = [0u8; 32];
    hex::decode_to_slice(text, &mut hash).ok()?;
    Some(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Block;
    use crate::error::{ChainError, ErrorKind};
    use crate::persistence::InMemoryPersistence;
    use crate::test_utils::{make_test_chain, memory_store_with_chain};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolver_with_chain(length: u64) -> (BlockResolver, InMemoryPersistence) {
        let store = memory_store_with_chain(length);
        (BlockResolver::new(Arc::new(store.clone())), store)
    }

    /// Counts every store call made through it.
    struct CountingStore {
        inner: InMemoryPersistence,
        calls: AtomicUsize,
    }

    impl ChainStore for CountingStore {
        fn head_header(&self) -> Result<BlockHeader, ChainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.head_header()
        }

        fn header_by_hash(&self, hash: &Sha256Hash) -> Result<Option<BlockHeader>, ChainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.header_by_hash(hash)
        }

        fn header_by_sequence(&self, sequence: u64) -> Result<Option<BlockHeader>, ChainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.header_by_sequence(sequence)
        }

        fn block_by_header(&self, header: &BlockHeader) -> Result<Option<Block>, ChainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.block_by_header(header)
        }
    }

    #[test]
    fn test_normalize_height() {
        assert_eq!(normalize_height(-1, 100), 100);
        assert_eq!(normalize_height(-2, 100), 99);
        assert_eq!(normalize_height(-100, 100), 1);
        assert_eq!(normalize_height(-200, 100), GENESIS_SEQUENCE as i64);
        assert_eq!(normalize_height(i64::MIN, 100), GENESIS_SEQUENCE as i64);
        assert_eq!(normalize_height(42, 100), 42);
        assert_eq!(normalize_height(0, 100), 0);
    }

    #[test]
    fn test_search_expansion() {
        assert_eq!(
            IdentifierSpec::search(" 123 ").expand_search(),
            (None, Some(123))
        );
        assert_eq!(
            IdentifierSpec::search("-4").expand_search(),
            (None, Some(-4))
        );
        assert_eq!(
            IdentifierSpec::search(" abcd ").expand_search(),
            (Some("abcd".to_string()), None)
        );

        // Search overwrites a separately supplied height.
        let spec = IdentifierSpec {
            search: Some("7".to_string()),
            height: Some(3),
            ..Default::default()
        };
        assert_eq!(spec.expand_search(), (None, Some(7)));

        // Blank search text parses as zero.
        let spec = IdentifierSpec {
            search: Some("   ".to_string()),
            height: Some(3),
            ..Default::default()
        };
        assert_eq!(spec.expand_search(), (None, Some(0)));
    }

    #[test]
    fn test_plan_orders_hash_before_height() {
        let spec = IdentifierSpec {
            hash: Some("ff".to_string()),
            height: Some(5),
            ..Default::default()
        };
        let plan = spec.plan(|| unreachable!("head not needed")).unwrap();
        assert_eq!(
            plan.lookups(),
            &[Lookup::Hash("ff".to_string()), Lookup::Sequence(5)]
        );
    }

    #[test]
    fn test_plan_treats_zero_height_as_unset() {
        let err = IdentifierSpec::height(0)
            .plan(|| Ok(10))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_resolve_by_hash() {
        let (resolver, _) = resolver_with_chain(10);
        let chain = make_test_chain(10);
        let target = &chain[4];
        let hash = hex::encode(target.hash());

        let summary = resolver.resolve_one(&IdentifierSpec::hash(&hash)).unwrap();
        assert_eq!(summary.block_hash, hash);
        assert_eq!(summary.height, 5);
        assert_eq!(summary.timestamp, target.header.timestamp);
        assert_eq!(
            summary.difficulty,
            target.header.target.to_difficulty().to_string()
        );
    }

    #[test]
    fn test_resolve_by_height() {
        let (resolver, _) = resolver_with_chain(10);
        for height in 1..=10 {
            let summary = resolver.resolve_one(&IdentifierSpec::height(height)).unwrap();
            assert_eq!(summary.height, height as u64);
        }
    }

    #[test]
    fn test_negative_heights_offset_from_head() {
        let (resolver, _) = resolver_with_chain(100);

        let head = resolver.resolve_one(&IdentifierSpec::height(-1)).unwrap();
        assert_eq!(head.height, 100);

        let clamped = resolver.resolve_one(&IdentifierSpec::height(-200)).unwrap();
        assert_eq!(clamped.height, GENESIS_SEQUENCE);

        for h in [-1i64, -2, -50, -100, -101] {
            let direct = resolver.resolve_one(&IdentifierSpec::height(h)).unwrap();
            let normalized = resolver
                .resolve_one(&IdentifierSpec::height(normalize_height(h, 100)))
                .unwrap();
            assert_eq!(direct, normalized);
        }
    }

    #[test]
    fn test_search_matches_explicit_fields() {
        let (resolver, _) = resolver_with_chain(20);

        let by_search = resolver.resolve_one(&IdentifierSpec::search("12")).unwrap();
        let by_height = resolver.resolve_one(&IdentifierSpec::height(12)).unwrap();
        assert_eq!(by_search, by_height);

        let hash = by_height.block_hash.clone();
        let by_search = resolver.resolve_one(&IdentifierSpec::search(&hash)).unwrap();
        let by_hash = resolver.resolve_one(&IdentifierSpec::hash(&hash)).unwrap();
        assert_eq!(by_search, by_hash);
    }

    #[test]
    fn test_reward_is_non_negative() {
        let (resolver, store) = resolver_with_chain(3);
        let summary = resolver.resolve_one(&IdentifierSpec::height(2)).unwrap();
        assert_eq!(summary.reward, "2000000002");

        let mut positive = make_test_chain(4).remove(3);
        positive.miners_fee = 750;
        store.insert_block(positive);
        let summary = resolver.resolve_latest().unwrap();
        assert_eq!(summary.reward, "750");
    }

    #[test]
    fn test_empty_spec_is_invalid() {
        let (resolver, _) = resolver_with_chain(3);
        let err = resolver.resolve_one(&IdentifierSpec::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = resolver.resolve_one(&IdentifierSpec::search("")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_absent_hash_is_not_found() {
        let (resolver, _) = resolver_with_chain(3);
        let absent = hex::encode([0xabu8; 32]);

        let err = resolver.resolve_one(&IdentifierSpec::hash(&absent)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), format!("No block found with hash {}", absent));
        match err {
            ResolveError::NotFound { identifier, .. } => {
                assert_eq!(identifier, Identifier::Hash(absent))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_hex_search_is_not_found() {
        let (resolver, _) = resolver_with_chain(3);
        let err = resolver
            .resolve_one(&IdentifierSpec::search("not-a-hash"))
            .unwrap_err();
        assert_eq!(err.to_string(), "No block found with hash not-a-hash");
    }

    #[test]
    fn test_hash_miss_falls_through_to_height() {
        let (resolver, _) = resolver_with_chain(5);
        let spec = IdentifierSpec {
            hash: Some(hex::encode([1u8; 32])),
            height: Some(3),
            ..Default::default()
        };
        assert_eq!(resolver.resolve_one(&spec).unwrap().height, 3);

        let spec = IdentifierSpec {
            hash: Some(hex::encode([1u8; 32])),
            height: Some(30),
            ..Default::default()
        };
        let err = resolver.resolve_one(&spec).unwrap_err();
        assert_eq!(err.to_string(), "No block found with sequence 30");
    }

    #[test]
    fn test_hash_wins_over_height() {
        let (resolver, _) = resolver_with_chain(5);
        let second = resolver.resolve_one(&IdentifierSpec::height(2)).unwrap();
        let spec = IdentifierSpec {
            hash: Some(second.block_hash.clone()),
            height: Some(4),
            ..Default::default()
        };
        assert_eq!(resolver.resolve_one(&spec).unwrap(), second);
    }

    #[test]
    fn test_missing_body_reports_header_hash() {
        let (resolver, store) = resolver_with_chain(5);
        let third = make_test_chain(5).remove(2);
        store.remove_block_body(&third.hash());

        let err = resolver.resolve_one(&IdentifierSpec::height(3)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            format!("No block with header {}", hex::encode(third.hash()))
        );
    }

    #[test]
    fn test_resolve_latest() {
        let (resolver, store) = resolver_with_chain(7);
        assert_eq!(resolver.resolve_latest().unwrap().height, 7);

        store.insert_block(make_test_chain(8).remove(7));
        assert_eq!(resolver.resolve_latest().unwrap().height, 8);

        let head = store.head_header().unwrap();
        store.remove_block_body(&head.hash());
        let err = resolver.resolve_latest().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_resolve_range() {
        let (resolver, _) = resolver_with_chain(20);
        let heights: Vec<u64> = resolver
            .resolve_range(10, 3)
            .unwrap()
            .iter()
            .map(|s| s.height)
            .collect();
        assert_eq!(heights, vec![10, 11, 12]);
    }

    #[test]
    fn test_resolve_range_normalizes_each_index() {
        let (resolver, _) = resolver_with_chain(100);
        let heights: Vec<u64> = resolver
            .resolve_range(-3, 2)
            .unwrap()
            .iter()
            .map(|s| s.height)
            .collect();
        assert_eq!(heights, vec![98, 99]);

        // -2, -1 normalize to 99 and 100; 0 is never found.
        let err = resolver.resolve_range(-2, 3).unwrap_err();
        assert_eq!(err.to_string(), "No block found with sequence 0");
    }

    #[test]
    fn test_resolve_range_is_fail_fast() {
        let (resolver, _) = resolver_with_chain(5);
        let err = resolver.resolve_range(4, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "No block found with sequence 6");
    }

    #[test]
    fn test_resolve_range_overflow_is_invalid() {
        let store = Arc::new(CountingStore {
            inner: memory_store_with_chain(5),
            calls: AtomicUsize::new(0),
        });
        let resolver = BlockResolver::new(store.clone());

        let err = resolver.resolve_range(i64::MAX, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = resolver.resolve_range(0, u64::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);

        // The last sequence itself still fits.
        let err = resolver.resolve_range(i64::MAX, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_empty_range_touches_no_store() {
        let store = Arc::new(CountingStore {
            inner: memory_store_with_chain(5),
            calls: AtomicUsize::new(0),
        });
        let resolver = BlockResolver::new(store.clone());

        assert!(resolver.resolve_range(3, 0).unwrap().is_empty());
        assert!(resolver.resolve_range(-3, 0).unwrap().is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);

        resolver.resolve_range(3, 1).unwrap();
        assert!(store.calls.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_positive_height_skips_head_lookup() {
        let store = Arc::new(CountingStore {
            inner: memory_store_with_chain(5),
            calls: AtomicUsize::new(0),
        });
        let resolver = BlockResolver::new(store.clone());

        resolver.resolve_one(&IdentifierSpec::height(2)).unwrap();
        // header_by_sequence + block_by_header
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_store_surfaces_store_error() {
        let resolver = BlockResolver::new(Arc::new(InMemoryPersistence::new()));
        let err = resolver.resolve_latest().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
