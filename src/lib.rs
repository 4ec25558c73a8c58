//! Blockscope - block identity resolution and summaries for proof-of-work chains
//!
//! # Architecture
//!
//! ## Chain Primitives
//! - [`blockchain`] - Headers, blocks and proof-of-work targets
//!
//! ## Resolution
//! - [`resolver`] - Turns loose identifiers (hash, height, head offset,
//!   search text) into block summaries
//!
//! ## State Management
//! - [`persistence`] - Chain store interface with SQLite and in-memory backends
//!
//! ## Integration
//! - [`api`] - JSON RPC routes (`node/getBlockInfo`, `node/getBlocksInfo`,
//!   `node/getHeight`)
//! - [`node`] - Startup orchestration
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - `test_utils` - Deterministic chain fixtures (`test-utils` feature)

#![forbid(unsafe_code)]

// ============================================================================
// Chain Primitives & Resolution
// ============================================================================
pub mod blockchain;
pub mod resolver;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;
pub mod node;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
