// Ledger module
//
// This module contains the core ledger implementation including:
// - Transaction structure and signing
// - Block structure and proof-of-work mining
// - Chain validation and balance derivation
// - Cryptography utilities
// - Canonical digest encoding
// - Incremental balance cache

pub mod balances;
pub mod block;
pub mod chain;
pub mod codec;
pub mod crypto;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, CancelFlag, MineOutcome, MiningError};
pub use chain::{Ledger, LedgerConfig, LedgerError};
pub use crypto::{Address, CryptoError, TransactionSignature, Wallet};
pub use transaction::{Amount, Transaction, TransactionError};
