use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::codec;
use super::transaction::Transaction;

/// Nonces tried between two cancellation checks during mining.
const CANCEL_CHECK_INTERVAL: u64 = 2048;

/// Errors that can interrupt mining. Either way the block is left
/// unsealed and `next_nonce` says where a later run should resume.
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Mining cancelled after {attempts} attempts; resume from nonce {next_nonce}")]
    Cancelled { attempts: u64, next_nonce: u64 },

    #[error("Mining attempt budget of {budget} exhausted; resume from nonce {next_nonce}")]
    AttemptsExhausted { budget: u64, next_nonce: u64 },
}

/// Shared flag for interrupting an in-progress mining run from another
/// thread. Cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the miner notices within one check interval
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clears the flag so the next mining run can proceed
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Outcome of searching one nonce range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MineOutcome {
    /// The block hash now satisfies the difficulty predicate
    Sealed,
    /// The range was exhausted; resume the search at `next_nonce`
    Exhausted { next_nonce: u64 },
}

/// An ordered batch of transactions chained to its predecessor by hash
/// and sealed by proof-of-work.
///
/// Equality is structural over exactly (timestamp, transactions,
/// previous_hash, nonce, hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Timestamp when the block was created
    pub timestamp: DateTime<Utc>,

    /// Transactions sealed into this block, in admission order
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block, or the genesis sentinel `"0"`
    pub previous_hash: String,

    /// Proof-of-work search counter
    pub nonce: u64,

    /// Cached hash; recomputed whenever the nonce or contents change
    pub hash: String,
}

impl Block {
    /// Creates a new block with nonce 0 and its hash computed eagerly
    pub fn new(
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction>,
        previous_hash: String,
    ) -> Self {
        let mut block = Block {
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Computes the canonical block hash as lowercase hex.
    ///
    /// Preimage: codec version, `BLK1` domain tag, previous hash,
    /// timestamp millis, transaction count, then for each transaction its
    /// sender, recipient, amount, timestamp millis and signature (empty
    /// string if unsigned), then the nonce. Every field is covered so any
    /// tampering with sealed contents shows up on recomputation.
    pub fn compute_hash(&self) -> String {
        let mut buf = Vec::new();
        buf.push(codec::CODEC_VERSION);
        buf.extend_from_slice(codec::DOM_BLOCK);
        codec::put_str(&mut buf, &self.previous_hash);
        codec::put_i64(&mut buf, self.timestamp.timestamp_millis());
        codec::put_u32(&mut buf, self.transactions.len() as u32);
        for tx in &self.transactions {
            codec::put_str(&mut buf, tx.sender.as_str());
            codec::put_str(&mut buf, tx.recipient.as_str());
            codec::put_u64(&mut buf, tx.amount.0);
            codec::put_i64(&mut buf, tx.timestamp.timestamp_millis());
            let signature = tx.signature.as_ref().map(|s| s.0.as_str()).unwrap_or("");
            codec::put_str(&mut buf, signature);
        }
        codec::put_u64(&mut buf, self.nonce);
        hex::encode(codec::sha256(&buf))
    }

    /// Checks the difficulty predicate: the leading `difficulty` hex
    /// digits of the current hash are all zero
    pub fn meets_difficulty(&self, difficulty: u8) -> bool {
        self.hash
            .as_bytes()
            .iter()
            .take(difficulty as usize)
            .all(|&b| b == b'0')
    }

    /// Searches one nonce range, one hash per nonce, starting at
    /// `start_nonce`. Mutates `nonce` and `hash` in place; on
    /// [`MineOutcome::Exhausted`] the search can be resumed at
    /// `next_nonce` by this or another worker.
    pub fn mine_range(&mut self, difficulty: u8, start_nonce: u64, attempts: u64) -> MineOutcome {
        let mut nonce = start_nonce;
        for _ in 0..attempts {
            self.nonce = nonce;
            self.hash = self.compute_hash();
            if self.meets_difficulty(difficulty) {
                return MineOutcome::Sealed;
            }
            nonce += 1;
        }
        MineOutcome::Exhausted { next_nonce: nonce }
    }

    /// Mines the block: increments the nonce and recomputes the hash until
    /// the difficulty predicate holds.
    ///
    /// The search runs in chunks, checking `cancel` between chunks, and
    /// stops early once `max_attempts` nonces have been tried. On error
    /// the block is not sealed and the caller must not append it.
    pub fn mine(
        &mut self,
        difficulty: u8,
        cancel: &CancelFlag,
        max_attempts: Option<u64>,
    ) -> Result<(), MiningError> {
        let mut next_nonce = self.nonce;
        let mut spent: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(MiningError::Cancelled {
                    attempts: spent,
                    next_nonce,
                });
            }

            let chunk = match max_attempts {
                Some(budget) => {
                    if spent >= budget {
                        return Err(MiningError::AttemptsExhausted { budget, next_nonce });
                    }
                    (budget - spent).min(CANCEL_CHECK_INTERVAL)
                }
                None => CANCEL_CHECK_INTERVAL,
            };

            match self.mine_range(difficulty, next_nonce, chunk) {
                MineOutcome::Sealed => {
                    info!("Block mined: {}", self.hash);
                    return Ok(());
                }
                MineOutcome::Exhausted { next_nonce: nonce } => {
                    spent += chunk;
                    next_nonce = nonce;
                }
            }
        }
    }

    /// True iff every contained transaction verifies
    pub fn has_valid_transactions(&self) -> bool {
        self.transactions
            .iter()
            .all(|tx| tx.is_valid().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::crypto::Wallet;
    use crate::ledger::transaction::Amount;

    // High enough that no nonce range tried in a test can seal; a SHA-256
    // hash only has 64 hex digits.
    const IMPOSSIBLE_DIFFICULTY: u8 = 64;

    fn sample_block() -> Block {
        let miner = Wallet::new();
        let transactions = vec![Transaction::reward(miner.address().clone(), Amount(100))];
        Block::new(Utc::now(), transactions, "0".to_string())
    }

    #[test]
    fn test_hash_is_deterministic_and_nonce_sensitive() {
        let mut block = sample_block();

        assert_eq!(block.compute_hash(), block.compute_hash());

        let before = block.compute_hash();
        block.nonce += 1;
        assert_ne!(before, block.compute_hash());
    }

    #[test]
    fn test_mining_seals_the_block() {
        let mut block = sample_block();
        block.mine(1, &CancelFlag::new(), None).unwrap();

        assert!(block.hash.starts_with('0'));
        assert!(block.meets_difficulty(1));
        assert_eq!(block.hash, block.compute_hash());
    }

    #[test]
    fn test_mine_range_reports_resume_point() {
        let mut block = sample_block();
        let outcome = block.mine_range(IMPOSSIBLE_DIFFICULTY, 0, 16);

        assert_eq!(outcome, MineOutcome::Exhausted { next_nonce: 16 });

        // Resuming continues the one-hash-per-nonce search where it left off.
        let outcome = block.mine_range(IMPOSSIBLE_DIFFICULTY, 16, 16);
        assert_eq!(outcome, MineOutcome::Exhausted { next_nonce: 32 });
    }

    #[test]
    fn test_cancelled_mining_leaves_block_unsealed() {
        let mut block = sample_block();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = block.mine(IMPOSSIBLE_DIFFICULTY, &cancel, None).unwrap_err();
        assert!(matches!(err, MiningError::Cancelled { .. }));
        assert!(!block.meets_difficulty(IMPOSSIBLE_DIFFICULTY));
    }

    #[test]
    fn test_attempt_budget_is_honored() {
        let mut block = sample_block();
        let err = block
            .mine(IMPOSSIBLE_DIFFICULTY, &CancelFlag::new(), Some(8))
            .unwrap_err();

        match err {
            MiningError::AttemptsExhausted { budget, next_nonce } => {
                assert_eq!(budget, 8);
                assert_eq!(next_nonce, 8);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_has_valid_transactions_detects_tampering() {
        let wallet = Wallet::new();
        let mut tx = Transaction::new(
            wallet.address().clone(),
            Wallet::new().address().clone(),
            Amount(10),
        );
        tx.sign(&wallet).unwrap();

        let mut block = Block::new(Utc::now(), vec![tx], "0".to_string());
        assert!(block.has_valid_transactions());

        block.transactions[0].amount = Amount(9999);
        assert!(!block.has_valid_transactions());
    }
}
