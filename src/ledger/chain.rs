use chrono::{TimeZone, Utc};
use log::{debug, info};
use thiserror::Error;

use std::sync::Mutex;

use super::balances::BalanceCache;
use super::block::{Block, CancelFlag, MiningError};
use super::crypto::Address;
use super::transaction::{Amount, Transaction, TransactionError};

/// Fixed genesis timestamp: 2022-01-01T00:00:00Z.
const GENESIS_TIMESTAMP_MILLIS: i64 = 1_640_995_200_000;

/// Previous-hash sentinel carried by the genesis block.
const GENESIS_PREVIOUS_HASH: &str = "0";

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Transaction must include sender and recipient addresses")]
    MissingAddress,

    #[error("Cannot admit a transaction with an invalid signature")]
    InvalidSignature,

    #[error("Transaction amount must be greater than zero")]
    NonPositiveAmount,

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: i128 },

    #[error(
        "Pending amount {pending} plus requested {requested} exceeds the sender's balance of {available}"
    )]
    PendingOverdraft {
        pending: u128,
        requested: u64,
        available: i128,
    },

    #[error("Chain is empty; the genesis invariant was violated")]
    EmptyChain,

    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

/// Tunables for a ledger instance
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Required number of leading zero hex digits in a block hash
    pub difficulty: u8,

    /// Payout credited to whoever seals a block
    pub mining_reward: Amount,

    /// Upper bound on nonces tried per mining run; `None` is unbounded.
    /// With an unbounded budget and a high difficulty a mining run can
    /// occupy the ledger indefinitely, so long-running deployments should
    /// set this and resume after a failed run.
    pub max_mining_attempts: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: 2,
            mining_reward: Amount(100),
            max_mining_attempts: None,
        }
    }
}

/// The chain and the pending pool form one critical section: mining reads
/// the pool and appends to the chain as a single step, so both live under
/// one lock.
#[derive(Debug)]
struct ChainState {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
}

/// The ledger: an append-only chain of mined blocks plus the pool of
/// admitted-but-unsealed transactions.
///
/// Balance and history queries replay the sealed chain; an incremental
/// [`BalanceCache`] is maintained alongside as a fast path and is updated
/// only when a block is appended.
#[derive(Debug)]
pub struct Ledger {
    state: Mutex<ChainState>,
    balances: BalanceCache,
    config: LedgerConfig,
    cancel: CancelFlag,
}

impl Ledger {
    /// Creates a ledger holding only the genesis block
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Ledger {
            state: Mutex::new(ChainState {
                chain: vec![Self::genesis_block()],
                pending: Vec::new(),
            }),
            balances: BalanceCache::new(),
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// The fixed genesis block: no transactions, sentinel previous hash,
    /// fixed timestamp. Recomputed for comparison by [`Self::is_chain_valid`].
    pub fn genesis_block() -> Block {
        let timestamp = Utc
            .timestamp_millis_opt(GENESIS_TIMESTAMP_MILLIS)
            .single()
            .expect("fixed genesis timestamp is representable");
        Block::new(timestamp, Vec::new(), GENESIS_PREVIOUS_HASH.to_string())
    }

    /// The last block in the chain.
    ///
    /// The genesis block guarantees a non-empty chain, so [`LedgerError::EmptyChain`]
    /// signals a broken invariant rather than a normal condition; it is
    /// surfaced instead of panicking.
    pub fn latest_block(&self) -> Result<Block, LedgerError> {
        let state = self.state.lock().unwrap();
        state.chain.last().cloned().ok_or(LedgerError::EmptyChain)
    }

    /// Validates a transaction and admits it to the pending pool.
    ///
    /// Checks run in a fixed order and the first failure wins: addresses
    /// present, signature valid, amount positive, balance sufficient, and
    /// no overdraft across the sender's already-pending transactions. A
    /// rejected transaction leaves the ledger untouched.
    pub fn add_transaction(&self, transaction: Transaction) -> Result<(), LedgerError> {
        if transaction.sender.is_reward_sentinel() || transaction.recipient.is_reward_sentinel() {
            return Err(LedgerError::MissingAddress);
        }

        if !transaction.is_valid()? {
            return Err(LedgerError::InvalidSignature);
        }

        if transaction.amount.is_zero() {
            return Err(LedgerError::NonPositiveAmount);
        }

        // Balance checks and admission must see one consistent state.
        let mut state = self.state.lock().unwrap();

        let available = replay_balance(&state.chain, &transaction.sender);
        let required = transaction.amount.0;
        if available < i128::from(required) {
            return Err(LedgerError::InsufficientBalance {
                required,
                available,
            });
        }

        let pending: u128 = state
            .pending
            .iter()
            .filter(|tx| tx.sender == transaction.sender)
            .map(|tx| u128::from(tx.amount.0))
            .sum();
        if pending + u128::from(required) > available as u128 {
            return Err(LedgerError::PendingOverdraft {
                pending,
                requested: required,
                available,
            });
        }

        debug!(
            "Transaction admitted: {} -> {} ({})",
            transaction.sender, transaction.recipient, transaction.amount
        );
        state.pending.push(transaction);

        Ok(())
    }

    /// Seals the pending pool (plus a reward to `reward_address`) into a
    /// new block, mines it, and appends it to the chain.
    ///
    /// The state lock is held for the whole run, so the pool cannot change
    /// under the miner and the append is atomic with the snapshot. If
    /// mining is cancelled or runs out of its attempt budget the error is
    /// returned with no ledger mutation at all: no block is appended, the
    /// pool keeps its transactions, and the reward is discarded with the
    /// snapshot.
    pub fn mine_pending_transactions(
        &self,
        reward_address: &Address,
    ) -> Result<Block, LedgerError> {
        let mut state = self.state.lock().unwrap();

        let previous_hash = state
            .chain
            .last()
            .map(|block| block.hash.clone())
            .ok_or(LedgerError::EmptyChain)?;

        let mut transactions = state.pending.clone();
        transactions.push(Transaction::reward(
            reward_address.clone(),
            self.config.mining_reward,
        ));

        let mut block = Block::new(Utc::now(), transactions, previous_hash);
        block.mine(
            self.config.difficulty,
            &self.cancel,
            self.config.max_mining_attempts,
        )?;

        state.chain.push(block.clone());
        state.pending.clear();
        self.balances.apply_block(&block);

        info!(
            "Block sealed at height {} with {} transactions",
            state.chain.len() - 1,
            block.transactions.len()
        );

        Ok(block)
    }

    /// A handle for interrupting an in-progress mining run from another
    /// thread. The flag stays set until [`CancelFlag::reset`] is called,
    /// so a cancelled ledger refuses further mining until then.
    pub fn mining_cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Balance of an address, derived by replaying every sealed
    /// transaction. This is the ground truth; see [`Self::cached_balance`]
    /// for the incremental fast path.
    pub fn balance_of(&self, address: &Address) -> i128 {
        let state = self.state.lock().unwrap();
        let balance = replay_balance(&state.chain, address);
        debug!("Balance of {}: {}", address, balance);
        balance
    }

    /// Balance from the incremental cache. Always equal to
    /// [`Self::balance_of`] because the cache is updated atomically with
    /// every block append.
    pub fn cached_balance(&self, address: &Address) -> i128 {
        self.balances.balance(address)
    }

    /// Every sealed transaction sent or received by `address`, in chain
    /// order then in-block order
    pub fn history_of(&self, address: &Address) -> Vec<Transaction> {
        let state = self.state.lock().unwrap();
        state
            .chain
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter(|tx| &tx.sender == address || &tx.recipient == address)
            .cloned()
            .collect()
    }

    /// Verifies the whole chain: the stored genesis must structurally
    /// equal a freshly computed one, and every later block must link to
    /// its predecessor's hash, contain only valid transactions, and hash
    /// to its stored value. A `false` result means tampering or
    /// corruption was detected; it is reported, never thrown.
    pub fn is_chain_valid(&self) -> bool {
        let state = self.state.lock().unwrap();

        match state.chain.first() {
            Some(stored_genesis) if *stored_genesis == Self::genesis_block() => {}
            _ => return false,
        }

        for pair in state.chain.windows(2) {
            let (previous, current) = (&pair[0], &pair[1]);
            if current.previous_hash != previous.hash
                || !current.has_valid_transactions()
                || current.hash != current.compute_hash()
            {
                return false;
            }
        }

        true
    }

    /// Snapshot of the full chain
    pub fn chain(&self) -> Vec<Block> {
        self.state.lock().unwrap().chain.clone()
    }

    /// Snapshot of the pending pool
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.lock().unwrap().pending.clone()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

/// Ground-truth balance derivation: walk every sealed transaction,
/// debiting senders and crediting recipients. Balances are `i128` so no
/// `u64` amount can truncate or overflow the running sum.
fn replay_balance(chain: &[Block], address: &Address) -> i128 {
    let mut balance: i128 = 0;
    for block in chain {
        for tx in &block.transactions {
            if &tx.sender == address {
                balance -= i128::from(tx.amount.0);
            }
            if &tx.recipient == address {
                balance += i128::from(tx.amount.0);
            }
        }
    }
    balance
}
