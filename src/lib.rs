//! A minimal single-node proof-of-work ledger.
//!
//! Signed transfer requests are validated into a pending pool, sealed into
//! hash-linked blocks by proof-of-work mining, and balance or history
//! queries are answered by replaying the sealed chain.
//!
//! ```
//! use tinyledger::{Amount, Ledger, Transaction, Wallet};
//!
//! let ledger = Ledger::new();
//! let alice = Wallet::new();
//! let bob = Wallet::new();
//!
//! // Fund Alice by letting her seal the first block.
//! ledger.mine_pending_transactions(alice.address()).unwrap();
//!
//! let mut tx = Transaction::new(alice.address().clone(), bob.address().clone(), Amount(40));
//! tx.sign(&alice).unwrap();
//! ledger.add_transaction(tx).unwrap();
//! ledger.mine_pending_transactions(alice.address()).unwrap();
//!
//! assert_eq!(ledger.balance_of(bob.address()), 40);
//! assert!(ledger.is_chain_valid());
//! ```

pub mod ledger;

pub use ledger::{
    Address, Amount, Block, CancelFlag, CryptoError, Ledger, LedgerConfig, LedgerError,
    MineOutcome, MiningError, Transaction, TransactionError, TransactionSignature, Wallet,
};
