use dashmap::DashMap;

use super::block::Block;
use super::crypto::Address;

/// Incremental address-to-balance index over the sealed chain.
///
/// Replaying the full chain remains the ground truth for balances; this
/// cache is only updated together with a block append and applies the
/// identical rule (debit the sender, credit the recipient, for every
/// transaction including rewards), so reading it must always agree with a
/// fresh replay.
#[derive(Debug, Default)]
pub struct BalanceCache {
    balances: DashMap<Address, i128>,
}

impl BalanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance of an address; addresses never seen are 0
    pub fn balance(&self, address: &Address) -> i128 {
        self.balances.get(address).map(|entry| *entry).unwrap_or(0)
    }

    /// Folds one sealed block into the running balances. Amounts are
    /// widened to `i128`, so even `u64::MAX` cannot truncate.
    pub fn apply_block(&self, block: &Block) {
        for tx in &block.transactions {
            let amount = i128::from(tx.amount.0);
            *self.balances.entry(tx.sender.clone()).or_insert(0) -= amount;
            *self.balances.entry(tx.recipient.clone()).or_insert(0) += amount;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::transaction::{Amount, Transaction};
    use chrono::Utc;

    #[test]
    fn test_apply_block_debits_and_credits() {
        let a = Address("a".to_string());
        let b = Address("b".to_string());

        // Unsigned is fine here, the cache never validates.
        let tx = Transaction::new(a.clone(), b.clone(), Amount(40));
        let reward = Transaction::reward(a.clone(), Amount(100));

        let block = Block::new(Utc::now(), vec![tx, reward], "0".to_string());

        let cache = BalanceCache::new();
        cache.apply_block(&block);

        assert_eq!(cache.balance(&a), 60);
        assert_eq!(cache.balance(&b), 40);
        assert_eq!(cache.balance(&Address("unseen".to_string())), 0);
        // The sentinel is debited by rewards, mirroring the replay rule.
        assert_eq!(cache.balance(&Address::reward_sentinel()), -100);
    }
}
