use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;

use super::codec;
use super::crypto::{verify_signature, Address, CryptoError, TransactionSignature, Wallet};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Signing key does not belong to the sender address")]
    IdentityMismatch,

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("No signature in this transaction")]
    MissingSignature,

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// A transfer amount in integer minor units.
///
/// Amounts are unsigned, so a negative transfer is unrepresentable; the
/// digest encodes the raw `u64`, never a formatted number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Amount(pub u64);

impl Amount {
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A transfer request between two addresses.
///
/// The signed digest covers `(sender, recipient, amount, timestamp)` in the
/// canonical encoding from [`codec`], so changing any of those fields after
/// signing invalidates the signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender's address; the reward sentinel for system-issued rewards
    pub sender: Address,

    /// Recipient's address
    pub recipient: Address,

    /// Amount being transferred
    pub amount: Amount,

    /// Timestamp when the transaction was created
    pub timestamp: DateTime<Utc>,

    /// Digital signature over the transaction digest; set at most once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<TransactionSignature>,
}

impl Transaction {
    /// Creates a new unsigned transaction, timestamped now
    pub fn new(sender: Address, recipient: Address, amount: Amount) -> Self {
        Transaction {
            sender,
            recipient,
            amount,
            timestamp: Utc::now(),
            signature: None,
        }
    }

    /// Creates a system-issued mining reward transaction. Reward
    /// transactions carry the sentinel sender and are valid unsigned.
    pub fn reward(recipient: Address, amount: Amount) -> Self {
        Transaction {
            sender: Address::reward_sentinel(),
            recipient,
            amount,
            timestamp: Utc::now(),
            signature: None,
        }
    }

    /// Checks whether this is a system-issued reward transaction
    pub fn is_reward(&self) -> bool {
        self.sender.is_reward_sentinel()
    }

    /// The canonical digest signed by the sender.
    ///
    /// Preimage: codec version, `TX1` domain tag, sender, recipient,
    /// amount (u64 BE), timestamp millis (i64 BE); strings are
    /// length-prefixed. Identical field values always produce identical
    /// digests, in any process.
    pub fn digest(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(
            1 + codec::DOM_TX.len() + 8 + self.sender.as_str().len() + self.recipient.as_str().len() + 16,
        );
        buf.push(codec::CODEC_VERSION);
        buf.extend_from_slice(codec::DOM_TX);
        codec::put_str(&mut buf, self.sender.as_str());
        codec::put_str(&mut buf, self.recipient.as_str());
        codec::put_u64(&mut buf, self.amount.0);
        codec::put_i64(&mut buf, self.timestamp.timestamp_millis());
        codec::sha256(&buf)
    }

    /// Signs the transaction with a wallet.
    ///
    /// Fails with [`TransactionError::IdentityMismatch`] if the wallet does
    /// not hold the key behind the sender address, and with
    /// [`TransactionError::AlreadySigned`] if a signature is already set.
    pub fn sign(&mut self, wallet: &Wallet) -> Result<(), TransactionError> {
        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        if wallet.address() != &self.sender {
            return Err(TransactionError::IdentityMismatch);
        }

        let digest = self.digest();
        self.signature = Some(wallet.sign(&digest));

        Ok(())
    }

    /// Verifies the transaction.
    ///
    /// Reward transactions are always valid. Otherwise the signature must
    /// be present (else [`TransactionError::MissingSignature`]) and must
    /// verify against the sender's public key over the current digest.
    pub fn is_valid(&self) -> Result<bool, TransactionError> {
        if self.is_reward() {
            return Ok(true);
        }

        let signature = self
            .signature
            .as_ref()
            .ok_or(TransactionError::MissingSignature)?;

        let public_key = self.sender.to_public_key()?;

        Ok(verify_signature(&self.digest(), signature, &public_key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signed_transfer(wallet: &Wallet, amount: u64) -> Transaction {
        let recipient = Wallet::new();
        let mut tx = Transaction::new(
            wallet.address().clone(),
            recipient.address().clone(),
            Amount(amount),
        );
        tx.sign(wallet).unwrap();
        tx
    }

    #[test]
    fn test_sign_then_verify() {
        let wallet = Wallet::new();
        let tx = signed_transfer(&wallet, 10);

        assert!(tx.signature.is_some());
        assert!(tx.is_valid().unwrap());
    }

    #[test]
    fn test_any_field_change_invalidates_signature() {
        let wallet = Wallet::new();
        let tx = signed_transfer(&wallet, 10);

        let mut tampered = tx.clone();
        tampered.amount = Amount(11);
        assert!(!tampered.is_valid().unwrap());

        let mut tampered = tx.clone();
        tampered.recipient = Wallet::new().address().clone();
        assert!(!tampered.is_valid().unwrap());

        let mut tampered = tx;
        tampered.timestamp += Duration::milliseconds(1);
        assert!(!tampered.is_valid().unwrap());
    }

    #[test]
    fn test_sign_for_other_wallet_is_rejected() {
        let sender = Wallet::new();
        let other = Wallet::new();
        let mut tx = Transaction::new(
            sender.address().clone(),
            other.address().clone(),
            Amount(5),
        );

        let err = tx.sign(&other).unwrap_err();
        assert!(matches!(err, TransactionError::IdentityMismatch));
        assert!(tx.signature.is_none());
    }

    #[test]
    fn test_double_signing_is_rejected() {
        let wallet = Wallet::new();
        let mut tx = signed_transfer(&wallet, 10);
        let first = tx.signature.clone();

        let err = tx.sign(&wallet).unwrap_err();
        assert!(matches!(err, TransactionError::AlreadySigned));
        assert_eq!(tx.signature, first);
    }

    #[test]
    fn test_unsigned_transfer_reports_missing_signature() {
        let wallet = Wallet::new();
        let tx = Transaction::new(
            wallet.address().clone(),
            Wallet::new().address().clone(),
            Amount(5),
        );

        let err = tx.is_valid().unwrap_err();
        assert!(matches!(err, TransactionError::MissingSignature));
    }

    #[test]
    fn test_reward_is_valid_without_signature() {
        let miner = Wallet::new();
        let tx = Transaction::reward(miner.address().clone(), Amount(100));

        assert!(tx.is_reward());
        assert!(tx.is_valid().unwrap());
    }

    #[test]
    fn test_digest_depends_on_every_signed_field() {
        let wallet = Wallet::new();
        let tx = Transaction::new(
            wallet.address().clone(),
            Wallet::new().address().clone(),
            Amount(5),
        );

        assert_eq!(tx.digest(), tx.digest());

        let mut changed = tx.clone();
        changed.amount = Amount(6);
        assert_ne!(tx.digest(), changed.digest());

        let mut changed = tx.clone();
        changed.timestamp += Duration::milliseconds(1);
        assert_ne!(tx.digest(), changed.digest());

        // The signature itself is not part of the signed digest.
        let mut signed = tx.clone();
        signed.sign(&wallet).unwrap();
        assert_eq!(tx.digest(), signed.digest());
    }
}
