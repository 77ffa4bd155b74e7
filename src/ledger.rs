//! Value types describing confirmed ledger transactions.
//!
//! The concrete ledger lives behind the agent's collaborator traits; the
//! channel only ever sees these already-decoded values when a confirmed
//! transaction is ingested. Account entries mirror the slice of ledger
//! state the channel validates: signer sets, thresholds, sequence
//! numbers, and optionally balances.

use serde::{Deserialize, Serialize};

use crate::sig::PublicKey;

/// Weight assigned to a signer on a ledger account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerWeight {
    pub key: PublicKey,
    pub weight: u8,
}

/// Master-key weight plus the low/medium/high operation thresholds of a
/// ledger account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub master_weight: u8,
    pub low: u8,
    pub medium: u8,
    pub high: u8,
}

impl Thresholds {
    /// Both participants' signatures required for any spend.
    pub const SHARED: Thresholds = Thresholds {
        master_weight: 0,
        low: 2,
        medium: 2,
        high: 2,
    };

    /// Single-signer control, the shape accounts return to at close.
    pub const SOLE: Thresholds = Thresholds {
        master_weight: 0,
        low: 1,
        medium: 1,
        high: 1,
    };
}

/// The state of one ledger account after a transaction was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub address: PublicKey,
    pub sequence_number: i64,
    #[serde(default)]
    pub balance: Option<i64>,
    pub signers: Vec<SignerWeight>,
    pub thresholds: Thresholds,
}

impl AccountEntry {
    /// True if the entry's signer set is exactly the given keys, each
    /// with weight 1, in any order.
    pub fn has_exact_signers(&self, keys: &[PublicKey]) -> bool {
        self.signers.len() == keys.len()
            && keys.iter().all(|k| {
                self.signers
                    .iter()
                    .any(|s| s.key == *k && s.weight == 1)
            })
    }
}

/// Outcome of a transaction as recorded by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    pub successful: bool,
}

/// The ledger entry changes a confirmed transaction produced, reduced to
/// the account entries the channel watches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultMeta {
    pub accounts: Vec<AccountEntry>,
}

impl ResultMeta {
    pub fn account(&self, address: &PublicKey) -> Option<&AccountEntry> {
        self.accounts.iter().find(|a| a.address == *address)
    }
}

/// One confirmed transaction as yielded by a [crate::agent::Streamer],
/// paired with the cursor to resume streaming after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamedTransaction {
    pub cursor: String,
    pub tx: crate::txbuild::TxEnvelope,
    pub result: TxResult,
    pub result_meta: ResultMeta,
}
