//! Deterministic construction of the channel's ledger transactions.
//!
//! Every transaction is a pure function of its parameters: no clock, no
//! randomness. Both participants independently build the same [Tx] and
//! therefore the same hash, which is what the whole signing protocol
//! rests on. The hash is SHA-256 over the network id hash concatenated
//! with the canonical JSON image of the transaction; struct fields
//! serialize in declaration order, so the image is stable.

mod close;
mod declaration;
mod formation;

pub use close::{close, CloseParams};
pub use declaration::{declaration, DeclarationParams};
pub use formation::{formation, FormationParams};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::asset::Asset;
use crate::ledger::{SignerWeight, Thresholds};
use crate::sig::{PublicKey, Signature};

/// A 32-byte transaction hash, the payload every channel signature
/// covers.
pub type TxHash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid iteration number or start sequence: cannot be negative")]
    InvalidSequence,
    #[error("sequence number overflow")]
    SequenceOverflow,
    #[error("transaction could not be encoded")]
    Encode,
}

/// Valid-time window for a transaction. A `max_time` of zero means no
/// upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeBounds {
    pub min_time: i64,
    pub max_time: i64,
}

/// An extra signer constraint: the transaction is only valid if its
/// signature set contains `signer`'s signature over `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayloadSigner {
    pub signer: PublicKey,
    pub payload: Vec<u8>,
}

/// Validity preconditions attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Preconditions {
    pub time_bounds: TimeBounds,
    pub min_sequence_number: Option<i64>,
    /// Seconds the source account's sequence must have aged before the
    /// transaction may execute.
    pub min_sequence_age: u64,
    /// Ledgers that must have closed since the source account's sequence
    /// last changed.
    pub min_sequence_ledger_gap: u32,
    pub extra_signers: Vec<SignedPayloadSigner>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    BumpSequence {
        bump_to: i64,
    },
    Payment {
        source: PublicKey,
        destination: PublicKey,
        asset: Asset,
        amount: i64,
    },
    /// Replace an account's signer set and thresholds.
    SetSigners {
        account: PublicKey,
        signers: Vec<SignerWeight>,
        thresholds: Thresholds,
    },
}

/// An unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub source_account: PublicKey,
    pub sequence_number: i64,
    pub base_fee: i64,
    pub preconditions: Preconditions,
    pub operations: Vec<Operation>,
}

impl Tx {
    /// The hash signed by participants and matched against streamed
    /// ledger transactions. Domain-separated by the network id so the
    /// same transaction on different networks never shares a hash.
    pub fn hash(&self, network_id: &str) -> Result<TxHash, Error> {
        let body = serde_json::to_vec(self).map_err(|_| Error::Encode)?;
        let mut hasher = Sha256::new();
        hasher.update(Sha256::digest(network_id.as_bytes()));
        hasher.update(&body);
        Ok(hasher.finalize().into())
    }
}

/// A signature attached to a transaction, tagged with a hint of the key
/// it belongs to. When `payload` is set the signature covers the payload
/// instead of the transaction hash, satisfying a [SignedPayloadSigner]
/// precondition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratedSignature {
    pub hint: [u8; 4],
    pub signature: Signature,
    #[serde(default)]
    pub payload: Option<Vec<u8>>,
}

impl DecoratedSignature {
    pub fn new(signer: &PublicKey, signature: Signature) -> Self {
        DecoratedSignature {
            hint: signer.hint(),
            signature,
            payload: None,
        }
    }

    pub fn for_payload(signer: &PublicKey, signature: Signature, payload: Vec<u8>) -> Self {
        DecoratedSignature {
            hint: signer.hint(),
            signature,
            payload: Some(payload),
        }
    }
}

/// A transaction bundled with the signatures collected for it, ready for
/// submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxEnvelope {
    pub tx: Tx,
    pub signatures: Vec<DecoratedSignature>,
}

/// The sequence number consumed by iteration `i`'s declaration
/// transaction. The formation transaction executes at `start`, so every
/// iteration's pair sits two above the previous one, and a declaration
/// with a relaxed minimum sequence can preempt an older iteration's
/// close.
pub(crate) fn sequence_of_iteration(start: i64, iteration: i64) -> Result<i64, Error> {
    iteration
        .checked_mul(2)
        .and_then(|offset| start.checked_add(offset))
        .ok_or(Error::SequenceOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(tag: u8) -> PublicKey {
        PublicKey::from_bytes([tag; 32])
    }

    #[test]
    fn sequence_layout_leaves_room_for_the_formation() {
        let start = 101;
        assert_eq!(sequence_of_iteration(start, 0).unwrap(), 101);
        assert_eq!(sequence_of_iteration(start, 1).unwrap(), 103);
        assert_eq!(sequence_of_iteration(start, 2).unwrap(), 105);
    }

    #[test]
    fn sequence_overflow_is_an_error() {
        assert_eq!(
            sequence_of_iteration(i64::MAX - 1, 1),
            Err(Error::SequenceOverflow),
        );
    }

    #[test]
    fn hash_is_deterministic_and_network_separated() {
        let tx = Tx {
            source_account: account(1),
            sequence_number: 42,
            base_fee: 0,
            preconditions: Preconditions::default(),
            operations: vec![Operation::BumpSequence { bump_to: 0 }],
        };
        assert_eq!(tx.hash("test").unwrap(), tx.clone().hash("test").unwrap());
        assert_ne!(tx.hash("test").unwrap(), tx.hash("other").unwrap());
    }

    #[test]
    fn hash_changes_with_contents() {
        let mut tx = Tx {
            source_account: account(1),
            sequence_number: 42,
            base_fee: 0,
            preconditions: Preconditions::default(),
            operations: vec![],
        };
        let before = tx.hash("test").unwrap();
        tx.sequence_number = 43;
        assert_ne!(before, tx.hash("test").unwrap());
    }
}
