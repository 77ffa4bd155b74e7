//! Formation transaction: locks both channel accounts under shared
//! control, opening the channel on the ledger.

use super::{Error, Operation, Preconditions, TimeBounds, Tx};
use crate::ledger::{SignerWeight, Thresholds};
use crate::sig::PublicKey;

pub struct FormationParams {
    pub initiator_signer: PublicKey,
    pub responder_signer: PublicKey,
    pub initiator_channel_account: PublicKey,
    pub responder_channel_account: PublicKey,
    pub start_sequence: i64,
    /// Unix seconds after which the unexecuted formation expires.
    pub expires_at: i64,
}

/// Builds the formation transaction.
///
/// Executes at the starting sequence and puts both channel accounts under
/// 2-of-2 control: each account lists both participants' signers at
/// weight 1 with all thresholds at 2 and the master key disabled. The
/// expiry bound keeps a stale unexecuted formation from being submitted
/// long after the open negotiation.
pub fn formation(p: FormationParams) -> Result<Tx, Error> {
    if p.start_sequence <= 0 {
        return Err(Error::InvalidSequence);
    }

    let shared_signers = vec![
        SignerWeight {
            key: p.initiator_signer,
            weight: 1,
        },
        SignerWeight {
            key: p.responder_signer,
            weight: 1,
        },
    ];

    Ok(Tx {
        source_account: p.initiator_channel_account,
        sequence_number: p.start_sequence,
        base_fee: 0,
        preconditions: Preconditions {
            time_bounds: TimeBounds {
                min_time: 0,
                max_time: p.expires_at,
            },
            min_sequence_number: None,
            min_sequence_age: 0,
            min_sequence_ledger_gap: 0,
            extra_signers: vec![],
        },
        operations: vec![
            Operation::SetSigners {
                account: p.initiator_channel_account,
                signers: shared_signers.clone(),
                thresholds: Thresholds::SHARED,
            },
            Operation::SetSigners {
                account: p.responder_channel_account,
                signers: shared_signers,
                thresholds: Thresholds::SHARED,
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_both_accounts_under_shared_control() {
        let tx = formation(FormationParams {
            initiator_signer: PublicKey::from_bytes([1; 32]),
            responder_signer: PublicKey::from_bytes([2; 32]),
            initiator_channel_account: PublicKey::from_bytes([3; 32]),
            responder_channel_account: PublicKey::from_bytes([4; 32]),
            start_sequence: 101,
            expires_at: 5000,
        })
        .unwrap();
        assert_eq!(tx.sequence_number, 101);
        assert_eq!(tx.preconditions.time_bounds.max_time, 5000);
        assert_eq!(tx.operations.len(), 2);
        for op in &tx.operations {
            match op {
                Operation::SetSigners {
                    signers,
                    thresholds,
                    ..
                } => {
                    assert_eq!(signers.len(), 2);
                    assert_eq!(*thresholds, Thresholds::SHARED);
                }
                other => panic!("unexpected operation {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_nonpositive_start_sequence() {
        let err = formation(FormationParams {
            initiator_signer: PublicKey::from_bytes([1; 32]),
            responder_signer: PublicKey::from_bytes([2; 32]),
            initiator_channel_account: PublicKey::from_bytes([3; 32]),
            responder_channel_account: PublicKey::from_bytes([4; 32]),
            start_sequence: 0,
            expires_at: 0,
        })
        .unwrap_err();
        assert_eq!(err, Error::InvalidSequence);
    }
}
