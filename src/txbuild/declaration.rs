//! Declaration transaction: announces intent to close at an iteration.

use super::{sequence_of_iteration, Error, Operation, Preconditions, SignedPayloadSigner, TimeBounds, Tx};
use crate::sig::PublicKey;
use crate::txbuild::TxHash;

pub struct DeclarationParams {
    pub initiator_channel_account: PublicKey,
    pub start_sequence: i64,
    pub iteration_number: i64,
    pub iteration_number_executed: i64,
    pub close_tx_hash: TxHash,
    pub confirming_signer: PublicKey,
}

/// Builds the declaration transaction for an iteration.
///
/// The declaration is the first transaction in an iteration's pair. Its
/// minimum sequence number reaches back to the last executed iteration so
/// that a newer declaration can preempt an older close during the
/// observation period.
///
/// The extra signer requires a signature by the confirming signer over
/// the close transaction's hash, in addition to the account signers. The
/// confirming signer must therefore reveal that signature publicly when
/// submitting the declaration, and cannot withhold the signatures for the
/// closing transaction.
pub fn declaration(p: DeclarationParams) -> Result<Tx, Error> {
    if p.iteration_number < 0 || p.iteration_number_executed < 0 || p.start_sequence <= 0 {
        return Err(Error::InvalidSequence);
    }

    let sequence_number = sequence_of_iteration(p.start_sequence, p.iteration_number)?;
    let min_sequence_number = sequence_of_iteration(p.start_sequence, p.iteration_number_executed)?;

    Ok(Tx {
        source_account: p.initiator_channel_account,
        sequence_number,
        base_fee: 0,
        preconditions: Preconditions {
            time_bounds: TimeBounds::default(),
            min_sequence_number: Some(min_sequence_number),
            min_sequence_age: 0,
            min_sequence_ledger_gap: 0,
            extra_signers: vec![SignedPayloadSigner {
                signer: p.confirming_signer,
                payload: p.close_tx_hash.to_vec(),
            }],
        },
        operations: vec![Operation::BumpSequence { bump_to: 0 }],
    })
}
