//! Close transaction: disburses final balances and returns the channel
//! accounts to single-signer control.

use std::time::Duration;

use super::{sequence_of_iteration, Error, Operation, Preconditions, TimeBounds, Tx};
use crate::asset::Asset;
use crate::ledger::{SignerWeight, Thresholds};
use crate::sig::PublicKey;

pub struct CloseParams {
    pub observation_period_time: Duration,
    pub observation_period_ledger_gap: u32,
    pub initiator_signer: PublicKey,
    pub responder_signer: PublicKey,
    pub initiator_channel_account: PublicKey,
    pub responder_channel_account: PublicKey,
    pub start_sequence: i64,
    pub iteration_number: i64,
    pub asset: Asset,
    pub amount_to_initiator: i64,
    pub amount_to_responder: i64,
}

/// Builds the close transaction for an iteration.
///
/// The close sits one sequence above its declaration and carries the
/// observation period as minimum-sequence-age and ledger-gap
/// preconditions, so it cannot execute until the declaration has been on
/// the ledger for the agreed period. A zero observation period (a
/// coordinated close) is executable immediately.
pub fn close(p: CloseParams) -> Result<Tx, Error> {
    if p.iteration_number < 0 || p.start_sequence <= 0 {
        return Err(Error::InvalidSequence);
    }

    let sequence_number = sequence_of_iteration(p.start_sequence, p.iteration_number)?
        .checked_add(1)
        .ok_or(Error::SequenceOverflow)?;

    let mut operations = Vec::with_capacity(4);
    if p.amount_to_responder > 0 {
        operations.push(Operation::Payment {
            source: p.initiator_channel_account,
            destination: p.responder_channel_account,
            asset: p.asset.clone(),
            amount: p.amount_to_responder,
        });
    }
    if p.amount_to_initiator > 0 {
        operations.push(Operation::Payment {
            source: p.responder_channel_account,
            destination: p.initiator_channel_account,
            asset: p.asset.clone(),
            amount: p.amount_to_initiator,
        });
    }
    operations.push(Operation::SetSigners {
        account: p.initiator_channel_account,
        signers: vec![SignerWeight {
            key: p.initiator_signer,
            weight: 1,
        }],
        thresholds: Thresholds::SOLE,
    });
    operations.push(Operation::SetSigners {
        account: p.responder_channel_account,
        signers: vec![SignerWeight {
            key: p.responder_signer,
            weight: 1,
        }],
        thresholds: Thresholds::SOLE,
    });

    Ok(Tx {
        source_account: p.initiator_channel_account,
        sequence_number,
        base_fee: 0,
        preconditions: Preconditions {
            time_bounds: TimeBounds::default(),
            min_sequence_number: None,
            min_sequence_age: p.observation_period_time.as_secs(),
            min_sequence_ledger_gap: p.observation_period_ledger_gap,
            extra_signers: vec![],
        },
        operations,
    })
}
