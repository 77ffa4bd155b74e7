//! Shared helpers for channel unit tests.

use std::time::Duration;

use crate::asset::Asset;
use crate::channel::{unix_now, Channel, ChannelAccount, Config, OpenParams};
use crate::ledger::{AccountEntry, ResultMeta, SignerWeight, Thresholds, TxResult};
use crate::sig::{PublicKey, Signer};

pub const DAY: i64 = 24 * 60 * 60;
pub const STARTING_BALANCE: i64 = 100_0000000;

pub fn local_signer() -> Signer {
    Signer::from_seed([1; 32])
}

pub fn remote_signer() -> Signer {
    Signer::from_seed([2; 32])
}

// The local account address orders before the remote one, so the local
// participant is the initiator.
pub fn local_account_address() -> PublicKey {
    PublicKey::from_bytes([0x10; 32])
}

pub fn remote_account_address() -> PublicKey {
    PublicKey::from_bytes([0x20; 32])
}

pub fn open_params() -> OpenParams {
    OpenParams {
        observation_period_time: Duration::from_secs(20),
        observation_period_ledger_gap: 1,
        asset: Asset::Native,
        expires_at: unix_now() + 60,
    }
}

/// A pair of channels for the two participants of the same channel. The
/// first is the initiator.
pub fn channel_pair() -> (Channel, Channel) {
    let local = Channel::new(Config {
        network_id: "test network".into(),
        max_open_expiry: Duration::from_secs(5 * 60),
        initiator: true,
        local_signer: local_signer(),
        remote_signer: remote_signer().public_key(),
        local_channel_account: ChannelAccount {
            address: local_account_address(),
            sequence_number: 101,
            balance: STARTING_BALANCE,
        },
        remote_channel_account: ChannelAccount {
            address: remote_account_address(),
            sequence_number: 202,
            balance: STARTING_BALANCE,
        },
    });
    let remote = Channel::new(Config {
        network_id: "test network".into(),
        max_open_expiry: Duration::from_secs(5 * 60),
        initiator: false,
        local_signer: remote_signer(),
        remote_signer: local_signer().public_key(),
        local_channel_account: ChannelAccount {
            address: remote_account_address(),
            sequence_number: 202,
            balance: STARTING_BALANCE,
        },
        remote_channel_account: ChannelAccount {
            address: local_account_address(),
            sequence_number: 101,
            balance: STARTING_BALANCE,
        },
    });
    (local, remote)
}

/// Result meta matching a successfully executed formation transaction.
pub fn formation_meta(start_sequence: i64) -> ResultMeta {
    let signers = vec![
        SignerWeight {
            key: local_signer().public_key(),
            weight: 1,
        },
        SignerWeight {
            key: remote_signer().public_key(),
            weight: 1,
        },
    ];
    ResultMeta {
        accounts: vec![
            AccountEntry {
                address: local_account_address(),
                sequence_number: start_sequence,
                balance: Some(STARTING_BALANCE),
                signers: signers.clone(),
                thresholds: Thresholds::SHARED,
            },
            AccountEntry {
                address: remote_account_address(),
                sequence_number: 202,
                balance: Some(STARTING_BALANCE),
                signers,
                thresholds: Thresholds::SHARED,
            },
        ],
    }
}

pub fn success() -> TxResult {
    TxResult { successful: true }
}

/// Negotiates the open agreement and ingests the executed formation on
/// both sides, leaving both channels open at iteration 1, balance 0.
pub fn open_channel_pair() -> (Channel, Channel) {
    let (mut local, mut remote) = channel_pair();
    let proposal = local.propose_open(open_params()).unwrap();
    let response = remote.confirm_open(proposal).unwrap();
    local.confirm_open(response).unwrap();

    let formation = local.open_tx().unwrap();
    let meta = formation_meta(102);
    local.ingest_tx(&formation, &success(), &meta).unwrap();
    remote.ingest_tx(&formation, &success(), &meta).unwrap();
    (local, remote)
}
