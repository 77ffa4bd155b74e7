//! Value snapshot and restore.
//!
//! A snapshot is every piece of channel state that is not derivable from
//! configuration. Key material stays out: the restoring side supplies the
//! same signer through [super::Config], and a restored channel signs
//! identical proposals given identical inputs.

use serde::{Deserialize, Serialize};

use crate::agreement::{CloseAgreement, OpenAgreement};
use crate::channel::{Channel, ChannelAccount, Config, Lifecycle};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub initiator: bool,
    pub lifecycle: Lifecycle,
    pub local_channel_account: ChannelAccount,
    pub remote_channel_account: ChannelAccount,
    pub open_agreement: Option<OpenAgreement>,
    pub latest_authorized: Option<CloseAgreement>,
    pub latest_unauthorized: Option<CloseAgreement>,
}

impl Channel {
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            initiator: self.initiator,
            lifecycle: self.lifecycle,
            local_channel_account: self.local_channel_account.clone(),
            remote_channel_account: self.remote_channel_account.clone(),
            open_agreement: self.open_agreement.clone(),
            latest_authorized: self.latest_authorized.clone(),
            latest_unauthorized: self.latest_unauthorized.clone(),
        }
    }

    /// Rebuilds a channel from a snapshot. The snapshot's account and
    /// role state overrides whatever the configuration carries.
    pub fn from_snapshot(config: Config, snapshot: ChannelSnapshot) -> Channel {
        Channel {
            network_id: config.network_id,
            max_open_expiry: config.max_open_expiry,
            initiator: snapshot.initiator,
            local_signer: config.local_signer,
            remote_signer: config.remote_signer,
            local_channel_account: snapshot.local_channel_account,
            remote_channel_account: snapshot.remote_channel_account,
            lifecycle: snapshot.lifecycle,
            open_agreement: snapshot.open_agreement,
            latest_authorized: snapshot.latest_authorized,
            latest_unauthorized: snapshot.latest_unauthorized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::{
        local_signer, open_channel_pair, remote_signer, STARTING_BALANCE,
    };
    use std::time::Duration;

    fn restore_config(initiator: bool) -> Config {
        let (signer, remote) = if initiator {
            (local_signer(), remote_signer().public_key())
        } else {
            (remote_signer(), local_signer().public_key())
        };
        Config {
            network_id: "test network".into(),
            max_open_expiry: Duration::from_secs(5 * 60),
            initiator,
            local_signer: signer,
            remote_signer: remote,
            local_channel_account: ChannelAccount {
                address: crate::sig::PublicKey::from_bytes([0; 32]),
                sequence_number: 0,
                balance: 0,
            },
            remote_channel_account: ChannelAccount {
                address: crate::sig::PublicKey::from_bytes([0; 32]),
                sequence_number: 0,
                balance: 0,
            },
        }
    }

    #[test]
    fn snapshot_round_trips_structurally() {
        let (mut local, mut remote) = open_channel_pair();
        let p = local.propose_payment(25).unwrap();
        let c = remote.confirm_payment(p.envelope).unwrap();
        local
            .finalize_payment(c.envelope.confirmer_signatures)
            .unwrap();

        let snapshot = local.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: ChannelSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, decoded);

        let restored = Channel::from_snapshot(restore_config(true), decoded);
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.balance(), 25);
        assert_eq!(restored.lifecycle(), Lifecycle::Open);
        assert_eq!(
            restored.local_channel_account().balance,
            STARTING_BALANCE,
        );
    }

    #[test]
    fn restored_channel_signs_identical_proposals() {
        let (mut local, mut remote) = open_channel_pair();

        let snapshot = local.snapshot();
        let mut restored = Channel::from_snapshot(restore_config(true), snapshot);

        let original = local.propose_payment_with_memo(10, b"m".to_vec()).unwrap();
        let replayed = restored.propose_payment_with_memo(10, b"m".to_vec()).unwrap();
        assert_eq!(original, replayed);

        // Both proposals confirm identically at the peer.
        let confirmed = remote.confirm_payment(replayed.envelope).unwrap();
        local
            .finalize_payment(confirmed.envelope.confirmer_signatures.clone())
            .unwrap();
        restored
            .finalize_payment(confirmed.envelope.confirmer_signatures)
            .unwrap();
        assert_eq!(local.snapshot(), restored.snapshot());
    }

    #[test]
    fn in_flight_proposal_survives_the_round_trip() {
        let (mut local, _remote) = open_channel_pair();
        local.propose_payment(5).unwrap();
        let snapshot = local.snapshot();
        let restored = Channel::from_snapshot(restore_config(true), snapshot.clone());
        assert_eq!(
            restored.latest_unauthorized().unwrap(),
            snapshot.latest_unauthorized.as_ref().unwrap(),
        );
    }
}
