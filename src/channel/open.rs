//! Open negotiation: propose and confirm the agreement that forms the
//! channel.

use crate::agreement::{
    sign_open_txs, CloseDetails, OpenAgreement, OpenDetails, OpenEnvelope, OpenTransactions,
};
use crate::asset::Asset;
use crate::channel::{unix_now, Channel, Lifecycle};
use crate::errors::ChannelError;
use crate::txbuild::{self, FormationParams};
use std::time::Duration;

use crate::agreement::Timestamp;

/// Parameters the proposer chooses for a new channel.
pub struct OpenParams {
    pub observation_period_time: Duration,
    pub observation_period_ledger_gap: u32,
    pub asset: Asset,
    pub expires_at: Timestamp,
}

impl Channel {
    /// Proposes opening the channel, returning the locally signed open
    /// envelope to send to the peer.
    pub fn propose_open(&mut self, params: OpenParams) -> Result<OpenEnvelope, ChannelError> {
        if self.lifecycle != Lifecycle::Uninitialized {
            return Err(ChannelError::AlreadyOpen);
        }
        if params.expires_at > unix_now() + self.max_open_expiry.as_secs() as i64 {
            return Err(ChannelError::OpenExpiryExceeded);
        }

        let details = OpenDetails {
            observation_period_time: params.observation_period_time,
            observation_period_ledger_gap: params.observation_period_ledger_gap,
            asset: params.asset,
            expires_at: params.expires_at,
            starting_sequence: self.initiator_channel_account().sequence_number + 1,
            proposing_signer: self.local_signer.public_key(),
            confirming_signer: self.remote_signer,
        };
        let txs = self.open_txs(&details)?;
        let signatures = sign_open_txs(&txs, &self.local_signer);

        let envelope = OpenEnvelope {
            details,
            proposer_signatures: signatures,
            confirmer_signatures: Default::default(),
        };
        self.open_agreement = Some(OpenAgreement {
            envelope: envelope.clone(),
            transactions: txs,
        });
        self.lifecycle = Lifecycle::Negotiating;
        Ok(envelope)
    }

    /// Confirms an open envelope received from the peer, counter-signing
    /// when the local participant is the confirmer. On success the open
    /// agreement is authorized and the iteration-1 close agreement seeds
    /// the latest authorized slot; the channel still waits for the
    /// formation transaction to execute before payments can start.
    ///
    /// Confirming an envelope equal to the already-authorized open
    /// agreement is a no-op returning the authorized envelope.
    pub fn confirm_open(&mut self, envelope: OpenEnvelope) -> Result<OpenEnvelope, ChannelError> {
        if let Some(open) = &self.open_agreement {
            if open.envelope.is_fully_signed() {
                if open.envelope == envelope {
                    return Ok(open.envelope.clone());
                }
                return Err(ChannelError::AlreadyOpen);
            }
        }

        self.validate_open(&envelope)?;

        let local = self.local_signer.public_key();
        let remote = self.remote_signer;
        let txs = self.open_txs(&envelope.details)?;

        // The peer only ever sends an envelope it has fully signed.
        let remote_sigs = envelope
            .signatures_for(&remote)
            .ok_or(ChannelError::SignerMismatch(remote))?;
        remote_sigs.verify_complete(&txs, &remote)?;

        let local_sigs = envelope
            .signatures_for(&local)
            .ok_or(ChannelError::SignerMismatch(local))?;
        local_sigs.verify_present(&txs, &local)?;

        let mut envelope = envelope;
        if envelope
            .signatures_for(&local)
            .is_some_and(|s| s.is_empty())
        {
            if envelope.details.confirming_signer != local {
                return Err(ChannelError::InvalidSignature);
            }
            envelope.confirmer_signatures = sign_open_txs(&txs, &self.local_signer);
        }

        if !envelope.is_fully_signed() {
            return Err(ChannelError::InvalidSignature);
        }

        let agreement = OpenAgreement {
            envelope: envelope.clone(),
            transactions: txs,
        };
        self.latest_authorized = Some(agreement.close_agreement());
        self.open_agreement = Some(agreement);
        self.lifecycle = Lifecycle::Negotiating;
        Ok(envelope)
    }

    fn validate_open(&self, envelope: &OpenEnvelope) -> Result<(), ChannelError> {
        let d = &envelope.details;
        if d.expires_at > unix_now() + self.max_open_expiry.as_secs() as i64 {
            return Err(ChannelError::OpenExpiryExceeded);
        }
        if d.starting_sequence != self.initiator_channel_account().sequence_number + 1 {
            return Err(ChannelError::DetailsMismatch);
        }

        let local = self.local_signer.public_key();
        let remote = self.remote_signer;
        if d.proposing_signer != local && d.proposing_signer != remote {
            return Err(ChannelError::SignerMismatch(d.proposing_signer));
        }
        if d.confirming_signer != local && d.confirming_signer != remote {
            return Err(ChannelError::SignerMismatch(d.confirming_signer));
        }
        if d.proposing_signer == d.confirming_signer {
            return Err(ChannelError::SignerMismatch(d.confirming_signer));
        }

        // A proposal of our own must round-trip unchanged.
        if let Some(open) = &self.open_agreement {
            if open.envelope.details != *d {
                return Err(ChannelError::DetailsMismatch);
            }
        }
        Ok(())
    }

    /// Builds the open transaction set: the formation transaction plus
    /// the iteration-1 declaration/close pair at balance zero.
    fn open_txs(&self, details: &OpenDetails) -> Result<OpenTransactions, ChannelError> {
        let formation = txbuild::formation(FormationParams {
            initiator_signer: self.initiator_signer(),
            responder_signer: self.responder_signer(),
            initiator_channel_account: self.initiator_channel_account().address,
            responder_channel_account: self.responder_channel_account().address,
            start_sequence: details.starting_sequence,
            expires_at: details.expires_at,
        })?;
        let formation_hash = formation.hash(&self.network_id)?;

        let close_details = CloseDetails {
            observation_period_time: details.observation_period_time,
            observation_period_ledger_gap: details.observation_period_ledger_gap,
            iteration_number: 1,
            balance: 0,
            proposing_signer: details.proposing_signer,
            confirming_signer: details.confirming_signer,
            payment_amount: 0,
            memo: Vec::new(),
        };
        let pair = self.close_tx_pair(details, &close_details)?;

        Ok(OpenTransactions {
            declaration_hash: pair.declaration_hash,
            declaration: pair.declaration,
            close_hash: pair.close_hash,
            close: pair.close,
            formation_hash,
            formation,
        })
    }
}
