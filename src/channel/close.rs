//! Coordinated close negotiation.
//!
//! A coordinated close is a close agreement at the current authorized
//! balance with both observation-period fields set to zero. Once both
//! parties have signed it, the close transaction is executable
//! immediately, without waiting out the observation period of an earlier
//! declaration.

use crate::agreement::{sign_close_txs, CloseAgreement, CloseDetails, CloseEnvelope};
use crate::channel::{Channel, Lifecycle};
use crate::errors::ChannelError;
use std::time::Duration;

impl Channel {
    /// Proposes closing the channel at the current authorized balance
    /// with no observation period.
    pub fn propose_close(&mut self) -> Result<CloseAgreement, ChannelError> {
        if !matches!(self.lifecycle, Lifecycle::Open | Lifecycle::Closing) {
            return Err(ChannelError::ChannelNotOpen);
        }
        if self.latest_unauthorized.is_some() {
            return Err(ChannelError::UnfinishedInProgress);
        }

        let details = CloseDetails {
            observation_period_time: Duration::ZERO,
            observation_period_ledger_gap: 0,
            iteration_number: self.next_iteration_number(),
            balance: self.balance(),
            proposing_signer: self.local_signer.public_key(),
            confirming_signer: self.remote_signer,
            payment_amount: 0,
            memo: Vec::new(),
        };
        let open_details = self
            .open_agreement
            .as_ref()
            .ok_or(ChannelError::ChannelNotOpen)?
            .envelope
            .details
            .clone();
        let txs = self.close_tx_pair(&open_details, &details)?;
        let signatures = sign_close_txs(&txs, &self.local_signer);

        let agreement = CloseAgreement {
            envelope: CloseEnvelope {
                details,
                proposer_signatures: signatures,
                confirmer_signatures: Default::default(),
            },
            transactions: txs,
        };
        self.latest_unauthorized = Some(agreement.clone());
        Ok(agreement)
    }

    fn validate_close(&self, envelope: &CloseEnvelope) -> Result<(), ChannelError> {
        if !matches!(self.lifecycle, Lifecycle::Open | Lifecycle::Closing) {
            return Err(ChannelError::ChannelNotOpen);
        }
        let d = &envelope.details;
        if d.iteration_number != self.next_iteration_number() {
            return Err(ChannelError::IterationMismatch {
                got: d.iteration_number,
                want: self.next_iteration_number(),
            });
        }
        if !d.is_coordinated_close() {
            return Err(ChannelError::ObservationPeriodMismatch);
        }
        if d.balance != self.balance() || d.payment_amount != 0 {
            return Err(ChannelError::DetailsMismatch);
        }
        if let Some(unauthorized) = &self.latest_unauthorized {
            if unauthorized.envelope.details != *d {
                return Err(ChannelError::DetailsMismatch);
            }
        }
        let local = self.local_signer.public_key();
        if d.confirming_signer != local && d.confirming_signer != self.remote_signer {
            return Err(ChannelError::SignerMismatch(d.confirming_signer));
        }
        if d.proposing_signer != local && d.proposing_signer != self.remote_signer {
            return Err(ChannelError::SignerMismatch(d.proposing_signer));
        }
        Ok(())
    }

    /// Confirms a coordinated close envelope, counter-signing when the
    /// local participant is the confirmer, and authorizes it.
    pub fn confirm_close(
        &mut self,
        envelope: CloseEnvelope,
    ) -> Result<CloseAgreement, ChannelError> {
        self.validate_close(&envelope)?;

        let open_details = self
            .open_agreement
            .as_ref()
            .ok_or(ChannelError::ChannelNotOpen)?
            .envelope
            .details
            .clone();
        let txs = self.close_tx_pair(&open_details, &envelope.details)?;

        let local = self.local_signer.public_key();
        let remote = self.remote_signer;
        let remote_sigs = *envelope
            .signatures_for(&remote)
            .ok_or(ChannelError::SignerMismatch(remote))?;
        let local_sigs = *envelope
            .signatures_for(&local)
            .ok_or(ChannelError::SignerMismatch(local))?;

        remote_sigs.verify_complete(&txs, &remote)?;
        local_sigs.verify_present(&txs, &local)?;

        let mut envelope = envelope;
        if local_sigs.is_empty() {
            if envelope.details.confirming_signer != local {
                return Err(ChannelError::InvalidSignature);
            }
            envelope.confirmer_signatures = sign_close_txs(&txs, &self.local_signer);
        }

        let agreement = CloseAgreement {
            envelope,
            transactions: txs,
        };
        self.latest_authorized = Some(agreement.clone());
        self.latest_unauthorized = None;
        Ok(agreement)
    }
}
