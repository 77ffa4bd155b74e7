//! Payment negotiation: propose, confirm, and finalize close agreements
//! that move the channel balance.

use crate::agreement::{
    sign_close_txs, CloseAgreement, CloseDetails, CloseEnvelope, CloseSignatures,
};
use crate::channel::{Channel, Lifecycle};
use crate::errors::ChannelError;

impl Channel {
    /// Proposes a payment from the local participant to the remote one.
    pub fn propose_payment(&mut self, amount: i64) -> Result<CloseAgreement, ChannelError> {
        self.propose_payment_with_memo(amount, Vec::new())
    }

    /// Proposes a payment carrying an opaque memo. The memo is not bound
    /// into the signed transactions; it rides along in the envelope for
    /// the peer to store.
    pub fn propose_payment_with_memo(
        &mut self,
        amount: i64,
        memo: Vec<u8>,
    ) -> Result<CloseAgreement, ChannelError> {
        if amount < 0 {
            return Err(ChannelError::InvalidAmount);
        }
        if self.lifecycle != Lifecycle::Open {
            return Err(ChannelError::ChannelNotOpen);
        }
        // No further payments once any coordinated close is in play,
        // whether accepted or merely proposed by us.
        if self
            .latest_authorized
            .as_ref()
            .is_some_and(|a| a.envelope.details.is_coordinated_close())
        {
            return Err(ChannelError::CoordinatedCloseInProgress);
        }
        if self
            .latest_unauthorized
            .as_ref()
            .is_some_and(|a| a.envelope.details.is_coordinated_close())
        {
            return Err(ChannelError::CoordinatedCloseInProgress);
        }
        if self.latest_unauthorized.is_some() {
            return Err(ChannelError::UnfinishedInProgress);
        }

        let new_balance = if self.initiator {
            self.balance() + amount
        } else {
            self.balance() - amount
        };
        if self.amount_to_remote(new_balance) > self.local_channel_account.balance {
            return Err(ChannelError::Underfunded);
        }

        let authorized_details = &self
            .latest_authorized
            .as_ref()
            .ok_or(ChannelError::ChannelNotOpen)?
            .envelope
            .details;
        let details = CloseDetails {
            observation_period_time: authorized_details.observation_period_time,
            observation_period_ledger_gap: authorized_details.observation_period_ledger_gap,
            iteration_number: self.next_iteration_number(),
            balance: new_balance,
            proposing_signer: self.local_signer.public_key(),
            confirming_signer: self.remote_signer,
            payment_amount: amount,
            memo,
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

    fn validate_payment(&self, envelope: &CloseEnvelope) -> Result<(), ChannelError> {
        if self.lifecycle != Lifecycle::Open {
            return Err(ChannelError::ChannelNotOpen);
        }
        if self
            .latest_unauthorized
            .as_ref()
            .is_some_and(|a| a.envelope.details.is_coordinated_close())
        {
            return Err(ChannelError::CoordinatedCloseInProgress);
        }
        if self
            .latest_authorized
            .as_ref()
            .is_some_and(|a| a.envelope.details.is_coordinated_close())
        {
            return Err(ChannelError::CoordinatedCloseInProgress);
        }

        let d = &envelope.details;
        if d.iteration_number != self.next_iteration_number() {
            return Err(ChannelError::IterationMismatch {
                got: d.iteration_number,
                want: self.next_iteration_number(),
            });
        }
        let authorized = self
            .latest_authorized
            .as_ref()
            .ok_or(ChannelError::ChannelNotOpen)?;
        if d.observation_period_time != authorized.envelope.details.observation_period_time
            || d.observation_period_ledger_gap
                != authorized.envelope.details.observation_period_ledger_gap
        {
            return Err(ChannelError::ObservationPeriodMismatch);
        }
        if let Some(unauthorized) = &self.latest_unauthorized {
            if unauthorized.envelope.details != *d {
                // A differing proposal not from the peer is a tampered
                // round-trip of our own.
                if d.proposing_signer != self.remote_signer {
                    return Err(ChannelError::DetailsMismatch);
                }
                // Crossed proposals: both sides proposed this iteration.
                // Order the two proposals by proposing signer; the one
                // ordering first survives. Both sides evaluate the same
                // comparison, so exactly one side rejects the peer's
                // proposal while the other treats its own as superseded
                // and confirms the peer's, which clears the superseded
                // slot when it is authorized.
                if unauthorized.envelope.details.proposing_signer < d.proposing_signer {
                    return Err(ChannelError::UnfinishedInProgress);
                }
            }
        }

        let local = self.local_signer.public_key();
        if d.confirming_signer != local && d.confirming_signer != self.remote_signer {
            return Err(ChannelError::SignerMismatch(d.confirming_signer));
        }
        if d.proposing_signer != local && d.proposing_signer != self.remote_signer {
            return Err(ChannelError::SignerMismatch(d.proposing_signer));
        }

        // The proposer pays: the balance moves toward the responder when
        // the initiator proposed, toward the initiator otherwise.
        let mut applied = d.payment_amount;
        if d.proposing_signer == self.responder_signer() {
            applied = -applied;
        }
        if self.balance() + applied != d.balance {
            return Err(ChannelError::DetailsMismatch);
        }
        Ok(())
    }

    /// Confirms a payment envelope. The confirmer of the exchange signs
    /// here; the proposer uses it to validate its own returned proposal.
    /// On success the agreement is authorized and the in-flight slot is
    /// cleared.
    pub fn confirm_payment(
        &mut self,
        envelope: CloseEnvelope,
    ) -> Result<CloseAgreement, ChannelError> {
        self.validate_payment(&envelope)?;

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
            // Being the proposer, the local should have signed earlier.
            if envelope.details.confirming_signer != local {
                return Err(ChannelError::InvalidSignature);
            }
            // The channel only pushes money to the other participant;
            // a proposal pulling toward the proposer is rejected.
            let authorized_balance = self.balance();
            if (self.initiator && envelope.details.balance > authorized_balance)
                || (!self.initiator && envelope.details.balance < authorized_balance)
            {
                return Err(ChannelError::PaymentToProposer);
            }
            if self.amount_to_local(envelope.details.balance) > self.remote_channel_account.balance
            {
                return Err(ChannelError::Underfunded);
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

    /// Attaches the confirmer's returned signatures to the in-flight
    /// proposal and authorizes it. Only the proposer of the most recent
    /// unauthorized payment can finalize it.
    pub fn finalize_payment(
        &mut self,
        signatures: CloseSignatures,
    ) -> Result<CloseAgreement, ChannelError> {
        let unauthorized = self
            .latest_unauthorized
            .as_ref()
            .ok_or(ChannelError::NoUnauthorizedAgreement)?;

        signatures.verify_complete(&unauthorized.transactions, &self.remote_signer)?;

        let mut agreement = unauthorized.clone();
        agreement.envelope.confirmer_signatures = signatures;
        self.latest_authorized = Some(agreement.clone());
        self.latest_unauthorized = None;
        Ok(agreement)
    }
}
