//! Ingestion of confirmed ledger transactions.
//!
//! The streamer feeds every confirmed transaction touching the channel
//! accounts through here. Ingestion is how the channel learns that the
//! formation executed, that a close was declared, and that the channel
//! finally closed; it is also the only place cached account state moves
//! without an explicit update call.

use crate::channel::{Channel, Lifecycle};
use crate::errors::ChannelError;
use crate::ledger::{ResultMeta, Thresholds, TxResult};
use crate::txbuild::TxEnvelope;

impl Channel {
    /// Ingests one confirmed transaction. Transactions that do not match
    /// any of the channel's transaction hashes, or failed on the ledger,
    /// are ignored.
    pub fn ingest_tx(
        &mut self,
        tx: &TxEnvelope,
        result: &TxResult,
        result_meta: &ResultMeta,
    ) -> Result<(), ChannelError> {
        let open = self
            .open_agreement
            .as_ref()
            .ok_or(ChannelError::ChannelNotOpen)?;
        if !result.successful {
            return Ok(());
        }

        let hash = tx.tx.hash(&self.network_id)?;

        if hash == open.transactions.formation_hash {
            self.ingest_formation_tx(result_meta);
            return Ok(());
        }

        let Some(authorized) = &self.latest_authorized else {
            return Ok(());
        };
        if hash == authorized.transactions.declaration_hash
            && self.lifecycle == Lifecycle::Open
        {
            self.lifecycle = Lifecycle::Closing;
            return Ok(());
        }
        if hash == authorized.transactions.close_hash
            && matches!(self.lifecycle, Lifecycle::Open | Lifecycle::Closing)
        {
            self.lifecycle = Lifecycle::Closed;
            self.update_accounts_from_meta(result_meta);
            return Ok(());
        }
        Ok(())
    }

    /// Validates that the formation executed with the expected shape:
    /// both channel accounts under 2-of-2 control by exactly the two
    /// participant signers, and the initiator account at the starting
    /// sequence. Anything else leaves the channel unopened.
    fn ingest_formation_tx(&mut self, meta: &ResultMeta) {
        if self.lifecycle != Lifecycle::Negotiating {
            return;
        }
        let Some(open) = &self.open_agreement else {
            return;
        };
        if !open.envelope.is_fully_signed() {
            return;
        }
        let starting_sequence = open.envelope.details.starting_sequence;
        let signers = [self.initiator_signer(), self.responder_signer()];
        let initiator_address = self.initiator_channel_account().address;

        for account in [&self.local_channel_account, &self.remote_channel_account] {
            let Some(entry) = meta.account(&account.address) else {
                return;
            };
            if !entry.has_exact_signers(&signers) || entry.thresholds != Thresholds::SHARED {
                return;
            }
            if entry.address == initiator_address && entry.sequence_number != starting_sequence {
                return;
            }
        }

        self.update_accounts_from_meta(meta);
        self.lifecycle = Lifecycle::Open;
    }

    fn update_accounts_from_meta(&mut self, meta: &ResultMeta) {
        if let Some(entry) = meta.account(&self.local_channel_account.address) {
            self.local_channel_account.sequence_number = entry.sequence_number;
            if let Some(balance) = entry.balance {
                self.local_channel_account.balance = balance;
            }
        }
        if let Some(entry) = meta.account(&self.remote_channel_account.address) {
            self.remote_channel_account.sequence_number = entry.sequence_number;
            if let Some(balance) = entry.balance {
                self.remote_channel_account.balance = balance;
            }
        }
    }
}
