//! The channel state machine.
//!
//! A [Channel] is one participant's deterministic view of a two-party
//! payment channel: both identities, the open agreement, the most recent
//! authorized close agreement, and at most one in-flight unauthorized
//! agreement. It validates and counter-signs proposals and ingests
//! confirmed ledger transactions; it never talks to the network itself.
//!
//! Every `propose_*`/`confirm_*` method validates completely before
//! assigning anything, so a returned error means the channel state is
//! unchanged.

mod close;
mod ingest;
mod open;
mod payment;
mod snapshot;

#[cfg(test)]
pub(crate) mod test_support;

pub use open::OpenParams;
pub use snapshot::ChannelSnapshot;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::agreement::{
    CloseAgreement, CloseDetails, CloseTransactions, OpenAgreement, OpenDetails, Timestamp,
};
use crate::errors::ChannelError;
use crate::sig::{PublicKey, Signer};
use crate::txbuild::{self, CloseParams, DeclarationParams, TxEnvelope};

/// A participant's on-ledger channel account with its last observed
/// sequence number and balance. Both cached values move only when a
/// confirmed transaction is ingested or an explicit update call is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub address: PublicKey,
    pub sequence_number: i64,
    pub balance: i64,
}

/// Where the channel is in its life.
///
/// `Negotiating` covers the span from the first open proposal until the
/// formation transaction is seen executed on the ledger with the expected
/// account shapes; only then do payments become possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    Uninitialized,
    Negotiating,
    Open,
    Closing,
    Closed,
}

pub struct Config {
    pub network_id: String,
    pub max_open_expiry: Duration,
    /// Role flag: the initiator's channel account sources the formation
    /// and every declaration/close transaction.
    pub initiator: bool,
    pub local_signer: Signer,
    pub remote_signer: PublicKey,
    pub local_channel_account: ChannelAccount,
    pub remote_channel_account: ChannelAccount,
}

#[derive(Debug)]
pub struct Channel {
    network_id: String,
    max_open_expiry: Duration,
    initiator: bool,
    local_signer: Signer,
    remote_signer: PublicKey,
    local_channel_account: ChannelAccount,
    remote_channel_account: ChannelAccount,
    lifecycle: Lifecycle,
    open_agreement: Option<OpenAgreement>,
    latest_authorized: Option<CloseAgreement>,
    latest_unauthorized: Option<CloseAgreement>,
}

impl Channel {
    pub fn new(config: Config) -> Self {
        Channel {
            network_id: config.network_id,
            max_open_expiry: config.max_open_expiry,
            initiator: config.initiator,
            local_signer: config.local_signer,
            remote_signer: config.remote_signer,
            local_channel_account: config.local_channel_account,
            remote_channel_account: config.remote_channel_account,
            lifecycle: Lifecycle::Uninitialized,
            open_agreement: None,
            latest_authorized: None,
            latest_unauthorized: None,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// Balance of the latest authorized agreement; zero before the first
    /// payment.
    pub fn balance(&self) -> i64 {
        self.latest_authorized
            .as_ref()
            .map(|a| a.envelope.details.balance)
            .unwrap_or(0)
    }

    pub fn next_iteration_number(&self) -> i64 {
        self.latest_authorized
            .as_ref()
            .map(|a| a.iteration_number() + 1)
            .unwrap_or(1)
    }

    pub fn open_agreement(&self) -> Option<&OpenAgreement> {
        self.open_agreement.as_ref()
    }

    pub fn latest_authorized(&self) -> Option<&CloseAgreement> {
        self.latest_authorized.as_ref()
    }

    pub fn latest_unauthorized(&self) -> Option<&CloseAgreement> {
        self.latest_unauthorized.as_ref()
    }

    pub fn local_channel_account(&self) -> &ChannelAccount {
        &self.local_channel_account
    }

    pub fn remote_channel_account(&self) -> &ChannelAccount {
        &self.remote_channel_account
    }

    pub fn local_signer_key(&self) -> PublicKey {
        self.local_signer.public_key()
    }

    pub fn remote_signer_key(&self) -> PublicKey {
        self.remote_signer
    }

    pub fn update_local_channel_account_balance(&mut self, balance: i64) {
        self.local_channel_account.balance = balance;
    }

    pub fn update_remote_channel_account_balance(&mut self, balance: i64) {
        self.remote_channel_account.balance = balance;
    }

    /// The fully signed formation transaction, available once the open
    /// agreement carries both parties' signatures.
    pub fn open_tx(&self) -> Result<TxEnvelope, ChannelError> {
        let open = self
            .open_agreement
            .as_ref()
            .filter(|a| a.envelope.is_fully_signed())
            .ok_or(ChannelError::ChannelNotOpen)?;
        Ok(open.signed_formation_tx())
    }

    /// The latest authorized declaration and close transactions with all
    /// collected signatures attached, ready for submission.
    pub fn close_txs(&self) -> Result<(TxEnvelope, TxEnvelope), ChannelError> {
        let authorized = self
            .latest_authorized
            .as_ref()
            .ok_or(ChannelError::ChannelNotOpen)?;
        Ok(authorized.signed_transactions())
    }

    fn initiator_signer(&self) -> PublicKey {
        if self.initiator {
            self.local_signer.public_key()
        } else {
            self.remote_signer
        }
    }

    fn responder_signer(&self) -> PublicKey {
        if self.initiator {
            self.remote_signer
        } else {
            self.local_signer.public_key()
        }
    }

    fn initiator_channel_account(&self) -> &ChannelAccount {
        if self.initiator {
            &self.local_channel_account
        } else {
            &self.remote_channel_account
        }
    }

    fn responder_channel_account(&self) -> &ChannelAccount {
        if self.initiator {
            &self.remote_channel_account
        } else {
            &self.local_channel_account
        }
    }

    /// How much the local participant would owe the remote if the channel
    /// closed at the given balance.
    fn amount_to_remote(&self, balance: i64) -> i64 {
        if self.initiator {
            balance.max(0)
        } else {
            (-balance).max(0)
        }
    }

    /// How much the remote participant would owe the local one.
    fn amount_to_local(&self, balance: i64) -> i64 {
        if self.initiator {
            (-balance).max(0)
        } else {
            balance.max(0)
        }
    }

    /// Builds the declaration/close transaction pair an agreement is
    /// signed over. Pure in the open and close details, so both
    /// participants derive identical hashes.
    fn close_tx_pair(
        &self,
        open: &OpenDetails,
        close: &CloseDetails,
    ) -> Result<CloseTransactions, ChannelError> {
        let close_tx = txbuild::close(CloseParams {
            observation_period_time: close.observation_period_time,
            observation_period_ledger_gap: close.observation_period_ledger_gap,
            initiator_signer: self.initiator_signer(),
            responder_signer: self.responder_signer(),
            initiator_channel_account: self.initiator_channel_account().address,
            responder_channel_account: self.responder_channel_account().address,
            start_sequence: open.starting_sequence,
            iteration_number: close.iteration_number,
            asset: open.asset.clone(),
            amount_to_initiator: (-close.balance).max(0),
            amount_to_responder: close.balance.max(0),
        })?;
        let close_hash = close_tx.hash(&self.network_id)?;
        let declaration = txbuild::declaration(DeclarationParams {
            initiator_channel_account: self.initiator_channel_account().address,
            start_sequence: open.starting_sequence,
            iteration_number: close.iteration_number,
            iteration_number_executed: 0,
            close_tx_hash: close_hash,
            confirming_signer: close.confirming_signer,
        })?;
        let declaration_hash = declaration.hash(&self.network_id)?;
        Ok(CloseTransactions {
            declaration_hash,
            declaration,
            close_hash,
            close: close_tx,
        })
    }
}

pub(crate) fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
