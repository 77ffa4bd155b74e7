//! Agreement value types and the signing rules binding them.
//!
//! A close agreement is one iteration's declaration/close transaction
//! pair plus the signatures both participants have produced for it so
//! far. The open agreement is the special first iteration: the same pair
//! with a zero balance, plus the formation transaction that opens the
//! channel on the ledger.
//!
//! Only the envelope (details and signatures) travels over the wire.
//! Transactions are always recomputed locally from the details, so a
//! peer cannot smuggle in transactions that differ from what was signed.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ChannelError;
use crate::sig::{PublicKey, Signature, Signer};
use crate::txbuild::{DecoratedSignature, Tx, TxEnvelope, TxHash};

/// Unix seconds.
pub type Timestamp = i64;

/// The details of one close iteration that the participants agree on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseDetails {
    pub observation_period_time: Duration,
    pub observation_period_ledger_gap: u32,
    pub iteration_number: i64,
    /// Cumulative net transfer from the initiator to the responder.
    /// Negative when the responder has paid more than it received.
    pub balance: i64,
    pub proposing_signer: PublicKey,
    pub confirming_signer: PublicKey,

    // The following fields are not captured in the signatures produced by
    // signers because they are not embedded into the agreement's
    // transactions.
    pub payment_amount: i64,
    #[serde(default)]
    pub memo: Vec<u8>,
}

impl CloseDetails {
    /// A coordinated close is the one agreement with no observation
    /// period at all.
    pub fn is_coordinated_close(&self) -> bool {
        self.observation_period_time.is_zero() && self.observation_period_ledger_gap == 0
    }
}

/// One participant's signatures over a close transaction pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CloseSignatures {
    pub declaration: Option<Signature>,
    pub close: Option<Signature>,
}

impl CloseSignatures {
    pub fn is_empty(&self) -> bool {
        self.declaration.is_none() && self.close.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.declaration.is_some() && self.close.is_some()
    }

    /// Verifies whichever signatures are present under the given signer.
    pub fn verify_present(
        &self,
        txs: &CloseTransactions,
        signer: &PublicKey,
    ) -> Result<(), ChannelError> {
        if let Some(sig) = &self.declaration {
            signer.verify(&txs.declaration_hash, sig)?;
        }
        if let Some(sig) = &self.close {
            signer.verify(&txs.close_hash, sig)?;
        }
        Ok(())
    }

    /// Verifies that both signatures are present and valid under the
    /// given signer.
    pub fn verify_complete(
        &self,
        txs: &CloseTransactions,
        signer: &PublicKey,
    ) -> Result<(), ChannelError> {
        if !self.is_complete() {
            return Err(ChannelError::InvalidSignature);
        }
        self.verify_present(txs, signer)
    }
}

/// Signs both hashes of a close transaction pair.
pub fn sign_close_txs(txs: &CloseTransactions, signer: &Signer) -> CloseSignatures {
    CloseSignatures {
        declaration: Some(signer.sign(&txs.declaration_hash)),
        close: Some(signer.sign(&txs.close_hash)),
    }
}

/// The transaction pair of one iteration, derived deterministically from
/// the open and close details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseTransactions {
    pub declaration_hash: TxHash,
    pub declaration: Tx,
    pub close_hash: TxHash,
    pub close: Tx,
}

/// Everything a participant needs to execute a close agreement: the
/// agreed details and both parties' signatures, keyed by who proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseEnvelope {
    pub details: CloseDetails,
    #[serde(default)]
    pub proposer_signatures: CloseSignatures,
    #[serde(default)]
    pub confirmer_signatures: CloseSignatures,
}

impl CloseEnvelope {
    /// The signatures held for the given signer, if it participates in
    /// this agreement.
    pub fn signatures_for(&self, signer: &PublicKey) -> Option<&CloseSignatures> {
        if self.details.proposing_signer == *signer {
            return Some(&self.proposer_signatures);
        }
        if self.details.confirming_signer == *signer {
            return Some(&self.confirmer_signatures);
        }
        None
    }

    pub fn is_fully_signed(&self) -> bool {
        self.proposer_signatures.is_complete() && self.confirmer_signatures.is_complete()
    }
}

/// A close agreement as tracked by the channel: the envelope plus the
/// locally recomputed transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseAgreement {
    pub envelope: CloseEnvelope,
    pub transactions: CloseTransactions,
}

impl CloseAgreement {
    pub fn iteration_number(&self) -> i64 {
        self.envelope.details.iteration_number
    }

    /// Attaches the envelope's signatures to the transaction pair,
    /// producing submittable envelopes.
    ///
    /// The confirmer's close signature is additionally attached to the
    /// declaration as a payload signature, satisfying the declaration's
    /// extra-signer precondition.
    pub fn signed_transactions(&self) -> (TxEnvelope, TxEnvelope) {
        let details = &self.envelope.details;
        let mut declaration_sigs = Vec::new();
        let mut close_sigs = Vec::new();

        if let Some(sig) = self.envelope.proposer_signatures.declaration {
            declaration_sigs.push(DecoratedSignature::new(&details.proposing_signer, sig));
        }
        if let Some(sig) = self.envelope.proposer_signatures.close {
            close_sigs.push(DecoratedSignature::new(&details.proposing_signer, sig));
        }
        if let Some(sig) = self.envelope.confirmer_signatures.declaration {
            declaration_sigs.push(DecoratedSignature::new(&details.confirming_signer, sig));
        }
        if let Some(sig) = self.envelope.confirmer_signatures.close {
            close_sigs.push(DecoratedSignature::new(&details.confirming_signer, sig));
            declaration_sigs.push(DecoratedSignature::for_payload(
                &details.confirming_signer,
                sig,
                self.transactions.close_hash.to_vec(),
            ));
        }

        (
            TxEnvelope {
                tx: self.transactions.declaration.clone(),
                signatures: declaration_sigs,
            },
            TxEnvelope {
                tx: self.transactions.close.clone(),
                signatures: close_sigs,
            },
        )
    }
}

/// The details of the open agreement, immutable once agreed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDetails {
    pub observation_period_time: Duration,
    pub observation_period_ledger_gap: u32,
    pub asset: crate::asset::Asset,
    pub expires_at: Timestamp,
    pub starting_sequence: i64,
    pub proposing_signer: PublicKey,
    pub confirming_signer: PublicKey,
}

/// One participant's signatures over the open transaction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenSignatures {
    pub declaration: Option<Signature>,
    pub close: Option<Signature>,
    pub formation: Option<Signature>,
}

impl OpenSignatures {
    pub fn is_empty(&self) -> bool {
        self.declaration.is_none() && self.close.is_none() && self.formation.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.declaration.is_some() && self.close.is_some() && self.formation.is_some()
    }

    pub fn verify_present(
        &self,
        txs: &OpenTransactions,
        signer: &PublicKey,
    ) -> Result<(), ChannelError> {
        if let Some(sig) = &self.declaration {
            signer.verify(&txs.declaration_hash, sig)?;
        }
        if let Some(sig) = &self.close {
            signer.verify(&txs.close_hash, sig)?;
        }
        if let Some(sig) = &self.formation {
            signer.verify(&txs.formation_hash, sig)?;
        }
        Ok(())
    }

    pub fn verify_complete(
        &self,
        txs: &OpenTransactions,
        signer: &PublicKey,
    ) -> Result<(), ChannelError> {
        if !self.is_complete() {
            return Err(ChannelError::InvalidSignature);
        }
        self.verify_present(txs, signer)
    }
}

/// Signs the three open transactions.
pub fn sign_open_txs(txs: &OpenTransactions, signer: &Signer) -> OpenSignatures {
    OpenSignatures {
        declaration: Some(signer.sign(&txs.declaration_hash)),
        close: Some(signer.sign(&txs.close_hash)),
        formation: Some(signer.sign(&txs.formation_hash)),
    }
}

/// The open agreement's transaction set: the iteration-1 pair plus the
/// formation transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTransactions {
    pub declaration_hash: TxHash,
    pub declaration: Tx,
    pub close_hash: TxHash,
    pub close: Tx,
    pub formation_hash: TxHash,
    pub formation: Tx,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenEnvelope {
    pub details: OpenDetails,
    #[serde(default)]
    pub proposer_signatures: OpenSignatures,
    #[serde(default)]
    pub confirmer_signatures: OpenSignatures,
}

impl OpenEnvelope {
    pub fn signatures_for(&self, signer: &PublicKey) -> Option<&OpenSignatures> {
        if self.details.proposing_signer == *signer {
            return Some(&self.proposer_signatures);
        }
        if self.details.confirming_signer == *signer {
            return Some(&self.confirmer_signatures);
        }
        None
    }

    pub fn is_fully_signed(&self) -> bool {
        self.proposer_signatures.is_complete() && self.confirmer_signatures.is_complete()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAgreement {
    pub envelope: OpenEnvelope,
    pub transactions: OpenTransactions,
}

impl OpenAgreement {
    /// The formation transaction with both parties' signatures attached.
    pub fn signed_formation_tx(&self) -> TxEnvelope {
        let details = &self.envelope.details;
        let mut signatures = Vec::new();
        if let Some(sig) = self.envelope.proposer_signatures.formation {
            signatures.push(DecoratedSignature::new(&details.proposing_signer, sig));
        }
        if let Some(sig) = self.envelope.confirmer_signatures.formation {
            signatures.push(DecoratedSignature::new(&details.confirming_signer, sig));
        }
        TxEnvelope {
            tx: self.transactions.formation.clone(),
            signatures,
        }
    }

    /// The iteration-1 close agreement embedded in the open agreement.
    /// Seeds the channel's latest authorized agreement once the open is
    /// fully signed.
    pub fn close_agreement(&self) -> CloseAgreement {
        let d = &self.envelope.details;
        CloseAgreement {
            envelope: CloseEnvelope {
                details: CloseDetails {
                    observation_period_time: d.observation_period_time,
                    observation_period_ledger_gap: d.observation_period_ledger_gap,
                    iteration_number: 1,
                    balance: 0,
                    proposing_signer: d.proposing_signer,
                    confirming_signer: d.confirming_signer,
                    payment_amount: 0,
                    memo: Vec::new(),
                },
                proposer_signatures: CloseSignatures {
                    declaration: self.envelope.proposer_signatures.declaration,
                    close: self.envelope.proposer_signatures.close,
                },
                confirmer_signatures: CloseSignatures {
                    declaration: self.envelope.confirmer_signatures.declaration,
                    close: self.envelope.confirmer_signatures.close,
                },
            },
            transactions: CloseTransactions {
                declaration_hash: self.transactions.declaration_hash,
                declaration: self.transactions.declaration.clone(),
                close_hash: self.transactions.close_hash,
                close: self.transactions.close.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txbuild::{self, CloseParams, DeclarationParams};
    use std::time::Duration;

    fn signer(tag: u8) -> Signer {
        Signer::from_seed([tag; 32])
    }

    fn transactions(proposer: &Signer, confirmer: &Signer) -> CloseTransactions {
        let network_id = "test network";
        let initiator_account = PublicKey::from_bytes([3; 32]);
        let responder_account = PublicKey::from_bytes([4; 32]);
        let close = txbuild::close(CloseParams {
            observation_period_time: Duration::from_secs(1),
            observation_period_ledger_gap: 1,
            initiator_signer: proposer.public_key(),
            responder_signer: confirmer.public_key(),
            initiator_channel_account: initiator_account,
            responder_channel_account: responder_account,
            start_sequence: 101,
            iteration_number: 2,
            asset: crate::asset::Asset::Native,
            amount_to_initiator: 0,
            amount_to_responder: 40,
        })
        .unwrap();
        let close_hash = close.hash(network_id).unwrap();
        let declaration = txbuild::declaration(DeclarationParams {
            initiator_channel_account: initiator_account,
            start_sequence: 101,
            iteration_number: 2,
            iteration_number_executed: 0,
            close_tx_hash: close_hash,
            confirming_signer: confirmer.public_key(),
        })
        .unwrap();
        let declaration_hash = declaration.hash(network_id).unwrap();
        CloseTransactions {
            declaration_hash,
            declaration,
            close_hash,
            close,
        }
    }

    fn details(proposer: &Signer, confirmer: &Signer) -> CloseDetails {
        CloseDetails {
            observation_period_time: Duration::from_secs(1),
            observation_period_ledger_gap: 1,
            iteration_number: 2,
            balance: 40,
            proposing_signer: proposer.public_key(),
            confirming_signer: confirmer.public_key(),
            payment_amount: 40,
            memo: Vec::new(),
        }
    }

    #[test]
    fn sign_then_verify_complete() {
        let proposer = signer(1);
        let confirmer = signer(2);
        let txs = transactions(&proposer, &confirmer);
        let sigs = sign_close_txs(&txs, &proposer);
        assert!(sigs.is_complete());
        sigs.verify_complete(&txs, &proposer.public_key()).unwrap();
        assert_eq!(
            sigs.verify_complete(&txs, &confirmer.public_key()),
            Err(ChannelError::InvalidSignature),
        );
    }

    #[test]
    fn incomplete_signatures_do_not_verify_complete() {
        let proposer = signer(1);
        let confirmer = signer(2);
        let txs = transactions(&proposer, &confirmer);
        let mut sigs = sign_close_txs(&txs, &proposer);
        sigs.close = None;
        assert_eq!(
            sigs.verify_complete(&txs, &proposer.public_key()),
            Err(ChannelError::InvalidSignature),
        );
        // But present-only verification accepts the partial set.
        sigs.verify_present(&txs, &proposer.public_key()).unwrap();
    }

    #[test]
    fn signed_transactions_carry_the_close_payload_signature() {
        let proposer = signer(1);
        let confirmer = signer(2);
        let txs = transactions(&proposer, &confirmer);
        let agreement = CloseAgreement {
            envelope: CloseEnvelope {
                details: details(&proposer, &confirmer),
                proposer_signatures: sign_close_txs(&txs, &proposer),
                confirmer_signatures: sign_close_txs(&txs, &confirmer),
            },
            transactions: txs.clone(),
        };

        let (declaration, close) = agreement.signed_transactions();

        // Close: one plain signature per party.
        assert_eq!(close.signatures.len(), 2);
        for sig in &close.signatures {
            assert!(sig.payload.is_none());
        }

        // Declaration: one plain signature per party plus the confirmer's
        // close signature decorated with the close hash payload.
        assert_eq!(declaration.signatures.len(), 3);
        let payload_sig = declaration
            .signatures
            .iter()
            .find(|s| s.payload.is_some())
            .expect("payload signature present");
        assert_eq!(payload_sig.payload.as_deref(), Some(&txs.close_hash[..]));
        assert_eq!(payload_sig.hint, confirmer.public_key().hint());
        confirmer
            .public_key()
            .verify(&txs.close_hash, &payload_sig.signature)
            .unwrap();
    }

    #[test]
    fn half_signed_agreement_omits_confirmer_signatures() {
        let proposer = signer(1);
        let confirmer = signer(2);
        let txs = transactions(&proposer, &confirmer);
        let agreement = CloseAgreement {
            envelope: CloseEnvelope {
                details: details(&proposer, &confirmer),
                proposer_signatures: sign_close_txs(&txs, &proposer),
                confirmer_signatures: CloseSignatures::default(),
            },
            transactions: txs,
        };
        let (declaration, close) = agreement.signed_transactions();
        assert_eq!(declaration.signatures.len(), 1);
        assert_eq!(close.signatures.len(), 1);
    }

    #[test]
    fn signatures_for_selects_by_role() {
        let proposer = signer(1);
        let confirmer = signer(2);
        let outsider = signer(3);
        let txs = transactions(&proposer, &confirmer);
        let envelope = CloseEnvelope {
            details: details(&proposer, &confirmer),
            proposer_signatures: sign_close_txs(&txs, &proposer),
            confirmer_signatures: CloseSignatures::default(),
        };
        assert!(envelope
            .signatures_for(&proposer.public_key())
            .unwrap()
            .is_complete());
        assert!(envelope
            .signatures_for(&confirmer.public_key())
            .unwrap()
            .is_empty());
        assert!(envelope.signatures_for(&outsider.public_key()).is_none());
    }
}
