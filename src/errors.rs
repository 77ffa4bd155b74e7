//! Error taxonomies for the channel state machine and the agent.
//!
//! Channel validation errors are returned before any state is mutated;
//! a failed propose or confirm leaves the channel exactly as it was.

use thiserror::Error;

use crate::sig::PublicKey;
use crate::txbuild;

/// Errors produced by the channel state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel is already open or opening")]
    AlreadyOpen,

    #[error("channel is not open")]
    ChannelNotOpen,

    #[error("a coordinated close has been proposed or accepted")]
    CoordinatedCloseInProgress,

    #[error("an unfinished agreement is already in progress")]
    UnfinishedInProgress,

    #[error("account is underfunded to make payment")]
    Underfunded,

    #[error("invalid iteration number, got: {got} want: {want}")]
    IterationMismatch { got: i64, want: i64 },

    #[error("observation periods differ from the channel state")]
    ObservationPeriodMismatch,

    #[error("agreement does not match the agreement in progress")]
    DetailsMismatch,

    #[error("signer is neither the local nor the remote signer: {0}")]
    SignerMismatch(PublicKey),

    #[error("agreement is a payment to the proposer")]
    PaymentToProposer,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("payment amount must not be less than zero")]
    InvalidAmount,

    #[error("expiry is further than the maximum open expiry")]
    OpenExpiryExceeded,

    #[error("no unauthorized agreement to finalize")]
    NoUnauthorizedAgreement,

    #[error(transparent)]
    TxBuild(#[from] txbuild::Error),
}

impl From<crate::sig::Error> for ChannelError {
    fn from(_: crate::sig::Error) -> Self {
        ChannelError::InvalidSignature
    }
}

/// Errors produced by the agent.
///
/// Transport and collaborator failures carry rendered messages rather
/// than the source error values so the whole taxonomy stays cloneable and
/// can travel inside [crate::agent::Event::Error].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("not connected")]
    NotConnected,

    #[error("no channel")]
    NoChannel,

    #[error("hello received with unexpected identity: {got} expected: {expected}")]
    UnexpectedHello { got: PublicKey, expected: PublicKey },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("connection: {0}")]
    Io(String),

    #[error("decoding message: {0}")]
    Decode(String),

    #[error("submitting transaction: {0}")]
    Submit(String),

    #[error("querying account state: {0}")]
    Collect(String),

    #[error("streaming transactions: {0}")]
    Stream(String),

    #[error("peer reported an error: {0}")]
    Peer(String),
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Io(e.to_string())
    }
}

impl From<crate::wire::Error> for AgentError {
    fn from(e: crate::wire::Error) -> Self {
        match e {
            crate::wire::Error::Io(msg) => AgentError::Io(msg),
            other => AgentError::Decode(other.to_string()),
        }
    }
}
