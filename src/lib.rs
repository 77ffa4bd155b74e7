//! Two-party off-chain payment channel SDK.
//!
//! A channel lets two participants exchange many small payments while
//! anchoring only formation and settlement on an external ledger. Each
//! participant runs a deterministic [channel::Channel] state machine
//! that negotiates signed close agreements with the peer, and an
//! [agent::Agent] that drives the state machine over a duplex connection
//! while submitting and ingesting ledger transactions through narrow
//! collaborator traits.
//!
//! The concrete ledger stays external: transactions are built by the
//! pure [txbuild] module, and the network is reached only through the
//! traits in [agent].

pub mod agent;
pub mod agreement;
pub mod asset;
pub mod channel;
pub mod errors;
pub mod ledger;
pub mod msg;
pub mod sig;
pub mod txbuild;
pub mod wire;

pub use agent::{Agent, Event, Snapshot};
pub use asset::Asset;
pub use channel::{Channel, ChannelAccount, Lifecycle};
pub use errors::{AgentError, ChannelError};
pub use sig::{PublicKey, Signature, Signer};
