//! Messages exchanged between two channel agents.
//!
//! The union is exhaustive on purpose: adding a message type forces every
//! dispatch site to handle it. The numeric codes exist for logging and
//! diagnostics only; the wire form is the tagged JSON image produced by
//! [crate::wire].

use serde::{Deserialize, Serialize};

use crate::agreement::{CloseEnvelope, OpenEnvelope};
use crate::sig::PublicKey;

/// Identity announcement exchanged when two agents connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub channel_account: PublicKey,
    pub signer: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Hello(Hello),
    OpenRequest(OpenEnvelope),
    OpenResponse(OpenEnvelope),
    PaymentRequest(CloseEnvelope),
    PaymentResponse(CloseEnvelope),
    CloseRequest(CloseEnvelope),
    CloseResponse(CloseEnvelope),
    Error { message: String },
}

impl Message {
    pub fn type_code(&self) -> u8 {
        match self {
            Message::Hello(_) => 10,
            Message::OpenRequest(_) => 20,
            Message::OpenResponse(_) => 21,
            Message::PaymentRequest(_) => 30,
            Message::PaymentResponse(_) => 31,
            Message::CloseRequest(_) => 40,
            Message::CloseResponse(_) => 41,
            Message::Error { .. } => 50,
        }
    }
}
