//! The agent: couples a [Channel] to a peer connection, a transaction
//! submitter, and a ledger streamer, and drives the negotiation protocol.
//!
//! Concurrency model: one coarse mutex guards the channel and the peer
//! identity. Callers may invoke actions from any thread while one thread
//! runs [Agent::receive_loop] and the ingest task (spawned at
//! construction) consumes the streamer. Handlers acquire the mutex,
//! mutate the channel, copy outgoing bytes, release, and only then write
//! to the connection or call collaborators, so no suspension point is
//! reached with the lock held.

use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agreement::CloseAgreement;
use crate::asset::Asset;
use crate::channel::{
    unix_now, Channel, ChannelAccount, ChannelSnapshot, Config as ChannelConfig, Lifecycle,
    OpenParams,
};
use crate::errors::AgentError;
use crate::ledger::StreamedTransaction;
use crate::msg::{Hello, Message};
use crate::sig::{PublicKey, Signer};
use crate::txbuild::TxEnvelope;
use crate::wire::{Decoder, Encoder};

/// Errors surfaced by collaborator implementations.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Fetches the current sequence number of a ledger account.
pub trait SequenceNumberCollector: Send + Sync {
    fn get_sequence_number(&self, account: &PublicKey) -> Result<i64, CollaboratorError>;
}

impl<F> SequenceNumberCollector for F
where
    F: Fn(&PublicKey) -> Result<i64, CollaboratorError> + Send + Sync,
{
    fn get_sequence_number(&self, account: &PublicKey) -> Result<i64, CollaboratorError> {
        self(account)
    }
}

/// Fetches the current balance of a ledger account in an asset.
pub trait BalanceCollector: Send + Sync {
    fn get_balance(&self, account: &PublicKey, asset: &Asset) -> Result<i64, CollaboratorError>;
}

impl<F> BalanceCollector for F
where
    F: Fn(&PublicKey, &Asset) -> Result<i64, CollaboratorError> + Send + Sync,
{
    fn get_balance(&self, account: &PublicKey, asset: &Asset) -> Result<i64, CollaboratorError> {
        self(account, asset)
    }
}

/// Pushes a signed transaction envelope to the ledger. Expected to be
/// at-least-once; transaction hashes make resubmission idempotent.
pub trait Submitter: Send + Sync {
    fn submit_tx(&self, tx: &TxEnvelope) -> Result<(), CollaboratorError>;
}

impl<F> Submitter for F
where
    F: Fn(&TxEnvelope) -> Result<(), CollaboratorError> + Send + Sync,
{
    fn submit_tx(&self, tx: &TxEnvelope) -> Result<(), CollaboratorError> {
        self(tx)
    }
}

/// Tails confirmed transactions touching the watched accounts in ledger
/// order, restartable from any cursor. Returns the stream and a cancel
/// function.
pub trait Streamer: Send + Sync {
    fn stream_tx(
        &self,
        cursor: &str,
        accounts: &[PublicKey],
    ) -> (Receiver<StreamedTransaction>, Box<dyn FnOnce() + Send>);
}

impl<F> Streamer for F
where
    F: Fn(&str, &[PublicKey]) -> (Receiver<StreamedTransaction>, Box<dyn FnOnce() + Send>)
        + Send
        + Sync,
{
    fn stream_tx(
        &self,
        cursor: &str,
        accounts: &[PublicKey],
    ) -> (Receiver<StreamedTransaction>, Box<dyn FnOnce() + Send>) {
        self(cursor, accounts)
    }
}

/// Observes a fresh snapshot after every state-mutating step, typically
/// to persist it.
pub trait Snapshotter: Send + Sync {
    fn snapshot(&self, snapshot: Snapshot);
}

impl<F> Snapshotter for F
where
    F: Fn(Snapshot) + Send + Sync,
{
    fn snapshot(&self, snapshot: Snapshot) {
        self(snapshot)
    }
}

/// Lifecycle events emitted to the configured sink, in the order their
/// originating transitions occur.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Opened,
    PaymentSent(CloseAgreement),
    PaymentReceived(CloseAgreement),
    Closing,
    Closed,
    Error(AgentError),
}

/// Everything an agent needs restored to continue where it left off.
/// Key material is deliberately absent; it comes from [Config].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub other_channel_account: Option<PublicKey>,
    pub other_signer: Option<PublicKey>,
    pub streamer_cursor: String,
    pub channel: Option<ChannelSnapshot>,
}

#[derive(Clone)]
pub struct Config {
    pub observation_period_time: Duration,
    pub observation_period_ledger_gap: u32,
    pub max_open_expiry: Duration,
    pub network_id: String,
    pub sequence_number_collector: Arc<dyn SequenceNumberCollector>,
    pub balance_collector: Arc<dyn BalanceCollector>,
    pub submitter: Arc<dyn Submitter>,
    pub streamer: Arc<dyn Streamer>,
    pub snapshotter: Option<Arc<dyn Snapshotter>>,
    pub channel_account_key: PublicKey,
    pub channel_account_signer: Signer,
    pub events: Option<SyncSender<Event>>,
}

struct Core {
    channel: Option<Channel>,
    other_channel_account: Option<PublicKey>,
    other_signer: Option<PublicKey>,
    streamer_cursor: String,
}

pub struct Agent {
    observation_period_time: Duration,
    observation_period_ledger_gap: u32,
    max_open_expiry: Duration,
    network_id: String,
    sequence_number_collector: Arc<dyn SequenceNumberCollector>,
    balance_collector: Arc<dyn BalanceCollector>,
    submitter: Arc<dyn Submitter>,
    snapshotter: Option<Arc<dyn Snapshotter>>,
    channel_account_key: PublicKey,
    channel_account_signer: Signer,
    events: Option<SyncSender<Event>>,
    core: Arc<Mutex<Core>>,
    reader: Mutex<Option<Decoder<Box<dyn Read + Send>>>>,
    writer: Mutex<Option<Encoder<Box<dyn Write + Send>>>>,
    close_abort: Arc<Mutex<Option<mpsc::Sender<()>>>>,
}

// Mutex poisoning would only follow a panic in another holder; recover
// the data rather than propagate the panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn emit_to(events: &Option<SyncSender<Event>>, event: Event) {
    if let Some(sink) = events {
        let _ = sink.send(event);
    }
}

impl Agent {
    pub fn new(config: Config) -> Agent {
        Self::build(
            config,
            Core {
                channel: None,
                other_channel_account: None,
                other_signer: None,
                streamer_cursor: String::new(),
            },
        )
    }

    /// Rebuilds an agent from a snapshot. Given identical future inputs
    /// the restored agent signs identical proposals and emits identical
    /// events.
    pub fn from_snapshot(config: Config, snapshot: Snapshot) -> Agent {
        let channel = match (snapshot.channel, snapshot.other_signer) {
            (Some(channel_snapshot), Some(other_signer)) => Some(Channel::from_snapshot(
                ChannelConfig {
                    network_id: config.network_id.clone(),
                    max_open_expiry: config.max_open_expiry,
                    initiator: channel_snapshot.initiator,
                    local_signer: config.channel_account_signer.clone(),
                    remote_signer: other_signer,
                    local_channel_account: channel_snapshot.local_channel_account.clone(),
                    remote_channel_account: channel_snapshot.remote_channel_account.clone(),
                },
                channel_snapshot,
            )),
            _ => None,
        };
        Self::build(
            config,
            Core {
                channel,
                other_channel_account: snapshot.other_channel_account,
                other_signer: snapshot.other_signer,
                streamer_cursor: snapshot.streamer_cursor,
            },
        )
    }

    fn build(config: Config, core: Core) -> Agent {
        let cursor = core.streamer_cursor.clone();
        let agent = Agent {
            observation_period_time: config.observation_period_time,
            observation_period_ledger_gap: config.observation_period_ledger_gap,
            max_open_expiry: config.max_open_expiry,
            network_id: config.network_id,
            sequence_number_collector: config.sequence_number_collector,
            balance_collector: config.balance_collector,
            submitter: config.submitter,
            snapshotter: config.snapshotter,
            channel_account_key: config.channel_account_key,
            channel_account_signer: config.channel_account_signer,
            events: config.events,
            core: Arc::new(Mutex::new(core)),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            close_abort: Arc::new(Mutex::new(None)),
        };

        let (stream, _cancel) = config
            .streamer
            .stream_tx(&cursor, &[agent.channel_account_key]);
        let core = Arc::clone(&agent.core);
        let events = agent.events.clone();
        let balance_collector = Arc::clone(&agent.balance_collector);
        let snapshotter = agent.snapshotter.clone();
        let close_abort = Arc::clone(&agent.close_abort);
        thread::spawn(move || {
            ingest_loop(stream, core, events, balance_collector, snapshotter, close_abort)
        });

        agent
    }

    /// Attaches the duplex peer connection. The reader is owned by
    /// whoever calls [Agent::receive] or [Agent::receive_loop]; writes
    /// are serialized internally.
    pub fn connect<R, W>(&self, reader: R, writer: W)
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        *lock(&self.reader) = Some(Decoder::new(Box::new(reader)));
        *lock(&self.writer) = Some(Encoder::new(Box::new(writer)));
    }

    /// A copy of all restorable agent state.
    pub fn snapshot(&self) -> Snapshot {
        snapshot_of(&lock(&self.core))
    }

    /// Announces the local identity to the peer.
    pub fn hello(&self) -> Result<(), AgentError> {
        self.send(&Message::Hello(Hello {
            channel_account: self.channel_account_key,
            signer: self.channel_account_signer.public_key(),
        }))
    }

    /// Proposes opening a channel carrying the given asset.
    pub fn open(&self, asset: Asset) -> Result<(), AgentError> {
        self.ensure_connected()?;
        let envelope = {
            let mut core = lock(&self.core);
            let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
            channel.propose_open(OpenParams {
                observation_period_time: self.observation_period_time,
                observation_period_ledger_gap: self.observation_period_ledger_gap,
                asset,
                expires_at: unix_now() + self.max_open_expiry.as_secs() as i64,
            })?
        };
        self.send(&Message::OpenRequest(envelope))?;
        self.observe_snapshot();
        Ok(())
    }

    /// Proposes a payment to the peer.
    pub fn payment(&self, amount: i64) -> Result<(), AgentError> {
        self.payment_with_memo(amount, Vec::new())
    }

    /// Proposes a payment carrying an opaque memo.
    ///
    /// An `Underfunded` rejection triggers one refresh of the local
    /// channel account's cached balance and one retry before the error
    /// surfaces.
    pub fn payment_with_memo(&self, amount: i64, memo: Vec<u8>) -> Result<(), AgentError> {
        self.ensure_connected()?;
        let proposed = {
            let mut core = lock(&self.core);
            let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
            channel.propose_payment_with_memo(amount, memo.clone())
        };
        let agreement = match proposed {
            Err(crate::errors::ChannelError::Underfunded) => {
                debug!("local channel account underfunded per cached balance, refreshing");
                let (account, asset) = self.local_account_and_asset()?;
                let balance = self
                    .balance_collector
                    .get_balance(&account, &asset)
                    .map_err(|e| AgentError::Collect(e.to_string()))?;
                let mut core = lock(&self.core);
                let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
                channel.update_local_channel_account_balance(balance);
                channel.propose_payment_with_memo(amount, memo)?
            }
            other => other?,
        };
        self.send(&Message::PaymentRequest(agreement.envelope.clone()))?;
        self.observe_snapshot();
        Ok(())
    }

    /// Declares the latest authorized close on the ledger and begins
    /// negotiating a coordinated close.
    ///
    /// The declaration is submitted unconditionally. The matching close
    /// transaction is held back for the agreement's observation period by
    /// a background task; the task is aborted if the coordinated close
    /// completes first, in which case the zero-period close is submitted
    /// instead as soon as it is fully signed.
    pub fn declare_close(&self) -> Result<(), AgentError> {
        self.ensure_connected()?;
        let (declaration, observation_period) = {
            let core = lock(&self.core);
            let channel = core.channel.as_ref().ok_or(AgentError::NoChannel)?;
            let (declaration, _) = channel.close_txs()?;
            let observation_period = channel
                .latest_authorized()
                .map(|a| a.envelope.details.observation_period_time)
                .unwrap_or(self.observation_period_time);
            (declaration, observation_period)
        };
        info!("submitting declaration");
        self.submit(&declaration)?;

        // Arm the delayed unilateral close before proposing the
        // coordinated one, so the channel still closes if the peer never
        // answers.
        let (abort_sender, abort_receiver) = mpsc::channel();
        *lock(&self.close_abort) = Some(abort_sender);
        let core = Arc::clone(&self.core);
        let submitter = Arc::clone(&self.submitter);
        thread::spawn(move || {
            delayed_close(abort_receiver, observation_period, core, submitter)
        });

        let proposal = {
            let mut core = lock(&self.core);
            let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
            channel.propose_close()?
        };
        self.send(&Message::CloseRequest(proposal.envelope.clone()))?;
        self.observe_snapshot();
        Ok(())
    }

    /// Reads and handles exactly one inbound message. Handler failures
    /// are emitted as [Event::Error] and returned.
    pub fn receive(&self) -> Result<(), AgentError> {
        let msg = self.read_message()?;
        let result = self.handle(msg);
        if let Err(e) = &result {
            warn!(error = %e, "handling message");
            self.emit(Event::Error(e.clone()));
        }
        result
    }

    /// Reads and handles inbound messages until the connection fails or
    /// reaches EOF, which is emitted as a final [Event::Error].
    pub fn receive_loop(&self) {
        loop {
            let msg = match self.read_message() {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "receive loop terminating");
                    self.emit(Event::Error(e));
                    return;
                }
            };
            if let Err(e) = self.handle(msg) {
                warn!(error = %e, "handling message");
                self.emit(Event::Error(e));
            }
        }
    }

    fn read_message(&self) -> Result<Message, AgentError> {
        let mut reader = lock(&self.reader);
        let decoder = reader.as_mut().ok_or(AgentError::NotConnected)?;
        decoder.decode().map_err(AgentError::from)
    }

    fn handle(&self, msg: Message) -> Result<(), AgentError> {
        debug!(code = msg.type_code(), "handling message");
        match msg {
            Message::Hello(hello) => self.handle_hello(hello),
            Message::OpenRequest(envelope) => self.handle_open_request(envelope),
            Message::OpenResponse(envelope) => self.handle_open_response(envelope),
            Message::PaymentRequest(envelope) => self.handle_payment_request(envelope),
            Message::PaymentResponse(envelope) => self.handle_payment_response(envelope),
            Message::CloseRequest(envelope) => self.handle_close_request(envelope),
            Message::CloseResponse(envelope) => self.handle_close_response(envelope),
            Message::Error { message } => {
                warn!(%message, "peer reported an error");
                self.emit(Event::Error(AgentError::Peer(message)));
                Ok(())
            }
        }
    }

    fn handle_hello(&self, hello: Hello) -> Result<(), AgentError> {
        let known = {
            let core = lock(&self.core);
            core.other_channel_account.zip(core.other_signer)
        };
        if let Some((account, signer)) = known {
            // Repeated hellos are fine as long as they carry the same
            // identity.
            if hello.channel_account != account {
                let err = AgentError::UnexpectedHello {
                    got: hello.channel_account,
                    expected: account,
                };
                let _ = self.send(&Message::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
            if hello.signer != signer {
                let err = AgentError::UnexpectedHello {
                    got: hello.signer,
                    expected: signer,
                };
                let _ = self.send(&Message::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
            self.emit(Event::Connected);
            return Ok(());
        }

        info!(channel_account = %hello.channel_account, signer = %hello.signer, "peer identified");
        let local_sequence = self
            .sequence_number_collector
            .get_sequence_number(&self.channel_account_key)
            .map_err(|e| AgentError::Collect(e.to_string()))?;
        let remote_sequence = self
            .sequence_number_collector
            .get_sequence_number(&hello.channel_account)
            .map_err(|e| AgentError::Collect(e.to_string()))?;

        let channel = Channel::new(ChannelConfig {
            network_id: self.network_id.clone(),
            max_open_expiry: self.max_open_expiry,
            // The channel account that orders first is the initiator;
            // both peers derive the same assignment independently.
            initiator: self.channel_account_key < hello.channel_account,
            local_signer: self.channel_account_signer.clone(),
            remote_signer: hello.signer,
            local_channel_account: ChannelAccount {
                address: self.channel_account_key,
                sequence_number: local_sequence,
                balance: 0,
            },
            remote_channel_account: ChannelAccount {
                address: hello.channel_account,
                sequence_number: remote_sequence,
                balance: 0,
            },
        });
        {
            let mut core = lock(&self.core);
            core.other_channel_account = Some(hello.channel_account);
            core.other_signer = Some(hello.signer);
            core.channel = Some(channel);
        }
        self.emit(Event::Connected);
        self.observe_snapshot();
        Ok(())
    }

    fn handle_open_request(&self, envelope: crate::agreement::OpenEnvelope) -> Result<(), AgentError> {
        let response = {
            let mut core = lock(&self.core);
            let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
            channel.confirm_open(envelope)?
        };
        info!("open authorized");
        self.send(&Message::OpenResponse(response))?;
        self.observe_snapshot();
        Ok(())
    }

    fn handle_open_response(&self, envelope: crate::agreement::OpenEnvelope) -> Result<(), AgentError> {
        let formation = {
            let mut core = lock(&self.core);
            let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
            channel.confirm_open(envelope)?;
            channel.open_tx()?
        };
        info!("open authorized, submitting formation");
        self.submit(&formation)?;
        self.observe_snapshot();
        Ok(())
    }

    fn handle_payment_request(
        &self,
        envelope: crate::agreement::CloseEnvelope,
    ) -> Result<(), AgentError> {
        let agreement = match self.confirm_payment_with_refresh(envelope) {
            Ok(agreement) => agreement,
            Err(e) => {
                // Tell the proposer the request was rejected so it does
                // not wait on a response that will never come.
                let _ = self.send(&Message::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        };
        info!(iteration = agreement.iteration_number(), "payment authorized");
        self.send(&Message::PaymentResponse(agreement.envelope.clone()))?;
        self.emit(Event::PaymentReceived(agreement));
        self.observe_snapshot();
        Ok(())
    }

    fn confirm_payment_with_refresh(
        &self,
        envelope: crate::agreement::CloseEnvelope,
    ) -> Result<CloseAgreement, AgentError> {
        let confirmed = {
            let mut core = lock(&self.core);
            let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
            channel.confirm_payment(envelope.clone())
        };
        match confirmed {
            Err(crate::errors::ChannelError::Underfunded) => {
                // The remote may have deposited since we last looked.
                // Refresh its cached balance once and retry.
                debug!("remote channel account underfunded per cached balance, refreshing");
                let (account, asset) = self.remote_account_and_asset()?;
                let balance = self
                    .balance_collector
                    .get_balance(&account, &asset)
                    .map_err(|e| AgentError::Collect(e.to_string()))?;
                let mut core = lock(&self.core);
                let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
                channel.update_remote_channel_account_balance(balance);
                Ok(channel.confirm_payment(envelope)?)
            }
            other => Ok(other?),
        }
    }

    fn handle_payment_response(
        &self,
        envelope: crate::agreement::CloseEnvelope,
    ) -> Result<(), AgentError> {
        let agreement = {
            let mut core = lock(&self.core);
            let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
            channel.finalize_payment(envelope.confirmer_signatures)?
        };
        info!(iteration = agreement.iteration_number(), "payment authorized");
        self.emit(Event::PaymentSent(agreement));
        self.observe_snapshot();
        Ok(())
    }

    fn handle_close_request(
        &self,
        envelope: crate::agreement::CloseEnvelope,
    ) -> Result<(), AgentError> {
        let (agreement, close) = {
            let mut core = lock(&self.core);
            let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
            let agreement = channel.confirm_close(envelope)?;
            let (_, close) = channel.close_txs()?;
            (agreement, close)
        };
        self.send(&Message::CloseResponse(agreement.envelope.clone()))?;
        info!("close ready, submitting close");
        self.submit(&close)?;
        self.observe_snapshot();
        Ok(())
    }

    fn handle_close_response(
        &self,
        envelope: crate::agreement::CloseEnvelope,
    ) -> Result<(), AgentError> {
        let close = {
            let mut core = lock(&self.core);
            let channel = core.channel.as_mut().ok_or(AgentError::NoChannel)?;
            channel.confirm_close(envelope)?;
            channel.close_txs()?.1
        };
        info!("close ready, submitting close");
        self.submit(&close)?;
        // The coordinated close supersedes the delayed unilateral one.
        if let Some(abort) = lock(&self.close_abort).take() {
            let _ = abort.send(());
        }
        self.observe_snapshot();
        Ok(())
    }

    fn local_account_and_asset(&self) -> Result<(PublicKey, Asset), AgentError> {
        let core = lock(&self.core);
        let channel = core.channel.as_ref().ok_or(AgentError::NoChannel)?;
        Ok((
            channel.local_channel_account().address,
            channel
                .open_agreement()
                .map(|o| o.envelope.details.asset.clone())
                .unwrap_or(Asset::Native),
        ))
    }

    fn remote_account_and_asset(&self) -> Result<(PublicKey, Asset), AgentError> {
        let core = lock(&self.core);
        let channel = core.channel.as_ref().ok_or(AgentError::NoChannel)?;
        Ok((
            channel.remote_channel_account().address,
            channel
                .open_agreement()
                .map(|o| o.envelope.details.asset.clone())
                .unwrap_or(Asset::Native),
        ))
    }

    fn ensure_connected(&self) -> Result<(), AgentError> {
        if lock(&self.writer).is_none() {
            return Err(AgentError::NotConnected);
        }
        Ok(())
    }

    fn send(&self, msg: &Message) -> Result<(), AgentError> {
        debug!(code = msg.type_code(), "sending message");
        let mut writer = lock(&self.writer);
        let encoder = writer.as_mut().ok_or(AgentError::NotConnected)?;
        encoder.encode(msg).map_err(AgentError::from)
    }

    fn submit(&self, tx: &TxEnvelope) -> Result<(), AgentError> {
        self.submitter
            .submit_tx(tx)
            .map_err(|e| AgentError::Submit(e.to_string()))
    }

    fn emit(&self, event: Event) {
        emit_to(&self.events, event);
    }

    fn observe_snapshot(&self) {
        if let Some(snapshotter) = &self.snapshotter {
            snapshotter.snapshot(self.snapshot());
        }
    }
}

fn snapshot_of(core: &Core) -> Snapshot {
    Snapshot {
        other_channel_account: core.other_channel_account,
        other_signer: core.other_signer,
        streamer_cursor: core.streamer_cursor.clone(),
        channel: core.channel.as_ref().map(Channel::snapshot),
    }
}

/// Waits out the observation period, then submits the latest authorized
/// close transaction, unless aborted first by a completed coordinated
/// close (or by the agent going away).
fn delayed_close(
    abort: Receiver<()>,
    observation_period: Duration,
    core: Arc<Mutex<Core>>,
    submitter: Arc<dyn Submitter>,
) {
    match abort.recv_timeout(observation_period) {
        Err(RecvTimeoutError::Timeout) => {
            let close = {
                let core = lock(&core);
                core.channel
                    .as_ref()
                    .and_then(|channel| channel.close_txs().ok())
                    .map(|(_, close)| close)
            };
            if let Some(close) = close {
                info!("observation period over, submitting delayed close");
                if let Err(e) = submitter.submit_tx(&close) {
                    warn!(error = %e, "submitting delayed close");
                }
            }
        }
        _ => debug!("delayed close aborted"),
    }
}

fn ingest_loop(
    stream: Receiver<StreamedTransaction>,
    core: Arc<Mutex<Core>>,
    events: Option<SyncSender<Event>>,
    balance_collector: Arc<dyn BalanceCollector>,
    snapshotter: Option<Arc<dyn Snapshotter>>,
    close_abort: Arc<Mutex<Option<mpsc::Sender<()>>>>,
) {
    while let Ok(streamed) = stream.recv() {
        let (before, after, opened) = {
            let mut guard = lock(&core);
            guard.streamer_cursor = streamed.cursor.clone();
            let Some(channel) = guard.channel.as_mut() else {
                debug!("transaction streamed before channel setup, skipping");
                continue;
            };
            let before = channel.lifecycle();
            if let Err(e) = channel.ingest_tx(&streamed.tx, &streamed.result, &streamed.result_meta)
            {
                debug!(error = %e, "ingesting transaction");
            }
            let after = channel.lifecycle();
            let opened = (before != after && after == Lifecycle::Open).then(|| {
                (
                    channel.local_channel_account().address,
                    channel.remote_channel_account().address,
                    channel
                        .open_agreement()
                        .map(|o| o.envelope.details.asset.clone())
                        .unwrap_or(Asset::Native),
                )
            });
            (before, after, opened)
        };

        if before != after {
            match after {
                Lifecycle::Open => {
                    // The formation executed; the channel accounts are
                    // funded now, so prime the cached balances.
                    if let Some((local, remote, asset)) = opened {
                        refresh_balances(&core, &balance_collector, local, remote, &asset);
                    }
                    emit_to(&events, Event::Opened);
                }
                Lifecycle::Closing => emit_to(&events, Event::Closing),
                Lifecycle::Closed => {
                    if let Some(abort) = lock(&close_abort).take() {
                        let _ = abort.send(());
                    }
                    emit_to(&events, Event::Closed);
                }
                _ => {}
            }
        }

        if let Some(snapshotter) = &snapshotter {
            let snapshot = snapshot_of(&lock(&core));
            snapshotter.snapshot(snapshot);
        }
    }
    debug!("transaction stream ended");
}

fn refresh_balances(
    core: &Arc<Mutex<Core>>,
    balance_collector: &Arc<dyn BalanceCollector>,
    local: PublicKey,
    remote: PublicKey,
    asset: &Asset,
) {
    let local_balance = balance_collector.get_balance(&local, asset);
    let remote_balance = balance_collector.get_balance(&remote, asset);
    let mut guard = lock(core);
    let Some(channel) = guard.channel.as_mut() else {
        return;
    };
    match local_balance {
        Ok(balance) => channel.update_local_channel_account_balance(balance),
        Err(e) => warn!(error = %e, "refreshing local channel account balance"),
    }
    match remote_balance {
        Ok(balance) => channel.update_remote_channel_account_balance(balance),
        Err(e) => warn!(error = %e, "refreshing remote channel account balance"),
    }
}
