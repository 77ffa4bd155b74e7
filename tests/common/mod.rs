//! Support for the end-to-end agent tests: an in-memory blocking duplex
//! pipe, canned ledger result meta, and collaborator doubles backed by
//! closures and channels.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};

use paychan::agent::{
    Agent, CollaboratorError, Config, Event, Snapshot, Snapshotter, Streamer, Submitter,
};
use paychan::ledger::{
    AccountEntry, ResultMeta, SignerWeight, StreamedTransaction, Thresholds, TxResult,
};
use paychan::txbuild::TxEnvelope;
use paychan::{Asset, PublicKey, Signer};

// Identities. The signers are seeded from the operators' seed phrases;
// the channel account keys are fixed so that the local account orders
// before the remote one, making the local participant the initiator.
pub const LOCAL_SIGNER_PHRASE: &str = "SCBMAMOPWKL2YHWELK63VLAY2R74A6GTLLD4ON223B7K5KZ37MUR6IDF";
pub const REMOTE_SIGNER_PHRASE: &str = "SBM7D2IIDSRX5Y3VMTMTXXPB6AIB4WYGZBC2M64U742BNOK32X6SW4NF";

pub const LOCAL_SEQUENCE: i64 = 28037546508288;
pub const REMOTE_SEQUENCE: i64 = 28054726377472;
pub const START_SEQUENCE: i64 = 28037546508289;

pub const STARTING_BALANCE: i64 = 100_0000000;

pub fn signer_from_phrase(phrase: &str) -> Signer {
    Signer::from_seed(Sha256::digest(phrase.as_bytes()).into())
}

pub fn local_signer() -> Signer {
    signer_from_phrase(LOCAL_SIGNER_PHRASE)
}

pub fn remote_signer() -> Signer {
    signer_from_phrase(REMOTE_SIGNER_PHRASE)
}

pub fn local_channel_account() -> PublicKey {
    PublicKey::from_bytes([0x1A; 32])
}

pub fn remote_channel_account() -> PublicKey {
    PublicKey::from_bytes([0x2B; 32])
}

// ---------------------------------------------------------------------
// In-memory blocking duplex pipe.

struct PipeInner {
    buf: VecDeque<u8>,
    closed: bool,
}

struct PipeState {
    inner: Mutex<PipeInner>,
    cond: Condvar,
}

pub struct PipeReader(Arc<PipeState>);
pub struct PipeWriter(Arc<PipeState>);

/// A handle that closes the pipe without owning the writer, so a test
/// can terminate a receive loop whose writer lives inside an agent.
#[derive(Clone)]
pub struct PipeShutdown(Arc<PipeState>);

pub fn pipe() -> (PipeWriter, PipeReader) {
    let state = Arc::new(PipeState {
        inner: Mutex::new(PipeInner {
            buf: VecDeque::new(),
            closed: false,
        }),
        cond: Condvar::new(),
    });
    (PipeWriter(Arc::clone(&state)), PipeReader(state))
}

impl PipeWriter {
    pub fn shutdown_handle(&self) -> PipeShutdown {
        PipeShutdown(Arc::clone(&self.0))
    }
}

impl PipeShutdown {
    pub fn close(&self) {
        self.0.inner.lock().unwrap().closed = true;
        self.0.cond.notify_all();
    }
}

impl Read for PipeReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.0.inner.lock().unwrap();
        while inner.buf.is_empty() && !inner.closed {
            inner = self.0.cond.wait(inner).unwrap();
        }
        if inner.buf.is_empty() {
            return Ok(0);
        }
        let n = out.len().min(inner.buf.len());
        for byte in out[..n].iter_mut() {
            *byte = inner.buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut inner = self.0.inner.lock().unwrap();
        if inner.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        inner.buf.extend(data);
        self.0.cond.notify_all();
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.0.inner.lock().unwrap().closed = true;
        self.0.cond.notify_all();
    }
}

/// Connects two agents with a pair of pipes, returning shutdown handles
/// for both directions.
pub fn connect(local: &Agent, remote: &Agent) -> (PipeShutdown, PipeShutdown) {
    let (local_writer, remote_reader) = pipe();
    let (remote_writer, local_reader) = pipe();
    let local_shutdown = local_writer.shutdown_handle();
    let remote_shutdown = remote_writer.shutdown_handle();
    local.connect(local_reader, local_writer);
    remote.connect(remote_reader, remote_writer);
    (remote_shutdown, local_shutdown)
}

// ---------------------------------------------------------------------
// Ledger fixtures.

pub fn success() -> TxResult {
    TxResult { successful: true }
}

/// Result meta for the executed formation: both channel accounts under
/// 2-of-2 control of the two signers, the initiator account at the
/// starting sequence.
pub fn open_result_meta() -> ResultMeta {
    let signers = vec![
        SignerWeight {
            key: local_signer().public_key(),
            weight: 1,
        },
        SignerWeight {
            key: remote_signer().public_key(),
            weight: 1,
        },
    ];
    ResultMeta {
        accounts: vec![
            AccountEntry {
                address: local_channel_account(),
                sequence_number: START_SEQUENCE,
                balance: Some(STARTING_BALANCE),
                signers: signers.clone(),
                thresholds: Thresholds::SHARED,
            },
            AccountEntry {
                address: remote_channel_account(),
                sequence_number: REMOTE_SEQUENCE,
                balance: Some(STARTING_BALANCE),
                signers,
                thresholds: Thresholds::SHARED,
            },
        ],
    }
}

pub fn streamed(cursor: &str, tx: TxEnvelope, meta: ResultMeta) -> StreamedTransaction {
    StreamedTransaction {
        cursor: cursor.to_string(),
        tx,
        result: success(),
        result_meta: meta,
    }
}

// ---------------------------------------------------------------------
// Collaborator doubles.

/// Hands out a pre-built receiver on the first subscription and dead
/// receivers afterwards.
pub struct TestStreamer(Mutex<Option<Receiver<StreamedTransaction>>>);

impl TestStreamer {
    pub fn new(rx: Receiver<StreamedTransaction>) -> Self {
        TestStreamer(Mutex::new(Some(rx)))
    }

    /// A streamer that yields nothing, for restored agents that must not
    /// compete for the live stream.
    pub fn empty() -> Self {
        TestStreamer(Mutex::new(None))
    }
}

impl Streamer for TestStreamer {
    fn stream_tx(
        &self,
        _cursor: &str,
        _accounts: &[PublicKey],
    ) -> (Receiver<StreamedTransaction>, Box<dyn FnOnce() + Send>) {
        let rx = self.0.lock().unwrap().take().unwrap_or_else(|| {
            let (_tx, rx) = mpsc::channel();
            rx
        });
        (rx, Box::new(|| {}))
    }
}

pub struct Peer {
    pub agent: Agent,
    pub events: Receiver<Event>,
    pub submitted: Arc<Mutex<Option<TxEnvelope>>>,
    pub stream: mpsc::Sender<StreamedTransaction>,
    pub balance: Arc<AtomicI64>,
    pub config: Config,
}

impl Peer {
    /// Receives the next event, failing the test if none arrives.
    pub fn next_event(&self) -> Event {
        self.events
            .recv_timeout(Duration::from_secs(5))
            .expect("expected an event")
    }

    pub fn take_submitted(&self) -> Option<TxEnvelope> {
        self.submitted.lock().unwrap().take()
    }
}

pub fn capture_submitter(slot: &Arc<Mutex<Option<TxEnvelope>>>) -> Arc<dyn Submitter> {
    let slot = Arc::clone(slot);
    Arc::new(move |tx: &TxEnvelope| -> Result<(), CollaboratorError> {
        *slot.lock().unwrap() = Some(tx.clone());
        Ok(())
    })
}

pub fn peer_config(
    account: PublicKey,
    signer: Signer,
    submitter: Arc<dyn Submitter>,
    streamer: Arc<dyn Streamer>,
    balance: &Arc<AtomicI64>,
    events: SyncSender<Event>,
    snapshotter: Option<Arc<dyn Snapshotter>>,
) -> Config {
    let balance = Arc::clone(balance);
    Config {
        observation_period_time: Duration::from_secs(20),
        observation_period_ledger_gap: 1,
        max_open_expiry: Duration::from_secs(5 * 60),
        network_id: "test network".into(),
        sequence_number_collector: Arc::new(
            |account: &PublicKey| -> Result<i64, CollaboratorError> {
                if *account == local_channel_account() {
                    Ok(LOCAL_SEQUENCE)
                } else if *account == remote_channel_account() {
                    Ok(REMOTE_SEQUENCE)
                } else {
                    Err("unknown channel account".into())
                }
            },
        ),
        balance_collector: Arc::new(
            move |_account: &PublicKey, _asset: &Asset| -> Result<i64, CollaboratorError> {
                Ok(balance.load(Ordering::SeqCst))
            },
        ),
        submitter,
        streamer,
        snapshotter,
        channel_account_key: account,
        channel_account_signer: signer,
        events: Some(events),
    }
}

/// Builds a peer with a capturing submitter and a live stream channel.
pub fn peer(account: PublicKey, signer: Signer, event_capacity: usize) -> Peer {
    let submitted = Arc::new(Mutex::new(None));
    let submitter = capture_submitter(&submitted);
    peer_with_submitter(account, signer, event_capacity, submitted, submitter)
}

pub fn peer_with_submitter(
    account: PublicKey,
    signer: Signer,
    event_capacity: usize,
    submitted: Arc<Mutex<Option<TxEnvelope>>>,
    submitter: Arc<dyn Submitter>,
) -> Peer {
    let (stream_tx, stream_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::sync_channel(event_capacity);
    let balance = Arc::new(AtomicI64::new(STARTING_BALANCE));
    let config = peer_config(
        account,
        signer,
        submitter,
        Arc::new(TestStreamer::new(stream_rx)),
        &balance,
        event_tx,
        None,
    );
    Peer {
        agent: Agent::new(config.clone()),
        events: event_rx,
        submitted,
        stream: stream_tx,
        balance,
        config,
    }
}

/// A restore configuration: same identity and collaborators, but a dead
/// streamer so the restored agent does not compete for the live stream.
pub fn restore_config(config: &Config) -> Config {
    let mut config = config.clone();
    config.streamer = Arc::new(TestStreamer::empty());
    config
}

pub fn expect_snapshot_round_trip(agent: &Agent, config: &Config) -> Snapshot {
    let snapshot = agent.snapshot();
    let json = serde_json::to_string(&snapshot).unwrap();
    let decoded: Snapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(snapshot, decoded);

    let restored = Agent::from_snapshot(restore_config(config), decoded);
    assert_eq!(restored.snapshot(), snapshot);
    snapshot
}
