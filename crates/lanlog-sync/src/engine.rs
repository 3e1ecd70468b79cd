//! Sync engine: the protocol state machine.
//!
//! One engine per device. It answers handshakes, collects them for a short
//! window, reconciles, asks peers for what it lacks, serves what peers ask
//! of it, and files incoming records into the store.
//!
//! ```text
//! Idle ──handshake──▶ Collecting ──window expires──▶ Reconciling ──▶ Idle
//!                       │  ▲
//!                       └──┘ more handshakes (window is not restarted)
//! ```
//!
//! Round state (handshake cache, timer handle) and the accepted-key set live
//! behind one mutex that is never held across an await. Reconciliation runs
//! on a snapshot taken under that lock.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use lanlog_core::{
    sanitize_handshake, validate_inbound_record, validate_request_item, DeviceId, HandshakeInfo,
    HandshakeMessage, LogId, RecordKey, RecordKind, SyncRecord, SyncRequest, UserId,
};
use lanlog_store::{LogHead, LogStore, LogStoreExt};

use crate::error::{Result, SyncError};
use crate::inbound::{classify, placeholder_candidates, RecordStatus};
use crate::messages::{limits, SyncInfoMessage, WireMessage};
use crate::reconcile::{reconcile, AbandonedGap, Round};
use crate::timer::RoundTimer;
use crate::transport::Transport;

/// Configuration for sync behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long handshakes are collected before reconciling, in milliseconds.
    pub round_window_ms: u64,
    /// Only the newest `sync_window` records of a log are ever asked for.
    pub sync_window: u64,
    /// Records per `syncInfoMessage` when answering a request.
    pub max_records_per_message: usize,
    /// Buffered events per subscriber before the slowest one starts lagging.
    pub event_capacity: usize,
    /// Payloads buffered between the receive loop and the dispatch worker.
    pub dispatch_queue: usize,
}

impl SyncConfig {
    /// The collection window as a `Duration`.
    pub fn round_window(&self) -> Duration {
        Duration::from_millis(self.round_window_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            round_window_ms: 5_000,
            sync_window: 100,
            max_records_per_message: 25,
            event_capacity: 256,
            dispatch_queue: 1024,
        }
    }
}

/// The user and device this engine authors for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub user_id: UserId,
    pub device_id: DeviceId,
}

impl LocalIdentity {
    /// Create an identity.
    pub fn new(user_id: impl Into<UserId>, device_id: impl Into<DeviceId>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }

    /// The log this device appends to.
    pub fn log_id(&self) -> LogId {
        LogId::new(self.user_id.clone(), self.device_id.clone())
    }
}

/// Notifications for observers (UI, CLI, tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A record became part of the contiguous history of its log, or was
    /// authored locally.
    RecordAccepted(SyncRecord),
    /// Placeholders were written below an out-of-sync record.
    GapDetected { log: LogId, sequences: Vec<u64> },
    /// Holes fell below the sync window and will not be asked for again.
    GapAbandoned { log: LogId, sequences: Vec<u64> },
    /// A collection window closed.
    RoundCompleted { peers: usize, requests: usize },
}

/// What happened to a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Our own handshake, echoed back by the network.
    OwnEcho,
    Collected {
        replied: bool,
        window_opened: bool,
    },
}

/// What happened to a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Addressed to another device. Nothing was read.
    Unaddressed,
    Served { records: usize, messages: usize },
}

/// Tally of one `syncInfoMessage`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Records that became contiguous, including ones promoted from storage.
    pub accepted: usize,
    pub duplicates: usize,
    pub out_of_sync: usize,
    pub invalid: usize,
    /// Records the store refused. They are neither accepted nor stored.
    pub failed: usize,
    /// Placeholders written.
    pub placeholders: usize,
    /// Whether a reply-requesting handshake went out because of a gap.
    pub handshake_sent: bool,
}

/// Result of one closed collection window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub peers: usize,
    pub asks: usize,
    pub requests: usize,
    pub abandoned: Vec<AbandonedGap>,
}

/// Result of handling one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Handshake(HandshakeOutcome),
    SyncRequest(RequestOutcome),
    SyncInfo(IngestReport),
}

enum Ingested {
    Duplicate,
    Accepted { promoted: usize },
    OutOfSync { placeholders: usize },
}

#[derive(Default)]
struct RoundState {
    handshakes: Round,
    accepted: HashSet<RecordKey>,
    timer: Option<RoundTimer>,
}

struct Inner<S, T> {
    identity: LocalIdentity,
    store: Arc<S>,
    transport: Arc<T>,
    config: SyncConfig,
    state: Mutex<RoundState>,
    authoring: tokio::sync::Mutex<()>,
    events: broadcast::Sender<EngineEvent>,
}

/// Handle to a device's sync engine. Cheap to clone; all clones share state.
pub struct SyncEngine<S, T> {
    inner: Arc<Inner<S, T>>,
}

impl<S, T> Clone for SyncEngine<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: LogStore + 'static, T: Transport + 'static> SyncEngine<S, T> {
    /// Create an engine. Nothing is sent until [`SyncEngine::start`].
    pub fn new(identity: LocalIdentity, store: Arc<S>, transport: Arc<T>, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                identity,
                store,
                transport,
                config,
                state: Mutex::new(RoundState::default()),
                authoring: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn identity(&self) -> &LocalIdentity {
        &self.inner.identity
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.inner.identity.device_id
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Whether `key` is part of the contiguous accepted history.
    pub fn is_accepted(&self, key: &RecordKey) -> bool {
        self.lock().accepted.contains(key)
    }

    /// Number of accepted keys.
    pub fn accepted_count(&self) -> usize {
        self.lock().accepted.len()
    }

    /// Handshakes collected in the current window.
    pub fn pending_handshakes(&self) -> usize {
        self.lock().handshakes.len()
    }

    /// Whether a collection window is open.
    pub fn is_collecting(&self) -> bool {
        self.lock()
            .timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, RoundState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    async fn send(&self, msg: WireMessage) -> Result<()> {
        let text = msg.encode()?;
        self.inner.transport.broadcast(&text).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Join the group, rebuild the accepted set from the store, and announce
    /// ourselves with a reply-requesting handshake.
    pub async fn start(&self) -> Result<()> {
        self.inner.transport.join().await?;
        let accepted = self.rebuild_accepted().await?;
        self.send_handshake(true).await?;
        tracing::info!(
            device = %self.device_id(),
            accepted,
            "sync engine started"
        );
        Ok(())
    }

    /// Cancel any open collection window, drop collected handshakes, and
    /// leave the group.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            state.handshakes.clear();
        }
        self.inner.transport.leave().await?;
        tracing::info!(device = %self.device_id(), "sync engine stopped");
        Ok(())
    }

    /// Replace the accepted set with every non-placeholder record in the store.
    pub async fn rebuild_accepted(&self) -> Result<usize> {
        let keys = self.inner.store.record_keys().await?;
        let count = keys.len();
        self.lock().accepted = keys.into_iter().collect();
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────

    /// Decode one payload and route it to its handler.
    ///
    /// Undecodable payloads return [`SyncError::MalformedPayload`] and leave
    /// all state untouched.
    pub async fn handle_payload(&self, payload: &str, sender: &str) -> Result<Dispatched> {
        let msg = WireMessage::decode(payload)?;
        tracing::trace!(kind = %msg.kind(), sender, "payload received");

        match msg {
            WireMessage::Handshake(hs) => Ok(Dispatched::Handshake(self.handle_handshake(hs).await?)),
            WireMessage::SyncRequest(req) => {
                Ok(Dispatched::SyncRequest(self.handle_sync_request(req).await?))
            }
            WireMessage::SyncInfo(info) => Ok(Dispatched::SyncInfo(self.handle_sync_info(info).await?)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Handshakes
    // ─────────────────────────────────────────────────────────────────────────

    /// Summarize every log in the store.
    pub async fn handshake_message(&self, reply_requested: bool) -> Result<HandshakeMessage> {
        let store = &self.inner.store;
        let mut infos = Vec::new();
        for log in store.logs().await? {
            let head = store.head(&log).await?;
            if head.sequence == 0 {
                continue;
            }
            infos.push(
                HandshakeInfo::new(&log, head.sequence)
                    .with_missing(head.missing)
                    .with_profile_sequence(head.profile_sequence),
            );
        }
        Ok(HandshakeMessage::new(
            self.device_id().clone(),
            infos,
            reply_requested,
        ))
    }

    /// Broadcast our handshake.
    pub async fn send_handshake(&self, reply_requested: bool) -> Result<()> {
        let msg = self.handshake_message(reply_requested).await?;
        tracing::debug!(logs = msg.infos.len(), reply_requested, "broadcasting handshake");
        self.send(msg.into()).await
    }

    /// Collect a peer handshake, answering it first if it asks for a reply.
    ///
    /// The first handshake of a round opens the collection window; later ones
    /// overwrite earlier ones from the same peer and never extend the window.
    pub async fn handle_handshake(&self, msg: HandshakeMessage) -> Result<HandshakeOutcome> {
        if &msg.from == self.device_id() {
            return Ok(HandshakeOutcome::OwnEcho);
        }

        let msg = sanitize_handshake(msg);
        let from = msg.from.clone();
        let replied = msg.reply_requested;

        let window_opened = {
            let mut state = self.lock();
            state.handshakes.insert(msg.from.clone(), msg);
            let live = state.timer.as_ref().is_some_and(|t| !t.is_finished());
            if !live {
                state.timer = Some(self.schedule_round());
            }
            !live
        };
        tracing::debug!(from = %from, replied, window_opened, "handshake collected");

        if replied {
            self.send_handshake(false).await?;
        }
        Ok(HandshakeOutcome::Collected {
            replied,
            window_opened,
        })
    }

    fn schedule_round(&self) -> RoundTimer {
        let engine = self.clone();
        RoundTimer::schedule(self.inner.config.round_window(), async move {
            if let Err(e) = engine.finish_round().await {
                tracing::warn!(error = %e, "round failed, will retry on next handshake");
            }
        })
    }

    /// Close the collection window now instead of waiting for the timer.
    pub async fn close_round(&self) -> Result<RoundReport> {
        let round = {
            let mut state = self.lock();
            if let Some(timer) = state.timer.take() {
                timer.cancel();
            }
            std::mem::take(&mut state.handshakes)
        };
        self.reconcile_round(round).await
    }

    // Runs inside the timer task, so it must not cancel that task.
    async fn finish_round(&self) -> Result<RoundReport> {
        let round = {
            let mut state = self.lock();
            state.timer = None;
            std::mem::take(&mut state.handshakes)
        };
        self.reconcile_round(round).await
    }

    async fn reconcile_round(&self, round: Round) -> Result<RoundReport> {
        if round.is_empty() {
            return Ok(RoundReport::default());
        }

        let logs: BTreeSet<LogId> = round
            .values()
            .flat_map(|msg| msg.infos.iter().map(HandshakeInfo::log_id))
            .collect();
        let mut local: HashMap<LogId, LogHead> = HashMap::with_capacity(logs.len());
        for log in logs {
            let head = self.inner.store.head(&log).await?;
            local.insert(log, head);
        }

        let outcome = reconcile(&round, &local, self.inner.config.sync_window);

        for gap in &outcome.abandoned {
            self.seal_gap(gap).await?;
        }

        let requests = outcome.requests();
        for request in &requests {
            tracing::debug!(
                target_device = %request.target_device_id,
                items = request.items.len(),
                "sending sync request"
            );
            self.send(request.clone().into()).await?;
        }

        tracing::debug!(
            peers = round.len(),
            asks = outcome.asks.len(),
            requests = requests.len(),
            "round reconciled"
        );
        self.emit(EngineEvent::RoundCompleted {
            peers: round.len(),
            requests: requests.len(),
        });

        Ok(RoundReport {
            peers: round.len(),
            asks: outcome.asks.len(),
            requests: requests.len(),
            abandoned: outcome.abandoned,
        })
    }

    async fn seal_gap(&self, gap: &AbandonedGap) -> Result<()> {
        let mut promoted = 0;
        for &seq in &gap.sequences {
            promoted += self.promote_from(&gap.log, seq).await?;
        }
        // Sealed gaps come back every round; only the first sealing is news.
        if promoted > 0 {
            tracing::warn!(
                log = %gap.log,
                holes = gap.sequences.len(),
                promoted,
                "abandoning holes below the sync window"
            );
        } else {
            tracing::debug!(log = %gap.log, holes = gap.sequences.len(), "holes below the sync window stay sealed");
        }
        self.emit(EngineEvent::GapAbandoned {
            log: gap.log.clone(),
            sequences: gap.sequences.iter().copied().collect(),
        });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Answer a sync request if it is addressed to us.
    ///
    /// Requests for other devices return `Unaddressed` without reading the
    /// store. Placeholders are never sent.
    pub async fn handle_sync_request(&self, req: SyncRequest) -> Result<RequestOutcome> {
        if &req.target_device_id != self.device_id() {
            tracing::trace!(target_device = %req.target_device_id, "ignoring request for another device");
            return Ok(RequestOutcome::Unaddressed);
        }

        let store = &self.inner.store;
        let window = self.inner.config.sync_window.max(1);
        let mut found: BTreeMap<RecordKey, SyncRecord> = BTreeMap::new();

        for item in &req.items {
            if let Err(e) = validate_request_item(item) {
                tracing::debug!(error = %e, "skipping invalid request item");
                continue;
            }
            let log = item.log_id();
            let end = item.ending_sequence;
            let start = item
                .starting_sequence
                .max(end.saturating_sub(window - 1));

            for record in store.range_lookup(&log, start, end).await? {
                found.entry(record.key()).or_insert(record);
            }
            for &seq in &item.missing_sequences {
                if let Some(record) = store.point_lookup(&log, seq).await? {
                    found.entry(record.key()).or_insert(record);
                }
            }
        }

        let records: Vec<SyncRecord> = found
            .into_values()
            .filter(|r| !r.is_placeholder())
            .map(|r| r.with_sender(self.device_id().clone()))
            .collect();
        let messages = self.send_records(&records).await?;

        tracing::debug!(records = records.len(), messages, "served sync request");
        Ok(RequestOutcome::Served {
            records: records.len(),
            messages,
        })
    }

    async fn send_records(&self, records: &[SyncRecord]) -> Result<usize> {
        let batch = self
            .inner
            .config
            .max_records_per_message
            .clamp(1, limits::MAX_RECORDS_PER_MESSAGE);
        let mut messages = 0;

        for chunk in records.chunks(batch) {
            match self.send(SyncInfoMessage::new(chunk.to_vec()).into()).await {
                Ok(()) => messages += 1,
                Err(SyncError::Encoding(_)) if chunk.len() > 1 => {
                    // Too big for one datagram together; try them one by one.
                    for record in chunk {
                        match self.send(SyncInfoMessage::new(vec![record.clone()]).into()).await {
                            Ok(()) => messages += 1,
                            Err(SyncError::Encoding(e)) => {
                                tracing::warn!(key = %record.key(), error = %e, "record too large to send");
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
                Err(SyncError::Encoding(e)) => {
                    tracing::warn!(key = %chunk[0].key(), error = %e, "record too large to send");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound records
    // ─────────────────────────────────────────────────────────────────────────

    /// File a batch of records from a peer.
    ///
    /// If any record arrived ahead of a hole, one reply-requesting handshake
    /// goes out after the whole batch so the next round can fill it. This
    /// holds for redelivered records too, since the earlier handshake may
    /// have been lost.
    ///
    /// A record the store refuses is counted in `failed` and the rest of
    /// the batch is still filed.
    pub async fn handle_sync_info(&self, msg: SyncInfoMessage) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut gap_seen = false;

        for record in msg.infos {
            if let Err(e) = validate_inbound_record(&record) {
                tracing::debug!(error = %e, "dropping invalid record");
                report.invalid += 1;
                continue;
            }
            let key = record.key();
            match self.ingest(record).await {
                Ok(Ingested::Duplicate) => report.duplicates += 1,
                Ok(Ingested::Accepted { promoted }) => report.accepted += 1 + promoted,
                Ok(Ingested::OutOfSync { placeholders }) => {
                    report.out_of_sync += 1;
                    report.placeholders += placeholders;
                    gap_seen = true;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to file record");
                    report.failed += 1;
                }
            }
        }

        if gap_seen {
            match self.send_handshake(true).await {
                Ok(()) => report.handshake_sent = true,
                Err(e) => tracing::warn!(error = %e, "could not announce gap"),
            }
        }
        Ok(report)
    }

    async fn ingest(&self, record: SyncRecord) -> Result<Ingested> {
        let key = record.key();
        let status = {
            let mut state = self.lock();
            let status = classify(&state.accepted, &key);
            if status == RecordStatus::Accepted {
                state.accepted.insert(key.clone());
            }
            status
        };

        match status {
            RecordStatus::Duplicate => {
                tracing::trace!(key = %key, "duplicate record");
                Ok(Ingested::Duplicate)
            }
            RecordStatus::Accepted => {
                if let Err(e) = self.inner.store.insert_if_absent(&record).await {
                    self.lock().accepted.remove(&key);
                    return Err(e.into());
                }
                let log = record.log_id();
                let sequence = record.sequence;
                self.emit(EngineEvent::RecordAccepted(record));
                let promoted = self.promote_from(&log, sequence).await?;
                Ok(Ingested::Accepted { promoted })
            }
            RecordStatus::OutOfSync => {
                self.inner.store.insert_if_absent(&record).await?;
                let log = record.log_id();

                let mut filled = Vec::new();
                for seq in placeholder_candidates(record.sequence, self.inner.config.sync_window) {
                    let hole = SyncRecord::placeholder(&log, seq, self.device_id());
                    if !self.inner.store.insert_if_absent(&hole).await?.is_new() {
                        break;
                    }
                    filled.push(seq);
                }

                if !filled.is_empty() {
                    filled.reverse();
                    tracing::debug!(key = %key, holes = filled.len(), "gap detected");
                    self.emit(EngineEvent::GapDetected {
                        log,
                        sequences: filled.clone(),
                    });
                }
                Ok(Ingested::OutOfSync {
                    placeholders: filled.len(),
                })
            }
        }
    }

    /// Accept stored real records directly above `sequence` until the first
    /// hole. Returns how many were promoted.
    async fn promote_from(&self, log: &LogId, sequence: u64) -> Result<usize> {
        let mut promoted = 0;
        let mut next = sequence + 1;
        loop {
            let record = match self.inner.store.point_lookup(log, next).await? {
                Some(r) if !r.is_placeholder() => r,
                _ => break,
            };
            if !self.lock().accepted.insert(log.key(next)) {
                break;
            }
            self.emit(EngineEvent::RecordAccepted(record));
            promoted += 1;
            next += 1;
        }
        if promoted > 0 {
            tracing::debug!(log = %log, from = sequence + 1, promoted, "promoted stored records");
        }
        Ok(promoted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authoring
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a chat message to our own log and broadcast it.
    ///
    /// The record is persisted even if the broadcast fails; peers will pick
    /// it up in a later round.
    pub async fn author(
        &self,
        payload: impl Into<String>,
        recipient: Option<UserId>,
    ) -> Result<SyncRecord> {
        self.append(RecordKind::Chat, payload.into(), recipient).await
    }

    /// Append a profile photo to our own log and broadcast it.
    pub async fn author_profile(&self, payload: impl Into<String>) -> Result<SyncRecord> {
        self.append(RecordKind::Photo, payload.into(), None).await
    }

    async fn append(
        &self,
        kind: RecordKind,
        payload: String,
        recipient: Option<UserId>,
    ) -> Result<SyncRecord> {
        let _guard = self.inner.authoring.lock().await;

        let log = self.inner.identity.log_id();
        let sequence = self.inner.store.latest_sequence(&log).await? + 1;
        let mut record = SyncRecord::new(&log, sequence, kind, payload);
        record.recipient_user_id = recipient;

        self.inner.store.insert_if_absent(&record).await?;
        self.lock().accepted.insert(record.key());
        self.emit(EngineEvent::RecordAccepted(record.clone()));

        if let Err(e) = self.send(SyncInfoMessage::new(vec![record.clone()]).into()).await {
            tracing::warn!(key = %record.key(), error = %e, "authored record not broadcast");
        }
        Ok(record)
    }
}
