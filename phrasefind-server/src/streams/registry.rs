//! Per-fingerprint stream registry
//!
//! Process-local table of active analysis streams. `get_or_create` is
//! atomic, so exactly one driver task runs the upstream call per
//! fingerprint; every other caller becomes a subscriber. Chunks append to
//! an in-order log and fan out to live subscribers; late joiners replay
//! the log first (see `replay`). Terminal streams linger briefly so
//! just-missed subscribers still get served, then a scheduled cleanup
//! removes them once idle.

use super::provider::AnalysisProvider;
use super::replay::pace_delay;
use super::StreamFrame;
use crate::analysis::{parse_analysis, AnalysisParams};
use crate::db::analyses;
use chrono::{DateTime, Utc};
use phrasefind_common::db::{AnalysisRecord, ChunkLogEntry};
use phrasefind_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Delay before a completed stream with no subscribers is removed.
const COMPLETED_CLEANUP: Duration = Duration::from_secs(300);
/// Delay before an errored stream is removed.
const ERRORED_CLEANUP: Duration = Duration::from_secs(1);
/// Share of terminal streams evicted when the registry is full.
const EVICT_PERCENT: usize = 10;
/// Persistence attempts for a completed analysis (1 s / 2 s / 4 s backoff).
const PERSIST_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Active,
    Completed,
    Errored,
}

struct Subscriber {
    tx: mpsc::UnboundedSender<StreamFrame>,
    #[allow(dead_code)]
    joined_at: DateTime<Utc>,
    replaying: bool,
}

struct StreamState {
    subscribers: HashMap<u64, Subscriber>,
    chunks: Vec<ChunkLogEntry>,
    accumulated: String,
    status: StreamStatus,
    error: Option<String>,
}

/// One registered analysis stream.
pub struct ActiveStream {
    pub fingerprint: String,
    pub params: AnalysisParams,
    created_instant: Instant,
    created_at: DateTime<Utc>,
    state: Mutex<StreamState>,
    next_subscriber_id: AtomicU64,
}

/// Registry of active streams, bounded in size.
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, Arc<ActiveStream>>>,
    capacity: usize,
    db: SqlitePool,
    provider: Arc<dyn AnalysisProvider>,
    // Weak self-handle so &self methods can hand an owned Arc to the
    // tasks they spawn (drivers, replays, scheduled cleanups).
    self_ref: Weak<StreamRegistry>,
}

impl StreamRegistry {
    pub fn new(db: SqlitePool, provider: Arc<dyn AnalysisProvider>, capacity: usize) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            streams: Mutex::new(HashMap::new()),
            capacity,
            db,
            provider,
            self_ref: self_ref.clone(),
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().expect("registry is owned by an Arc")
    }

    /// Return the registration for a fingerprint, creating it (and its
    /// single driver task) if absent. Atomic: concurrent callers for the
    /// same fingerprint observe one stream.
    pub async fn get_or_create(
        &self,
        fingerprint: &str,
        params: AnalysisParams,
    ) -> Result<Arc<ActiveStream>> {
        let mut map = self.streams.lock().await;

        if let Some(stream) = map.get(fingerprint) {
            return Ok(Arc::clone(stream));
        }

        if map.len() >= self.capacity {
            self.evict_idle_terminal(&mut map).await;
            if map.len() >= self.capacity {
                return Err(Error::UpstreamUnavailable(
                    "analysis stream capacity reached".to_string(),
                ));
            }
        }

        let stream = Arc::new(ActiveStream {
            fingerprint: fingerprint.to_string(),
            params,
            created_instant: Instant::now(),
            created_at: Utc::now(),
            state: Mutex::new(StreamState {
                subscribers: HashMap::new(),
                chunks: Vec::new(),
                accumulated: String::new(),
                status: StreamStatus::Active,
                error: None,
            }),
            next_subscriber_id: AtomicU64::new(0),
        });

        map.insert(fingerprint.to_string(), Arc::clone(&stream));
        drop(map);

        info!(fingerprint, "Registered new analysis stream");
        let registry = self.arc();
        let driven = Arc::clone(&stream);
        tokio::spawn(async move {
            registry.drive(driven).await;
        });

        Ok(stream)
    }

    /// Evict the oldest terminal streams with zero subscribers, up to 10%
    /// of the terminal set (at least one).
    async fn evict_idle_terminal(&self, map: &mut HashMap<String, Arc<ActiveStream>>) {
        let mut terminal_total = 0usize;
        let mut idle: Vec<(String, DateTime<Utc>)> = Vec::new();

        for (fp, stream) in map.iter() {
            let state = stream.state.lock().await;
            if state.status != StreamStatus::Active {
                terminal_total += 1;
                if state.subscribers.is_empty() {
                    idle.push((fp.clone(), stream.created_at));
                }
            }
        }

        let quota = (terminal_total * EVICT_PERCENT / 100).max(1);
        idle.sort_by_key(|(_, created)| *created);
        for (fp, _) in idle.into_iter().take(quota) {
            map.remove(&fp);
            debug!(fingerprint = %fp, "Evicted idle terminal stream");
        }
    }

    async fn get(&self, fingerprint: &str) -> Option<Arc<ActiveStream>> {
        self.streams.lock().await.get(fingerprint).cloned()
    }

    /// Attach a subscriber connection; returns its id.
    ///
    /// With accumulated chunks (or a terminal stream holding chunks) the
    /// subscriber is flagged replaying and a paced replay task starts;
    /// otherwise live broadcasts are delivered directly. A terminal stream
    /// with no chunks gets its terminal frame immediately.
    pub async fn subscribe(
        &self,
        fingerprint: &str,
        tx: mpsc::UnboundedSender<StreamFrame>,
    ) -> Result<u64> {
        let stream = self
            .get(fingerprint)
            .await
            .ok_or_else(|| Error::NotFound(format!("no active stream for {}", fingerprint)))?;

        let id = stream.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let mut state = stream.state.lock().await;

        if state.chunks.is_empty() {
            match state.status {
                StreamStatus::Active => {
                    state.subscribers.insert(
                        id,
                        Subscriber {
                            tx,
                            joined_at: Utc::now(),
                            replaying: false,
                        },
                    );
                }
                StreamStatus::Completed => {
                    let _ = tx.send(StreamFrame::Done {
                        full_response: state.accumulated.clone(),
                    });
                }
                StreamStatus::Errored => {
                    let message = state
                        .error
                        .clone()
                        .unwrap_or_else(|| "analysis failed".to_string());
                    let _ = tx.send(StreamFrame::Error(message));
                }
            }
            return Ok(id);
        }

        state.subscribers.insert(
            id,
            Subscriber {
                tx,
                joined_at: Utc::now(),
                replaying: true,
            },
        );
        drop(state);

        let registry = self.arc();
        let replayed = Arc::clone(&stream);
        tokio::spawn(async move {
            registry.run_replay(replayed, id).await;
        });

        Ok(id)
    }

    /// Detach a subscriber. The driver keeps running so the result still
    /// persists.
    pub async fn unsubscribe(&self, fingerprint: &str, subscriber_id: u64) {
        if let Some(stream) = self.get(fingerprint).await {
            let mut state = stream.state.lock().await;
            state.subscribers.remove(&subscriber_id);
        }
    }

    /// Append a chunk and fan it out to live (non-replaying) subscribers.
    /// Dead connections are pruned on failed writes.
    async fn publish_chunk(&self, stream: &ActiveStream, text: &str) {
        let mut state = stream.state.lock().await;
        let timestamp_ms = stream.created_instant.elapsed().as_millis() as i64;
        state.chunks.push(ChunkLogEntry {
            text: text.to_string(),
            timestamp_ms,
        });
        state.accumulated.push_str(text);

        let frame = StreamFrame::Chunk(text.to_string());
        state
            .subscribers
            .retain(|_, sub| sub.replaying || sub.tx.send(frame.clone()).is_ok());
    }

    /// Terminalize as completed: emit the done frame to live subscribers,
    /// close their connections, persist the analysis, schedule cleanup.
    async fn complete(&self, stream: &Arc<ActiveStream>) {
        let (full_response, chunk_log) = {
            let mut state = stream.state.lock().await;
            state.status = StreamStatus::Completed;
            let full_response = state.accumulated.clone();
            let frame = StreamFrame::Done {
                full_response: full_response.clone(),
            };

            let live_ids: Vec<u64> = state
                .subscribers
                .iter()
                .filter(|(_, sub)| !sub.replaying)
                .map(|(id, _)| *id)
                .collect();
            for id in live_ids {
                if let Some(sub) = state.subscribers.remove(&id) {
                    let _ = sub.tx.send(frame.clone());
                }
            }

            (full_response, state.chunks.clone())
        };

        info!(fingerprint = %stream.fingerprint, chunks = chunk_log.len(), "Stream completed");

        self.persist_analysis(stream, &full_response, chunk_log).await;
        self.schedule_cleanup(&stream.fingerprint, COMPLETED_CLEANUP);
    }

    /// Terminalize as errored: emit a shaped error to live subscribers,
    /// close their connections, schedule prompt cleanup.
    async fn fail(&self, stream: &Arc<ActiveStream>, message: String) {
        {
            let mut state = stream.state.lock().await;
            state.status = StreamStatus::Errored;
            state.error = Some(message.clone());

            let frame = StreamFrame::Error(message.clone());
            let live_ids: Vec<u64> = state
                .subscribers
                .iter()
                .filter(|(_, sub)| !sub.replaying)
                .map(|(id, _)| *id)
                .collect();
            for id in live_ids {
                if let Some(sub) = state.subscribers.remove(&id) {
                    let _ = sub.tx.send(frame.clone());
                }
            }
        }

        warn!(fingerprint = %stream.fingerprint, error = %message, "Stream errored");
        self.schedule_cleanup(&stream.fingerprint, ERRORED_CLEANUP);
    }

    /// Remove the stream after `delay` if it is terminal and has no
    /// subscribers by then.
    fn schedule_cleanup(&self, fingerprint: &str, delay: Duration) {
        let registry = self.arc();
        let fingerprint = fingerprint.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut map = registry.streams.lock().await;
            if let Some(stream) = map.get(&fingerprint) {
                let state = stream.state.lock().await;
                let removable =
                    state.status != StreamStatus::Active && state.subscribers.is_empty();
                drop(state);
                if removable {
                    map.remove(&fingerprint);
                    debug!(fingerprint = %fingerprint, "Cleaned up terminal stream");
                }
            }
        });
    }

    /// The single driver task: runs the upstream call, forwarding each
    /// delta into the chunk log, then terminalizes the stream.
    async fn drive(&self, stream: Arc<ActiveStream>) {
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
        let upstream = self.provider.stream_analysis(&stream.params, chunk_tx);
        tokio::pin!(upstream);

        loop {
            tokio::select! {
                Some(chunk) = chunk_rx.recv() => {
                    self.publish_chunk(&stream, &chunk).await;
                }
                result = &mut upstream => {
                    // Drain any deltas that raced with completion
                    while let Ok(chunk) = chunk_rx.try_recv() {
                        self.publish_chunk(&stream, &chunk).await;
                    }
                    match result {
                        Ok(_) => self.complete(&stream).await,
                        Err(e) => self.fail(&stream, e.to_string()).await,
                    }
                    return;
                }
            }
        }
    }

    /// Replay the chunk log to a late joiner, then hand over to live
    /// delivery (or deliver the terminal frame). The handover happens
    /// under the state lock, so no chunk is lost or duplicated across the
    /// replay/live transition.
    async fn run_replay(&self, stream: Arc<ActiveStream>, subscriber_id: u64) {
        enum Step {
            Paced(Option<Duration>),
            TailCheck,
            Finished,
        }

        let mut index = 0usize;
        loop {
            let step = {
                let mut state = stream.state.lock().await;
                let Some(sub) = state.subscribers.get(&subscriber_id) else {
                    // Unsubscribed mid-replay
                    return;
                };
                if sub.tx.is_closed() {
                    state.subscribers.remove(&subscriber_id);
                    return;
                }

                if index < state.chunks.len() {
                    let frame = StreamFrame::Chunk(state.chunks[index].text.clone());
                    let delay = state.chunks.get(index + 1).map(|next| {
                        pace_delay(state.chunks[index].timestamp_ms, next.timestamp_ms)
                    });
                    if state.subscribers[&subscriber_id].tx.send(frame).is_err() {
                        state.subscribers.remove(&subscriber_id);
                        return;
                    }
                    index += 1;
                    Step::Paced(delay)
                } else {
                    match state.status {
                        StreamStatus::Active => Step::TailCheck,
                        StreamStatus::Completed => {
                            let frame = StreamFrame::Done {
                                full_response: state.accumulated.clone(),
                            };
                            if let Some(sub) = state.subscribers.remove(&subscriber_id) {
                                let _ = sub.tx.send(frame);
                            }
                            Step::Finished
                        }
                        StreamStatus::Errored => {
                            let message = state
                                .error
                                .clone()
                                .unwrap_or_else(|| "analysis failed".to_string());
                            if let Some(sub) = state.subscribers.remove(&subscriber_id) {
                                let _ = sub.tx.send(StreamFrame::Error(message));
                            }
                            Step::Finished
                        }
                    }
                }
            };

            match step {
                Step::Paced(delay) => {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                }
                Step::TailCheck => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    let mut state = stream.state.lock().await;
                    let caught_up =
                        index >= state.chunks.len() && state.status == StreamStatus::Active;
                    if caught_up {
                        // Live delivery takes over from here
                        if let Some(sub) = state.subscribers.get_mut(&subscriber_id) {
                            sub.replaying = false;
                        }
                        return;
                    }
                    // New chunks arrived or the stream terminalized; loop
                }
                Step::Finished => return,
            }
        }
    }

    async fn persist_analysis(
        &self,
        stream: &ActiveStream,
        full_response: &str,
        chunk_log: Vec<ChunkLogEntry>,
    ) {
        let parsed = match parse_analysis(full_response) {
            Ok(parsed) => parsed,
            Err(e) => {
                // The in-flight response already went out; a cache miss
                // next time is the only consequence.
                warn!(fingerprint = %stream.fingerprint, error = %e, "Analysis output unparseable, skipping cache save");
                return;
            }
        };

        let record = AnalysisRecord {
            fingerprint: stream.fingerprint.clone(),
            sentence: stream.params.sentence.clone(),
            target_word: stream.params.target_word.clone(),
            target_language: stream.params.target_language.clone(),
            native_language: stream.params.native_language.clone(),
            context_before: stream.params.context_before.clone(),
            context_after: stream.params.context_after.clone(),
            full_translation: parsed.full_translation,
            literal_translation: parsed.literal_translation,
            grammar_analysis: parsed.grammar_analysis,
            breakdown: parsed.breakdown,
            idioms: parsed.idioms,
            difficulty_notes: parsed.difficulty_notes,
            chunk_log: Some(chunk_log),
            access_count: 1,
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
        };

        for attempt in 0..PERSIST_ATTEMPTS {
            match analyses::insert(&self.db, &record).await {
                Ok(()) => return,
                Err(Error::DuplicateKey(_)) => return,
                Err(e) => {
                    warn!(
                        fingerprint = %stream.fingerprint,
                        attempt,
                        error = %e,
                        "Failed to persist analysis"
                    );
                    if attempt + 1 < PERSIST_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
            }
        }
    }

    /// Number of registered streams (active and lingering terminal).
    pub async fn stream_count(&self) -> usize {
        self.streams.lock().await.len()
    }
}
