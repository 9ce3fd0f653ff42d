use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::backend::{ChangeEvent, ChangeFeed, EventKind};
use crate::utils::now_ts;

/// Latest-known status for one bot, as reported by the feed origin.
/// `bot_name` is the map key: `id` is not stable across reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default)]
    pub id: String,
    pub bot_name: String,
    pub is_safe_to_operate: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub operations_since_last_pattern: i64,
    /// Origin-set RFC 3339 timestamp, not touched by this side.
    #[serde(default)]
    pub last_updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_pattern_found: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub losses_in_last_ops: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wins_in_last_ops: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_disable_after_ops: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Active,
    AtRisk,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RadarCounts {
    pub total: usize,
    pub active: usize,
    pub at_risk: usize,
}

/// Connection flags surfaced to consumers. Transport failures land here as a
/// string; they are never propagated as errors past the cache boundary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnState {
    pub connected: bool,
    pub error: Option<String>,
    /// Client-observed time of the last applied fold or snapshot.
    pub last_update_ts: Option<f64>,
}

struct Inner {
    map: RwLock<HashMap<String, StatusRecord>>,
    conn: RwLock<ConnState>,
    // Bumped on stop(); fetch results carrying an older generation are
    // discarded instead of being applied to a torn-down cache.
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Eventually-consistent bot-name -> status map fed by a change feed, with a
/// pull-based bootstrap. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct RadarCache {
    feed: Arc<dyn ChangeFeed>,
    inner: Arc<Inner>,
}

impl RadarCache {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            feed,
            inner: Arc::new(Inner {
                map: RwLock::new(HashMap::new()),
                conn: RwLock::new(ConnState::default()),
                generation: AtomicU64::new(0),
                task: Mutex::new(None),
            }),
        }
    }

    /// Bootstrap fetch, then live folding in a background task. Calling it
    /// again tears down the previous run first.
    pub fn start(&self) {
        self.stop();
        let gen = self.inner.generation.load(Ordering::Acquire);

        // Subscribe before the bootstrap fetch so no event slips between the
        // two; last-write-wins folding makes any overlap converge.
        let rx = self.feed.subscribe();
        match self.feed.fetch_all() {
            Ok(rows) => self.apply_snapshot(gen, rows),
            Err(e) => self.record_transport_error(&format!("initial fetch failed: {e:#}")),
        }

        let cache = self.clone();
        let handle = tokio::spawn(async move { cache.run_fold_loop(rx, gen).await });
        *self.inner.task.lock() = Some(handle);
    }

    /// Idempotent teardown; safe before `start()` completes. Existing map
    /// contents are kept (stale data beats no data).
    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(h) = self.inner.task.lock().take() {
            h.abort();
        }
        self.inner.conn.write().connected = false;
    }

    /// Re-fetch and swap the whole map in one step. Failures are recorded on
    /// the connection state, never returned.
    pub fn refresh(&self) {
        let gen = self.inner.generation.load(Ordering::Acquire);
        self.refresh_as_of(gen);
    }

    pub fn get_status(&self, bot_name: &str) -> Option<StatusRecord> {
        self.inner.map.read().get(bot_name).cloned()
    }

    /// Snapshot of all current records, order unspecified.
    pub fn all(&self) -> Vec<StatusRecord> {
        self.inner.map.read().values().cloned().collect()
    }

    pub fn classify(&self, bot_name: &str) -> StatusClass {
        match self.inner.map.read().get(bot_name) {
            Some(r) if r.is_safe_to_operate => StatusClass::Active,
            Some(_) => StatusClass::AtRisk,
            None => StatusClass::Unknown,
        }
    }

    /// Derived on demand from the snapshot; nothing is counted incrementally,
    /// so the counters can never drift from the map.
    pub fn counts(&self) -> RadarCounts {
        let map = self.inner.map.read();
        let active = map.values().filter(|r| r.is_safe_to_operate).count();
        RadarCounts {
            total: map.len(),
            active,
            at_risk: map.len() - active,
        }
    }

    pub fn conn_state(&self) -> ConnState {
        self.inner.conn.read().clone()
    }

    async fn run_fold_loop(self, mut rx: broadcast::Receiver<ChangeEvent>, gen: u64) {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    if !self.fold(gen, ev) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("radar.feed.lagged dropped={n}");
                    // Catch up with one full fetch; folding resumes after.
                    self.refresh_as_of(gen);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.record_transport_error("change feed closed");
                    break;
                }
            }
        }
    }

    /// Apply one change event. Returns false when this loop's generation is
    /// stale and the task should exit.
    fn fold(&self, gen: u64, ev: ChangeEvent) -> bool {
        if self.inner.generation.load(Ordering::Acquire) != gen {
            return false;
        }
        match ev.kind {
            EventKind::Create | EventKind::Update => {
                let Some(payload) = ev.new_record else {
                    self.record_fold_error("event missing new_record");
                    return true;
                };
                match serde_json::from_value::<StatusRecord>(payload) {
                    Ok(rec) => {
                        if rec.bot_name.trim().is_empty() {
                            return true;
                        }
                        // Full replacement; no field-level merging of the
                        // prior record.
                        self.inner
                            .map
                            .write()
                            .insert(rec.bot_name.clone(), rec);
                        self.note_fold_applied();
                    }
                    Err(e) => self.record_fold_error(&format!("bad status payload: {e}")),
                }
            }
            EventKind::Remove => {
                let name = ev
                    .old_record
                    .as_ref()
                    .and_then(|r| r.get("bot_name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if !name.is_empty() {
                    self.inner.map.write().remove(&name);
                }
                self.note_fold_applied();
            }
            // Unknown kinds must not throw or corrupt state.
            EventKind::Other => {}
        }
        true
    }

    fn refresh_as_of(&self, gen: u64) {
        match self.feed.fetch_all() {
            Ok(rows) => self.apply_snapshot(gen, rows),
            Err(e) => self.record_transport_error(&format!("refresh fetch failed: {e:#}")),
        }
    }

    /// Replace the whole map with a parsed snapshot. The swap is a single
    /// synchronous assignment under the write lock: consumers observe the old
    /// map or the new one, never a partially rebuilt state.
    fn apply_snapshot(&self, gen: u64, rows: Vec<JsonValue>) {
        let mut next: HashMap<String, StatusRecord> = HashMap::with_capacity(rows.len());
        let mut skipped = 0usize;
        for row in rows {
            match serde_json::from_value::<StatusRecord>(row) {
                Ok(rec) if !rec.bot_name.trim().is_empty() => {
                    next.insert(rec.bot_name.clone(), rec);
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            log::warn!("radar.snapshot.skipped rows={skipped}");
        }

        if self.inner.generation.load(Ordering::Acquire) != gen {
            log::debug!("radar.snapshot.stale discarded");
            return;
        }
        *self.inner.map.write() = next;
        let mut conn = self.inner.conn.write();
        conn.connected = true;
        conn.error = None;
        conn.last_update_ts = Some(now_ts());
    }

    fn note_fold_applied(&self) {
        let mut conn = self.inner.conn.write();
        conn.error = None;
        conn.last_update_ts = Some(now_ts());
    }

    fn record_fold_error(&self, msg: &str) {
        log::warn!("radar.fold.skip {msg}");
        self.inner.conn.write().error = Some(msg.to_string());
    }

    fn record_transport_error(&self, msg: &str) {
        log::warn!("radar.feed.error {msg}");
        let mut conn = self.inner.conn.write();
        conn.connected = false;
        conn.error = Some(msg.to_string());
    }
}
