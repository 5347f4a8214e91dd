//! HTTP long-polling fallback for the WebSocket bus
//!
//! Clients that cannot hold a WebSocket open poll buffered envelopes over
//! plain HTTP instead. Each long-poll session is a bounded mailbox keyed by
//! an opaque `session_id`:
//!
//! ```text
//! WS dispatcher ──on_ws_message──▶ resolver(envelope) ─▶ session_id
//!                                                           │
//! POST /ws/send ──send_from_http──────────────────────▶ push (drop-head)
//!       │                                                   │
//!       └──▶ http-to-ws forward hook (room/global WS broadcast)
//!                                                           │
//! GET /ws/poll ──poll──────────────────────────────────▶ drain (FIFO)
//! ```
//!
//! Sessions expire after `ttl` without a push or poll; a background sweep
//! removes them and settles the gauges.

use crate::core::envelope::Envelope;
use crate::core::metrics::RelayMetrics;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default TTL of an untouched long-poll session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60);

/// Default per-session buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// How often the background sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Maps an envelope to the long-poll session that should receive it.
pub type Resolver = Box<dyn Fn(&Envelope) -> String + Send + Sync>;

/// Optional hook invoked for HTTP-originated envelopes, typically wired to
/// the WebSocket room/global broadcast. This is the only path by which HTTP
/// senders reach WebSocket subscribers.
pub type HttpToWsForward = Box<dyn Fn(&Envelope) + Send + Sync>;

/// One buffered mailbox.
#[derive(Debug)]
struct LongPollSession {
    buffer: VecDeque<Envelope>,
    last_seen: Instant,
}

impl LongPollSession {
    fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            last_seen: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.last_seen) > ttl
    }

    /// Enqueue with drop-head on overflow.
    fn enqueue(&mut self, envelope: Envelope, capacity: usize) {
        self.buffer.push_back(envelope);
        if self.buffer.len() > capacity {
            self.buffer.pop_front();
        }
        self.touch();
    }

    /// Remove and return up to `max` oldest envelopes, FIFO.
    fn drain(&mut self, max: usize) -> Vec<Envelope> {
        let n = max.min(self.buffer.len());
        let out: Vec<Envelope> = self.buffer.drain(..n).collect();
        self.touch();
        out
    }
}

/// All long-poll sessions, guarded by one mutex.
///
/// Every operation is O(1) per call except [`sweep_expired`](Self::sweep_expired),
/// which is O(sessions).
pub struct LongPollManager {
    ttl: Duration,
    capacity: usize,
    metrics: Arc<RelayMetrics>,
    sessions: Mutex<HashMap<String, LongPollSession>>,
}

impl LongPollManager {
    pub fn new(ttl: Duration, capacity: usize, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            ttl,
            capacity,
            metrics,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_create<'a>(
        &self,
        sessions: &'a mut HashMap<String, LongPollSession>,
        session_id: &str,
    ) -> &'a mut LongPollSession {
        sessions.entry(session_id.to_string()).or_insert_with(|| {
            self.metrics.lp_sessions_total.fetch_add(1, Ordering::Relaxed);
            self.metrics.lp_sessions_active.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session_id = %session_id, "long-poll session created");
            LongPollSession::new()
        })
    }

    /// Enqueue an envelope into `session_id`, creating the session lazily.
    pub fn push_to(&self, session_id: &str, envelope: Envelope) {
        let mut sessions = self.sessions.lock().expect("long-poll lock poisoned");
        let session = self.get_or_create(&mut sessions, session_id);

        let before = session.buffer.len();
        session.enqueue(envelope, self.capacity);
        let delta = session.buffer.len() as i64 - before as i64;

        self.metrics
            .lp_messages_buffered
            .fetch_add(delta, Ordering::Relaxed);
        self.metrics
            .lp_messages_enqueued_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Drain up to `max_messages` envelopes from `session_id`, FIFO.
    ///
    /// A missing session yields an empty list; with `create_if_missing` it
    /// is registered first so subsequent pushes find it.
    pub fn poll(
        &self,
        session_id: &str,
        max_messages: usize,
        create_if_missing: bool,
    ) -> Vec<Envelope> {
        let mut sessions = self.sessions.lock().expect("long-poll lock poisoned");
        self.metrics.lp_polls_total.fetch_add(1, Ordering::Relaxed);

        let session = if sessions.contains_key(session_id) {
            sessions.get_mut(session_id).expect("checked above")
        } else if create_if_missing {
            self.get_or_create(&mut sessions, session_id)
        } else {
            return Vec::new();
        };

        let out = session.drain(max_messages);
        if !out.is_empty() {
            self.metrics
                .lp_messages_drained_total
                .fetch_add(out.len() as u64, Ordering::Relaxed);
            self.metrics
                .lp_messages_buffered
                .fetch_sub(out.len() as i64, Ordering::Relaxed);
        }
        out
    }

    /// Remove every session whose `last_seen` is older than the TTL.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().expect("long-poll lock poisoned");

        sessions.retain(|session_id, session| {
            if !session.is_expired(self.ttl, now) {
                return true;
            }
            let buffered = session.buffer.len() as i64;
            if buffered > 0 {
                self.metrics
                    .lp_messages_buffered
                    .fetch_sub(buffered, Ordering::Relaxed);
            }
            self.metrics
                .lp_sessions_active
                .fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(session_id = %session_id, buffered, "long-poll session expired");
            false
        });
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("long-poll lock poisoned").len()
    }

    /// Buffered envelope count for one session (0 when absent).
    pub fn buffer_size(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .expect("long-poll lock poisoned")
            .get(session_id)
            .map_or(0, |s| s.buffer.len())
    }
}

/// Bridge between the WebSocket bus and the long-poll mailboxes.
///
/// The resolver decides which mailbox receives a WS envelope; the default
/// maps room-scoped envelopes to `room:<room>` and everything else to
/// `broadcast`.
pub struct LongPollBridge {
    manager: LongPollManager,
    resolver: Option<Resolver>,
    http_to_ws: Option<HttpToWsForward>,
}

impl LongPollBridge {
    pub fn new(
        manager: LongPollManager,
        resolver: Option<Resolver>,
        http_to_ws: Option<HttpToWsForward>,
    ) -> Self {
        Self {
            manager,
            resolver,
            http_to_ws,
        }
    }

    /// The session id an envelope routes to.
    pub fn resolve_session_id(&self, envelope: &Envelope) -> String {
        if let Some(resolver) = &self.resolver {
            return resolver(envelope);
        }
        default_session_id(envelope)
    }

    /// Called by the dispatcher for every parsed inbound WS envelope.
    pub fn on_ws_message(&self, envelope: &Envelope) {
        let session_id = self.resolve_session_id(envelope);
        self.manager.push_to(&session_id, envelope.clone());
    }

    /// `GET /ws/poll` helper.
    pub fn poll(
        &self,
        session_id: &str,
        max_messages: usize,
        create_if_missing: bool,
    ) -> Vec<Envelope> {
        self.manager.poll(session_id, max_messages, create_if_missing)
    }

    /// `POST /ws/send` helper: buffer for other long-poll clients, then
    /// mirror to the WebSocket side via the forward hook.
    pub fn send_from_http(&self, session_id: &str, envelope: &Envelope) {
        self.manager.push_to(session_id, envelope.clone());
        if let Some(forward) = &self.http_to_ws {
            forward(envelope);
        }
    }

    /// Access the underlying manager (stats, sweeping).
    pub fn manager(&self) -> &LongPollManager {
        &self.manager
    }
}

/// Default envelope-to-mailbox mapping: `room:<room>` or `broadcast`.
pub fn default_session_id(envelope: &Envelope) -> String {
    if envelope.room.is_empty() {
        "broadcast".to_string()
    } else {
        format!("room:{}", envelope.room)
    }
}

/// Spawn the periodic TTL sweep for a bridge. The task runs until the
/// returned handle is aborted (the server aborts it on shutdown).
pub fn spawn_sweeper(bridge: Arc<LongPollBridge>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            bridge.manager().sweep_expired();
        }
    })
}
