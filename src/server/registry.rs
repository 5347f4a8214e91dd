//! Room membership registry with weak-referenced broadcast
//!
//! Rooms hold `Weak<Session>` references so they never keep a dead
//! connection alive: a session that closes simply stops upgrading, and the
//! stale entry is swept on the next broadcast or membership change. The
//! global session list works the same way and backs non-room broadcast.
//!
//! One mutex guards both the room map and the global list. It is held only
//! to enumerate and upgrade weak references; `send_text` merely enqueues
//! onto the session's outbound channel, so nothing blocks under the lock.

use crate::server::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

#[derive(Default)]
struct RegistryInner {
    /// Every live session, for global broadcast.
    sessions: Vec<Weak<Session>>,
    /// Room name to member sessions.
    rooms: HashMap<String, Vec<Weak<Session>>>,
}

/// Tracks which sessions exist and which rooms they belong to.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<RegistryInner>,
}

fn is_same(weak: &Weak<Session>, session: &Arc<Session>) -> bool {
    weak.upgrade()
        .map_or(false, |live| Arc::ptr_eq(&live, session))
}

fn sweep(list: &mut Vec<Weak<Session>>) {
    list.retain(|weak| weak.strong_count() > 0);
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to the global list. Called once per connection on open.
    pub fn register(&self, session: &Arc<Session>) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        sweep(&mut inner.sessions);
        inner.sessions.push(Arc::downgrade(session));
    }

    /// Drop a session from the global list and every room. Called once per
    /// connection on close.
    pub fn unregister(&self, session: &Arc<Session>) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner
            .sessions
            .retain(|weak| weak.strong_count() > 0 && !is_same(weak, session));
        Self::remove_from_all_rooms(&mut inner, session);
    }

    /// Idempotently add `session` to `room`.
    pub fn join(&self, session: &Arc<Session>, room: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let members = inner.rooms.entry(room.to_string()).or_default();
        sweep(members);
        if !members.iter().any(|weak| is_same(weak, session)) {
            members.push(Arc::downgrade(session));
            tracing::debug!(
                connection_id = %session.connection_id(),
                room = %room,
                "session joined room"
            );
        }
    }

    /// Remove `session` from `room`; an emptied room disappears.
    pub fn leave(&self, session: &Arc<Session>, room: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if let Some(members) = inner.rooms.get_mut(room) {
            members.retain(|weak| weak.strong_count() > 0 && !is_same(weak, session));
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    /// Remove `session` from every room it joined.
    pub fn leave_all(&self, session: &Arc<Session>) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        Self::remove_from_all_rooms(&mut inner, session);
    }

    fn remove_from_all_rooms(inner: &mut RegistryInner, session: &Arc<Session>) {
        inner.rooms.retain(|_, members| {
            members.retain(|weak| weak.strong_count() > 0 && !is_same(weak, session));
            !members.is_empty()
        });
    }

    /// Enqueue `text` on every member of `room`; returns how many sessions
    /// received it. Expired references are removed in the same pass.
    pub fn broadcast_room_text(&self, room: &str, text: &str) -> usize {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let Some(members) = inner.rooms.get_mut(room) else {
            return 0;
        };

        let mut delivered = 0;
        members.retain(|weak| match weak.upgrade() {
            Some(session) => {
                session.send_text(text);
                delivered += 1;
                true
            }
            None => false,
        });
        if members.is_empty() {
            inner.rooms.remove(room);
        }
        delivered
    }

    /// Enqueue `text` on every live session; returns how many received it.
    pub fn broadcast_text(&self, text: &str) -> usize {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let mut delivered = 0;
        inner.sessions.retain(|weak| match weak.upgrade() {
            Some(session) => {
                session.send_text(text);
                delivered += 1;
                true
            }
            None => false,
        });
        delivered
    }

    /// Current member count of a room (after sweeping expired entries).
    pub fn member_count(&self, room: &str) -> usize {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let count = match inner.rooms.get_mut(room) {
            Some(members) => {
                sweep(members);
                members.len()
            }
            None => return 0,
        };
        if count == 0 {
            inner.rooms.remove(room);
        }
        count
    }

    /// Current live session count.
    pub fn session_count(&self) -> usize {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        sweep(&mut inner.sessions);
        inner.sessions.len()
    }

    /// Names of rooms that currently have members.
    pub fn rooms(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.rooms.keys().cloned().collect()
    }
}
