//! Per-connection component bindings.
//!
//! A session maps component ids to either a [`SessionSlot::Pending`]
//! reservation or a [`SessionSlot::Bound`] instance. Reserving first means a
//! frame that names an id before its instance exists is answered with "not
//! found" instead of racing the construction; the slot is promoted once the
//! instance shows up in the global registry.
//!
//! Reservations are capped per session. Past the cap the oldest reservation is
//! dropped, so a client naming endless unknown ids cannot grow the map.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::lock::{LockExt, LockSite};
use crate::domain::component::ComponentId;

use super::{
    protocol::{ComponentUpdate, ServerFrame},
    registry::{ComponentRegistry, SharedComponent},
};

const SOURCE: &str = "reactive::session";
const METRIC_SESSIONS_ACTIVE: &str = "tessera_sessions_active";
const METRIC_PUSH_DROPPED: &str = "tessera_session_push_dropped_total";
const METRIC_PENDING_EVICTED: &str = "tessera_session_pending_evicted_total";

pub const DEFAULT_MAX_PENDING_COMPONENTS: usize = 64;

pub enum SessionSlot {
    Pending,
    Bound(SharedComponent),
}

/// Message handed to the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Default)]
struct Slots {
    by_id: HashMap<ComponentId, SessionSlot>,
    /// Pending ids, oldest first. Mirrors the `Pending` entries of `by_id`.
    pending: VecDeque<ComponentId>,
}

impl Slots {
    fn forget_pending(&mut self, component_id: &ComponentId) {
        if let Some(position) = self.pending.iter().position(|id| id == component_id) {
            self.pending.remove(position);
        }
    }

    fn bind(&mut self, component_id: ComponentId, component: SharedComponent) {
        if let Some(SessionSlot::Pending) = self
            .by_id
            .insert(component_id.clone(), SessionSlot::Bound(component))
        {
            self.forget_pending(&component_id);
        }
    }

    /// Reserve `component_id`, evicting the oldest reservations past `limit`.
    fn reserve(&mut self, component_id: ComponentId, limit: usize) -> usize {
        if self.by_id.contains_key(&component_id) {
            return 0;
        }
        self.by_id.insert(component_id.clone(), SessionSlot::Pending);
        self.pending.push_back(component_id);

        let mut evicted = 0;
        while self.pending.len() > limit {
            let Some(oldest) = self.pending.pop_front() else {
                break;
            };
            self.by_id.remove(&oldest);
            evicted += 1;
        }
        evicted
    }
}

pub struct ReactiveSession {
    id: Uuid,
    created_at: OffsetDateTime,
    outbound: mpsc::Sender<Outbound>,
    max_pending: usize,
    slots: Mutex<Slots>,
}

impl ReactiveSession {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: OffsetDateTime::now_utc(),
            outbound,
            max_pending: DEFAULT_MAX_PENDING_COMPONENTS,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Build a session together with the receiving end of its transport.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Cap the number of pending reservations. Zero is treated as one.
    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.max_pending = limit.max(1);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn pending_limit(&self) -> usize {
        self.max_pending
    }

    fn site(&self, op: &'static str) -> LockSite<'static> {
        LockSite::new(SOURCE, op).session(self.id)
    }

    /// Reserve `component_id` (no instance) or bind it (with an instance).
    /// A reservation never downgrades an existing binding.
    pub fn register_component(&self, component_id: ComponentId, component: Option<SharedComponent>) {
        let mut slots = self.slots.lock_at(self.site("register_component"));
        match component {
            Some(component) => slots.bind(component_id, component),
            None => {
                let evicted = slots.reserve(component_id, self.max_pending);
                if evicted > 0 {
                    counter!(METRIC_PENDING_EVICTED).increment(evicted as u64);
                    debug!(
                        session_id = %self.id,
                        evicted,
                        limit = self.max_pending,
                        "dropped oldest pending reservations"
                    );
                }
            }
        }
    }

    /// Bound instance for `component_id`; pending reservations read as absent.
    pub fn get_component(&self, component_id: &ComponentId) -> Option<SharedComponent> {
        match self.slots.lock_at(self.site("get_component")).by_id.get(component_id) {
            Some(SessionSlot::Bound(component)) => Some(component.clone()),
            Some(SessionSlot::Pending) | None => None,
        }
    }

    /// Promote a pending reservation, or bind directly.
    pub fn set_component(&self, component_id: ComponentId, component: SharedComponent) {
        self.slots
            .lock_at(self.site("set_component"))
            .bind(component_id, component);
    }

    pub fn unregister_component(&self, component_id: &ComponentId) -> bool {
        let mut slots = self.slots.lock_at(self.site("unregister_component"));
        match slots.by_id.remove(component_id) {
            Some(SessionSlot::Pending) => {
                slots.forget_pending(component_id);
                true
            }
            Some(SessionSlot::Bound(_)) => true,
            None => false,
        }
    }

    pub fn is_pending(&self, component_id: &ComponentId) -> bool {
        matches!(
            self.slots.lock_at(self.site("is_pending")).by_id.get(component_id),
            Some(SessionSlot::Pending)
        )
    }

    pub fn is_bound(&self, component_id: &ComponentId) -> bool {
        matches!(
            self.slots.lock_at(self.site("is_bound")).by_id.get(component_id),
            Some(SessionSlot::Bound(_))
        )
    }

    pub fn pending_len(&self) -> usize {
        self.slots.lock_at(self.site("pending_len")).pending.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock_at(self.site("len")).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find `component_id` for an inbound frame.
    ///
    /// Session bindings win. Otherwise the id is reserved and, when the global
    /// registry already holds the instance, promoted to a binding.
    pub fn resolve(
        &self,
        registry: &ComponentRegistry,
        component_id: &ComponentId,
    ) -> Option<SharedComponent> {
        if let Some(component) = self.get_component(component_id) {
            return Some(component);
        }

        self.register_component(component_id.clone(), None);
        let component = registry.get(component_id)?;
        self.set_component(component_id.clone(), component.clone());
        debug!(
            session_id = %self.id,
            component_id = %component_id,
            "bound component from global registry"
        );
        Some(component)
    }

    fn encode<T: Serialize>(&self, payload: &T) -> Option<String> {
        match serde_json::to_string(payload) {
            Ok(text) => Some(text),
            Err(err) => {
                debug!(session_id = %self.id, error = %err, "failed to encode outbound frame");
                None
            }
        }
    }

    /// Serialize `payload` and queue it for the socket, waiting for room.
    ///
    /// Only for this session's own replies. Failures are logged and swallowed:
    /// a failed write means the connection is closing, and cleanup follows from
    /// the disconnect.
    pub async fn send_message<T: Serialize>(&self, payload: &T) -> bool {
        let Some(text) = self.encode(payload) else {
            return false;
        };

        match self.outbound.send(Outbound::Text(text)).await {
            Ok(()) => true,
            Err(_) => {
                debug!(session_id = %self.id, "transport closed, dropping outbound frame");
                false
            }
        }
    }

    /// Queue `payload` without waiting. A full or closed queue drops the frame.
    ///
    /// Used for pushes triggered by other sessions, which must never wait on a
    /// client that is not reading.
    pub fn try_push<T: Serialize>(&self, payload: &T) -> bool {
        let Some(text) = self.encode(payload) else {
            return false;
        };

        let reason = match self.outbound.try_send(Outbound::Text(text)) {
            Ok(()) => return true,
            Err(TrySendError::Full(_)) => "full",
            Err(TrySendError::Closed(_)) => "closed",
        };
        counter!(METRIC_PUSH_DROPPED, "reason" => reason).increment(1);
        if reason == "full" {
            warn!(session_id = %self.id, "outbound queue full, dropping pushed frame");
        } else {
            debug!(session_id = %self.id, "transport closed, dropping pushed frame");
        }
        false
    }

    pub async fn send_batch_update(&self, updates: Vec<ComponentUpdate>) -> bool {
        if updates.is_empty() {
            return true;
        }
        self.send_message(&ServerFrame::Batch { updates }).await
    }

    /// Non-blocking counterpart of [`Self::send_batch_update`].
    pub fn push_batch_update(&self, updates: Vec<ComponentUpdate>) -> bool {
        if updates.is_empty() {
            return true;
        }
        self.try_push(&ServerFrame::Batch { updates })
    }

    /// Ask the writer task to close the socket.
    pub async fn close(&self) {
        let _ = self.outbound.send(Outbound::Close).await;
    }

    /// Release every binding held by this session.
    pub fn cleanup(&self) {
        let mut slots = self.slots.lock_at(self.site("cleanup"));
        let released = slots.by_id.len();
        slots.by_id.clear();
        slots.pending.clear();
        debug!(session_id = %self.id, released, "session cleaned up");
    }
}

/// Live sessions, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<ReactiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<ReactiveSession>) {
        self.sessions.insert(session.id(), session);
        gauge!(METRIC_SESSIONS_ACTIVE).set(self.sessions.len() as f64);
    }

    pub fn remove(&self, session_id: Uuid) -> Option<Arc<ReactiveSession>> {
        let removed = self.sessions.remove(&session_id).map(|(_, session)| session);
        gauge!(METRIC_SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        removed
    }

    pub fn get(&self, session_id: Uuid) -> Option<Arc<ReactiveSession>> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<ReactiveSession>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Push fresh markup for `component_id` to every session that has it bound,
    /// except `origin`. Never waits: a session whose queue is full misses the
    /// update. Returns the number of sessions notified.
    pub fn propagate(&self, component_id: &ComponentId, html: &str, origin: Option<Uuid>) -> usize {
        let mut notified = 0;
        for session in self.snapshot() {
            if Some(session.id()) == origin || !session.is_bound(component_id) {
                continue;
            }
            let update = ComponentUpdate {
                component_id: component_id.clone(),
                html: html.to_string(),
            };
            if session.push_batch_update(vec![update]) {
                notified += 1;
            }
        }
        notified
    }

    /// Close and clean up every live session.
    pub async fn shutdown(&self) {
        for session in self.snapshot() {
            session.close().await;
            session.cleanup();
            self.remove(session.id());
        }
    }
}
