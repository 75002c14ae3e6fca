//! Registry of live agent sessions.
//!
//! Each session owns a connection handle and a queue of server messages
//! waiting to be collected. Sessions idle longer than the timeout are evicted
//! by `sweep_stale`, either called directly or from a [`Sweeper`] thread.

use crate::clock::{Clock, SystemClock};
use crate::defaults;
use crate::error::{Result, VoxlinkError};
use crate::lock::lock_or_recover;
use crate::transport::message::RealtimeInput;
use crossbeam_channel::{Sender, bounded, select, tick};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Connection to the remote agent for one session.
pub trait SessionConnection: Send {
    /// Forwards one chunk of captured audio.
    fn send(&mut self, input: &RealtimeInput) -> Result<()>;

    /// Closes the connection. Called exactly once, on close or eviction.
    fn close(&mut self) -> Result<()>;
}

struct SessionEntry<S> {
    connection: S,
    last_activity: Instant,
    messages: Vec<Value>,
}

/// Snapshot used for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub queued_messages: usize,
}

/// Sessions keyed by generated id, with an injected clock.
pub struct SessionRegistry<S: SessionConnection, C: Clock = SystemClock> {
    sessions: HashMap<Uuid, SessionEntry<S>>,
    idle_timeout: Duration,
    clock: C,
}

impl<S: SessionConnection> SessionRegistry<S, SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(
            Duration::from_secs(defaults::SESSION_IDLE_TIMEOUT_SECS),
            SystemClock,
        )
    }
}

impl<S: SessionConnection> Default for SessionRegistry<S, SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SessionConnection, C: Clock> SessionRegistry<S, C> {
    pub fn with_clock(idle_timeout: Duration, clock: C) -> Self {
        Self {
            sessions: HashMap::new(),
            idle_timeout,
            clock,
        }
    }

    /// Registers a connection and returns its new session id.
    pub fn insert(&mut self, connection: S) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            SessionEntry {
                connection,
                last_activity: self.clock.now(),
                messages: Vec::new(),
            },
        );
        tracing::info!(session = %id, "session registered");
        id
    }

    /// Marks a session as active now.
    pub fn touch(&mut self, id: &Uuid) -> Result<()> {
        let now = self.clock.now();
        self.entry_mut(id)?.last_activity = now;
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Option<&S> {
        self.sessions.get(id).map(|entry| &entry.connection)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.sessions.contains_key(id)
    }

    /// Sends captured audio on a session's connection.
    ///
    /// # Errors
    /// `SessionNotFound` for an unknown id, or whatever the connection reports.
    pub fn send_audio(&mut self, id: &Uuid, input: &RealtimeInput) -> Result<()> {
        let now = self.clock.now();
        let entry = self.entry_mut(id)?;
        entry.connection.send(input)?;
        entry.last_activity = now;
        Ok(())
    }

    /// Queues a message received from the agent. Messages for unknown
    /// sessions are discarded.
    pub fn push_message(&mut self, id: &Uuid, message: Value) {
        let now = self.clock.now();
        match self.sessions.get_mut(id) {
            Some(entry) => {
                entry.messages.push(message);
                entry.last_activity = now;
            }
            None => tracing::debug!(session = %id, "message for unknown session dropped"),
        }
    }

    /// Removes and returns every queued message. Unknown sessions have none.
    pub fn take_messages(&mut self, id: &Uuid) -> Vec<Value> {
        let now = self.clock.now();
        match self.sessions.get_mut(id) {
            Some(entry) => {
                entry.last_activity = now;
                std::mem::take(&mut entry.messages)
            }
            None => Vec::new(),
        }
    }

    /// Closes and removes a session. Unknown ids are ignored.
    pub fn close(&mut self, id: &Uuid) {
        if let Some(mut entry) = self.sessions.remove(id) {
            if let Err(e) = entry.connection.close() {
                tracing::warn!(session = %id, "error closing session: {e}");
            }
            tracing::info!(session = %id, "session closed");
        }
    }

    /// Closes every session idle for longer than the timeout; returns their ids.
    pub fn sweep_stale(&mut self) -> Vec<Uuid> {
        let now = self.clock.now();
        let timeout = self.idle_timeout;
        let stale: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_activity) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            tracing::info!(session = %id, "evicting stale session");
            self.close(id);
        }
        stale
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_sessions: self.sessions.len(),
            queued_messages: self.sessions.values().map(|e| e.messages.len()).sum(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn entry_mut(&mut self, id: &Uuid) -> Result<&mut SessionEntry<S>> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| VoxlinkError::SessionNotFound { id: id.to_string() })
    }
}

/// Background thread that sweeps a shared registry on a fixed cadence.
pub struct Sweeper {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn<S, C>(registry: Arc<Mutex<SessionRegistry<S, C>>>, interval: Duration) -> Self
    where
        S: SessionConnection + 'static,
        C: Clock + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);
        let thread = thread::spawn(move || {
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let evicted = lock_or_recover(&registry, "session sweeper").sweep_stale();
                        if !evicted.is_empty() {
                            tracing::debug!(count = evicted.len(), "swept stale sessions");
                        }
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
        });
        Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }
    }

    /// Uses the default sweep cadence.
    pub fn spawn_default<S, C>(registry: Arc<Mutex<SessionRegistry<S, C>>>) -> Self
    where
        S: SessionConnection + 'static,
        C: Clock + 'static,
    {
        Self::spawn(
            registry,
            Duration::from_secs(defaults::SESSION_SWEEP_INTERVAL_SECS),
        )
    }

    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("session sweeper thread panicked");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
