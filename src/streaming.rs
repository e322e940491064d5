//! Streaming Service (§4.6): the database-first fan-out pipeline. Grounded
//! on `commands.rs`'s `receive_message` per-kind status dispatch,
//! restructured around the persist-then-publish rule (I5).

use crate::agents::{Observer, RunOutcome, RunResult};
use crate::db::Database;
use crate::error::StoreError;
use crate::models::{Agent, AgentStatus, Message, MessageKind, NewMessage};
use crate::parsers::ParsedLine;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// The real-time events from §6, decoupled from however an external
/// transport actually serializes them onto a socket.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Created { agent: Agent },
    Message { message: Message },
    Complete { result: CompleteResult },
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct CompleteResult {
    pub status: RunOutcome,
    pub duration_ms: u64,
    pub message_count: u64,
}

/// The external transport surface (§1: out of scope, implementation not
/// specified here). Anything that wants to push `agent:{id}` events onto a
/// socket implements this.
pub trait Gateway: Send + Sync {
    fn emit(&self, agent_id: &str, event: TransportEvent);
}

/// A Gateway that only logs; used when no real transport is wired up (e.g.
/// the headless binary, or unit tests that don't care about delivery).
pub struct LoggingGateway;

impl Gateway for LoggingGateway {
    fn emit(&self, agent_id: &str, event: TransportEvent) {
        log::info!("agent:{agent_id} {event:?}");
    }
}

pub struct StreamingService {
    store: Arc<Database>,
    gateway: Arc<dyn Gateway>,
    rooms: Mutex<HashMap<String, HashSet<String>>>,
}

impl StreamingService {
    pub fn new(store: Arc<Database>, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            store,
            gateway,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe_to_agent(&self, client_id: &str, agent_id: &str) {
        let mut rooms = self.rooms.lock().expect("rooms mutex poisoned");
        rooms
            .entry(agent_id.to_string())
            .or_default()
            .insert(client_id.to_string());
    }

    pub fn unsubscribe_from_agent(&self, client_id: &str, agent_id: &str) {
        let mut rooms = self.rooms.lock().expect("rooms mutex poisoned");
        if let Some(members) = rooms.get_mut(agent_id) {
            members.remove(client_id);
        }
    }

    pub fn unsubscribe_client(&self, client_id: &str) {
        let mut rooms = self.rooms.lock().expect("rooms mutex poisoned");
        for members in rooms.values_mut() {
            members.remove(client_id);
        }
    }

    /// Announces a newly-persisted agent (§6's `agent:created`). The agent
    /// is already saved by the time this runs, so there is nothing to fail.
    pub fn broadcast_created(&self, agent: &Agent) {
        self.gateway.emit(
            &agent.id,
            TransportEvent::Created {
                agent: agent.clone(),
            },
        );
    }

    /// Append message, then emit (I5): the store insert completes before any
    /// transport frame is queued. Failures are surfaced to the caller *and*
    /// reported as an `agent:error` event for observer symmetry (§7).
    pub fn broadcast_message(
        &self,
        agent_id: &str,
        kind: MessageKind,
        role: Option<String>,
        content: String,
        raw: Option<String>,
        metadata: Option<Value>,
    ) -> Result<Message, StoreError> {
        let result = self.store.save_message(NewMessage {
            agent_id: agent_id.to_string(),
            kind,
            role,
            content,
            raw,
            metadata,
        });

        match result {
            Ok(message) => {
                self.gateway.emit(
                    agent_id,
                    TransportEvent::Message {
                        message: message.clone(),
                    },
                );
                Ok(message)
            }
            Err(error) => {
                self.gateway.emit(
                    agent_id,
                    TransportEvent::Error {
                        message: error.to_string(),
                    },
                );
                Err(error)
            }
        }
    }

    /// Idempotent on a non-existent agent: still emits the terminal event so
    /// a late-connecting client observes it, and logs rather than failing.
    pub fn broadcast_complete(&self, agent_id: &str, result: &RunResult) {
        match self.store.find_agent_by_id(agent_id) {
            Ok(Some(mut agent)) => {
                if agent.status.can_transition_to(AgentStatus::Completed) {
                    agent.status = AgentStatus::Completed;
                    agent.completed_at = Some(chrono::Utc::now());
                    if let Err(error) = self.store.save_agent(&agent) {
                        log::warn!("failed to persist completed status for {agent_id}: {error}");
                    }
                }
            }
            Ok(None) => {
                log::warn!("broadcastComplete on unknown agent {agent_id}");
            }
            Err(error) => {
                log::warn!("broadcastComplete lookup failed for {agent_id}: {error}");
            }
        }

        self.gateway.emit(
            agent_id,
            TransportEvent::Complete {
                result: CompleteResult {
                    status: result.status,
                    duration_ms: result.duration_ms,
                    message_count: result.message_count,
                },
            },
        );
    }

    /// Idempotent on a non-existent agent, mirroring `broadcast_complete`.
    pub fn broadcast_error(&self, agent_id: &str, error_message: &str) {
        match self.store.find_agent_by_id(agent_id) {
            Ok(Some(mut agent)) => {
                if agent.status.can_transition_to(AgentStatus::Failed) {
                    agent.status = AgentStatus::Failed;
                    agent.error = Some(error_message.to_string());
                    agent.completed_at = Some(chrono::Utc::now());
                    if let Err(error) = self.store.save_agent(&agent) {
                        log::warn!("failed to persist failed status for {agent_id}: {error}");
                    }
                }
            }
            Ok(None) => {
                log::warn!("broadcastError on unknown agent {agent_id}");
            }
            Err(error) => {
                log::warn!("broadcastError lookup failed for {agent_id}: {error}");
            }
        }

        self.gateway.emit(
            agent_id,
            TransportEvent::Error {
                message: error_message.to_string(),
            },
        );
    }
}

impl Observer for StreamingService {
    fn on_message(&self, agent_id: &str, parsed: &ParsedLine) {
        let raw = Some(parsed.raw.clone()).filter(|s| !s.is_empty());
        if let Err(error) = self.broadcast_message(
            agent_id,
            parsed.kind,
            parsed.role.clone(),
            parsed.content.clone(),
            raw,
            parsed.metadata.clone(),
        ) {
            log::warn!("failed to persist message for {agent_id}: {error}");
        }
    }

    fn on_status_change(&self, agent_id: &str, status: &str) {
        let Some(next) = AgentStatus::parse(status) else {
            log::warn!("ignoring unrecognized status '{status}' for {agent_id}");
            return;
        };
        match self.store.find_agent_by_id(agent_id) {
            Ok(Some(mut agent)) if agent.status.can_transition_to(next) => {
                agent.status = next;
                if let Err(error) = self.store.save_agent(&agent) {
                    log::warn!("failed to persist status change for {agent_id}: {error}");
                }
            }
            Ok(Some(agent)) => {
                log::warn!(
                    "rejected invalid transition {:?} -> {:?} for {agent_id}",
                    agent.status,
                    next
                );
            }
            Ok(None) => log::warn!("status change on unknown agent {agent_id}"),
            Err(error) => log::warn!("status change lookup failed for {agent_id}: {error}"),
        }
    }

    fn on_error(&self, agent_id: &str, reason: &str) {
        self.broadcast_error(agent_id, reason);
    }

    fn on_complete(&self, agent_id: &str, result: &RunResult) {
        self.broadcast_complete(agent_id, result);
    }
}
