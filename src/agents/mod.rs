//! Runner Adapters (§4.5): per-provider spawn + translate + observe. Grounded
//! on the reference `Adapter` trait and `create_adapter` factory, generalized
//! to the spec's five operations and late-subscribe buffering.

pub mod claude;
pub mod gemini;
pub mod synthetic;

use crate::error::RunnerError;
use crate::models::{Agent, AgentKind};
use crate::parsers::ParsedLine;
use std::sync::{Arc, Mutex};

/// Result of a completed run, delivered to `Observer::on_complete`.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunOutcome,
    pub duration_ms: u64,
    pub message_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Error,
}

/// The observer capability set from §4.5: four callbacks, one recipient per
/// agent. Kept as a trait object rather than a channel so call sites read
/// the same as the reference `Adapter` methods they replace.
///
/// `on_message` carries the parser's unified shape, not yet a persisted
/// `Message` — assigning `id`/`sequence_number` is the Message Store's job,
/// performed by the Streaming Service observer before it republishes the
/// fully-formed event (the database-first rule, I5).
pub trait Observer: Send + Sync {
    fn on_message(&self, agent_id: &str, parsed: &ParsedLine);
    fn on_status_change(&self, agent_id: &str, status: &str);
    fn on_error(&self, agent_id: &str, reason: &str);
    fn on_complete(&self, agent_id: &str, result: &RunResult);
}

pub type ObserverHandle = Arc<dyn Observer>;

/// A launch request, assembled by Orchestration before handing off to a
/// Runner's `start`.
pub struct LaunchSession {
    pub agent: Agent,
}

/// Each provider family implements this. `start` MUST attach any observers
/// already buffered for the agent's id before the first line is processed
/// (late-subscribe semantics, §4.5).
pub trait Runner: Send + Sync {
    fn start(&self, session: LaunchSession) -> Result<(), RunnerError>;
    fn stop(&self, agent_id: &str) -> Result<(), RunnerError>;
    fn get_status(&self, agent_id: &str) -> Result<String, RunnerError>;
    fn subscribe(&self, agent_id: &str, observer: ObserverHandle);
    fn unsubscribe(&self, agent_id: &str, observer: &ObserverHandle);
}

/// Shared bookkeeping every Runner implementation embeds: the observer
/// registry (with late-subscribe buffering) keyed by agent id.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<std::collections::HashMap<String, Vec<ObserverHandle>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, agent_id: &str, observer: ObserverHandle) {
        let mut map = self.inner.lock().expect("registry mutex poisoned");
        map.entry(agent_id.to_string()).or_default().push(observer);
    }

    pub fn unsubscribe(&self, agent_id: &str, observer: &ObserverHandle) {
        let mut map = self.inner.lock().expect("registry mutex poisoned");
        if let Some(list) = map.get_mut(agent_id) {
            list.retain(|o| !Arc::ptr_eq(o, observer));
        }
    }

    /// Atomically takes all observers registered so far for `agent_id`,
    /// leaving the registry primed for any newly arriving ones.
    pub fn drain_for_start(&self, agent_id: &str) -> Vec<ObserverHandle> {
        let mut map = self.inner.lock().expect("registry mutex poisoned");
        map.entry(agent_id.to_string()).or_default().clone()
    }

    pub fn fan_out_message(&self, agent_id: &str, parsed: &ParsedLine) {
        let observers = self.drain_for_start(agent_id);
        for observer in observers {
            observer.on_message(agent_id, parsed);
        }
    }

    pub fn fan_out_status(&self, agent_id: &str, status: &str) {
        for observer in self.drain_for_start(agent_id) {
            observer.on_status_change(agent_id, status);
        }
    }

    pub fn fan_out_error(&self, agent_id: &str, reason: &str) {
        for observer in self.drain_for_start(agent_id) {
            observer.on_error(agent_id, reason);
        }
    }

    pub fn fan_out_complete(&self, agent_id: &str, result: &RunResult) {
        for observer in self.drain_for_start(agent_id) {
            observer.on_complete(agent_id, result);
        }
    }

    /// Tears down observer state for an agent once its run has ended, so a
    /// subsequent `get_status` correctly fails with `not-found` (§4.5).
    pub fn remove_agent(&self, agent_id: &str) {
        let mut map = self.inner.lock().expect("registry mutex poisoned");
        map.remove(agent_id);
    }

    pub fn has_agent(&self, agent_id: &str) -> bool {
        let map = self.inner.lock().expect("registry mutex poisoned");
        map.contains_key(agent_id)
    }
}

/// Maps a provider kind to its Runner. Unknown kinds fail rather than
/// silently falling back to a mock adapter (a deliberate divergence from the
/// reference factory — see DESIGN.md).
pub fn create_runner(kind: AgentKind) -> Result<Arc<dyn Runner>, RunnerError> {
    match kind {
        AgentKind::Claude => Ok(Arc::new(claude::ClaudeRunner::new())),
        AgentKind::Gemini => Ok(Arc::new(gemini::GeminiRunner::new())),
        AgentKind::Synthetic => Ok(Arc::new(synthetic::SyntheticRunner::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver {
        messages: Arc<AtomicUsize>,
    }

    impl Observer for CountingObserver {
        fn on_message(&self, _agent_id: &str, _parsed: &ParsedLine) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }
        fn on_status_change(&self, _agent_id: &str, _status: &str) {}
        fn on_error(&self, _agent_id: &str, _reason: &str) {}
        fn on_complete(&self, _agent_id: &str, _result: &RunResult) {}
    }

    #[test]
    fn late_subscribe_before_start_is_still_delivered_to() {
        let registry = ObserverRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let observer: ObserverHandle = Arc::new(CountingObserver {
            messages: counter.clone(),
        });
        registry.subscribe("agent-1", observer);

        let parsed = ParsedLine {
            kind: crate::models::MessageKind::Assistant,
            role: None,
            content: "hi".to_string(),
            metadata: None,
            raw: "hi".to_string(),
        };
        registry.fan_out_message("agent-1", &parsed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_the_observer_from_future_fan_out() {
        let registry = ObserverRegistry::new();
        let observer: ObserverHandle = Arc::new(CountingObserver {
            messages: AtomicUsize::new(0),
        });
        registry.subscribe("agent-1", observer.clone());
        registry.unsubscribe("agent-1", &observer);
        assert!(registry.drain_for_start("agent-1").is_empty());
    }

    #[test]
    fn remove_agent_tears_down_registry_state() {
        let registry = ObserverRegistry::new();
        let observer: ObserverHandle = Arc::new(CountingObserver {
            messages: AtomicUsize::new(0),
        });
        registry.subscribe("agent-1", observer);
        assert!(registry.has_agent("agent-1"));
        registry.remove_agent("agent-1");
        assert!(!registry.has_agent("agent-1"));
    }

    #[test]
    fn unknown_provider_kind_has_no_construction_path() {
        // AgentKind is exhaustive over {Claude, Gemini, Synthetic}; there is
        // no variant that reaches an unknown branch, matching §4.5's "Unknown
        // kinds fail" by construction rather than by a runtime fallback.
        assert!(create_runner(AgentKind::Synthetic).is_ok());
    }
}
