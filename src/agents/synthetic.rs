//! Synthetic Runner (§4.5): plays back a scripted schedule instead of
//! spawning a real CLI, for deterministic tests (scenario 7 in §8). Grounded
//! on `agents/mock.rs`'s delayed-echo poll loop.

use super::{LaunchSession, ObserverHandle, ObserverRegistry, Runner, RunOutcome, RunResult};
use crate::error::RunnerError;
use crate::models::MessageKind;
use crate::parsers::ParsedLine;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ScheduleStep {
    Message { delay: u64, data: MessageData },
    Complete { delay: u64 },
    Error { delay: u64, data: ErrorData },
}

#[derive(Debug, Clone, Deserialize)]
struct MessageData {
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorData {
    message: String,
}

pub struct SyntheticRunner {
    registry: Arc<ObserverRegistry>,
    running: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl SyntheticRunner {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ObserverRegistry::new()),
            running: Mutex::new(HashMap::new()),
        }
    }

    fn parse_schedule(session: &LaunchSession) -> Result<Vec<ScheduleStep>, RunnerError> {
        let raw = session
            .agent
            .configuration
            .metadata
            .as_ref()
            .and_then(|m| m.get("schedule"))
            .ok_or_else(|| {
                RunnerError::Other("synthetic agent requires configuration.metadata.schedule".to_string())
            })?;
        serde_json::from_value(raw.clone())
            .map_err(|e| RunnerError::Other(format!("invalid schedule: {e}")))
    }
}

impl Runner for SyntheticRunner {
    fn start(&self, session: LaunchSession) -> Result<(), RunnerError> {
        let agent_id = session.agent.id.clone();
        let schedule = Self::parse_schedule(&session)?;

        let alive = Arc::new(AtomicBool::new(true));
        self.running
            .lock()
            .expect("running mutex poisoned")
            .insert(agent_id.clone(), Arc::clone(&alive));

        let registry = Arc::clone(&self.registry);
        let agent_id_for_thread = agent_id.clone();
        thread::spawn(move || {
            let started_at = Instant::now();
            let mut message_count: u64 = 0;

            for step in schedule {
                if !alive.load(Ordering::SeqCst) {
                    return;
                }
                match step {
                    ScheduleStep::Message { delay, data } => {
                        thread::sleep(Duration::from_millis(delay));
                        if !alive.load(Ordering::SeqCst) {
                            return;
                        }
                        message_count += 1;
                        let parsed = ParsedLine {
                            kind: MessageKind::Assistant,
                            role: Some("assistant".to_string()),
                            content: data.content,
                            metadata: None,
                            raw: String::new(),
                        };
                        registry.fan_out_message(&agent_id_for_thread, &parsed);
                    }
                    ScheduleStep::Complete { delay } => {
                        thread::sleep(Duration::from_millis(delay));
                        registry.fan_out_complete(
                            &agent_id_for_thread,
                            &RunResult {
                                status: RunOutcome::Success,
                                duration_ms: started_at.elapsed().as_millis() as u64,
                                message_count,
                            },
                        );
                        registry.remove_agent(&agent_id_for_thread);
                        return;
                    }
                    ScheduleStep::Error { delay, data } => {
                        thread::sleep(Duration::from_millis(delay));
                        registry.fan_out_error(&agent_id_for_thread, &data.message);
                        registry.remove_agent(&agent_id_for_thread);
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    fn stop(&self, agent_id: &str) -> Result<(), RunnerError> {
        let running = self.running.lock().expect("running mutex poisoned");
        match running.get(agent_id) {
            Some(alive) => {
                alive.store(false, Ordering::SeqCst);
                Ok(())
            }
            None => Err(RunnerError::NotFound(agent_id.to_string())),
        }
    }

    fn get_status(&self, agent_id: &str) -> Result<String, RunnerError> {
        let running = self.running.lock().expect("running mutex poisoned");
        match running.get(agent_id) {
            Some(alive) if alive.load(Ordering::SeqCst) => Ok("running".to_string()),
            Some(_) => Ok("stopped".to_string()),
            None => Err(RunnerError::NotFound(agent_id.to_string())),
        }
    }

    fn subscribe(&self, agent_id: &str, observer: ObserverHandle) {
        self.registry.subscribe(agent_id, observer);
    }

    fn unsubscribe(&self, agent_id: &str, observer: &ObserverHandle) {
        self.registry.unsubscribe(agent_id, observer);
    }
}

impl Default for SyntheticRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Observer;
    use crate::models::{Agent, AgentKind, Configuration};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    struct RecordingObserver {
        messages: StdMutex<Vec<String>>,
        errors: StdMutex<Vec<String>>,
        completes: AtomicUsize,
    }

    impl Observer for RecordingObserver {
        fn on_message(&self, _agent_id: &str, parsed: &ParsedLine) {
            self.messages.lock().unwrap().push(parsed.content.clone());
        }
        fn on_status_change(&self, _agent_id: &str, _status: &str) {}
        fn on_error(&self, _agent_id: &str, reason: &str) {
            self.errors.lock().unwrap().push(reason.to_string());
        }
        fn on_complete(&self, _agent_id: &str, _result: &RunResult) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn scenario_seven_synthetic_error_after_one_message() {
        let schedule = serde_json::json!([
            {"type": "message", "delay": 10, "data": {"content": "m1"}},
            {"type": "error", "delay": 20, "data": {"message": "boom"}}
        ]);
        let mut config = Configuration::default();
        config.metadata = Some(serde_json::json!({"schedule": schedule}));
        let agent = Agent::new(AgentKind::Synthetic, "run schedule", config);
        let agent_id = agent.id.clone();

        let runner = SyntheticRunner::new();
        let recorder = Arc::new(RecordingObserver {
            messages: StdMutex::new(Vec::new()),
            errors: StdMutex::new(Vec::new()),
            completes: AtomicUsize::new(0),
        });
        let observer: ObserverHandle = recorder.clone();
        runner.subscribe(&agent_id, observer);
        runner.start(LaunchSession { agent }).expect("schedule should parse");

        thread::sleep(Duration::from_millis(200));

        assert_eq!(*recorder.messages.lock().unwrap(), vec!["m1".to_string()]);
        assert_eq!(*recorder.errors.lock().unwrap(), vec!["boom".to_string()]);
        assert_eq!(recorder.completes.load(Ordering::SeqCst), 0);
    }
}
