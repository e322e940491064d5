//! Gemini-family Runner (§4.5, §6): requires `GEMINI_API_KEY` in the
//! environment; a missing key fails the launch before a process is spawned.

use super::{LaunchSession, ObserverHandle, ObserverRegistry, Runner, RunOutcome, RunResult};
use crate::error::RunnerError;
use crate::parsers::gemini::parse_line;
use crate::process::{ManagedProcess, ProcessEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

pub struct GeminiRunner {
    registry: Arc<ObserverRegistry>,
    sessions: Mutex<HashMap<String, Arc<ManagedProcess>>>,
}

impl GeminiRunner {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ObserverRegistry::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Runner for GeminiRunner {
    fn start(&self, session: LaunchSession) -> Result<(), RunnerError> {
        if std::env::var("GEMINI_API_KEY").is_err() {
            return Err(RunnerError::SpawnFailed(
                "GEMINI_API_KEY is required in the environment".to_string(),
            ));
        }

        let agent_id = session.agent.id.clone();
        let args = vec![
            "-p".to_string(),
            session.agent.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
        ];
        let cwd = session.agent.configuration.working_directory.clone();

        let (process, rx) = ManagedProcess::spawn(
            "gemini",
            &args,
            cwd.as_deref(),
            &HashMap::new(),
            false,
        )
        .map_err(|e| RunnerError::SpawnFailed(e.to_string()))?;
        let process = Arc::new(process);

        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .insert(agent_id.clone(), process);

        let registry = Arc::clone(&self.registry);
        let agent_id_for_thread = agent_id.clone();
        thread::spawn(move || {
            let started_at = Instant::now();
            let mut message_count: u64 = 0;

            for event in rx {
                match event {
                    ProcessEvent::Line(line) => match parse_line(&line.text) {
                        Ok(None) => continue,
                        Ok(Some(parsed)) => {
                            message_count += 1;
                            registry.fan_out_message(&agent_id_for_thread, &parsed);
                        }
                        Err(error) => {
                            log::warn!(
                                "gemini parser skipped malformed frame for {agent_id_for_thread}: {error}"
                            );
                        }
                    },
                    ProcessEvent::Exited(status) => {
                        let duration_ms = started_at.elapsed().as_millis() as u64;
                        if status.code == Some(0) {
                            registry.fan_out_complete(
                                &agent_id_for_thread,
                                &RunResult {
                                    status: RunOutcome::Success,
                                    duration_ms,
                                    message_count,
                                },
                            );
                        } else {
                            registry.fan_out_error(
                                &agent_id_for_thread,
                                &format!("process exited with code {:?}", status.code),
                            );
                        }
                        registry.remove_agent(&agent_id_for_thread);
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    fn stop(&self, agent_id: &str) -> Result<(), RunnerError> {
        let sessions = self.sessions.lock().expect("sessions mutex poisoned");
        match sessions.get(agent_id) {
            Some(process) => process
                .terminate()
                .map_err(|e| RunnerError::Other(e.to_string())),
            None => Err(RunnerError::NotFound(agent_id.to_string())),
        }
    }

    fn get_status(&self, agent_id: &str) -> Result<String, RunnerError> {
        let sessions = self.sessions.lock().expect("sessions mutex poisoned");
        match sessions.get(agent_id) {
            Some(process) if process.is_running() => Ok("running".to_string()),
            Some(_) => Ok("exited".to_string()),
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

impl Default for GeminiRunner {
    fn default() -> Self {
        Self::new()
    }
}
