//! Orchestration (§4.8): the six-step launch sequence and its counterparts
//! for termination and listing. Grounded on the reference codebase's launch
//! command, restructured around a `Drop` guard for the instruction-file
//! scoped restoration (step 6) instead of a try/finally block. Launches are
//! serialized through the Launch Queue (§4.7) rather than run inline.

use crate::agents::{create_runner, LaunchSession, Observer, Runner};
use crate::db::Database;
use crate::error::OrchestrationError;
use crate::models::{Agent, AgentKind, AgentStatus, Configuration, MessageKind, NewMessage};
use crate::queue::LaunchQueue;
use crate::streaming::StreamingService;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// A request to launch a new agent (§3/§4.8's `launchAgentDirect` input).
pub struct LaunchRequest {
    pub kind: AgentKind,
    pub prompt: String,
    pub configuration: Configuration,
}

/// Snapshot of a provider's instruction file, restored on drop regardless of
/// how the launch sequence exits (step 6).
struct InstructionGuard {
    path: PathBuf,
    original: Option<Vec<u8>>,
}

impl InstructionGuard {
    /// Snapshots `path` (if it exists) and writes `instructions` in its
    /// place. Step 1 of §4.8; errors here fail the launch before any agent
    /// or message is created.
    fn replace(path: PathBuf, instructions: &str) -> std::io::Result<Self> {
        let original = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, instructions)?;
        Ok(Self { path, original })
    }
}

impl Drop for InstructionGuard {
    fn drop(&mut self) {
        let result = match &self.original {
            Some(bytes) => fs::write(&self.path, bytes),
            None => fs::remove_file(&self.path).or_else(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(e)
                }
            }),
        };
        if let Err(error) = result {
            log::error!(
                "failed to restore instruction file {}: {error}",
                self.path.display()
            );
        }
    }
}

/// Where a provider's instruction file lives, so `launch_agent_direct` can
/// snapshot/restore it. Out of scope providers (synthetic) never carry one.
fn instructions_path_for(kind: AgentKind) -> Option<PathBuf> {
    match kind {
        AgentKind::Claude => Some(PathBuf::from("CLAUDE.md")),
        AgentKind::Gemini => Some(PathBuf::from("GEMINI.md")),
        AgentKind::Synthetic => None,
    }
}

pub struct Orchestration {
    store: Arc<Database>,
    streaming: Arc<StreamingService>,
    queue: Arc<LaunchQueue>,
    runners: HashMap<AgentKind, Arc<dyn Runner>>,
}

impl Orchestration {
    pub fn new(store: Arc<Database>, streaming: Arc<StreamingService>, queue: Arc<LaunchQueue>) -> Self {
        let mut runners: HashMap<AgentKind, Arc<dyn Runner>> = HashMap::new();
        for kind in [AgentKind::Claude, AgentKind::Gemini, AgentKind::Synthetic] {
            let runner =
                create_runner(kind).expect("every known provider kind constructs its runner");
            runners.insert(kind, runner);
        }
        Self {
            store,
            streaming,
            queue,
            runners,
        }
    }

    /// The same Runner instance is handed out for every launch/terminate of a
    /// given kind, so a later `terminate_agent` finds the session a prior
    /// `launch_agent_direct` registered instead of an empty, freshly-built one.
    fn runner_for(&self, kind: AgentKind) -> Arc<dyn Runner> {
        self.runners
            .get(&kind)
            .cloned()
            .expect("runners map is pre-populated for every AgentKind variant")
    }

    /// The head-of-queue action (§4.8). Submitted to the Launch Queue so at
    /// most one launch sequence runs at a time; the queue's `()` result is
    /// bridged back to this call's `Result<Agent, _>` via a shared slot.
    pub async fn launch_agent_direct(
        self: &Arc<Self>,
        request: LaunchRequest,
    ) -> Result<Agent, OrchestrationError> {
        let orchestration = Arc::clone(self);
        let slot = Arc::new(Mutex::new(None));
        let slot_for_job = Arc::clone(&slot);

        let job = self.queue.enqueue(move || {
            let outcome = orchestration.run_launch_sequence(request);
            *slot_for_job.lock().expect("result slot mutex poisoned") = Some(outcome);
        });
        job.wait().await?;

        let agent = slot
            .lock()
            .expect("result slot mutex poisoned")
            .take()
            .expect("launch job always populates its result slot before replying")?;

        if let Some(timeout_secs) = agent.configuration.timeout {
            let watchdog = Arc::clone(self);
            let agent_id = agent.id.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_secs(timeout_secs));
                if let Err(error) = watchdog.terminate_agent(&agent_id) {
                    log::warn!("timeout watchdog failed to terminate {agent_id}: {error}");
                }
            });
        }

        Ok(agent)
    }

    /// Steps 1-6 of the launch sequence (§4.8). Runs inside the Launch
    /// Queue's blocking worker, never called directly.
    fn run_launch_sequence(&self, request: LaunchRequest) -> Result<Agent, OrchestrationError> {
        let _guard = if let Some(instructions) = &request.configuration.instructions {
            match instructions_path_for(request.kind) {
                Some(path) => Some(
                    InstructionGuard::replace(path, instructions)
                        .map_err(|e| OrchestrationError::Runner(crate::error::RunnerError::Other(e.to_string())))?,
                ),
                None => None,
            }
        } else {
            None
        };

        // Step 2: I1 requires the agent exist, in `initializing`, before any
        // message referencing it is written.
        let agent = Agent::new(request.kind, request.prompt.clone(), request.configuration);
        self.store.save_agent(&agent)?;
        self.streaming.broadcast_created(&agent);

        // Step 3: log-and-continue, never abort the launch for this failure.
        if let Err(error) = self.store.save_message(NewMessage {
            agent_id: agent.id.clone(),
            kind: MessageKind::User,
            role: Some("user".to_string()),
            content: agent.prompt.clone(),
            raw: None,
            metadata: None,
        }) {
            log::warn!("failed to persist prompt message for {}: {error}", agent.id);
        }

        // Step 4.
        let runner = self.runner_for(agent.kind);
        runner.subscribe(&agent.id, self.streaming.clone() as Arc<dyn Observer>);
        runner.start(LaunchSession {
            agent: agent.clone(),
        })?;

        // Step 5.
        let mut running = agent;
        running.status = AgentStatus::Running;
        running.started_at = Some(chrono::Utc::now());
        self.store.save_agent(&running)?;

        // Step 6: `_guard` drops here, restoring the instruction file.
        Ok(running)
    }

    pub fn terminate_agent(&self, agent_id: &str) -> Result<(), OrchestrationError> {
        let agent = self
            .store
            .find_agent_by_id(agent_id)?
            .ok_or_else(|| OrchestrationError::Store(crate::error::StoreError::NotFound(agent_id.to_string())))?;

        let runner = self.runner_for(agent.kind);
        runner.stop(agent_id)?;
        self.streaming
            .on_status_change(agent_id, AgentStatus::Terminated.as_str());
        Ok(())
    }

    pub fn list_active_agents(&self) -> Result<Vec<Agent>, OrchestrationError> {
        Ok(self.store.find_agents_by_status(AgentStatus::Running)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::LoggingGateway;
    use tempfile::tempdir;

    fn setup() -> (Arc<Orchestration>, Arc<Database>) {
        let store = Arc::new(Database::new(":memory:").unwrap());
        let streaming = Arc::new(StreamingService::new(store.clone(), Arc::new(LoggingGateway)));
        let queue = Arc::new(LaunchQueue::new());
        (
            Arc::new(Orchestration::new(store.clone(), streaming, queue)),
            store,
        )
    }

    #[tokio::test]
    async fn launching_a_synthetic_agent_creates_it_running_with_prompt_persisted() {
        let (orchestration, store) = setup();
        let mut config = Configuration::default();
        config.metadata = Some(serde_json::json!({"schedule": []}));
        let agent = orchestration
            .launch_agent_direct(LaunchRequest {
                kind: AgentKind::Synthetic,
                prompt: "do the thing".to_string(),
                configuration: config,
            })
            .await
            .expect("launch should succeed");

        assert_eq!(agent.status, AgentStatus::Running);
        assert!(agent.started_at.is_some());

        let messages = store.find_by_agent_id(&agent.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "do the thing");
        assert_eq!(messages[0].sequence_number, 1);
    }

    #[tokio::test]
    async fn terminate_agent_transitions_to_terminated() {
        let (orchestration, store) = setup();
        let mut config = Configuration::default();
        config.metadata = Some(serde_json::json!({"schedule": []}));
        let agent = orchestration
            .launch_agent_direct(LaunchRequest {
                kind: AgentKind::Synthetic,
                prompt: "hi".to_string(),
                configuration: config,
            })
            .await
            .unwrap();

        orchestration.terminate_agent(&agent.id).unwrap();
        let reloaded = store.find_agent_by_id(&agent.id).unwrap().unwrap();
        assert_eq!(reloaded.status, AgentStatus::Terminated);
    }

    #[test]
    fn instruction_guard_restores_original_content_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CLAUDE.md");
        fs::write(&path, "original instructions").unwrap();

        let guard = InstructionGuard::replace(path.clone(), "scoped override").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "scoped override");
        drop(guard);
        assert_eq!(fs::read_to_string(&path).unwrap(), "original instructions");
    }

    #[test]
    fn instruction_guard_removes_file_that_did_not_exist_before() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("CLAUDE.md");

        let guard = InstructionGuard::replace(path.clone(), "scoped override").unwrap();
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn list_active_agents_filters_by_running_status() {
        let (orchestration, store) = setup();
        let mut config = Configuration::default();
        config.metadata = Some(serde_json::json!({"schedule": []}));
        let running = orchestration
            .launch_agent_direct(LaunchRequest {
                kind: AgentKind::Synthetic,
                prompt: "hi".to_string(),
                configuration: config,
            })
            .await
            .unwrap();

        let mut other = Agent::new(AgentKind::Synthetic, "idle", Configuration::default());
        other.status = AgentStatus::Completed;
        store.save_agent(&other).unwrap();

        let active = orchestration.list_active_agents().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, running.id);
    }

    #[tokio::test]
    async fn concurrent_launches_are_serialized_through_the_queue() {
        let (orchestration, _store) = setup();
        let mut config = Configuration::default();
        config.metadata = Some(serde_json::json!({"schedule": []}));

        let mut handles = Vec::new();
        for i in 0..4 {
            let orchestration = Arc::clone(&orchestration);
            let mut config = config.clone();
            config.conversation_name = Some(format!("job-{i}"));
            handles.push(tokio::spawn(async move {
                orchestration
                    .launch_agent_direct(LaunchRequest {
                        kind: AgentKind::Synthetic,
                        prompt: format!("job {i}"),
                        configuration: config,
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().id);
        }
        assert_eq!(ids.len(), 4);
    }
}
