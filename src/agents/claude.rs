//! Claude-family Runner (§4.5, §6). Grounded on `agents/process.rs`'s
//! direct-spawn/session-registry pattern, not `agents/claude_code.rs`'s tmux
//! pane-scraping, which cannot express stream-json parsing.

use super::{LaunchSession, ObserverHandle, ObserverRegistry, Runner, RunOutcome, RunResult};
use crate::error::RunnerError;
use crate::models::McpServerConfig;
use crate::parsers::claude::{parse_line, ClaudeCompletion};
use crate::process::{ManagedProcess, ProcessEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

pub struct ClaudeRunner {
    registry: Arc<ObserverRegistry>,
    sessions: Mutex<HashMap<String, Arc<ManagedProcess>>>,
}

impl ClaudeRunner {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ObserverRegistry::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn build_args(session: &LaunchSession) -> Vec<String> {
        let config = &session.agent.configuration;
        let format = config
            .output_format
            .clone()
            .unwrap_or_else(|| "stream-json".to_string());

        let mut args = vec![
            "-p".to_string(),
            session.agent.prompt.clone(),
            "--output-format".to_string(),
            format,
            "--verbose".to_string(),
            "--include-partial-messages".to_string(),
        ];
        if !config.allowed_tools.is_empty() {
            args.push("--allowed-tools".to_string());
            args.push(config.allowed_tools.join(","));
        }
        if !config.disallowed_tools.is_empty() {
            args.push("--disallowed-tools".to_string());
            args.push(config.disallowed_tools.join(","));
        }
        if let Some(servers) = config.mcp.as_ref().filter(|s| !s.is_empty()) {
            match Self::write_mcp_config(&session.agent.id, servers) {
                Ok(path) => {
                    args.push("--mcp-config".to_string());
                    args.push(path);
                }
                Err(error) => {
                    log::warn!(
                        "failed to write mcp config for {}: {error}",
                        session.agent.id
                    );
                }
            }
        }
        args.extend(config.custom_args.iter().cloned());
        args
    }

    /// Serializes `configuration.mcp` (§3) into the JSON shape the CLI's
    /// `--mcp-config` flag expects and writes it to a per-agent temp file.
    fn write_mcp_config(agent_id: &str, servers: &[McpServerConfig]) -> std::io::Result<String> {
        let mut mcp_servers = serde_json::Map::new();
        for server in servers {
            mcp_servers.insert(
                server.name.clone(),
                serde_json::json!({
                    "command": server.command,
                    "args": server.args,
                    "env": server.env,
                    "transport": server.transport,
                }),
            );
        }
        let document = serde_json::json!({ "mcpServers": mcp_servers });
        let path = std::env::temp_dir().join(format!("agentctl-mcp-{agent_id}.json"));
        fs_write_json(&path, &document)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

fn fs_write_json(path: &std::path::Path, document: &serde_json::Value) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(document)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, bytes)
}

impl Runner for ClaudeRunner {
    fn start(&self, session: LaunchSession) -> Result<(), RunnerError> {
        let agent_id = session.agent.id.clone();
        let args = Self::build_args(&session);
        let cwd = session.agent.configuration.working_directory.clone();

        let (process, rx) = ManagedProcess::spawn(
            "claude",
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
            let mut saw_response = false;

            for event in rx {
                match event {
                    ProcessEvent::Line(line) => {
                        match parse_line(&line.text) {
                            Ok(None) => continue,
                            Ok(Some(parsed)) => {
                                message_count += 1;
                                if ClaudeCompletion::is_complete(&parsed) {
                                    saw_response = true;
                                }
                                registry.fan_out_message(&agent_id_for_thread, &parsed);
                            }
                            Err(error) => {
                                log::warn!(
                                    "claude parser skipped malformed frame for {agent_id_for_thread}: {error}"
                                );
                                continue;
                            }
                        }
                    }
                    ProcessEvent::Exited(status) => {
                        let duration_ms = started_at.elapsed().as_millis() as u64;
                        if status.code == Some(0) || saw_response {
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

impl Default for ClaudeRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Agent, AgentKind, Configuration};

    #[test]
    fn build_args_includes_tool_filters_and_custom_args() {
        let mut config = Configuration::default();
        config.allowed_tools = vec!["Bash".to_string(), "Read".to_string()];
        config.disallowed_tools = vec!["Write".to_string()];
        config.custom_args = vec!["--foo".to_string()];
        let agent = Agent::new(AgentKind::Claude, "do the thing", config);
        let args = ClaudeRunner::build_args(&LaunchSession { agent });

        assert!(args.contains(&"--allowed-tools".to_string()));
        assert!(args.contains(&"Bash,Read".to_string()));
        assert!(args.contains(&"--disallowed-tools".to_string()));
        assert!(args.contains(&"--foo".to_string()));
    }

    #[test]
    fn build_args_writes_mcp_config_and_adds_the_flag() {
        use crate::models::{McpServerConfig, McpTransport};

        let mut config = Configuration::default();
        config.mcp = Some(vec![McpServerConfig {
            name: "fs".to_string(),
            command: "mcp-server-fs".to_string(),
            args: vec!["--root".to_string(), "/tmp".to_string()],
            env: HashMap::new(),
            transport: McpTransport::Stdio,
        }]);
        let agent = Agent::new(AgentKind::Claude, "do the thing", config);
        let agent_id = agent.id.clone();
        let args = ClaudeRunner::build_args(&LaunchSession { agent });

        assert!(args.contains(&"--mcp-config".to_string()));
        let path = args
            .iter()
            .position(|a| a == "--mcp-config")
            .map(|i| args[i + 1].clone())
            .unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let document: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert!(document["mcpServers"]["fs"]["command"] == "mcp-server-fs");
        let _ = std::fs::remove_file(format!(
            "{}/agentctl-mcp-{agent_id}.json",
            std::env::temp_dir().display()
        ));
    }

    #[test]
    fn get_status_on_unknown_agent_fails_not_found() {
        let runner = ClaudeRunner::new();
        assert!(matches!(
            runner.get_status("never-started"),
            Err(RunnerError::NotFound(_))
        ));
    }
}
