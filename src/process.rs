//! Process Manager (§4.3): spawns child processes, exposes a line-oriented
//! reader over stdout/stderr, and tears them down gracefully-then-forcefully.
//! Grounded on `agents/process.rs`'s session/thread conventions; adds the
//! bounded-wait grace period and a liveness probe the reference code lacked.

use crate::error::ProcessError;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const GRACE_PERIOD: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One line read from a child's stdout or stderr.
#[derive(Debug, Clone)]
pub struct Line {
    pub text: String,
    pub is_stderr: bool,
}

/// Terminal notification once the reader threads observe EOF and the child
/// has been reaped.
#[derive(Debug, Clone)]
pub struct ExitStatus {
    pub code: Option<i32>,
}

pub enum ProcessEvent {
    Line(Line),
    Exited(ExitStatus),
}

/// A spawned child plus the channel its reader threads publish lines and the
/// exit event to.
pub struct ManagedProcess {
    child: Arc<Mutex<Child>>,
    stdin_closed: Mutex<bool>,
}

impl ManagedProcess {
    /// Spawn `command` (optionally shell-interposed) with the given `cwd`
    /// and environment overlay, returning the process handle and a receiver
    /// that yields lines as they arrive followed by a final exit event.
    pub fn spawn(
        command: &str,
        args: &[String],
        cwd: Option<&str>,
        env: &HashMap<String, String>,
        use_shell: bool,
    ) -> Result<(Self, Receiver<ProcessEvent>), ProcessError> {
        let mut cmd = if use_shell {
            let mut shell_cmd = if cfg!(windows) {
                let mut c = Command::new("cmd");
                c.arg("/C");
                c
            } else {
                let mut c = Command::new("sh");
                c.arg("-lc");
                c
            };
            let full = if args.is_empty() {
                command.to_string()
            } else {
                format!("{command} {}", args.join(" "))
            };
            shell_cmd.arg(full);
            shell_cmd
        } else {
            let mut c = Command::new(command);
            c.args(args);
            c
        };

        if let Some(dir) = cwd {
            cmd.current_dir(shellexpand::tilde(dir).into_owned());
        }
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(e.to_string()))?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = mpsc::channel();
        spawn_reader(stdout, false, tx.clone());
        spawn_reader(stderr, true, tx.clone());

        let child = Arc::new(Mutex::new(child));
        spawn_waiter(Arc::clone(&child), tx);

        Ok((
            Self {
                child,
                stdin_closed: Mutex::new(false),
            },
            rx,
        ))
    }

    pub fn write_stdin(&self, text: &str) -> Result<(), ProcessError> {
        let closed = self.stdin_closed.lock().expect("mutex poisoned");
        if *closed {
            return Ok(());
        }
        let mut child = self.child.lock().expect("mutex poisoned");
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(text.as_bytes())?;
            stdin.write_all(b"\n")?;
            stdin.flush()?;
        }
        Ok(())
    }

    /// Zero-signal liveness probe (Unix). On platforms without `libc` this
    /// falls back to `try_wait`.
    pub fn is_running(&self) -> bool {
        let mut child = self.child.lock().expect("mutex poisoned");
        matches!(child.try_wait(), Ok(None))
    }

    /// Send a termination signal and wait up to the grace period; if the
    /// process is still alive, force-kill it. Double-close (calling this
    /// after the process already exited) is a no-op.
    pub fn terminate(&self) -> Result<(), ProcessError> {
        let mut child = self.child.lock().expect("mutex poisoned");

        if matches!(child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }

        #[cfg(unix)]
        {
            let pid = child.id() as i32;
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.kill();
        }

        let deadline = Instant::now() + GRACE_PERIOD;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    drop(child);
                    thread::sleep(POLL_INTERVAL);
                    child = self.child.lock().expect("mutex poisoned");
                }
                Err(e) => return Err(ProcessError::Io(e)),
            }
        }

        child.kill().ok();
        child.wait().ok();
        Ok(())
    }
}

/// Polls the child until it exits, then publishes the terminal event. Runs
/// for the life of the process; harmless to keep polling after the reader
/// threads have already drained stdout/stderr.
fn spawn_waiter(child: Arc<Mutex<Child>>, tx: Sender<ProcessEvent>) {
    thread::spawn(move || loop {
        let status = {
            let mut guard = child.lock().expect("mutex poisoned");
            guard.try_wait()
        };
        match status {
            Ok(Some(status)) => {
                let _ = tx.send(ProcessEvent::Exited(ExitStatus {
                    code: status.code(),
                }));
                return;
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(_) => return,
        }
    });
}

fn spawn_reader<R: std::io::Read + Send + 'static>(
    reader: R,
    is_stderr: bool,
    tx: Sender<ProcessEvent>,
) {
    thread::spawn(move || {
        let buffered = BufReader::new(reader);
        for line in buffered.lines() {
            match line {
                Ok(text) => {
                    if tx
                        .send(ProcessEvent::Line(Line { text, is_stderr }))
                        .is_err()
                    {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    });
}
