//! Child process supervision
//!
//! At most one child runs at a time. Each incarnation gets a watcher task that
//! decodes stdout lines and reports exit, and a writer task that owns stdin.
//! Watchers never touch shared state themselves: they send `ChildEvent`s to a
//! single dispatch loop, which completes pending calls and retires the
//! incarnation when it exits.

use std::{
    collections::HashMap,
    process::{ExitStatus, Stdio},
    sync::{Arc, Weak},
    time::Duration,
};

use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot, Mutex, OnceCell},
};
use tracing::{debug, info, warn};

use crate::{
    correlator::{encode_notification, encode_request, PendingCalls, RequestIds},
    errors::RelayError,
    placeholder,
};

#[derive(Debug)]
enum ChildEvent {
    Message { generation: u64, message: Value },
    Exited { generation: u64, status: Option<ExitStatus> },
}

struct Incarnation {
    generation: u64,
    writer: mpsc::UnboundedSender<String>,
    pending: PendingCalls,
    handshake: Arc<OnceCell<()>>,
    kill: oneshot::Sender<()>,
}

#[derive(Default)]
struct SupervisorState {
    current: Option<Incarnation>,
    generation: u64,
    launch_error: Option<std::io::Error>,
    closed: bool,
}

/// The running incarnation as seen by a caller of [`Supervisor::ensure_running`].
#[derive(Clone)]
pub struct Incumbent {
    pub generation: u64,
    /// Completed once the child has been sent `initialize`.
    pub handshake: Arc<OnceCell<()>>,
}

pub struct Supervisor {
    template: String,
    call_timeout: Option<Duration>,
    ids: RequestIds,
    state: Arc<Mutex<SupervisorState>>,
    events: mpsc::UnboundedSender<ChildEvent>,
}

impl Supervisor {
    /// Must be called from within a Tokio runtime; starts the event dispatch loop.
    pub fn new(template: impl Into<String>, call_timeout: Option<Duration>) -> Self {
        let state = Arc::new(Mutex::new(SupervisorState::default()));
        let (events, receiver) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_events(Arc::downgrade(&state), receiver));

        Self {
            template: template.into(),
            call_timeout,
            ids: RequestIds::new(),
            state,
            events,
        }
    }

    /// Replaces any running child with a fresh one launched from the rendered
    /// template. Launch failures are reported by the next call.
    pub async fn spawn(&self, values: &HashMap<String, String>) {
        let command = placeholder::render(&self.template, values);
        let mut state = self.state.lock().await;
        self.spawn_locked(&mut state, &command);
    }

    pub async fn ensure_running(&self, values: &HashMap<String, String>) -> Option<Incumbent> {
        let mut state = self.state.lock().await;
        if state.current.is_none() {
            let command = placeholder::render(&self.template, values);
            self.spawn_locked(&mut state, &command);
        }

        state.current.as_ref().map(|incarnation| Incumbent {
            generation: incarnation.generation,
            handshake: incarnation.handshake.clone(),
        })
    }

    /// Terminates the running child, if any, failing its outstanding calls.
    pub async fn kill(&self) {
        let mut state = self.state.lock().await;
        retire(&mut state);
    }

    /// Kills the child and refuses any later spawn.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        retire(&mut state);
    }

    pub async fn call(&self, method: &str, params: Option<&Value>) -> Result<Value, RelayError> {
        self.call_in(None, method, params).await
    }

    /// Like [`Supervisor::call`], but fails instead of reaching a different
    /// incarnation than `generation`.
    pub async fn call_on(
        &self,
        generation: u64,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value, RelayError> {
        self.call_in(Some(generation), method, params).await
    }

    pub async fn notify_on(
        &self,
        generation: u64,
        method: &str,
        params: Option<&Value>,
    ) -> Result<(), RelayError> {
        let line = encode_notification(method, params)?;
        let state = self.state.lock().await;
        match state.current.as_ref() {
            Some(incarnation) if incarnation.generation == generation => incarnation
                .writer
                .send(line)
                .map_err(|_| RelayError::StdinClosed),
            Some(_) => Err(RelayError::ChildKilled),
            None => Err(RelayError::NotRunning),
        }
    }

    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.current.is_some()
    }

    pub async fn pending_count(&self) -> usize {
        self.state
            .lock()
            .await
            .current
            .as_ref()
            .map_or(0, |incarnation| incarnation.pending.len())
    }

    async fn call_in(
        &self,
        expected: Option<u64>,
        method: &str,
        params: Option<&Value>,
    ) -> Result<Value, RelayError> {
        let (generation, id, receiver) = {
            let mut state = self.state.lock().await;
            let launch_error = state.launch_error.take();
            let Some(incarnation) = state.current.as_mut() else {
                return Err(launch_error.map_or(RelayError::NotRunning, RelayError::Launch));
            };
            if expected.is_some_and(|generation| generation != incarnation.generation) {
                return Err(RelayError::ChildKilled);
            }

            // Id allocation and the enqueue onto the writer happen under the
            // state lock, so lines reach stdin in id order.
            let id = self.ids.next_id();
            let line = encode_request(id, method, params)?;
            let receiver = incarnation.pending.register(id);
            if incarnation.writer.send(line).is_err() {
                incarnation.pending.remove(id);
                return Err(RelayError::StdinClosed);
            }
            (incarnation.generation, id, receiver)
        };

        debug!(generation, id, method, "call sent to child");

        let outcome = match self.call_timeout {
            None => receiver.await,
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.forget(generation, id).await;
                    warn!(generation, id, method, "child call timed out");
                    return Err(RelayError::Timeout {
                        method: method.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
            },
        };

        outcome.unwrap_or(Err(RelayError::ChildKilled))
    }

    async fn forget(&self, generation: u64, id: u64) {
        let mut state = self.state.lock().await;
        if let Some(incarnation) = state.current.as_mut() {
            if incarnation.generation == generation {
                incarnation.pending.remove(id);
            }
        }
    }

    fn spawn_locked(&self, state: &mut SupervisorState, command: &str) {
        if state.closed {
            debug!("relay shutting down; not spawning a child");
            return;
        }
        retire(state);
        state.generation += 1;
        state.launch_error = None;
        let generation = state.generation;

        let launched = shell_command(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn();

        let mut child = match launched {
            Ok(child) => child,
            Err(err) => {
                warn!(
                    generation,
                    template = %self.template,
                    error = %err,
                    "failed to launch child"
                );
                state.launch_error = Some(err);
                return;
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            warn!(generation, "child launched without piped stdio");
            state.launch_error = Some(std::io::Error::other("child stdio was not piped"));
            return;
        };

        let pid = child.id();
        let (writer, lines) = mpsc::unbounded_channel();
        let (kill, killed) = oneshot::channel();
        tokio::spawn(write_lines(generation, stdin, lines));
        tokio::spawn(watch_child(
            generation,
            child,
            stdout,
            killed,
            self.events.clone(),
        ));

        info!(generation, pid = ?pid, template = %self.template, "child spawned");

        state.current = Some(Incarnation {
            generation,
            writer,
            pending: PendingCalls::new(),
            handshake: Arc::new(OnceCell::new()),
            kill,
        });
    }
}

fn retire(state: &mut SupervisorState) {
    let Some(incarnation) = state.current.take() else {
        return;
    };

    let Incarnation {
        generation,
        mut pending,
        kill,
        ..
    } = incarnation;

    // The kill is not awaited: the old process can still be exiting while its
    // successor starts, but its output is already ignored by generation. The
    // watcher may also be gone if the child is exiting on its own.
    let _ = kill.send(());
    pending.fail_all(|| RelayError::ChildKilled);
    info!(generation, "child killed");
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut shell = Command::new("sh");
    shell.arg("-c").arg(command);
    shell
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut shell = Command::new("cmd");
    shell.arg("/C").arg(command);
    shell
}

async fn write_lines(
    generation: u64,
    mut stdin: ChildStdin,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            warn!(generation, error = %err, "failed to write to child stdin");
            break;
        }
    }
}

async fn watch_child(
    generation: u64,
    mut child: Child,
    stdout: ChildStdout,
    mut killed: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ChildEvent>,
) {
    let mut segments = BufReader::new(stdout).split(b'\n');

    loop {
        tokio::select! {
            segment = segments.next_segment() => match segment {
                Ok(Some(bytes)) => {
                    if let Some(message) = decode_line(generation, &bytes) {
                        let _ = events.send(ChildEvent::Message { generation, message });
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(generation, error = %err, "failed to read child stdout");
                    break;
                }
            },
            _ = &mut killed => {
                terminate(generation, &mut child).await;
                return;
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status.ok(),
        _ = &mut killed => {
            terminate(generation, &mut child).await;
            return;
        }
    };

    let _ = events.send(ChildEvent::Exited { generation, status });
}

async fn terminate(generation: u64, child: &mut Child) {
    if let Err(err) = child.kill().await {
        debug!(generation, error = %err, "child already gone");
    }
}

fn decode_line(generation: u64, bytes: &[u8]) -> Option<Value> {
    let line = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    match serde_json::from_slice::<Value>(line) {
        Ok(message) if message.is_object() => Some(message),
        Ok(_) | Err(_) => {
            warn!(
                generation,
                line = %String::from_utf8_lossy(line),
                "discarding child output that is not a JSON-RPC object"
            );
            None
        }
    }
}

async fn dispatch_events(
    state: Weak<Mutex<SupervisorState>>,
    mut events: mpsc::UnboundedReceiver<ChildEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(state) = state.upgrade() else {
            break;
        };
        let mut state = state.lock().await;

        match event {
            ChildEvent::Message {
                generation,
                message,
            } => match state.current.as_mut() {
                Some(incarnation) if incarnation.generation == generation => {
                    incarnation.pending.on_child_message(message)
                }
                _ => debug!(generation, "dropping message from retired child"),
            },
            ChildEvent::Exited { generation, status } => {
                let is_current = state
                    .current
                    .as_ref()
                    .is_some_and(|incarnation| incarnation.generation == generation);
                if !is_current {
                    continue;
                }
                if let Some(mut incarnation) = state.current.take() {
                    incarnation.pending.fail_all(|| RelayError::ChildExited);
                }
                warn!(generation, status = ?status, "child exited");
            }
        }
    }
}
