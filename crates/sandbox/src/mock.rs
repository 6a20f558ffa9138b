//! Scripted container backend for tests.
//!
//! Keeps containers in memory, records every call, and lets tests script exec
//! output in the runtime's multiplexed frame format.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use code_play_core::{Error, Result};

use crate::demux::encode_frame;
use crate::engine::{
    ContainerBackend, ContainerHandle, ContainerInfo, ContainerSpec, ExecChunk, ExecSession,
    ShellSession, StreamChannel,
};

/// Backend operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Create,
    Start,
    Exec,
    Attach,
    Stop,
    Remove,
}

/// Scripted result of one exec call.
#[derive(Debug, Clone, Default)]
pub struct ExecScript {
    chunks: Vec<ExecChunk>,
    exit_code: Option<i64>,
    delay: Duration,
    stream_error: Option<String>,
}

impl ExecScript {
    /// Process writing `stdout` then `stderr` and exiting with `exit_code`.
    pub fn output(stdout: &str, stderr: &str, exit_code: i64) -> Self {
        let mut chunks = Vec::new();
        if !stdout.is_empty() {
            chunks.push(ExecChunk::Multiplexed(encode_frame(
                StreamChannel::Stdout,
                stdout.as_bytes(),
            )));
        }
        if !stderr.is_empty() {
            chunks.push(ExecChunk::Multiplexed(encode_frame(
                StreamChannel::Stderr,
                stderr.as_bytes(),
            )));
        }
        Self {
            chunks,
            exit_code: Some(exit_code),
            ..Default::default()
        }
    }

    /// Process whose output is the given raw transport chunks.
    pub fn raw(chunks: Vec<Bytes>, exit_code: Option<i64>) -> Self {
        Self {
            chunks: chunks.into_iter().map(ExecChunk::Multiplexed).collect(),
            exit_code,
            ..Default::default()
        }
    }

    /// Hold the output back for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// End the output stream with a transport error.
    pub fn with_stream_error(mut self, message: &str) -> Self {
        self.stream_error = Some(message.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct MockContainer {
    name: String,
    running: bool,
    labels: HashMap<String, String>,
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    scripts: VecDeque<ExecScript>,
    exit_codes: HashMap<String, Option<i64>>,
    failing: HashSet<MockOp>,
    delays: HashMap<MockOp, Duration>,
    calls: Vec<String>,
    next_id: u64,
}

/// In-memory backend with a call log and failure switches.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `op` fail.
    pub fn fail_on(&self, op: MockOp) {
        self.lock().failing.insert(op);
    }

    /// Let `op` succeed again.
    pub fn recover(&self, op: MockOp) {
        self.lock().failing.remove(&op);
    }

    /// Hold every subsequent call of `op` for `delay` before it takes effect.
    pub fn delay_on(&self, op: MockOp, delay: Duration) {
        self.lock().delays.insert(op, delay);
    }

    /// Queue the result of the next exec call.
    pub fn push_exec(&self, script: ExecScript) {
        self.lock().scripts.push_back(script);
    }

    /// Total number of backend calls made.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Call log, one `op:target` entry per call.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of containers that exist, running or not.
    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    pub fn is_running(&self, handle: &ContainerHandle) -> bool {
        self.lock()
            .containers
            .get(handle.as_str())
            .map(|c| c.running)
            .unwrap_or(false)
    }

    /// Flag a container as stopped, as if it exited on its own.
    pub fn kill(&self, handle: &ContainerHandle) {
        if let Some(container) = self.lock().containers.get_mut(handle.as_str()) {
            container.running = false;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Log the call, hold it for the configured delay, then apply the
    /// failure switch for `op`.
    async fn enter(&self, op: MockOp, target: &str) -> Result<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(format!("{:?}:{}", op, target).to_lowercase());
            state.delays.get(&op).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.lock().failing.contains(&op);
        if failing {
            return Err(Error::runtime(format!("mock {:?} failure", op)));
        }
        Ok(())
    }

    fn require(&self, handle: &ContainerHandle) -> Result<()> {
        if self.lock().containers.contains_key(handle.as_str()) {
            Ok(())
        } else {
            Err(Error::not_found(format!("container {}", handle.as_str())))
        }
    }
}

/// Output of an unscripted exec: `echo` is honoured, everything else is silent.
fn default_script(command: &str) -> ExecScript {
    match command.strip_prefix("echo ") {
        Some(text) => ExecScript::output(&format!("{}\n", text), "", 0),
        None => ExecScript::output("", "", 0),
    }
}

#[async_trait]
impl ContainerBackend for MockBackend {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.enter(MockOp::Create, &spec.name).await?;
        let mut state = self.lock();
        if state.containers.values().any(|c| c.name == spec.name) {
            return Err(Error::runtime(format!("name {} already in use", spec.name)));
        }
        state.next_id += 1;
        let id = format!("{:012x}{}", state.next_id, "f".repeat(52));
        state.containers.insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                running: false,
                labels: spec.labels.clone(),
            },
        );
        Ok(ContainerHandle(id))
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<()> {
        self.enter(MockOp::Start, handle.as_str()).await?;
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(handle.as_str())
            .ok_or_else(|| Error::not_found(format!("container {}", handle.as_str())))?;
        container.running = true;
        Ok(())
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        _shell: &str,
        command: &str,
        _cwd: &str,
    ) -> Result<ExecSession> {
        self.enter(MockOp::Exec, command).await?;
        self.require(handle)?;

        let script = {
            let mut state = self.lock();
            state.scripts.pop_front()
        }
        .unwrap_or_else(|| default_script(command));

        let exec_id = {
            let mut state = self.lock();
            state.next_id += 1;
            let exec_id = format!("exec-{}", state.next_id);
            state.exit_codes.insert(exec_id.clone(), script.exit_code);
            exec_id
        };

        let mut items: Vec<Result<ExecChunk>> = script.chunks.into_iter().map(Ok).collect();
        if let Some(message) = script.stream_error {
            items.push(Err(Error::runtime(message)));
        }
        let delay = script.delay;
        let output = stream::once(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            stream::iter(items)
        })
        .flatten()
        .boxed();

        Ok(ExecSession { exec_id, output })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        self.lock()
            .exit_codes
            .get(exec_id)
            .copied()
            .ok_or_else(|| Error::not_found(format!("exec {}", exec_id)))
    }

    /// Attaches an echo shell: input comes back as output, and a line
    /// containing `exit` ends the session.
    async fn attach_shell(
        &self,
        handle: &ContainerHandle,
        _shell: &str,
        _cwd: &str,
    ) -> Result<ShellSession> {
        self.enter(MockOp::Attach, handle.as_str()).await?;
        self.require(handle)?;

        let (input, mut stdin) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::channel::<Result<Bytes>>(16);

        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        let done = chunk.windows(4).any(|w| w == b"exit");
                        if tx.send(Ok(chunk)).await.is_err() || done {
                            break;
                        }
                    }
                }
            }
        });

        Ok(ShellSession {
            exec_id: format!("shell-{}", handle.as_str()),
            input: Box::pin(input),
            output: ReceiverStream::new(rx).boxed(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle, _grace: Duration) -> Result<()> {
        self.enter(MockOp::Stop, handle.as_str()).await?;
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(handle.as_str())
            .ok_or_else(|| Error::not_found(format!("container {}", handle.as_str())))?;
        container.running = false;
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle, _force: bool) -> Result<()> {
        self.enter(MockOp::Remove, handle.as_str()).await?;
        self.lock().containers.remove(handle.as_str());
        Ok(())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerInfo> {
        let state = self.lock();
        let container = state
            .containers
            .get(handle.as_str())
            .ok_or_else(|| Error::not_found(format!("container {}", handle.as_str())))?;
        Ok(ContainerInfo {
            handle: handle.clone(),
            name: container.name.clone(),
            running: container.running,
            labels: container.labels.clone(),
        })
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .lock()
            .containers
            .iter()
            .map(|(id, c)| ContainerInfo {
                handle: ContainerHandle(id.clone()),
                name: c.name.clone(),
                running: c.running,
                labels: c.labels.clone(),
            })
            .collect())
    }

    async fn ensure_network(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn ensure_image(&self, _reference: &str) -> Result<bool> {
        Ok(true)
    }

    async fn is_available(&self) -> bool {
        true
    }
}
