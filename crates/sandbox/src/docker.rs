//! Docker implementation of the container backend, using `bollard`.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

use code_play_core::{Error, Result};

use crate::engine::{
    ContainerBackend, ContainerHandle, ContainerInfo, ContainerSpec, ExecChunk, ExecSession,
    ShellSession, StreamChannel, CPU_PERIOD_MICROS, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
};

/// Seconds to wait for the daemon on each request.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Docker-based container backend.
///
/// Containers are created with:
/// - Mandatory memory (no swap) and CPU limits
/// - The internal bridge network only
/// - An idle entry command, so exec/attach always have a live target
pub struct DockerBackend {
    docker: bollard::Docker,
    /// Grace period for the stop attempt that precedes a remove.
    remove_grace: Duration,
    /// Hard limit on one-shot exec processes, enforced inside the container.
    exec_limit: Option<Duration>,
}

impl DockerBackend {
    /// Connect to the Docker daemon, over `socket_path` or the local defaults.
    pub fn connect(socket_path: Option<&str>, remove_grace: Duration) -> Result<Self> {
        let docker = match socket_path {
            Some(path) => bollard::Docker::connect_with_socket(
                path,
                CLIENT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            None => bollard::Docker::connect_with_local_defaults(),
        }
        .map_err(|e| {
            Error::runtime(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;

        Ok(Self {
            docker,
            remove_grace,
            exec_limit: None,
        })
    }

    /// Create from an existing bollard Docker client.
    pub fn from_client(docker: bollard::Docker, remove_grace: Duration) -> Self {
        Self {
            docker,
            remove_grace,
            exec_limit: None,
        }
    }

    /// Kill one-shot exec processes that outlive `limit`.
    ///
    /// The caller giving up on an exec does not end the process inside the
    /// container; this does.
    pub fn with_exec_timeout(mut self, limit: Duration) -> Self {
        self.exec_limit = Some(limit);
        self
    }
}

/// Argument vector for a one-shot exec, wrapped in `timeout` when limited.
fn exec_command(shell: &str, command: &str, limit: Option<Duration>) -> Vec<String> {
    let mut argv = Vec::with_capacity(7);
    if let Some(limit) = limit {
        // Whole seconds, rounded up, never zero
        let secs = (limit.as_secs() + u64::from(limit.subsec_nanos() > 0)).max(1);
        argv.extend([
            "timeout".to_string(),
            "-s".to_string(),
            "KILL".to_string(),
            secs.to_string(),
        ]);
    }
    argv.extend([shell.to_string(), "-c".to_string(), command.to_string()]);
    argv
}

/// Map a daemon error, keeping "no such object" distinct from other failures.
fn runtime_error(action: &str, target: &str, err: bollard::errors::Error) -> Error {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => Error::not_found(format!("{} ({})", target, message)),
        other => Error::runtime(format!("Failed to {} {}: {}", action, target, other)),
    }
}

/// Map an error from an attached exec stream.
///
/// bollard demultiplexes the stream itself, so a malformed frame surfaces here
/// as a decode error rather than in [`crate::demux::FrameDecoder`].
fn exec_stream_error(err: bollard::errors::Error) -> Error {
    use bollard::errors::Error as Bollard;

    match err {
        Bollard::IOError { err } if err.kind() == std::io::ErrorKind::InvalidData => {
            Error::protocol(format!("Malformed exec stream: {}", err))
        }
        err @ (Bollard::JsonDataError { .. }
        | Bollard::JsonSerdeError { .. }
        | Bollard::StrParseError { .. }) => {
            Error::protocol(format!("Malformed exec stream: {}", err))
        }
        other => Error::runtime(format!("Exec stream failed: {}", other)),
    }
}

fn is_status(err: &bollard::errors::Error, code: u16) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let host_config = HostConfig {
            memory: Some(spec.limits.memory_bytes),
            // Same as memory: no swap on top of the limit
            memory_swap: Some(spec.limits.memory_bytes),
            cpu_quota: Some(spec.limits.cpu_quota()),
            cpu_period: Some(CPU_PERIOD_MICROS),
            network_mode: Some(spec.network.clone()),
            auto_remove: Some(false),
            ..Default::default()
        };

        let mut labels = spec.labels.clone();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());

        let container_config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(spec.workdir.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| runtime_error("create", &spec.name, e))?;

        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, warning = %warning, "Docker create warning");
        }

        tracing::info!(
            container = %spec.name,
            container_id = %response.id,
            image = %spec.image,
            "Sandbox container created"
        );
        Ok(ContainerHandle(response.id))
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<()> {
        self.docker
            .start_container::<String>(handle.as_str(), None)
            .await
            .map_err(|e| runtime_error("start container", handle.as_str(), e))?;

        tracing::info!(container_id = %handle, "Sandbox container started");
        Ok(())
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        shell: &str,
        command: &str,
        cwd: &str,
    ) -> Result<ExecSession> {
        let exec_options = CreateExecOptions {
            cmd: Some(exec_command(shell, command, self.exec_limit)),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(cwd.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(handle.as_str(), exec_options)
            .await
            .map_err(|e| runtime_error("create exec in", handle.as_str(), e))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| runtime_error("start exec in", handle.as_str(), e))?;

        let StartExecResults::Attached { output, .. } = started else {
            return Err(Error::runtime("Exec was detached unexpectedly"));
        };

        let output = output
            .filter_map(|msg| async move {
                match msg {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(ExecChunk::Output(StreamChannel::Stdout, message)))
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        Some(Ok(ExecChunk::Output(StreamChannel::Stderr, message)))
                    }
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(exec_stream_error(e))),
                }
            })
            .boxed();

        Ok(ExecSession {
            exec_id: exec.id,
            output,
        })
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<Option<i64>> {
        let inspect = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(|e| runtime_error("inspect exec", exec_id, e))?;

        if inspect.running == Some(true) {
            return Ok(None);
        }
        Ok(inspect.exit_code)
    }

    async fn attach_shell(
        &self,
        handle: &ContainerHandle,
        shell: &str,
        cwd: &str,
    ) -> Result<ShellSession> {
        let exec_options = CreateExecOptions {
            cmd: Some(vec![shell.to_string()]),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            env: Some(vec!["TERM=xterm-256color".to_string()]),
            working_dir: Some(cwd.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(handle.as_str(), exec_options)
            .await
            .map_err(|e| runtime_error("create shell in", handle.as_str(), e))?;

        let started = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: true,
                    output_capacity: None,
                }),
            )
            .await
            .map_err(|e| runtime_error("attach shell in", handle.as_str(), e))?;

        let StartExecResults::Attached { output, input } = started else {
            return Err(Error::runtime("Shell exec was detached unexpectedly"));
        };

        let output = output
            .filter_map(|msg| async move {
                match msg {
                    Ok(LogOutput::StdIn { .. }) => None,
                    Ok(log) => Some(Ok(log.into_bytes())),
                    Err(e) => Some(Err(Error::runtime(format!("Shell stream failed: {}", e)))),
                }
            })
            .boxed();

        tracing::debug!(container_id = %handle, exec_id = %exec.id, "Shell attached");
        Ok(ShellSession {
            exec_id: exec.id,
            input,
            output,
        })
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self
            .docker
            .stop_container(handle.as_str(), Some(options))
            .await
        {
            Ok(()) => {
                tracing::info!(container_id = %handle, "Sandbox container stopped");
                Ok(())
            }
            // 304: already stopped
            Err(e) if is_status(&e, 304) => {
                tracing::debug!(container_id = %handle, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(runtime_error("stop container", handle.as_str(), e)),
        }
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<()> {
        if let Err(e) = self.stop(handle, self.remove_grace).await {
            tracing::debug!(container_id = %handle, error = %e, "Stop before remove failed, continuing");
        }

        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self
            .docker
            .remove_container(handle.as_str(), Some(options))
            .await
        {
            Ok(()) => {
                tracing::info!(container_id = %handle, "Sandbox container removed");
                Ok(())
            }
            Err(e) if is_status(&e, 404) => {
                tracing::debug!(container_id = %handle, "Container already removed");
                Ok(())
            }
            Err(e) => Err(runtime_error("remove container", handle.as_str(), e)),
        }
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerInfo> {
        let inspect = self
            .docker
            .inspect_container(handle.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| runtime_error("inspect container", handle.as_str(), e))?;

        Ok(ContainerInfo {
            handle: ContainerHandle(inspect.id.unwrap_or_else(|| handle.0.clone())),
            name: inspect
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            running: inspect
                .state
                .and_then(|state| state.running)
                .unwrap_or(false),
            labels: inspect
                .config
                .and_then(|config| config.labels)
                .unwrap_or_default(),
        })
    }

    async fn list(&self) -> Result<Vec<ContainerInfo>> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE)],
        )]);
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::runtime(format!("Failed to list containers: {}", e)))?;

        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                Some(ContainerInfo {
                    handle: ContainerHandle(id),
                    name: summary
                        .names
                        .and_then(|names| names.into_iter().next())
                        .unwrap_or_default()
                        .trim_start_matches('/')
                        .to_string(),
                    running: summary.state.as_deref() == Some("running"),
                    labels: summary.labels.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        let filters = HashMap::from([("name".to_string(), vec![name.to_string()])]);
        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(|e| Error::runtime(format!("Failed to list networks: {}", e)))?;

        // The name filter matches substrings
        if networks.iter().any(|n| n.name.as_deref() == Some(name)) {
            tracing::debug!(network = %name, "Docker network present");
            return Ok(());
        }

        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::runtime(format!("Failed to create network {}: {}", name, e)))?;

        tracing::info!(network = %name, "Docker network created");
        Ok(())
    }

    async fn ensure_image(&self, reference: &str) -> Result<bool> {
        match self.docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(Error::runtime(format!(
                "Failed to inspect image {}: {}",
                reference, e
            ))),
        }
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_command_without_limit() {
        assert_eq!(
            exec_command("/bin/sh", "echo hi", None),
            vec!["/bin/sh", "-c", "echo hi"]
        );
    }

    #[test]
    fn test_exec_command_is_killed_at_limit() {
        assert_eq!(
            exec_command("/bin/sh", "while :; do :; done", Some(Duration::from_secs(30))),
            vec!["timeout", "-s", "KILL", "30", "/bin/sh", "-c", "while :; do :; done"]
        );
        assert_eq!(
            exec_command("/bin/sh", "ls", Some(Duration::from_millis(1500)))[3],
            "2"
        );
        assert_eq!(
            exec_command("/bin/sh", "ls", Some(Duration::from_millis(10)))[3],
            "1"
        );
    }

    #[test]
    fn test_invalid_stream_data_is_protocol_error() {
        let err = bollard::errors::Error::from(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "bad frame header",
        ));
        assert!(matches!(exec_stream_error(err), Error::Protocol(_)));
    }

    #[test]
    fn test_dropped_stream_is_runtime_error() {
        let err = bollard::errors::Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        assert!(matches!(exec_stream_error(err), Error::Runtime(_)));
    }
}
