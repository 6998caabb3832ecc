//! Child process supervisor.
//!
//! Runs the one-shot lifecycle of the child application: patch its source,
//! launch it in its own process group, relay its merged output and, when the
//! parent shuts down, terminate the whole group.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use portbridge_core::config::ChildConfig;

use super::patch::{PatchOutcome, PortPatch};
use super::relay::relay_lines;

/// Lifecycle of a supervised child, published over a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Patching,
    Launching,
    /// Child is running and its output is being relayed.
    Relaying { pid: Option<u32> },
    Exited(ExitReason),
}

/// Why the supervisor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The child could not be started.
    LaunchFailed(String),
    /// The child exited on its own; exit code if it had one.
    ChildExited(Option<i32>),
    /// The child's process group was terminated on shutdown.
    Terminated,
}

type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Supervisor for a single child process.
pub struct Supervisor {
    config: ChildConfig,
    /// Port handed to the child through `config.port_env`.
    target_port: u16,
    terminate_timeout: Duration,
    state_tx: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(config: ChildConfig, target_port: u16) -> Self {
        let terminate_timeout = Duration::from_secs(config.terminate_timeout_secs);
        let (state_tx, _) = watch::channel(SupervisorState::NotStarted);
        Self {
            config,
            target_port,
            terminate_timeout,
            state_tx,
        }
    }

    /// Subscribe to state changes. `Relaying` means the child is up.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Run the full lifecycle, relaying child output into `sink`.
    ///
    /// Never fails: patch and launch errors are logged and end the run.
    /// Setting `shutdown` to `true` terminates the child's process group.
    pub async fn run<W>(self, mut sink: W, mut shutdown: watch::Receiver<bool>) -> ExitReason
    where
        W: AsyncWrite + Unpin,
    {
        self.set_state(SupervisorState::Patching);
        self.patch().await;

        self.set_state(SupervisorState::Launching);
        info!(
            program = %self.config.program,
            args = ?self.config.args,
            port = self.target_port,
            "Starting child application"
        );
        let (mut child, output) = match self.launch() {
            Ok(launched) => launched,
            Err(e) => {
                error!(error = %e, "Failed to start child application");
                return self.finish(ExitReason::LaunchFailed(e.to_string()));
            }
        };
        let pid = child.id();
        info!(pid, "Child application started");
        self.set_state(SupervisorState::Relaying { pid });

        let relay = relay_lines(output, &mut sink);
        tokio::pin!(relay);

        tokio::select! {
            result = &mut relay => {
                match result {
                    Ok(lines) => debug!(pid, lines, "Child output closed"),
                    Err(e) => warn!(pid, error = %e, "Output relay failed"),
                }
            }
            () = wait_for_shutdown(&mut shutdown) => {
                self.terminate(&mut child).await;
                return self.finish(ExitReason::Terminated);
            }
        }

        // Output is closed, but the child may still be running.
        let reason = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => {
                    info!(pid, %status, "Child application exited");
                    ExitReason::ChildExited(status.code())
                }
                Err(e) => {
                    warn!(pid, error = %e, "Failed to wait for child application");
                    ExitReason::ChildExited(None)
                }
            },
            () = wait_for_shutdown(&mut shutdown) => {
                self.terminate(&mut child).await;
                ExitReason::Terminated
            }
        };
        self.finish(reason)
    }

    async fn patch(&self) {
        let patch_config = &self.config.patch;
        if !patch_config.enabled {
            debug!("Port patch disabled");
            return;
        }

        let path = self.config.patch_file();
        match PortPatch::from_config(patch_config).apply(&path).await {
            Ok(PatchOutcome::Applied { occurrences }) => {
                info!(path = %path.display(), occurrences, "Patched port assignment");
            }
            Ok(PatchOutcome::NotFound) => {
                info!(
                    path = %path.display(),
                    search = %patch_config.search,
                    "Port assignment literal not found, leaving file unchanged"
                );
            }
            Err(e) => warn!(error = %e, "Port patch failed, continuing with launch"),
        }
    }

    /// Spawn the child with stdout and stderr merged into one stream.
    fn launch(&self) -> Result<(Child, OutputStream), SupervisorError> {
        let spawn_failed = |source: std::io::Error| SupervisorError::SpawnFailed {
            program: self.config.program.clone(),
            source,
        };

        let mut std_cmd = std::process::Command::new(&self.config.program);
        std_cmd.args(&self.config.args).stdin(Stdio::null());
        if let Some(dir) = &self.config.working_dir {
            std_cmd.current_dir(dir);
        }
        if let Some(name) = self.config.port_env.as_deref().filter(|n| !n.is_empty()) {
            std_cmd.env(name, self.target_port.to_string());
        }
        // Child leads a new process group.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut std_cmd, 0);

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let output = merge_output(&mut cmd).map_err(spawn_failed)?;
        let mut child = cmd.spawn().map_err(spawn_failed)?;
        // `cmd` still holds the pipe's write ends; it drops on return so the
        // reader sees EOF once the child exits.
        let output = match output {
            Some(output) => output,
            None => child_stdout(&mut child).map_err(spawn_failed)?,
        };
        Ok((child, output))
    }

    /// Stop the child's process group: SIGTERM, then SIGKILL after the timeout.
    async fn terminate(&self, child: &mut Child) {
        let Some(pid) = child.id() else {
            debug!("Child already reaped");
            return;
        };
        info!(pid, "Terminating child process group");

        #[cfg(unix)]
        if let Err(e) = signal_group(pid, nix::sys::signal::Signal::SIGTERM) {
            warn!(pid, error = %e, "Failed to send SIGTERM");
        }
        #[cfg(not(unix))]
        if let Err(e) = child.start_kill() {
            warn!(pid, error = %e, "Failed to kill child");
        }

        match tokio::time::timeout(self.terminate_timeout, child.wait()).await {
            Ok(Ok(status)) => info!(pid, %status, "Child application stopped"),
            Ok(Err(e)) => {
                warn!(pid, error = %e, "Error waiting for child application");
                child.kill().await.ok();
            }
            Err(_) => {
                warn!(pid, "Timeout waiting for graceful shutdown, killing");
                #[cfg(unix)]
                if let Err(e) = signal_group(pid, nix::sys::signal::Signal::SIGKILL) {
                    warn!(pid, error = %e, "Failed to send SIGKILL");
                }
                child.kill().await.ok();
            }
        }
    }

    fn set_state(&self, state: SupervisorState) {
        debug!(?state, "Supervisor state");
        self.state_tx.send_replace(state);
    }

    fn finish(&self, reason: ExitReason) -> ExitReason {
        self.set_state(SupervisorState::Exited(reason.clone()));
        reason
    }
}

/// Resolve once `shutdown` turns `true`. A dropped sender never resolves.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Point stdout and stderr at the same pipe and return its read end.
#[cfg(unix)]
#[allow(clippy::unnecessary_wraps)]
fn merge_output(cmd: &mut Command) -> std::io::Result<Option<OutputStream>> {
    use std::os::fd::OwnedFd;
    use tokio::net::unix::pipe;

    let (reader, writer) = std::io::pipe()?;
    let writer_err = writer.try_clone()?;
    cmd.stdout(writer).stderr(writer_err);

    let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    Ok(Some(Box::new(receiver)))
}

/// Without fd-level merging, stderr goes straight to the parent's stderr.
#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn merge_output(cmd: &mut Command) -> std::io::Result<Option<OutputStream>> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::inherit());
    Ok(None)
}

fn child_stdout(child: &mut Child) -> std::io::Result<OutputStream> {
    child
        .stdout
        .take()
        .map(|stdout| Box::new(stdout) as OutputStream)
        .ok_or_else(|| std::io::Error::other("child stdout was not captured"))
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), SupervisorError> {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| SupervisorError::Signal {
        pid,
        reason: "pid out of range".to_string(),
    })?;
    match nix::sys::signal::killpg(Pid::from_raw(raw), signal) {
        // Group already gone.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(SupervisorError::Signal {
            pid,
            reason: e.to_string(),
        }),
    }
}

/// Errors from supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to patch {}: {source}", .path.display())]
    Patch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal process group {pid}: {reason}")]
    Signal { pid: u32, reason: String },
}
