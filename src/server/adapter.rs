//! Stdio-to-socket adapter processes, one per provider.
//!
//! Each adapter bridges a provider's stdio protocol to `localhost:<port>`.
//! The adapter is spawned with the provider's startup command and then
//! watched by a monitor task:
//! - Starting -> Ready once the port accepts a TCP connection;
//! - Starting -> Failed when the readiness timeout passes first (child killed);
//! - any -> Exited when the process ends or the relay is cancelled.
//! Adapters are never restarted.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{RelaySettings, resolve_env_value};
use crate::error::RelayError;
use crate::lockfile::ResolvedProvider;
use crate::process::{OutputStream, Step, forward_output};
use crate::server::AdapterHandle;
use crate::server::health::{AdapterState, PROBE_INTERVAL, StderrBuffer, probe_port};

/// Number of stderr lines kept per adapter.
pub const STDERR_TAIL_LINES: usize = 100;

/// Quote a word for a POSIX shell. Nothing inside single quotes is expanded.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// The command line the adapter runs for a provider:
/// `K='v' ... 'pnpm' --dir '<directory>' start`.
pub fn startup_command(env: &BTreeMap<String, String>, pnpm: &Path, directory: &Path) -> String {
    let mut parts: Vec<String> = env
        .iter()
        .map(|(key, value)| format!("{}={}", key, shell_quote(&resolve_env_value(value))))
        .collect();
    parts.push(shell_quote(&pnpm.display().to_string()));
    parts.push("--dir".to_string());
    parts.push(shell_quote(&directory.display().to_string()));
    parts.push("start".to_string());
    parts.join(" ")
}

fn spawn_adapter_child(
    settings: &RelaySettings,
    provider: &str,
    command: &str,
    port: u16,
) -> crate::Result<Child> {
    let mut cmd = Command::new(&settings.adapter_program);
    cmd.arg("--stdio")
        .arg(command)
        .arg("--port")
        .arg(port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn().map_err(|e| {
        RelayError::SpawnFailed(
            provider.to_string(),
            Step::Adapter,
            format!("{}: {}", settings.adapter_program.display(), e),
        )
    })
}

/// Spawn the adapter for one resolved provider and start its monitor.
///
/// Returns as soon as the process is spawned; readiness is reported through
/// the handle's state channel.
pub fn spawn_adapter(
    provider: &ResolvedProvider,
    port: u16,
    settings: &RelaySettings,
    cancel: CancellationToken,
) -> crate::Result<AdapterHandle> {
    let specifier = provider.record.specifier.clone();
    let command = startup_command(&provider.record.env, &settings.pnpm_program, &provider.directory);

    tracing::info!(
        provider = %specifier,
        port = port,
        directory = %provider.directory.display(),
        "spawning adapter"
    );
    tracing::debug!(provider = %specifier, command = %command, "adapter startup command");

    let mut child = spawn_adapter_child(settings, &specifier, &command, port)?;

    let stderr = Arc::new(Mutex::new(StderrBuffer::new(STDERR_TAIL_LINES)));
    if let Some(out) = child.stdout.take() {
        forward_output(out, OutputStream::Stdout, specifier.clone(), None);
    }
    if let Some(err) = child.stderr.take() {
        forward_output(err, OutputStream::Stderr, specifier.clone(), Some(stderr.clone()));
    }

    let initial = if settings.readiness_timeout.is_zero() {
        AdapterState::Ready
    } else {
        AdapterState::Starting
    };
    let (state_tx, state_rx) = watch::channel(initial);

    tokio::spawn(monitor_adapter(
        child,
        specifier.clone(),
        port,
        settings.readiness_timeout,
        state_tx,
        stderr.clone(),
        cancel,
    ));

    Ok(AdapterHandle {
        reference: provider.record.reference(),
        specifier,
        port,
        state_rx,
        stderr,
    })
}

async fn monitor_adapter(
    mut child: Child,
    provider: String,
    port: u16,
    readiness_timeout: Duration,
    state_tx: watch::Sender<AdapterState>,
    stderr: Arc<Mutex<StderrBuffer>>,
    cancel: CancellationToken,
) {
    let deadline = Instant::now() + readiness_timeout;
    let mut probe = tokio::time::interval(PROBE_INTERVAL);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let starting = *state_tx.borrow() == AdapterState::Starting;
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => tracing::warn!(
                        provider = %provider,
                        port = port,
                        code = ?status.code(),
                        "adapter exited"
                    ),
                    Err(e) => tracing::warn!(
                        provider = %provider,
                        error = %e,
                        "failed to wait on adapter"
                    ),
                }
                if starting {
                    let tail = stderr.lock().await.joined();
                    tracing::error!(
                        provider = %provider,
                        stderr = %tail,
                        "adapter exited before becoming ready"
                    );
                }
                state_tx.send_replace(AdapterState::Exited);
                return;
            }
            _ = cancel.cancelled() => {
                tracing::info!(provider = %provider, "cancellation received, stopping adapter");
                let _ = child.kill().await;
                state_tx.send_replace(AdapterState::Exited);
                return;
            }
            _ = probe.tick(), if starting => {
                if probe_port(port).await {
                    tracing::info!(provider = %provider, port = port, "adapter ready");
                    state_tx.send_replace(AdapterState::Ready);
                } else if Instant::now() >= deadline {
                    let tail = stderr.lock().await.joined();
                    tracing::error!(
                        provider = %provider,
                        port = port,
                        timeout_ms = readiness_timeout.as_millis() as u64,
                        stderr = %tail,
                        "adapter did not become ready, killing it"
                    );
                    let _ = child.kill().await;
                    state_tx.send_replace(AdapterState::Failed);
                    return;
                }
            }
        }
    }
}
