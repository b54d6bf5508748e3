//! `run` subcommand
//!
//! Collects secrets, injects them into the environment, and executes the
//! given command. The child runs in its own process group and every
//! catchable signal except SIGCHLD is forwarded to that group, so
//! terminal-generated signals reach the whole child tree. The exit code
//! passes through.

use crate::secrets::Collector;
use anyhow::Context;
use std::collections::HashMap;
use tracing::debug;

pub async fn handle_run(
    collector: &Collector,
    provider_ids: &[String],
    reset: bool,
    command: &[String],
) -> anyhow::Result<()> {
    anyhow::ensure!(!command.is_empty(), "no command specified");

    let secrets = collector.collect(provider_ids).await?;

    let mut env: HashMap<String, String> =
        if reset { HashMap::new() } else { std::env::vars().collect() };
    env.extend(secrets);

    let (program, args) = command.split_first().expect("command is non-empty");

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).env_clear().envs(&env);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child =
        cmd.spawn().with_context(|| format!("failed to start command '{}'", program))?;

    #[cfg(unix)]
    let forwarder = child.id().map(spawn_signal_forwarder);

    let status = child.wait().await.context("failed to wait for command")?;

    #[cfg(unix)]
    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }

    std::process::exit(exit_code(&status));
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Forward every catchable signal to the child's process group, falling
/// back to the process itself when the group kill fails. SIGCHLD stays with
/// the parent.
#[cfg(unix)]
fn spawn_signal_forwarder(child_pid: u32) -> tokio::task::JoinHandle<()> {
    use nix::sys::signal::Signal;
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut streams = Vec::new();
        for sig in Signal::iterator() {
            // SIGKILL and SIGSTOP cannot be caught; SIGCHLD is
            // informational for the parent about the child itself.
            if matches!(sig, Signal::SIGKILL | Signal::SIGSTOP | Signal::SIGCHLD) {
                continue;
            }
            let kind = SignalKind::from_raw(sig as i32);
            match signal(kind) {
                Ok(stream) => streams.push((kind, stream)),
                Err(e) => debug!(signal = %sig, error = %e, "Cannot listen for signal"),
            }
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for (kind, mut stream) in streams {
            let tx = tx.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx.send(kind).is_err() {
                        return;
                    }
                }
            });
        }

        while let Some(kind) = rx.recv().await {
            forward_signal(child_pid, kind.as_raw_value());
        }
    })
}

#[cfg(unix)]
fn forward_signal(child_pid: u32, raw_signal: i32) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let Ok(signal) = Signal::try_from(raw_signal) else {
        return;
    };

    let pid = Pid::from_raw(child_pid as i32);
    // Group first; direct kill as fallback for a child that left its group.
    if killpg(pid, signal).is_err() {
        let _ = kill(pid, signal);
    }
}
