//! Launching the supervised session: pty allocation and child spawning.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::errno::Errno;
use nix::pty::{openpty, Winsize};
use nix::sys::termios::{tcgetattr, Termios};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::supervisor::session::{PtyEndpoint, Session};

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cannot query the controlling terminal size: {0}")]
    TerminalQuery(#[source] io::Error),

    #[error("failed to allocate a pseudo-terminal: {0}")]
    OpenPty(#[source] Errno),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: io::Error,
    },
}

/// Current dimensions of the controlling terminal.
///
/// Unlike attribute capture, failing here is fatal: without a terminal
/// there is no session to supervise.
pub fn query_window() -> Result<Winsize, SetupError> {
    let (cols, rows) = crossterm::terminal::size().map_err(SetupError::TerminalQuery)?;
    Ok(Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    })
}

/// Spawn the shell (and, when configured, the analyzer) each in its own
/// pty sized and configured like the controlling terminal.
///
/// If the analyzer fails to spawn, the shell endpoint is dropped on the way
/// out, which closes its pty pair and reaps the child.
pub fn launch(config: &Config, window: Winsize) -> Result<Session, SetupError> {
    // Attribute capture is best-effort: children fall back to the pty
    // driver's defaults when the controlling terminal won't reveal them.
    let attrs = match tcgetattr(io::stdin()) {
        Ok(attrs) => Some(attrs),
        Err(err) => {
            warn!(error = %err, "cannot read terminal attributes, children get pty defaults");
            None
        }
    };

    let shell = config.resolve_shell();
    let shell_endpoint = spawn_in_pty(&shell, &[], &window, attrs.as_ref(), &[])?;
    info!(command = %shell, pid = shell_endpoint.pid(), "shell started");

    let analyzer = match &config.analyzer.command {
        Some(command) => {
            let endpoint = spawn_in_pty(
                &shell,
                &["-c", command],
                &window,
                attrs.as_ref(),
                // The analyzer must not hold the shell's master open
                &[shell_endpoint.master_raw_fd()],
            )?;
            info!(command = %command, pid = endpoint.pid(), "analyzer started");
            Some(endpoint)
        }
        None => None,
    };

    Ok(Session {
        shell: shell_endpoint,
        analyzer,
    })
}

/// Allocate a pty pair and spawn `program` on the slave side as the leader
/// of a new session, with the slave as its controlling terminal and stdio.
/// The parent keeps only the master.
fn spawn_in_pty(
    program: &str,
    args: &[&str],
    window: &Winsize,
    attrs: Option<&Termios>,
    close_in_child: &[RawFd],
) -> Result<PtyEndpoint, SetupError> {
    let pty = openpty(window, attrs).map_err(SetupError::OpenPty)?;
    let slave_fd = pty.slave.as_raw_fd();
    let master_fd = pty.master.as_raw_fd();
    let extra: Vec<RawFd> = close_in_child.to_vec();

    // SAFETY: the pre_exec closure runs in the child between fork() and
    // exec(); everything it calls (setsid, ioctl, dup2, close) is
    // async-signal-safe, and the captured descriptors are plain integers
    // copied before the fork.
    let child = unsafe {
        Command::new(program)
            .args(args)
            .pre_exec(move || {
                // New session, with the slave as controlling terminal
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(slave_fd, libc::TIOCSCTTY as libc::c_ulong, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                // Slave becomes stdio
                if libc::dup2(slave_fd, 0) == -1
                    || libc::dup2(slave_fd, 1) == -1
                    || libc::dup2(slave_fd, 2) == -1
                {
                    return Err(io::Error::last_os_error());
                }
                if slave_fd > 2 {
                    libc::close(slave_fd);
                }
                // The child must hold only the slave side; a leaked master
                // keeps the pty alive past its partner's exit.
                libc::close(master_fd);
                for fd in &extra {
                    libc::close(*fd);
                }
                Ok(())
            })
            .spawn()
    }
    .map_err(|source| SetupError::Spawn {
        command: program.to_string(),
        source,
    })?;

    // Close the slave in the parent so the master observes end-of-stream
    // when the child exits.
    drop(pty.slave);

    Ok(PtyEndpoint::new(pty.master, child))
}
