//! Session ownership: the two pty endpoints, the run wiring around the
//! event loop, and teardown.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::process::Child;
use std::time::{Duration, Instant};

use nix::pty::Winsize;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::services::signal_handler;
use crate::supervisor::event_loop::{self, ChannelFds, LoopError, SessionEnd, SessionStreams};
use crate::supervisor::launcher;
use crate::supervisor::transcript::Transcript;
use crate::supervisor::trigger::ErrorTrigger;

/// Grace period between SIGHUP and SIGKILL at teardown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// One supervised child and the master side of its pty.
///
/// The endpoint exclusively owns both for its lifetime: dropping it reaps
/// the child and closes the master, on every exit path.
pub struct PtyEndpoint {
    master: OwnedFd,
    child: Child,
    reaped: bool,
}

impl PtyEndpoint {
    pub(crate) fn new(master: OwnedFd, child: Child) -> Self {
        Self {
            master,
            child,
            reaped: false,
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn master_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    pub(crate) fn master_raw_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    /// Push new dimensions into the pty.
    pub fn resize(&self, window: &Winsize) {
        // SAFETY: TIOCSWINSZ only reads the winsize struct for the duration
        // of the call, and the descriptor is owned by self.
        let rc = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, window) };
        if rc == -1 {
            warn!(
                pid = self.child.id(),
                error = %std::io::Error::last_os_error(),
                "window resize failed"
            );
        }
    }

    /// Terminate and reap the child if it is still running: SIGHUP to its
    /// process group (the terminal-went-away signal a shell expects), a
    /// short grace period, then SIGKILL. Idempotent.
    pub fn shutdown(&mut self) {
        if self.reaped {
            return;
        }
        self.reaped = true;

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = self.child.id(), %status, "child already exited");
                return;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "cannot query child state");
                return;
            }
        }

        // setsid() made the child a session leader, so its pid names the
        // whole process group.
        let pgid = Pid::from_raw(-(self.child.id() as i32));
        let _ = kill(pgid, Signal::SIGHUP);

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid = self.child.id(), %status, "child terminated");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "waiting for child");
                    return;
                }
            }
        }

        warn!(pid = self.child.id(), "child ignored SIGHUP, killing");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for PtyEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One supervisor run: the shell endpoint plus, when configured, the
/// analyzer endpoint.
pub struct Session {
    pub shell: PtyEndpoint,
    pub analyzer: Option<PtyEndpoint>,
}

impl Session {
    /// Run the session loop against the given terminal descriptors,
    /// applying pending window resizes on every wakeup.
    pub fn run(
        &self,
        term_in: BorrowedFd<'_>,
        term_out: BorrowedFd<'_>,
        transcript: &mut Transcript,
        trigger: &mut ErrorTrigger<'_>,
    ) -> Result<SessionEnd, LoopError> {
        let shell = &self.shell;
        let analyzer = self.analyzer.as_ref();

        let on_wake = || {
            if !signal_handler::take_pending_resize() {
                return;
            }
            match launcher::query_window() {
                Ok(window) => {
                    shell.resize(&window);
                    if let Some(analyzer) = analyzer {
                        analyzer.resize(&window);
                    }
                }
                Err(err) => warn!(error = %err, "cannot query window size after resize"),
            }
        };

        let streams = SessionStreams {
            term_in,
            term_out,
            shell: ChannelFds {
                read: shell.master_fd(),
                write: shell.master_fd(),
            },
            analyzer: analyzer.map(|endpoint| ChannelFds {
                read: endpoint.master_fd(),
                write: endpoint.master_fd(),
            }),
        };

        event_loop::run(streams, transcript, trigger, on_wake)
    }

    /// Release everything: both children signaled and reaped, both master
    /// descriptors closed when the endpoints drop.
    pub fn shutdown(&mut self) {
        self.shell.shutdown();
        if let Some(analyzer) = self.analyzer.as_mut() {
            analyzer.shutdown();
        }
    }
}
