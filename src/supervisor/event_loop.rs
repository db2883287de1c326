//! The session I/O multiplexer.
//!
//! A single-threaded, readiness-driven loop over three descriptors:
//! terminal input, the shell pty master, and (when attached) the analyzer
//! pty master. One thread, no timeouts, no shared state: bytes from each
//! source reach their destinations in read order, and the transcript needs
//! no locking because only this loop ever touches it.

use std::fmt;
use std::os::fd::BorrowedFd;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd;
use thiserror::Error;
use tracing::{debug, warn};

use crate::supervisor::transcript::Transcript;
use crate::supervisor::trigger::ErrorTrigger;

/// Upper bound on a single read. Readiness was just reported, so reads of
/// at most this size never block.
pub const CHUNK_SIZE: usize = 4096;

/// Why the session loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Terminal input reached end-of-stream.
    InputClosed,
    /// The shell pty reached end-of-stream (the shell exited).
    ShellExited,
}

/// Streams whose failures are fatal to the session. Analyzer failures are
/// not: they only retire the analyzer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    TerminalIn,
    TerminalOut,
    Shell,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamId::TerminalIn => "terminal input",
            StreamId::TerminalOut => "terminal output",
            StreamId::Shell => "shell pty",
        })
    }
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("poll failed: {0}")]
    Poll(#[source] Errno),

    #[error("read from {0} failed: {1}")]
    Read(StreamId, #[source] Errno),

    #[error("write to {0} failed: {1}")]
    Write(StreamId, #[source] Errno),
}

/// One multiplexed channel: where the loop reads from and where the
/// channel's peer is written to. For a pty both sides are the same master
/// descriptor; tests wire up pipe pairs instead.
#[derive(Clone, Copy)]
pub struct ChannelFds<'a> {
    pub read: BorrowedFd<'a>,
    pub write: BorrowedFd<'a>,
}

/// The descriptors the loop multiplexes over.
pub struct SessionStreams<'a> {
    pub term_in: BorrowedFd<'a>,
    pub term_out: BorrowedFd<'a>,
    pub shell: ChannelFds<'a>,
    pub analyzer: Option<ChannelFds<'a>>,
}

/// Run the session loop to completion.
///
/// `on_wake` runs at the top of every iteration, including after an
/// interrupted poll; the caller uses it to apply pending window resizes.
///
/// Per iteration, ready streams are handled in a fixed order: terminal
/// input, then shell output, then analyzer output. An end-of-stream on
/// input or shell finishes the iteration's remaining streams first, then
/// returns; an end-of-stream on the analyzer only retires that stream.
pub fn run<F>(
    mut streams: SessionStreams<'_>,
    transcript: &mut Transcript,
    trigger: &mut ErrorTrigger<'_>,
    mut on_wake: F,
) -> Result<SessionEnd, LoopError>
where
    F: FnMut(),
{
    // Without a shadow analyzer the classifier watches the shell's own
    // output (in-process form).
    let classify_shell_output = streams.analyzer.is_none();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        on_wake();

        let mut fds = Vec::with_capacity(3);
        fds.push(PollFd::new(streams.term_in, PollFlags::POLLIN));
        fds.push(PollFd::new(streams.shell.read, PollFlags::POLLIN));
        if let Some(analyzer) = &streams.analyzer {
            fds.push(PollFd::new(analyzer.read, PollFlags::POLLIN));
        }

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(LoopError::Poll(err)),
        }

        let term_ready = ready(&fds[0]);
        let shell_ready = ready(&fds[1]);
        let analyzer_ready = fds.get(2).map(ready).unwrap_or(false);

        let mut end: Option<SessionEnd> = None;

        if term_ready {
            match read_chunk(streams.term_in, &mut buf)
                .map_err(|err| LoopError::Read(StreamId::TerminalIn, err))?
            {
                None => {
                    debug!("terminal input closed");
                    end = Some(SessionEnd::InputClosed);
                }
                Some(n) => {
                    let chunk = &buf[..n];
                    write_all(streams.shell.write, chunk)
                        .map_err(|err| LoopError::Write(StreamId::Shell, err))?;
                    if let Some(analyzer) = streams.analyzer {
                        // The analyzer is an observer: losing it must not
                        // take the session down, so a failed tee retires
                        // the stream instead.
                        if let Err(err) = write_all(analyzer.write, chunk) {
                            warn!(error = %err, "analyzer tee failed, retiring analyzer stream");
                            streams.analyzer = None;
                        }
                    }
                }
            }
        }

        if shell_ready {
            match read_chunk(streams.shell.read, &mut buf)
                .map_err(|err| LoopError::Read(StreamId::Shell, err))?
            {
                None => {
                    debug!("shell pty closed");
                    if end.is_none() {
                        end = Some(SessionEnd::ShellExited);
                    }
                }
                Some(n) => {
                    let chunk = &buf[..n];
                    write_all(streams.term_out, chunk)
                        .map_err(|err| LoopError::Write(StreamId::TerminalOut, err))?;
                    transcript.append(chunk);
                    if classify_shell_output {
                        trigger.on_chunk(chunk);
                    }
                }
            }
        }

        if analyzer_ready {
            if let Some(analyzer) = streams.analyzer {
                match read_chunk(analyzer.read, &mut buf) {
                    Ok(None) => {
                        debug!("analyzer stream closed");
                        streams.analyzer = None;
                    }
                    Ok(Some(n)) => {
                        let chunk = &buf[..n];
                        write_all(streams.term_out, chunk)
                            .map_err(|err| LoopError::Write(StreamId::TerminalOut, err))?;
                        transcript.append(chunk);
                        trigger.on_chunk(chunk);
                    }
                    Err(err) => {
                        warn!(error = %err, "analyzer read failed, retiring analyzer stream");
                        streams.analyzer = None;
                    }
                }
            }
        }

        if let Some(end) = end {
            return Ok(end);
        }
    }
}

fn ready(fd: &PollFd) -> bool {
    fd.revents().is_some_and(|revents| {
        revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

/// Read one chunk. `None` means end-of-stream; interrupted reads retry.
fn read_chunk(fd: BorrowedFd<'_>, buf: &mut [u8]) -> Result<Option<usize>, Errno> {
    loop {
        match unistd::read(fd, buf) {
            Ok(0) => return Ok(None),
            Ok(n) => return Ok(Some(n)),
            Err(Errno::EINTR) => continue,
            // A pty master reports EIO once its slave side is gone.
            Err(Errno::EIO) => return Ok(None),
            Err(err) => return Err(err),
        }
    }
}

/// Write the whole chunk. A short write means the destination took only
/// part of the data and the remainder is retried; anything else is the
/// caller's error to classify.
fn write_all(fd: BorrowedFd<'_>, data: &[u8]) -> Result<(), Errno> {
    let mut written = 0;
    while written < data.len() {
        match unistd::write(fd, &data[written..]) {
            Ok(n) => written += n,
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::PatternClassifier;
    use crate::config::SnapshotConfig;
    use crate::snapshot::testing::MockStore;
    use std::fs::File;
    use std::io::Read;
    use std::os::fd::{AsFd, OwnedFd};

    fn pipe() -> (OwnedFd, OwnedFd) {
        nix::unistd::pipe().unwrap()
    }

    fn write_to(fd: &OwnedFd, data: &[u8]) {
        let mut written = 0;
        while written < data.len() {
            written += nix::unistd::write(fd, &data[written..]).unwrap();
        }
    }

    /// Drain a pipe read end after its write ends are gone.
    fn read_back(fd: OwnedFd) -> Vec<u8> {
        let mut out = Vec::new();
        File::from(fd).read_to_end(&mut out).unwrap();
        out
    }

    struct Fixture {
        transcript: Transcript,
        transcript_path: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let transcript_path = dir.path().join("typescript");
            let transcript = Transcript::create(&transcript_path).unwrap();
            Self {
                transcript,
                transcript_path,
                _dir: dir,
            }
        }

        fn transcript_contents(&self) -> Vec<u8> {
            std::fs::read(&self.transcript_path).unwrap()
        }
    }

    #[test]
    fn test_input_is_forwarded_verbatim_then_eof_ends_session() {
        let (term_in_r, term_in_w) = pipe();
        let (_term_out_r, term_out_w) = pipe();
        let (shell_out_r, _shell_out_w) = pipe(); // shell stays silent, write end held open
        let (shell_in_r, shell_in_w) = pipe();

        write_to(&term_in_w, b"ls\n");
        drop(term_in_w);

        let mut fixture = Fixture::new();
        let classifier = PatternClassifier::new(&["not found".to_string()]);
        let mut store = MockStore::with_primary("master");
        let mut trigger = ErrorTrigger::new(&classifier, &mut store, SnapshotConfig::default());

        let end = run(
            SessionStreams {
                term_in: term_in_r.as_fd(),
                term_out: term_out_w.as_fd(),
                shell: ChannelFds {
                    read: shell_out_r.as_fd(),
                    write: shell_in_w.as_fd(),
                },
                analyzer: None,
            },
            &mut fixture.transcript,
            &mut trigger,
            || {},
        )
        .unwrap();

        assert_eq!(end, SessionEnd::InputClosed);
        drop(shell_in_w);
        assert_eq!(read_back(shell_in_r), b"ls\n");
        assert!(store.commits.is_empty());
    }

    #[test]
    fn test_shell_output_reaches_terminal_and_transcript_in_order() {
        let (term_in_r, _term_in_w) = pipe(); // input stays open and silent
        let (term_out_r, term_out_w) = pipe();
        let (shell_out_r, shell_out_w) = pipe();
        let (shell_in_r, shell_in_w) = pipe();

        // What a real pty produces for `ls`: the echoed command, then output
        write_to(&shell_out_w, b"ls\nfile.txt\n");
        drop(shell_out_w);

        let mut fixture = Fixture::new();
        let classifier = PatternClassifier::new(&["not found".to_string()]);
        let mut store = MockStore::with_primary("master");
        let mut trigger = ErrorTrigger::new(&classifier, &mut store, SnapshotConfig::default());

        let end = run(
            SessionStreams {
                term_in: term_in_r.as_fd(),
                term_out: term_out_w.as_fd(),
                shell: ChannelFds {
                    read: shell_out_r.as_fd(),
                    write: shell_in_w.as_fd(),
                },
                analyzer: None,
            },
            &mut fixture.transcript,
            &mut trigger,
            || {},
        )
        .unwrap();

        assert_eq!(end, SessionEnd::ShellExited);
        drop(term_out_w);
        assert_eq!(read_back(term_out_r), b"ls\nfile.txt\n");
        assert_eq!(fixture.transcript_contents(), b"ls\nfile.txt\n");
        // Nothing classified as an error, nothing committed
        assert!(store.commits.is_empty());
        drop(shell_in_w);
        assert!(read_back(shell_in_r).is_empty());
    }

    #[test]
    fn test_analyzer_eof_retires_stream_without_ending_session() {
        let (term_in_r, term_in_w) = pipe();
        let (_term_out_r, term_out_w) = pipe();
        let (shell_out_r, _shell_out_w) = pipe();
        let (shell_in_r, shell_in_w) = pipe();
        let (analyzer_out_r, analyzer_out_w) = pipe();
        let (analyzer_in_r, analyzer_in_w) = pipe();

        // Analyzer is gone before the session produces anything
        drop(analyzer_out_w);
        write_to(&term_in_w, b"q");
        drop(term_in_w);

        let mut fixture = Fixture::new();
        let classifier = PatternClassifier::new(&["not found".to_string()]);
        let mut store = MockStore::with_primary("master");
        let mut trigger = ErrorTrigger::new(&classifier, &mut store, SnapshotConfig::default());

        let end = run(
            SessionStreams {
                term_in: term_in_r.as_fd(),
                term_out: term_out_w.as_fd(),
                shell: ChannelFds {
                    read: shell_out_r.as_fd(),
                    write: shell_in_w.as_fd(),
                },
                analyzer: Some(ChannelFds {
                    read: analyzer_out_r.as_fd(),
                    write: analyzer_in_w.as_fd(),
                }),
            },
            &mut fixture.transcript,
            &mut trigger,
            || {},
        )
        .unwrap();

        // The analyzer EOF never terminates the loop; input EOF does
        assert_eq!(end, SessionEnd::InputClosed);

        // Input was teed to both the shell and the analyzer while it lived
        drop(shell_in_w);
        assert_eq!(read_back(shell_in_r), b"q");
        drop(analyzer_in_w);
        assert_eq!(read_back(analyzer_in_r), b"q");
    }

    #[test]
    fn test_analyzer_chunk_is_forwarded_audited_and_classified() {
        let (term_in_r, term_in_w) = pipe();
        let (term_out_r, term_out_w) = pipe();
        let (shell_out_r, _shell_out_w) = pipe();
        let (_shell_in_r, shell_in_w) = pipe();
        let (analyzer_out_r, analyzer_out_w) = pipe();
        let (_analyzer_in_r, analyzer_in_w) = pipe();

        write_to(&analyzer_out_w, b"bash: foo: command not found\n");
        drop(analyzer_out_w);
        drop(term_in_w); // ends the session after the chunk is handled

        let mut fixture = Fixture::new();
        let classifier = PatternClassifier::new(&["not found".to_string()]);
        let mut store = MockStore::with_primary("master");
        let mut trigger = ErrorTrigger::new(&classifier, &mut store, SnapshotConfig::default());

        let end = run(
            SessionStreams {
                term_in: term_in_r.as_fd(),
                term_out: term_out_w.as_fd(),
                shell: ChannelFds {
                    read: shell_out_r.as_fd(),
                    write: shell_in_w.as_fd(),
                },
                analyzer: Some(ChannelFds {
                    read: analyzer_out_r.as_fd(),
                    write: analyzer_in_w.as_fd(),
                }),
            },
            &mut fixture.transcript,
            &mut trigger,
            || {},
        )
        .unwrap();

        assert_eq!(end, SessionEnd::InputClosed);

        // Exactly one commit, on a freshly created error branch
        assert_eq!(store.commits.len(), 1);
        assert_eq!(store.commits[0].branch, "_error");
        assert_eq!(
            store.commits[0].parent,
            crate::snapshot::CommitRef("base".to_string())
        );
        assert!(store.commits[0].message.contains("command not found"));

        // Analyzer output is still visible and audited
        drop(term_out_w);
        assert_eq!(read_back(term_out_r), b"bash: foo: command not found\n");
        assert_eq!(
            fixture.transcript_contents(),
            b"bash: foo: command not found\n"
        );
    }

    #[test]
    fn test_shell_output_is_classified_when_no_analyzer_attached() {
        let (term_in_r, _term_in_w) = pipe();
        let (_term_out_r, term_out_w) = pipe();
        let (shell_out_r, shell_out_w) = pipe();
        let (_shell_in_r, shell_in_w) = pipe();

        write_to(&shell_out_w, b"bash: foo: command not found\n");
        drop(shell_out_w);

        let mut fixture = Fixture::new();
        let classifier = PatternClassifier::new(&["not found".to_string()]);
        let mut store = MockStore::with_primary("master");
        let mut trigger = ErrorTrigger::new(&classifier, &mut store, SnapshotConfig::default());

        let end = run(
            SessionStreams {
                term_in: term_in_r.as_fd(),
                term_out: term_out_w.as_fd(),
                shell: ChannelFds {
                    read: shell_out_r.as_fd(),
                    write: shell_in_w.as_fd(),
                },
                analyzer: None,
            },
            &mut fixture.transcript,
            &mut trigger,
            || {},
        )
        .unwrap();

        assert_eq!(end, SessionEnd::ShellExited);
        assert_eq!(store.commits.len(), 1);
    }

    #[test]
    fn test_failed_analyzer_tee_retires_stream_not_session() {
        let (term_in_r, term_in_w) = pipe();
        let (_term_out_r, term_out_w) = pipe();
        let (shell_out_r, _shell_out_w) = pipe();
        let (shell_in_r, shell_in_w) = pipe();
        let (analyzer_out_r, _analyzer_out_w) = pipe();
        let (analyzer_in_r, analyzer_in_w) = pipe();

        // Nobody is reading the analyzer's input side anymore
        drop(analyzer_in_r);
        write_to(&term_in_w, b"x");
        drop(term_in_w);

        let mut fixture = Fixture::new();
        let classifier = PatternClassifier::new(&["not found".to_string()]);
        let mut store = MockStore::with_primary("master");
        let mut trigger = ErrorTrigger::new(&classifier, &mut store, SnapshotConfig::default());

        let end = run(
            SessionStreams {
                term_in: term_in_r.as_fd(),
                term_out: term_out_w.as_fd(),
                shell: ChannelFds {
                    read: shell_out_r.as_fd(),
                    write: shell_in_w.as_fd(),
                },
                analyzer: Some(ChannelFds {
                    read: analyzer_out_r.as_fd(),
                    write: analyzer_in_w.as_fd(),
                }),
            },
            &mut fixture.transcript,
            &mut trigger,
            || {},
        )
        .unwrap();

        // The broken tee (EPIPE) is not fatal; the shell still got the byte
        assert_eq!(end, SessionEnd::InputClosed);
        drop(shell_in_w);
        assert_eq!(read_back(shell_in_r), b"x");
    }

    #[test]
    fn test_wake_hook_runs() {
        let (term_in_r, term_in_w) = pipe();
        let (_term_out_r, term_out_w) = pipe();
        let (shell_out_r, _shell_out_w) = pipe();
        let (_shell_in_r, shell_in_w) = pipe();
        drop(term_in_w);

        let mut fixture = Fixture::new();
        let classifier = PatternClassifier::new(&[]);
        let mut store = MockStore::with_primary("master");
        let mut trigger = ErrorTrigger::new(&classifier, &mut store, SnapshotConfig::default());

        let mut wakeups = 0;
        run(
            SessionStreams {
                term_in: term_in_r.as_fd(),
                term_out: term_out_w.as_fd(),
                shell: ChannelFds {
                    read: shell_out_r.as_fd(),
                    write: shell_in_w.as_fd(),
                },
                analyzer: None,
            },
            &mut fixture.transcript,
            &mut trigger,
            || wakeups += 1,
        )
        .unwrap();

        assert!(wakeups >= 1);
    }
}
