//! Remote tmux session management.
//!
//! No state of its own: every operation is a shell command dispatched
//! through a [`CommandRunner`], so the whole module is command-construction
//! logic plus the log-follow loop.

use std::io::{Read, Write};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::ssh::{CommandRunner, ShellSession, SshError};

/// Cadence of the log-follow read loop.
const STREAM_POLL_MILLIS: u64 = 100;

/// Quote a value for a POSIX shell: single-quote it, escaping any embedded
/// single quotes.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Probe whether a tmux session exists.
pub fn session_exists<R: CommandRunner>(conn: &R, name: &str) -> Result<bool, SshError> {
    let command = format!(
        "tmux has-session -t {} 2>/dev/null && echo exists",
        shell_quote(name)
    );
    let (stdout, _stderr) = conn.run(&command)?;
    Ok(stdout.contains("exists"))
}

/// Kill a tmux session. Success iff the kill produced no error output.
pub fn kill_session<R: CommandRunner>(conn: &R, name: &str) -> Result<bool, SshError> {
    let command = format!("tmux kill-session -t {}", shell_quote(name));
    let (_stdout, stderr) = conn.run(&command)?;
    Ok(stderr.is_empty())
}

/// Create a detached tmux session running `command` and pipe its pane
/// output to `log_file`.
///
/// The command runs under `bash -i` so shell startup files are sourced
/// fully instead of exiting early in non-interactive mode. Failure to set
/// up pane logging is a warning; the session still counts as created.
pub fn create_session_with_logging<R: CommandRunner>(
    conn: &R,
    name: &str,
    command: &str,
    log_file: &str,
) -> Result<bool, SshError> {
    let escaped = command.replace('\'', "'\\''");
    let create = format!(
        "tmux new-session -d -s {} bash -i -c '{escaped}'",
        shell_quote(name)
    );
    let (_stdout, stderr) = conn.run(&create)?;
    if !stderr.is_empty() {
        println!("   Error creating tmux session: {stderr}");
        return Ok(false);
    }

    let pipe = format!(
        "tmux pipe-pane -t {} -o 'cat >> {}'",
        shell_quote(name),
        log_file.replace('\'', "'\\''")
    );
    let (_stdout, stderr) = conn.run(&pipe)?;
    if !stderr.is_empty() {
        println!("   Warning: Could not configure logging: {stderr}");
        warn!(%stderr, "pipe-pane setup failed");
    }

    Ok(true)
}

/// Follow `log_file` on the remote host and copy it to local stdout until
/// `token` is cancelled (or the remote side closes the stream).
///
/// Bytes are decoded incrementally, so multi-byte characters split across
/// reads come out intact.
pub async fn stream_output(
    conn: &ShellSession,
    log_file: &str,
    token: &CancellationToken,
) -> Result<(), SshError> {
    println!("\nStreaming output from {log_file} (press Ctrl+C to stop)...");
    println!("{}", "=".repeat(80));

    let mut channel = conn.open_stream(&format!("tail -f {}", shell_quote(log_file)))?;
    conn.set_blocking(false);

    let mut tail = Utf8Tail::default();
    let mut buf = [0u8; 1024];
    let result = loop {
        if token.is_cancelled() {
            break Ok(());
        }
        match channel.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                print!("{}", tail.push(&buf[..n]));
                let _ = std::io::stdout().flush();
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                tokio::time::sleep(Duration::from_millis(STREAM_POLL_MILLIS)).await;
            }
            Err(e) => break Err(SshError::Io(e)),
        }
    };

    conn.set_blocking(true);
    let _ = channel.close();
    println!("\n{}", "=".repeat(80));
    println!("Stopped streaming output");
    result
}

/// Incremental UTF-8 decoder: holds back an incomplete trailing sequence
/// until the rest of it arrives.
#[derive(Default)]
struct Utf8Tail {
    pending: Vec<u8>,
}

impl Utf8Tail {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).expect("valid prefix"));
                    match e.error_len() {
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete tail; wait for more bytes.
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}
