//! SSH access to pods.
//!
//! Authentication is agent-first, then discoverable key files, never
//! passwords. All remote work goes through [`ShellSession`]; the
//! [`CommandRunner`] trait is the seam the tmux manager (and its tests)
//! dispatch through.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Seconds between SSH connection attempts.
const RETRY_INTERVAL_SECS: u64 = 15;

/// Grace period after dispatching a background command.
const BACKGROUND_GRACE_SECS: u64 = 2;

/// Errors from the SSH layer.
#[derive(Error, Debug)]
pub enum SshError {
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected")]
    NotConnected,

    #[error("no usable SSH credentials (agent or ~/.ssh key files)")]
    NoCredentials,
}

/// Anything that can run a remote shell command and hand back its output
/// streams. Implemented by [`ShellSession`]; mocked in tests.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    fn run(&self, command: &str) -> Result<(String, String), SshError>;
}

/// An authenticated SSH connection to one pod.
pub struct ShellSession {
    host: String,
    port: u16,
    username: String,
    timeout: Duration,
    session: Option<ssh2::Session>,
    // Channels of dispatched background commands; kept open so the remote
    // side is not torn down before close().
    background: Vec<ssh2::Channel>,
}

impl ShellSession {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            timeout,
            session: None,
            background: Vec::new(),
        }
    }

    /// Connect with retries, every [`RETRY_INTERVAL_SECS`] seconds.
    ///
    /// Each failure prints a diagnostic with the pod's console URL so the
    /// operator can inspect boot progress out-of-band. Returns `false` only
    /// after all attempts are exhausted (or on cancellation).
    pub async fn connect(&mut self, pod_id: &str, max_retries: u32, token: &CancellationToken) -> bool {
        for attempt in 1..=max_retries {
            println!("  Attempting SSH connection (attempt {attempt}/{max_retries})...");
            match self.try_connect() {
                Ok(session) => {
                    self.session = Some(session);
                    println!("  Connected to {}:{}", self.host, self.port);
                    return true;
                }
                Err(e) => {
                    println!(
                        "  SSH connection attempt {attempt} failed: {e}\n  \
                         Feel free to check the pod logs online if needed: \
                         https://console.runpod.io/pods?id={pod_id}"
                    );
                }
            }
            if attempt < max_retries {
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_secs(RETRY_INTERVAL_SECS)) => {}
                    () = token.cancelled() => return false,
                }
            }
        }
        println!("  All SSH connection attempts failed");
        false
    }

    fn try_connect(&self) -> Result<ssh2::Session, SshError> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                SshError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "host resolved to no addresses",
                ))
            })?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;

        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(stream);
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake()?;
        self.authenticate(&session)?;
        Ok(session)
    }

    fn authenticate(&self, session: &ssh2::Session) -> Result<(), SshError> {
        match session.userauth_agent(&self.username) {
            Ok(()) => return Ok(()),
            Err(e) => debug!(error = %e, "Agent auth failed, trying key files"),
        }

        for key in candidate_key_files() {
            match session.userauth_pubkey_file(&self.username, None, &key, None) {
                Ok(()) => return Ok(()),
                Err(e) => debug!(key = %key.display(), error = %e, "Key file auth failed"),
            }
        }

        Err(SshError::NoCredentials)
    }

    /// Run a foreground command, blocking until it completes, and return
    /// its fully decoded output streams.
    pub fn execute(&self, command: &str) -> Result<(String, String), SshError> {
        let session = self.session.as_ref().ok_or(SshError::NotConnected)?;
        debug!(command = %head(command), "Executing remote command");

        let mut channel = session.channel_session()?;
        channel.exec(command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;
        channel.wait_close()?;

        Ok((stdout, stderr))
    }

    /// Dispatch a command on a fresh channel and return after a fixed grace
    /// period. The remote process is not tracked afterward.
    pub async fn execute_background(&mut self, command: &str) -> Result<(String, String), SshError> {
        let session = self.session.as_ref().ok_or(SshError::NotConnected)?;
        println!("  Executing command in background:\n  {}", head(command));

        let mut channel = session.channel_session()?;
        channel.exec(command)?;
        self.background.push(channel);

        tokio::time::sleep(Duration::from_secs(BACKGROUND_GRACE_SECS)).await;
        Ok(("Background command started".to_string(), String::new()))
    }

    /// Open a dedicated channel running `command`, for continuous reads.
    pub fn open_stream(&self, command: &str) -> Result<ssh2::Channel, SshError> {
        let session = self.session.as_ref().ok_or(SshError::NotConnected)?;
        let mut channel = session.channel_session()?;
        channel.exec(command)?;
        Ok(channel)
    }

    /// Switch the underlying session between blocking and non-blocking
    /// reads. No-op when not connected.
    pub fn set_blocking(&self, blocking: bool) {
        if let Some(session) = &self.session {
            session.set_blocking(blocking);
        }
    }

    /// Release the connection. Safe to call even if never connected.
    pub fn close(&mut self) {
        self.background.clear();
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "closing", None);
        }
    }
}

impl CommandRunner for ShellSession {
    fn run(&self, command: &str) -> Result<(String, String), SshError> {
        self.execute(command)
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn head(command: &str) -> &str {
    let end = command
        .char_indices()
        .nth(100)
        .map_or(command.len(), |(i, _)| i);
    &command[..end]
}

fn candidate_key_files() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    ["id_ed25519", "id_rsa", "id_ecdsa"]
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .filter(|path| path.exists())
        .collect()
}

/// Configure the git identity on the remote host. Warning-tolerant: a
/// failing config command yields `false`, not an error.
pub fn configure_git<R: CommandRunner>(conn: &R, name: &str, email: &str) -> Result<bool, SshError> {
    let commands = [
        format!("git config --global user.name \"{name}\""),
        format!("git config --global user.email \"{email}\""),
    ];
    for command in &commands {
        let (_stdout, stderr) = conn.run(command)?;
        if !stderr.is_empty() {
            warn!(%stderr, "Git config command failed");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Insert or replace the `Host <pod_name>` alias block in an ssh config
/// body, leaving every other block untouched.
#[must_use]
pub fn upsert_host_block(existing: &str, pod_name: &str, host: &str, port: u16, username: &str) -> String {
    let entry = format!(
        "Host {pod_name}\n    HostName {host}\n    User {username}\n    Port {port}\n    \
         ForwardAgent yes\n    StrictHostKeyChecking no\n    UserKnownHostsFile=/dev/null\n"
    );

    // A block is the `Host` header line plus all indented lines after it.
    let pattern = format!(r"(?m)^Host {}[ \t]*\n(?:[ \t]+[^\n]*\n)*", regex::escape(pod_name));
    let re = regex::Regex::new(&pattern).expect("static host-block pattern");

    if re.is_match(existing) {
        re.replace(existing, entry.as_str()).into_owned()
    } else {
        let mut out = existing.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&entry);
        out
    }
}

/// Maintain a per-pod `Host` alias in `~/.ssh/config` so `ssh <pod_name>`
/// works out of the box. Cosmetic: every failure is a warning.
pub fn update_ssh_config(pod_name: &str, host: &str, port: u16, username: &str) -> bool {
    let Some(home) = dirs::home_dir() else {
        warn!("No home directory; skipping ssh config update");
        return false;
    };
    let ssh_dir = home.join(".ssh");
    let config_path = ssh_dir.join("config");

    let result = (|| -> std::io::Result<()> {
        std::fs::create_dir_all(&ssh_dir)?;
        let existing = match std::fs::read_to_string(&config_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        let updated = upsert_host_block(&existing, pod_name, host, port, username);
        std::fs::write(&config_path, updated)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %config_path.display(), error = %e, "Failed to update ssh config");
            false
        }
    }
}
