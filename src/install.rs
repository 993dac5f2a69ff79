//! Puts the public key into the remote account's `~/.ssh/authorized_keys`.
//!
//! There are two [Installer]s. [NetworkInstaller] logs in with a password and runs three fixed
//! shell commands on the server. [ManualInstaller] only prints the commands an operator would run
//! by hand. [select] picks one at startup: the network installer needs the `ssh2` feature and a
//! configured password.
//!
//! # Repeated runs
//!
//! The key is not appended blindly with `>>`. [append_key_command] skips the append when the
//! authorized keys file already holds an identical line, so running the tool twice leaves one
//! entry. Verification still only looks for the marker, not for the exact key.
//!
//! # Host key trust
//!
//! The `ssh2` session accepts whatever host key the server presents. There is no known_hosts
//! lookup, so the first connection trusts the server blindly. The fingerprint is logged at `warn`
//! level; compare it against `ssh-keygen -lf /etc/ssh/ssh_host_ed25519_key.pub` on the server if
//! the network between you and it is not trusted.

use crate::config::Config;
#[cfg(feature = "ssh2")]
use crate::config::SESSION_TIMEOUT;
use crate::keys::KeyPair;
use crate::report;
use anyhow::{anyhow, Context};
use shlex::Quoter;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;

#[cfg(feature = "ssh2")]
pub mod session;

/// The remote authorized keys file, relative to the login user's home.
pub const AUTHORIZED_KEYS: &str = "~/.ssh/authorized_keys";

/// Creates the remote SSH directory if needed and restricts it to its owner.
pub const ENSURE_SSH_DIR: &str = "mkdir -p ~/.ssh && chmod 700 ~/.ssh";

/// Where the key goes: host, port and login user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl From<&Config> for Target {
    fn from(config: &Config) -> Self {
        Target {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
        }
    }
}

/// Formats as `user@host`, the form `ssh` and `ssh-copy-id` take.
impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// What an [Installer] accomplished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The key was appended and the marker was found in the authorized keys file afterwards.
    Verified,

    /// The commands ran, but the marker did not show up in the authorized keys file.
    Unverified,

    /// Nothing was changed remotely; instructions were printed instead.
    Manual,
}

/// Installs a public key on the target, writing progress for the operator to `out`.
pub trait Installer {
    fn install(&mut self, public_key: &str, out: &mut dyn Write) -> anyhow::Result<Outcome>;
}

/// Captured result of one remote command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// An authenticated shell session on the target.
pub trait RemoteShell {
    /// Runs `command` and blocks until it exits.
    fn exec(&mut self, command: &str) -> anyhow::Result<CommandOutput>;

    /// Ends the session.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// Opens [RemoteShell]s.
pub trait Connect {
    type Shell: RemoteShell;

    /// Connects to `target` and authenticates with `password`.
    fn connect(&mut self, target: &Target, password: &str) -> anyhow::Result<Self::Shell>;
}

/// Quotes a value for a POSIX remote shell.
fn quote(value: &str) -> anyhow::Result<String> {
    Quoter::new()
        .quote(value)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| anyhow!("cannot quote {value:?} for the remote shell: {e}"))
}

/// Builds the command that appends `public_key` to [AUTHORIZED_KEYS].
///
/// The key is only appended if no identical line exists, so repeated runs don't pile up
/// duplicates. A file that lacks a trailing newline gets one before the key is added.
pub fn append_key_command(public_key: &str) -> anyhow::Result<String> {
    let key = quote(public_key)?;
    let file = AUTHORIZED_KEYS;
    Ok(format!(
        "touch {file} && \
        {{ grep -qxF {key} {file} || {{ [ -z \"$(tail -c 1 {file})\" ] || echo >> {file}; \
        printf '%s\\n' {key} >> {file}; }}; }} && \
        chmod 600 {file}"
    ))
}

/// Builds the command that searches [AUTHORIZED_KEYS] for `marker`.
pub fn verify_command(marker: &str) -> anyhow::Result<String> {
    Ok(format!("grep -F -- {} {AUTHORIZED_KEYS}", quote(marker)?))
}

/// Installs the key over SSH with password authentication.
pub struct NetworkInstaller<C: Connect> {
    connector: C,
    target: Target,
    password: String,
    marker: String,
}

impl<C: Connect> NetworkInstaller<C> {
    pub fn new(connector: C, target: Target, password: String, marker: String) -> Self {
        NetworkInstaller {
            connector,
            target,
            password,
            marker,
        }
    }
}

impl<C: Connect> Installer for NetworkInstaller<C> {
    fn install(&mut self, public_key: &str, out: &mut dyn Write) -> anyhow::Result<Outcome> {
        writeln!(
            out,
            "Connecting to {} as {}...",
            self.target.host, self.target.user,
        )?;
        let mut shell = self
            .connector
            .connect(&self.target, &self.password)
            .with_context(|| format!("could not log in to {}", self.target))?;
        writeln!(out, "Connected to server")?;

        writeln!(out, "Creating ~/.ssh directory...")?;
        let output = shell.exec(ENSURE_SSH_DIR)?;
        warn_on_failure(out, ENSURE_SSH_DIR, &output)?;

        writeln!(out, "Adding public key...")?;
        let append = append_key_command(public_key)?;
        let output = shell.exec(&append)?;
        warn_on_failure(out, &append, &output)?;

        writeln!(out, "Verifying key installation...")?;
        let output = shell.exec(&verify_command(&self.marker)?)?;
        let outcome = if output.stdout.contains(&self.marker) {
            Outcome::Verified
        } else {
            tracing::warn!(marker = %self.marker, stderr = %output.stderr, "marker not found");
            Outcome::Unverified
        };

        // The key is in place at this point; failing to say goodbye doesn't change that.
        if let Err(error) = shell.close() {
            tracing::warn!(%error, "error closing SSH session");
        }
        Ok(outcome)
    }
}

/// Reports a remote command that exited unsuccessfully. The run carries on; verification decides
/// whether the key made it.
fn warn_on_failure(out: &mut dyn Write, command: &str, output: &CommandOutput) -> anyhow::Result<()> {
    if !output.success() {
        tracing::warn!(command, status = output.status, stderr = %output.stderr, "remote command failed");
        writeln!(
            out,
            "Warning: remote command exited with status {}: {}",
            output.status,
            output.stderr.trim(),
        )?;
    }
    Ok(())
}

/// Prints manual setup commands instead of touching the server.
#[derive(Clone, Debug)]
pub struct ManualInstaller {
    target: Target,
    public_key_path: PathBuf,
}

impl ManualInstaller {
    pub fn new(target: Target, public_key_path: impl Into<PathBuf>) -> Self {
        ManualInstaller {
            target,
            public_key_path: public_key_path.into(),
        }
    }
}

impl Installer for ManualInstaller {
    fn install(&mut self, _public_key: &str, out: &mut dyn Write) -> anyhow::Result<Outcome> {
        report::manual_instructions(out, &self.target, &self.public_key_path)?;
        Ok(Outcome::Manual)
    }
}

/// Chooses the installer for this run.
///
/// The network installer is used when it was compiled in and a password is configured.
/// Otherwise the manual installer is used.
pub fn select(config: &Config, keys: &KeyPair) -> Box<dyn Installer> {
    let target = Target::from(config);
    match networked(config, &target) {
        Some(installer) => installer,
        None => Box::new(ManualInstaller::new(target, keys.public_path())),
    }
}

#[cfg(feature = "ssh2")]
fn networked(config: &Config, target: &Target) -> Option<Box<dyn Installer>> {
    let Some(password) = &config.password else {
        tracing::info!("no password configured; falling back to manual instructions");
        return None;
    };
    Some(Box::new(NetworkInstaller::new(
        session::Ssh2Connector::new(SESSION_TIMEOUT),
        target.clone(),
        password.clone(),
        config.marker.clone(),
    )))
}

#[cfg(not(feature = "ssh2"))]
fn networked(_config: &Config, _target: &Target) -> Option<Box<dyn Installer>> {
    tracing::info!("built without SSH support; falling back to manual instructions");
    None
}
