//! [Connect] and [RemoteShell] on top of the [ssh2] crate.

use super::{CommandOutput, Connect, RemoteShell, Target};
use crate::probe;
use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use ssh2::{HashType, Session};
use std::io::Read;
use std::time::Duration;

/// Opens password-authenticated [Ssh2Shell]s.
#[derive(Clone, Debug)]
pub struct Ssh2Connector {
    timeout: Duration,
}

impl Ssh2Connector {
    /// `timeout` bounds the TCP connect and every blocking libssh2 call afterwards.
    pub fn new(timeout: Duration) -> Self {
        Ssh2Connector { timeout }
    }
}

impl Connect for Ssh2Connector {
    type Shell = Ssh2Shell;

    fn connect(&mut self, target: &Target, password: &str) -> anyhow::Result<Ssh2Shell> {
        let tcp = probe::open(&target.host, target.port, self.timeout)
            .with_context(|| format!("could not connect to {}:{}", target.host, target.port))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().context("SSH handshake failed")?;

        // Trust on first use: the host key is accepted without consulting known_hosts.
        match session.host_key_hash(HashType::Sha256) {
            Some(hash) => tracing::warn!(
                host = %target.host,
                fingerprint = %fingerprint(hash),
                "accepting unverified host key"
            ),
            None => tracing::warn!(host = %target.host, "accepting host key without a fingerprint"),
        }

        session
            .userauth_password(&target.user, password)
            .with_context(|| format!("password authentication failed for {target}"))?;
        if !session.authenticated() {
            bail!("server did not accept password authentication for {target}");
        }
        tracing::info!(%target, "authenticated");

        Ok(Ssh2Shell { session })
    }
}

/// Formats a SHA-256 host key hash the way `ssh-keygen -l` prints it.
fn fingerprint(hash: &[u8]) -> String {
    format!("SHA256:{}", STANDARD_NO_PAD.encode(hash))
}

/// An authenticated libssh2 session.
pub struct Ssh2Shell {
    session: Session,
}

impl RemoteShell for Ssh2Shell {
    fn exec(&mut self, command: &str) -> anyhow::Result<CommandOutput> {
        tracing::debug!(command, "running remote command");
        let mut channel = self.session.channel_session()?;
        channel
            .exec(command)
            .with_context(|| format!("failed to start remote command: {command}"))?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;

        channel.wait_close()?;
        let status = channel.exit_status()?;
        Ok(CommandOutput {
            stdout,
            stderr,
            status,
        })
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.session.disconnect(None, "deploy key installed", None)?;
        Ok(())
    }
}
