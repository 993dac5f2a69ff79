//! The end-to-end run: check keys, probe the server, install the key, print the secrets.

use crate::config::Config;
use crate::install::{Installer, Outcome, Target};
use crate::keys::{self, KeyPair};
use crate::probe::Probe;
use crate::report;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The run reached the end and printed the secrets. This includes the manual path.
    Completed,

    /// The run stopped early: keys missing, the operator declined, or installation failed.
    Aborted,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Completed => ExitCode::SUCCESS,
            Status::Aborted => ExitCode::FAILURE,
        }
    }
}

/// Asks a yes/no question and reads one line of input.
///
/// Only `y` (any case, surrounding white space ignored) counts as yes. End of input counts as no.
pub fn confirm(input: &mut dyn BufRead, out: &mut dyn Write, question: &str) -> io::Result<bool> {
    write!(out, "{question} (y/n) ")?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

/// One run of the deploy key setup, with its collaborators injected.
pub struct Setup<'a, P: Probe> {
    config: &'a Config,
    keys: KeyPair,
    probe: P,
    installer: Box<dyn Installer + 'a>,
}

impl<'a, P: Probe> Setup<'a, P> {
    pub fn new(
        config: &'a Config,
        keys: KeyPair,
        probe: P,
        installer: Box<dyn Installer + 'a>,
    ) -> Self {
        Setup {
            config,
            keys,
            probe,
            installer,
        }
    }

    /// Runs every step in order, reading operator answers from `input` and writing everything
    /// meant for the operator to `out`.
    ///
    /// # Returns
    ///
    /// [Status::Aborted] for the expected ways a run can stop early. An [Err] means something the
    /// run can't recover from, e.g. a key file that exists but can't be read.
    pub fn run(&mut self, input: &mut dyn BufRead, out: &mut dyn Write) -> anyhow::Result<Status> {
        report::banner(out)?;

        writeln!(out, "\nChecking SSH keys...")?;
        let missing = self.keys.missing()?;
        if !missing.is_empty() {
            tracing::warn!(?missing, "key pair incomplete");
            report::missing_keys(out, &self.keys, &missing, &self.config.key_comment)?;
            return Ok(Status::Aborted);
        }
        writeln!(out, "SSH keys found")?;

        let public_key = self.keys.read_public()?;
        if let Err(error) = keys::check_public_key(&public_key) {
            let path = self.keys.public_path().display();
            tracing::warn!(%error, %path, "suspicious public key");
            writeln!(out, "Warning: {error}")?;
        }
        let marker = &self.config.marker;
        if !keys::comment(&public_key).is_some_and(|comment| comment.contains(marker.as_str())) {
            tracing::warn!(%marker, "public key comment lacks the verification marker");
            writeln!(
                out,
                "Warning: the public key's comment does not contain \"{marker}\", \
                so the installation can't be verified",
            )?;
        }
        report::public_key(out, &public_key)?;

        let Config { host, port, .. } = self.config;
        writeln!(out, "\nTesting connection to {host}:{port}...")?;
        if let Err(error) = self.probe.reachable(host, *port) {
            writeln!(out, "Cannot reach server on port {port}: {error}")?;
            writeln!(out, "\nServer not reachable (maybe blocked by firewall)")?;
            if !confirm(input, out, "Continue anyway?")? {
                writeln!(out)?;
                return Ok(Status::Aborted);
            }
        } else {
            writeln!(out, "Server is reachable on port {port}")?;
        }

        writeln!(out)?;
        match self.installer.install(&public_key, out) {
            Ok(Outcome::Verified) => writeln!(out, "Public key successfully installed on server!")?,
            Ok(Outcome::Unverified) => {
                writeln!(out, "Warning: public key may not be installed correctly")?
            }
            Ok(Outcome::Manual) => {}
            Err(error) => {
                tracing::error!(?error, "remote installation failed");
                report::install_failed(
                    out,
                    &error,
                    &Target::from(self.config),
                    self.keys.public_path(),
                )?;
                return Ok(Status::Aborted);
            }
        }

        let private_key = self.keys.read_private()?;
        report::private_key_and_secrets(out, &private_key, &report::secrets(self.config))?;
        Ok(Status::Completed)
    }
}
