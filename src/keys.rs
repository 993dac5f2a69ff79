//! Locates and reads the deployment key pair on the local machine.
//!
//! The key pair is never generated here. If it's missing, the operator is told how to create it
//! with `ssh-keygen` and the run stops.

use anyhow::{anyhow, bail, Context};
use regex::Regex;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// The directory, relative to the user's home, where SSH keys live.
pub const SSH_DIR: &str = ".ssh";

/// A private key file and its public counterpart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    private: PathBuf,
    public: PathBuf,
}

impl KeyPair {
    /// Creates a [KeyPair] from the path of a private key. The public key is the same path plus
    /// `.pub`.
    pub fn new(private: impl Into<PathBuf>) -> Self {
        let private = private.into();
        let public = public_key(&private);
        KeyPair { private, public }
    }

    /// Creates a [KeyPair] named `key_name` in the current user's `~/.ssh`.
    pub fn in_home(key_name: impl AsRef<Path>) -> anyhow::Result<Self> {
        let home_dir =
            home::home_dir().ok_or_else(|| anyhow!("could not retrieve user's home directory"))?;
        Ok(Self::new(home_dir.join(SSH_DIR).join(key_name)))
    }

    pub fn private_path(&self) -> &Path {
        &self.private
    }

    pub fn public_path(&self) -> &Path {
        &self.public
    }

    /// Returns the key files that do not exist, private key first.
    ///
    /// Returns an error if the existence of either file cannot be determined.
    pub fn missing(&self) -> anyhow::Result<Vec<&Path>> {
        let mut missing = Vec::with_capacity(2);
        for path in [self.private_path(), self.public_path()] {
            if !path_exists(path, "key file")? {
                missing.push(path);
            }
        }
        Ok(missing)
    }

    /// Returns whether both key files exist.
    pub fn present(&self) -> anyhow::Result<bool> {
        Ok(self.missing()?.is_empty())
    }

    /// Reads the public key, trimmed of surrounding white space.
    pub fn read_public(&self) -> anyhow::Result<String> {
        let key = fs::read_to_string(&self.public).with_context(|| {
            format!("could not read public key: {}", self.public.display())
        })?;
        Ok(key.trim().to_string())
    }

    /// Reads the private key exactly as stored. Line breaks are significant in PEM-style keys, so
    /// nothing is trimmed.
    pub fn read_private(&self) -> anyhow::Result<String> {
        fs::read_to_string(&self.private).with_context(|| {
            format!("could not read private key: {}", self.private.display())
        })
    }

    /// The `ssh-keygen` invocation that creates this key pair without a passphrase.
    ///
    /// CI runners can't answer a passphrase prompt, hence `-N ""`.
    pub fn keygen_command(&self, comment: &str) -> String {
        let private = self.private.to_string_lossy();
        let quoted = shlex::try_quote(&private).unwrap_or(private.clone());
        format!("ssh-keygen -t ed25519 -C \"{comment}\" -f {quoted} -N \"\"")
    }
}

/// Transforms a private key file name to a public key file name.
///
/// Appends ".pub" without performing a lossy UTF-8 conversion.
pub fn public_key(private_key: impl AsRef<Path>) -> PathBuf {
    let mut key_path: OsString = private_key.as_ref().to_owned().into();
    key_path.push(".pub");
    key_path.into()
}

/// Wraps [Path::try_exists], naming the file in the error.
///
/// `desc` is a very brief description of the file type.
fn path_exists(path: &Path, desc: &str) -> anyhow::Result<bool> {
    path.try_exists()
        .with_context(|| format!("could not determine whether {desc} exists: {}", path.display()))
}

fn public_key_pattern() -> &'static Regex {
    static COMPUTED: OnceLock<Regex> = OnceLock::new();

    // Format: keytype base64-key [comment]. Options (as found in authorized_keys) are not
    // expected in a .pub file.
    COMPUTED.get_or_init(|| {
        Regex::new(
            r"^(ssh-(ed25519|rsa|dss)|ecdsa-sha2-nistp(256|384|521)|sk-(ssh-ed25519|ecdsa-sha2-nistp256)@openssh\.com) [A-Za-z0-9+/]+={0,3}( .*)?$",
        )
        .unwrap()
    })
}

/// Checks that `key` looks like a single OpenSSH public key line.
///
/// This is a sanity check on the file we are about to append to a remote authorized keys file,
/// not a cryptographic validation.
pub fn check_public_key(key: &str) -> anyhow::Result<()> {
    let lines = key.lines().count();
    if lines != 1 {
        bail!("public key should be exactly one line, but it has {lines}");
    }
    if !public_key_pattern().is_match(key) {
        bail!("public key does not look like `<type> <base64> [comment]`");
    }
    Ok(())
}

/// Returns the comment at the end of a public key line, if any.
pub fn comment(key: &str) -> Option<&str> {
    let mut parts = key.trim().splitn(3, ' ');
    let _type = parts.next()?;
    let _key = parts.next()?;
    parts.next().map(str::trim).filter(|c| !c.is_empty())
}

#[cfg(test)]
mod test;
