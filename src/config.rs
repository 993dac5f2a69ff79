//! Where the deployment target and its credentials come from.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then `DEPLOYKEY_*`
//! environment variables. Nothing about the target is compiled into the program.

use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The name of the configuration file inside [config_dir].
pub const CONFIG_FILE: &str = "deploykey.yaml";

/// How long the reachability probe waits for a TCP connection.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the SSH session waits to connect and for each blocking operation.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix shared by every environment variable that overrides a configuration value.
pub const ENV_PREFIX: &str = "DEPLOYKEY_";

const DEFAULT_PORT: u16 = 22;
const DEFAULT_KEY_NAME: &str = "parrot_shop_deploy";
const DEFAULT_KEY_COMMENT: &str = "github-actions@parrot-shop";
const DEFAULT_MARKER: &str = "github-actions";
const DEFAULT_DEPLOY_PATH: &str = "/opt/parrot-shop";

/// Returns a [PathBuf] to the directory where the configuration file should live.
///
/// When compiled for testing, this returns `CARGO_MANIFEST_DIR` plus `resources/etc/deploykey`.
/// Otherwise, it returns `/etc/deploykey`.
pub fn config_dir() -> PathBuf {
    // Omit the leading slash so that PathBuf::push appends instead of replacing.
    const CONFIG_DIR: &str = "etc/deploykey";

    let mut path = PathBuf::from("/");

    #[cfg(test)]
    {
        path.push(env!("CARGO_MANIFEST_DIR"));
        path.push("resources");
    }

    path.push(CONFIG_DIR);
    path
}

/// Everything the program needs to know about the deployment target.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub user: String,

    /// Password for the SSH session. Without one, only manual instructions can be printed.
    pub password: Option<String>,

    /// The directory CI deploys into. Only echoed back in the secrets checklist.
    pub deploy_path: String,

    /// File name of the private key in `~/.ssh`. The public key is the same name plus `.pub`.
    pub key_name: String,

    /// Comment suggested to `ssh-keygen` when the key pair is missing.
    pub key_comment: String,

    /// Substring that must show up in the remote authorized keys file after installation.
    pub marker: String,
}

// Keep the password out of logs and panic messages.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("deploy_path", &self.deploy_path)
            .field("key_name", &self.key_name)
            .field("key_comment", &self.key_comment)
            .field("marker", &self.marker)
            .finish()
    }
}

/// One layer of configuration. Every field is optional so that layers can be merged.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Layer {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub deploy_path: Option<String>,
    pub key_name: Option<String>,
    pub key_comment: Option<String>,
    pub marker: Option<String>,
}

impl Layer {
    /// Parses a layer from YAML text.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        // An empty document deserializes to unit, not to an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads a layer from a YAML file.
    ///
    /// If `required` is `false`, a file that does not exist yields an empty layer.
    pub fn from_file(path: impl AsRef<Path>, required: bool) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = match fs::read_to_string(path) {
            Ok(yaml) => yaml,
            Err(e) if e.kind() == ErrorKind::NotFound && !required => {
                tracing::debug!(path = %path.display(), "no configuration file");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("could not read configuration: {}", path.display()))
            }
        };
        Self::from_yaml(&yaml)
            .with_context(|| format!("malformed configuration: {}", path.display()))
    }

    /// Builds a layer from environment variables, looked up through `lookup`.
    ///
    /// `lookup` receives full variable names, e.g. `DEPLOYKEY_HOST`. Empty values count as unset.
    pub fn from_env_with<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|value| !value.trim().is_empty())
        };

        let port = match var("PORT") {
            Some(port) => Some(
                port.trim()
                    .parse()
                    .with_context(|| format!("{ENV_PREFIX}PORT is not a valid port: {port}"))?,
            ),
            None => None,
        };

        Ok(Self {
            host: var("HOST"),
            port,
            user: var("USER"),
            password: var("PASSWORD"),
            deploy_path: var("DEPLOY_PATH"),
            key_name: var("KEY_NAME"),
            key_comment: var("KEY_COMMENT"),
            marker: var("MARKER"),
        })
    }

    /// Builds a layer from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_env_with(|name| env::var(name).ok())
    }

    /// Returns `self` with every value that `other` sets replaced by `other`'s value.
    pub fn overlay(self, other: Layer) -> Self {
        Self {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            user: other.user.or(self.user),
            password: other.password.or(self.password),
            deploy_path: other.deploy_path.or(self.deploy_path),
            key_name: other.key_name.or(self.key_name),
            key_comment: other.key_comment.or(self.key_comment),
            marker: other.marker.or(self.marker),
        }
    }
}

impl TryFrom<Layer> for Config {
    type Error = anyhow::Error;

    fn try_from(layer: Layer) -> anyhow::Result<Self> {
        let missing = |name: &str| {
            anyhow!(
                "no {name} configured; set `{name}` in {CONFIG_FILE} or {ENV_PREFIX}{}",
                name.to_ascii_uppercase(),
            )
        };

        let config = Config {
            host: layer.host.ok_or_else(|| missing("host"))?,
            port: layer.port.unwrap_or(DEFAULT_PORT),
            user: layer.user.ok_or_else(|| missing("user"))?,
            password: layer.password,
            deploy_path: layer
                .deploy_path
                .unwrap_or_else(|| DEFAULT_DEPLOY_PATH.to_string()),
            key_name: layer.key_name.unwrap_or_else(|| DEFAULT_KEY_NAME.to_string()),
            key_comment: layer
                .key_comment
                .unwrap_or_else(|| DEFAULT_KEY_COMMENT.to_string()),
            marker: layer.marker.unwrap_or_else(|| DEFAULT_MARKER.to_string()),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Loads the configuration from its file and the environment.
    ///
    /// If `path` is given, that file must exist. Otherwise [CONFIG_FILE] in [config_dir] is read
    /// if present.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => Layer::from_file(path, true)?,
            None => Layer::from_file(config_dir().join(CONFIG_FILE), false)?,
        };
        let config = Config::try_from(file.overlay(Layer::from_env()?))?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Rejects values that would produce broken commands later on.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("host must not be empty");
        }
        if self.user.trim().is_empty() {
            anyhow::bail!("user must not be empty");
        }
        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }
        if self.marker.trim().is_empty() {
            anyhow::bail!("marker must not be empty");
        }
        // The key name is joined onto ~/.ssh, so it has to stay a plain file name.
        if self.key_name.is_empty()
            || self.key_name.contains('/')
            || self.key_name == "."
            || self.key_name == ".."
        {
            anyhow::bail!("key_name must be a plain file name: {:?}", self.key_name);
        }
        Ok(())
    }
}
