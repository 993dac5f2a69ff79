//! Operator-facing console output.
//!
//! Every function here writes to a caller-supplied writer so that the exact text can be tested.
//! Diagnostics belong in `tracing`, not here.

use crate::config::Config;
use crate::install::Target;
use crate::keys::KeyPair;
use indexmap::IndexMap;
use std::fmt::Display;
use std::io::{self, Write};
use std::path::Path;

/// Frames blocks the operator is expected to copy.
pub const SEPARATOR: &str = "==================================================";

/// Value shown for the private key entry in the secrets checklist.
pub const PRIVATE_KEY_PLACEHOLDER: &str = "[paste private key above]";

/// Writes `content` between two [SEPARATOR] lines.
fn framed(out: &mut dyn Write, content: impl Display) -> io::Result<()> {
    writeln!(out, "{SEPARATOR}")?;
    writeln!(out, "{content}")?;
    writeln!(out, "{SEPARATOR}")
}

pub fn banner(out: &mut dyn Write) -> io::Result<()> {
    framed(out, "CI/CD deploy key setup")
}

/// Shows the public key that is about to be installed.
pub fn public_key(out: &mut dyn Write, key: &str) -> io::Result<()> {
    writeln!(out, "\nPublic key:")?;
    framed(out, key)
}

/// Tells the operator which key files are missing and how to create them.
pub fn missing_keys(
    out: &mut dyn Write,
    keys: &KeyPair,
    missing: &[&Path],
    comment: &str,
) -> io::Result<()> {
    writeln!(out, "SSH keys not found at:")?;
    for path in missing {
        writeln!(out, "    {}", path.display())?;
    }
    writeln!(out, "\nPlease generate them first using:")?;
    writeln!(out, "{}", keys.keygen_command(comment))
}

/// Commands that install the key by hand.
pub fn manual_instructions(
    out: &mut dyn Write,
    target: &Target,
    public_key_path: &Path,
) -> io::Result<()> {
    writeln!(
        out,
        "\nAutomatic installation is unavailable (no SSH support or no password configured).",
    )?;
    writeln!(out, "Manual setup required. Run this on YOUR LOCAL MACHINE:")?;
    writeln!(out, "{SEPARATOR}")?;
    writeln!(out, "{}", copy_id_command(target, public_key_path))?;
    writeln!(out, "# Or manually:")?;
    writeln!(out, "{}", ssh_command(target))?;
    writeln!(out, "mkdir -p ~/.ssh && chmod 700 ~/.ssh")?;
    writeln!(
        out,
        "cat >> ~/.ssh/authorized_keys  # paste public key, then Ctrl+D",
    )?;
    writeln!(out, "chmod 600 ~/.ssh/authorized_keys")?;
    writeln!(out, "{SEPARATOR}")
}

/// Reports a failed remote installation and the one-line manual alternative.
pub fn install_failed(
    out: &mut dyn Write,
    error: &anyhow::Error,
    target: &Target,
    public_key_path: &Path,
) -> io::Result<()> {
    writeln!(out, "\nFailed to install key: {error:#}")?;
    writeln!(out, "\nTry manual setup:")?;
    writeln!(out, "{}", copy_id_command(target, public_key_path))
}

/// `ssh-copy-id` invocation for `target`. The port flag is omitted for port 22.
pub fn copy_id_command(target: &Target, public_key_path: &Path) -> String {
    let path = public_key_path.to_string_lossy();
    let path = shlex::try_quote(&path).unwrap_or(path.clone());
    match target.port {
        22 => format!("ssh-copy-id -i {path} {target}"),
        port => format!("ssh-copy-id -i {path} -p {port} {target}"),
    }
}

fn ssh_command(target: &Target) -> String {
    match target.port {
        22 => format!("ssh {target}"),
        port => format!("ssh -p {port} {target}"),
    }
}

/// The values CI needs, in the order the operator should register them.
pub fn secrets(config: &Config) -> IndexMap<&'static str, String> {
    IndexMap::from([
        ("SSH_PRIVATE_KEY", PRIVATE_KEY_PLACEHOLDER.to_string()),
        ("SERVER_HOST", config.host.clone()),
        ("SERVER_USER", config.user.clone()),
        ("DEPLOY_PATH", config.deploy_path.clone()),
    ])
}

/// Prints the private key and the checklist of secrets to register with CI.
pub fn private_key_and_secrets(
    out: &mut dyn Write,
    private_key: &str,
    secrets: &IndexMap<&'static str, String>,
) -> io::Result<()> {
    writeln!(out, "\nPrivate key (for CI secrets):")?;
    writeln!(out, "{SEPARATOR}")?;
    // The key file normally ends with a newline already.
    write!(out, "{private_key}")?;
    if !private_key.ends_with('\n') {
        writeln!(out)?;
    }
    writeln!(out, "{SEPARATOR}")?;

    writeln!(out, "\nSetup complete!")?;
    writeln!(out, "\nNext steps:")?;
    writeln!(
        out,
        "1. Open your repository's CI secrets settings \
        (GitHub: Settings > Secrets and variables > Actions)",
    )?;
    writeln!(out, "2. Add these secrets:")?;
    for (name, value) in secrets {
        writeln!(out, "   - {name}: {value}")?;
    }
    writeln!(out, "\n3. Push changes to the main branch:")?;
    writeln!(out, "   git push origin main")?;
    writeln!(out, "\n4. Watch the deployment in the Actions tab")?;
    writeln!(out, "{SEPARATOR}")
}
