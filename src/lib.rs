//! Provisions a CI/CD deploy key onto a single server.
//!
//! # Program flow
//!
//! [setup::Setup::run] walks through the steps below in order. Each one lives in its own module.
//!
//! 1. [keys] checks that the key pair exists under `~/.ssh` and reads both halves. If either
//!    file is missing, the operator is shown the `ssh-keygen` command to create it and the run
//!    stops. Keys are never generated here.
//!
//! 1. [probe] checks that the server accepts TCP connections on the SSH port. If it doesn't, the
//!    operator decides whether to carry on.
//!
//! 1. [install] puts the public key into the remote `~/.ssh/authorized_keys`. Which installer is
//!    used is decided once, at startup, by [install::select]: with the `ssh2` feature and a
//!    configured password, the key is installed over SSH; otherwise the commands to do it by
//!    hand are printed.
//!
//! 1. [report] prints the private key and the list of secrets to register with the CI system.
//!
//! Settings come from [config::Config], which layers defaults, a YAML file, and `DEPLOYKEY_*`
//! environment variables. The password is never built into the program.
//!
//! # Security
//!
//! The SSH session trusts the server's host key on first use. See [install] for details.

pub mod config;
pub mod install;
pub mod keys;
pub mod probe;
pub mod report;
pub mod setup;
