use deploykey::config::{Config, PROBE_TIMEOUT};
use deploykey::install;
use deploykey::keys::KeyPair;
use deploykey::probe::TcpProbe;
use deploykey::setup::Setup;
use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Names the environment variable that holds the `tracing` filter.
const LOG_ENV: &str = "DEPLOYKEY_LOG";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    // The only argument is an optional path to a config file.
    let config_file = env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_file.as_deref())?;

    let keys = KeyPair::in_home(&config.key_name)?;
    let installer = install::select(&config, &keys);
    let mut setup = Setup::new(&config, keys, TcpProbe::new(PROBE_TIMEOUT), installer);

    let status = setup.run(&mut io::stdin().lock(), &mut io::stdout().lock())?;
    Ok(status.into())
}
