use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// procwatch: desktop notifications for new processes
///
/// procwatch watches for newly created processes matching configurable
/// criteria (name regex, command-line substrings, owning user) and raises a
/// desktop notification for each match. It subscribes to kernel exec
/// events when it can and falls back to periodic /proc polling when it
/// cannot.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to the JSON criteria file.
    ///
    /// Defaults to `./config.json`. Send SIGHUP to reload it without
    /// restarting.
    #[arg(short, long, value_parser = validate_file)]
    pub config: Option<PathBuf>,

    /// Polling period, in seconds, used when kernel exec events are
    /// unavailable.
    #[arg(long, default_value_t = 2, value_parser = validate_poll_interval)]
    pub poll_interval: u64,

    /// Log matches without sending desktop notifications.
    #[arg(long)]
    pub no_notify: bool,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,
}

impl Cli {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

/// Check that the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

#[inline(always)]
fn validate_poll_interval(value: &str) -> Result<u64, String> {
    let secs: u64 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a valid number of seconds"))?;
    if (1..=3600).contains(&secs) {
        Ok(secs)
    } else {
        Err("Polling period must be between 1 and 3600 seconds".to_string())
    }
}
