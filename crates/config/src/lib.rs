#![forbid(unsafe_code)]

//! Criteria configuration for the process watcher.
//!
//! The file format is a JSON array of criteria, e.g.:
//!
//! ```json
//! [
//!   {
//!     "name": "ssh sessions",
//!     "match": { "name_regex": "^sshd?$", "username": "root" },
//!     "notify_title": "SSH activity",
//!     "notify_body": "PID {pid}: {cmdline}",
//!     "urgency": "critical"
//!   }
//! ]
//! ```

mod criterion;
mod error;

pub use criterion::{Criterion, MatchRules, Urgency};
pub use error::Error;

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Config {
    pub criteria: Vec<Criterion>,
}

impl Config {
    /// Load criteria from a JSON file. Missing fields are filled with
    /// defaults; empty notification templates count as missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&text)?;
        config.apply_defaults();
        Ok(config)
    }

    fn apply_defaults(&mut self) {
        for criterion in &mut self.criteria {
            if criterion.notify_title.is_empty() {
                criterion.notify_title = criterion::default_title();
            }
            if criterion.notify_body.is_empty() {
                criterion.notify_body = criterion::default_body();
            }
        }
    }
}
