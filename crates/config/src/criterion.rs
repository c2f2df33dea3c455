#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// One watch rule: what to match and how to announce it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Criterion {
    /// Label used in logs; has no matching role.
    pub name: String,

    /// Matching clauses. All present clauses must hold (conjunction); an
    /// empty match block matches every process.
    #[serde(rename = "match")]
    pub rules: MatchRules,

    /// Notification title template. `{name}`, `{pid}`, `{cmdline}` and
    /// `{username}` are substituted; unknown keys are left as-is.
    pub notify_title: String,

    /// Notification body template, same substitutions as the title.
    pub notify_body: String,

    pub urgency: Urgency,
}

impl Default for Criterion {
    fn default() -> Self {
        Self {
            name: String::new(),
            rules: MatchRules::default(),
            notify_title: default_title(),
            notify_body: default_body(),
            urgency: Urgency::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct MatchRules {
    /// Case-insensitive regular expression applied to the process name.
    pub name_regex: Option<String>,

    /// Substrings that must all occur in the joined command line.
    pub cmdline_contains: Vec<String>,

    /// Exact owning-user name.
    pub username: Option<String>,
}

/// Desktop notification urgency, per the freedesktop notification spec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    Critical,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        };
        f.write_str(s)
    }
}

pub(crate) fn default_title() -> String {
    "New process".to_string()
}

pub(crate) fn default_body() -> String {
    "PID {pid}: {name}".to_string()
}
