#![forbid(unsafe_code)]

//! Criteria compilation and matching against resolved process attributes.

use crate::attributes::ProcessAttributes;
use crate::template;
use anyhow::Context;
use config::{Config, Urgency};
use regex::Regex;
use std::collections::HashMap;

/// A criterion with its regex compiled, ready to match.
#[derive(Debug)]
pub struct CompiledCriterion {
    pub name: String,
    name_regex: Option<Regex>,
    cmdline_contains: Vec<String>,
    username: Option<String>,
    notify_title: String,
    notify_body: String,
    pub urgency: Urgency,
}

impl CompiledCriterion {
    /// All present clauses must hold; a criterion with no clauses matches
    /// everything.
    pub fn matches(&self, attrs: &ProcessAttributes) -> bool {
        if let Some(regex) = &self.name_regex
            && !regex.is_match(&attrs.name)
        {
            return false;
        }
        if !self
            .cmdline_contains
            .iter()
            .all(|term| attrs.cmdline.contains(term.as_str()))
        {
            return false;
        }
        if let Some(username) = &self.username
            && *username != attrs.username
        {
            return false;
        }
        true
    }

    /// Render the notification title and body for a matched process.
    pub fn render(&self, attrs: &ProcessAttributes) -> (String, String) {
        let vars = HashMap::from([
            ("name", attrs.name.clone()),
            ("pid", attrs.pid.to_string()),
            ("cmdline", attrs.cmdline.clone()),
            ("username", attrs.username.clone()),
        ]);
        (
            template::render(&self.notify_title, &vars),
            template::render(&self.notify_body, &vars),
        )
    }
}

/// The full compiled criteria set; swapped wholesale on reload.
#[derive(Debug, Default)]
pub struct CriteriaSet {
    pub criteria: Vec<CompiledCriterion>,
}

impl CriteriaSet {
    /// Compile every criterion, naming the offender on a bad regex.
    pub fn compile(config: &Config) -> anyhow::Result<Self> {
        let mut criteria = Vec::with_capacity(config.criteria.len());
        for criterion in &config.criteria {
            let name_regex = criterion
                .rules
                .name_regex
                .as_deref()
                .map(|pattern| {
                    // Case-insensitive, matching the original watcher.
                    Regex::new(&format!("(?i){pattern}"))
                })
                .transpose()
                .with_context(|| {
                    format!("criterion {:?}: invalid name_regex", criterion.name)
                })?;

            criteria.push(CompiledCriterion {
                name: criterion.name.clone(),
                name_regex,
                cmdline_contains: criterion.rules.cmdline_contains.clone(),
                username: criterion.rules.username.clone(),
                notify_title: criterion.notify_title.clone(),
                notify_body: criterion.notify_body.clone(),
                urgency: criterion.urgency,
            });
        }
        Ok(Self { criteria })
    }

    /// Criteria matching the given attributes, in configuration order.
    pub fn matching<'a>(
        &'a self,
        attrs: &'a ProcessAttributes,
    ) -> impl Iterator<Item = &'a CompiledCriterion> {
        self.criteria
            .iter()
            .filter(move |criterion| criterion.matches(attrs))
    }
}
