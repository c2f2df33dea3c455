#![forbid(unsafe_code)]

//! `{key}` placeholder substitution for notification templates.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// Replace every `{key}` whose key exists in `vars`; unknown keys stay
/// verbatim so typos in a template remain visible in the notification.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[1];
            match vars.get(key) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> HashMap<&'static str, String> {
        HashMap::from([
            ("name", "nginx".to_string()),
            ("pid", "4242".to_string()),
        ])
    }

    #[test]
    fn substitutes_known_keys() {
        assert_eq!(render("PID {pid}: {name}", &vars()), "PID 4242: nginx");
    }

    #[test]
    fn unknown_keys_are_left_verbatim() {
        assert_eq!(render("{name} on {host}", &vars()), "nginx on {host}");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(render("no placeholders here", &vars()), "no placeholders here");
        assert_eq!(render("", &vars()), "");
    }

    #[test]
    fn repeated_keys_are_all_substituted() {
        assert_eq!(render("{pid} {pid}", &vars()), "4242 4242");
    }
}
