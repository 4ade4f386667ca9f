//! # `{{ name }}` placeholder substitution.
//!
//! Configuration files are templates: device identity and secrets are injected
//! at load time. A placeholder left unresolved is an error, so a literal
//! `{{ ftp_password }}` can never end up used as a credential.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^\n]*?)\}\}").expect("placeholder pattern is valid"))
}

fn name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("name pattern is valid"))
}

/// Replaces every placeholder of `text` with its value in `vars`.
///
/// Any `{{ ... }}` left over counts as unresolved, including ones whose
/// content is not a valid name. Returns the sorted, de-duplicated list of
/// unresolved contents on failure.
pub fn render(text: &str, vars: &BTreeMap<String, String>) -> Result<String, Vec<String>> {
    let mut missing = Vec::new();
    let rendered = placeholder().replace_all(text, |caps: &Captures<'_>| {
        let inner = caps[1].trim();
        match vars.get(inner) {
            Some(value) if name().is_match(inner) => value.clone(),
            _ => {
                missing.push(match inner {
                    "" => caps[0].to_string(),
                    inner => inner.to_string(),
                });
                caps[0].to_string()
            }
        }
    });
    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        missing.sort_unstable();
        missing.dedup();
        Err(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("device_id".to_string(), "cam-07".to_string()),
            ("ftp_password".to_string(), "s3cret".to_string()),
        ])
    }

    #[test]
    fn test_render_substitutes_with_and_without_spaces() {
        let out = render("id = \"{{device_id}}\"\npw = \"{{ ftp_password }}\"", &vars()).unwrap();
        assert_eq!(out, "id = \"cam-07\"\npw = \"s3cret\"");
    }

    #[test]
    fn test_unresolved_placeholders_are_reported() {
        let err = render("a = \"{{ nope }}\"\nb = \"{{ nope }}\"\nc = \"{{ other }}\"", &vars())
            .unwrap_err();
        assert_eq!(err, vec!["nope".to_string(), "other".to_string()]);
    }

    #[test]
    fn test_text_without_placeholders_is_unchanged() {
        let text = "[main]\nperiod = 5\n";
        assert_eq!(render(text, &BTreeMap::new()).unwrap(), text);
    }

    #[test]
    fn test_malformed_placeholders_are_unresolved() {
        let text = "a = \"{{ ftp password }}\"\nb = \"{{ ftp_password|upper }}\"\nc = \"{{}}\"\n";
        let err = render(text, &vars()).unwrap_err();
        assert_eq!(
            err,
            vec![
                "ftp password".to_string(),
                "ftp_password|upper".to_string(),
                "{{}}".to_string(),
            ]
        );
    }

    #[test]
    fn test_substituted_value_is_not_rescanned() {
        let vars = BTreeMap::from([("x".to_string(), "{{ y }}".to_string())]);
        assert_eq!(render("v = \"{{ x }}\"", &vars).unwrap(), "v = \"{{ y }}\"");
    }
}
