//! URL template resolution
//!
//! Templates carry `${name}` placeholders that are substituted from the
//! action's parameter map exactly once, at construction time. Retries reuse
//! the already-resolved URL.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::QueueError;

/// Pattern for ${name} placeholders
static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// Resolve every `${name}` placeholder in `template` from `params`.
///
/// Resolution is strict: a placeholder with no matching parameter is a
/// caller configuration error and fails immediately, before any network
/// activity. Literal text (including `$` not followed by `{`) passes
/// through unchanged.
pub fn resolve(template: &str, params: &BTreeMap<String, String>) -> Result<String, QueueError> {
    let mut missing: Vec<String> = Vec::new();

    let resolved = PLACEHOLDER_PATTERN.replace_all(template, |caps: &regex::Captures| {
        let name = &caps[1];
        match params.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(resolved.into_owned())
    } else {
        Err(QueueError::Template(format!(
            "missing parameter(s) {} for template '{}'",
            missing.join(", "),
            template
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_named_placeholders() {
        let p = params(&[("region", "eu"), ("page", "1")]);
        let url = resolve("https://api.example.com/${region}/orders?page=${page}", &p).unwrap();
        assert_eq!(url, "https://api.example.com/eu/orders?page=1");
    }

    #[test]
    fn no_placeholders_passes_through() {
        let url = resolve("https://api.example.com/orders", &BTreeMap::new()).unwrap();
        assert_eq!(url, "https://api.example.com/orders");
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let err = resolve("https://api.example.com/${region}", &BTreeMap::new()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("region"), "error should name the placeholder: {msg}");
    }

    #[test]
    fn plain_dollar_is_literal() {
        let url = resolve("https://api.example.com/price?currency=$US", &BTreeMap::new()).unwrap();
        assert_eq!(url, "https://api.example.com/price?currency=$US");
    }

    #[test]
    fn resolution_is_idempotent() {
        let p = params(&[("id", "42")]);
        let a = resolve("https://api.example.com/items/${id}", &p).unwrap();
        let b = resolve("https://api.example.com/items/${id}", &p).unwrap();
        assert_eq!(a, b);
    }
}
